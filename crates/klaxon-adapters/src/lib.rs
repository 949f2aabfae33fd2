pub mod events;
pub mod notify;
pub mod persistence;
pub mod sources;
