use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use klaxon_server::config::Config;
use klaxon_server::server::Klaxon;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load()?;
    let bind_addr = config.bind_addr;
    let klaxon = Klaxon::build(config)
        .await
        .context("failed to open the database")?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let escalations = tokio::spawn(klaxon.escalation_worker().run(stopped(stop_rx.clone())));
    let deliveries = tokio::spawn(klaxon.delivery_worker().run(stopped(stop_rx)));
    let _event_log = klaxon.spawn_event_log();

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;
    info!(addr = %bind_addr, "klaxon listening");

    axum::serve(listener, klaxon.router())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = stop_tx.send(true);
        })
        .await?;

    let (escalations, deliveries) = tokio::join!(escalations, deliveries);
    escalations?;
    deliveries?;
    info!("klaxon shut down");
    Ok(())
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
