use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::alert::{Alert, Severity};
use crate::error::DomainError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    LabelEquals { key: String, value: String },
    LabelExists { key: String },
    SourceEquals { source: String },
    SeverityIn { severities: Vec<Severity> },
    /// Case-insensitive substring match on the title.
    TitleContains { text: String },
    /// Regex match on the description; an alert without one never matches.
    DescriptionMatches { pattern: String },
}

impl Condition {
    pub fn matches(&self, alert: &Alert) -> Result<bool, DomainError> {
        let matched = match self {
            Self::LabelEquals { key, value } => alert.labels().get(key) == Some(value),
            Self::LabelExists { key } => alert.labels().contains_key(key),
            Self::SourceEquals { source } => alert.source().as_str().eq_ignore_ascii_case(source),
            Self::SeverityIn { severities } => severities.contains(&alert.severity()),
            Self::TitleContains { text } => alert
                .title()
                .to_lowercase()
                .contains(&text.to_lowercase()),
            Self::DescriptionMatches { pattern } => {
                let re = Regex::new(pattern)
                    .map_err(|e| DomainError::InvalidPattern(e.to_string()))?;
                alert.description().is_some_and(|d| re.is_match(d))
            }
        };
        Ok(matched)
    }
}
