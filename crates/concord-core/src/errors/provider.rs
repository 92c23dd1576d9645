//! Classification of outbound provider failures.
//!
//! Providers surface `anyhow::Error`s with free-form messages. The judge
//! records one failed result per method and needs a stable tag for it, so
//! messages are mapped onto a small closed set of kinds.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Timeout,
    RateLimit,
    Quota,
    Network,
    Server,
    Parse,
    Other,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Quota => "quota",
            Self::Network => "network",
            Self::Server => "server",
            Self::Parse => "parse",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    pub provider: Option<String>,
    pub status: Option<u16>,
    /// True when kind was inferred from free-form message parsing.
    pub legacy_classified: bool,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider: None,
            status: None,
            legacy_classified: false,
        }
    }

    pub fn timeout(provider: Option<String>, after_ms: u64) -> Self {
        let mut err = Self::new(
            ProviderErrorKind::Timeout,
            format!("call timed out after {after_ms}ms"),
        );
        err.provider = provider;
        err
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn classify_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let msg = message.to_lowercase();

        let kind = if msg.contains("timeout") || msg.contains("timed out") {
            ProviderErrorKind::Timeout
        } else if msg.contains("rate limit") || msg.contains("429") {
            ProviderErrorKind::RateLimit
        } else if msg.contains("quota") || msg.contains("insufficient_quota") {
            ProviderErrorKind::Quota
        } else if msg.contains("500")
            || msg.contains("502")
            || msg.contains("503")
            || msg.contains("504")
            || msg.contains("provider error")
        {
            ProviderErrorKind::Server
        } else if msg.contains("network") || msg.contains("connection") || msg.contains("dns") {
            ProviderErrorKind::Network
        } else if msg.contains("missing") || msg.contains("invalid json") {
            ProviderErrorKind::Parse
        } else {
            ProviderErrorKind::Other
        };

        let mut err = Self::new(kind, message);
        err.legacy_classified = true;
        err
    }

    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        if let Some(typed) = err.downcast_ref::<ProviderError>() {
            return typed.clone();
        }
        Self::classify_message(format!("{err:#}"))
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.provider {
            Some(p) => write!(f, "{} ({}): {}", self.kind, p, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_message_maps_infra_errors() {
        assert_eq!(
            ProviderError::classify_message("provider returned 429").kind,
            ProviderErrorKind::RateLimit
        );
        assert_eq!(
            ProviderError::classify_message("request timeout while calling provider").kind,
            ProviderErrorKind::Timeout
        );
        assert_eq!(
            ProviderError::classify_message("provider error: 503").kind,
            ProviderErrorKind::Server
        );
        assert_eq!(
            ProviderError::classify_message("network dns resolution failed").kind,
            ProviderErrorKind::Network
        );
        assert_eq!(
            ProviderError::classify_message("You exceeded your current quota").kind,
            ProviderErrorKind::Quota
        );
    }

    #[test]
    fn typed_errors_survive_anyhow_roundtrip() {
        let typed = ProviderError::timeout(Some("openai".into()), 500);
        let wrapped = anyhow::Error::new(typed.clone());
        let back = ProviderError::from_anyhow(&wrapped);
        assert_eq!(back, typed);
        assert!(!back.legacy_classified);
    }

    #[test]
    fn legacy_classification_is_explicitly_marked() {
        let legacy = ProviderError::from_anyhow(&anyhow::anyhow!("connection reset"));
        assert_eq!(legacy.kind, ProviderErrorKind::Network);
        assert!(legacy.legacy_classified);
    }
}
