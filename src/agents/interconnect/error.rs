//! Interconnect Errors
//!
//! Error taxonomy shared by provider clients, the state store and the
//! orchestrator, plus the serializable form persisted on a failed record.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{ConnectionState, ProviderTag, ResourceRef};

/// Why a provider call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Throttled by the provider API
    RateLimited,
    /// Network failure, 5xx, or a resource busy with a previous operation
    Transient,
    /// Credentials lack the required permission
    Permission,
    /// Account or project quota exhausted
    Quota,
    /// The provider rejected the request itself
    InvalidRequest,
}

impl ProviderErrorKind {
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::RateLimited | Self::Transient)
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate limited"),
            Self::Transient => write!(f, "transient"),
            Self::Permission => write!(f, "permission denied"),
            Self::Quota => write!(f, "quota exceeded"),
            Self::InvalidRequest => write!(f, "invalid request"),
        }
    }
}

#[derive(Debug, Error)]
pub enum InterconnectError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("gateway {gateway} is not ready")]
    GatewayNotReady { gateway: String },

    #[error("{provider} provider error ({kind}): {message}")]
    Provider {
        provider: ProviderTag,
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("cleanup incomplete, resources still present: {}", join_refs(.dangling))]
    PartialFailure { dangling: Vec<ResourceRef> },

    #[error("timed out after {elapsed:?} waiting for {waited_for}")]
    Timeout {
        waited_for: String,
        elapsed: Duration,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("state store error: {0}")]
    Store(String),

    /// Failure persisted by an earlier attempt
    #[error("earlier attempt failed: {0}")]
    Recorded(ConnectionError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn join_refs(refs: &[ResourceRef]) -> String {
    refs.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl InterconnectError {
    pub fn provider(provider: ProviderTag, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Store(err.to_string())
    }

    /// Errors a poll loop or client retry may absorb
    pub fn is_transient(&self) -> bool {
        match self {
            Self::GatewayNotReady { .. } => true,
            Self::Provider { kind, .. } => kind.is_recoverable(),
            _ => false,
        }
    }

    /// Recoverable provider failures only; what clients retry on their own
    pub fn is_recoverable_provider(&self) -> bool {
        matches!(self, Self::Provider { kind, .. } if kind.is_recoverable())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::GatewayNotReady { .. } => ErrorKind::GatewayNotReady,
            Self::Provider { .. } => ErrorKind::Provider,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::PartialFailure { .. } => ErrorKind::PartialFailure,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Store(_) => ErrorKind::Store,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Recorded(recorded) => recorded.kind,
        }
    }
}

/// Error category recorded on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Conflict,
    GatewayNotReady,
    Provider,
    NotFound,
    PartialFailure,
    Timeout,
    Cancelled,
    InvalidTransition,
    Store,
    Serialization,
}

/// Persisted description of the error that ended an attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionError {
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_kind: Option<ProviderErrorKind>,
    pub message: String,
    /// State the connection was in when the error surfaced
    pub failed_at: ConnectionState,
    /// Resources cleanup could not remove
    #[serde(default)]
    pub dangling: Vec<ResourceRef>,
    pub at: DateTime<Utc>,
}

impl ConnectionError {
    pub fn from_error(err: &InterconnectError, failed_at: ConnectionState) -> Self {
        if let InterconnectError::Recorded(recorded) = err {
            return recorded.clone();
        }
        let (provider, provider_kind) = match err {
            InterconnectError::Provider { provider, kind, .. } => (Some(*provider), Some(*kind)),
            _ => (None, None),
        };
        let dangling = match err {
            InterconnectError::PartialFailure { dangling } => dangling.clone(),
            _ => Vec::new(),
        };

        Self {
            kind: err.kind(),
            provider,
            provider_kind,
            message: err.to_string(),
            failed_at,
            dangling,
            at: Utc::now(),
        }
    }
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (at {})", self.message, self.failed_at)
    }
}
