use crate::entitlement::UpgradePrompt;

pub type StudioResult<T> = Result<T, StudioError>;

#[derive(thiserror::Error, Debug)]
pub enum StudioError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("request was blocked: {0}")]
    RemoteBlocked(String),

    #[error("no image returned: {0}")]
    RemoteEmpty(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("all variants failed: {0}")]
    CompositeFailure(String),

    #[error("upgrade required: {}", .0.title)]
    UpgradeRequired(UpgradePrompt),

    #[error("another edit is already in progress")]
    Busy,

    #[error("stale result: {0}")]
    Stale(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StudioError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn remote_blocked(msg: impl Into<String>) -> Self {
        Self::RemoteBlocked(msg.into())
    }

    pub fn remote_empty(msg: impl Into<String>) -> Self {
        Self::RemoteEmpty(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn composite_failure(msg: impl Into<String>) -> Self {
        Self::CompositeFailure(msg.into())
    }

    pub fn stale(msg: impl Into<String>) -> Self {
        Self::Stale(msg.into())
    }

    /// Errors produced by the remote collaborator (or its transport).
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::RemoteBlocked(_) | Self::RemoteEmpty(_) | Self::Network(_)
        )
    }

    /// Message suitable for the single visible error slot, without the category prefix.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(m)
            | Self::RemoteBlocked(m)
            | Self::RemoteEmpty(m)
            | Self::Network(m)
            | Self::CompositeFailure(m)
            | Self::Stale(m) => m.clone(),
            Self::UpgradeRequired(p) => p.message.clone(),
            Self::Busy => self.to_string(),
            Self::Other(e) => format!("{e:#}"),
        }
    }
}
