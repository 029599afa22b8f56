use shared::domain::MemberId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("transport unavailable: `{event}` not sent")]
    TransportUnavailable { event: &'static str },
    #[error("{method} {path} failed: {reason}")]
    RequestFailed {
        method: String,
        path: String,
        reason: String,
        timed_out: bool,
    },
    #[error("malformed `{event}` event: {reason}")]
    MalformedEvent { event: String, reason: String },
    #[error("no joined session")]
    NoSession,
    #[error("no active conversation")]
    NoActiveConversation,
    #[error("member {0} is not in the roster")]
    UnknownMember(MemberId),
}

impl EngineError {
    pub fn request_failed(
        method: impl Into<String>,
        path: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::RequestFailed {
            method: method.into(),
            path: path.into(),
            reason: reason.to_string(),
            timed_out: false,
        }
    }

    /// Transport and request failures clear up on reconnect or retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportUnavailable { .. } | Self::RequestFailed { .. }
        )
    }
}
