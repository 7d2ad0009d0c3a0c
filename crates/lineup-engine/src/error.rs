use lineup_core::errors::GatewayError;
use lineup_core::ids::{ChannelId, ParticipantId, SessionId};
use lineup_store::StoreError;

/// Errors surfaced by [`crate::DraftEngine`] to its caller.
///
/// Claim rejections are never errors; they are reported through
/// `ClaimOutcome` and `DraftEvent::SignalRejected`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("channel {channel_id} already has an active draft ({existing})")]
    DuplicateSessionInChannel {
        channel_id: ChannelId,
        existing: SessionId,
    },

    #[error("{0} is not allowed to host")]
    NotPermitted(ParticipantId),

    #[error("no active draft in channel {0}")]
    NoActiveSession(ChannelId),

    #[error("invalid link pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::DuplicateSessionInChannel { .. } => "duplicate_session",
            Self::NotPermitted(_) => "not_permitted",
            Self::NoActiveSession(_) => "no_active_session",
            Self::InvalidPattern(_) => "invalid_pattern",
            Self::Gateway(e) => e.error_kind(),
            Self::Store(_) => "store",
        }
    }
}
