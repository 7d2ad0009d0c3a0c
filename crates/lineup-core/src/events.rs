use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, MessageId, ParticipantId, SessionId};
use crate::slots::{Assignment, ClaimOutcome};

/// Session lifecycle state. No transition ever returns to `Collecting`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftState {
    Collecting,
    Filled,
    Expired,
    Closed,
}

impl DraftState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Expired | Self::Closed)
    }
}

impl std::fmt::Display for DraftState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Collecting => write!(f, "collecting"),
            Self::Filled => write!(f, "filled"),
            Self::Expired => write!(f, "expired"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for DraftState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collecting" => Ok(Self::Collecting),
            "filled" => Ok(Self::Filled),
            "expired" => Ok(Self::Expired),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown draft state: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    HandoffComplete,
    NoPayload,
    Expired,
    AnnouncementFailed,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HandoffComplete => "handoff_complete",
            Self::NoPayload => "no_payload",
            Self::Expired => "expired",
            Self::AnnouncementFailed => "announcement_failed",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Aggregate outcome of the post-fill link delivery.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffReport {
    pub delivered_count: usize,
    pub failed_participant_ids: Vec<ParticipantId>,
}

impl HandoffReport {
    pub fn all_delivered(&self) -> bool {
        self.failed_participant_ids.is_empty()
    }
}

/// Draft lifecycle events, published on the engine's broadcast channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DraftEvent {
    #[serde(rename = "session_opened")]
    SessionOpened {
        session_id: SessionId,
        channel_id: ChannelId,
        owner_id: ParticipantId,
        message_id: MessageId,
    },

    #[serde(rename = "slot_confirmed")]
    SlotConfirmed {
        session_id: SessionId,
        slot: usize,
        label: String,
        participant_id: ParticipantId,
    },

    /// A signal that lost or arrived in the wrong state. Never operator-visible.
    #[serde(rename = "signal_rejected")]
    SignalRejected {
        session_id: SessionId,
        slot_token: String,
        participant_id: ParticipantId,
        reason: ClaimOutcome,
    },

    #[serde(rename = "reminder")]
    Reminder {
        session_id: SessionId,
        open_slots: usize,
    },

    #[serde(rename = "draft_filled")]
    DraftFilled {
        session_id: SessionId,
        assignment: Vec<Assignment>,
    },

    #[serde(rename = "draft_expired")]
    DraftExpired {
        session_id: SessionId,
        claimed: usize,
    },

    #[serde(rename = "payload_received")]
    PayloadReceived { session_id: SessionId },

    #[serde(rename = "no_payload_received")]
    NoPayloadReceived { session_id: SessionId },

    #[serde(rename = "handoff_reported")]
    HandoffReported {
        session_id: SessionId,
        report: HandoffReport,
    },

    #[serde(rename = "session_closed")]
    SessionClosed {
        session_id: SessionId,
        reason: CloseReason,
    },
}

impl DraftEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::SessionOpened { session_id, .. }
            | Self::SlotConfirmed { session_id, .. }
            | Self::SignalRejected { session_id, .. }
            | Self::Reminder { session_id, .. }
            | Self::DraftFilled { session_id, .. }
            | Self::DraftExpired { session_id, .. }
            | Self::PayloadReceived { session_id }
            | Self::NoPayloadReceived { session_id }
            | Self::HandoffReported { session_id, .. }
            | Self::SessionClosed { session_id, .. } => session_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionOpened { .. } => "session_opened",
            Self::SlotConfirmed { .. } => "slot_confirmed",
            Self::SignalRejected { .. } => "signal_rejected",
            Self::Reminder { .. } => "reminder",
            Self::DraftFilled { .. } => "draft_filled",
            Self::DraftExpired { .. } => "draft_expired",
            Self::PayloadReceived { .. } => "payload_received",
            Self::NoPayloadReceived { .. } => "no_payload_received",
            Self::HandoffReported { .. } => "handoff_reported",
            Self::SessionClosed { .. } => "session_closed",
        }
    }
}
