use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::DraftState;
use crate::ids::{ChannelId, ParticipantId, SessionId};
use crate::slots::Slot;

/// Point-in-time copy of a draft session, for queries and persistence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DraftSnapshot {
    pub session_id: SessionId,
    pub channel_id: ChannelId,
    pub owner_id: ParticipantId,
    pub state: DraftState,
    pub slots: Vec<Slot>,
    pub created_at: DateTime<Utc>,
}

impl DraftSnapshot {
    pub fn claimed_count(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_open()).count()
    }

    pub fn holder_of(&self, label: &str) -> Option<&ParticipantId> {
        self.slots
            .iter()
            .find(|s| s.label.eq_ignore_ascii_case(label))
            .and_then(Slot::claimant)
    }
}
