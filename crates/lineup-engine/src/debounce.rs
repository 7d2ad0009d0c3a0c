//! Signal debouncer: turns a burst of raw signals into one decision per slot.
//!
//! The first accepted signal for an open slot arms a fixed settle window.
//! Signals for the same slot that arrive during the window queue behind it as
//! contenders. When the window elapses the chronologically earliest signal
//! (by `observed_at`, then arrival order) is committed; the rest lose with
//! `SlotTaken`. Only the leader of a window (its earliest signal so far) or a
//! holder counts as having a claim: a contender who signals another slot is
//! withdrawn from the old window and moves to the new one.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use lineup_core::ids::ParticipantId;
use lineup_core::slots::{ClaimOutcome, SlotTable};

use crate::gateway::RawSignal;

/// In-flight claim held during a settle window. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingClaim {
    pub slot: usize,
    pub slot_token: String,
    pub participant_id: ParticipantId,
    pub detected_at: DateTime<Utc>,
    seq: u64,
}

/// Identifies one settle window. A ticket that no longer matches the pending
/// entry for its slot is stale and resolves to nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SettleTicket {
    pub slot: usize,
    pub ticket: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Observation {
    /// First signal for an open slot. The caller must schedule the ticket
    /// after the settle delay. `withdrawn` is the participant's earlier
    /// contender signal on another slot, if any.
    Armed {
        ticket: SettleTicket,
        withdrawn: Option<PendingClaim>,
    },
    /// Joined a running settle window as a contender.
    Queued { withdrawn: Option<PendingClaim> },
    /// Replay of a signal already pending or committed for the same pair.
    Duplicate,
    /// Token does not name a slot of this draft.
    Ignored,
    /// Refused without a settle window; the signal should be retracted.
    Rejected(ClaimOutcome),
}

/// What happened when a settle window closed.
#[derive(Clone, Debug)]
pub struct Resolution {
    pub slot: usize,
    pub winner: PendingClaim,
    pub outcome: ClaimOutcome,
    /// Earlier candidates skipped because they already hold another slot.
    pub passed_over: Vec<PendingClaim>,
    /// Contenders that queued behind the winner, earliest first.
    pub contenders: Vec<PendingClaim>,
}

struct PendingSlot {
    ticket: u64,
    candidates: Vec<PendingClaim>,
}

impl PendingSlot {
    fn leader(&self) -> Option<&PendingClaim> {
        self.candidates.iter().min_by_key(|c| (c.detected_at, c.seq))
    }
}

pub struct SignalDebouncer {
    settle: Duration,
    pending: HashMap<usize, PendingSlot>,
    next_ticket: u64,
    next_seq: u64,
}

impl SignalDebouncer {
    pub fn new(settle: Duration) -> Self {
        Self {
            settle,
            pending: HashMap::new(),
            next_ticket: 0,
            next_seq: 0,
        }
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle
    }

    /// Classify an incoming signal against the table and the open windows.
    pub fn observe(&mut self, table: &SlotTable, signal: &RawSignal) -> Observation {
        if table.is_sealed() {
            return Observation::Rejected(ClaimOutcome::DraftNotCollecting);
        }
        let Some(slot) = table.index_of_token(&signal.slot_token) else {
            return Observation::Ignored;
        };
        let participant = &signal.participant_id;

        if let Some(held) = table.holder_of(participant) {
            return if held == slot {
                Observation::Duplicate
            } else {
                Observation::Rejected(ClaimOutcome::ParticipantAlreadyHolds)
            };
        }
        if table.get(slot).is_some_and(|s| !s.is_open()) {
            return Observation::Rejected(ClaimOutcome::SlotTaken);
        }
        if let Some(pending_slot) = self.pending_slot_of(participant) {
            if pending_slot == slot {
                return Observation::Duplicate;
            }
            if self.leading_slot_of(participant).is_some() {
                return Observation::Rejected(ClaimOutcome::ParticipantAlreadyHolds);
            }
        }
        let withdrawn = self.withdraw(participant);

        let claim = PendingClaim {
            slot,
            slot_token: signal.slot_token.clone(),
            participant_id: participant.clone(),
            detected_at: signal.observed_at,
            seq: self.next_seq,
        };
        self.next_seq += 1;

        if let Some(entry) = self.pending.get_mut(&slot) {
            entry.candidates.push(claim);
            return Observation::Queued { withdrawn };
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.pending.insert(
            slot,
            PendingSlot {
                ticket,
                candidates: vec![claim],
            },
        );
        Observation::Armed {
            ticket: SettleTicket { slot, ticket },
            withdrawn,
        }
    }

    /// Close the settle window named by `ticket` and commit its winner.
    /// A candidate that already holds another slot is passed over for the
    /// next one. Returns `None` for a stale ticket.
    pub fn resolve(
        &mut self,
        table: &mut SlotTable,
        ticket: SettleTicket,
        now: DateTime<Utc>,
    ) -> Option<Resolution> {
        if self.pending.get(&ticket.slot)?.ticket != ticket.ticket {
            return None;
        }
        let mut candidates = self.pending.remove(&ticket.slot)?.candidates;
        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by_key(|c| (c.detected_at, c.seq));

        let mut passed_over = Vec::new();
        let mut winner = candidates.remove(0);
        let mut outcome = table.try_claim(ticket.slot, &winner.participant_id, now);
        while outcome == ClaimOutcome::ParticipantAlreadyHolds && !candidates.is_empty() {
            passed_over.push(winner);
            winner = candidates.remove(0);
            outcome = table.try_claim(ticket.slot, &winner.participant_id, now);
        }

        Some(Resolution {
            slot: ticket.slot,
            winner,
            outcome,
            passed_over,
            contenders: candidates,
        })
    }

    /// Slot whose window the participant has joined, leading or not.
    pub fn pending_slot_of(&self, participant: &ParticipantId) -> Option<usize> {
        self.pending
            .iter()
            .find(|(_, entry)| entry.candidates.iter().any(|c| &c.participant_id == participant))
            .map(|(slot, _)| *slot)
    }

    /// Slot whose window the participant currently leads.
    pub fn leading_slot_of(&self, participant: &ParticipantId) -> Option<usize> {
        self.pending
            .iter()
            .find(|(_, entry)| entry.leader().is_some_and(|c| &c.participant_id == participant))
            .map(|(slot, _)| *slot)
    }

    fn withdraw(&mut self, participant: &ParticipantId) -> Option<PendingClaim> {
        self.pending.values_mut().find_map(|entry| {
            let at = entry
                .candidates
                .iter()
                .position(|c| &c.participant_id == participant)?;
            Some(entry.candidates.remove(at))
        })
    }

    pub fn is_pending(&self, slot: usize) -> bool {
        self.pending.contains_key(&slot)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().map(|e| e.candidates.len()).sum()
    }

    /// Drop every open window. Their tickets become stale.
    pub fn clear(&mut self) -> Vec<PendingClaim> {
        self.pending
            .drain()
            .flat_map(|(_, entry)| entry.candidates)
            .collect()
    }
}
