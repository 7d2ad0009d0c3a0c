//! Draft session state machine.
//!
//! `Collecting -> Filled -> Closed` on the happy path and
//! `Collecting -> Expired -> Closed` when the deadline wins. Every timer and
//! settle window is tagged with the generation it was armed under; leaving
//! `Collecting` bumps the generation so anything still in flight is inert.

use chrono::{DateTime, Utc};

use lineup_core::events::{CloseReason, DraftState};
use lineup_core::ids::{ChannelId, ParticipantId, SessionId};
use lineup_core::slots::{Assignment, ClaimOutcome, SlotSpec, SlotTable};
use lineup_core::snapshot::DraftSnapshot;

use crate::debounce::{Observation, Resolution, SettleTicket, SignalDebouncer};
use crate::gateway::RawSignal;

pub struct DraftSession {
    pub id: SessionId,
    pub channel_id: ChannelId,
    pub owner_id: ParticipantId,
    pub created_at: DateTime<Utc>,
    table: SlotTable,
    debouncer: SignalDebouncer,
    state: DraftState,
    close_reason: Option<CloseReason>,
    generation: u64,
    reminded: bool,
}

impl DraftSession {
    pub fn new(
        channel_id: ChannelId,
        owner_id: ParticipantId,
        slots: &[SlotSpec],
        debouncer: SignalDebouncer,
    ) -> Self {
        Self {
            id: SessionId::new(),
            channel_id,
            owner_id,
            created_at: Utc::now(),
            table: SlotTable::new(slots),
            debouncer,
            state: DraftState::Collecting,
            close_reason: None,
            generation: 0,
            reminded: false,
        }
    }

    pub fn state(&self) -> DraftState {
        self.state
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn table(&self) -> &SlotTable {
        &self.table
    }

    pub fn observe(&mut self, signal: &RawSignal) -> Observation {
        if self.state != DraftState::Collecting {
            return Observation::Rejected(ClaimOutcome::DraftNotCollecting);
        }
        self.debouncer.observe(&self.table, signal)
    }

    pub fn settle(&mut self, ticket: SettleTicket, now: DateTime<Utc>) -> Option<Resolution> {
        if self.state != DraftState::Collecting {
            return None;
        }
        self.debouncer.resolve(&mut self.table, ticket, now)
    }

    /// Claim a slot by label on the owner's behalf, bypassing the settle
    /// window but not the table's checks.
    pub fn pre_claim(
        &mut self,
        label: &str,
        participant: &ParticipantId,
        now: DateTime<Utc>,
    ) -> Option<(usize, ClaimOutcome)> {
        let index = self.table.index_of_label(label)?;
        Some((index, self.table.try_claim(index, participant, now)))
    }

    /// Move to `Filled` once every slot is claimed. Returns the final
    /// assignment exactly once.
    pub fn check_filled(&mut self) -> Option<Vec<Assignment>> {
        if self.state != DraftState::Collecting || !self.table.is_full() {
            return None;
        }
        self.state = DraftState::Filled;
        self.table.seal();
        self.generation += 1;
        self.debouncer.clear();
        Some(self.table.assignment())
    }

    /// Returns the open slot count if the reminder should fire now.
    pub fn on_reminder(&mut self, generation: u64) -> Option<usize> {
        if generation != self.generation
            || self.state != DraftState::Collecting
            || self.reminded
        {
            return None;
        }
        self.reminded = true;
        Some(self.table.open_count())
    }

    /// Returns the claimed count if the deadline expired the draft.
    pub fn on_deadline(&mut self, generation: u64) -> Option<usize> {
        if generation != self.generation || self.state != DraftState::Collecting {
            return None;
        }
        self.state = DraftState::Expired;
        self.table.seal();
        self.generation += 1;
        self.debouncer.clear();
        Some(self.table.claimed_count())
    }

    /// Enter `Closed`. Returns `false` if already closed.
    pub fn close(&mut self, reason: CloseReason) -> bool {
        if self.state == DraftState::Closed {
            return false;
        }
        self.state = DraftState::Closed;
        self.close_reason = Some(reason);
        self.table.seal();
        self.generation += 1;
        self.debouncer.clear();
        true
    }

    pub fn snapshot(&self) -> DraftSnapshot {
        DraftSnapshot {
            session_id: self.id.clone(),
            channel_id: self.channel_id.clone(),
            owner_id: self.owner_id.clone(),
            state: self.state,
            slots: self.table.slots().to_vec(),
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use lineup_core::slots::default_roster;

    fn session() -> DraftSession {
        DraftSession::new(
            ChannelId::from_raw("c1"),
            ParticipantId::from_raw("owner"),
            &default_roster(),
            SignalDebouncer::new(Duration::from_secs(3)),
        )
    }

    fn commit(s: &mut DraftSession, token: &str, who: &str) {
        let Observation::Armed { ticket, .. } =
            s.observe(&RawSignal::new(token, ParticipantId::from_raw(who)))
        else {
            panic!("signal was not armed");
        };
        let res = s.settle(ticket, Utc::now()).unwrap();
        assert!(res.outcome.is_committed());
    }

    fn fill(s: &mut DraftSession) {
        let tokens: Vec<String> = s.table().slots().iter().map(|x| x.token.clone()).collect();
        for (i, token) in tokens.iter().enumerate() {
            commit(s, token, &format!("p{i}"));
        }
    }

    #[test]
    fn fills_exactly_once() {
        let mut s = session();
        fill(&mut s);
        let assignment = s.check_filled().unwrap();
        assert_eq!(assignment.len(), 7);
        assert_eq!(s.state(), DraftState::Filled);
        assert!(s.check_filled().is_none());
    }

    #[test]
    fn not_filled_until_every_slot_claimed() {
        let mut s = session();
        commit(&mut s, "1\u{fe0f}\u{20e3}", "a");
        assert!(s.check_filled().is_none());
        assert_eq!(s.state(), DraftState::Collecting);
    }

    #[test]
    fn reminder_fires_once() {
        let mut s = session();
        let gen = s.generation();
        assert_eq!(s.on_reminder(gen), Some(7));
        assert_eq!(s.on_reminder(gen), None);
    }

    #[test]
    fn timers_from_old_generation_are_inert() {
        let mut s = session();
        let gen = s.generation();
        fill(&mut s);
        s.check_filled().unwrap();
        assert_eq!(s.on_reminder(gen), None);
        assert_eq!(s.on_deadline(gen), None);
        assert_eq!(s.state(), DraftState::Filled);
    }

    #[test]
    fn deadline_expires_and_rejects_later_signals() {
        let mut s = session();
        commit(&mut s, "1\u{fe0f}\u{20e3}", "a");
        let gen = s.generation();
        assert_eq!(s.on_deadline(gen), Some(1));
        assert_eq!(s.state(), DraftState::Expired);
        assert_eq!(
            s.observe(&RawSignal::new("2\u{fe0f}\u{20e3}", ParticipantId::from_raw("b"))),
            Observation::Rejected(ClaimOutcome::DraftNotCollecting)
        );
    }

    #[test]
    fn deadline_discards_pending_window() {
        let mut s = session();
        let Observation::Armed { ticket, .. } =
            s.observe(&RawSignal::new("1\u{fe0f}\u{20e3}", ParticipantId::from_raw("a")))
        else {
            panic!("signal was not armed");
        };
        s.on_deadline(s.generation()).unwrap();
        assert!(s.settle(ticket, Utc::now()).is_none());
        assert_eq!(s.table().claimed_count(), 0);
    }

    #[test]
    fn pre_claim_uses_label() {
        let mut s = session();
        let owner = ParticipantId::from_raw("owner");
        assert_eq!(
            s.pre_claim("st", &owner, Utc::now()),
            Some((6, ClaimOutcome::Committed))
        );
        assert_eq!(s.pre_claim("XX", &owner, Utc::now()), None);
        assert_eq!(
            s.observe(&RawSignal::new("7\u{fe0f}\u{20e3}", ParticipantId::from_raw("b"))),
            Observation::Rejected(ClaimOutcome::SlotTaken)
        );
    }

    #[test]
    fn close_is_idempotent() {
        let mut s = session();
        assert!(s.close(CloseReason::Shutdown));
        assert!(!s.close(CloseReason::Expired));
        assert_eq!(s.close_reason(), Some(CloseReason::Shutdown));
        assert_eq!(s.snapshot().state, DraftState::Closed);
    }
}
