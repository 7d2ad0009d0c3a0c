use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ParticipantId;

/// Static description of one slot: the signal token participants react with
/// and the human label shown in the lineup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSpec {
    pub token: String,
    pub label: String,
}

impl SlotSpec {
    pub fn new(token: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            label: label.into(),
        }
    }
}

/// The seven-a-side roster: keycap tokens 1 through 7.
pub fn default_roster() -> Vec<SlotSpec> {
    [
        ("1\u{fe0f}\u{20e3}", "GK"),
        ("2\u{fe0f}\u{20e3}", "CB"),
        ("3\u{fe0f}\u{20e3}", "CB2"),
        ("4\u{fe0f}\u{20e3}", "CM"),
        ("5\u{fe0f}\u{20e3}", "LW"),
        ("6\u{fe0f}\u{20e3}", "RW"),
        ("7\u{fe0f}\u{20e3}", "ST"),
    ]
    .into_iter()
    .map(|(token, label)| SlotSpec::new(token, label))
    .collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub index: usize,
    pub token: String,
    pub label: String,
    claimant: Option<ParticipantId>,
    claimed_at: Option<DateTime<Utc>>,
}

impl Slot {
    pub fn claimant(&self) -> Option<&ParticipantId> {
        self.claimant.as_ref()
    }

    pub fn claimed_at(&self) -> Option<DateTime<Utc>> {
        self.claimed_at
    }

    pub fn is_open(&self) -> bool {
        self.claimant.is_none()
    }
}

/// Result of [`SlotTable::try_claim`]. Everything except `Committed` is an
/// expected, recoverable rejection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOutcome {
    Committed,
    SlotTaken,
    ParticipantAlreadyHolds,
    DraftNotCollecting,
    UnknownSlot,
}

impl ClaimOutcome {
    pub fn is_committed(self) -> bool {
        self == Self::Committed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::SlotTaken => "slot_taken",
            Self::ParticipantAlreadyHolds => "participant_already_holds",
            Self::DraftNotCollecting => "draft_not_collecting",
            Self::UnknownSlot => "unknown_slot",
        }
    }
}

impl std::fmt::Display for ClaimOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One committed `(slot, participant)` pair of a filled draft.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub index: usize,
    pub token: String,
    pub label: String,
    pub participant_id: ParticipantId,
}

/// Fixed, ordered set of slots for one draft session.
///
/// Cardinality is fixed at construction. A slot's claimant is written at most
/// once and a participant holds at most one slot. Once sealed (the session
/// left `Collecting`) every claim is refused with `DraftNotCollecting`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SlotTable {
    slots: Vec<Slot>,
    sealed: bool,
}

impl SlotTable {
    pub fn new(specs: &[SlotSpec]) -> Self {
        let slots = specs
            .iter()
            .enumerate()
            .map(|(index, spec)| Slot {
                index,
                token: spec.token.clone(),
                label: spec.label.clone(),
                claimant: None,
                claimed_at: None,
            })
            .collect();
        Self {
            slots,
            sealed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn get(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    pub fn index_of_token(&self, token: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.token == token)
    }

    /// Case-insensitive lookup by label ("gk" finds "GK").
    pub fn index_of_label(&self, label: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.label.eq_ignore_ascii_case(label))
    }

    /// Index of the slot held by `participant`, if any.
    pub fn holder_of(&self, participant: &ParticipantId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.claimant.as_ref() == Some(participant))
    }

    /// The only mutation path for claimants.
    pub fn try_claim(
        &mut self,
        index: usize,
        participant: &ParticipantId,
        at: DateTime<Utc>,
    ) -> ClaimOutcome {
        if self.sealed {
            return ClaimOutcome::DraftNotCollecting;
        }
        let Some(slot) = self.slots.get(index) else {
            return ClaimOutcome::UnknownSlot;
        };
        if slot.claimant.is_some() {
            return ClaimOutcome::SlotTaken;
        }
        if self.holder_of(participant).is_some() {
            return ClaimOutcome::ParticipantAlreadyHolds;
        }

        let slot = &mut self.slots[index];
        slot.claimant = Some(participant.clone());
        slot.claimed_at = Some(at);
        ClaimOutcome::Committed
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(|s| s.claimant.is_some())
    }

    pub fn claimed_count(&self) -> usize {
        self.slots.iter().filter(|s| s.claimant.is_some()).count()
    }

    pub fn open_count(&self) -> usize {
        self.len() - self.claimed_count()
    }

    pub fn open_tokens(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|s| s.is_open())
            .map(|s| s.token.clone())
            .collect()
    }

    /// Stop accepting claims. Irreversible.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Committed pairs in slot order.
    pub fn assignment(&self) -> Vec<Assignment> {
        self.slots
            .iter()
            .filter_map(|s| {
                s.claimant.as_ref().map(|p| Assignment {
                    index: s.index,
                    token: s.token.clone(),
                    label: s.label.clone(),
                    participant_id: p.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::from_raw(s)
    }

    fn table() -> SlotTable {
        SlotTable::new(&default_roster())
    }

    #[test]
    fn default_roster_has_seven_positions() {
        let roster = default_roster();
        assert_eq!(roster.len(), 7);
        assert_eq!(roster[0].label, "GK");
        assert_eq!(roster[6].label, "ST");
        assert_eq!(roster[2].token, "3\u{fe0f}\u{20e3}");
    }

    #[test]
    fn claim_commits_once() {
        let mut t = table();
        let now = Utc::now();
        assert_eq!(t.try_claim(0, &pid("a"), now), ClaimOutcome::Committed);
        assert_eq!(t.get(0).unwrap().claimant(), Some(&pid("a")));
        assert_eq!(t.get(0).unwrap().claimed_at(), Some(now));
    }

    #[test]
    fn committed_slot_is_never_overwritten() {
        let mut t = table();
        assert!(t.try_claim(3, &pid("a"), Utc::now()).is_committed());
        assert_eq!(t.try_claim(3, &pid("b"), Utc::now()), ClaimOutcome::SlotTaken);
        // Re-invocation by the holder is SlotTaken too, not a second commit.
        assert_eq!(t.try_claim(3, &pid("a"), Utc::now()), ClaimOutcome::SlotTaken);
        assert_eq!(t.get(3).unwrap().claimant(), Some(&pid("a")));
    }

    #[test]
    fn participant_holds_at_most_one_slot() {
        let mut t = table();
        assert!(t.try_claim(0, &pid("a"), Utc::now()).is_committed());
        assert_eq!(
            t.try_claim(1, &pid("a"), Utc::now()),
            ClaimOutcome::ParticipantAlreadyHolds
        );
        assert!(t.get(1).unwrap().is_open());
        assert_eq!(t.holder_of(&pid("a")), Some(0));
    }

    #[test]
    fn sealed_table_refuses_claims() {
        let mut t = table();
        t.seal();
        assert_eq!(
            t.try_claim(0, &pid("a"), Utc::now()),
            ClaimOutcome::DraftNotCollecting
        );
        assert_eq!(t.claimed_count(), 0);
    }

    #[test]
    fn out_of_range_index_is_unknown() {
        let mut t = table();
        assert_eq!(t.try_claim(7, &pid("a"), Utc::now()), ClaimOutcome::UnknownSlot);
    }

    #[test]
    fn full_iff_every_slot_claimed() {
        let mut t = table();
        for i in 0..6 {
            assert!(t.try_claim(i, &pid(&format!("p{i}")), Utc::now()).is_committed());
            assert!(!t.is_full());
        }
        assert_eq!(t.open_count(), 1);
        assert!(t.try_claim(6, &pid("p6"), Utc::now()).is_committed());
        assert!(t.is_full());
        assert!(t.open_tokens().is_empty());
    }

    #[test]
    fn lookups_by_token_and_label() {
        let t = table();
        assert_eq!(t.index_of_token("4\u{fe0f}\u{20e3}"), Some(3));
        assert_eq!(t.index_of_token("\u{2705}"), None);
        assert_eq!(t.index_of_label("cb2"), Some(2));
        assert_eq!(t.index_of_label("CDM"), None);
    }

    #[test]
    fn assignment_is_in_slot_order() {
        let mut t = table();
        t.try_claim(5, &pid("x"), Utc::now());
        t.try_claim(1, &pid("y"), Utc::now());
        let a = t.assignment();
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].label, "CB");
        assert_eq!(a[0].participant_id, pid("y"));
        assert_eq!(a[1].label, "RW");
    }
}
