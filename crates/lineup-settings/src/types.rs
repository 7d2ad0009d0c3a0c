//! Settings type definitions.
//!
//! Field names are camelCase on the wire. Every section is `#[serde(default)]`
//! so a settings file only needs the values it changes.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use lineup_core::slots::{default_roster, SlotSpec};
use serde::{Deserialize, Serialize};

/// Root settings type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LineupSettings {
    /// Settings schema version.
    pub version: String,
    pub draft: DraftSettings,
    pub handoff: HandoffSettings,
    pub host: HostSettings,
    pub logging: LoggingSettings,
    pub store: StoreSettings,
}

impl Default for LineupSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            draft: DraftSettings::default(),
            handoff: HandoffSettings::default(),
            host: HostSettings::default(),
            logging: LoggingSettings::default(),
            store: StoreSettings::default(),
        }
    }
}

impl LineupSettings {
    /// Correct invalid values in place.
    ///
    /// Called automatically during loading. Bad values are replaced with a
    /// warning rather than rejected.
    pub fn validate(&mut self) {
        let draft = &mut self.draft;

        if draft.slots.is_empty() {
            tracing::warn!("draft.slots is empty, using the default roster");
            draft.slots = default_roster();
        }

        let mut tokens = HashSet::new();
        let mut labels = HashSet::new();
        let distinct = draft.slots.iter().all(|s| {
            tokens.insert(s.token.clone()) && labels.insert(s.label.to_ascii_uppercase())
        });
        if !distinct {
            tracing::warn!("draft.slots has duplicate tokens or labels, using the default roster");
            draft.slots = default_roster();
        }

        if draft.deadline_secs == 0 {
            tracing::warn!("draft.deadlineSecs must be positive, using 600");
            draft.deadline_secs = 600;
        }

        if draft.reminder_secs >= draft.deadline_secs {
            tracing::warn!(
                "draft.reminderSecs ({}) >= deadlineSecs ({}), reminder disabled",
                draft.reminder_secs,
                draft.deadline_secs
            );
            draft.reminder_secs = 0;
        }

        if self.handoff.window_secs == 0 {
            tracing::warn!("handoff.windowSecs must be positive, using 300");
            self.handoff.window_secs = 300;
        }
    }
}

/// Draft announcement and timing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DraftSettings {
    /// First line of the announcement.
    pub title: String,
    /// Ordered slots offered by every draft.
    pub slots: Vec<SlotSpec>,
    /// Append an `@here` line to the announcement and reminder.
    pub mention_here: bool,
    /// Settle window applied to each slot's first signal.
    pub settle_ms: u64,
    /// Reminder delay from session creation. `0` disables the reminder.
    pub reminder_secs: u64,
    /// Hard deadline from session creation.
    pub deadline_secs: u64,
}

impl Default for DraftSettings {
    fn default() -> Self {
        Self {
            title: "**PARMA FC 7v7 FRIENDLY \u{2014} react to claim a position**".to_string(),
            slots: default_roster(),
            mention_here: true,
            settle_ms: 3_000,
            reminder_secs: 60,
            deadline_secs: 600,
        }
    }
}

impl DraftSettings {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn reminder(&self) -> Option<Duration> {
        (self.reminder_secs > 0).then(|| Duration::from_secs(self.reminder_secs))
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

/// Post-fill link handoff.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HandoffSettings {
    /// How long to wait for the owner's link message.
    pub window_secs: u64,
    /// Regex a payload message must match; the first match is the link.
    pub link_pattern: String,
    /// Posted to the channel right after the final lineup.
    pub dispatch_notice: String,
}

impl Default for HandoffSettings {
    fn default() -> Self {
        Self {
            window_secs: 300,
            link_pattern: r"https?://\S+".to_string(),
            dispatch_notice: "\u{2705} Finding friendly, looking for a rob...".to_string(),
        }
    }
}

impl HandoffSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Who may open a draft, and with which command.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostSettings {
    pub command: String,
    pub allow_administrators: bool,
    pub allowed_roles: Vec<String>,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            command: "!hostfriendly".to_string(),
            allow_administrators: true,
            allowed_roles: vec!["Friendlies Department".to_string()],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace` .. `error`). `RUST_LOG` takes precedence.
    pub level: String,
    /// JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module overrides, e.g. `{"lineup_engine": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            modules: BTreeMap::new(),
        }
    }
}

/// Optional snapshot persistence.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: crate::loader::lineup_home().join("database").join("lineup.db"),
        }
    }
}
