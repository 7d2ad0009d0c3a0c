use chrono::{DateTime, Utc};
use tracing::instrument;

use lineup_core::events::DraftState;
use lineup_core::ids::{ChannelId, ParticipantId, SessionId};
use lineup_core::snapshot::DraftSnapshot;

use crate::database::Database;
use crate::error::StoreError;

/// Close reason recorded for sessions found open by a later process.
pub const ABANDONED: &str = "abandoned";

/// Best-effort persistence of draft snapshots. Nothing is ever restored from
/// here; it only makes sessions lost to a restart visible.
#[derive(Clone)]
pub struct SnapshotRepo {
    db: Database,
}

impl SnapshotRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace the snapshot for its session.
    #[instrument(skip_all, fields(session_id = %snapshot.session_id, state = %snapshot.state))]
    pub fn save(&self, snapshot: &DraftSnapshot) -> Result<(), StoreError> {
        let slots = serde_json::to_string(&snapshot.slots)?;
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO draft_snapshots
                     (session_id, channel_id, owner_id, state, slots, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(session_id) DO UPDATE SET
                     state = excluded.state,
                     slots = excluded.slots,
                     updated_at = excluded.updated_at",
                rusqlite::params![
                    snapshot.session_id.as_str(),
                    snapshot.channel_id.as_str(),
                    snapshot.owner_id.as_str(),
                    snapshot.state.to_string(),
                    slots,
                    snapshot.created_at.to_rfc3339(),
                    now,
                ],
            )?;
            Ok(())
        })
    }

    /// Mark a session closed with a reason.
    pub fn close(&self, session_id: &SessionId, reason: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE draft_snapshots SET state = 'closed', close_reason = ?2, updated_at = ?3
                 WHERE session_id = ?1",
                rusqlite::params![session_id.as_str(), reason, now],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("snapshot {session_id}")));
        }
        Ok(())
    }

    pub fn get(&self, session_id: &SessionId) -> Result<DraftSnapshot, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, channel_id, owner_id, state, slots, created_at
                 FROM draft_snapshots WHERE session_id = ?1",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_snapshot(row),
                None => Err(StoreError::NotFound(format!("snapshot {session_id}"))),
            }
        })
    }

    pub fn close_reason(&self, session_id: &SessionId) -> Result<Option<String>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT close_reason FROM draft_snapshots WHERE session_id = ?1",
                [session_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("snapshot {session_id}"))
                }
                other => other.into(),
            })
        })
    }

    /// Snapshots still collecting or awaiting handoff, oldest first.
    pub fn list_unfinished(&self) -> Result<Vec<DraftSnapshot>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, channel_id, owner_id, state, slots, created_at
                 FROM draft_snapshots
                 WHERE state IN ('collecting', 'filled')
                 ORDER BY created_at ASC",
            )?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_snapshot(row)?);
            }
            Ok(out)
        })
    }

    /// Close every unfinished snapshot as abandoned and return them.
    /// Used at startup: in-flight sessions do not survive a restart.
    pub fn abandon_unfinished(&self) -> Result<Vec<DraftSnapshot>, StoreError> {
        let open = self.list_unfinished()?;
        for snapshot in &open {
            self.close(&snapshot.session_id, ABANDONED)?;
        }
        Ok(open)
    }
}

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> Result<DraftSnapshot, StoreError> {
    let session_id: String = row.get(0)?;
    let channel_id: String = row.get(1)?;
    let owner_id: String = row.get(2)?;
    let state: String = row.get(3)?;
    let slots: String = row.get(4)?;
    let created_at: String = row.get(5)?;

    Ok(DraftSnapshot {
        session_id: SessionId::from_raw(session_id),
        channel_id: ChannelId::from_raw(channel_id),
        owner_id: ParticipantId::from_raw(owner_id),
        state: state.parse::<DraftState>().map_err(StoreError::Serialization)?,
        slots: serde_json::from_str(&slots)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| StoreError::Serialization(e.to_string()))?
            .with_timezone(&Utc),
    })
}
