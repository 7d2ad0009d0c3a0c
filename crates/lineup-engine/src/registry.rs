//! Channel → session registry.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use lineup_core::ids::{ChannelId, SessionId};
use lineup_core::snapshot::DraftSnapshot;

use crate::actor::SessionCommand;

/// Handle to a running session actor.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub channel_id: ChannelId,
    tx: mpsc::UnboundedSender<SessionCommand>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub(crate) fn new(
        session_id: SessionId,
        channel_id: ChannelId,
        tx: mpsc::UnboundedSender<SessionCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            channel_id,
            tx,
            cancel,
        }
    }

    pub(crate) fn send(&self, cmd: SessionCommand) -> bool {
        self.tx.send(cmd).is_ok()
    }

    /// Ask the actor for its current snapshot. `None` once it has stopped.
    pub async fn snapshot(&self) -> Option<DraftSnapshot> {
        let (tx, rx) = oneshot::channel();
        if !self.send(SessionCommand::Snapshot(tx)) {
            return None;
        }
        rx.await.ok()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// At most one active session per channel.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<ChannelId, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` unless its channel already has a session.
    /// On conflict the existing session id is returned.
    pub fn try_insert(&self, handle: SessionHandle) -> Result<(), SessionId> {
        match self.sessions.entry(handle.channel_id.clone()) {
            Entry::Occupied(existing) => Err(existing.get().session_id.clone()),
            Entry::Vacant(slot) => {
                let _ = slot.insert(handle);
                Ok(())
            }
        }
    }

    /// Remove the channel's entry only if it still belongs to `session_id`.
    pub fn remove(&self, channel_id: &ChannelId, session_id: &SessionId) -> bool {
        self.sessions
            .remove_if(channel_id, |_, h| &h.session_id == session_id)
            .is_some()
    }

    pub fn get(&self, channel_id: &ChannelId) -> Option<SessionHandle> {
        self.sessions.get(channel_id).map(|h| h.clone())
    }

    pub fn contains(&self, channel_id: &ChannelId) -> bool {
        self.sessions.contains_key(channel_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn channels(&self) -> Vec<ChannelId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn handles(&self) -> Vec<SessionHandle> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    pub fn cancel_all(&self) -> usize {
        let handles = self.handles();
        for handle in &handles {
            handle.cancel();
        }
        handles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn handle(channel: &str) -> (SessionHandle, mpsc::UnboundedReceiver<SessionCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let h = SessionHandle::new(
            SessionId::new(),
            ChannelId::from_raw(channel),
            tx,
            CancellationToken::new(),
        );
        (h, rx)
    }

    #[test]
    fn second_insert_for_channel_fails() {
        let reg = SessionRegistry::new();
        let (first, _rx1) = handle("c1");
        let (second, _rx2) = handle("c1");
        let first_id = first.session_id.clone();

        reg.try_insert(first).unwrap();
        assert_eq!(reg.try_insert(second).unwrap_err(), first_id);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn different_channels_coexist() {
        let reg = SessionRegistry::new();
        let (a, _ra) = handle("c1");
        let (b, _rb) = handle("c2");
        reg.try_insert(a).unwrap();
        reg.try_insert(b).unwrap();
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn remove_checks_session_id() {
        let reg = SessionRegistry::new();
        let (h, _rx) = handle("c1");
        let channel = h.channel_id.clone();
        let id = h.session_id.clone();
        reg.try_insert(h).unwrap();

        assert!(!reg.remove(&channel, &SessionId::new()));
        assert!(reg.contains(&channel));
        assert!(reg.remove(&channel, &id));
        assert!(reg.is_empty());
    }

    #[test]
    fn concurrent_inserts_admit_one() {
        let reg = Arc::new(SessionRegistry::new());
        let mut receivers = Vec::new();
        let mut threads = Vec::new();
        for _ in 0..16 {
            let (h, rx) = handle("c1");
            receivers.push(rx);
            let reg = Arc::clone(&reg);
            threads.push(std::thread::spawn(move || reg.try_insert(h).is_ok()));
        }
        let admitted = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }

    #[test]
    fn cancel_all_cancels_tokens() {
        let reg = SessionRegistry::new();
        let (h, _rx) = handle("c1");
        let token = h.cancel.clone();
        reg.try_insert(h).unwrap();
        assert_eq!(reg.cancel_all(), 1);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn snapshot_on_stopped_actor_is_none() {
        let (h, rx) = handle("c1");
        drop(rx);
        assert!(h.snapshot().await.is_none());
        assert!(h.is_closed());
    }
}
