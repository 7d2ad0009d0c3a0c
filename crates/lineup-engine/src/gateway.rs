//! Boundary to the chat service.
//!
//! The engine only talks to the outside world through [`Gateway`]. Signals
//! flow the other way: the gateway pushes them into a [`SignalSink`] it was
//! handed at subscription time. The core never polls.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use lineup_core::errors::GatewayError;
use lineup_core::ids::{ChannelId, MessageId, ParticipantId};

use crate::actor::SessionCommand;
use crate::handoff::PayloadMatcher;

/// Invitation posted when a draft opens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Announcement {
    pub content: String,
    /// Tokens of slots still open, in slot order. The gateway seeds one
    /// reaction per token so participants can click to signal.
    pub open_tokens: Vec<String>,
}

/// A raw claim-intent signal as observed by the chat service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawSignal {
    pub slot_token: String,
    pub participant_id: ParticipantId,
    pub observed_at: DateTime<Utc>,
}

impl RawSignal {
    pub fn new(slot_token: impl Into<String>, participant_id: ParticipantId) -> Self {
        Self {
            slot_token: slot_token.into(),
            participant_id,
            observed_at: Utc::now(),
        }
    }

    pub fn at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = observed_at;
        self
    }
}

/// Push side of a signal subscription. Cheap to clone.
#[derive(Clone)]
pub struct SignalSink {
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SignalSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<SessionCommand>) -> Self {
        Self { tx }
    }

    /// Hand a signal to the session. Returns `false` once the session is gone.
    pub fn deliver(&self, signal: RawSignal) -> bool {
        self.tx.send(SessionCommand::Signal(signal)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Handle for an active signal subscription. Cancelled when dropped; gateway
/// implementations stop delivering once [`Subscription::token`] fires.
#[derive(Debug)]
pub struct Subscription {
    token: CancellationToken,
}

impl Subscription {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Operations the engine needs from the chat service.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Post the slot-list invitation and return its message id.
    async fn post_announcement(
        &self,
        channel_id: &ChannelId,
        announcement: &Announcement,
    ) -> Result<MessageId, GatewayError>;

    /// Start delivering claim-intent signals for `message_id` into `sink`.
    async fn subscribe_signals(
        &self,
        message_id: &MessageId,
        sink: SignalSink,
    ) -> Result<Subscription, GatewayError>;

    /// Undo or hide a rejected signal.
    async fn retract_signal(
        &self,
        message_id: &MessageId,
        slot_token: &str,
        participant_id: &ParticipantId,
    ) -> Result<(), GatewayError>;

    /// Post a plain message to the channel.
    async fn post_update(&self, channel_id: &ChannelId, content: &str) -> Result<(), GatewayError>;

    /// Wait up to `window` for a message from `owner_id` in `channel_id`
    /// that satisfies `matcher`. `Ok(None)` means the window elapsed.
    async fn await_owner_message(
        &self,
        channel_id: &ChannelId,
        owner_id: &ParticipantId,
        matcher: &PayloadMatcher,
        window: Duration,
    ) -> Result<Option<String>, GatewayError>;

    /// Send a direct message. One call per participant; failures are final.
    async fn send_direct(
        &self,
        participant_id: &ParticipantId,
        content: &str,
    ) -> Result<(), GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_reports_closed_session() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = SignalSink::new(tx);
        assert!(sink.deliver(RawSignal::new("1", ParticipantId::from_raw("a"))));
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.deliver(RawSignal::new("1", ParticipantId::from_raw("a"))));
    }

    #[test]
    fn dropping_subscription_cancels_token() {
        let token = CancellationToken::new();
        let sub = Subscription::new(token.clone());
        assert!(!sub.is_cancelled());
        drop(sub);
        assert!(token.is_cancelled());
    }
}
