//! In-memory gateway for tests and local runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use lineup_core::errors::GatewayError;
use lineup_core::ids::{ChannelId, MessageId, ParticipantId};

use crate::gateway::{Announcement, Gateway, RawSignal, SignalSink, Subscription};
use crate::handoff::PayloadMatcher;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayCall {
    Announce {
        channel_id: ChannelId,
        message_id: MessageId,
        content: String,
        open_tokens: Vec<String>,
    },
    Subscribe {
        message_id: MessageId,
    },
    Retract {
        message_id: MessageId,
        slot_token: String,
        participant_id: ParticipantId,
    },
    Update {
        channel_id: ChannelId,
        content: String,
    },
    AwaitOwner {
        channel_id: ChannelId,
        owner_id: ParticipantId,
    },
    Direct {
        participant_id: ParticipantId,
        content: String,
    },
}

/// Records every call and lets tests push signals into live subscriptions.
#[derive(Default)]
pub struct MockGateway {
    calls: Mutex<Vec<GatewayCall>>,
    sinks: Mutex<HashMap<MessageId, (SignalSink, CancellationToken)>>,
    next_message: AtomicU64,
    owner_reply: Mutex<Option<(Duration, String)>>,
    failing_directs: Mutex<HashSet<ParticipantId>>,
    fail_announcements: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// The owner posts `content` after `delay` once a handoff starts.
    pub fn with_owner_reply(self, delay: Duration, content: impl Into<String>) -> Self {
        *self.owner_reply.lock() = Some((delay, content.into()));
        self
    }

    pub fn with_failing_direct(self, participant: ParticipantId) -> Self {
        let _ = self.failing_directs.lock().insert(participant);
        self
    }

    pub fn with_failing_announcements(self) -> Self {
        self.fail_announcements.store(true, Ordering::SeqCst);
        self
    }

    /// Deliver a signal observed now. Returns `false` if nobody is listening.
    pub fn signal(&self, message_id: &MessageId, slot_token: &str, participant: &str) -> bool {
        self.signal_at(message_id, slot_token, participant, Utc::now())
    }

    pub fn signal_at(
        &self,
        message_id: &MessageId,
        slot_token: &str,
        participant: &str,
        observed_at: DateTime<Utc>,
    ) -> bool {
        let sink = {
            let sinks = self.sinks.lock();
            match sinks.get(message_id) {
                Some((sink, token)) if !token.is_cancelled() => sink.clone(),
                _ => return false,
            }
        };
        sink.deliver(
            RawSignal::new(slot_token, ParticipantId::from_raw(participant)).at(observed_at),
        )
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().clone()
    }

    pub fn updates(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                GatewayCall::Update { content, .. } => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn retractions(&self) -> Vec<(String, ParticipantId)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                GatewayCall::Retract {
                    slot_token,
                    participant_id,
                    ..
                } => Some((slot_token.clone(), participant_id.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn directs(&self) -> Vec<(ParticipantId, String)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                GatewayCall::Direct {
                    participant_id,
                    content,
                } => Some((participant_id.clone(), content.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn announcement_for(&self, channel_id: &ChannelId) -> Option<(MessageId, Vec<String>)> {
        self.calls.lock().iter().rev().find_map(|c| match c {
            GatewayCall::Announce {
                channel_id: ch,
                message_id,
                open_tokens,
                ..
            } if ch == channel_id => Some((message_id.clone(), open_tokens.clone())),
            _ => None,
        })
    }

    pub fn awaited_owner(&self) -> bool {
        self.calls
            .lock()
            .iter()
            .any(|c| matches!(c, GatewayCall::AwaitOwner { .. }))
    }

    fn record(&self, call: GatewayCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn post_announcement(
        &self,
        channel_id: &ChannelId,
        announcement: &Announcement,
    ) -> Result<MessageId, GatewayError> {
        if self.fail_announcements.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("announcements disabled".into()));
        }
        let n = self.next_message.fetch_add(1, Ordering::SeqCst);
        let message_id = MessageId::from_raw(format!("msg-{n}"));
        self.record(GatewayCall::Announce {
            channel_id: channel_id.clone(),
            message_id: message_id.clone(),
            content: announcement.content.clone(),
            open_tokens: announcement.open_tokens.clone(),
        });
        Ok(message_id)
    }

    async fn subscribe_signals(
        &self,
        message_id: &MessageId,
        sink: SignalSink,
    ) -> Result<Subscription, GatewayError> {
        let token = CancellationToken::new();
        let _ = self
            .sinks
            .lock()
            .insert(message_id.clone(), (sink, token.clone()));
        self.record(GatewayCall::Subscribe {
            message_id: message_id.clone(),
        });
        Ok(Subscription::new(token))
    }

    async fn retract_signal(
        &self,
        message_id: &MessageId,
        slot_token: &str,
        participant_id: &ParticipantId,
    ) -> Result<(), GatewayError> {
        self.record(GatewayCall::Retract {
            message_id: message_id.clone(),
            slot_token: slot_token.to_string(),
            participant_id: participant_id.clone(),
        });
        Ok(())
    }

    async fn post_update(&self, channel_id: &ChannelId, content: &str) -> Result<(), GatewayError> {
        self.record(GatewayCall::Update {
            channel_id: channel_id.clone(),
            content: content.to_string(),
        });
        Ok(())
    }

    async fn await_owner_message(
        &self,
        channel_id: &ChannelId,
        owner_id: &ParticipantId,
        matcher: &PayloadMatcher,
        window: Duration,
    ) -> Result<Option<String>, GatewayError> {
        self.record(GatewayCall::AwaitOwner {
            channel_id: channel_id.clone(),
            owner_id: owner_id.clone(),
        });
        let reply = self.owner_reply.lock().clone();
        match reply {
            Some((delay, content)) if delay < window && matcher.matches(&content) => {
                tokio::time::sleep(delay).await;
                Ok(Some(content))
            }
            _ => {
                tokio::time::sleep(window).await;
                Ok(None)
            }
        }
    }

    async fn send_direct(
        &self,
        participant_id: &ParticipantId,
        content: &str,
    ) -> Result<(), GatewayError> {
        self.record(GatewayCall::Direct {
            participant_id: participant_id.clone(),
            content: content.to_string(),
        });
        if self.failing_directs.lock().contains(participant_id) {
            return Err(GatewayError::Forbidden(format!(
                "{participant_id} does not accept direct messages"
            )));
        }
        Ok(())
    }
}
