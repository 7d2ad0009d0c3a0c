//! JSON-lines gateway over stdin/stdout.
//!
//! Inbound, one object per line on stdin:
//!
//! ```text
//! {"type":"command","channel":"c1","author":"u1","admin":true,"content":"!hostfriendly gk"}
//! {"type":"reaction","message":"msg-1","token":"2️⃣","user":"u2"}
//! {"type":"message","channel":"c1","author":"u1","content":"https://lobby/abc"}
//! ```
//!
//! Outbound actions are written to stdout the same way, tagged by `action`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lineup_core::errors::GatewayError;
use lineup_core::ids::{ChannelId, MessageId, ParticipantId};
use lineup_engine::{
    Announcement, DraftEngine, Gateway, PayloadMatcher, RawSignal, Requester, SignalSink,
    Subscription,
};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Command {
        channel: ChannelId,
        author: ParticipantId,
        #[serde(default)]
        admin: bool,
        #[serde(default)]
        roles: Vec<String>,
        #[serde(default)]
        bot: bool,
        content: String,
    },
    Reaction {
        message: MessageId,
        token: String,
        user: ParticipantId,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    Message {
        channel: ChannelId,
        author: ParticipantId,
        content: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OutboundAction {
    Announce {
        channel: ChannelId,
        message: MessageId,
        content: String,
        tokens: Vec<String>,
    },
    Retract {
        message: MessageId,
        token: String,
        user: ParticipantId,
    },
    Update {
        channel: ChannelId,
        content: String,
    },
    Direct {
        user: ParticipantId,
        content: String,
    },
}

struct OwnerWaiter {
    channel: ChannelId,
    owner: ParticipantId,
    matcher: PayloadMatcher,
    reply: oneshot::Sender<String>,
}

pub struct ConsoleGateway {
    out: mpsc::UnboundedSender<OutboundAction>,
    next_message: AtomicU64,
    sinks: Mutex<HashMap<MessageId, (SignalSink, CancellationToken)>>,
    waiters: Mutex<Vec<OwnerWaiter>>,
    blocked_directs: HashSet<ParticipantId>,
}

impl ConsoleGateway {
    pub fn new(
        out: mpsc::UnboundedSender<OutboundAction>,
        blocked_directs: impl IntoIterator<Item = ParticipantId>,
    ) -> Self {
        Self {
            out,
            next_message: AtomicU64::new(1),
            sinks: Mutex::new(HashMap::new()),
            waiters: Mutex::new(Vec::new()),
            blocked_directs: blocked_directs.into_iter().collect(),
        }
    }

    fn emit(&self, action: OutboundAction) -> Result<(), GatewayError> {
        self.out.send(action).map_err(|_| GatewayError::Closed)
    }

    /// Push a reaction into the subscription for its message.
    pub fn deliver_reaction(
        &self,
        message: &MessageId,
        token: String,
        user: ParticipantId,
        at: Option<DateTime<Utc>>,
    ) -> bool {
        let sink = {
            let mut sinks = self.sinks.lock();
            sinks.retain(|_, (_, cancel)| !cancel.is_cancelled());
            match sinks.get(message) {
                Some((sink, _)) => sink.clone(),
                None => return false,
            }
        };
        let signal = RawSignal::new(token, user);
        let signal = match at {
            Some(at) => signal.at(at),
            None => signal,
        };
        sink.deliver(signal)
    }

    /// Hand a channel message to whoever is waiting on its author.
    pub fn deliver_message(&self, channel: &ChannelId, author: &ParticipantId, content: &str) -> bool {
        let mut waiters = self.waiters.lock();
        waiters.retain(|w| !w.reply.is_closed());
        let Some(pos) = waiters.iter().position(|w| {
            &w.channel == channel && &w.owner == author && w.matcher.matches(content)
        }) else {
            return false;
        };
        let waiter = waiters.swap_remove(pos);
        waiter.reply.send(content.to_string()).is_ok()
    }
}

#[async_trait]
impl Gateway for ConsoleGateway {
    async fn post_announcement(
        &self,
        channel_id: &ChannelId,
        announcement: &Announcement,
    ) -> Result<MessageId, GatewayError> {
        let n = self.next_message.fetch_add(1, Ordering::Relaxed);
        let message = MessageId::from_raw(format!("msg-{n}"));
        self.emit(OutboundAction::Announce {
            channel: channel_id.clone(),
            message: message.clone(),
            content: announcement.content.clone(),
            tokens: announcement.open_tokens.clone(),
        })?;
        Ok(message)
    }

    async fn subscribe_signals(
        &self,
        message_id: &MessageId,
        sink: SignalSink,
    ) -> Result<Subscription, GatewayError> {
        let token = CancellationToken::new();
        let mut sinks = self.sinks.lock();
        sinks.retain(|_, (_, cancel)| !cancel.is_cancelled());
        let _ = sinks.insert(message_id.clone(), (sink, token.clone()));
        Ok(Subscription::new(token))
    }

    async fn retract_signal(
        &self,
        message_id: &MessageId,
        slot_token: &str,
        participant_id: &ParticipantId,
    ) -> Result<(), GatewayError> {
        self.emit(OutboundAction::Retract {
            message: message_id.clone(),
            token: slot_token.to_string(),
            user: participant_id.clone(),
        })
    }

    async fn post_update(&self, channel_id: &ChannelId, content: &str) -> Result<(), GatewayError> {
        self.emit(OutboundAction::Update {
            channel: channel_id.clone(),
            content: content.to_string(),
        })
    }

    async fn await_owner_message(
        &self,
        channel_id: &ChannelId,
        owner_id: &ParticipantId,
        matcher: &PayloadMatcher,
        window: Duration,
    ) -> Result<Option<String>, GatewayError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.waiters.lock();
            waiters.retain(|w| !w.reply.is_closed());
            waiters.push(OwnerWaiter {
                channel: channel_id.clone(),
                owner: owner_id.clone(),
                matcher: matcher.clone(),
                reply: tx,
            });
        }
        let reply = tokio::time::timeout(window, rx).await;
        match reply {
            Ok(Ok(content)) => Ok(Some(content)),
            Ok(Err(_)) => Err(GatewayError::Closed),
            Err(_) => {
                // The receiver is gone, so this waiter's sender reads as closed.
                self.waiters.lock().retain(|w| !w.reply.is_closed());
                Ok(None)
            }
        }
    }

    async fn send_direct(
        &self,
        participant_id: &ParticipantId,
        content: &str,
    ) -> Result<(), GatewayError> {
        if self.blocked_directs.contains(participant_id) {
            return Err(GatewayError::Forbidden(format!(
                "{participant_id} does not accept direct messages"
            )));
        }
        self.emit(OutboundAction::Direct {
            user: participant_id.clone(),
            content: content.to_string(),
        })
    }
}

/// Read inbound events until EOF, routing each to the engine or gateway.
pub async fn read_events<R>(
    input: R,
    gateway: Arc<ConsoleGateway>,
    engine: Arc<DraftEngine>,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: InboundEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "unreadable input line");
                continue;
            }
        };
        route(event, &gateway, &engine).await;
    }
    debug!("input closed");
    Ok(())
}

async fn route(event: InboundEvent, gateway: &ConsoleGateway, engine: &DraftEngine) {
    match event {
        InboundEvent::Command {
            channel,
            author,
            admin,
            roles,
            bot,
            content,
        } => {
            let requester = Requester {
                id: author,
                is_admin: admin,
                roles,
                is_bot: bot,
            };
            if let Err(e) = engine.handle_message(&channel, &requester, &content).await {
                debug!(error = %e, error_kind = e.error_kind(), "command not applied");
            }
        }
        InboundEvent::Reaction {
            message,
            token,
            user,
            at,
        } => {
            if !gateway.deliver_reaction(&message, token, user, at) {
                debug!(message = %message, "reaction for a message nobody is watching");
            }
        }
        InboundEvent::Message {
            channel,
            author,
            content,
        } => {
            if !gateway.deliver_message(&channel, &author, &content) {
                debug!(channel = %channel, "message not awaited");
            }
        }
    }
}

/// Serialize outbound actions as JSON lines until every sender is gone.
pub async fn write_actions<W>(
    mut rx: mpsc::UnboundedReceiver<OutboundAction>,
    mut out: W,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(action) = rx.recv().await {
        let mut line = serde_json::to_vec(&action)?;
        line.push(b'\n');
        out.write_all(&line).await?;
        out.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    use lineup_core::events::DraftEvent;
    use lineup_settings::LineupSettings;

    fn gateway() -> (Arc<ConsoleGateway>, mpsc::UnboundedReceiver<OutboundAction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ConsoleGateway::new(tx, Vec::<ParticipantId>::new())), rx)
    }

    #[test]
    fn parses_inbound_lines() {
        let cmd: InboundEvent = serde_json::from_str(
            r#"{"type":"command","channel":"c1","author":"u1","admin":true,"content":"!hostfriendly"}"#,
        )
        .unwrap();
        assert!(matches!(cmd, InboundEvent::Command { admin: true, bot: false, .. }));

        let reaction: InboundEvent = serde_json::from_str(
            r#"{"type":"reaction","message":"msg-1","token":"1","user":"u2"}"#,
        )
        .unwrap();
        assert!(matches!(reaction, InboundEvent::Reaction { at: None, .. }));
    }

    #[test]
    fn outbound_is_tagged_by_action() {
        let json = serde_json::to_value(OutboundAction::Direct {
            user: ParticipantId::from_raw("u1"),
            content: "hi".into(),
        })
        .unwrap();
        assert_eq!(json["action"], "direct");
        assert_eq!(json["user"], "u1");
    }

    #[tokio::test]
    async fn writer_emits_one_line_per_action() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(OutboundAction::Update {
            channel: ChannelId::from_raw("c1"),
            content: "a".into(),
        })
        .unwrap();
        tx.send(OutboundAction::Update {
            channel: ChannelId::from_raw("c1"),
            content: "b".into(),
        })
        .unwrap();
        drop(tx);

        let mut buf = Vec::new();
        write_actions(rx, &mut buf).await.unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with(r#"{"action":"update","channel":"c1","content":"a"}"#));
    }

    #[tokio::test(start_paused = true)]
    async fn owner_message_resolves_waiter() {
        let (gw, _rx) = gateway();
        let matcher = PayloadMatcher::new(r"https?://\S+").unwrap();
        let channel = ChannelId::from_raw("c1");
        let owner = ParticipantId::from_raw("o");

        let waiting = {
            let gw = gw.clone();
            let (channel, owner) = (channel.clone(), owner.clone());
            tokio::spawn(async move {
                gw.await_owner_message(&channel, &owner, &matcher, Duration::from_secs(300))
                    .await
            })
        };
        tokio::task::yield_now().await;

        assert!(!gw.deliver_message(&channel, &ParticipantId::from_raw("x"), "https://a"));
        assert!(!gw.deliver_message(&channel, &owner, "no link"));
        assert!(gw.deliver_message(&channel, &owner, "https://lobby/1"));
        assert_eq!(
            waiting.await.unwrap().unwrap().as_deref(),
            Some("https://lobby/1")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn owner_wait_times_out() {
        let (gw, _rx) = gateway();
        let matcher = PayloadMatcher::new(r"https?://\S+").unwrap();
        let got = gw
            .await_owner_message(
                &ChannelId::from_raw("c1"),
                &ParticipantId::from_raw("o"),
                &matcher,
                Duration::from_secs(300),
            )
            .await
            .unwrap();
        assert!(got.is_none());
        assert!(gw.waiters.lock().is_empty());
    }

    #[tokio::test]
    async fn blocked_direct_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let gw = ConsoleGateway::new(tx, [ParticipantId::from_raw("b")]);
        let err = gw
            .send_direct(&ParticipantId::from_raw("b"), "hi")
            .await
            .unwrap_err();
        assert_eq!(err.error_kind(), GatewayError::Forbidden(String::new()).error_kind());
        assert!(gw.send_direct(&ParticipantId::from_raw("a"), "hi").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn command_and_reactions_drive_a_draft() {
        let (gw, mut out) = gateway();
        let (events, _) = broadcast::channel(64);
        let engine = Arc::new(
            DraftEngine::new(gw.clone(), &LineupSettings::default(), events).unwrap(),
        );
        let mut rx = engine.subscribe();

        let input = concat!(
            r#"{"type":"command","channel":"c1","author":"host","admin":true,"content":"!hostfriendly"}"#,
            "\n",
            "not json\n",
        );
        read_events(input.as_bytes(), gw.clone(), engine.clone())
            .await
            .unwrap();

        let message = loop {
            if let DraftEvent::SessionOpened { message_id, .. } = rx.recv().await.unwrap() {
                break message_id;
            }
        };
        match out.recv().await.unwrap() {
            OutboundAction::Announce { tokens, .. } => assert_eq!(tokens.len(), 7),
            other => panic!("unexpected action {other:?}"),
        }

        let reaction = format!(
            r#"{{"type":"reaction","message":"{message}","token":"1️⃣","user":"u9"}}"#
        );
        read_events(reaction.as_bytes(), gw.clone(), engine.clone())
            .await
            .unwrap();
        loop {
            if let DraftEvent::SlotConfirmed { participant_id, .. } = rx.recv().await.unwrap() {
                assert_eq!(participant_id, ParticipantId::from_raw("u9"));
                break;
            }
        }
        match out.recv().await.unwrap() {
            OutboundAction::Update { content, .. } => {
                assert_eq!(content, "\u{2705} GK confirmed for <@u9>");
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn finished_drafts_leave_no_subscriptions_behind() {
        let (gw, _out) = gateway();
        let (events, _) = broadcast::channel(64);
        let engine = Arc::new(
            DraftEngine::new(gw.clone(), &LineupSettings::default(), events).unwrap(),
        );
        let mut rx = engine.subscribe();

        let input = concat!(
            r#"{"type":"command","channel":"c1","author":"host","admin":true,"content":"!hostfriendly"}"#,
            "\n",
        );
        read_events(input.as_bytes(), gw.clone(), engine.clone())
            .await
            .unwrap();
        let message = loop {
            if let DraftEvent::SessionOpened { message_id, .. } = rx.recv().await.unwrap() {
                break message_id;
            }
        };
        assert_eq!(gw.sinks.lock().len(), 1);

        engine.shutdown(Duration::from_secs(5)).await;
        assert!(!gw.deliver_reaction(
            &MessageId::from_raw("msg-unrelated"),
            "1\u{fe0f}\u{20e3}".into(),
            ParticipantId::from_raw("u1"),
            None,
        ));
        assert!(gw.sinks.lock().is_empty());
        assert!(!gw.deliver_reaction(
            &message,
            "1\u{fe0f}\u{20e3}".into(),
            ParticipantId::from_raw("u1"),
            None,
        ));
    }
}
