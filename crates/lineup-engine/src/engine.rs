use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lineup_core::events::DraftEvent;
use lineup_core::ids::{ChannelId, ParticipantId, SessionId};
use lineup_core::slots::SlotSpec;
use lineup_core::snapshot::DraftSnapshot;
use lineup_settings::LineupSettings;
use lineup_store::SnapshotRepo;

use crate::actor::{SessionActor, SessionContext};
use crate::commands::{HostCommand, HostPolicy, Requester};
use crate::debounce::SignalDebouncer;
use crate::error::EngineError;
use crate::gateway::Gateway;
use crate::handoff::PayloadMatcher;
use crate::registry::{SessionHandle, SessionRegistry};
use crate::render;
use crate::session::DraftSession;

/// Resolved draft parameters, fixed for the lifetime of an engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub title: String,
    pub slots: Vec<SlotSpec>,
    pub mention_here: bool,
    pub settle: Duration,
    pub reminder: Option<Duration>,
    pub deadline: Duration,
    pub handoff_window: Duration,
    pub dispatch_notice: String,
    pub host_command: String,
}

impl EngineConfig {
    pub fn from_settings(settings: &LineupSettings) -> Self {
        Self {
            title: settings.draft.title.clone(),
            slots: settings.draft.slots.clone(),
            mention_here: settings.draft.mention_here,
            settle: settings.draft.settle(),
            reminder: settings.draft.reminder(),
            deadline: settings.draft.deadline(),
            handoff_window: settings.handoff.window(),
            dispatch_notice: settings.handoff.dispatch_notice.clone(),
            host_command: settings.host.command.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostRequest {
    pub channel_id: ChannelId,
    pub owner_id: ParticipantId,
    /// Slot label the owner takes before the announcement goes out.
    pub slot_label: Option<String>,
}

/// Entry point: opens drafts and owns the registry of running sessions.
pub struct DraftEngine {
    ctx: SessionContext,
    policy: HostPolicy,
    cancel: CancellationToken,
}

impl DraftEngine {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        settings: &LineupSettings,
        events: broadcast::Sender<DraftEvent>,
    ) -> Result<Self, EngineError> {
        let matcher = PayloadMatcher::new(&settings.handoff.link_pattern)?;
        Ok(Self {
            ctx: SessionContext {
                gateway,
                registry: Arc::new(SessionRegistry::new()),
                events,
                store: None,
                config: Arc::new(EngineConfig::from_settings(settings)),
                matcher,
            },
            policy: HostPolicy::from_settings(&settings.host),
            cancel: CancellationToken::new(),
        })
    }

    /// Persist snapshots of every session through `store`.
    pub fn with_store(mut self, store: SnapshotRepo) -> Self {
        self.ctx.store = Some(store);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DraftEvent> {
        self.ctx.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.ctx.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// Route a channel message. Returns the new session id when the message
    /// was a host command that opened a draft, `None` when it was not a
    /// command at all.
    pub async fn handle_message(
        &self,
        channel_id: &ChannelId,
        requester: &Requester,
        content: &str,
    ) -> Result<Option<SessionId>, EngineError> {
        if requester.is_bot {
            return Ok(None);
        }
        let Some(command) = HostCommand::parse(&self.ctx.config.host_command, content) else {
            return Ok(None);
        };
        if !self.policy.permits(requester) {
            debug!(
                channel_id = %channel_id,
                participant_id = %requester.id,
                "host command from unauthorized member ignored"
            );
            return Err(EngineError::NotPermitted(requester.id.clone()));
        }

        let session_id = self
            .host(HostRequest {
                channel_id: channel_id.clone(),
                owner_id: requester.id.clone(),
                slot_label: command.slot_label,
            })
            .await?;
        Ok(Some(session_id))
    }

    /// Open a draft in `request.channel_id`. Registration is atomic: two
    /// concurrent requests for one channel never both succeed.
    pub async fn host(&self, request: HostRequest) -> Result<SessionId, EngineError> {
        let HostRequest {
            channel_id,
            owner_id,
            slot_label,
        } = request;
        let config = &self.ctx.config;

        let session = DraftSession::new(
            channel_id.clone(),
            owner_id,
            &config.slots,
            SignalDebouncer::new(config.settle),
        );
        let session_id = session.id.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = self.cancel.child_token();
        let handle = SessionHandle::new(
            session_id.clone(),
            channel_id.clone(),
            tx.clone(),
            cancel.clone(),
        );

        if let Err(existing) = self.ctx.registry.try_insert(handle) {
            info!(channel_id = %channel_id, existing = %existing, "draft already active in channel");
            if let Err(e) = self
                .ctx
                .gateway
                .post_update(&channel_id, &render::duplicate_session())
                .await
            {
                warn!(error = %e, "failed to post duplicate notice");
            }
            return Err(EngineError::DuplicateSessionInChannel {
                channel_id,
                existing,
            });
        }

        let actor = SessionActor::new(session, self.ctx.clone(), tx, cancel, slot_label);
        tokio::spawn(actor.run(rx));
        Ok(session_id)
    }

    pub async fn snapshot(&self, channel_id: &ChannelId) -> Result<DraftSnapshot, EngineError> {
        let handle = self
            .ctx
            .registry
            .get(channel_id)
            .ok_or_else(|| EngineError::NoActiveSession(channel_id.clone()))?;
        handle
            .snapshot()
            .await
            .ok_or_else(|| EngineError::NoActiveSession(channel_id.clone()))
    }

    pub fn active_sessions(&self) -> usize {
        self.ctx.registry.len()
    }

    /// Cancel every session and wait up to `grace` for them to close.
    /// Returns how many sessions were running.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let count = self.ctx.registry.cancel_all();
        self.cancel.cancel();
        let deadline = Instant::now() + grace;
        while !self.ctx.registry.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        if !self.ctx.registry.is_empty() {
            warn!(
                remaining = self.ctx.registry.len(),
                "sessions still open after shutdown grace"
            );
        }
        info!(count, "draft engine stopped");
        count
    }
}
