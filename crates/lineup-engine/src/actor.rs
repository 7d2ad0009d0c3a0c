//! One task per draft session.
//!
//! Every mutation of a session happens on its actor task, in inbox order:
//! signals from the gateway, settle tickets, timer firings and the handoff
//! outcome all arrive as [`SessionCommand`]s. Nothing else holds the session.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use lineup_core::errors::GatewayError;
use lineup_core::events::{CloseReason, DraftEvent, DraftState};
use lineup_core::ids::{MessageId, ParticipantId};
use lineup_core::slots::{Assignment, ClaimOutcome};
use lineup_core::snapshot::DraftSnapshot;
use lineup_store::SnapshotRepo;

use crate::debounce::{Observation, PendingClaim, SettleTicket};
use crate::engine::EngineConfig;
use crate::gateway::{Gateway, RawSignal, SignalSink, Subscription};
use crate::handoff::{HandoffCollector, HandoffOutcome, PayloadMatcher};
use crate::registry::SessionRegistry;
use crate::render;
use crate::session::DraftSession;
use crate::timer::{fire_after, EscalationTimer, TimerFired, TimerKind};

#[derive(Debug)]
pub(crate) enum SessionCommand {
    Signal(RawSignal),
    Settle(SettleTicket),
    Timer(TimerFired),
    Handoff(HandoffOutcome),
    Snapshot(oneshot::Sender<DraftSnapshot>),
}

impl From<TimerFired> for SessionCommand {
    fn from(fired: TimerFired) -> Self {
        Self::Timer(fired)
    }
}

/// Dependencies shared by every session of one engine.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub gateway: Arc<dyn Gateway>,
    pub registry: Arc<SessionRegistry>,
    pub events: broadcast::Sender<DraftEvent>,
    pub store: Option<SnapshotRepo>,
    pub config: Arc<EngineConfig>,
    pub matcher: PayloadMatcher,
}

pub(crate) struct SessionActor {
    session: DraftSession,
    ctx: SessionContext,
    tx: mpsc::UnboundedSender<SessionCommand>,
    cancel: CancellationToken,
    origin: Instant,
    host_claim: Option<String>,
    message_id: Option<MessageId>,
    subscription: Option<Subscription>,
    timer: Option<EscalationTimer>,
}

impl SessionActor {
    pub(crate) fn new(
        session: DraftSession,
        ctx: SessionContext,
        tx: mpsc::UnboundedSender<SessionCommand>,
        cancel: CancellationToken,
        host_claim: Option<String>,
    ) -> Self {
        Self {
            session,
            ctx,
            tx,
            cancel,
            origin: Instant::now(),
            host_claim,
            message_id: None,
            subscription: None,
            timer: None,
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionCommand>) {
        let span = info_span!(
            "draft",
            session_id = %self.session.id,
            channel_id = %self.session.channel_id,
        );
        async move {
            if let Err(e) = self.open().await {
                warn!(error = %e, error_kind = e.error_kind(), "draft could not be opened");
                self.finish(CloseReason::AnnouncementFailed);
                return;
            }

            let cancel = self.cancel.clone();
            while self.session.state() != DraftState::Closed {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        self.finish(CloseReason::Shutdown);
                    }
                    cmd = rx.recv() => match cmd {
                        Some(cmd) => self.handle(cmd).await,
                        None => break,
                    },
                }
            }
            debug!("draft actor stopped");
        }
        .instrument(span)
        .await;
    }

    async fn open(&mut self) -> Result<(), GatewayError> {
        let channel_id = self.session.channel_id.clone();
        let owner_id = self.session.owner_id.clone();

        let mut host_slot = None;
        if let Some(label) = self.host_claim.take() {
            match self.session.pre_claim(&label, &owner_id, Utc::now()) {
                Some((index, ClaimOutcome::Committed)) => {
                    let label = self.label_of(index);
                    self.post(&render::confirmation(&label, &owner_id)).await;
                    host_slot = Some((index, label));
                }
                Some((_, outcome)) => debug!(%label, %outcome, "host pre-claim refused"),
                None => debug!(%label, "host named an unknown slot"),
            }
        }

        let announcement = render::announcement(
            &self.ctx.config.title,
            self.session.table(),
            self.ctx.config.mention_here,
        );
        let message_id = self
            .ctx
            .gateway
            .post_announcement(&channel_id, &announcement)
            .await?;
        self.message_id = Some(message_id.clone());

        let sink = SignalSink::new(self.tx.clone());
        self.subscription = Some(self.ctx.gateway.subscribe_signals(&message_id, sink).await?);

        self.timer = Some(EscalationTimer::start(
            self.origin,
            self.ctx.config.reminder,
            self.ctx.config.deadline,
            self.session.generation(),
            &self.cancel,
            self.tx.clone(),
        ));

        info!(message_id = %message_id, owner_id = %owner_id, "draft opened");
        self.emit(DraftEvent::SessionOpened {
            session_id: self.session.id.clone(),
            channel_id,
            owner_id: owner_id.clone(),
            message_id,
        });
        if let Some((slot, label)) = host_slot {
            self.emit(DraftEvent::SlotConfirmed {
                session_id: self.session.id.clone(),
                slot,
                label,
                participant_id: owner_id,
            });
        }
        self.persist();

        if let Some(assignment) = self.session.check_filled() {
            self.on_filled(assignment).await;
        }
        Ok(())
    }

    async fn handle(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Signal(signal) => self.on_signal(signal).await,
            SessionCommand::Settle(ticket) => self.on_settle(ticket).await,
            SessionCommand::Timer(TimerFired {
                kind: TimerKind::Reminder,
                generation,
            }) => self.on_reminder(generation).await,
            SessionCommand::Timer(TimerFired {
                kind: TimerKind::Deadline,
                generation,
            }) => self.on_deadline(generation).await,
            SessionCommand::Handoff(outcome) => self.on_handoff(outcome).await,
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.session.snapshot());
            }
        }
    }

    async fn on_signal(&mut self, signal: RawSignal) {
        match self.session.observe(&signal) {
            Observation::Armed { ticket, withdrawn } => {
                debug!(
                    slot = ticket.slot,
                    participant_id = %signal.participant_id,
                    "settle window armed"
                );
                let _ = fire_after(
                    Instant::now() + self.ctx.config.settle,
                    SessionCommand::Settle(ticket),
                    self.cancel.clone(),
                    self.tx.clone(),
                );
                self.withdraw(withdrawn).await;
            }
            Observation::Queued { withdrawn } => {
                debug!(participant_id = %signal.participant_id, "signal queued in settle window");
                self.withdraw(withdrawn).await;
            }
            Observation::Duplicate => {
                debug!(participant_id = %signal.participant_id, "duplicate signal");
            }
            Observation::Ignored => {
                debug!(token = %signal.slot_token, "signal for unknown token");
            }
            Observation::Rejected(reason) => {
                self.reject(&signal.slot_token, &signal.participant_id, reason)
                    .await;
            }
        }
    }

    async fn on_settle(&mut self, ticket: SettleTicket) {
        let Some(resolution) = self.session.settle(ticket, Utc::now()) else {
            return;
        };
        for skipped in &resolution.passed_over {
            self.reject(
                &skipped.slot_token,
                &skipped.participant_id,
                ClaimOutcome::ParticipantAlreadyHolds,
            )
            .await;
        }

        // A failed commit drops the window silently; the slot stays open.
        if !resolution.outcome.is_committed() {
            let winner = resolution.winner;
            debug!(
                participant_id = %winner.participant_id,
                outcome = %resolution.outcome,
                released = resolution.contenders.len(),
                "settle window closed without a commit"
            );
            self.emit(DraftEvent::SignalRejected {
                session_id: self.session.id.clone(),
                slot_token: winner.slot_token,
                participant_id: winner.participant_id,
                reason: resolution.outcome,
            });
            return;
        }

        let participant = resolution.winner.participant_id.clone();
        let label = self.label_of(resolution.slot);
        info!(slot = %label, participant_id = %participant, "slot confirmed");
        self.emit(DraftEvent::SlotConfirmed {
            session_id: self.session.id.clone(),
            slot: resolution.slot,
            label: label.clone(),
            participant_id: participant.clone(),
        });
        self.post(&render::confirmation(&label, &participant)).await;

        for loser in &resolution.contenders {
            self.reject(&loser.slot_token, &loser.participant_id, ClaimOutcome::SlotTaken)
                .await;
        }
        self.persist();

        if let Some(assignment) = self.session.check_filled() {
            self.on_filled(assignment).await;
        }
    }

    async fn on_filled(&mut self, assignment: Vec<Assignment>) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        info!(slots = assignment.len(), "draft filled");
        self.emit(DraftEvent::DraftFilled {
            session_id: self.session.id.clone(),
            assignment: assignment.clone(),
        });
        self.persist();

        let owner_id = self.session.owner_id.clone();
        let window = self.ctx.config.handoff_window;
        self.post(&render::final_lineup(&assignment)).await;
        self.post(&self.ctx.config.dispatch_notice).await;
        self.post(&render::handoff_prompt(&owner_id, window)).await;

        let collector =
            HandoffCollector::new(self.ctx.gateway.clone(), self.ctx.matcher.clone(), window);
        let channel_id = self.session.channel_id.clone();
        let cancel = self.cancel.clone();
        let tx = self.tx.clone();
        tokio::spawn(
            async move {
                tokio::select! {
                    () = cancel.cancelled() => {}
                    outcome = collector.run(&channel_id, &owner_id, &assignment) => {
                        let _ = tx.send(SessionCommand::Handoff(outcome));
                    }
                }
            }
            .in_current_span(),
        );
    }

    async fn on_reminder(&mut self, generation: u64) {
        let Some(open_slots) = self.session.on_reminder(generation) else {
            return;
        };
        info!(open_slots, "reminder sent");
        self.emit(DraftEvent::Reminder {
            session_id: self.session.id.clone(),
            open_slots,
        });
        self.post(&render::reminder(self.ctx.config.mention_here)).await;
    }

    async fn on_deadline(&mut self, generation: u64) {
        let Some(claimed) = self.session.on_deadline(generation) else {
            return;
        };
        info!(claimed, "draft expired");
        self.emit(DraftEvent::DraftExpired {
            session_id: self.session.id.clone(),
            claimed,
        });
        self.post(&render::cancelled()).await;
        self.finish(CloseReason::Expired);
    }

    async fn on_handoff(&mut self, outcome: HandoffOutcome) {
        if self.session.state() != DraftState::Filled {
            return;
        }
        let session_id = self.session.id.clone();
        match outcome {
            HandoffOutcome::Delivered { report, .. } => {
                self.emit(DraftEvent::PayloadReceived {
                    session_id: session_id.clone(),
                });
                self.post(&render::handoff_report(&report)).await;
                self.emit(DraftEvent::HandoffReported { session_id, report });
                self.finish(CloseReason::HandoffComplete);
            }
            HandoffOutcome::NoPayload => {
                info!("no payload from owner");
                self.emit(DraftEvent::NoPayloadReceived { session_id });
                self.post(&render::no_payload(&self.session.owner_id)).await;
                self.finish(CloseReason::NoPayload);
            }
        }
    }

    /// Retract a contender signal left behind when its participant moved.
    async fn withdraw(&self, withdrawn: Option<PendingClaim>) {
        if let Some(claim) = withdrawn {
            self.reject(
                &claim.slot_token,
                &claim.participant_id,
                ClaimOutcome::ParticipantAlreadyHolds,
            )
            .await;
        }
    }

    async fn reject(&self, slot_token: &str, participant: &ParticipantId, reason: ClaimOutcome) {
        debug!(token = %slot_token, participant_id = %participant, %reason, "signal rejected");
        self.emit(DraftEvent::SignalRejected {
            session_id: self.session.id.clone(),
            slot_token: slot_token.to_string(),
            participant_id: participant.clone(),
            reason,
        });
        let Some(message_id) = &self.message_id else {
            return;
        };
        if let Err(e) = self
            .ctx
            .gateway
            .retract_signal(message_id, slot_token, participant)
            .await
        {
            warn!(error = %e, error_kind = e.error_kind(), "retract failed");
        }
    }

    fn finish(&mut self, reason: CloseReason) {
        if !self.session.close(reason) {
            return;
        }
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
        self.cancel.cancel();

        let session_id = self.session.id.clone();
        if let Some(store) = &self.ctx.store {
            let saved = store
                .save(&self.session.snapshot())
                .and_then(|()| store.close(&session_id, reason.as_str()));
            if let Err(e) = saved {
                warn!(error = %e, "failed to record closed draft");
            }
        }
        self.ctx
            .registry
            .remove(&self.session.channel_id, &session_id);

        info!(reason = reason.as_str(), "draft closed");
        self.emit(DraftEvent::SessionClosed { session_id, reason });
    }

    async fn post(&self, content: &str) {
        if let Err(e) = self
            .ctx
            .gateway
            .post_update(&self.session.channel_id, content)
            .await
        {
            warn!(error = %e, error_kind = e.error_kind(), "channel update failed");
        }
    }

    fn persist(&self) {
        let Some(store) = &self.ctx.store else {
            return;
        };
        if let Err(e) = store.save(&self.session.snapshot()) {
            warn!(error = %e, "snapshot save failed");
        }
    }

    fn emit(&self, event: DraftEvent) {
        let _ = self.ctx.events.send(event);
    }

    fn label_of(&self, index: usize) -> String {
        self.session
            .table()
            .get(index)
            .map(|slot| slot.label.clone())
            .unwrap_or_default()
    }
}
