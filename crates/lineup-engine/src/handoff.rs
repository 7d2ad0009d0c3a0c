//! Post-fill link handoff.
//!
//! Once a draft fills, the owner has a fixed window to post a message
//! carrying the link. The first matching message is fanned out to every
//! assigned participant by direct message, one attempt each, and the result
//! is summarised in a [`HandoffReport`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use regex::Regex;
use tracing::{debug, info, warn};

use lineup_core::errors::GatewayError;
use lineup_core::events::HandoffReport;
use lineup_core::ids::{ChannelId, ParticipantId};
use lineup_core::slots::Assignment;

use crate::gateway::Gateway;
use crate::render;

/// Decides whether an owner message is a payload and pulls the link out.
#[derive(Clone, Debug)]
pub struct PayloadMatcher {
    pattern: Regex,
}

impl PayloadMatcher {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn matches(&self, content: &str) -> bool {
        self.pattern.is_match(content)
    }

    pub fn extract<'a>(&self, content: &'a str) -> Option<&'a str> {
        self.pattern.find(content).map(|m| m.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payload {
    pub content: String,
    pub link: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    Failed,
}

/// Per-participant delivery results, in assignment order.
#[derive(Debug, Default)]
pub struct DeliveryLedger {
    order: Vec<ParticipantId>,
    status: BTreeMap<ParticipantId, DeliveryStatus>,
}

impl DeliveryLedger {
    pub fn record(&mut self, participant: ParticipantId, status: DeliveryStatus) {
        if self.status.insert(participant.clone(), status).is_none() {
            self.order.push(participant);
        }
    }

    pub fn status_of(&self, participant: &ParticipantId) -> Option<DeliveryStatus> {
        self.status.get(participant).copied()
    }

    pub fn report(&self) -> HandoffReport {
        let mut report = HandoffReport::default();
        for participant in &self.order {
            match self.status.get(participant) {
                Some(DeliveryStatus::Delivered) => report.delivered_count += 1,
                Some(DeliveryStatus::Failed) => {
                    report.failed_participant_ids.push(participant.clone());
                }
                None => {}
            }
        }
        report
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandoffOutcome {
    Delivered {
        payload: Payload,
        report: HandoffReport,
    },
    NoPayload,
}

pub struct HandoffCollector {
    gateway: Arc<dyn Gateway>,
    matcher: PayloadMatcher,
    window: Duration,
}

impl HandoffCollector {
    pub fn new(gateway: Arc<dyn Gateway>, matcher: PayloadMatcher, window: Duration) -> Self {
        Self {
            gateway,
            matcher,
            window,
        }
    }

    /// Wait for the owner's payload. A gateway failure counts as no payload.
    pub async fn await_payload(
        &self,
        channel_id: &ChannelId,
        owner_id: &ParticipantId,
    ) -> Option<Payload> {
        let wait = self
            .gateway
            .await_owner_message(channel_id, owner_id, &self.matcher, self.window);
        let content = match tokio::time::timeout(self.window, wait).await {
            Ok(Ok(Some(content))) => content,
            Ok(Ok(None)) | Err(_) => {
                debug!(channel_id = %channel_id, "handoff window elapsed");
                return None;
            }
            Ok(Err(e)) => {
                warn!(channel_id = %channel_id, error = %e, "awaiting owner message failed");
                return None;
            }
        };
        let Some(link) = self.matcher.extract(&content) else {
            warn!(channel_id = %channel_id, "owner message did not carry a link");
            return None;
        };
        Some(Payload {
            link: link.to_string(),
            content,
        })
    }

    /// Send the link to every assigned participant, one attempt each.
    pub async fn deliver(&self, payload: &Payload, assignment: &[Assignment]) -> HandoffReport {
        let sends = assignment.iter().map(|a| {
            let text = render::direct_link(a, &payload.link);
            async move {
                let result = self.gateway.send_direct(&a.participant_id, &text).await;
                (a.participant_id.clone(), result)
            }
        });

        let mut ledger = DeliveryLedger::default();
        for (participant, result) in join_all(sends).await {
            let status = match result {
                Ok(()) => DeliveryStatus::Delivered,
                Err(e) => {
                    log_send_failure(&participant, &e);
                    DeliveryStatus::Failed
                }
            };
            ledger.record(participant, status);
        }
        let report = ledger.report();
        info!(
            delivered = report.delivered_count,
            failed = report.failed_participant_ids.len(),
            "handoff delivered"
        );
        report
    }

    pub async fn run(
        &self,
        channel_id: &ChannelId,
        owner_id: &ParticipantId,
        assignment: &[Assignment],
    ) -> HandoffOutcome {
        match self.await_payload(channel_id, owner_id).await {
            Some(payload) => {
                let report = self.deliver(&payload, assignment).await;
                HandoffOutcome::Delivered { payload, report }
            }
            None => HandoffOutcome::NoPayload,
        }
    }
}

fn log_send_failure(participant: &ParticipantId, error: &GatewayError) {
    warn!(
        participant_id = %participant,
        error_kind = error.error_kind(),
        error = %error,
        "direct message failed"
    );
}
