//! Channel and direct message text.

use std::fmt::Write as _;
use std::time::Duration;

use lineup_core::events::HandoffReport;
use lineup_core::ids::ParticipantId;
use lineup_core::slots::{Assignment, SlotTable};

use crate::gateway::Announcement;

pub fn mention(participant: &ParticipantId) -> String {
    format!("<@{participant}>")
}

pub fn announcement(title: &str, table: &SlotTable, mention_here: bool) -> Announcement {
    let mut lines = Vec::with_capacity(table.len() + 2);
    lines.push(title.to_string());
    for slot in table.slots() {
        lines.push(format!("{} - {}", slot.token, slot.label));
    }
    if mention_here {
        lines.push("@here".to_string());
    }
    Announcement {
        content: lines.join("\n"),
        open_tokens: table.open_tokens(),
    }
}

pub fn confirmation(label: &str, participant: &ParticipantId) -> String {
    format!("\u{2705} {label} confirmed for {}", mention(participant))
}

pub fn reminder(mention_here: bool) -> String {
    let text = "Need more reacts to start the friendly!";
    if mention_here {
        format!("@here {text}")
    } else {
        text.to_string()
    }
}

pub fn cancelled() -> String {
    "\u{274c} Friendly cancelled \u{2014} not enough players.".to_string()
}

pub fn final_lineup(assignment: &[Assignment]) -> String {
    let mut out = String::from("\u{2705} Final Lineup:\n");
    for a in assignment {
        let _ = writeln!(out, "{} {}: {}", a.token, a.label, mention(&a.participant_id));
    }
    out
}

pub fn handoff_prompt(owner: &ParticipantId, window: Duration) -> String {
    let minutes = window.as_secs().div_ceil(60).max(1);
    let unit = if minutes == 1 { "minute" } else { "minutes" };
    format!(
        "{} post the match link here within {minutes} {unit} and it will be sent to everyone in the lineup.",
        mention(owner)
    )
}

pub fn direct_link(assignment: &Assignment, link: &str) -> String {
    format!(
        "\u{2705} You're in as {} ({}). Match link: {link}",
        assignment.label, assignment.token
    )
}

pub fn handoff_report(report: &HandoffReport) -> String {
    let mut out = format!("\u{2705} Link sent to {} players.", report.delivered_count);
    if !report.failed_participant_ids.is_empty() {
        let failed: Vec<String> = report.failed_participant_ids.iter().map(mention).collect();
        let _ = write!(out, "\n\u{26a0}\u{fe0f} Could not DM: {}", failed.join(", "));
    }
    out
}

pub fn no_payload(owner: &ParticipantId) -> String {
    format!(
        "\u{274c} No link received from {}, lineup dismissed.",
        mention(owner)
    )
}

pub fn duplicate_session() -> String {
    "\u{26a0}\u{fe0f} A friendly is already being drafted in this channel.".to_string()
}
