//! Plain-text export of a side-by-side comparison.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::history::{HistoryEntry, Role};

const RULE_WIDTH: usize = 80;

/// One agent's column in the exported comparison.
#[derive(Clone, Debug, Default)]
pub struct TranscriptLane {
    pub name: String,
    pub entries: Vec<HistoryEntry>,
    /// Finished replies not yet present in `entries`, oldest first.
    pub unsaved: Vec<String>,
}

impl TranscriptLane {
    fn responses(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|entry| entry.role == Role::Assistant)
            .map(|entry| entry.text.as_str())
            .chain(self.unsaved.iter().map(String::as_str))
            .collect()
    }
}

fn rule(ch: char) -> String {
    std::iter::repeat_n(ch, RULE_WIDTH).collect()
}

/// Renders the comparison document. Questions come from the first lane.
pub fn render_comparison(lanes: &[TranscriptLane], generated_at: DateTime<Utc>) -> String {
    let names: Vec<&str> = lanes.iter().map(|lane| lane.name.as_str()).collect();
    let responses: Vec<Vec<&str>> = lanes.iter().map(TranscriptLane::responses).collect();
    let questions: Vec<&str> = lanes
        .first()
        .map(|lane| {
            lane.entries
                .iter()
                .filter(|entry| entry.role == Role::User)
                .map(|entry| entry.text.as_str())
                .collect()
        })
        .unwrap_or_default();

    let mut out = String::new();
    let _ = writeln!(out, "Philosophical Comparison: {}", names.join(" vs "));
    let _ = writeln!(out, "Generated: {}", generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "{}\n", rule('='));

    for (index, question) in questions.iter().enumerate() {
        let _ = writeln!(out, "QUESTION {}:\n{question}\n", index + 1);
        let _ = writeln!(out, "{}\n", rule('-'));
        for (name, replies) in names.iter().zip(&responses) {
            if let Some(reply) = replies.get(index).filter(|reply| !reply.is_empty()) {
                let _ = writeln!(out, "{}'S RESPONSE:\n{reply}\n", name.to_uppercase());
            }
        }
        let _ = writeln!(out, "{}\n", rule('='));
    }

    if questions.is_empty() {
        let listed: Vec<_> = names
            .iter()
            .zip(&responses)
            .filter(|(_, replies)| !replies.is_empty())
            .collect();
        for (position, (name, replies)) in listed.iter().enumerate() {
            let _ = writeln!(out, "{}'S RESPONSES:\n", name.to_uppercase());
            for (index, reply) in replies.iter().enumerate() {
                let _ = writeln!(out, "Response {}:\n{reply}\n", index + 1);
            }
            if position + 1 < listed.len() {
                let _ = writeln!(out, "{}\n", rule('-'));
            }
        }
    }
    out
}

/// Download name such as `Plato_vs_David_Hume_comparison_1700000000000.txt`.
pub fn file_name(names: &[&str], timestamp_ms: i64) -> String {
    let joined = names
        .iter()
        .map(|name| name.split_whitespace().collect::<Vec<_>>().join("_"))
        .collect::<Vec<_>>()
        .join("_vs_");
    format!("{joined}_comparison_{timestamp_ms}.txt")
}
