//! Fine-tuning example extraction
//!
//! Zones flagged as prompts (questions, instructions) and responses
//! (answers) are paired into role-tagged conversations. A conversation ends
//! when more than `max_gap` zones separate two flagged zones. Extracted
//! examples then pass through a [`QualityFilter`].

mod filter;
mod similarity;

pub use filter::{FilterOutcome, QualityFilter, RejectedExample, RejectionReason};
pub use similarity::{CharTrigram, SimilarityKind, SimilarityMetric, TokenJaccard};

use crate::config::ExportConfig;
use crate::zone::{sort_document_order, Zone, ZoneStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// System preamble prepended to instruction-style examples
pub const INSTRUCTION_PREAMBLE: &str =
    "You are an assistant that follows instructions taken from a source document. \
     Answer using only the information the document provides.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStyle {
    /// Question/answer adjacency
    #[default]
    Qa,
    /// Instruction/response pairs with a system preamble
    Instruction,
}

impl fmt::Display for ConversationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationStyle::Qa => write!(f, "qa"),
            ConversationStyle::Instruction => write!(f, "instruction"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One fine-tuning record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingExample {
    pub id: String,
    pub style: ConversationStyle,
    pub messages: Vec<Message>,
    /// Mean confidence of the contributing zones
    pub quality: f64,
    pub source_zone_ids: Vec<String>,
}

impl TrainingExample {
    /// All user turns joined
    pub fn prompt(&self) -> String {
        self.joined(Role::User)
    }

    /// All assistant turns joined
    pub fn response(&self) -> String {
        self.joined(Role::Assistant)
    }

    fn joined(&self, role: Role) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == role)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Roles alternate user/assistant after an optional leading system turn,
    /// the last turn is the assistant's and no message is empty
    pub fn is_well_formed(&self) -> bool {
        let mut turns = self.messages.iter();
        if self.style == ConversationStyle::Instruction {
            match turns.next() {
                Some(m) if m.role == Role::System => {}
                _ => return false,
            }
        }

        let mut expected = Role::User;
        let mut count = 0;
        for message in turns {
            if message.role != expected || message.content.trim().is_empty() {
                return false;
            }
            expected = if expected == Role::User {
                Role::Assistant
            } else {
                Role::User
            };
            count += 1;
        }
        count >= 2 && expected == Role::User
    }
}

/// Conversational role inferred for a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Prompt,
    Response,
}

/// Flagged zones that could not be turned into an example
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedZones {
    pub zone_ids: Vec<String>,
    pub reason: String,
}

/// Raw extraction result
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub examples: Vec<TrainingExample>,
    pub skipped: Vec<SkippedZones>,
}

/// Final example set after filtering
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExampleSet {
    pub examples: Vec<TrainingExample>,
    pub rejected: Vec<RejectedExample>,
    pub skipped: Vec<SkippedZones>,
}

struct Flagged<'a> {
    position: usize,
    turn: Turn,
    text: String,
    zone: &'a Zone,
}

#[derive(Default)]
struct Draft {
    /// Role, merged text and number of zones merged into the turn
    turns: Vec<(Role, String, usize)>,
    zone_ids: Vec<String>,
    confidences: Vec<f64>,
}

impl Draft {
    fn push(&mut self, role: Role, flagged: &Flagged<'_>) {
        match self.turns.last_mut() {
            Some((last_role, content, zones)) if *last_role == role => {
                content.push_str("\n\n");
                content.push_str(&flagged.text);
                *zones += 1;
            }
            _ => self.turns.push((role, flagged.text.clone(), 1)),
        }
        self.zone_ids.push(flagged.zone.id.clone());
        self.confidences.push(flagged.zone.confidence);
    }
}

pub struct ExampleGenerator {
    max_gap: usize,
    filter: QualityFilter,
}

impl ExampleGenerator {
    pub fn new(max_gap: usize, filter: QualityFilter) -> Self {
        Self { max_gap, filter }
    }

    pub fn from_config(config: &ExportConfig) -> Self {
        Self::new(config.max_gap, QualityFilter::from_config(config))
    }

    /// Extract and filter in one pass
    pub fn generate(&self, zones: &[Zone], style: ConversationStyle) -> ExampleSet {
        let extraction = self.extract_with_report(zones, style);
        let outcome = self.filter.apply(extraction.examples);
        ExampleSet {
            examples: outcome.kept,
            rejected: outcome.rejected,
            skipped: extraction.skipped,
        }
    }

    /// Conversations in document order, unfiltered
    pub fn extract_conversations(
        &self,
        zones: &[Zone],
        style: ConversationStyle,
    ) -> Vec<TrainingExample> {
        self.extract_with_report(zones, style).examples
    }

    pub fn extract_with_report(&self, zones: &[Zone], style: ConversationStyle) -> Extraction {
        let mut ordered: Vec<Zone> = zones
            .iter()
            .filter(|z| {
                z.zone_type.is_textual()
                    && z.status != ZoneStatus::Failed
                    && !z.content.trim().is_empty()
            })
            .cloned()
            .collect();
        sort_document_order(&mut ordered);

        let flagged = flag_zones(&ordered, style);

        let mut extraction = Extraction::default();
        let mut group: Vec<&Flagged<'_>> = Vec::new();
        for item in &flagged {
            if let Some(last) = group.last() {
                if item.position - last.position > self.max_gap + 1 {
                    self.close(&mut group, style, &mut extraction);
                }
            }
            group.push(item);
        }
        self.close(&mut group, style, &mut extraction);

        tracing::debug!(
            examples = extraction.examples.len(),
            skipped = extraction.skipped.len(),
            %style,
            "conversations extracted"
        );
        extraction
    }

    fn close(
        &self,
        group: &mut Vec<&Flagged<'_>>,
        style: ConversationStyle,
        extraction: &mut Extraction,
    ) {
        if group.is_empty() {
            return;
        }

        let mut draft = Draft::default();
        let mut dropped: Vec<String> = Vec::new();
        for item in group.iter() {
            match item.turn {
                Turn::Prompt => draft.push(Role::User, item),
                Turn::Response if draft.turns.is_empty() => dropped.push(item.zone.id.clone()),
                Turn::Response => draft.push(Role::Assistant, item),
            }
        }

        if !dropped.is_empty() {
            extraction.skipped.push(SkippedZones {
                zone_ids: dropped,
                reason: "response without a preceding prompt".to_string(),
            });
        }

        if matches!(draft.turns.last(), Some((Role::User, _, _))) {
            let count = draft.turns.pop().map_or(0, |(_, _, zones)| zones);
            let split_at = draft.zone_ids.len().saturating_sub(count);
            let ids = draft.zone_ids.split_off(split_at);
            draft.confidences.truncate(split_at);
            extraction.skipped.push(SkippedZones {
                zone_ids: ids,
                reason: "prompt without a response".to_string(),
            });
        }

        group.clear();

        if draft.turns.is_empty() {
            return;
        }

        let mut messages = Vec::with_capacity(draft.turns.len() + 1);
        if style == ConversationStyle::Instruction {
            messages.push(Message::new(Role::System, INSTRUCTION_PREAMBLE));
        }
        messages.extend(
            draft
                .turns
                .into_iter()
                .map(|(role, content, _)| Message::new(role, content)),
        );

        let quality = if draft.confidences.is_empty() {
            0.0
        } else {
            draft.confidences.iter().sum::<f64>() / draft.confidences.len() as f64
        };

        extraction.examples.push(TrainingExample {
            id: format!("example-{:04}", extraction.examples.len()),
            style,
            messages,
            quality: quality.clamp(0.0, 1.0),
            source_zone_ids: draft.zone_ids,
        });
    }
}

/// Assign a turn to every zone that takes part in a conversation.
///
/// Explicit `role` metadata wins, then textual markers. In either style an
/// unmarked zone directly after a prompt is taken as its response.
fn flag_zones(ordered: &[Zone], style: ConversationStyle) -> Vec<Flagged<'_>> {
    let mut flagged: Vec<Flagged<'_>> = Vec::new();

    for (position, zone) in ordered.iter().enumerate() {
        let classified = classify(zone, style).or_else(|| {
            flagged
                .last()
                .filter(|prev| prev.turn == Turn::Prompt && prev.position + 1 == position)
                .map(|_| (Turn::Response, zone.content.trim().to_string()))
        });

        if let Some((turn, text)) = classified {
            if !text.is_empty() {
                flagged.push(Flagged {
                    position,
                    turn,
                    text,
                    zone,
                });
            }
        }
    }

    flagged
}

fn classify(zone: &Zone, style: ConversationStyle) -> Option<(Turn, String)> {
    let content = zone.content.trim();

    if let Some(role) = zone.metadata.get("role").and_then(|v| v.as_str()) {
        let turn = match role.to_ascii_lowercase().as_str() {
            "question" | "instruction" | "prompt" | "user" => Turn::Prompt,
            "answer" | "response" | "assistant" => Turn::Response,
            _ => return None,
        };
        return Some((turn, strip_marker(content, style).1.to_string()));
    }

    match strip_marker(content, style) {
        (Some(turn), rest) => Some((turn, rest.to_string())),
        (None, _) if style == ConversationStyle::Qa && content.ends_with('?') => {
            Some((Turn::Prompt, content.to_string()))
        }
        _ => None,
    }
}

fn strip_marker(content: &str, style: ConversationStyle) -> (Option<Turn>, &str) {
    let markers: &[(&str, Turn)] = match style {
        ConversationStyle::Qa => &[
            ("question:", Turn::Prompt),
            ("q:", Turn::Prompt),
            ("answer:", Turn::Response),
            ("a:", Turn::Response),
        ],
        ConversationStyle::Instruction => &[
            ("instruction:", Turn::Prompt),
            ("task:", Turn::Prompt),
            ("response:", Turn::Response),
            ("output:", Turn::Response),
        ],
    };

    for (marker, turn) in markers {
        if content.len() >= marker.len()
            && content.is_char_boundary(marker.len())
            && content[..marker.len()].eq_ignore_ascii_case(marker)
        {
            return (Some(*turn), content[marker.len()..].trim());
        }
    }
    (None, content)
}
