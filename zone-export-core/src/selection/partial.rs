//! Export of a restricted selection
//!
//! Nothing is dropped silently: references from included zones to excluded
//! zones become placeholders, references to zones that do not exist become
//! reference integrity issues, and structurally incomplete selections raise
//! warnings.

use super::SelectionEngine;
use crate::config::ExportConfig;
use crate::error::ErrorCode;
use crate::validation::ValidationIssue;
use crate::zone::{Zone, ZoneType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Stand-in for an excluded zone that an included zone refers to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placeholder {
    pub zone_id: String,
    pub page: u32,
    pub zone_type: ZoneType,
    pub referenced_by: Vec<String>,
    pub note: String,
}

/// Unselected neighbour carried along for context; never exported as content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextZone {
    pub zone: Zone,
    /// Selected zone this context belongs to
    pub anchor: String,
    pub read_only: bool,
}

/// Outcome of a partial export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialExport {
    /// Selected zones in document order
    pub included: Vec<Zone>,
    pub excluded_ids: Vec<String>,
    pub placeholders: Vec<Placeholder>,
    pub context: Vec<ContextZone>,
    /// Incomplete structures and dangling references
    pub issues: Vec<ValidationIssue>,
}

impl PartialExport {
    pub fn included_ids(&self) -> Vec<&str> {
        self.included.iter().map(|z| z.id.as_str()).collect()
    }

    pub fn placeholder(&self, zone_id: &str) -> Option<&Placeholder> {
        self.placeholders.iter().find(|p| p.zone_id == zone_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PartialExportEngine {
    pub include_context: bool,
    /// Neighbours taken on each side of a selected zone
    pub context_size: usize,
}

impl PartialExportEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ExportConfig) -> Self {
        Self {
            include_context: config.include_context,
            context_size: config.context_size,
        }
    }

    pub fn with_context(mut self, size: usize) -> Self {
        self.include_context = true;
        self.context_size = size;
        self
    }

    pub fn export(&self, zones: &[Zone], selection: &SelectionEngine) -> PartialExport {
        let selected: BTreeSet<String> = selection.selected_zone_ids().into_iter().collect();
        self.export_ids(zones, &selected)
    }

    pub fn export_ids(&self, zones: &[Zone], selected: &BTreeSet<String>) -> PartialExport {
        let mut ordered: Vec<&Zone> = zones.iter().collect();
        ordered.sort_by(|a, b| a.document_order(b));
        let by_id: HashMap<&str, &Zone> = ordered.iter().map(|z| (z.id.as_str(), *z)).collect();

        let included: Vec<Zone> = ordered
            .iter()
            .filter(|z| selected.contains(&z.id))
            .map(|z| (*z).clone())
            .collect();
        let excluded_ids: Vec<String> = ordered
            .iter()
            .filter(|z| !selected.contains(&z.id))
            .map(|z| z.id.clone())
            .collect();

        let mut issues = Vec::new();
        let mut referenced: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for zone in &included {
            for related in &zone.related_zone_ids {
                match by_id.get(related.as_str()) {
                    Some(_) if selected.contains(related) => {}
                    Some(target) => referenced
                        .entry(target.id.as_str())
                        .or_default()
                        .push(zone.id.clone()),
                    None => issues.push(
                        ValidationIssue::new(
                            ErrorCode::ReferenceIntegrity,
                            "relatedZoneIds",
                            format!("zone {} references missing zone {related}", zone.id),
                        )
                        .with_zone(zone.id.clone()),
                    ),
                }
            }
        }

        let placeholders: Vec<Placeholder> = ordered
            .iter()
            .filter_map(|z| {
                referenced.remove(z.id.as_str()).map(|referenced_by| Placeholder {
                    zone_id: z.id.clone(),
                    page: z.page,
                    zone_type: z.zone_type,
                    referenced_by,
                    note: format!("{} zone {} not included in this export", z.zone_type.as_str(), z.id),
                })
            })
            .collect();

        issues.extend(structural_gaps(&ordered, selected));

        let context = if self.include_context && self.context_size > 0 {
            self.context_window(&ordered, selected)
        } else {
            Vec::new()
        };

        tracing::debug!(
            included = included.len(),
            excluded = excluded_ids.len(),
            placeholders = placeholders.len(),
            context = context.len(),
            issues = issues.len(),
            "partial export assembled"
        );

        PartialExport {
            included,
            excluded_ids,
            placeholders,
            context,
            issues,
        }
    }

    /// Up to `context_size` unselected zones on each side of every selected
    /// zone, each attached to the first anchor that reaches it
    fn context_window(&self, ordered: &[&Zone], selected: &BTreeSet<String>) -> Vec<ContextZone> {
        let mut taken: BTreeSet<usize> = BTreeSet::new();
        let mut context = Vec::new();
        for (i, zone) in ordered.iter().enumerate() {
            if !selected.contains(&zone.id) {
                continue;
            }
            let lo = i.saturating_sub(self.context_size);
            let hi = (i + self.context_size).min(ordered.len().saturating_sub(1));
            for j in lo..=hi {
                let neighbour = ordered[j];
                if j == i || selected.contains(&neighbour.id) || !taken.insert(j) {
                    continue;
                }
                context.push((
                    j,
                    ContextZone {
                        zone: neighbour.clone(),
                        anchor: zone.id.clone(),
                        read_only: true,
                    },
                ));
            }
        }
        context.sort_by_key(|(j, _)| *j);
        context.into_iter().map(|(_, c)| c).collect()
    }
}

/// Warnings for selected zones whose structural partner is excluded
fn structural_gaps(ordered: &[&Zone], selected: &BTreeSet<String>) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for (i, zone) in ordered.iter().enumerate() {
        if !selected.contains(&zone.id) {
            continue;
        }

        match zone.zone_type {
            // A header introduces the zone after it on the same page
            ZoneType::Header => {
                if let Some(next) = ordered.get(i + 1) {
                    if next.page == zone.page && !selected.contains(&next.id) {
                        issues.push(
                            ValidationIssue::new(
                                ErrorCode::IncompleteSelection,
                                "selection",
                                format!("header {} is selected without its body {}", zone.id, next.id),
                            )
                            .with_zone(zone.id.clone()),
                        );
                    }
                }
            }
            // A table split across zones links its parts through related ids
            ZoneType::Table => {
                for related in &zone.related_zone_ids {
                    let part = ordered
                        .iter()
                        .find(|z| &z.id == related && z.zone_type == ZoneType::Table);
                    if let Some(part) = part {
                        if !selected.contains(&part.id) {
                            issues.push(
                                ValidationIssue::new(
                                    ErrorCode::IncompleteSelection,
                                    "selection",
                                    format!("table {} is selected without its part {}", zone.id, part.id),
                                )
                                .with_zone(zone.id.clone()),
                            );
                        }
                    }
                }
            }
            _ => {}
        }
    }
    issues
}
