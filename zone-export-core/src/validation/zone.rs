//! Zone-set completeness and geometric integrity

use super::{Severity, ValidationContext, ValidationIssue, ValidationResult, Validator};
use crate::config::ExportConfig;
use crate::error::{BoundaryViolationKind, ErrorCode, ExportError};
use crate::geometry::Rectangle;
use crate::zone::{Zone, ZoneStatus, ZoneType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletenessReport {
    pub total_zones: usize,
    pub processed_zones: usize,
    /// `100 * processed / total`, zero for an empty set
    pub completeness_percentage: f64,
    /// Type and area weighted percentage, when weighting is configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weighted_percentage: Option<f64>,
    pub threshold: f64,
    pub is_complete: bool,
    pub by_status: BTreeMap<ZoneStatus, usize>,
    pub missing_types: Vec<ZoneType>,
    pub unprocessed_zone_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlapPair {
    pub first: String,
    pub second: String,
    pub page: u32,
    pub area: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundaryReport {
    pub has_overlaps: bool,
    /// Sum of all pairwise overlap areas
    pub overlap_area: f64,
    pub overlaps: Vec<OverlapPair>,
    pub out_of_bounds: Vec<String>,
    pub isolated: Vec<String>,
}

/// Zone validator output beyond the plain result
#[derive(Debug, Clone)]
pub struct ZoneAssessment {
    pub completeness: CompletenessReport,
    pub boundaries: BoundaryReport,
    pub result: ValidationResult,
}

#[derive(Debug, Clone)]
pub struct ZoneValidator {
    pub minimum_processed_percentage: f64,
    pub required_types: Vec<ZoneType>,
    pub area_weighted: bool,
    pub type_weights: BTreeMap<ZoneType, f64>,
    /// Zones farther than this from every other zone on their page are isolated
    pub connectivity_distance: f64,
    /// Overlap areas up to this value are ignored
    pub overlap_tolerance: f64,
}

impl Default for ZoneValidator {
    fn default() -> Self {
        Self::from_config(&ExportConfig::default())
    }
}

impl ZoneValidator {
    pub fn from_config(config: &ExportConfig) -> Self {
        Self {
            minimum_processed_percentage: config.minimum_processed_percentage,
            required_types: config.required_zone_types.clone(),
            area_weighted: config.area_weighted,
            type_weights: config.type_weights.clone(),
            connectivity_distance: config.connectivity_distance,
            overlap_tolerance: config.overlap_tolerance,
        }
    }

    pub fn completeness(&self, zones: &[Zone]) -> CompletenessReport {
        let total = zones.len();
        let processed = zones.iter().filter(|z| z.is_processed()).count();
        let percentage = if total == 0 {
            0.0
        } else {
            100.0 * processed as f64 / total as f64
        };

        let weighted = (self.area_weighted || !self.type_weights.is_empty()).then(|| {
            let weight = |z: &Zone| {
                let type_weight = self.type_weights.get(&z.zone_type).copied().unwrap_or(1.0);
                let area = if self.area_weighted { z.coordinates.area() } else { 1.0 };
                type_weight * area
            };
            let all: f64 = zones.iter().map(weight).sum();
            let done: f64 = zones.iter().filter(|z| z.is_processed()).map(weight).sum();
            if all > 0.0 {
                100.0 * done / all
            } else {
                0.0
            }
        });

        let mut by_status = BTreeMap::new();
        for zone in zones {
            *by_status.entry(zone.status).or_insert(0) += 1;
        }

        let missing_types = self
            .required_types
            .iter()
            .copied()
            .filter(|t| !zones.iter().any(|z| z.zone_type == *t && z.is_processed()))
            .collect();

        CompletenessReport {
            total_zones: total,
            processed_zones: processed,
            completeness_percentage: percentage,
            weighted_percentage: weighted,
            threshold: self.minimum_processed_percentage,
            is_complete: total > 0
                && weighted.unwrap_or(percentage) >= self.minimum_processed_percentage,
            by_status,
            missing_types,
            unprocessed_zone_ids: zones
                .iter()
                .filter(|z| !z.is_processed())
                .map(|z| z.id.clone())
                .collect(),
        }
    }

    pub fn boundaries(&self, zones: &[Zone]) -> BoundaryReport {
        let mut pages: BTreeMap<u32, Vec<(&Zone, Rectangle)>> = BTreeMap::new();
        for zone in zones {
            pages
                .entry(zone.page)
                .or_default()
                .push((zone, zone.coordinates.bounds()));
        }

        let mut report = BoundaryReport::default();
        for (page, members) in &pages {
            for (i, (a, a_bounds)) in members.iter().enumerate() {
                for (b, b_bounds) in &members[i + 1..] {
                    let area = a_bounds.intersection_area(b_bounds);
                    if area > self.overlap_tolerance {
                        report.overlap_area += area;
                        report.overlaps.push(OverlapPair {
                            first: a.id.clone(),
                            second: b.id.clone(),
                            page: *page,
                            area,
                        });
                    }
                }

                if let (Some(w), Some(h)) = (a.coordinates.page_width, a.coordinates.page_height) {
                    let page_rect = Rectangle::from_position_and_size(0.0, 0.0, w, h);
                    if !page_rect.contains(a_bounds) {
                        report.out_of_bounds.push(a.id.clone());
                    }
                }

                if members.len() > 1 {
                    let nearest = members
                        .iter()
                        .enumerate()
                        .filter(|(j, _)| *j != i)
                        .map(|(_, (_, other))| a_bounds.gap_to(other))
                        .fold(f64::INFINITY, f64::min);
                    if nearest > self.connectivity_distance {
                        report.isolated.push(a.id.clone());
                    }
                }
            }
        }
        report.has_overlaps = !report.overlaps.is_empty();
        report
    }

    pub fn assess(&self, ctx: &ValidationContext<'_>) -> ZoneAssessment {
        let completeness = self.completeness(ctx.zones);
        let boundaries = self.boundaries(ctx.zones);
        let mut issues = Vec::new();

        if !completeness.is_complete {
            let effective = completeness
                .weighted_percentage
                .unwrap_or(completeness.completeness_percentage);
            issues.push(ValidationIssue::new(
                ErrorCode::ZoneIncomplete,
                "zones",
                format!(
                    "{effective:.1}% of zones processed, {:.1}% required",
                    completeness.threshold
                ),
            ));
        }
        for zone_type in &completeness.missing_types {
            issues.push(ValidationIssue::new(
                ErrorCode::MissingZoneType,
                "zones",
                format!("no processed zone of required type '{zone_type}'"),
            ));
        }

        for pair in &boundaries.overlaps {
            let mut issue = boundary_issue(&pair.first, BoundaryViolationKind::Overlap);
            issue.message = format!(
                "zone {} overlaps zone {} on page {} by {:.1}",
                pair.first, pair.second, pair.page, pair.area
            );
            issues.push(issue);
        }
        for zone_id in &boundaries.out_of_bounds {
            issues.push(boundary_issue(zone_id, BoundaryViolationKind::OutOfBounds));
        }
        for zone_id in &boundaries.isolated {
            issues.push(
                boundary_issue(zone_id, BoundaryViolationKind::Isolated)
                    .with_severity(Severity::Warning),
            );
        }

        ZoneAssessment {
            completeness,
            boundaries,
            result: ValidationResult::from_issues(issues),
        }
    }
}

fn boundary_issue(zone_id: &str, kind: BoundaryViolationKind) -> ValidationIssue {
    ValidationIssue::from_error(&ExportError::ZoneBoundaryViolation {
        zone_id: zone_id.to_string(),
        kind,
    })
}

impl Validator for ZoneValidator {
    fn name(&self) -> &'static str {
        "zone"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        self.assess(ctx).result
    }
}
