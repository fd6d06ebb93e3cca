//! Selection of zones and pages for partial export
//!
//! A selection holds zone-level and page-level entries. A page entry covers
//! every zone on its page, so the engine never lets an explicit zone entry
//! coexist with an entry for its enclosing page. Every mutation that changes
//! the set can be undone, up to a bounded depth.
//!
//! ```rust
//! use zone_export::selection::{ConflictType, SelectionEngine, SelectionOutcome};
//! use zone_export::{Zone, ZoneCoordinates, ZoneType};
//!
//! let zones = vec![
//!     Zone::new("z1", 1, ZoneCoordinates::new(0.0, 0.0, 10.0, 10.0), ZoneType::Text),
//!     Zone::new("z2", 1, ZoneCoordinates::new(0.0, 20.0, 10.0, 10.0), ZoneType::Text),
//! ];
//! let mut engine = SelectionEngine::new(&zones);
//! engine.select_page(1);
//! match engine.add_item("z2") {
//!     SelectionOutcome::Conflict(c) => {
//!         assert_eq!(c.conflict_type, ConflictType::AlreadyInPageSelection)
//!     }
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```

pub mod partial;

pub use partial::{ContextZone, PartialExport, PartialExportEngine, Placeholder};

use crate::config::ExportConfig;
use crate::error::{ExportError, Result};
use crate::zone::{Zone, ZoneType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::str::FromStr;

/// One entry of a selection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum SelectionItem {
    #[serde(rename_all = "camelCase")]
    Zone { zone_id: String, page: u32 },
    Page { page: u32 },
}

impl SelectionItem {
    pub fn page(&self) -> u32 {
        match self {
            SelectionItem::Zone { page, .. } | SelectionItem::Page { page } => *page,
        }
    }
}

impl fmt::Display for SelectionItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionItem::Zone { zone_id, .. } => write!(f, "zone {zone_id}"),
            SelectionItem::Page { page } => write!(f, "page {page}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// The zone is already covered by its page entry
    AlreadyInPageSelection,
    DuplicateSelection,
    UnknownZone,
    UnknownPage,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::AlreadyInPageSelection => "already_in_page_selection",
            ConflictType::DuplicateSelection => "duplicate_selection",
            ConflictType::UnknownZone => "unknown_zone",
            ConflictType::UnknownPage => "unknown_page",
        }
    }
}

/// Why a mutation was refused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub conflict_type: ConflictType,
    pub requested: SelectionItem,
    /// Entry that already covers the request
    pub existing: Option<SelectionItem>,
    pub message: String,
}

/// Result of a selection mutation
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionOutcome {
    /// The set changed; `replaced` lists entries that were folded into the new one
    Applied { replaced: Vec<SelectionItem> },
    Conflict(Conflict),
    /// Nothing to do
    Unchanged,
}

impl SelectionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, SelectionOutcome::Applied { .. })
    }

    pub fn conflict(&self) -> Option<&Conflict> {
        match self {
            SelectionOutcome::Conflict(c) => Some(c),
            _ => None,
        }
    }
}

/// Serializable state of an engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectionState {
    pub items: Vec<SelectionItem>,
    pub undo: Vec<Vec<SelectionItem>>,
    pub redo: Vec<Vec<SelectionItem>>,
    pub max_undo_depth: usize,
}

impl Default for SelectionState {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            undo: Vec::new(),
            redo: Vec::new(),
            max_undo_depth: DEFAULT_UNDO_DEPTH,
        }
    }
}

/// Zone ids and pages known to the engine, in document order
#[derive(Debug, Clone, Default)]
struct Catalog {
    zones: Vec<(String, u32)>,
}

impl Catalog {
    fn new(zones: &[Zone]) -> Self {
        let mut sorted: Vec<&Zone> = zones.iter().collect();
        sorted.sort_by(|a, b| a.document_order(b));
        Self {
            zones: sorted.iter().map(|z| (z.id.clone(), z.page)).collect(),
        }
    }

    fn page_of(&self, zone_id: &str) -> Option<u32> {
        self.zones
            .iter()
            .find(|(id, _)| id == zone_id)
            .map(|(_, page)| *page)
    }

    fn has_page(&self, page: u32) -> bool {
        self.zones.iter().any(|(_, p)| *p == page)
    }

    fn zones_on(&self, page: u32) -> impl Iterator<Item = &str> {
        self.zones
            .iter()
            .filter(move |(_, p)| *p == page)
            .map(|(id, _)| id.as_str())
    }
}

/// Single-session selection state machine
#[derive(Debug, Clone)]
pub struct SelectionEngine {
    catalog: Catalog,
    items: Vec<SelectionItem>,
    undo: VecDeque<Vec<SelectionItem>>,
    redo: Vec<Vec<SelectionItem>>,
    max_undo_depth: usize,
}

const DEFAULT_UNDO_DEPTH: usize = 50;

impl SelectionEngine {
    pub fn new(zones: &[Zone]) -> Self {
        Self {
            catalog: Catalog::new(zones),
            items: Vec::new(),
            undo: VecDeque::new(),
            redo: Vec::new(),
            max_undo_depth: DEFAULT_UNDO_DEPTH,
        }
    }

    /// Engine whose undo history is bounded by `maxUndoDepth`
    pub fn from_config(zones: &[Zone], config: &ExportConfig) -> Self {
        Self::new(zones).with_max_undo_depth(config.max_undo_depth)
    }

    pub fn with_max_undo_depth(mut self, depth: usize) -> Self {
        self.max_undo_depth = depth;
        while self.undo.len() > depth {
            self.undo.pop_front();
        }
        self
    }

    /// Select every zone matching the criteria, zone by zone
    pub fn from_criteria(zones: &[Zone], criteria: &SelectionCriteria) -> Self {
        let mut engine = Self::new(zones);
        let mut sorted: Vec<&Zone> = zones.iter().filter(|z| criteria.matches(z)).collect();
        sorted.sort_by(|a, b| a.document_order(b));
        engine.items = sorted
            .into_iter()
            .map(|z| SelectionItem::Zone {
                zone_id: z.id.clone(),
                page: z.page,
            })
            .collect();
        engine
    }

    pub fn items(&self) -> &[SelectionItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn is_selected(&self, zone_id: &str) -> bool {
        self.items.iter().any(|item| match item {
            SelectionItem::Zone { zone_id: id, .. } => id == zone_id,
            SelectionItem::Page { page } => self.catalog.page_of(zone_id) == Some(*page),
        })
    }

    /// Ids of every covered zone, in document order
    pub fn selected_zone_ids(&self) -> Vec<String> {
        self.catalog
            .zones
            .iter()
            .filter(|(id, _)| self.is_selected(id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn page_entry(&self, page: u32) -> Option<&SelectionItem> {
        self.items
            .iter()
            .find(|item| matches!(item, SelectionItem::Page { page: p } if *p == page))
    }

    fn checkpoint(&mut self) {
        if self.max_undo_depth == 0 {
            return;
        }
        if self.undo.len() == self.max_undo_depth {
            self.undo.pop_front();
        }
        self.undo.push_back(self.items.clone());
        self.redo.clear();
    }

    fn conflict(
        conflict_type: ConflictType,
        requested: SelectionItem,
        existing: Option<SelectionItem>,
    ) -> SelectionOutcome {
        let message = match &existing {
            Some(existing) => format!("{requested} is already covered by {existing}"),
            None => format!("{requested} cannot be selected ({})", conflict_type.as_str()),
        };
        tracing::debug!(conflict = conflict_type.as_str(), %requested, "selection conflict");
        SelectionOutcome::Conflict(Conflict {
            conflict_type,
            requested,
            existing,
            message,
        })
    }

    pub fn add_item(&mut self, zone_id: &str) -> SelectionOutcome {
        let Some(page) = self.catalog.page_of(zone_id) else {
            let requested = SelectionItem::Zone {
                zone_id: zone_id.to_string(),
                page: 0,
            };
            return Self::conflict(ConflictType::UnknownZone, requested, None);
        };
        let requested = SelectionItem::Zone {
            zone_id: zone_id.to_string(),
            page,
        };
        if let Some(existing) = self.page_entry(page).cloned() {
            return Self::conflict(ConflictType::AlreadyInPageSelection, requested, Some(existing));
        }
        if self.items.contains(&requested) {
            return Self::conflict(
                ConflictType::DuplicateSelection,
                requested.clone(),
                Some(requested),
            );
        }
        self.checkpoint();
        self.items.push(requested);
        SelectionOutcome::Applied {
            replaced: Vec::new(),
        }
    }

    /// Deselect one zone; removing a zone covered by a page entry splits
    /// that entry into the page's remaining zones
    pub fn remove_item(&mut self, zone_id: &str) -> SelectionOutcome {
        let explicit = self
            .items
            .iter()
            .position(|item| matches!(item, SelectionItem::Zone { zone_id: id, .. } if id == zone_id));
        if let Some(position) = explicit {
            self.checkpoint();
            self.items.remove(position);
            return SelectionOutcome::Applied {
                replaced: Vec::new(),
            };
        }

        let Some(page) = self.catalog.page_of(zone_id) else {
            return SelectionOutcome::Unchanged;
        };
        let Some(page_item) = self.page_entry(page).cloned() else {
            return SelectionOutcome::Unchanged;
        };

        self.checkpoint();
        let remaining: Vec<SelectionItem> = self
            .catalog
            .zones_on(page)
            .filter(|id| *id != zone_id)
            .map(|id| SelectionItem::Zone {
                zone_id: id.to_string(),
                page,
            })
            .collect();
        self.items.retain(|item| item != &page_item);
        self.items.extend(remaining);
        SelectionOutcome::Applied {
            replaced: vec![page_item],
        }
    }

    /// Select a whole page, folding any zone entries of that page into it
    pub fn select_page(&mut self, page: u32) -> SelectionOutcome {
        let requested = SelectionItem::Page { page };
        if !self.catalog.has_page(page) {
            return Self::conflict(ConflictType::UnknownPage, requested, None);
        }
        if self.page_entry(page).is_some() {
            return Self::conflict(
                ConflictType::DuplicateSelection,
                requested.clone(),
                Some(requested),
            );
        }

        self.checkpoint();
        let (replaced, kept): (Vec<_>, Vec<_>) = self
            .items
            .drain(..)
            .partition(|item| matches!(item, SelectionItem::Zone { page: p, .. } if *p == page));
        self.items = kept;
        self.items.push(requested);
        SelectionOutcome::Applied { replaced }
    }

    pub fn deselect_page(&mut self, page: u32) -> SelectionOutcome {
        let before = self.items.len();
        let remaining: Vec<SelectionItem> = self
            .items
            .iter()
            .filter(|item| item.page() != page)
            .cloned()
            .collect();
        if remaining.len() == before {
            return SelectionOutcome::Unchanged;
        }
        self.checkpoint();
        let replaced = self
            .items
            .iter()
            .filter(|item| item.page() == page)
            .cloned()
            .collect();
        self.items = remaining;
        SelectionOutcome::Applied { replaced }
    }

    /// Select exactly the zones that are currently not covered
    pub fn invert_selection(&mut self) -> SelectionOutcome {
        let inverted: Vec<SelectionItem> = self
            .catalog
            .zones
            .iter()
            .filter(|(id, _)| !self.is_selected(id))
            .map(|(id, page)| SelectionItem::Zone {
                zone_id: id.clone(),
                page: *page,
            })
            .collect();
        if inverted == self.items {
            return SelectionOutcome::Unchanged;
        }
        self.checkpoint();
        let replaced = std::mem::replace(&mut self.items, inverted);
        SelectionOutcome::Applied { replaced }
    }

    pub fn clear(&mut self) -> SelectionOutcome {
        if self.items.is_empty() {
            return SelectionOutcome::Unchanged;
        }
        self.checkpoint();
        let replaced = std::mem::take(&mut self.items);
        SelectionOutcome::Applied { replaced }
    }

    pub fn undo(&mut self) -> bool {
        match self.undo.pop_back() {
            Some(previous) => {
                let current = std::mem::replace(&mut self.items, previous);
                self.redo.push(current);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.redo.pop() {
            Some(next) => {
                let current = std::mem::replace(&mut self.items, next);
                self.undo.push_back(current);
                true
            }
            None => false,
        }
    }

    pub fn state(&self) -> SelectionState {
        SelectionState {
            items: self.items.clone(),
            undo: self.undo.iter().cloned().collect(),
            redo: self.redo.clone(),
            max_undo_depth: self.max_undo_depth,
        }
    }

    pub fn save_state(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.state())?)
    }

    /// Resume a saved session against the document's zones
    ///
    /// The current items and every undo/redo snapshot must satisfy the same
    /// rules the mutations enforce. A zone or page the document no longer has
    /// is a reference integrity error; a zone recorded on the wrong page, a
    /// zone entry under its own page entry, or a repeated entry is rejected
    /// as an invalid state.
    pub fn restore(zones: &[Zone], json: &str) -> Result<Self> {
        let state: SelectionState = serde_json::from_str(json)?;
        if state.max_undo_depth == 0 {
            return Err(ExportError::InvalidConfiguration(
                "saved selection has maxUndoDepth 0".to_string(),
            ));
        }

        let mut engine = Self::new(zones);
        engine.check_snapshot(&state.items, "items")?;
        for (i, snapshot) in state.undo.iter().enumerate() {
            engine.check_snapshot(snapshot, &format!("undo[{i}]"))?;
        }
        for (i, snapshot) in state.redo.iter().enumerate() {
            engine.check_snapshot(snapshot, &format!("redo[{i}]"))?;
        }

        engine.items = state.items;
        engine.undo = state.undo.into_iter().collect();
        engine.redo = state.redo;
        Ok(engine.with_max_undo_depth(state.max_undo_depth))
    }

    fn check_snapshot(&self, items: &[SelectionItem], label: &str) -> Result<()> {
        let whole_pages: BTreeSet<u32> = items
            .iter()
            .filter_map(|item| match item {
                SelectionItem::Page { page } => Some(*page),
                SelectionItem::Zone { .. } => None,
            })
            .collect();
        let invalid = |reason: String| ExportError::InvalidConfiguration(format!("{label}: {reason}"));

        let mut seen = BTreeSet::new();
        for item in items {
            match item {
                SelectionItem::Zone { zone_id, page } => {
                    let Some(actual) = self.catalog.page_of(zone_id) else {
                        return Err(ExportError::ReferenceIntegrity {
                            dangling_id: item.to_string(),
                        });
                    };
                    if actual != *page {
                        return Err(invalid(format!(
                            "{item} is recorded on page {page} but lies on page {actual}"
                        )));
                    }
                    if whole_pages.contains(page) {
                        return Err(invalid(format!("{item} is already covered by page {page}")));
                    }
                }
                SelectionItem::Page { page } => {
                    if !self.catalog.has_page(*page) {
                        return Err(ExportError::ReferenceIntegrity {
                            dangling_id: item.to_string(),
                        });
                    }
                }
            }
            if !seen.insert(item) {
                return Err(invalid(format!("{item} is selected twice")));
            }
        }
        Ok(())
    }
}

/// Inclusive page range such as `2-5`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

impl PageRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, page: u32) -> bool {
        (self.start..=self.end).contains(&page)
    }
}

impl FromStr for PageRange {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |part: &str| {
            part.trim().parse::<u32>().map_err(|_| {
                ExportError::InvalidConfiguration(format!("invalid page range '{s}'"))
            })
        };
        let range = match s.split_once('-') {
            Some((start, end)) => PageRange::new(parse(start)?, parse(end)?),
            None => {
                let page = parse(s)?;
                PageRange::new(page, page)
            }
        };
        if range.start == 0 || range.start > range.end {
            return Err(ExportError::InvalidConfiguration(format!(
                "invalid page range '{s}'"
            )));
        }
        Ok(range)
    }
}

/// Filter applied before partial export; empty criteria match everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectionCriteria {
    pub zone_ids: Vec<String>,
    pub zone_types: Vec<ZoneType>,
    pub page_ranges: Vec<PageRange>,
    pub min_confidence: Option<f64>,
}

impl SelectionCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_zone_ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.zone_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_zone_types(mut self, types: impl IntoIterator<Item = ZoneType>) -> Self {
        self.zone_types.extend(types);
        self
    }

    pub fn with_page_range(mut self, range: PageRange) -> Self {
        self.page_ranges.push(range);
        self
    }

    pub fn with_min_confidence(mut self, confidence: f64) -> Self {
        self.min_confidence = Some(confidence);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.zone_ids.is_empty()
            && self.zone_types.is_empty()
            && self.page_ranges.is_empty()
            && self.min_confidence.is_none()
    }

    pub fn matches(&self, zone: &Zone) -> bool {
        (self.zone_ids.is_empty() || self.zone_ids.iter().any(|id| id == &zone.id))
            && (self.zone_types.is_empty() || self.zone_types.contains(&zone.zone_type))
            && (self.page_ranges.is_empty() || self.page_ranges.iter().any(|r| r.contains(zone.page)))
            && self.min_confidence.map_or(true, |min| zone.confidence >= min)
    }

    /// Requested ids that are not in the zone set
    pub fn unknown_ids(&self, zones: &[Zone]) -> Vec<String> {
        let known: BTreeSet<&str> = zones.iter().map(|z| z.id.as_str()).collect();
        self.zone_ids
            .iter()
            .filter(|id| !known.contains(id.as_str()))
            .cloned()
            .collect()
    }
}
