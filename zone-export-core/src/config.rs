//! Export configuration
//!
//! All recognized options live in one serde struct with camelCase keys.
//! Missing keys take their defaults, so partial JSON files are valid.

use crate::batch::default_parallelism;
use crate::error::{ExportError, Result};
use crate::manifest::DetailLevel;
use crate::report::LogFormat;
use crate::training::{ConversationStyle, SimilarityKind};
use crate::validation::ValidationLevel;
use crate::zone::ZoneType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Options controlling every phase of an export run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportConfig {
    // Chunking
    pub chunk_size: usize,
    pub overlap_percentage: f64,
    pub respect_semantic_boundaries: bool,
    pub normalize_whitespace: bool,
    /// Keep line breaks and indentation of prose zones
    pub preserve_formatting: bool,
    /// Join consecutive text zones of a page before chunking
    pub merge_text_zones: bool,
    pub memory_limit_bytes: usize,
    pub continue_on_error: bool,
    pub max_zone_failures: Option<usize>,

    // Training examples
    pub conversation_style: ConversationStyle,
    pub quality_threshold: f64,
    pub min_length: usize,
    pub balance_ratio: f64,
    pub diversity_score: f64,
    pub similarity_metric: SimilarityKind,
    pub max_gap: usize,

    // Manifest and log
    pub detail_level: DetailLevel,
    pub log_format: LogFormat,
    pub positional_map: bool,
    pub include_confidence: bool,
    pub include_timestamps: bool,
    pub include_processing_info: bool,

    // Validation
    pub validation_level: ValidationLevel,
    pub required_zone_types: Vec<ZoneType>,
    pub minimum_processed_percentage: f64,
    pub area_weighted: bool,
    pub type_weights: BTreeMap<ZoneType, f64>,
    pub max_critical_errors: usize,
    pub max_total_errors: usize,
    pub error_rate_threshold: f64,
    pub connectivity_distance: f64,
    pub overlap_tolerance: f64,
    pub strict_ascii: bool,
    /// Regex each zone of the given type must match
    pub content_patterns: BTreeMap<ZoneType, String>,

    // Selection and partial export
    pub include_context: bool,
    pub context_size: usize,
    pub max_undo_depth: usize,

    // Run control
    pub anonymize_actors: bool,
    pub worker_count: usize,
    pub phase_timeout_ms: Option<u64>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap_percentage: 10.0,
            respect_semantic_boundaries: true,
            normalize_whitespace: false,
            preserve_formatting: true,
            merge_text_zones: false,
            memory_limit_bytes: 64 * 1024 * 1024,
            continue_on_error: true,
            max_zone_failures: None,

            conversation_style: ConversationStyle::Qa,
            quality_threshold: 0.5,
            min_length: 10,
            balance_ratio: 0.2,
            diversity_score: 0.85,
            similarity_metric: SimilarityKind::TokenJaccard,
            max_gap: 2,

            detail_level: DetailLevel::Detailed,
            log_format: LogFormat::Markdown,
            positional_map: false,
            include_confidence: true,
            include_timestamps: true,
            include_processing_info: true,

            validation_level: ValidationLevel::Basic,
            required_zone_types: Vec::new(),
            minimum_processed_percentage: 100.0,
            area_weighted: false,
            type_weights: BTreeMap::new(),
            max_critical_errors: 0,
            max_total_errors: 50,
            error_rate_threshold: 0.25,
            connectivity_distance: 50.0,
            overlap_tolerance: 0.0,
            strict_ascii: false,
            content_patterns: BTreeMap::new(),

            include_context: false,
            context_size: 1,
            max_undo_depth: 50,

            anonymize_actors: false,
            worker_count: default_parallelism(),
            phase_timeout_ms: None,
        }
    }
}

impl ExportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration file; absent keys keep their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_overlap_percentage(mut self, percentage: f64) -> Self {
        self.overlap_percentage = percentage;
        self
    }

    pub fn with_semantic_boundaries(mut self, respect: bool) -> Self {
        self.respect_semantic_boundaries = respect;
        self
    }

    pub fn with_preserved_formatting(mut self, preserve: bool) -> Self {
        self.preserve_formatting = preserve;
        self
    }

    pub fn with_merged_text_zones(mut self, merge: bool) -> Self {
        self.merge_text_zones = merge;
        self
    }

    pub fn with_conversation_style(mut self, style: ConversationStyle) -> Self {
        self.conversation_style = style;
        self
    }

    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold;
        self
    }

    pub fn with_detail_level(mut self, level: DetailLevel) -> Self {
        self.detail_level = level;
        self
    }

    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    pub fn with_validation_level(mut self, level: ValidationLevel) -> Self {
        self.validation_level = level;
        self
    }

    pub fn with_required_zone_types(mut self, types: Vec<ZoneType>) -> Self {
        self.required_zone_types = types;
        self
    }

    pub fn with_minimum_processed_percentage(mut self, percentage: f64) -> Self {
        self.minimum_processed_percentage = percentage;
        self
    }

    pub fn with_error_thresholds(
        mut self,
        max_critical: usize,
        max_total: usize,
        error_rate: f64,
    ) -> Self {
        self.max_critical_errors = max_critical;
        self.max_total_errors = max_total;
        self.error_rate_threshold = error_rate;
        self
    }

    pub fn with_context(mut self, size: usize) -> Self {
        self.include_context = size > 0;
        self.context_size = size;
        self
    }

    pub fn with_max_undo_depth(mut self, depth: usize) -> Self {
        self.max_undo_depth = depth;
        self
    }

    pub fn with_anonymized_actors(mut self, anonymize: bool) -> Self {
        self.anonymize_actors = anonymize;
        self
    }

    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    pub fn with_phase_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.phase_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_max_zone_failures(mut self, limit: usize) -> Self {
        self.max_zone_failures = Some(limit);
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn with_strict_ascii(mut self, strict: bool) -> Self {
        self.strict_ascii = strict;
        self
    }

    pub fn with_content_pattern(mut self, zone_type: ZoneType, pattern: impl Into<String>) -> Self {
        self.content_patterns.insert(zone_type, pattern.into());
        self
    }

    pub fn with_positional_map(mut self, enabled: bool) -> Self {
        self.positional_map = enabled;
        self
    }

    /// Number of characters shared between consecutive chunks, rounded
    /// to the nearest character
    pub fn overlap_chars(&self) -> usize {
        ((self.chunk_size as f64) * self.overlap_percentage / 100.0).round() as usize
    }

    pub fn validate(&self) -> Result<()> {
        fn invalid(message: impl Into<String>) -> Result<()> {
            Err(ExportError::InvalidConfiguration(message.into()))
        }

        if self.chunk_size == 0 {
            return invalid("chunkSize must be greater than zero");
        }
        if !(0.0..100.0).contains(&self.overlap_percentage) {
            return invalid(format!(
                "overlapPercentage must be in [0, 100), got {}",
                self.overlap_percentage
            ));
        }
        for (name, value) in [
            ("qualityThreshold", self.quality_threshold),
            ("diversityScore", self.diversity_score),
            ("errorRateThreshold", self.error_rate_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} must be in [0, 1], got {value}"));
            }
        }
        if self.balance_ratio < 0.0 {
            return invalid("balanceRatio must not be negative");
        }
        if !(0.0..=100.0).contains(&self.minimum_processed_percentage) {
            return invalid("minimumProcessedPercentage must be in [0, 100]");
        }
        if self.connectivity_distance < 0.0 || self.overlap_tolerance < 0.0 {
            return invalid("connectivityDistance and overlapTolerance must not be negative");
        }
        if self.type_weights.values().any(|w| *w < 0.0) {
            return invalid("typeWeights must not be negative");
        }
        for (zone_type, pattern) in &self.content_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                return invalid(format!("contentPatterns.{zone_type}: {e}"));
            }
        }
        if self.worker_count == 0 {
            return invalid("workerCount must be at least 1");
        }
        if self.memory_limit_bytes == 0 {
            return invalid("memoryLimitBytes must be greater than zero");
        }
        if self.max_undo_depth == 0 {
            return invalid("maxUndoDepth must be at least 1");
        }
        if self.overlap_chars() >= self.chunk_size {
            return invalid(format!(
                "an overlap of {}% leaves no room in a {}-character chunk",
                self.overlap_percentage, self.chunk_size
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ExportConfig::default();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.overlap_percentage, 10.0);
        assert_eq!(config.overlap_chars(), 100);
        assert!(config.respect_semantic_boundaries);
        assert_eq!(config.conversation_style, ConversationStyle::Qa);
        assert_eq!(config.minimum_processed_percentage, 100.0);
        assert_eq!(config.max_critical_errors, 0);
        assert_eq!(config.max_total_errors, 50);
        assert_eq!(config.max_undo_depth, 50);
        assert_eq!(config.validation_level, ValidationLevel::Basic);
        assert!(config.preserve_formatting);
        assert!(!config.merge_text_zones);
        assert!(!config.include_context);
        assert!(config.worker_count >= 1 && config.worker_count <= 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_camel_case_and_defaults() {
        let config: ExportConfig = serde_json::from_str(
            r#"{"chunkSize": 800, "conversationStyle": "instruction", "requiredZoneTypes": ["table"]}"#,
        )
        .unwrap();
        assert_eq!(config.chunk_size, 800);
        assert_eq!(config.overlap_chars(), 80);
        assert_eq!(config.conversation_style, ConversationStyle::Instruction);
        assert_eq!(config.required_zone_types, vec![ZoneType::Table]);
        assert_eq!(config.balance_ratio, 0.2);
    }

    #[test]
    fn test_builder_chain() {
        let config = ExportConfig::new()
            .with_chunk_size(500)
            .with_overlap_percentage(20.0)
            .with_context(2)
            .with_error_thresholds(1, 10, 0.5);
        assert_eq!(config.overlap_chars(), 100);
        assert!(config.include_context);
        assert_eq!(config.context_size, 2);
        assert_eq!(config.max_critical_errors, 1);
    }

    #[test]
    fn test_overlap_rounds_to_nearest_character() {
        let config = ExportConfig::default()
            .with_chunk_size(15)
            .with_overlap_percentage(10.0);
        assert_eq!(config.overlap_chars(), 2);
        assert_eq!(config.with_chunk_size(14).overlap_chars(), 1);
    }

    #[test]
    fn test_validation_level_from_json() {
        let config: ExportConfig =
            serde_json::from_str(r#"{"validationLevel": "strict", "maxUndoDepth": 5}"#).unwrap();
        assert_eq!(config.validation_level, ValidationLevel::Strict);
        assert_eq!(config.max_undo_depth, 5);
        assert!(serde_json::from_str::<ExportConfig>(r#"{"validationLevel": "standard"}"#).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            ExportConfig::default().with_chunk_size(0),
            ExportConfig::default().with_overlap_percentage(100.0),
            ExportConfig::default().with_quality_threshold(1.5),
            ExportConfig::default().with_worker_count(0),
            ExportConfig::default().with_memory_limit(0),
            ExportConfig::default().with_max_undo_depth(0),
            ExportConfig::default().with_chunk_size(1).with_overlap_percentage(60.0),
        ];
        for config in cases {
            assert!(matches!(
                config.validate(),
                Err(ExportError::InvalidConfiguration(_))
            ));
        }
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"chunkSize": 1200, "anonymizeActors": true}}"#).unwrap();

        let config = ExportConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.chunk_size, 1200);
        assert!(config.anonymize_actors);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(bad, r#"{{"chunkSize": 0}}"#).unwrap();
        assert!(ExportConfig::from_json_file(bad.path()).is_err());
    }
}
