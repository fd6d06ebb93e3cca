//! Declarative shape contracts
//!
//! A schema is a tree of [`FieldSchema`] nodes interpreted by one generic
//! validator. Schemas are built in code or loaded from JSON; custom
//! `format` predicates extend the built-in ones.

use super::{ValidationContext, ValidationIssue, ValidationResult, Validator};
use crate::batch::{batch_map, BatchOptions, JobResult};
use crate::error::ErrorCode;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// JSON type a field must have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Any,
}

impl FieldType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
            FieldType::Any => true,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
            FieldType::Any => "any",
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn default_true() -> bool {
    true
}

/// Constraints on one field, nesting through `properties` and `items`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "is_false")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Name of a registered format predicate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, FieldSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default = "default_true")]
    pub additional_properties: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<FieldSchema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
}

impl FieldSchema {
    pub fn of(field_type: FieldType) -> Self {
        Self {
            field_type,
            nullable: false,
            minimum: None,
            maximum: None,
            min_length: None,
            max_length: None,
            pattern: None,
            format: None,
            allowed: None,
            properties: BTreeMap::new(),
            required: Vec::new(),
            additional_properties: true,
            items: None,
            min_items: None,
            max_items: None,
        }
    }

    pub fn string() -> Self {
        Self::of(FieldType::String)
    }

    pub fn number() -> Self {
        Self::of(FieldType::Number)
    }

    pub fn integer() -> Self {
        Self::of(FieldType::Integer)
    }

    pub fn boolean() -> Self {
        Self::of(FieldType::Boolean)
    }

    pub fn object() -> Self {
        Self::of(FieldType::Object)
    }

    pub fn any() -> Self {
        Self::of(FieldType::Any)
    }

    pub fn array(items: FieldSchema) -> Self {
        let mut schema = Self::of(FieldType::Array);
        schema.items = Some(Box::new(items));
        schema
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn min(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    pub fn range(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    pub fn length(mut self, min: usize, max: Option<usize>) -> Self {
        self.min_length = Some(min);
        self.max_length = max;
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn one_of<V: Into<Value>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn property(mut self, name: impl Into<String>, schema: FieldSchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    pub fn required_property(mut self, name: impl Into<String>, schema: FieldSchema) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.properties.insert(name, schema);
        self
    }

    /// Reject fields not listed in `properties`
    pub fn closed(mut self) -> Self {
        self.additional_properties = false;
        self
    }

    pub fn items_between(mut self, min: usize, max: Option<usize>) -> Self {
        self.min_items = Some(min);
        self.max_items = max;
        self
    }
}

/// Contract for zone records as exchanged with the upstream system
pub fn zone_schema() -> FieldSchema {
    let statuses = [
        "pending",
        "detected",
        "confirmed",
        "processing",
        "completed",
        "failed",
        "skipped",
    ];

    FieldSchema::object()
        .required_property("id", FieldSchema::string().format("identifier"))
        .required_property("page", FieldSchema::integer().min(1.0))
        .required_property(
            "coordinates",
            FieldSchema::object()
                .required_property("x", FieldSchema::number())
                .required_property("y", FieldSchema::number())
                .required_property("width", FieldSchema::number().min(0.0))
                .required_property("height", FieldSchema::number().min(0.0))
                .property("rotation", FieldSchema::number().range(-360.0, 360.0))
                .property("pageWidth", FieldSchema::number().min(0.0))
                .property("pageHeight", FieldSchema::number().min(0.0)),
        )
        .required_property(
            "type",
            FieldSchema::string().one_of(crate::zone::ZoneType::ALL.iter().map(|t| t.as_str())),
        )
        .required_property("confidence", FieldSchema::number().format("confidence"))
        .required_property("status", FieldSchema::string().one_of(statuses))
        .property("content", FieldSchema::string())
        .property(
            "processing",
            FieldSchema::object()
                .required_property("tool", FieldSchema::string().length(1, None))
                .property("durationMs", FieldSchema::integer().min(0.0))
                .property("timestamp", FieldSchema::string().format("timestamp")),
        )
        .property("relatedZoneIds", FieldSchema::array(FieldSchema::string()))
        .property("errorMessage", FieldSchema::string())
        .property("metadata", FieldSchema::object())
}

/// Contract for exported chunk records
pub fn chunk_schema() -> FieldSchema {
    FieldSchema::object()
        .closed()
        .required_property("id", FieldSchema::string().format("identifier"))
        .required_property("content", FieldSchema::string().length(1, None))
        .required_property("chunkIndex", FieldSchema::integer().min(0.0))
        .required_property("totalChunks", FieldSchema::integer().min(1.0))
        .required_property(
            "overlap",
            FieldSchema::object()
                .required_property("previousLen", FieldSchema::integer().min(0.0))
                .required_property("nextLen", FieldSchema::integer().min(0.0)),
        )
        .required_property(
            "metadata",
            FieldSchema::object()
                .required_property("documentId", FieldSchema::string().length(1, None))
                .required_property("page", FieldSchema::integer().min(1.0))
                .required_property("zoneId", FieldSchema::string().format("identifier"))
                .required_property("contentType", FieldSchema::string())
                .property("confidence", FieldSchema::number().format("confidence"))
                .property("tool", FieldSchema::string())
                .property("timestamp", FieldSchema::string().format("timestamp")),
        )
}

/// Contract for fine-tuning example records
pub fn training_example_schema() -> FieldSchema {
    FieldSchema::object()
        .required_property("id", FieldSchema::string().format("identifier"))
        .required_property("style", FieldSchema::string().one_of(["qa", "instruction"]))
        .required_property(
            "messages",
            FieldSchema::array(
                FieldSchema::object()
                    .required_property(
                        "role",
                        FieldSchema::string().one_of(["system", "user", "assistant"]),
                    )
                    .required_property("content", FieldSchema::string().length(1, None)),
            )
            .items_between(2, None),
        )
        .required_property("quality", FieldSchema::number().format("confidence"))
        .property(
            "sourceZoneIds",
            FieldSchema::array(FieldSchema::string().format("identifier")),
        )
}

/// Predicate backing a named `format`
pub type FormatPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Letters and digits, then also `_ . : -`
pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'))
        }
        _ => false,
    }
}

pub(crate) fn is_timestamp(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
}

fn builtin_formats() -> HashMap<String, FormatPredicate> {
    let mut formats: HashMap<String, FormatPredicate> = HashMap::new();
    formats.insert(
        "confidence".to_string(),
        Arc::new(|v| v.as_f64().is_some_and(|n| (0.0..=1.0).contains(&n))),
    );
    formats.insert(
        "percentage".to_string(),
        Arc::new(|v| v.as_f64().is_some_and(|n| (0.0..=100.0).contains(&n))),
    );
    formats.insert(
        "timestamp".to_string(),
        Arc::new(|v| v.as_str().is_some_and(is_timestamp)),
    );
    formats.insert(
        "identifier".to_string(),
        Arc::new(|v| v.as_str().is_some_and(is_identifier)),
    );
    formats
}

/// Generic interpreter of [`FieldSchema`] trees
#[derive(Clone)]
pub struct SchemaValidator {
    schema: Arc<FieldSchema>,
    formats: Arc<HashMap<String, FormatPredicate>>,
    worker_count: usize,
}

impl fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut formats: Vec<&String> = self.formats.keys().collect();
        formats.sort();
        f.debug_struct("SchemaValidator")
            .field("schema", &self.schema)
            .field("formats", &formats)
            .field("worker_count", &self.worker_count)
            .finish()
    }
}

impl SchemaValidator {
    pub fn new(schema: FieldSchema) -> Self {
        Self {
            schema: Arc::new(schema),
            formats: Arc::new(builtin_formats()),
            worker_count: 1,
        }
    }

    /// Register a custom format predicate
    pub fn with_format<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.formats).insert(name.into(), Arc::new(predicate));
        self
    }

    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers.max(1);
        self
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    /// Validate one record
    pub fn validate_record(&self, record: &Value) -> ValidationResult {
        let mut issues = Vec::new();
        self.check(&self.schema, record, "", &mut issues);
        ValidationResult::from_issues(issues)
    }

    /// Validate many records on the worker pool; results keep input order
    pub fn validate_batch(&self, records: Vec<Value>) -> Vec<ValidationResult> {
        if records.len() < 2 || self.worker_count < 2 {
            return records.iter().map(|r| self.validate_record(r)).collect();
        }

        let validator = self.clone();
        let summary = batch_map(
            records,
            |idx, _| format!("record-{idx}"),
            move |record: Value| Ok(validator.validate_record(&record)),
            BatchOptions::default().with_parallelism(self.worker_count),
        );

        summary
            .results
            .into_iter()
            .map(|result| match result {
                JobResult::Success { output, .. } => output,
                JobResult::Failed { error, .. } => {
                    ValidationResult::from_issues([ValidationIssue::from_error(&error)])
                }
                JobResult::Cancelled { job_name } => ValidationResult::from_issues([
                    ValidationIssue::new(ErrorCode::Cancelled, job_name, "validation cancelled"),
                ]),
            })
            .collect()
    }

    fn check(&self, schema: &FieldSchema, value: &Value, path: &str, issues: &mut Vec<ValidationIssue>) {
        let mut violation = |field: &str, reason: String| {
            issues.push(ValidationIssue::new(ErrorCode::SchemaViolation, field, reason));
        };

        if value.is_null() {
            if !schema.nullable && schema.field_type != FieldType::Any {
                violation(path, "must not be null".to_string());
            }
            return;
        }

        if !schema.field_type.matches(value) {
            violation(
                path,
                format!(
                    "expected {}, found {}",
                    schema.field_type.as_str(),
                    type_name(value)
                ),
            );
            return;
        }

        if let Some(allowed) = &schema.allowed {
            if !allowed.contains(value) {
                violation(path, format!("value {value} is not one of the allowed values"));
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = schema.minimum.filter(|min| n < *min) {
                violation(path, format!("{n} is below the minimum {min}"));
            }
            if let Some(max) = schema.maximum.filter(|max| n > *max) {
                violation(path, format!("{n} is above the maximum {max}"));
            }
        }

        if let Some(s) = value.as_str() {
            let len = s.chars().count();
            if let Some(min) = schema.min_length.filter(|min| len < *min) {
                violation(path, format!("length {len} is shorter than {min}"));
            }
            if let Some(max) = schema.max_length.filter(|max| len > *max) {
                violation(path, format!("length {len} is longer than {max}"));
            }
            if let Some(pattern) = &schema.pattern {
                match regex::Regex::new(pattern) {
                    Ok(re) if !re.is_match(s) => {
                        violation(path, format!("does not match pattern '{pattern}'"))
                    }
                    Ok(_) => {}
                    Err(e) => violation(path, format!("invalid pattern '{pattern}': {e}")),
                }
            }
        }

        if let Some(format) = &schema.format {
            match self.formats.get(format) {
                Some(predicate) if !predicate(value) => {
                    violation(path, format!("does not satisfy format '{format}'"))
                }
                Some(_) => {}
                None => violation(path, format!("unknown format '{format}'")),
            }
        }

        match value {
            Value::Object(map) => {
                for name in &schema.required {
                    if !map.contains_key(name) {
                        violation(&join(path, name), "required field is missing".to_string());
                    }
                }
                for (name, child) in map {
                    match schema.properties.get(name) {
                        Some(child_schema) => self.check(child_schema, child, &join(path, name), issues),
                        None if !schema.additional_properties => {
                            issues.push(ValidationIssue::new(
                                ErrorCode::SchemaViolation,
                                join(path, name),
                                "unexpected field",
                            ));
                        }
                        None => {}
                    }
                }
            }
            Value::Array(items) => {
                if let Some(min) = schema.min_items.filter(|min| items.len() < *min) {
                    violation(path, format!("{} items, expected at least {min}", items.len()));
                }
                if let Some(max) = schema.max_items.filter(|max| items.len() > *max) {
                    violation(path, format!("{} items, expected at most {max}", items.len()));
                }
                if let Some(item_schema) = &schema.items {
                    for (idx, item) in items.iter().enumerate() {
                        self.check(item_schema, item, &format!("{path}[{idx}]"), issues);
                    }
                }
            }
            _ => {}
        }
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

impl Validator for SchemaValidator {
    fn name(&self) -> &'static str {
        "schema"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        let mut issues = Vec::new();
        let mut records = Vec::with_capacity(ctx.zones.len());
        for zone in ctx.zones {
            match serde_json::to_value(zone) {
                Ok(value) => records.push(value),
                Err(e) => issues.push(
                    ValidationIssue::new(ErrorCode::Internal, "", e.to_string()).with_zone(&zone.id),
                ),
            }
        }

        let results = self.validate_batch(records);
        for (zone, result) in ctx.zones.iter().zip(results) {
            for mut issue in result.errors.into_iter().chain(result.warnings) {
                issue.field = join(&format!("zones[{}]", zone.id), &issue.field);
                issue.zone_id = Some(zone.id.clone());
                issues.push(issue);
            }
        }
        ValidationResult::from_issues(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::{Zone, ZoneCoordinates, ZoneStatus, ZoneType};
    use serde_json::json;

    fn fields(result: &ValidationResult) -> Vec<&str> {
        result.errors.iter().map(|e| e.field.as_str()).collect()
    }

    #[test]
    fn test_nested_object_and_array() {
        let schema = FieldSchema::object()
            .required_property("name", FieldSchema::string().length(1, Some(8)))
            .required_property(
                "tags",
                FieldSchema::array(FieldSchema::string().pattern("^[a-z]+$")).items_between(1, None),
            )
            .property(
                "owner",
                FieldSchema::object().required_property("id", FieldSchema::integer()),
            );
        let validator = SchemaValidator::new(schema);

        let ok = validator.validate_record(&json!({"name": "doc", "tags": ["a", "b"]}));
        assert!(ok.valid);

        let bad = validator.validate_record(&json!({
            "name": "much too long",
            "tags": ["ok", "NOPE"],
            "owner": {"id": "x"}
        }));
        assert!(!bad.valid);
        assert_eq!(fields(&bad), vec!["name", "owner.id", "tags[1]"]);
    }

    #[test]
    fn test_required_null_and_closed() {
        let schema = FieldSchema::object()
            .closed()
            .required_property("a", FieldSchema::number())
            .property("b", FieldSchema::string().nullable())
            .property("c", FieldSchema::string());
        let validator = SchemaValidator::new(schema);

        let result = validator.validate_record(&json!({"b": null, "c": null, "d": 1}));
        assert_eq!(fields(&result), vec!["a", "c", "d"]);
        assert!(result.errors.iter().all(|e| e.code == ErrorCode::SchemaViolation));
    }

    #[test]
    fn test_builtin_and_custom_formats() {
        let schema = FieldSchema::object()
            .property("confidence", FieldSchema::number().format("confidence"))
            .property("at", FieldSchema::string().format("timestamp"))
            .property("even", FieldSchema::integer().format("even"));
        let validator = SchemaValidator::new(schema)
            .with_format("even", |v| v.as_i64().is_some_and(|n| n % 2 == 0));

        assert!(validator
            .validate_record(&json!({"confidence": 0.4, "at": "2024-05-01T10:00:00Z", "even": 4}))
            .valid);
        let bad = validator.validate_record(&json!({"confidence": 1.2, "at": "yesterday", "even": 3}));
        assert_eq!(fields(&bad), vec!["at", "confidence", "even"]);
    }

    #[test]
    fn test_unknown_format_is_reported() {
        let validator = SchemaValidator::new(FieldSchema::string().format("isbn"));
        let result = validator.validate_record(&json!("123"));
        assert!(result.errors[0].message.contains("unknown format"));
    }

    #[test]
    fn test_schema_round_trips_through_json() {
        let schema = zone_schema();
        let json = serde_json::to_string(&schema).unwrap();
        let back: FieldSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, back);

        let from_text: FieldSchema = serde_json::from_str(
            r#"{"type": "object", "required": ["x"], "properties": {"x": {"type": "number", "minimum": 0}}}"#,
        )
        .unwrap();
        assert!(from_text.additional_properties);
        assert!(!SchemaValidator::new(from_text).validate_record(&json!({"x": -1})).valid);
    }

    #[test]
    fn test_batch_matches_sequential() {
        let validator = SchemaValidator::new(zone_schema()).with_worker_count(4);
        let records: Vec<Value> = (0..12)
            .map(|i| {
                let zone = Zone::new(
                    format!("z{i}"),
                    1,
                    ZoneCoordinates::new(0.0, 0.0, 10.0, 10.0),
                    ZoneType::Text,
                )
                .with_confidence(if i % 3 == 0 { 1.5 } else { 0.5 })
                .with_status(ZoneStatus::Completed);
                serde_json::to_value(zone).unwrap()
            })
            .collect();

        let sequential: Vec<ValidationResult> =
            records.iter().map(|r| validator.validate_record(r)).collect();
        let parallel = validator.validate_batch(records);
        assert_eq!(sequential, parallel);
        assert_eq!(parallel.iter().filter(|r| !r.valid).count(), 4);
    }

    #[test]
    fn test_zone_records_validate() {
        let zone = Zone::new("z-1", 2, ZoneCoordinates::new(1.0, 2.0, 3.0, 4.0), ZoneType::Table)
            .with_confidence(0.7)
            .with_status(ZoneStatus::Completed)
            .with_processing("camelot", Some(30))
            .with_related(["z-2"]);
        let validator = SchemaValidator::new(zone_schema());
        assert!(validator
            .validate_record(&serde_json::to_value(&zone).unwrap())
            .valid);
    }
}
