//! Start document of a catalogued run.
//!
//! The start document is a free-form mapping written by the acquisition plan.
//! Exporters read named fields from it; nested plan arguments are addressed with
//! dotted keys such as `plan_args.num`.

use crate::error::{ExportError, ExportResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata record emitted when a run starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StartDoc {
    fields: Map<String, Value>,
}

impl StartDoc {
    /// Wrap a decoded JSON object.
    pub fn from_value(value: Value) -> ExportResult<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(ExportError::Storage(format!(
                "start document must be a JSON object, got {other}"
            ))),
        }
    }

    /// Builder used when assembling documents in memory.
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Set a plan argument, creating `plan_args` when absent.
    pub fn with_arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        let args = self
            .fields
            .entry("plan_args")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(args) = args {
            args.insert(key.to_string(), value.into());
        }
        self
    }

    /// Raw access to the underlying mapping.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Look up a field by dotted path.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut parts = key.split('.');
        let first = parts.next()?;
        let mut value = self.fields.get(first)?;
        for part in parts {
            value = value.as_object()?.get(part)?;
        }
        Some(value)
    }

    /// Whether the field exists and is not null.
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !v.is_null())
    }

    /// Look up a field that must be present.
    pub fn require(&self, key: &str) -> ExportResult<&Value> {
        self.get(key).ok_or_else(|| ExportError::missing(key))
    }

    /// String field.
    pub fn str(&self, key: &str) -> ExportResult<&str> {
        self.require(key)?
            .as_str()
            .ok_or_else(|| type_error(key, "string"))
    }

    /// Integer field. Floats with no fractional part are accepted.
    pub fn int(&self, key: &str) -> ExportResult<i64> {
        let value = self.require(key)?;
        if let Some(i) = value.as_i64() {
            return Ok(i);
        }
        match value.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
            _ => Err(type_error(key, "integer")),
        }
    }

    /// Non-negative count field.
    pub fn count(&self, key: &str) -> ExportResult<usize> {
        usize::try_from(self.int(key)?).map_err(|_| type_error(key, "non-negative integer"))
    }

    /// Numeric field as `f64`.
    pub fn float(&self, key: &str) -> ExportResult<f64> {
        self.require(key)?
            .as_f64()
            .ok_or_else(|| type_error(key, "number"))
    }

    /// List of numbers.
    pub fn float_list(&self, key: &str) -> ExportResult<Vec<f64>> {
        self.require(key)?
            .as_array()
            .ok_or_else(|| type_error(key, "list of numbers"))?
            .iter()
            .map(|v| v.as_f64().ok_or_else(|| type_error(key, "list of numbers")))
            .collect()
    }

    /// List of strings.
    pub fn str_list(&self, key: &str) -> ExportResult<Vec<String>> {
        self.require(key)?
            .as_array()
            .ok_or_else(|| type_error(key, "list of strings"))?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| type_error(key, "list of strings"))
            })
            .collect()
    }

    /// Render a present field the way the acquisition side prints it.
    pub fn display(&self, key: &str) -> ExportResult<String> {
        Ok(display_value(self.require(key)?))
    }

    /// Unique run identifier.
    pub fn uid(&self) -> ExportResult<&str> {
        self.str("uid")
    }

    /// Human-facing scan number.
    pub fn scan_id(&self) -> ExportResult<i64> {
        self.int("scan_id")
    }

    /// Name of the plan that produced the run.
    pub fn plan_name(&self) -> ExportResult<&str> {
        self.str("plan_name")
    }

    /// Run start time, Unix seconds.
    pub fn time(&self) -> ExportResult<f64> {
        self.float("time")
    }

    /// Top-level `note` rendered as text.
    pub fn note(&self) -> ExportResult<String> {
        self.display("note")
    }

    /// `plan_args.note` when set and non-empty, otherwise `"None"`.
    pub fn plan_note(&self) -> String {
        match self.get("plan_args.note") {
            Some(value) if is_truthy(value) => display_value(value),
            _ => "None".to_string(),
        }
    }

    /// X-ray energy, read from `XEng` with `x_ray_energy` as fallback.
    pub fn x_eng(&self) -> ExportResult<f64> {
        if self.get("XEng").is_some() {
            self.float("XEng")
        } else {
            self.float("x_ray_energy")
        }
    }
}

fn type_error(key: &str, expected: &'static str) -> ExportError {
    ExportError::FieldType {
        key: key.to_string(),
        expected,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> StartDoc {
        StartDoc::from_value(json!({
            "uid": "a1b2c3",
            "scan_id": 1042,
            "plan_name": "tomo_scan",
            "time": 1.7e9,
            "x_ray_energy": 8.3,
            "note": null,
            "eng_list": [8.3, 8.31, 8.32],
            "detectors": ["Andor"],
            "plan_args": {"num": 181.0, "start": 0, "note": ""}
        }))
        .unwrap()
    }

    #[test]
    fn typed_accessors() {
        let doc = sample();
        assert_eq!(doc.uid().unwrap(), "a1b2c3");
        assert_eq!(doc.scan_id().unwrap(), 1042);
        assert_eq!(doc.count("plan_args.num").unwrap(), 181);
        assert_eq!(doc.float("plan_args.start").unwrap(), 0.0);
        assert_eq!(doc.float_list("eng_list").unwrap().len(), 3);
        assert_eq!(doc.str_list("detectors").unwrap(), vec!["Andor".to_string()]);
    }

    #[test]
    fn energy_falls_back_to_x_ray_energy() {
        let doc = sample();
        assert_eq!(doc.x_eng().unwrap(), 8.3);
        let doc = doc.with_field("XEng", 9.0);
        assert_eq!(doc.x_eng().unwrap(), 9.0);
    }

    #[test]
    fn notes_render_like_python() {
        let doc = sample();
        assert_eq!(doc.note().unwrap(), "None");
        assert_eq!(doc.plan_note(), "None");

        let doc = doc.with_arg("note", "sample A");
        assert_eq!(doc.plan_note(), "sample A");
    }

    #[test]
    fn missing_and_mistyped_fields() {
        let doc = sample();
        assert!(matches!(
            doc.float("plan_args.stop"),
            Err(ExportError::MissingField { key }) if key == "plan_args.stop"
        ));
        assert!(matches!(
            doc.int("uid"),
            Err(ExportError::FieldType { expected: "integer", .. })
        ));
        assert!(!doc.has("note"));
    }

    #[test]
    fn rejects_non_object_documents() {
        assert!(StartDoc::from_value(json!([1, 2])).is_err());
    }
}
