//! Field validators and the per-resource validator chain.
//!
//! A validator receives the field name, the whole candidate record and its own output slot.
//! It writes a message into the slot when the field is invalid and leaves it empty otherwise.
//! Chains never stop at the first failure: every non-empty slot ends up in the result.

use crate::config::ValidationRule;
use crate::model::Record;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Error slot for a single validator run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub error: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>) -> Self {
        FieldError {
            field: field.into(),
            error: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.error.is_empty()
    }
}

/// Aggregate of every failing validator across every field.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub errors: Vec<FieldError>,
}

impl ValidationResult {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a FieldError> + 'a {
        self.errors.iter().filter(move |e| e.field == field)
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msgs: Vec<&str> = self.errors.iter().map(|e| e.error.as_str()).collect();
        f.write_str(&msgs.join("; "))
    }
}

pub type Validator = Arc<dyn Fn(&str, &Record, &mut FieldError) + Send + Sync>;

/// Ordered validators per field name. Fields are visited in name order so results are stable.
#[derive(Clone, Default)]
pub struct ValidatorChain {
    fields: BTreeMap<String, Vec<Validator>>,
}

impl fmt::Debug for ValidatorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.fields.iter().map(|(k, v)| (k, v.len())))
            .finish()
    }
}

impl ValidatorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a validator to a field's list.
    pub fn add<F>(mut self, field: impl Into<String>, validator: F) -> Self
    where
        F: Fn(&str, &Record, &mut FieldError) + Send + Sync + 'static,
    {
        self.push(field, Arc::new(validator));
        self
    }

    pub fn push(&mut self, field: impl Into<String>, validator: Validator) {
        self.fields.entry(field.into()).or_default().push(validator);
    }

    /// Build a chain from declarative rules (the serde form used in resource config).
    pub fn from_rules<'a>(
        rules: impl IntoIterator<Item = (&'a String, &'a ValidationRule)>,
    ) -> Result<Self, regex::Error> {
        let mut chain = ValidatorChain::new();
        for (field, rule) in rules {
            for v in rule.compile()? {
                chain.push(field.clone(), v);
            }
        }
        Ok(chain)
    }

    /// Merge another chain into this one, appending per field.
    pub fn extend(&mut self, other: ValidatorChain) {
        for (field, validators) in other.fields {
            self.fields.entry(field).or_default().extend(validators);
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Run every validator against the candidate and collect every non-empty error.
    pub fn validate(&self, candidate: &Record) -> ValidationResult {
        let mut result = ValidationResult::default();
        for (field, validators) in &self.fields {
            for validator in validators {
                let mut output = FieldError::new(field.as_str());
                validator(field, candidate, &mut output);
                if !output.is_empty() {
                    result.errors.push(output);
                }
            }
        }
        result
    }
}

fn is_blank(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

/// Fails when the field is absent, null or the empty string.
pub fn required(field: &str, candidate: &Record, out: &mut FieldError) {
    if is_blank(candidate.get(field)) {
        out.error = format!("{} is required", field);
    }
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$")
            .unwrap_or_else(|e| panic!("email pattern must compile: {}", e))
    })
}

/// Fails when the field is present and non-empty but not shaped like an email address.
/// Blank values pass; pair with [`required`] to demand a value.
pub fn email(field: &str, candidate: &Record, out: &mut FieldError) {
    let value = candidate.get(field);
    if is_blank(value) {
        return;
    }
    match value.and_then(Value::as_str) {
        Some(s) if email_regex().is_match(s) => {}
        _ => out.error = format!("{} has an invalid format", field),
    }
}

/// Fails when the field is a non-empty string that is not a UUID.
pub fn uuid(field: &str, candidate: &Record, out: &mut FieldError) {
    if let Some(s) = candidate.get(field).and_then(Value::as_str) {
        if !s.is_empty() && uuid::Uuid::parse_str(s).is_err() {
            out.error = format!("{} must be a valid UUID", field);
        }
    }
}

pub fn max_length(max: usize) -> impl Fn(&str, &Record, &mut FieldError) + Send + Sync + 'static {
    move |field, candidate, out| {
        if let Some(s) = candidate.get(field).and_then(Value::as_str) {
            if s.chars().count() > max {
                out.error = format!("{} must be at most {} characters", field, max);
            }
        }
    }
}

pub fn min_length(min: usize) -> impl Fn(&str, &Record, &mut FieldError) + Send + Sync + 'static {
    move |field, candidate, out| {
        if let Some(s) = candidate.get(field).and_then(Value::as_str) {
            if !s.is_empty() && s.chars().count() < min {
                out.error = format!("{} must be at least {} characters", field, min);
            }
        }
    }
}

pub fn pattern(re: Regex) -> impl Fn(&str, &Record, &mut FieldError) + Send + Sync + 'static {
    move |field, candidate, out| {
        if let Some(s) = candidate.get(field).and_then(Value::as_str) {
            if !s.is_empty() && !re.is_match(s) {
                out.error = format!("{} does not match required pattern", field);
            }
        }
    }
}

pub fn one_of(allowed: Vec<Value>) -> impl Fn(&str, &Record, &mut FieldError) + Send + Sync + 'static {
    move |field, candidate, out| {
        let Some(v) = candidate.get(field) else { return };
        if v.is_null() {
            return;
        }
        if !allowed.iter().any(|a| value_eq(v, a)) {
            out.error = format!(
                "{} must be one of: {:?}",
                field,
                allowed.iter().take(5).collect::<Vec<_>>()
            );
        }
    }
}

pub fn minimum(min: f64) -> impl Fn(&str, &Record, &mut FieldError) + Send + Sync + 'static {
    move |field, candidate, out| {
        if let Some(n) = candidate.get(field).and_then(Value::as_f64) {
            if n < min {
                out.error = format!("{} must be at least {}", field, min);
            }
        }
    }
}

pub fn maximum(max: f64) -> impl Fn(&str, &Record, &mut FieldError) + Send + Sync + 'static {
    move |field, candidate, out| {
        if let Some(n) = candidate.get(field).and_then(Value::as_f64) {
            if n > max {
                out.error = format!("{} must be at most {}", field, max);
            }
        }
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    fn contact_chain() -> ValidatorChain {
        ValidatorChain::new()
            .add("name", required)
            .add("email", required)
            .add("email", email)
    }

    #[test]
    fn missing_required_field_yields_exactly_one_entry() {
        let result = contact_chain().validate(&rec(json!({"name": "x"})));
        let email_errors: Vec<_> = result.for_field("email").collect();
        assert_eq!(email_errors.len(), 1);
        assert_eq!(email_errors[0].error, "email is required");
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn required_treats_null_and_empty_string_as_missing() {
        let chain = ValidatorChain::new().add("name", required);
        assert!(!chain.validate(&rec(json!({"name": null}))).is_empty());
        assert!(!chain.validate(&rec(json!({"name": ""}))).is_empty());
        assert!(chain.validate(&rec(json!({"name": 0}))).is_empty());
    }

    #[test]
    fn email_passes_blank_and_rejects_malformed() {
        let chain = ValidatorChain::new().add("email", email);
        assert!(chain.validate(&rec(json!({}))).is_empty());
        assert!(chain.validate(&rec(json!({"email": ""}))).is_empty());
        assert!(chain.validate(&rec(json!({"email": "y@z.com"}))).is_empty());
        let bad = chain.validate(&rec(json!({"email": "not-an-email"})));
        assert_eq!(bad.errors[0].error, "email has an invalid format");
        assert!(!chain.validate(&rec(json!({"email": 5}))).is_empty());
    }

    #[test]
    fn all_errors_are_reported_together() {
        let result = contact_chain().validate(&rec(json!({"email": "broken"})));
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.for_field("name").count(), 1);
        assert_eq!(result.for_field("email").count(), 1);
    }

    #[test]
    fn validator_order_within_field_does_not_matter() {
        let a = ValidatorChain::new().add("email", required).add("email", email);
        let b = ValidatorChain::new().add("email", email).add("email", required);
        for body in [json!({}), json!({"email": "bad"}), json!({"email": "a@b.co"})] {
            let mut ra: Vec<_> = a.validate(&rec(body.clone())).errors.into_iter().map(|e| e.error).collect();
            let mut rb: Vec<_> = b.validate(&rec(body)).errors.into_iter().map(|e| e.error).collect();
            ra.sort();
            rb.sort();
            assert_eq!(ra, rb);
        }
    }

    #[test]
    fn rule_based_validators() {
        let chain = ValidatorChain::new()
            .add("title", max_length(5))
            .add("title", min_length(2))
            .add("code", pattern(Regex::new("^[A-Z]+$").unwrap()))
            .add("status", one_of(vec![json!("draft"), json!("live")]))
            .add("score", minimum(0.0))
            .add("score", maximum(10.0))
            .add("ref", uuid);
        assert!(chain
            .validate(&rec(json!({"title": "abc", "code": "AB", "status": "live", "score": 3, "ref": "67e55044-10b1-426f-9247-bb680e5fe0c8"})))
            .is_empty());
        let bad = chain.validate(&rec(json!({"title": "abcdefg", "code": "ab", "status": "gone", "score": 11, "ref": "nope"})));
        assert_eq!(bad.errors.len(), 5);
    }
}
