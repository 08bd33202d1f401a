//! Declarative validation rules
//!
//! A [`Validation`] binds one [`Rule`] to one field together with the
//! moment it runs on, an optional condition, the allow-nil flag and an
//! optional message template. Templates may use `{field}`, `{value}` and
//! `{count}`.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::{ModelError, ModelResult};
use crate::model::Record;
use crate::value::Value;

/// When a validation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Moment {
    Create,
    Update,
    /// Every save, new or persisted
    #[default]
    Save,
}

impl Moment {
    pub fn as_str(self) -> &'static str {
        match self {
            Moment::Create => "create",
            Moment::Update => "update",
            Moment::Save => "save",
        }
    }
}

/// Predicate over a record, used by `if` conditions
pub type RecordPredicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Per-field check used by `validates_each`
pub type FieldCheck = Arc<dyn Fn(&Record, &str) -> bool + Send + Sync>;

/// The `if` option of a validation
#[derive(Clone, Default)]
pub enum Condition {
    #[default]
    Always,
    Never,
    /// Predicate registered on the model under this name
    Named(String),
    Check(RecordPredicate),
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Always => f.write_str("Always"),
            Condition::Never => f.write_str("Never"),
            Condition::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Condition::Check(_) => f.write_str("Check(..)"),
        }
    }
}

/// Validator batches, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValidationKind {
    Acceptance,
    Confirmation,
    Each,
    Exclusion,
    Inclusion,
    Format,
    Length,
    Numericality,
    Presence,
    Uniqueness,
}

impl ValidationKind {
    pub const ORDER: [ValidationKind; 10] = [
        ValidationKind::Acceptance,
        ValidationKind::Confirmation,
        ValidationKind::Each,
        ValidationKind::Exclusion,
        ValidationKind::Inclusion,
        ValidationKind::Format,
        ValidationKind::Length,
        ValidationKind::Numericality,
        ValidationKind::Presence,
        ValidationKind::Uniqueness,
    ];
}

/// Length bounds, counted in characters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Length {
    pub is: Option<usize>,
    pub within: Option<(usize, usize)>,
    pub minimum: Option<usize>,
    pub maximum: Option<usize>,
    pub wrong_length: Option<String>,
    pub too_long: Option<String>,
    pub too_short: Option<String>,
}

impl Length {
    pub fn is(length: usize) -> Self {
        Self {
            is: Some(length),
            ..Self::default()
        }
    }

    pub fn within(min: usize, max: usize) -> Self {
        Self {
            within: Some((min, max)),
            ..Self::default()
        }
    }

    pub fn minimum(min: usize) -> Self {
        Self {
            minimum: Some(min),
            ..Self::default()
        }
    }

    pub fn maximum(max: usize) -> Self {
        Self {
            maximum: Some(max),
            ..Self::default()
        }
    }

    pub fn and_maximum(mut self, max: usize) -> Self {
        self.maximum = Some(max);
        self
    }

    pub fn too_long(mut self, template: impl Into<String>) -> Self {
        self.too_long = Some(template.into());
        self
    }

    pub fn too_short(mut self, template: impl Into<String>) -> Self {
        self.too_short = Some(template.into());
        self
    }

    pub fn wrong_length(mut self, template: impl Into<String>) -> Self {
        self.wrong_length = Some(template.into());
        self
    }
}

/// Numeric checks; the raw (pre-cast) value is inspected
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Numericality {
    pub only_integer: bool,
    pub within: Option<(f64, f64)>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub too_big: Option<String>,
    pub too_small: Option<String>,
}

impl Numericality {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn only_integer(mut self) -> Self {
        self.only_integer = true;
        self
    }

    pub fn within(mut self, min: f64, max: f64) -> Self {
        self.within = Some((min, max));
        self
    }

    pub fn minimum(mut self, min: f64) -> Self {
        self.minimum = Some(min);
        self
    }

    pub fn maximum(mut self, max: f64) -> Self {
        self.maximum = Some(max);
        self
    }
}

/// Uniqueness scope and case handling
#[derive(Debug, Clone, PartialEq)]
pub struct Uniqueness {
    pub scope: Vec<String>,
    pub case_sensitive: bool,
}

impl Default for Uniqueness {
    fn default() -> Self {
        Self {
            scope: Vec::new(),
            case_sensitive: true,
        }
    }
}

impl Uniqueness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope(mut self, field: impl Into<String>) -> Self {
        self.scope.push(field.into());
        self
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self
    }
}

/// What a validation checks
#[derive(Clone)]
pub enum Rule {
    /// Value must equal `accept` (default `"1"`)
    Acceptance { accept: Value },
    /// `<field>_confirmation` must be present and equal
    Confirmation,
    Each(FieldCheck),
    Exclusion(Vec<Value>),
    Inclusion(Vec<Value>),
    Format(Regex),
    Length(Length),
    Numericality(Numericality),
    Presence,
    Uniqueness(Uniqueness),
}

impl Rule {
    pub fn kind(&self) -> ValidationKind {
        match self {
            Rule::Acceptance { .. } => ValidationKind::Acceptance,
            Rule::Confirmation => ValidationKind::Confirmation,
            Rule::Each(_) => ValidationKind::Each,
            Rule::Exclusion(_) => ValidationKind::Exclusion,
            Rule::Inclusion(_) => ValidationKind::Inclusion,
            Rule::Format(_) => ValidationKind::Format,
            Rule::Length(_) => ValidationKind::Length,
            Rule::Numericality(_) => ValidationKind::Numericality,
            Rule::Presence => ValidationKind::Presence,
            Rule::Uniqueness(_) => ValidationKind::Uniqueness,
        }
    }

    /// Acceptance, confirmation and presence ignore the allow-nil flag
    fn honours_allow_nil(&self) -> bool {
        !matches!(self, Rule::Acceptance { .. } | Rule::Confirmation | Rule::Presence)
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Acceptance { accept } => f.debug_struct("Acceptance").field("accept", accept).finish(),
            Rule::Confirmation => f.write_str("Confirmation"),
            Rule::Each(_) => f.write_str("Each(..)"),
            Rule::Exclusion(values) => f.debug_tuple("Exclusion").field(values).finish(),
            Rule::Inclusion(values) => f.debug_tuple("Inclusion").field(values).finish(),
            Rule::Format(re) => f.debug_tuple("Format").field(&re.as_str()).finish(),
            Rule::Length(length) => f.debug_tuple("Length").field(length).finish(),
            Rule::Numericality(n) => f.debug_tuple("Numericality").field(n).finish(),
            Rule::Presence => f.write_str("Presence"),
            Rule::Uniqueness(u) => f.debug_tuple("Uniqueness").field(u).finish(),
        }
    }
}

/// One declared validation
#[derive(Debug, Clone)]
pub struct Validation {
    pub field: String,
    pub rule: Rule,
    pub on: Moment,
    pub condition: Condition,
    pub allow_nil: bool,
    pub message: Option<String>,
}

impl Validation {
    pub fn new(field: impl Into<String>, rule: Rule) -> Self {
        Self {
            field: field.into(),
            rule,
            on: Moment::Save,
            condition: Condition::Always,
            allow_nil: false,
            message: None,
        }
    }

    pub fn acceptance_of(field: impl Into<String>) -> Self {
        Self::new(field, Rule::Acceptance { accept: Value::from("1") })
    }

    pub fn confirmation_of(field: impl Into<String>) -> Self {
        Self::new(field, Rule::Confirmation)
    }

    pub fn each<F>(field: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Record, &str) -> bool + Send + Sync + 'static,
    {
        Self::new(field, Rule::Each(Arc::new(check)))
    }

    pub fn exclusion_of<V: Into<Value>>(field: impl Into<String>, values: Vec<V>) -> Self {
        Self::new(field, Rule::Exclusion(values.into_iter().map(Into::into).collect()))
    }

    pub fn inclusion_of<V: Into<Value>>(field: impl Into<String>, values: Vec<V>) -> Self {
        Self::new(field, Rule::Inclusion(values.into_iter().map(Into::into).collect()))
    }

    /// Fails with `Configuration` when the pattern does not compile
    pub fn format_of(field: impl Into<String>, pattern: &str) -> ModelResult<Self> {
        let field = field.into();
        let regex = Regex::new(pattern).map_err(|e| {
            ModelError::Configuration(format!("Invalid format for {}: {}", field, e))
        })?;
        Ok(Self::new(field, Rule::Format(regex)))
    }

    pub fn length_of(field: impl Into<String>, length: Length) -> Self {
        Self::new(field, Rule::Length(length))
    }

    pub fn numericality_of(field: impl Into<String>, numericality: Numericality) -> Self {
        Self::new(field, Rule::Numericality(numericality))
    }

    pub fn presence_of(field: impl Into<String>) -> Self {
        Self::new(field, Rule::Presence)
    }

    pub fn uniqueness_of(field: impl Into<String>) -> Self {
        Self::new(field, Rule::Uniqueness(Uniqueness::default()))
    }

    pub fn uniqueness_with(field: impl Into<String>, uniqueness: Uniqueness) -> Self {
        Self::new(field, Rule::Uniqueness(uniqueness))
    }

    pub fn on(mut self, moment: Moment) -> Self {
        self.on = moment;
        self
    }

    pub fn allow_nil(mut self) -> Self {
        self.allow_nil = true;
        self
    }

    pub fn message(mut self, template: impl Into<String>) -> Self {
        self.message = Some(template.into());
        self
    }

    pub fn accept(mut self, accepted: impl Into<Value>) -> Self {
        if let Rule::Acceptance { accept } = &mut self.rule {
            *accept = accepted.into();
        }
        self
    }

    /// Run only when the named model predicate holds
    pub fn if_named(mut self, predicate: impl Into<String>) -> Self {
        self.condition = Condition::Named(predicate.into());
        self
    }

    pub fn if_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.condition = Condition::Check(Arc::new(check));
        self
    }

    pub fn never(mut self) -> Self {
        self.condition = Condition::Never;
        self
    }

    pub fn kind(&self) -> ValidationKind {
        self.rule.kind()
    }

    /// Whether the allow-nil flag lets a blank value through
    pub fn skips_blank(&self, value: &Value) -> bool {
        self.allow_nil && self.rule.honours_allow_nil() && value.is_blank()
    }

    /// Messages for every rule except uniqueness, which needs the database.
    /// `value` is the attribute, `raw` its pre-cast form.
    pub fn check(&self, record: &Record, value: &Value, raw: &Value) -> Vec<String> {
        let field = self.field.as_str();
        let fail = |default: String| vec![self.render(default, value, None)];

        match &self.rule {
            Rule::Acceptance { accept } => {
                if value.is_null() || !value.loosely_equals(accept) {
                    return fail(format!("{} must be accepted", field));
                }
            }
            Rule::Confirmation => {
                let confirmation = record.read(&format!("{}_confirmation", field));
                if confirmation.is_null() || !confirmation.loosely_equals(value) {
                    return fail(format!("the confirmation on {} does not agree", field));
                }
            }
            Rule::Each(check) => {
                if !check(record, field) {
                    return fail(format!("validation on {} failed", field));
                }
            }
            Rule::Exclusion(values) => {
                if values.iter().any(|v| v.loosely_equals(value)) {
                    return fail(format!("{} is reserved for {}", value, field));
                }
            }
            Rule::Inclusion(values) => {
                if !values.iter().any(|v| v.loosely_equals(value)) {
                    return fail(format!("{} is not included on the list for {}", value, field));
                }
            }
            Rule::Format(regex) => {
                let text = value.to_text().unwrap_or_default();
                if !regex.is_match(&text) {
                    return fail(format!("{} is invalid", field));
                }
            }
            Rule::Length(length) => return self.check_length(length, value),
            Rule::Numericality(numericality) => return self.check_numericality(numericality, value, raw),
            Rule::Presence => {
                if value.is_blank() {
                    return fail(format!("{} can't be empty", field));
                }
            }
            Rule::Uniqueness(_) => {}
        }
        Vec::new()
    }

    fn check_length(&self, length: &Length, value: &Value) -> Vec<String> {
        let size = value.to_text().map(|s| s.chars().count()).unwrap_or(0);
        let too_short = |min: usize| {
            self.template(&length.too_short, "{field} too short (minimum {count} characters)", value, min.to_string())
        };
        let too_long = |max: usize| {
            self.template(&length.too_long, "{field} too long (maximum {count} characters)", value, max.to_string())
        };

        let mut messages = Vec::new();
        if let Some(is) = length.is {
            if size != is {
                messages.push(self.template(
                    &length.wrong_length,
                    "wrong length for {field} (must be {count} characters)",
                    value,
                    is.to_string(),
                ));
            }
        } else if let Some((min, max)) = length.within {
            if size < min {
                messages.push(too_short(min));
            }
            if size > max {
                messages.push(too_long(max));
            }
        } else {
            if let Some(min) = length.minimum.filter(|&m| size < m) {
                messages.push(too_short(min));
            }
            if let Some(max) = length.maximum.filter(|&m| size > m) {
                messages.push(too_long(max));
            }
        }
        messages
    }

    fn check_numericality(&self, numericality: &Numericality, value: &Value, raw: &Value) -> Vec<String> {
        let subject = if raw.is_null() { value } else { raw };
        let number = if numericality.only_integer {
            integer_of(subject).map(|i| i as f64)
        } else {
            subject.as_f64()
        };
        let Some(number) = number else {
            return vec![self.render(format!("value on {} is not a number", self.field), value, None)];
        };

        let too_small = |min: f64| {
            self.template(&numericality.too_small, "value on {field} is too small (minimum {count})", value, min.to_string())
        };
        let too_big = |max: f64| {
            self.template(&numericality.too_big, "value on {field} is too big (maximum {count})", value, max.to_string())
        };

        let mut messages = Vec::new();
        if let Some((min, max)) = numericality.within {
            if number < min {
                messages.push(too_small(min));
            }
            if number > max {
                messages.push(too_big(max));
            }
        } else {
            if let Some(min) = numericality.minimum.filter(|&m| number < m) {
                messages.push(too_small(min));
            }
            if let Some(max) = numericality.maximum.filter(|&m| number > m) {
                messages.push(too_big(max));
            }
        }
        messages
    }

    /// Failure message: the declared template, else `default`
    pub fn render(&self, default: String, value: &Value, count: Option<String>) -> String {
        let template = self.message.clone().unwrap_or(default);
        fill(&template, &self.field, value, count.as_deref())
    }

    fn template(&self, custom: &Option<String>, default: &str, value: &Value, count: String) -> String {
        let template = custom.as_deref().unwrap_or(default);
        fill(template, &self.field, value, Some(&count))
    }
}

fn integer_of(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Text(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn fill(template: &str, field: &str, value: &Value, count: Option<&str>) -> String {
    let mut message = template.replace("{field}", field).replace("{value}", &value.to_string());
    if let Some(count) = count {
        message = message.replace("{count}", count);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_order() {
        let mut kinds = vec![
            ValidationKind::Uniqueness,
            ValidationKind::Presence,
            ValidationKind::Acceptance,
            ValidationKind::Length,
        ];
        kinds.sort();
        assert_eq!(
            kinds,
            vec![
                ValidationKind::Acceptance,
                ValidationKind::Length,
                ValidationKind::Presence,
                ValidationKind::Uniqueness
            ]
        );
        assert_eq!(ValidationKind::ORDER[0], ValidationKind::Acceptance);
    }

    #[test]
    fn test_allow_nil() {
        let validation = Validation::length_of("name", Length::maximum(3)).allow_nil();
        assert!(validation.skips_blank(&Value::Null));
        assert!(validation.skips_blank(&Value::from("")));
        assert!(!validation.skips_blank(&Value::from("abcd")));

        // presence never skips
        let validation = Validation::presence_of("name").allow_nil();
        assert!(!validation.skips_blank(&Value::Null));
    }

    #[test]
    fn test_message_templates() {
        let validation = Validation::presence_of("title").message("{field} is required");
        assert_eq!(validation.render("unused".into(), &Value::Null, None), "title is required");
        assert_eq!(
            fill("{field} too long (maximum {count} characters)", "name", &Value::Null, Some("5")),
            "name too long (maximum 5 characters)"
        );
    }

    #[test]
    fn test_invalid_format_pattern() {
        assert!(Validation::format_of("email", "(unclosed").is_err());
        assert!(Validation::format_of("email", r"^\S+@\S+$").is_ok());
    }

    #[test]
    fn test_integer_detection() {
        assert_eq!(integer_of(&Value::from("12")), Some(12));
        assert_eq!(integer_of(&Value::from("1.5")), None);
        assert_eq!(integer_of(&Value::from(1.5)), None);
    }
}
