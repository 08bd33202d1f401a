//! Validation engine
//!
//! Runs a record's declared validations in a fixed order: custom
//! validators for the create-or-update moment, then for save, then each
//! rule batch (acceptance, confirmation, each, exclusion, inclusion,
//! format, length, numericality, presence, uniqueness) for the
//! create-or-update moment, then the same batches for save.

pub mod errors;
pub mod rules;

pub use errors::ValidationErrors;
pub use rules::{
    Condition, FieldCheck, Length, Moment, Numericality, RecordPredicate, Rule, Uniqueness,
    Validation, ValidationKind,
};

use std::fmt;
use std::sync::Arc;

use crate::error::{ModelError, ModelResult};
use crate::model::Record;
use crate::value::Value;

/// Record-level check; `Err(message)` records a failure under the
/// validator's name (an empty message gets the default text)
pub type ValidatorFn = Arc<dyn Fn(&Record) -> Result<(), String> + Send + Sync>;

/// A named custom validator bound to a moment
#[derive(Clone)]
pub struct CustomValidator {
    pub name: String,
    pub on: Moment,
    pub check: ValidatorFn,
}

impl fmt::Debug for CustomValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomValidator")
            .field("name", &self.name)
            .field("on", &self.on)
            .finish()
    }
}

/// Validate `record`, returning every failure message by field
pub async fn run(record: &Record) -> ModelResult<ValidationErrors> {
    let def = record.model().def();
    let action = if record.is_new_record() {
        Moment::Create
    } else {
        Moment::Update
    };
    let mut errors = ValidationErrors::new();

    for moment in [action, Moment::Save] {
        for validator in def.custom_validators.iter().filter(|v| v.on == moment) {
            if let Err(message) = (validator.check)(record) {
                let message = if message.is_empty() {
                    format!("validation failed on {}", validator.name)
                } else {
                    message
                };
                errors.add(validator.name.clone(), message);
            }
        }
    }

    for moment in [action, Moment::Save] {
        for kind in ValidationKind::ORDER {
            for validation in def
                .validations
                .iter()
                .filter(|v| v.on == moment && v.kind() == kind)
            {
                if !condition_holds(record, &validation.condition)? {
                    continue;
                }
                let value = record.read(&validation.field);
                if validation.skips_blank(&value) {
                    continue;
                }
                let messages = match &validation.rule {
                    Rule::Uniqueness(uniqueness) => check_uniqueness(record, validation, uniqueness, &value).await?,
                    _ => validation.check(record, &value, &record.raw(&validation.field)),
                };
                for message in messages {
                    errors.add(validation.field.clone(), message);
                }
            }
        }
    }

    if !errors.is_empty() {
        tracing::debug!(
            model = %def.class_name,
            failures = errors.count(),
            "Validation failed"
        );
    }
    Ok(errors)
}

fn condition_holds(record: &Record, condition: &Condition) -> ModelResult<bool> {
    match condition {
        Condition::Always => Ok(true),
        Condition::Never => Ok(false),
        Condition::Check(check) => Ok(check(record)),
        Condition::Named(name) => {
            let def = record.model().def();
            match def.predicates.get(name) {
                Some(predicate) => Ok(predicate(record)),
                None => Err(ModelError::UndefinedMethod {
                    model: def.class_name.clone(),
                    name: name.clone(),
                }),
            }
        }
    }
}

/// `COUNT(*)` of other rows sharing the value (and the scope values)
async fn check_uniqueness(
    record: &Record,
    validation: &Validation,
    uniqueness: &Uniqueness,
    value: &Value,
) -> ModelResult<Vec<String>> {
    let model = record.model();
    let field = validation.field.as_str();
    let mut conditions = Vec::new();
    let mut values = Vec::new();

    if value.is_null() {
        conditions.push(format!("{} IS NULL", field));
    } else if uniqueness.case_sensitive {
        conditions.push(format!("{} = ?", field));
        values.push(value.clone());
    } else {
        conditions.push(format!("LOWER({}) = ?", field));
        values.push(Value::from(value.to_text().unwrap_or_default().to_lowercase()));
    }

    for scope in &uniqueness.scope {
        let scoped = record.read(scope);
        if scoped.is_null() {
            conditions.push(format!("{} IS NULL", scope));
        } else {
            conditions.push(format!("{} = ?", scope));
            values.push(scoped);
        }
    }

    if !record.is_new_record() {
        conditions.push(format!("{} <> ?", model.primary_key()));
        values.push(record.id());
    }

    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {}",
        model.table_name(),
        conditions.join(" AND ")
    );
    let taken = model
        .connection()
        .select_value(&sql, &values)
        .await?
        .as_i64()
        .unwrap_or(0);

    if taken > 0 {
        Ok(vec![validation.render(format!("value for {} has been taken", field), value, None)])
    } else {
        Ok(Vec::new())
    }
}
