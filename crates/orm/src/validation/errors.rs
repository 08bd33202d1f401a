//! Validation error map

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Field name to failure messages, in the order they were raised
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationErrors {
    errors: HashMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message for a field
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.entry(field.into()).or_default().push(message.into());
    }

    /// Messages for one field; empty when the field passed
    pub fn get_on(&self, field: &str) -> &[String] {
        self.errors.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_field_errors(&self, field: &str) -> bool {
        !self.get_on(field).is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.values().all(Vec::is_empty)
    }

    /// Number of fields with errors
    pub fn len(&self) -> usize {
        self.errors.values().filter(|v| !v.is_empty()).count()
    }

    /// Total number of messages across all fields
    pub fn count(&self) -> usize {
        self.errors.values().map(Vec::len).sum()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.errors.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn clear(&mut self) {
        self.errors.clear();
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        for (field, messages) in other.errors {
            self.errors.entry(field).or_default().extend(messages);
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!(self.errors)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "No validation errors");
        }
        write!(f, "Validation failed for {} field(s):", self.len())?;
        let mut fields: Vec<_> = self.errors.iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        for (field, messages) in fields {
            for message in messages {
                write!(f, "\n  {}: {}", field, message)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_lookup() {
        let mut errors = ValidationErrors::new();
        errors.add("title", "title can't be empty");
        errors.add("title", "title too short (minimum 3 characters)");
        errors.add("email", "email is invalid");

        assert_eq!(errors.get_on("title").len(), 2);
        assert!(errors.get_on("body").is_empty());
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.count(), 3);
        assert!(errors.to_string().contains("email: email is invalid"));
    }

    #[test]
    fn test_merge() {
        let mut a = ValidationErrors::new();
        a.add("name", "one");
        let mut b = ValidationErrors::new();
        b.add("name", "two");
        a.merge(b);
        assert_eq!(a.get_on("name"), ["one".to_string(), "two".to_string()]);
    }
}
