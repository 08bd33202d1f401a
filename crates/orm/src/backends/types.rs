//! Semantic column types, DDL field options and introspection records

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::ModelError;
use crate::value::{Value, DATETIME_FORMAT, DATE_FORMAT, TIME_FORMAT};

/// Engine-independent column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Binary,
    Boolean,
    Date,
    DateTime,
    Decimal,
    Float,
    Integer,
    String,
    Text,
    RichText,
    Time,
    Timestamp,
    /// DDL-only pseudo type expanding into `<name>_type` and `<name>_id`
    Polymorphic,
}

impl ColumnType {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Binary => "binary",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::DateTime => "datetime",
            ColumnType::Decimal => "decimal",
            ColumnType::Float => "float",
            ColumnType::Integer => "integer",
            ColumnType::String => "string",
            ColumnType::Text => "text",
            ColumnType::RichText => "richtext",
            ColumnType::Time => "time",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Polymorphic => "polymorphic",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float | ColumnType::Decimal)
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, ColumnType::String | ColumnType::Text | ColumnType::RichText)
    }

    /// Convert a raw assigned value to this column's representation
    pub fn cast(&self, value: Value) -> Value {
        if value.is_null() {
            return value;
        }
        match self {
            ColumnType::String | ColumnType::Text | ColumnType::RichText => match value {
                Value::Text(_) | Value::Json(_) => value,
                other => other.to_text().map(Value::Text).unwrap_or(Value::Null),
            },
            ColumnType::Integer => match value {
                Value::Integer(_) => value,
                Value::Text(ref s) if s.trim().is_empty() => Value::Null,
                Value::Text(ref s) => Value::Integer(leading_integer(s)),
                other => other.as_i64().map(Value::Integer).unwrap_or(Value::Null),
            },
            ColumnType::Float | ColumnType::Decimal => match value {
                Value::Float(_) => value,
                Value::Text(ref s) if s.trim().is_empty() => Value::Null,
                Value::Text(ref s) => Value::Float(leading_float(s)),
                other => other.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            ColumnType::Boolean => value.as_bool().map(Value::Bool).unwrap_or(Value::Null),
            ColumnType::Date => match value {
                Value::Date(_) => value,
                Value::DateTime(dt) => Value::Date(dt.date()),
                Value::Text(ref s) if s.trim().is_empty() => Value::Null,
                Value::Text(s) => parse_date(&s).map(Value::Date).unwrap_or(Value::Text(s)),
                other => other,
            },
            ColumnType::DateTime | ColumnType::Timestamp => match value {
                Value::DateTime(_) => value,
                Value::Date(d) => Value::DateTime(d.and_time(NaiveTime::MIN)),
                Value::Integer(ts) => DateTime::from_timestamp(ts, 0)
                    .map(|dt| Value::DateTime(dt.naive_utc()))
                    .unwrap_or(Value::Integer(ts)),
                Value::Text(ref s) if s.trim().is_empty() => Value::Null,
                Value::Text(s) => parse_datetime(&s)
                    .map(Value::DateTime)
                    .unwrap_or(Value::Text(s)),
                other => other,
            },
            ColumnType::Time => match value {
                Value::Time(_) => value,
                Value::DateTime(dt) => Value::Time(dt.time()),
                Value::Text(s) => NaiveTime::parse_from_str(s.trim(), TIME_FORMAT)
                    .or_else(|_| NaiveTime::parse_from_str(s.trim(), "%H:%M"))
                    .map(Value::Time)
                    .unwrap_or(Value::Text(s)),
                other => other,
            },
            ColumnType::Binary => match value {
                Value::Text(s) => Value::Blob(s.into_bytes()),
                other => other,
            },
            ColumnType::Polymorphic => value,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ColumnType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" => Ok(ColumnType::Binary),
            "boolean" => Ok(ColumnType::Boolean),
            "date" => Ok(ColumnType::Date),
            "datetime" => Ok(ColumnType::DateTime),
            "decimal" => Ok(ColumnType::Decimal),
            "float" => Ok(ColumnType::Float),
            "integer" => Ok(ColumnType::Integer),
            "string" => Ok(ColumnType::String),
            "text" => Ok(ColumnType::Text),
            "richtext" => Ok(ColumnType::RichText),
            "time" => Ok(ColumnType::Time),
            "timestamp" => Ok(ColumnType::Timestamp),
            "polymorphic" => Ok(ColumnType::Polymorphic),
            other => Err(ModelError::Schema(format!("Unknown column type '{}'", other))),
        }
    }
}

fn leading_integer(s: &str) -> i64 {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return i;
    }
    if let Ok(f) = s.parse::<f64>() {
        return f as i64;
    }
    let end = s
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+')))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    s[..end].parse::<i64>().unwrap_or(0)
}

fn leading_float(s: &str) -> f64 {
    let s = s.trim();
    if let Ok(f) = s.parse::<f64>() {
        return f;
    }
    let end = s
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+')))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    s[..end].parse::<f64>().unwrap_or(0.0)
}

pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .ok()
        .or_else(|| parse_datetime(s).map(|dt| dt.date()))
}

pub(crate) fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    const FORMATS: [&str; 4] = [
        DATETIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc()))
        .or_else(|| {
            NaiveDate::parse_from_str(s, DATE_FORMAT)
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// Options accepted by table creation and column alteration
#[derive(Debug, Clone, PartialEq)]
pub struct FieldOptions {
    pub column_type: ColumnType,
    pub limit: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub null: bool,
    pub default: Option<Value>,
}

impl FieldOptions {
    pub fn new(column_type: ColumnType) -> Self {
        Self {
            column_type,
            limit: None,
            precision: None,
            scale: None,
            null: false,
            default: None,
        }
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn scale(mut self, scale: u32) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.null = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Expand the `polymorphic` pseudo type into its two physical columns
    pub fn expand(name: &str, options: &FieldOptions) -> Vec<(String, FieldOptions)> {
        if options.column_type != ColumnType::Polymorphic {
            return vec![(name.to_string(), options.clone())];
        }
        let mut type_column = options.clone();
        type_column.column_type = ColumnType::String;
        let mut id_column = options.clone();
        id_column.column_type = ColumnType::Integer;
        vec![
            (format!("{}_type", name), type_column),
            (format!("{}_id", name), id_column),
        ]
    }
}

impl From<ColumnType> for FieldOptions {
    fn from(column_type: ColumnType) -> Self {
        FieldOptions::new(column_type)
    }
}

/// Table creation options
#[derive(Debug, Clone, PartialEq)]
pub struct TableOptions {
    /// Add an auto-incrementing `id` primary key
    pub primary: bool,
    /// Raw suffix appended after the column list (e.g. `engine=InnoDB`)
    pub suffix: Option<String>,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            primary: true,
            suffix: None,
        }
    }
}

impl TableOptions {
    pub fn without_primary_key() -> Self {
        Self {
            primary: false,
            suffix: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexOptions {
    pub name: Option<String>,
    pub unique: bool,
}

impl IndexOptions {
    /// Index name used when none is given: the columns joined with `_and_`
    pub fn resolved_name(&self, columns: &[&str]) -> String {
        self.name.clone().unwrap_or_else(|| columns.join("_and_"))
    }
}

/// Column description returned by introspection
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    /// Semantic type, `None` when the native type has no mapping
    pub column_type: Option<ColumnType>,
    pub sql_type: String,
    pub limit: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub null: bool,
    pub default: Value,
    pub primary: bool,
}

impl ColumnInfo {
    pub fn cast(&self, value: Value) -> Value {
        match self.column_type {
            Some(ty) => ty.cast(value),
            None => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub table: String,
    pub name: String,
    pub unique: bool,
}

/// One entry of an adapter's native type table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NativeType {
    pub column_type: ColumnType,
    pub name: &'static str,
    pub limit: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
}

impl NativeType {
    pub const fn plain(column_type: ColumnType, name: &'static str) -> Self {
        Self {
            column_type,
            name,
            limit: None,
            precision: None,
            scale: None,
        }
    }

    pub const fn limited(column_type: ColumnType, name: &'static str, limit: u32) -> Self {
        Self {
            column_type,
            name,
            limit: Some(limit),
            precision: None,
            scale: None,
        }
    }

    pub const fn decimal(name: &'static str, precision: u32, scale: u32) -> Self {
        Self {
            column_type: ColumnType::Decimal,
            name,
            limit: None,
            precision: Some(precision),
            scale: Some(scale),
        }
    }
}

/// Semantic to native type mapping table of one adapter
#[derive(Debug, Clone, Copy)]
pub struct NativeTypeMap(pub &'static [NativeType]);

impl NativeTypeMap {
    pub fn get(&self, column_type: ColumnType) -> Option<&NativeType> {
        self.0.iter().find(|n| n.column_type == column_type)
    }

    /// Render the native SQL type for a semantic type
    pub fn type_to_sql(
        &self,
        column_type: ColumnType,
        limit: Option<u32>,
        precision: Option<u32>,
        scale: Option<u32>,
    ) -> Result<String, ModelError> {
        let native = self.get(column_type).ok_or_else(|| {
            ModelError::Schema(format!("No native type for '{}'", column_type))
        })?;

        if column_type == ColumnType::Decimal {
            let precision = precision.or(native.precision);
            let scale = scale.or(native.scale);
            return Ok(match (precision, scale) {
                (Some(p), Some(s)) => format!("{}({}, {})", native.name, p, s),
                (Some(p), None) => format!("{}({})", native.name, p),
                _ => native.name.to_string(),
            });
        }

        Ok(match limit.or(native.limit) {
            Some(limit) => format!("{}({})", native.name, limit),
            None => native.name.to_string(),
        })
    }

    /// Map an introspected native type (`varchar(255)`, `decimal(11,4)`) back
    /// to its semantic type and size arguments
    pub fn parse_sql_type(&self, sql_type: &str) -> (Option<ColumnType>, Option<u32>, Option<u32>, Option<u32>) {
        let lowered = sql_type.trim().to_ascii_lowercase();
        let (base, args) = match lowered.find('(') {
            Some(open) => {
                let close = lowered.rfind(')').unwrap_or(lowered.len());
                (lowered[..open].trim().to_string(), lowered[open + 1..close].to_string())
            }
            None => (lowered.split_whitespace().next().unwrap_or("").to_string(), String::new()),
        };
        let numbers: Vec<u32> = args
            .split(',')
            .filter_map(|a| a.trim().parse::<u32>().ok())
            .collect();

        let by_limit = self
            .0
            .iter()
            .find(|n| n.name == base && n.limit.is_some() && n.limit == numbers.first().copied());
        let native = by_limit.or_else(|| {
            self.0
                .iter()
                .find(|n| n.name == base && (n.limit.is_none() || numbers.is_empty()))
        });

        let column_type = native.map(|n| n.column_type).or_else(|| guess_type(&base));
        match column_type {
            Some(ColumnType::Decimal) => (
                column_type,
                None,
                numbers.first().copied(),
                numbers.get(1).copied(),
            ),
            _ => (column_type, numbers.first().copied(), None, None),
        }
    }
}

fn guess_type(base: &str) -> Option<ColumnType> {
    if base.contains("int") {
        Some(ColumnType::Integer)
    } else if base.contains("char") || base.contains("clob") {
        Some(ColumnType::String)
    } else if base.contains("text") {
        Some(ColumnType::Text)
    } else if base.contains("real") || base.contains("floa") || base.contains("doub") {
        Some(ColumnType::Float)
    } else if base.contains("dec") || base.contains("num") {
        Some(ColumnType::Decimal)
    } else if base.contains("blob") || base.contains("binary") {
        Some(ColumnType::Binary)
    } else if base.contains("bool") {
        Some(ColumnType::Boolean)
    } else if base.contains("datetime") || base.contains("timestamp") {
        Some(ColumnType::DateTime)
    } else if base == "date" {
        Some(ColumnType::Date)
    } else if base == "time" {
        Some(ColumnType::Time)
    } else {
        None
    }
}

/// Strip surrounding quotes from an introspected default value
pub(crate) fn unquote_default(raw: &str) -> String {
    let trimmed = raw.trim();
    for quote in ['\'', '"'] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}

/// Render a default value as a SQL literal for DDL
pub(crate) fn default_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        other => format!("'{}'", other.to_text().unwrap_or_default().replace('\'', "''")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_TYPES: NativeTypeMap = NativeTypeMap(&[
        NativeType::limited(ColumnType::Boolean, "tinyint", 1),
        NativeType::decimal("decimal", 11, 4),
        NativeType::limited(ColumnType::Integer, "int", 11),
        NativeType::limited(ColumnType::String, "varchar", 255),
        NativeType::plain(ColumnType::RichText, "longtext"),
    ]);

    #[test]
    fn test_cast_integer() {
        assert_eq!(ColumnType::Integer.cast(Value::from("42")), Value::Integer(42));
        assert_eq!(ColumnType::Integer.cast(Value::from("12abc")), Value::Integer(12));
        assert_eq!(ColumnType::Integer.cast(Value::from("")), Value::Null);
        assert_eq!(ColumnType::Integer.cast(Value::from(true)), Value::Integer(1));
    }

    #[test]
    fn test_cast_boolean() {
        assert_eq!(ColumnType::Boolean.cast(Value::from("1")), Value::Bool(true));
        assert_eq!(ColumnType::Boolean.cast(Value::from("0")), Value::Bool(false));
        assert_eq!(ColumnType::Boolean.cast(Value::from(0)), Value::Bool(false));
    }

    #[test]
    fn test_cast_dates() {
        let d = ColumnType::Date.cast(Value::from("2024-02-29"));
        assert_eq!(d, Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()));

        let dt = ColumnType::DateTime.cast(Value::from("2024-02-29 10:11:12"));
        assert!(matches!(dt, Value::DateTime(_)));
        assert_eq!(dt.to_text().unwrap(), "2024-02-29 10:11:12");
    }

    #[test]
    fn test_type_to_sql() {
        assert_eq!(
            TEST_TYPES.type_to_sql(ColumnType::String, None, None, None).unwrap(),
            "varchar(255)"
        );
        assert_eq!(
            TEST_TYPES.type_to_sql(ColumnType::String, Some(40), None, None).unwrap(),
            "varchar(40)"
        );
        assert_eq!(
            TEST_TYPES.type_to_sql(ColumnType::Decimal, None, Some(8), None).unwrap(),
            "decimal(8, 4)"
        );
        assert!(TEST_TYPES.type_to_sql(ColumnType::Time, None, None, None).is_err());
    }

    #[test]
    fn test_parse_sql_type() {
        assert_eq!(TEST_TYPES.parse_sql_type("tinyint(1)").0, Some(ColumnType::Boolean));
        assert_eq!(TEST_TYPES.parse_sql_type("int(11)").0, Some(ColumnType::Integer));
        assert_eq!(TEST_TYPES.parse_sql_type("tinyint(4)").0, Some(ColumnType::Integer));
        let (ty, _, p, s) = TEST_TYPES.parse_sql_type("decimal(11,4)");
        assert_eq!((ty, p, s), (Some(ColumnType::Decimal), Some(11), Some(4)));
        assert_eq!(TEST_TYPES.parse_sql_type("bigint").0, Some(ColumnType::Integer));
    }

    #[test]
    fn test_polymorphic_expansion() {
        let expanded = FieldOptions::expand("commentable", &FieldOptions::new(ColumnType::Polymorphic));
        assert_eq!(expanded[0].0, "commentable_type");
        assert_eq!(expanded[0].1.column_type, ColumnType::String);
        assert_eq!(expanded[1].0, "commentable_id");
        assert_eq!(expanded[1].1.column_type, ColumnType::Integer);
    }
}
