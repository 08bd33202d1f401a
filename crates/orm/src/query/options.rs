//! Find options and their normalization
//!
//! Callers describe a query with [`FindOptions`] (every key optional) or a
//! loosely-typed JSON bag; [`QueryOptions::normalize`] turns either into the
//! canonical form with every recognized key present and defaults filled in.

use std::collections::HashSet;

use serde_json::Value as JsonValue;

use super::includes::IncludeTree;
use crate::value::Value;

/// Lock fragment used for `lock: true`
pub const DEFAULT_LOCK: &str = "FOR UPDATE";

/// The `first` / `last` / `all` tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindMode {
    First,
    Last,
    All,
}

impl FindMode {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "first" => Some(FindMode::First),
            "last" => Some(FindMode::Last),
            "all" => Some(FindMode::All),
            _ => None,
        }
    }
}

/// First positional argument of `find`: a mode token, one id or many ids
#[derive(Debug, Clone, PartialEq)]
pub enum FindArg {
    Mode(FindMode),
    Id(Value),
    Ids(Vec<Value>),
}

impl FindArg {
    /// Collapse variadic ids: one id stays single, several become a list
    pub fn ids<I, V>(ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        if ids.len() == 1 {
            FindArg::Id(ids.remove(0))
        } else {
            FindArg::Ids(ids)
        }
    }
}

impl From<FindMode> for FindArg {
    fn from(mode: FindMode) -> Self {
        FindArg::Mode(mode)
    }
}

impl From<&str> for FindArg {
    fn from(token: &str) -> Self {
        match FindMode::parse(token) {
            Some(mode) => FindArg::Mode(mode),
            None => FindArg::Id(Value::from(token)),
        }
    }
}

impl From<i64> for FindArg {
    fn from(id: i64) -> Self {
        FindArg::Id(Value::Integer(id))
    }
}

impl From<i32> for FindArg {
    fn from(id: i32) -> Self {
        FindArg::Id(Value::from(id))
    }
}

/// Text naming a mode (`"all"`, `"first"`, `"last"`) selects that mode
impl From<Value> for FindArg {
    fn from(id: Value) -> Self {
        match &id {
            Value::Text(token) => match FindMode::parse(token) {
                Some(mode) => FindArg::Mode(mode),
                None => FindArg::Id(id),
            },
            _ => FindArg::Id(id),
        }
    }
}

impl<V: Into<Value>> From<Vec<V>> for FindArg {
    fn from(ids: Vec<V>) -> Self {
        FindArg::Ids(ids.into_iter().map(Into::into).collect())
    }
}

/// A WHERE fragment
#[derive(Debug, Clone, PartialEq)]
pub enum Conditions {
    /// Literal SQL, no placeholders
    Raw(String),
    /// SQL with `?` placeholders and their values
    Fragment(String, Vec<Value>),
    /// Column equality pairs joined with AND
    Equals(Vec<(String, Value)>),
}

impl Conditions {
    pub fn raw(sql: impl Into<String>) -> Self {
        Conditions::Raw(sql.into())
    }

    pub fn fragment<V: Into<Value>>(sql: impl Into<String>, values: Vec<V>) -> Self {
        Conditions::Fragment(sql.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn equals<K: Into<String>, V: Into<Value>>(pairs: Vec<(K, V)>) -> Self {
        Conditions::Equals(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// SQL text and the values its placeholders bind to
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        match self {
            Conditions::Raw(sql) => (sql.clone(), Vec::new()),
            Conditions::Fragment(sql, values) => (sql.clone(), values.clone()),
            Conditions::Equals(pairs) => {
                let mut values = Vec::with_capacity(pairs.len());
                let parts: Vec<String> = pairs
                    .iter()
                    .map(|(column, value)| {
                        if value.is_null() {
                            format!("{} IS NULL", column)
                        } else {
                            values.push(value.clone());
                            format!("{} = ?", column)
                        }
                    })
                    .collect();
                (parts.join(" AND "), values)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Conditions::Raw(sql) | Conditions::Fragment(sql, _) => sql.trim().is_empty(),
            Conditions::Equals(pairs) => pairs.is_empty(),
        }
    }

    /// Both fragments, parenthesized and joined with AND
    pub fn and(self, other: Conditions) -> Conditions {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        let (left, mut values) = self.to_sql();
        let (right, right_values) = other.to_sql();
        values.extend(right_values);
        Conditions::Fragment(format!("({}) AND ({})", left, right), values)
    }

    fn from_json(json: &JsonValue) -> Option<Self> {
        match json {
            JsonValue::String(sql) => Some(Conditions::Raw(sql.clone())),
            // ["user_id = ? AND name = ?", 5, "adrian"] or ["...", [5, "adrian"]]
            JsonValue::Array(items) => {
                let (first, rest) = items.split_first()?;
                let sql = first.as_str()?.to_string();
                let values = rest
                    .iter()
                    .flat_map(|v| match v {
                        JsonValue::Array(inner) => inner.clone(),
                        other => vec![other.clone()],
                    })
                    .map(Value::from_json)
                    .collect();
                Some(Conditions::Fragment(sql, values))
            }
            JsonValue::Object(map) => Some(Conditions::Equals(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v.clone())))
                    .collect(),
            )),
            _ => None,
        }
    }
}

impl From<&str> for Conditions {
    fn from(sql: &str) -> Self {
        Conditions::Raw(sql.to_string())
    }
}

impl From<String> for Conditions {
    fn from(sql: String) -> Self {
        Conditions::Raw(sql)
    }
}

/// Caller-facing find options; unset keys take their defaults
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub select: Option<String>,
    pub from: Option<String>,
    pub conditions: Option<Conditions>,
    pub group: Option<String>,
    pub having: Option<String>,
    pub order: Option<String>,
    pub joins: Option<String>,
    pub include: Option<IncludeTree>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub readonly: Option<bool>,
    pub lock: Option<String>,
    pub ids: Option<Vec<Value>>,
    /// Only used by calculations
    pub distinct: Option<bool>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, select: impl Into<String>) -> Self {
        self.select = Some(select.into());
        self
    }

    pub fn from_table(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn conditions(mut self, conditions: impl Into<Conditions>) -> Self {
        self.conditions = Some(conditions.into());
        self
    }

    /// `?`-parameterized WHERE fragment
    pub fn where_sql<V: Into<Value>>(mut self, sql: impl Into<String>, values: Vec<V>) -> Self {
        self.conditions = Some(Conditions::fragment(sql, values));
        self
    }

    /// Equality conditions on columns
    pub fn where_eq<K: Into<String>, V: Into<Value>>(mut self, pairs: Vec<(K, V)>) -> Self {
        self.conditions = Some(Conditions::equals(pairs));
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn having(mut self, having: impl Into<String>) -> Self {
        self.having = Some(having.into());
        self
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    pub fn joins(mut self, joins: impl Into<String>) -> Self {
        self.joins = Some(joins.into());
        self
    }

    pub fn include(mut self, include: impl Into<IncludeTree>) -> Self {
        self.include = Some(include.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = Some(true);
        self
    }

    /// `FOR UPDATE`
    pub fn lock(mut self) -> Self {
        self.lock = Some(DEFAULT_LOCK.to_string());
        self
    }

    /// Verbatim lock clause, e.g. `LOCK IN SHARE MODE`
    pub fn lock_with(mut self, clause: impl Into<String>) -> Self {
        self.lock = Some(clause.into());
        self
    }

    pub fn ids<V: Into<Value>>(mut self, ids: Vec<V>) -> Self {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = Some(true);
        self
    }

    /// Copy the recognized keys of a JSON object; anything else is ignored
    pub fn from_json(json: &JsonValue) -> Self {
        let mut options = FindOptions::default();
        let Some(map) = json.as_object() else {
            return options;
        };
        for (key, value) in map {
            match key.as_str() {
                "select" => options.select = value.as_str().map(str::to_string),
                "from" => options.from = value.as_str().map(str::to_string),
                "conditions" => options.conditions = Conditions::from_json(value),
                "group" => options.group = value.as_str().map(str::to_string),
                "having" => options.having = value.as_str().map(str::to_string),
                "order" => options.order = value.as_str().map(str::to_string),
                "joins" => options.joins = value.as_str().map(str::to_string),
                "include" => options.include = Some(IncludeTree::from_json(value)),
                "limit" => options.limit = value.as_u64(),
                "offset" => options.offset = value.as_u64(),
                "readonly" => options.readonly = value.as_bool(),
                "lock" => {
                    options.lock = match value {
                        JsonValue::Bool(true) => Some(DEFAULT_LOCK.to_string()),
                        JsonValue::String(s) => Some(s.clone()),
                        _ => None,
                    }
                }
                "ids" => {
                    options.ids = value
                        .as_array()
                        .map(|ids| ids.iter().cloned().map(Value::from_json).collect())
                }
                "distinct" => options.distinct = value.as_bool(),
                _ => {}
            }
        }
        options
    }

    /// Layer `overrides` on top of `self`: set keys win, conditions are
    /// ANDed together
    pub fn merge(mut self, overrides: FindOptions) -> Self {
        self.conditions = match (self.conditions.take(), overrides.conditions) {
            (Some(base), Some(extra)) => Some(base.and(extra)),
            (base, extra) => extra.or(base),
        };
        self.select = overrides.select.or(self.select);
        self.from = overrides.from.or(self.from);
        self.group = overrides.group.or(self.group);
        self.having = overrides.having.or(self.having);
        self.order = overrides.order.or(self.order);
        self.joins = overrides.joins.or(self.joins);
        self.include = overrides.include.or(self.include);
        self.limit = overrides.limit.or(self.limit);
        self.offset = overrides.offset.or(self.offset);
        self.readonly = overrides.readonly.or(self.readonly);
        self.lock = overrides.lock.or(self.lock);
        self.ids = overrides.ids.or(self.ids);
        self.distinct = overrides.distinct.or(self.distinct);
        self
    }

    /// AND an extra condition onto whatever is already set
    pub fn and_conditions(mut self, extra: Conditions) -> Self {
        self.conditions = Some(match self.conditions.take() {
            Some(base) => base.and(extra),
            None => extra,
        });
        self
    }
}

/// Canonical options: every recognized key present
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub select: Option<String>,
    pub from: String,
    pub conditions: Option<Conditions>,
    pub group: Option<String>,
    pub having: Option<String>,
    pub order: Option<String>,
    pub joins: Option<String>,
    pub include: IncludeTree,
    pub limit: Option<u64>,
    pub offset: u64,
    pub readonly: bool,
    pub lock: Option<String>,
    pub ids: Vec<Value>,
    pub distinct: bool,
}

impl QueryOptions {
    /// Fill defaults for `table`: `from` = table, offset 0, no conditions
    pub fn normalize(table: &str, options: FindOptions) -> Self {
        Self {
            select: options.select.filter(|s| !s.trim().is_empty()),
            from: options
                .from
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| table.to_string()),
            conditions: options.conditions.filter(|c| !c.is_empty()),
            group: options.group.filter(|s| !s.trim().is_empty()),
            having: options.having.filter(|s| !s.trim().is_empty()),
            order: options.order.filter(|s| !s.trim().is_empty()),
            joins: options.joins.filter(|s| !s.trim().is_empty()),
            include: options.include.unwrap_or_default(),
            limit: options.limit,
            offset: options.offset.unwrap_or(0),
            readonly: options.readonly.unwrap_or(false),
            lock: options.lock.filter(|s| !s.trim().is_empty()),
            ids: options.ids.unwrap_or_default(),
            distinct: options.distinct.unwrap_or(false),
        }
    }

    /// Fold a positional find argument in: ids become `ids`, the mode is
    /// returned for the caller to apply. When the options already carry
    /// `ids`, only ids in both lists are kept; an empty intersection
    /// matches no row.
    pub fn apply_arg(&mut self, arg: FindArg) -> FindMode {
        let requested = match arg {
            FindArg::Mode(mode) => return mode,
            FindArg::Id(id) => vec![id],
            FindArg::Ids(ids) => ids,
        };
        if self.ids.is_empty() {
            self.ids = requested;
            return FindMode::All;
        }

        let allowed: HashSet<String> = self.ids.iter().map(Value::key).collect();
        self.ids = requested
            .into_iter()
            .filter(|id| allowed.contains(&id.key()))
            .collect();
        if self.ids.is_empty() {
            let nothing = Conditions::raw("1 = 0");
            self.conditions = Some(match self.conditions.take() {
                Some(conditions) => conditions.and(nothing),
                None => nothing,
            });
        }
        FindMode::All
    }

    /// Reverse the order for `last`: none becomes `<table>.<pk> DESC`, a
    /// trailing DESC/ASC is flipped, anything else gets DESC appended
    pub fn reverse_order(&mut self, table: &str, primary_key: &str) {
        let order = match self.order.take() {
            None => format!("{}.{} DESC", table, primary_key),
            Some(order) => {
                let trimmed = order.trim_end();
                let upper = trimmed.to_ascii_uppercase();
                if upper.ends_with(" DESC") {
                    format!("{} ASC", &trimmed[..trimmed.len() - 5])
                } else if upper.ends_with(" ASC") {
                    format!("{} DESC", &trimmed[..trimmed.len() - 4])
                } else {
                    format!("{} DESC", trimmed)
                }
            }
        };
        self.order = Some(order);
    }

    pub fn has_include(&self) -> bool {
        !self.include.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_defaults() {
        let options = QueryOptions::normalize("tags", FindOptions::new());
        assert_eq!(options.from, "tags");
        assert_eq!(options.offset, 0);
        assert!(options.conditions.is_none());
        assert!(options.ids.is_empty());
        assert!(!options.readonly);
        assert!(options.include.is_empty());
    }

    #[test]
    fn test_json_bag_ignores_unknown_keys() {
        let options = FindOptions::from_json(&json!({
            "order": "name",
            "limit": 5,
            "colour": "blue",
            "lock": true,
            "conditions": ["user_id = ? AND name = ?", [5, "adrian"]]
        }));
        assert_eq!(options.order.as_deref(), Some("name"));
        assert_eq!(options.limit, Some(5));
        assert_eq!(options.lock.as_deref(), Some("FOR UPDATE"));
        assert_eq!(
            options.conditions,
            Some(Conditions::Fragment(
                "user_id = ? AND name = ?".into(),
                vec![Value::from(5), Value::from("adrian")]
            ))
        );
    }

    #[test]
    fn test_equality_conditions() {
        let (sql, values) = Conditions::equals(vec![("user_id", Value::from(5)), ("name", Value::from("x"))]).to_sql();
        assert_eq!(sql, "user_id = ? AND name = ?");
        assert_eq!(values.len(), 2);

        let (sql, values) = Conditions::equals(vec![("parent_id", Value::Null)]).to_sql();
        assert_eq!(sql, "parent_id IS NULL");
        assert!(values.is_empty());
    }

    #[test]
    fn test_merge_ands_conditions() {
        let base = FindOptions::new().where_sql("a = ?", vec![1]).order("name");
        let merged = base.merge(FindOptions::new().where_sql("b = ?", vec![2]).limit(3));
        let (sql, values) = merged.conditions.unwrap().to_sql();
        assert_eq!(sql, "(a = ?) AND (b = ?)");
        assert_eq!(values, vec![Value::from(1), Value::from(2)]);
        assert_eq!(merged.order.as_deref(), Some("name"));
        assert_eq!(merged.limit, Some(3));
    }

    #[test]
    fn test_find_args() {
        assert_eq!(FindArg::from("first"), FindArg::Mode(FindMode::First));
        assert_eq!(FindArg::ids(vec![3]), FindArg::Id(Value::from(3)));
        assert_eq!(FindArg::ids(vec![3, 4]), FindArg::Ids(vec![Value::from(3), Value::from(4)]));

        let mut options = QueryOptions::normalize("tags", FindOptions::new());
        assert_eq!(options.apply_arg(FindArg::from(7)), FindMode::All);
        assert_eq!(options.ids, vec![Value::from(7)]);
    }

    #[test]
    fn test_find_arg_intersects_option_ids() {
        let mut options = QueryOptions::normalize("tags", FindOptions::new().ids(vec![1, 2, 3]));
        options.apply_arg(FindArg::Ids(vec![Value::from(2), Value::from(3), Value::from(9)]));
        assert_eq!(options.ids, vec![Value::from(2), Value::from(3)]);
        assert!(options.conditions.is_none());

        let mut disjoint = QueryOptions::normalize("tags", FindOptions::new().ids(vec![1]));
        disjoint.apply_arg(FindArg::from(5));
        assert!(disjoint.ids.is_empty());
        let (sql, values) = disjoint.conditions.unwrap().to_sql();
        assert_eq!(sql, "1 = 0");
        assert!(values.is_empty());
    }

    #[test]
    fn test_reverse_order() {
        let mut options = QueryOptions::normalize("posts", FindOptions::new());
        options.reverse_order("posts", "id");
        assert_eq!(options.order.as_deref(), Some("posts.id DESC"));

        options.order = Some("title desc".into());
        options.reverse_order("posts", "id");
        assert_eq!(options.order.as_deref(), Some("title ASC"));

        options.order = Some("title ASC".into());
        options.reverse_order("posts", "id");
        assert_eq!(options.order.as_deref(), Some("title DESC"));

        options.order = Some("title".into());
        options.reverse_order("posts", "id");
        assert_eq!(options.order.as_deref(), Some("title DESC"));
    }
}
