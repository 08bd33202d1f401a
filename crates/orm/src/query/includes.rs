//! Include trees for eager loading
//!
//! `"posts, tags"` loads two associations; nesting is expressed with
//! [`IncludeTree::nest`] or a JSON object such as `{"posts": "comments"}`.

use serde_json::Value as JsonValue;

/// Association names to load, each with its own nested includes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncludeTree {
    entries: Vec<(String, IncludeTree)>,
}

impl IncludeTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a comma separated list of association names
    pub fn parse(list: &str) -> Self {
        let mut tree = IncludeTree::new();
        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            tree = tree.add(name);
        }
        tree
    }

    /// Add one association without nested includes
    pub fn add(self, name: impl Into<String>) -> Self {
        self.nest(name, IncludeTree::new())
    }

    /// Add one association with nested includes; repeated names merge
    pub fn nest(mut self, name: impl Into<String>, nested: impl Into<IncludeTree>) -> Self {
        let name = name.into();
        let nested = nested.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => {
                for (child, grandchildren) in nested.entries {
                    *existing = std::mem::take(existing).nest(child, grandchildren);
                }
            }
            None => self.entries.push((name, nested)),
        }
        self
    }

    /// Accepts a string list, an array of strings or objects, or an object
    /// mapping names to nested includes
    pub fn from_json(json: &JsonValue) -> Self {
        match json {
            JsonValue::String(list) => IncludeTree::parse(list),
            JsonValue::Array(items) => items
                .iter()
                .fold(IncludeTree::new(), |tree, item| tree.merge(IncludeTree::from_json(item))),
            JsonValue::Object(map) => map.iter().fold(IncludeTree::new(), |tree, (name, nested)| {
                tree.nest(name.as_str(), IncludeTree::from_json(nested))
            }),
            _ => IncludeTree::new(),
        }
    }

    pub fn merge(mut self, other: IncludeTree) -> Self {
        for (name, nested) in other.entries {
            self = self.nest(name, nested);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IncludeTree)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&IncludeTree> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }
}

impl From<&str> for IncludeTree {
    fn from(list: &str) -> Self {
        IncludeTree::parse(list)
    }
}

impl From<String> for IncludeTree {
    fn from(list: String) -> Self {
        IncludeTree::parse(&list)
    }
}

impl From<Vec<&str>> for IncludeTree {
    fn from(names: Vec<&str>) -> Self {
        names.into_iter().fold(IncludeTree::new(), |tree, name| tree.add(name))
    }
}

impl From<&JsonValue> for IncludeTree {
    fn from(json: &JsonValue) -> Self {
        IncludeTree::from_json(json)
    }
}
