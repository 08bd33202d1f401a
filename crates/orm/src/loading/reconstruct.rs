//! Row-to-graph reconstruction
//!
//! Each joined row carries one slice of columns per alias, in the order the
//! planner selected them. The root entity
//! is deduplicated against the last root seen, so rows of one root must
//! arrive contiguously. Included entities are deduplicated per parent,
//! which keeps sibling includes (posts and tags of one user) from
//! multiplying each other.

use std::collections::HashMap;

use crate::backends::Row;
use crate::model::associations::{AssociationState, Loaded};
use crate::model::Record;
use crate::value::Value;

use super::planner::EagerPlan;

struct Node {
    include: usize,
    parent: Option<usize>,
    record: Option<Record>,
}

/// Turn joined rows into root records with their included associations
pub(crate) fn records(plan: &EagerPlan, rows: Vec<Row>, readonly: bool) -> Vec<Record> {
    if rows.is_empty() {
        return Vec::new();
    }

    let mut nodes: Vec<Node> = Vec::new();
    let mut roots: Vec<usize> = Vec::new();
    let mut last_root: Option<String> = None;
    let mut seen: HashMap<(usize, usize), HashMap<String, usize>> = HashMap::new();
    let mut current: Vec<Option<usize>> = vec![None; plan.includes.len()];

    for row in rows {
        let mut slices: Vec<Vec<(String, Value)>> = vec![Vec::new(); plan.includes.len()];
        for (position, (_, value)) in row.into_pairs().enumerate() {
            if let Some((index, column)) = plan.column_at(position) {
                slices[index].push((column.to_string(), value));
            }
        }

        for (index, info) in plan.includes.iter().enumerate() {
            let key_column = info.model.primary_key();
            let key = slices[index]
                .iter()
                .find(|(column, _)| column == key_column)
                .map(|(_, value)| value.clone())
                .unwrap_or(Value::Null);
            if key.is_null() {
                current[index] = None;
                continue;
            }
            let key = key.key();

            match info.parent {
                None => {
                    if last_root.as_deref() != Some(key.as_str()) {
                        let id = push_node(&mut nodes, plan, index, None, &mut slices[index], readonly);
                        roots.push(id);
                        last_root = Some(key);
                        current[index] = Some(id);
                    }
                }
                Some(parent) => {
                    let Some(parent_node) = current[parent] else {
                        current[index] = None;
                        continue;
                    };
                    let known = seen.entry((parent_node, index)).or_default();
                    let id = match known.get(&key) {
                        Some(&id) => id,
                        None => {
                            let id = push_node(&mut nodes, plan, index, Some(parent_node), &mut slices[index], readonly);
                            known.insert(key, id);
                            id
                        }
                    };
                    current[index] = Some(id);
                }
            }
        }
    }

    // children always come after their parent, so walking backwards
    // finishes every record before it is attached
    for id in (0..nodes.len()).rev() {
        let Some(parent) = nodes[id].parent else {
            continue;
        };
        let Some(record) = nodes[id].record.take() else {
            continue;
        };
        let info = &plan.includes[nodes[id].include];
        if let Some(owner) = nodes[parent].record.as_mut() {
            if let Some(state) = owner.associations.get_mut(&info.relation) {
                match &mut state.loaded {
                    Loaded::Many(records) => records.insert(0, record),
                    Loaded::One(slot) => *slot = Some(Box::new(record)),
                }
            }
        }
    }

    roots
        .into_iter()
        .filter_map(|id| nodes[id].record.take())
        .collect()
}

fn push_node(
    nodes: &mut Vec<Node>,
    plan: &EagerPlan,
    include: usize,
    parent: Option<usize>,
    slice: &mut Vec<(String, Value)>,
    readonly: bool,
) -> usize {
    let info = &plan.includes[include];
    let mut record = Record::from_pairs(info.model.clone(), std::mem::take(slice), readonly);
    for (_, child) in plan.children_of(include) {
        let empty = if child.plural {
            Loaded::Many(Vec::new())
        } else {
            Loaded::One(None)
        };
        record.associations.insert(
            child.relation.clone(),
            AssociationState {
                loaded: empty,
                pending: false,
            },
        );
    }
    nodes.push(Node {
        include,
        parent,
        record: Some(record),
    });
    nodes.len() - 1
}
