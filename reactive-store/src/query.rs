// This file is part of midnight-ledger.
// Copyright (C) 2025 Midnight Foundation
// SPDX-License-Identifier: Apache-2.0
// Licensed under the Apache License, Version 2.0 (the "License");
// You may not use this file except in compliance with the License.
// You may obtain a copy of the License at
// http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! C9: the query layer. `walk`, `query`/`digest`, `sort`, `sum`,
//! `get_node_by_attr`/`get_node_by_value`, `deepcopy`, `update` — all
//! operating over already-materialised values (`spec.md` §4.6). None of
//! these suspend: a deep `query` over unresolved lazy children sees
//! whatever value currently sits in the node, the same contract `walk`
//! documents for callback mode.

use crate::container::Store;
use crate::ids::{ContainerId, NodeId};
use crate::label_table::Position;
use crate::value::{compare_values, Value};
use indexmap::IndexMap;
use std::cmp::Ordering;

/// A single selector out of a `what`/`key` CSV, e.g. `#k`, `#v`, `#a.color`,
/// `#p`, `#__v`, or a dotted subpath into the child's value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selector {
    Label,
    Value,
    Attr(String),
    Path,
    NodeObject,
    Subpath(String),
}

impl Selector {
    pub fn parse(raw: &str) -> Selector {
        match raw {
            "#k" => Selector::Label,
            "#v" => Selector::Value,
            "#p" => Selector::Path,
            "#__v" => Selector::NodeObject,
            other if other.starts_with("#a.") => Selector::Attr(other["#a.".len()..].to_string()),
            other => Selector::Subpath(other.to_string()),
        }
    }

    pub fn parse_csv(csv: &str) -> Vec<Selector> {
        csv.split(',').map(Selector::parse).collect()
    }
}

/// Sort-key mode suffix: `:a`/`:A`/`:d`/`:D` (`spec.md` §4.2 `sort`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortMode {
    AscCi,
    AscCs,
    DescCi,
    DescCs,
}

#[derive(Clone, Debug)]
pub struct SortKey {
    pub selector: Selector,
    pub mode: SortMode,
}

impl SortKey {
    pub fn parse_csv(csv: &str) -> Vec<SortKey> {
        csv.split(',').map(SortKey::parse_one).collect()
    }

    fn parse_one(raw: &str) -> SortKey {
        let (sel, mode) = match raw.rsplit_once(':') {
            Some((s, "a")) => (s, SortMode::AscCi),
            Some((s, "A")) => (s, SortMode::AscCs),
            Some((s, "d")) => (s, SortMode::DescCi),
            Some((s, "D")) => (s, SortMode::DescCs),
            _ => (raw, SortMode::AscCi),
        };
        SortKey {
            selector: Selector::parse(sel),
            mode,
        }
    }
}

/// Three-valued container-ness filter (`spec.md` §4.6 `leaf`/`branch`).
#[derive(Clone, Copy, Debug, Default)]
pub struct Tristate(Option<bool>);

impl Tristate {
    pub const ANY: Tristate = Tristate(None);
    pub fn yes() -> Self {
        Tristate(Some(true))
    }
    pub fn no() -> Self {
        Tristate(Some(false))
    }
    fn matches(self, is_container: bool) -> bool {
        match self.0 {
            None => true,
            Some(want) => want == is_container,
        }
    }
}

fn projection(store: &Store, _container: ContainerId, label: &str, node_id: NodeId, path: &str, sel: &Selector) -> Value {
    match sel {
        Selector::Label => Value::Str(label.to_string()),
        Selector::Value => store.node(node_id).unwrap().value().clone(),
        Selector::Path => Value::Str(path.to_string()),
        Selector::NodeObject => Value::Node(node_id),
        Selector::Attr(a) => store.get_attr(node_id, a, None),
        Selector::Subpath(sub) => {
            let node = store.node(node_id).unwrap();
            match node.value().as_container_id() {
                Some(cid) => {
                    if let Some(child) = store.container_children(cid).find(|(l, _)| *l == sub) {
                        store.node(child.1).unwrap().value().clone()
                    } else {
                        Value::Null
                    }
                }
                None => Value::Null,
            }
        }
    }
}

/// Depth-first, pre-order walk. `deep=false` visits direct children only.
pub fn walk(store: &Store, container: ContainerId, deep: bool, mut visit: impl FnMut(&str, NodeId)) {
    walk_inner(store, container, "", deep, &mut visit);
}

fn walk_inner(
    store: &Store,
    container: ContainerId,
    prefix: &str,
    deep: bool,
    visit: &mut impl FnMut(&str, NodeId),
) {
    for (label, node_id) in store.container_children(container) {
        let path = if prefix.is_empty() {
            label.to_string()
        } else {
            format!("{prefix}.{label}")
        };
        visit(&path, node_id);
        if deep {
            if let Some(cid) = store.node(node_id).unwrap().value().as_container_id() {
                walk_inner(store, cid, &path, deep, visit);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn query_sync(
    store: &Store,
    container: ContainerId,
    what: &str,
    condition: Option<&dyn Fn(&Store, NodeId) -> bool>,
    deep: bool,
    leaf: Option<Tristate>,
    branch: Option<Tristate>,
    limit: Option<usize>,
) -> Vec<Value> {
    let selectors = Selector::parse_csv(what);
    let leaf = leaf.unwrap_or(Tristate::ANY);
    let branch = branch.unwrap_or(Tristate::ANY);
    let mut out = Vec::new();
    walk(store, container, deep, |path, node_id| {
        if let Some(lim) = limit {
            if out.len() >= lim {
                return;
            }
        }
        let is_container = store.node(node_id).unwrap().value().is_container();
        if !leaf.matches(!is_container) || !branch.matches(is_container) {
            return;
        }
        if let Some(cond) = condition {
            if !cond(store, node_id) {
                return;
            }
        }
        let label = path.rsplit_once('.').map_or(path, |(_, b)| b);
        // Multi-selector `what` collapses to the first selector here;
        // callers needing full tuples use `query_tuples`.
        out.push(projection(store, container, label, node_id, path, &selectors[0]));
    });
    out
}

/// Multi-selector form of `query`, returning full tuples rather than
/// collapsing to the first selector.
#[allow(clippy::too_many_arguments)]
pub fn query_tuples(
    store: &Store,
    container: ContainerId,
    what: &str,
    condition: Option<&dyn Fn(&Store, NodeId) -> bool>,
    deep: bool,
    leaf: Option<Tristate>,
    branch: Option<Tristate>,
    limit: Option<usize>,
) -> Vec<Vec<Value>> {
    let selectors = Selector::parse_csv(what);
    let leaf = leaf.unwrap_or(Tristate::ANY);
    let branch = branch.unwrap_or(Tristate::ANY);
    let mut out = Vec::new();
    walk(store, container, deep, |path, node_id| {
        if let Some(lim) = limit {
            if out.len() >= lim {
                return;
            }
        }
        let is_container = store.node(node_id).unwrap().value().is_container();
        if !leaf.matches(!is_container) || !branch.matches(is_container) {
            return;
        }
        if let Some(cond) = condition {
            if !cond(store, node_id) {
                return;
            }
        }
        let label = path.rsplit_once('.').map_or(path, |(_, b)| b);
        let row: Vec<Value> = selectors
            .iter()
            .map(|s| projection(store, container, label, node_id, path, s))
            .collect();
        out.push(row);
    });
    out
}

pub fn get_node_by_attr(store: &Store, container: ContainerId, attr: &str, value: &Value, deep: bool) -> Option<NodeId> {
    let mut found = None;
    walk(store, container, deep, |_path, node_id| {
        if found.is_some() {
            return;
        }
        if store.get_attr(node_id, attr, None) == *value {
            found = Some(node_id);
        }
    });
    found
}

pub fn get_node_by_value(store: &Store, container: ContainerId, value: &Value, deep: bool) -> Option<NodeId> {
    let mut found = None;
    walk(store, container, deep, |_path, node_id| {
        if found.is_some() {
            return;
        }
        if store.node(node_id).unwrap().value() == value {
            found = Some(node_id);
        }
    });
    found
}

/// `sort(key)`: reorders direct children only; stable within equal keys
/// (`spec.md` §4.2, P4).
pub fn sort(store: &mut Store, container: ContainerId, key: &str) {
    let keys = SortKey::parse_csv(key);
    let children: Vec<(String, NodeId)> = store
        .container_children(container)
        .map(|(l, n)| (l.to_string(), n))
        .collect();
    let mut ordered: Vec<(String, NodeId)> = children;
    ordered.sort_by(|(la, na), (lb, nb)| {
        for k in &keys {
            let va = projection(store, container, la, *na, la, &k.selector);
            let vb = projection(store, container, lb, *nb, lb, &k.selector);
            let (case_sensitive, reverse) = match k.mode {
                SortMode::AscCi => (false, false),
                SortMode::AscCs => (true, false),
                SortMode::DescCi => (false, true),
                SortMode::DescCs => (true, true),
            };
            let ord = compare_values(&va, &vb, case_sensitive);
            let ord = if reverse { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    for (target_index, (label, _)) in ordered.iter().enumerate() {
        store.reposition_in_place(container, label, target_index);
    }
}

/// `sum(what, condition, deep)`: numeric fold over `query`'s projections,
/// skipping non-numeric results rather than erroring (P11).
pub fn sum(
    store: &Store,
    container: ContainerId,
    what: &str,
    condition: Option<&dyn Fn(&Store, NodeId) -> bool>,
    deep: bool,
) -> f64 {
    query_sync(store, container, what, condition, deep, None, None, None)
        .iter()
        .filter_map(Value::as_f64)
        .sum()
}

/// `deepcopy()`: recursively copies containers and nodes. Resolvers are
/// referenced (shared `Arc`), not re-run; the cached value at copy time is
/// re-cached under the new node (`spec.md` §4.2).
pub fn deepcopy(store: &mut Store, container: ContainerId) -> ContainerId {
    let new_container = store.new_detached_container();
    let children: Vec<(String, NodeId)> = store
        .container_children(container)
        .map(|(l, n)| (l.to_string(), n))
        .collect();
    for (label, node_id) in children {
        let value = store.node(node_id).unwrap().value().clone();
        let attrs = store.node(node_id).unwrap().attrs().clone();
        let new_value = if let Some(cid) = value.as_container_id() {
            Value::Container(deepcopy(store, cid))
        } else {
            value
        };
        let cloned_resolver = store.node(node_id).and_then(|n| n.resolver()).map(|r| r.clone_handle());
        let new_node = store.set(
            new_container,
            &label,
            new_value,
            attrs,
            Position::End,
            None,
            false,
        );
        if let (Ok(new_node), Some(resolver)) = (new_node, cloned_resolver) {
            store.attach_resolver(new_node, resolver);
        }
    }
    new_container
}

/// `update(other, ignore_none)`: merges a flat value map into `container`.
/// Values that are themselves `Value::Container` replace the child whole;
/// to recurse into matching containers on both sides, use
/// [`update_container`].
pub fn update(store: &mut Store, container: ContainerId, other: &IndexMap<String, Value>, ignore_none: bool) {
    for (label, value) in other {
        if ignore_none && value.is_null() {
            continue;
        }
        let _ = store.set(container, label, value.clone(), IndexMap::new(), Position::End, None, false);
    }
}

/// Container-to-container form of `update`, recursing into matching
/// children that are containers on both sides.
pub fn update_container(store: &mut Store, container: ContainerId, other: ContainerId, ignore_none: bool) {
    let other_children: Vec<(String, NodeId)> = store
        .container_children(other)
        .map(|(l, n)| (l.to_string(), n))
        .collect();
    for (label, other_node) in other_children {
        let other_value = store.node(other_node).unwrap().value().clone();
        if ignore_none && other_value.is_null() {
            continue;
        }
        let existing_container = store
            .container_children(container)
            .find(|(l, _)| *l == label)
            .and_then(|(_, n)| store.node(n).unwrap().value().as_container_id());
        match (existing_container, other_value.as_container_id()) {
            (Some(dst), Some(src)) => update_container(store, dst, src, ignore_none),
            _ => {
                let attrs = store.node(other_node).unwrap().attrs().clone();
                let _ = store.set(container, &label, other_value, attrs, Position::End, None, false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Store;

    fn push(store: &mut Store, container: ContainerId, label: &str, value: Value) {
        store
            .set(container, label, value, IndexMap::new(), Position::End, None, false)
            .unwrap();
    }

    #[test]
    fn query_labels_follow_insertion_order() {
        let mut store = Store::new();
        let root = store.root();
        push(&mut store, root, "b", Value::Int(1));
        push(&mut store, root, "a", Value::Int(2));
        push(&mut store, root, "c", Value::Int(3));
        let labels = query_sync(&store, root, "#k", None, false, None, None, None);
        assert_eq!(
            labels,
            vec![
                Value::Str("b".into()),
                Value::Str("a".into()),
                Value::Str("c".into())
            ]
        );
    }

    #[test]
    fn sort_ascending_then_descending() {
        let mut store = Store::new();
        let root = store.root();
        push(&mut store, root, "b", Value::Int(1));
        push(&mut store, root, "a", Value::Int(2));
        push(&mut store, root, "c", Value::Int(3));
        sort(&mut store, root, "#k:a");
        assert_eq!(
            query_sync(&store, root, "#k", None, false, None, None, None),
            vec![
                Value::Str("a".into()),
                Value::Str("b".into()),
                Value::Str("c".into())
            ]
        );
        sort(&mut store, root, "#k:D");
        assert_eq!(
            query_sync(&store, root, "#k", None, false, None, None, None),
            vec![
                Value::Str("c".into()),
                Value::Str("b".into()),
                Value::Str("a".into())
            ]
        );
    }

    #[test]
    fn sum_matches_numeric_query_fold() {
        let mut store = Store::new();
        let root = store.root();
        push(&mut store, root, "a", Value::Int(2));
        push(&mut store, root, "b", Value::Int(3));
        push(&mut store, root, "c", Value::Str("not-a-number".into()));
        assert_eq!(sum(&store, root, "#v", None, false), 5.0);
    }
}
