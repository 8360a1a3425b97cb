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

//! C6: the flattener. Depth-first generator of `(parent, label, tag, value,
//! attrs)` rows, free of any type-tagging logic — that's the codec's job
//! (`spec.md` §4.4: "Flattener vs codec separation"). Usable in path mode
//! (parent keyed by dotted path) or compact mode (parent keyed by an
//! integer code, with a shared code -> path registry emitted alongside).

use crate::container::Store;
use crate::ids::ContainerId;
use crate::value::Value;
use indexmap::IndexMap;

pub const CONTAINER_SENTINEL: &str = "::X";

/// The container sentinel, used as a flattened row's `value` whenever the
/// node itself holds a nested container.
#[derive(Clone, Debug, PartialEq)]
pub enum FlatValue {
    Scalar(Value),
    ContainerSentinel,
}

#[derive(Clone, Debug)]
pub struct Row {
    pub parent: String,
    pub label: String,
    pub tag: Option<String>,
    pub value: FlatValue,
    pub attrs: IndexMap<String, Value>,
}

/// Path-mode flattening: `parent` is the dotted path of the containing
/// container (`""` for root). Pre-order, parents before children (P6).
pub fn flatten_paths(store: &Store, root: ContainerId) -> Vec<Row> {
    let mut rows = Vec::new();
    flatten_paths_into(store, root, "", &mut rows);
    rows
}

fn flatten_paths_into(store: &Store, container: ContainerId, parent_path: &str, rows: &mut Vec<Row>) {
    for (label, node_id) in store.container_children(container) {
        let node = store.node(node_id).unwrap();
        let value = match node.value().as_container_id() {
            Some(_) => FlatValue::ContainerSentinel,
            None => FlatValue::Scalar(node.value().clone()),
        };
        rows.push(Row {
            parent: parent_path.to_string(),
            label: label.to_string(),
            tag: node.raw_tag().map(|s| s.to_string()),
            value,
            attrs: node.attrs().clone(),
        });
        if let Some(cid) = node.value().as_container_id() {
            let child_path = if parent_path.is_empty() {
                label.to_string()
            } else {
                format!("{parent_path}.{label}")
            };
            flatten_paths_into(store, cid, &child_path, rows);
        }
    }
}

/// Compact-mode flattening: `parent` is an integer code assigned the first
/// time a container is encountered; `registry[code] = dotted_path` is
/// returned alongside so a decoder can resolve parents without repeating
/// path strings on every row.
pub fn flatten_compact(store: &Store, root: ContainerId) -> (Vec<(u32, Row)>, Vec<String>) {
    let mut rows = Vec::new();
    let mut registry = vec![String::new()];
    flatten_compact_into(store, root, 0, "", &mut rows, &mut registry);
    (rows, registry)
}

fn flatten_compact_into(
    store: &Store,
    container: ContainerId,
    parent_code: u32,
    parent_path: &str,
    rows: &mut Vec<(u32, Row)>,
    registry: &mut Vec<String>,
) {
    for (label, node_id) in store.container_children(container) {
        let node = store.node(node_id).unwrap();
        let value = match node.value().as_container_id() {
            Some(_) => FlatValue::ContainerSentinel,
            None => FlatValue::Scalar(node.value().clone()),
        };
        rows.push((
            parent_code,
            Row {
                parent: parent_code.to_string(),
                label: label.to_string(),
                tag: node.raw_tag().map(|s| s.to_string()),
                value,
                attrs: node.attrs().clone(),
            },
        ));
        if let Some(cid) = node.value().as_container_id() {
            let child_path = if parent_path.is_empty() {
                label.to_string()
            } else {
                format!("{parent_path}.{label}")
            };
            let code = registry.len() as u32;
            registry.push(child_path.clone());
            flatten_compact_into(store, cid, code, &child_path, rows, registry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Store;
    use crate::label_table::Position;

    #[test]
    fn parents_precede_children() {
        let mut store = Store::new();
        let root = store.root();
        let child_container = store.new_detached_container();
        store
            .set(
                root,
                "child",
                Value::Container(child_container),
                IndexMap::new(),
                Position::End,
                None,
                false,
            )
            .unwrap();
        store
            .set(child_container, "inner", Value::Bool(true), IndexMap::new(), Position::End, None, false)
            .unwrap();
        let rows = flatten_paths(&store, root);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].label, "child");
        assert_eq!(rows[0].value, FlatValue::ContainerSentinel);
        assert_eq!(rows[1].parent, "child");
        assert_eq!(rows[1].label, "inner");
    }
}
