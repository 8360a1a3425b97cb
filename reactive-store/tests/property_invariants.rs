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

//! Property-based checks for the invariants in `spec.md` §8 (P1, P2, P4, P6,
//! P9) that are awkward to pin down with a handful of literal examples: they
//! hold across arbitrary sequences of inserts/updates/deletes, not just the
//! cases a hand-written test happens to think of.

use indexmap::IndexMap;
use proptest::prelude::*;
use reactive_store::container::Store;
use reactive_store::flatten::{flatten_paths, FlatValue};
use reactive_store::label_table::Position;
use reactive_store::subscription::Subscription;
use reactive_store::value::Value;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug)]
enum Op {
    Insert(String, i64),
    Delete(String),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let label = "[a-e]";
    prop_oneof![
        (label, any::<i64>()).prop_map(|(l, v)| Op::Insert(l, v)),
        label.prop_map(Op::Delete),
    ]
}

proptest! {
    /// P1 + P2: after any sequence of inserts/deletes over a five-letter
    /// label alphabet, every label in the root container is unique and every
    /// surviving node still reports the root as its parent.
    #[test]
    fn label_uniqueness_and_parent_consistency(ops in prop::collection::vec(op_strategy(), 0..64)) {
        let mut store = Store::new();
        let root = store.root();
        for op in ops {
            match op {
                Op::Insert(label, v) => {
                    store.set(root, &label, Value::Int(v), IndexMap::new(), Position::End, None, false).unwrap();
                }
                Op::Delete(label) => {
                    let _ = store.remove(root, &label, None);
                }
            }
        }
        let labels: Vec<&str> = store.container_children(root).map(|(l, _)| l).collect();
        let mut seen = std::collections::HashSet::new();
        for label in &labels {
            prop_assert!(seen.insert(*label), "duplicate label survived: {label}");
        }
        for (_, node_id) in store.container_children(root) {
            prop_assert_eq!(store.node(node_id).unwrap().parent_container(), Some(root));
        }
    }

    /// P4: `sort` followed by reading labels back out always yields the
    /// requested total order, for any subset of the alphabet in any starting
    /// order.
    #[test]
    fn sort_produces_requested_order(mut labels in prop::collection::hash_set("[a-j]", 1..10)) {
        let mut store = Store::new();
        let root = store.root();
        for label in labels.drain() {
            store.set(root, &label, Value::Str(label.clone()), IndexMap::new(), Position::End, None, false).unwrap();
        }
        reactive_store::query::sort(&mut store, root, "#k:a");
        let got: Vec<&str> = store.container_children(root).map(|(l, _)| l).collect();
        let mut expected = got.clone();
        expected.sort();
        prop_assert_eq!(got, expected);
    }

    /// P6: the flattener always emits a container's row before any of its
    /// descendants', regardless of how deep or wide the tree is.
    #[test]
    fn flattener_emits_parents_before_children(depth in 1usize..5, width in 1usize..4) {
        let mut store = Store::new();
        let root = store.root();
        let mut frontier = vec![root];
        for level in 0..depth {
            let mut next = Vec::new();
            for &container in &frontier {
                for w in 0..width {
                    let label = format!("d{level}w{w}");
                    let child = store.new_detached_container();
                    let node = store.set(container, &label, Value::Container(child), IndexMap::new(), Position::End, None, false).unwrap();
                    store.attach_container_parent(child, node);
                    next.push(child);
                }
            }
            frontier = next;
        }
        let rows = flatten_paths(&store, root);
        let mut seen_paths: std::collections::HashSet<String> = std::collections::HashSet::new();
        seen_paths.insert(String::new());
        for row in &rows {
            prop_assert!(seen_paths.contains(&row.parent), "row for {} referenced parent path {} before it was emitted", row.label, row.parent);
            if matches!(row.value, FlatValue::ContainerSentinel) {
                let path = if row.parent.is_empty() { row.label.clone() } else { format!("{}.{}", row.parent, row.label) };
                seen_paths.insert(path);
            }
        }
    }

    /// P9: a mutation at the bottom of a chain of nested containers fires
    /// subscribers top-down by level, for any chain depth.
    #[test]
    fn subscription_levels_walk_upward_in_order(depth in 1usize..6) {
        let mut store = Store::new();
        let root = store.root();
        store.set_backref(root);
        let mut containers = vec![root];
        for i in 0..depth {
            let parent = *containers.last().unwrap();
            let child_container = store.new_detached_container();
            let node = store.set(parent, &format!("c{i}"), Value::Container(child_container), IndexMap::new(), Position::End, None, false).unwrap();
            store.attach_container_parent(child_container, node);
            store.set_backref(child_container);
            containers.push(child_container);
        }

        let levels = Arc::new(Mutex::new(Vec::new()));
        for (depth_index, &container) in containers.iter().enumerate() {
            let levels = levels.clone();
            store.subscribe(
                container,
                format!("sub{depth_index}"),
                Subscription {
                    on_insert: Some(Box::new(move |ev| {
                        levels.lock().unwrap().push((depth_index, ev.level));
                    })),
                    ..Default::default()
                },
            );
        }

        let leaf_container = *containers.last().unwrap();
        store.set(leaf_container, "leaf", Value::Int(1), IndexMap::new(), Position::End, None, false).unwrap();

        let fired = levels.lock().unwrap().clone();
        // Every container from the leaf's own up to the root fires exactly
        // once, deepest-subscriber-first (level 0 at the mutation site,
        // decreasing as we walk toward the root).
        prop_assert_eq!(fired.len(), containers.len());
        for window in fired.windows(2) {
            prop_assert!(window[0].1 > window[1].1, "levels did not decrease monotonically: {:?}", fired);
        }
        prop_assert_eq!(fired[0].1, 0);
    }
}
