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

//! C2: the ordered label container. Maintains an insertion-ordered,
//! label-unique map from label to [`NodeId`], with O(1) label/index lookup.
//!
//! This is deliberately a thin layer over [`IndexMap`]: `IndexMap` already
//! gives us insertion order, O(1) label lookup and O(1) index lookup, which
//! is exactly the contract `spec.md` §4.1 asks for. The work this module
//! adds is the `Position` reordering semantics `set_item` needs.

use indexmap::IndexMap;

/// Where a freshly-inserted label lands among its siblings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Position {
    End,
    Top,
    Before(String),
    After(String),
    Index(usize),
}

impl Default for Position {
    fn default() -> Self {
        Position::End
    }
}

#[derive(Default)]
pub struct LabelTable<T> {
    order: IndexMap<String, T>,
}

impl<T> LabelTable<T> {
    pub fn new() -> Self {
        LabelTable {
            order: IndexMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&T> {
        self.order.get(label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.order.contains_key(label)
    }

    /// `#N` positional lookup: out-of-range is `None`, never an error
    /// (`spec.md` §4.1).
    pub fn get_index(&self, n: usize) -> Option<(&String, &T)> {
        self.order.get_index(n)
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.order.get_index_of(label)
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, String, T> {
        self.order.iter()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.order.keys().map(|s| s.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.order.values()
    }

    /// Inserts at the end, unconditionally (caller has already checked for
    /// duplicates). Used by the initial `set` before `reposition` runs.
    pub fn push(&mut self, label: String, value: T) {
        self.order.insert(label, value);
    }

    pub fn remove(&mut self, label: &str) -> Option<T> {
        self.order.shift_remove(label)
    }

    /// Moves `label` to satisfy `position`, relative to the rest of the
    /// table. No-op positions (`End` when already last) are cheap because
    /// `shift` methods on `IndexMap` are linear regardless.
    pub fn reposition(&mut self, label: &str, position: &Position) {
        let current = match self.order.get_index_of(label) {
            Some(i) => i,
            None => return,
        };
        let target = match position {
            Position::End => self.order.len() - 1,
            Position::Top => 0,
            Position::Index(i) => (*i).min(self.order.len() - 1),
            Position::Before(other) => match self.order.get_index_of(other) {
                Some(i) if i < current => i,
                Some(i) => i.saturating_sub(1),
                None => return,
            },
            Position::After(other) => match self.order.get_index_of(other) {
                Some(i) if i > current => i,
                Some(i) => i + 1,
                None => return,
            },
        };
        self.order.move_index(current, target.min(self.order.len() - 1));
    }

    /// Reorders all entries according to a total ordering of labels,
    /// stable w.r.t. the current order among equal keys (used by
    /// `Container::sort`).
    pub fn sort_by_labels<F>(&mut self, mut cmp: F)
    where
        F: FnMut(&str, &str) -> std::cmp::Ordering,
    {
        self.order.sort_by(|a, _, b, _| cmp(a, b));
    }

    pub fn sort_by_key_order<F>(&mut self, compare: F)
    where
        F: Fn(&T, &T) -> std::cmp::Ordering,
    {
        self.order.sort_by(|_, a, _, b| compare(a, b));
    }
}
