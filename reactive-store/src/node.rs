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

//! C1: the node. Holds a label, a value, an attribute map, an optional tag
//! and resolver, and the node-local subscriber table.

use crate::ids::ContainerId;
use crate::resolver::ResolverHandle;
use crate::subscription::Subscription;
use crate::value::Value;
use indexmap::IndexMap;

pub struct Node {
    pub(crate) label: String,
    pub(crate) value: Value,
    pub(crate) attrs: IndexMap<String, Value>,
    pub(crate) tag: Option<String>,
    pub(crate) resolver: Option<ResolverHandle>,
    pub(crate) parent_container: Option<ContainerId>,
    pub(crate) subscribers: IndexMap<String, Subscription>,
}

impl Node {
    pub(crate) fn new(label: impl Into<String>, value: Value, parent_container: ContainerId) -> Self {
        Node {
            label: label.into(),
            value,
            attrs: IndexMap::new(),
            tag: None,
            resolver: None,
            parent_container: Some(parent_container),
            subscribers: IndexMap::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn attrs(&self) -> &IndexMap<String, Value> {
        &self.attrs
    }

    /// `tag` falls back to `label` per `spec.md` §3: "When absent, `label`
    /// is used as `tag` in external views."
    pub fn tag(&self) -> &str {
        self.tag.as_deref().unwrap_or(&self.label)
    }

    pub fn raw_tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn has_resolver(&self) -> bool {
        self.resolver.is_some()
    }

    pub fn resolver(&self) -> Option<&ResolverHandle> {
        self.resolver.as_ref()
    }

    pub fn parent_container(&self) -> Option<ContainerId> {
        self.parent_container
    }
}
