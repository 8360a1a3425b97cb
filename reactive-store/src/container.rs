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

//! C3: the container (tree). Hosts nodes, the parent back-link, subscription
//! dispatch and the mutation primitives, per `spec.md` §4.2.
//!
//! The whole node/container graph for one logical tree lives in a single
//! [`Store`], addressed through two [`slotmap::SlotMap`] arenas (see
//! `spec.md` §9 Design Notes and `ids.rs`). There is exactly one root
//! container per `Store`.

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::ids::{ContainerId, NodeId};
use crate::label_table::{LabelTable, Position};
use crate::node::Node;
use crate::path::{self, FinalSelector, Segment};
use crate::resolver::ResolverHandle;
use crate::subscription::{Changed, DeleteEvent, InsertEvent, Subscription, UpdateEvent};
use crate::value::Value;
use indexmap::IndexMap;
use slotmap::SlotMap;

/// Tri-state dirty flag (`spec.md` §3 `modified`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Modified {
    Clean,
    Dirty,
}

pub struct ContainerData {
    pub(crate) labels: LabelTable<NodeId>,
    pub(crate) parent_node: Option<NodeId>,
    pub(crate) backref_mode: bool,
    pub(crate) subscribers: IndexMap<String, Subscription>,
    pub(crate) modified: Option<Modified>,
}

impl ContainerData {
    fn new(parent_node: Option<NodeId>) -> Self {
        ContainerData {
            labels: LabelTable::new(),
            parent_node,
            backref_mode: false,
            subscribers: IndexMap::new(),
            modified: None,
        }
    }
}

/// What a traversal landed on — the shared `(container, last_label)` shape
/// from `spec.md` §4.3, generalised to also cover positional and
/// whole-container terminals.
#[derive(Clone, Debug)]
pub enum TraversalEnd {
    /// Landed on `label` inside `container` (label may not yet exist; the
    /// caller decides whether that's an error or something to create).
    Node { container: ContainerId, label: String },
    /// Landed on the Nth child of `container`.
    Index { container: ContainerId, index: usize },
    /// The path consumed no terminal label (e.g. ended in `#parent`); the
    /// "value" at this point is the container itself.
    WholeContainer(ContainerId),
}

pub struct Store {
    pub(crate) nodes: SlotMap<NodeId, Node>,
    pub(crate) containers: SlotMap<ContainerId, ContainerData>,
    root: ContainerId,
    pub(crate) config: Config,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let mut containers = SlotMap::with_key();
        let root = containers.insert(ContainerData::new(None));
        Store {
            nodes: SlotMap::with_key(),
            containers,
            root,
            config,
        }
    }

    pub fn root(&self) -> ContainerId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn container_children(&self, id: ContainerId) -> impl Iterator<Item = (&str, NodeId)> {
        self.containers[id]
            .labels
            .iter()
            .map(|(l, n)| (l.as_str(), *n))
    }

    pub fn len(&self, container: ContainerId) -> usize {
        self.containers[container].labels.len()
    }

    pub fn is_empty(&self, container: ContainerId) -> bool {
        self.containers[container].labels.is_empty()
    }

    pub fn parent_node_of(&self, container: ContainerId) -> Option<NodeId> {
        self.containers[container].parent_node
    }

    pub fn parent_container_of(&self, container: ContainerId) -> Option<ContainerId> {
        self.containers[container]
            .parent_node
            .and_then(|n| self.nodes[n].parent_container)
    }

    // ---- path traversal -------------------------------------------------

    /// Write traversal: synchronous, never invokes resolvers. Used by
    /// `set_item`, `pop`, `set_attr` and friends (`spec.md` §4.3.1).
    fn write_traverse(
        &mut self,
        start: ContainerId,
        segments: &[Segment],
        autocreate: bool,
        full_path: &str,
    ) -> Result<TraversalEnd> {
        if segments.is_empty() {
            return Ok(TraversalEnd::WholeContainer(start));
        }
        let mut current = start;
        let mut i = 0;
        while i < segments.len() {
            let seg = &segments[i];
            let is_last = i == segments.len() - 1;
            match seg {
                Segment::Parent => {
                    let parent_node = self.containers[current].parent_node.ok_or_else(|| {
                        StoreError::ParentOfRoot {
                            path: full_path.to_string(),
                        }
                    })?;
                    current = self.nodes[parent_node].parent_container.ok_or_else(|| {
                        StoreError::ParentOfRoot {
                            path: full_path.to_string(),
                        }
                    })?;
                    if is_last {
                        return Ok(TraversalEnd::WholeContainer(current));
                    }
                    i += 1;
                }
                Segment::Index(n) => {
                    let node_id = self.containers[current]
                        .labels
                        .get_index(*n)
                        .map(|(_, id)| *id)
                        .ok_or_else(|| StoreError::PathNotFound {
                            path: full_path.to_string(),
                        })?;
                    if is_last {
                        return Ok(TraversalEnd::Index {
                            container: current,
                            index: *n,
                        });
                    }
                    // `#parent` right after this segment pops back to the
                    // container we're already in, regardless of whether this
                    // node's value is itself a container; skip descending (and
                    // skip autocreate-turning-a-scalar-into-a-container) since
                    // the descended-into container would only be thrown away.
                    if matches!(segments.get(i + 1), Some(Segment::Parent)) {
                        i += 2;
                        if i == segments.len() {
                            return Ok(TraversalEnd::WholeContainer(current));
                        }
                        continue;
                    }
                    current = self.descend_or_autocreate(node_id, current, autocreate, full_path)?;
                    i += 1;
                }
                Segment::Label(label) => {
                    if is_last {
                        return Ok(TraversalEnd::Node {
                            container: current,
                            label: label.clone(),
                        });
                    }
                    let existing = self.containers[current].labels.get(label).copied();
                    if matches!(segments.get(i + 1), Some(Segment::Parent)) && existing.is_some() {
                        i += 2;
                        if i == segments.len() {
                            return Ok(TraversalEnd::WholeContainer(current));
                        }
                        continue;
                    }
                    let node_id = match existing {
                        Some(id) => id,
                        None => {
                            if !autocreate {
                                return Err(StoreError::PathNotFound {
                                    path: full_path.to_string(),
                                });
                            }
                            self.insert_empty_container_node(current, label.clone())?
                        }
                    };
                    current = self.descend_or_autocreate(node_id, current, autocreate, full_path)?;
                    i += 1;
                }
            }
        }
        Ok(TraversalEnd::WholeContainer(current))
    }

    /// Given a node that is an intermediate path segment, returns the
    /// container to continue into, auto-creating/replacing as needed.
    fn descend_or_autocreate(
        &mut self,
        node_id: NodeId,
        _parent_container: ContainerId,
        autocreate: bool,
        full_path: &str,
    ) -> Result<ContainerId> {
        if let Value::Container(cid) = self.nodes[node_id].value {
            return Ok(cid);
        }
        if !autocreate {
            return Err(StoreError::PathNotFound {
                path: full_path.to_string(),
            });
        }
        let new_container = self.containers.insert(ContainerData::new(Some(node_id)));
        self.nodes[node_id].value = Value::Container(new_container);
        Ok(new_container)
    }

    fn insert_empty_container_node(
        &mut self,
        parent: ContainerId,
        label: String,
    ) -> Result<NodeId> {
        let node_id = self
            .nodes
            .insert(Node::new(label.clone(), Value::Null, parent));
        let child_container = self.containers.insert(ContainerData::new(Some(node_id)));
        self.nodes[node_id].value = Value::Container(child_container);
        self.containers[parent].labels.push(label.clone(), node_id);
        self.fire_insert(parent, node_id, &label, None);
        Ok(node_id)
    }

    /// Read traversal: resolves resolvers encountered along the way
    /// (`spec.md` §4.3.2), unless `static_mode` is set. Written iteratively
    /// (no recursive `async fn` calls) so the returned future has a fixed
    /// size regardless of path depth.
    pub async fn read_traverse(
        &mut self,
        start: ContainerId,
        segments: &[Segment],
        static_mode: bool,
        full_path: &str,
    ) -> Result<TraversalEnd> {
        if segments.is_empty() {
            return Ok(TraversalEnd::WholeContainer(start));
        }
        let mut current = start;
        let mut i = 0;
        while i < segments.len() {
            let seg = &segments[i];
            let is_last = i == segments.len() - 1;
            match seg {
                Segment::Parent => {
                    let parent_node = self.containers[current].parent_node.ok_or_else(|| {
                        StoreError::ParentOfRoot {
                            path: full_path.to_string(),
                        }
                    })?;
                    current = self.nodes[parent_node].parent_container.ok_or_else(|| {
                        StoreError::ParentOfRoot {
                            path: full_path.to_string(),
                        }
                    })?;
                    if is_last {
                        return Ok(TraversalEnd::WholeContainer(current));
                    }
                    i += 1;
                }
                Segment::Index(n) => {
                    let node_id = self.containers[current]
                        .labels
                        .get_index(*n)
                        .map(|(_, id)| *id)
                        .ok_or_else(|| StoreError::PathNotFound {
                            path: full_path.to_string(),
                        })?;
                    if is_last {
                        return Ok(TraversalEnd::Index {
                            container: current,
                            index: *n,
                        });
                    }
                    // See the matching comment in `write_traverse`: `#parent`
                    // immediately after this segment just wants the container
                    // we're already in, so don't bother resolving/descending
                    // into a value that's about to be discarded — which also
                    // means a scalar leaf here no longer trips
                    // `CannotDescendIntoScalar` (`spec.md` S2).
                    if matches!(segments.get(i + 1), Some(Segment::Parent)) {
                        i += 2;
                        if i == segments.len() {
                            return Ok(TraversalEnd::WholeContainer(current));
                        }
                        continue;
                    }
                    current = self
                        .descend_resolving(node_id, static_mode, full_path)
                        .await?;
                    i += 1;
                }
                Segment::Label(label) => {
                    let node_id = self.containers[current].labels.get(label).copied().ok_or_else(
                        || StoreError::PathNotFound {
                            path: full_path.to_string(),
                        },
                    )?;
                    if is_last {
                        return Ok(TraversalEnd::Node {
                            container: current,
                            label: label.clone(),
                        });
                    }
                    if matches!(segments.get(i + 1), Some(Segment::Parent)) {
                        i += 2;
                        if i == segments.len() {
                            return Ok(TraversalEnd::WholeContainer(current));
                        }
                        continue;
                    }
                    current = self
                        .descend_resolving(node_id, static_mode, full_path)
                        .await?;
                    i += 1;
                }
            }
        }
        Ok(TraversalEnd::WholeContainer(current))
    }

    /// Descends into `node_id`'s value, invoking its resolver first if one
    /// is present and `static_mode` is false (the "remaining-path handoff"
    /// in `spec.md` §4.5).
    async fn descend_resolving(
        &mut self,
        node_id: NodeId,
        static_mode: bool,
        full_path: &str,
    ) -> Result<ContainerId> {
        self.ensure_resolved(node_id, static_mode, &IndexMap::new())
            .await?;
        match self.nodes[node_id].value {
            Value::Container(cid) => Ok(cid),
            _ => Err(StoreError::CannotDescendIntoScalar {
                path: full_path.to_string(),
                label: self.nodes[node_id].label.clone(),
            }),
        }
    }

    /// Forces resolution of `node_id`'s resolver (if any), writing the
    /// result back into the node's value slot when `read_only = false`.
    pub async fn ensure_resolved(
        &mut self,
        node_id: NodeId,
        static_mode: bool,
        call_kwargs: &IndexMap<String, Value>,
    ) -> Result<()> {
        if static_mode {
            return Ok(());
        }
        let handle: ResolverHandle = match self.nodes[node_id].resolver.take() {
            Some(h) => h,
            None => return Ok(()),
        };
        let cached = if handle.read_only() {
            None
        } else {
            Some(self.nodes[node_id].value.clone())
        };
        let merged_kwargs = self.merge_call_kwargs(node_id, call_kwargs);
        let outcome = handle.resolve(cached, &merged_kwargs).await;
        // Put the handle back regardless of outcome: a failed load must not
        // drop the resolver binding.
        self.nodes[node_id].resolver = Some(handle);
        let outcome = outcome?;
        if outcome.write_back {
            self.nodes[node_id].value = outcome.value;
        } else if self.nodes[node_id].resolver.as_ref().map(|h| h.read_only()) == Some(true) {
            self.nodes[node_id].value = outcome.value;
        }
        Ok(())
    }

    /// `spec.md` §4.5 "Parameter precedence at call time": call kwargs,
    /// then node attrs, then the resolver's own stored kwargs (lowest).
    fn merge_call_kwargs(
        &self,
        node_id: NodeId,
        call_kwargs: &IndexMap<String, Value>,
    ) -> IndexMap<String, Value> {
        let mut merged = IndexMap::new();
        if let Some(handle) = &self.nodes[node_id].resolver {
            for (k, v) in &handle.snapshot().kwargs {
                merged.insert(k.clone(), json_to_value(v));
            }
        }
        for (k, v) in &self.nodes[node_id].attrs {
            merged.insert(k.clone(), v.clone());
        }
        for (k, v) in call_kwargs {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }

    // ---- public read API --------------------------------------------------

    /// `spec.md` §4.2 `get`. Async because resolving a node along the way
    /// may suspend; see `resolver::resolve_sync` for the synchronous
    /// duality wrapper.
    pub async fn get(&mut self, path: &str, default: Option<Value>) -> Result<Value> {
        let parsed = path::parse(path, true)?;
        let end = self
            .read_traverse(self.root, &parsed.segments, false, path)
            .await;
        let end = match (end, &default) {
            (Err(StoreError::PathNotFound { .. }), Some(d)) => return Ok(d.clone()),
            (e, _) => e?,
        };
        self.render_selector(end, &parsed.selector, path, default)
            .await
    }

    async fn render_selector(
        &mut self,
        end: TraversalEnd,
        selector: &Option<FinalSelector>,
        path: &str,
        default: Option<Value>,
    ) -> Result<Value> {
        match selector {
            None => self.value_at(end, path, default).await,
            Some(FinalSelector::AllAttrs) | Some(FinalSelector::Attr(_)) | Some(FinalSelector::NodeObject) => {
                // A path like `config.database.port.#parent` lands on a
                // `WholeContainer` rather than a specific node (`port` was a
                // scalar leaf, so `#parent` popped back to its container
                // without a node to point at). There's no node to read an
                // attribute/tag off of, so fall back to `default` the same
                // way a `PathNotFound` would, rather than erroring.
                if matches!(end, TraversalEnd::WholeContainer(_)) {
                    return Ok(default.unwrap_or(Value::Null));
                }
                let (container, label) = self.require_node(end, path)?;
                let node_id = self.containers[container].labels.get(&label).copied().ok_or_else(
                    || StoreError::PathNotFound {
                        path: path.to_string(),
                    },
                )?;
                match selector {
                    Some(FinalSelector::Attr(a)) => Ok(self.nodes[node_id]
                        .attrs
                        .get(a)
                        .cloned()
                        .unwrap_or_else(|| default.clone().unwrap_or(Value::Null))),
                    Some(FinalSelector::AllAttrs) => {
                        Ok(attrs_to_value(&self.nodes[node_id].attrs))
                    }
                    Some(FinalSelector::NodeObject) => Ok(Value::Node(node_id)),
                    _ => unreachable!(),
                }
            }
            Some(FinalSelector::Keys) => {
                let container = self.require_container(end, path)?;
                let keys: Vec<Value> = self.containers[container]
                    .labels
                    .labels()
                    .map(|l| Value::Str(l.to_string()))
                    .collect();
                Ok(Value::Str(
                    keys.iter().map(|v| v.display_key()).collect::<Vec<_>>().join(","),
                ))
            }
            Some(FinalSelector::Digest(spec)) => {
                let container = self.require_container(end, path)?;
                let results = crate::query::query_sync(self, container, spec, None, false, None, None, None);
                Ok(Value::Str(
                    results
                        .into_iter()
                        .map(|v| v.display_key())
                        .collect::<Vec<_>>()
                        .join(","),
                ))
            }
        }
    }

    fn require_node(&self, end: TraversalEnd, path: &str) -> Result<(ContainerId, String)> {
        match end {
            TraversalEnd::Node { container, label } => Ok((container, label)),
            TraversalEnd::Index { container, index } => {
                let (label, _) = self.containers[container]
                    .labels
                    .get_index(index)
                    .ok_or_else(|| StoreError::PathNotFound {
                        path: path.to_string(),
                    })?;
                Ok((container, label.clone()))
            }
            TraversalEnd::WholeContainer(_) => Err(StoreError::InvalidPathSyntax {
                path: path.to_string(),
                reason: "attribute selector applied to a whole-container path".to_string(),
            }),
        }
    }

    fn require_container(&self, end: TraversalEnd, path: &str) -> Result<ContainerId> {
        match end {
            TraversalEnd::WholeContainer(c) => Ok(c),
            TraversalEnd::Node { container, label } => {
                let node_id = self.containers[container].labels.get(&label).copied().ok_or_else(
                    || StoreError::PathNotFound {
                        path: path.to_string(),
                    },
                )?;
                match self.nodes[node_id].value {
                    Value::Container(cid) => Ok(cid),
                    _ => Err(StoreError::CannotDescendIntoScalar {
                        path: path.to_string(),
                        label,
                    }),
                }
            }
            TraversalEnd::Index { container, index } => {
                let (_, node_id) = self.containers[container]
                    .labels
                    .get_index(index)
                    .ok_or_else(|| StoreError::PathNotFound {
                        path: path.to_string(),
                    })?;
                match self.nodes[*node_id].value {
                    Value::Container(cid) => Ok(cid),
                    _ => Err(StoreError::CannotDescendIntoScalar {
                        path: path.to_string(),
                        label: self.nodes[*node_id].label.clone(),
                    }),
                }
            }
        }
    }

    async fn value_at(
        &mut self,
        end: TraversalEnd,
        path: &str,
        default: Option<Value>,
    ) -> Result<Value> {
        let node_id = match end {
            TraversalEnd::WholeContainer(c) => return Ok(Value::Container(c)),
            TraversalEnd::Node { container, label } => {
                match self.containers[container].labels.get(&label).copied() {
                    Some(id) => id,
                    None => return Ok(default.unwrap_or(Value::Null)),
                }
            }
            TraversalEnd::Index { container, index } => {
                match self.containers[container].labels.get_index(index) {
                    Some((_, id)) => *id,
                    None => return Ok(default.unwrap_or(Value::Null)),
                }
            }
        };
        self.ensure_resolved(node_id, false, &IndexMap::new()).await?;
        Ok(self.nodes[node_id].value.clone())
    }

    /// `get_node`: returns the node id at `path`, optionally auto-creating
    /// intermediate containers. Resolving read variant.
    pub async fn get_node(&mut self, path: &str, autocreate: bool) -> Result<Option<NodeId>> {
        let parsed = path::parse(path, false)?;
        if autocreate {
            // auto-create uses the write traversal so it never suspends.
            let end = self.write_traverse(self.root, &parsed.segments, true, path)?;
            return Ok(self.end_to_node(end));
        }
        let end = self
            .read_traverse(self.root, &parsed.segments, false, path)
            .await?;
        Ok(self.end_to_node(end))
    }

    fn end_to_node(&self, end: TraversalEnd) -> Option<NodeId> {
        match end {
            TraversalEnd::Node { container, label } => self.containers[container].labels.get(&label).copied(),
            TraversalEnd::Index { container, index } => {
                self.containers[container].labels.get_index(index).map(|(_, id)| *id)
            }
            TraversalEnd::WholeContainer(_) => None,
        }
    }

    // ---- public write API --------------------------------------------------

    /// `set_item(path, value, ...)`. Rejects the empty path and is the one
    /// place the "merge into self" shortcut the original accepted is
    /// explicitly refused (`spec.md` §9 Open Question).
    pub fn set_item(
        &mut self,
        path: &str,
        value: Value,
        attrs: IndexMap<String, Value>,
        position: Position,
        reason: Option<String>,
        remove_nulls: bool,
    ) -> Result<NodeId> {
        if path.is_empty() {
            return Err(StoreError::InvalidPathSyntax {
                path: path.to_string(),
                reason: "set_item(\"\", ..) is rejected; use Store::update instead".to_string(),
            });
        }
        let parsed = path::parse(path, false)?;
        let end = self.write_traverse(self.root, &parsed.segments, true, path)?;
        let (container, label) = match end {
            TraversalEnd::Node { container, label } => (container, label),
            TraversalEnd::Index { container, index } => {
                let (label, _) = self.containers[container]
                    .labels
                    .get_index(index)
                    .ok_or_else(|| StoreError::PathNotFound {
                        path: path.to_string(),
                    })?;
                (container, label.clone())
            }
            TraversalEnd::WholeContainer(_) => {
                return Err(StoreError::InvalidPathSyntax {
                    path: path.to_string(),
                    reason: "set_item requires a terminal label".to_string(),
                })
            }
        };
        self.set(container, &label, value, attrs, position, reason, remove_nulls)
    }

    /// `C3::set`, `C2::set` combined: inserts or updates a node atomically.
    pub fn set(
        &mut self,
        container: ContainerId,
        label: &str,
        value: Value,
        attrs: IndexMap<String, Value>,
        position: Position,
        reason: Option<String>,
        remove_nulls: bool,
    ) -> Result<NodeId> {
        let attrs = if remove_nulls {
            attrs.into_iter().filter(|(_, v)| !v.is_null()).collect()
        } else {
            attrs
        };
        match self.containers[container].labels.get(label).copied() {
            Some(node_id) => {
                let old_value = self.nodes[node_id].value.clone();
                let old_attrs = self.nodes[node_id].attrs.clone();
                let changed_value = old_value != value;
                let changed_attrs = old_attrs != attrs;
                self.nodes[node_id].value = value;
                for (k, v) in attrs {
                    self.nodes[node_id].attrs.insert(k, v);
                }
                self.containers[container]
                    .labels
                    .reposition(label, &position);
                if changed_value || changed_attrs {
                    self.fire_update(
                        container,
                        node_id,
                        label,
                        old_value,
                        old_attrs,
                        Changed {
                            value: changed_value,
                            attrs: changed_attrs,
                        },
                        reason,
                    );
                }
                Ok(node_id)
            }
            None => {
                let node_id = self.nodes.insert(Node::new(label, value, container));
                self.nodes[node_id].attrs = attrs;
                self.containers[container]
                    .labels
                    .push(label.to_string(), node_id);
                self.containers[container]
                    .labels
                    .reposition(label, &position);
                let idx = self.containers[container].labels.index_of(label).unwrap_or(0);
                self.fire_insert_at(container, node_id, label, idx, reason);
                Ok(node_id)
            }
        }
    }

    pub fn pop_node(&mut self, path: &str, reason: Option<String>) -> Result<Option<NodeId>> {
        let parsed = path::parse(path, false)?;
        let end = self.write_traverse(self.root, &parsed.segments, false, path)?;
        let (container, label) = match end {
            TraversalEnd::Node { container, label } => (container, label),
            TraversalEnd::Index { container, index } => {
                let (label, _) = self.containers[container]
                    .labels
                    .get_index(index)
                    .ok_or_else(|| StoreError::PathNotFound {
                        path: path.to_string(),
                    })?;
                (container, label.clone())
            }
            TraversalEnd::WholeContainer(_) => {
                return Err(StoreError::InvalidPathSyntax {
                    path: path.to_string(),
                    reason: "pop_node requires a terminal label".to_string(),
                })
            }
        };
        self.remove(container, &label, reason)
    }

    pub fn pop(&mut self, path: &str, default: Option<Value>, reason: Option<String>) -> Result<Value> {
        match self.pop_node(path, reason)? {
            Some(node_id) => Ok(self.nodes[node_id].value.clone()),
            None => Ok(default.unwrap_or(Value::Null)),
        }
    }

    pub fn remove(
        &mut self,
        container: ContainerId,
        label: &str,
        reason: Option<String>,
    ) -> Result<Option<NodeId>> {
        let index = match self.containers[container].labels.index_of(label) {
            Some(i) => i,
            None => return Ok(None),
        };
        let node_id = self.containers[container].labels.remove(label).unwrap();
        self.fire_delete(container, node_id, label, index, reason);
        Ok(Some(node_id))
    }

    pub fn clear(&mut self, container: ContainerId) {
        let labels: Vec<String> = self.containers[container]
            .labels
            .labels()
            .map(|s| s.to_string())
            .collect();
        for label in labels {
            let _ = self.remove(container, &label, None);
        }
    }

    // ---- attributes --------------------------------------------------------

    pub fn set_attr(&mut self, path: &str, attrs: IndexMap<String, Value>) -> Result<()> {
        let node_id = match crate::resolver::resolve_sync(self.get_node(path, true)) {
            Ok(Some(id)) => id,
            Ok(None) => {
                return Err(StoreError::PathNotFound {
                    path: path.to_string(),
                })
            }
            Err(e) => return Err(e),
        };
        let old_attrs = self.nodes[node_id].attrs.clone();
        for (k, v) in attrs {
            if v.is_null() {
                self.nodes[node_id].attrs.shift_remove(&k);
            } else {
                self.nodes[node_id].attrs.insert(k, v);
            }
        }
        let container = self.nodes[node_id].parent_container.expect("node always has a parent");
        let label = self.nodes[node_id].label.clone();
        let old_value = self.nodes[node_id].value.clone();
        self.fire_update(
            container,
            node_id,
            &label,
            old_value,
            old_attrs,
            Changed {
                value: false,
                attrs: true,
            },
            None,
        );
        Ok(())
    }

    pub fn get_attr(&self, node_id: NodeId, attr: &str, default: Option<Value>) -> Value {
        self.nodes[node_id]
            .attrs
            .get(attr)
            .cloned()
            .unwrap_or_else(|| default.unwrap_or(Value::Null))
    }

    pub fn del_attr(&mut self, node_id: NodeId, attrs: &[&str]) {
        for a in attrs {
            self.nodes[node_id].attrs.shift_remove(*a);
        }
    }

    /// `get_inherited_attributes`: accumulates ancestor attrs, closest-wins
    /// (`spec.md` §4.2).
    pub fn get_inherited_attributes(&self, node_id: NodeId) -> IndexMap<String, Value> {
        let mut result = IndexMap::new();
        let mut chain = Vec::new();
        let mut current_container = self.nodes[node_id].parent_container;
        chain.push(node_id);
        while let Some(container) = current_container {
            if let Some(parent_node) = self.containers[container].parent_node {
                chain.push(parent_node);
                current_container = self.nodes[parent_node].parent_container;
            } else {
                break;
            }
        }
        for node_id in chain.into_iter().rev() {
            for (k, v) in &self.nodes[node_id].attrs {
                result.insert(k.clone(), v.clone());
            }
        }
        result
    }

    // ---- subscriptions -------------------------------------------------------

    pub fn subscribe(&mut self, container: ContainerId, id: impl Into<String>, sub: Subscription) {
        self.containers[container].subscribers.insert(id.into(), sub);
    }

    pub fn unsubscribe(&mut self, container: ContainerId, id: &str) {
        self.containers[container].subscribers.shift_remove(id);
    }

    pub fn subscribe_node(&mut self, node_id: NodeId, id: impl Into<String>, sub: Subscription) {
        self.nodes[node_id].subscribers.insert(id.into(), sub);
    }

    pub fn set_backref(&mut self, container: ContainerId) {
        self.containers[container].backref_mode = true;
    }

    pub fn clear_backref(&mut self, container: ContainerId) {
        self.containers[container].backref_mode = false;
    }

    pub fn del_parent_ref(&mut self, container: ContainerId) {
        self.containers[container].parent_node = None;
    }

    pub fn backref_mode(&self, container: ContainerId) -> bool {
        self.containers[container].backref_mode
    }

    // ---- event dispatch (§4.2 "Event model") --------------------------------

    fn fire_insert(&self, container: ContainerId, node_id: NodeId, label: &str, reason: Option<String>) {
        let idx = self.containers[container].labels.index_of(label).unwrap_or(0);
        self.fire_insert_at(container, node_id, label, idx, reason);
    }

    fn fire_insert_at(
        &self,
        container: ContainerId,
        node_id: NodeId,
        label: &str,
        position: usize,
        reason: Option<String>,
    ) {
        if !self.containers[container].backref_mode {
            return;
        }
        let mut level = 0i32;
        let mut current = Some(container);
        let ev = InsertEvent {
            node: node_id,
            label: label.to_string(),
            position,
            reason: reason.clone(),
            level,
        };
        if let Some(c) = current {
            for sub in self.containers[c].subscribers.values() {
                sub.fire_insert(&ev);
            }
        }
        current = self.parent_container_of(container);
        while let Some(c) = current {
            level -= 1;
            let ev = InsertEvent {
                level,
                ..ev.clone()
            };
            for sub in self.containers[c].subscribers.values() {
                sub.fire_insert(&ev);
            }
            current = self.parent_container_of(c);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn fire_update(
        &self,
        container: ContainerId,
        node_id: NodeId,
        label: &str,
        old_value: Value,
        old_attrs: IndexMap<String, Value>,
        changed: Changed,
        reason: Option<String>,
    ) {
        for sub in self.nodes[node_id].subscribers.values() {
            let ev = UpdateEvent {
                node: node_id,
                label: label.to_string(),
                old_value: old_value.clone(),
                old_attrs: old_attrs.clone(),
                changed,
                reason: reason.clone(),
                level: 0,
            };
            sub.fire_update(&ev);
        }
        if !self.containers[container].backref_mode {
            return;
        }
        let mut level = 0i32;
        let base = UpdateEvent {
            node: node_id,
            label: label.to_string(),
            old_value,
            old_attrs,
            changed,
            reason,
            level,
        };
        for sub in self.containers[container].subscribers.values() {
            sub.fire_update(&base);
        }
        let mut current = self.parent_container_of(container);
        while let Some(c) = current {
            level -= 1;
            let ev = UpdateEvent {
                level,
                ..base.clone()
            };
            for sub in self.containers[c].subscribers.values() {
                sub.fire_update(&ev);
            }
            current = self.parent_container_of(c);
        }
    }

    fn fire_delete(
        &self,
        container: ContainerId,
        node_id: NodeId,
        label: &str,
        position: usize,
        reason: Option<String>,
    ) {
        if !self.containers[container].backref_mode {
            return;
        }
        let mut level = 0i32;
        let base = DeleteEvent {
            node: node_id,
            label: label.to_string(),
            position,
            reason,
            level,
        };
        for sub in self.containers[container].subscribers.values() {
            sub.fire_delete(&base);
        }
        let mut current = self.parent_container_of(container);
        while let Some(c) = current {
            level -= 1;
            let ev = DeleteEvent {
                level,
                ..base.clone()
            };
            for sub in self.containers[c].subscribers.values() {
                sub.fire_delete(&ev);
            }
            current = self.parent_container_of(c);
        }
    }

    // ---- misc ------------------------------------------------------------

    pub fn attach_resolver(&mut self, node_id: NodeId, handle: ResolverHandle) {
        self.nodes[node_id].resolver = Some(handle);
    }

    pub fn contains_label(&self, container: ContainerId, label: &str) -> bool {
        self.containers[container].labels.contains(label)
    }

    /// Moves `label` to `target_index` among its siblings. Used by
    /// `query::sort`, which computes the full target order up front rather
    /// than going through `Position`.
    pub fn reposition_in_place(&mut self, container: ContainerId, label: &str, target_index: usize) {
        self.containers[container]
            .labels
            .reposition(label, &Position::Index(target_index));
    }

    /// Creates a new container with no parent node, used as the destination
    /// root of `query::deepcopy` and as a scratch container a decoder wires
    /// up before the owning node exists.
    pub fn new_detached_container(&mut self) -> ContainerId {
        self.containers.insert(ContainerData::new(None))
    }

    /// Back-fills `container`'s parent-node link after the fact — used by
    /// the TYTX decoder, which must create the container before the node
    /// whose value slot will hold it exists.
    pub fn attach_container_parent(&mut self, container: ContainerId, node_id: NodeId) {
        self.containers[container].parent_node = Some(node_id);
    }

    pub fn set_value(&mut self, node_id: NodeId, value: Value) {
        self.nodes[node_id].value = value;
    }
}

fn attrs_to_value(attrs: &IndexMap<String, Value>) -> Value {
    Value::Str(
        attrs
            .iter()
            .map(|(k, v)| format!("{k}={}", v.display_key()))
            .collect::<Vec<_>>()
            .join(","),
    )
}

fn json_to_value(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => Value::Str(s.clone()),
        other => Value::Str(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::resolve_sync;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    #[test]
    fn set_and_get_roundtrip() {
        let mut store = Store::new();
        store
            .set_item("a.b", Value::Int(7), IndexMap::new(), Position::End, None, true)
            .unwrap();
        let v = resolve_sync(store.get("a.b", None)).unwrap();
        assert_eq!(v, Value::Int(7));
    }

    #[test]
    fn autocreate_materialises_intermediate_containers() {
        let mut store = Store::new();
        store
            .set_item("x.y.z", Value::Bool(true), IndexMap::new(), Position::End, None, true)
            .unwrap();
        assert!(resolve_sync(store.get("x", None)).unwrap().is_container());
        assert_eq!(resolve_sync(store.get("x.y.z", None)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn duplicate_label_is_update_not_error() {
        let mut store = Store::new();
        let root = store.root();
        store.set(root, "a", Value::Int(1), IndexMap::new(), Position::End, None, false).unwrap();
        store.set(root, "a", Value::Int(2), IndexMap::new(), Position::End, None, false).unwrap();
        assert_eq!(store.len(root), 1);
        assert_eq!(resolve_sync(store.get("a", None)).unwrap(), Value::Int(2));
    }

    #[test]
    fn parent_of_root_fails() {
        let mut store = Store::new();
        let err = resolve_sync(store.get("#parent", None)).unwrap_err();
        assert!(matches!(err, StoreError::ParentOfRoot { .. }));
    }

    #[test]
    fn missing_path_returns_default_on_read() {
        let mut store = Store::new();
        let v = resolve_sync(store.get("nope", Some(Value::Int(-1)))).unwrap();
        assert_eq!(v, Value::Int(-1));
    }

    /// S2: `#parent` immediately after a scalar leaf pops to the leaf's own
    /// container instead of tripping `CannotDescendIntoScalar`, and an
    /// attribute selector with no node to read from falls back to `default`.
    #[test]
    fn parent_after_scalar_leaf_pops_without_descending() {
        let mut store = Store::new();
        store
            .set_item("config.database.port", Value::Int(5432), IndexMap::new(), Position::End, None, true)
            .unwrap();

        let popped_up = resolve_sync(store.get("config.database.port.#parent", None)).unwrap();
        assert!(popped_up.is_container());
        assert_eq!(popped_up, resolve_sync(store.get("config.database", None)).unwrap());

        let name = resolve_sync(store.get("config.database.port.#parent?name", Some(Value::Null))).unwrap();
        assert_eq!(name, Value::Null);
    }

    #[test]
    fn pop_removes_and_returns_value() {
        let mut store = Store::new();
        store.set_item("a", Value::Int(5), IndexMap::new(), Position::End, None, true).unwrap();
        let popped = store.pop("a", None, None).unwrap();
        assert_eq!(popped, Value::Int(5));
        assert_eq!(resolve_sync(store.get("a", Some(Value::Null))).unwrap(), Value::Null);
    }

    #[test]
    fn subscription_fires_on_insert_and_walks_upward_with_level() {
        let mut store = Store::new();
        let root = store.root();
        let child_container = store.new_detached_container();
        let child_node = store
            .set(root, "child", Value::Container(child_container), IndexMap::new(), Position::End, None, false)
            .unwrap();
        store.attach_container_parent(child_container, child_node);
        store.set_backref(root);
        store.set_backref(child_container);

        let root_levels = Arc::new(std::sync::Mutex::new(Vec::new()));
        let levels_for_cb = root_levels.clone();
        store.subscribe(
            root,
            "watcher",
            Subscription {
                on_insert: Some(Box::new(move |ev| {
                    levels_for_cb.lock().unwrap().push(ev.level);
                })),
                ..Default::default()
            },
        );

        store
            .set(child_container, "leaf", Value::Int(1), IndexMap::new(), Position::End, None, false)
            .unwrap();

        let levels = root_levels.lock().unwrap().clone();
        assert_eq!(levels, vec![-1]);
    }

    #[test]
    fn subscriber_panic_does_not_abort_the_mutation() {
        let mut store = Store::new();
        let root = store.root();
        store.set_backref(root);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_cb = calls.clone();
        store.subscribe(
            root,
            "panicky",
            Subscription {
                on_insert: Some(Box::new(move |_ev| {
                    calls_for_cb.fetch_add(1, AtomicOrdering::SeqCst);
                    panic!("boom");
                })),
                ..Default::default()
            },
        );
        store.set(root, "a", Value::Int(1), IndexMap::new(), Position::End, None, false).unwrap();
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(resolve_sync(store.get("a", None)).unwrap(), Value::Int(1));
    }

    #[test]
    fn get_inherited_attributes_closest_wins() {
        let mut store = Store::new();
        let root = store.root();
        let mut ancestor_attrs = IndexMap::new();
        ancestor_attrs.insert("color".to_string(), Value::Str("red".to_string()));
        let child_container = store.new_detached_container();
        let child_node = store
            .set(root, "child", Value::Container(child_container), ancestor_attrs, Position::End, None, false)
            .unwrap();
        store.attach_container_parent(child_container, child_node);
        let mut leaf_attrs = IndexMap::new();
        leaf_attrs.insert("size".to_string(), Value::Int(3));
        leaf_attrs.insert("color".to_string(), Value::Str("blue".to_string()));
        let leaf = store
            .set(child_container, "leaf", Value::Null, leaf_attrs, Position::End, None, false)
            .unwrap();
        let inherited = store.get_inherited_attributes(leaf);
        assert_eq!(inherited.get("size"), Some(&Value::Int(3)));
        assert_eq!(inherited.get("color"), Some(&Value::Str("blue".to_string())));
    }
}
