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

//! The event model: insert/update/delete notifications and the callbacks
//! that subscribe to them (`spec.md` §4.2 "Event model", §6 "Subscription
//! API").
//!
//! Callbacks receive an owned event snapshot rather than a live handle back
//! into the [`crate::Store`]: the store is not reentrant (there is no
//! internal locking, per `spec.md` §5), so a callback that wants to read or
//! mutate the store further must have been handed an external, shared
//! reference to it (e.g. `Rc<RefCell<Store>>`) by the caller. This is a
//! deliberate simplification of the original's "pass the live container"
//! convention; see `DESIGN.md`.

use crate::ids::NodeId;
use crate::value::Value;
use indexmap::IndexMap;

/// Fired when a node is inserted into a container, at `level` 0, then walked
/// upward through ancestor containers at levels -1, -2, ...
#[derive(Clone, Debug)]
pub struct InsertEvent {
    pub node: NodeId,
    pub label: String,
    pub position: usize,
    pub reason: Option<String>,
    pub level: i32,
}

/// Which parts of a node changed in an update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Changed {
    pub value: bool,
    pub attrs: bool,
}

#[derive(Clone, Debug)]
pub struct UpdateEvent {
    pub node: NodeId,
    pub label: String,
    pub old_value: Value,
    pub old_attrs: IndexMap<String, Value>,
    pub changed: Changed,
    pub reason: Option<String>,
    pub level: i32,
}

#[derive(Clone, Debug)]
pub struct DeleteEvent {
    pub node: NodeId,
    pub label: String,
    pub position: usize,
    pub reason: Option<String>,
    pub level: i32,
}

/// The union delivered to `on_any`, tagged with `kind` per `spec.md` §6.
#[derive(Clone, Debug)]
pub enum AnyEvent {
    Insert(InsertEvent),
    Update(UpdateEvent),
    Delete(DeleteEvent),
}

impl AnyEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AnyEvent::Insert(_) => "insert",
            AnyEvent::Update(_) => "update",
            AnyEvent::Delete(_) => "delete",
        }
    }

    pub fn level(&self) -> i32 {
        match self {
            AnyEvent::Insert(e) => e.level,
            AnyEvent::Update(e) => e.level,
            AnyEvent::Delete(e) => e.level,
        }
    }
}

pub type InsertCallback = Box<dyn Fn(&InsertEvent) + Send + Sync>;
pub type UpdateCallback = Box<dyn Fn(&UpdateEvent) + Send + Sync>;
pub type DeleteCallback = Box<dyn Fn(&DeleteEvent) + Send + Sync>;
pub type AnyCallback = Box<dyn Fn(&AnyEvent) + Send + Sync>;

/// One subscriber's set of callbacks, keyed by an id the caller chooses.
#[derive(Default)]
pub struct Subscription {
    pub on_insert: Option<InsertCallback>,
    pub on_update: Option<UpdateCallback>,
    pub on_delete: Option<DeleteCallback>,
    pub on_any: Option<AnyCallback>,
}

impl Subscription {
    pub fn fire_insert(&self, ev: &InsertEvent) {
        if let Some(cb) = &self.on_insert {
            run_callback(|| cb(ev));
        }
        if let Some(cb) = &self.on_any {
            run_callback(|| cb(&AnyEvent::Insert(ev.clone())));
        }
    }

    pub fn fire_update(&self, ev: &UpdateEvent) {
        if let Some(cb) = &self.on_update {
            run_callback(|| cb(ev));
        }
        if let Some(cb) = &self.on_any {
            run_callback(|| cb(&AnyEvent::Update(ev.clone())));
        }
    }

    pub fn fire_delete(&self, ev: &DeleteEvent) {
        if let Some(cb) = &self.on_delete {
            run_callback(|| cb(ev));
        }
        if let Some(cb) = &self.on_any {
            run_callback(|| cb(&AnyEvent::Delete(ev.clone())));
        }
    }
}

/// Runs a subscriber callback, catching panics so one broken subscriber
/// cannot unwind through the mutation that triggered it (`spec.md` §7:
/// "errors in subscriber callbacks do not roll back the mutation").
///
/// The callbacks we're given close over `&Box<dyn Fn(..) + Send + Sync>`,
/// which isn't `UnwindSafe` (auto traits on a trait object are limited to
/// the ones named in it). We don't rely on the closure's state being
/// consistent after a panic — it's discarded immediately — so asserting
/// unwind-safety here is sound.
fn run_callback(f: impl FnOnce()) {
    if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "subscriber panicked with a non-string payload".to_string());
        tracing::warn!(error = %msg, "subscriber callback panicked; mutation was not rolled back");
    }
}
