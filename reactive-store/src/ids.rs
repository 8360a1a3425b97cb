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

//! Stable, generational keys into a [`crate::Store`]'s two arenas.
//!
//! Parent/child and value/container back-links are expressed as these keys
//! rather than owning references, so the reference cycles inherent to the
//! data model (parent ↔ child, node ↔ resolver) never become Rust ownership
//! cycles. See the Design Notes in `SPEC_FULL.md` §9.

use slotmap::new_key_type;

new_key_type! {
    /// Identifies a [`crate::node::Node`] within its owning [`crate::Store`].
    pub struct NodeId;

    /// Identifies a [`crate::container::ContainerData`] within its owning
    /// [`crate::Store`].
    pub struct ContainerId;
}
