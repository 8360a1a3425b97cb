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

//! An in-process reactive hierarchical container: a tree of labelled
//! nodes ([`node::Node`]) organised into ordered containers
//! ([`container::Store`]), with lazy value resolution ([`resolver`]),
//! change notification ([`subscription`]), a dotted path query language
//! ([`path`], [`query`]), and a type-preserving wire codec ([`codec`])
//! plus a legacy typed-XML reader ([`xml`]).
//!
//! The whole graph for one tree lives in a single [`container::Store`],
//! addressed through generational arena keys ([`ids`]) rather than
//! reference-counted pointers — see `DESIGN.md` for why.

pub mod codec;
pub mod config;
pub mod container;
pub mod error;
pub mod flatten;
pub mod ids;
pub mod label_table;
pub mod node;
pub mod path;
pub mod query;
pub mod resolver;
pub mod subscription;
pub mod value;
pub mod xml;

pub use config::Config;
pub use container::Store;
pub use error::{Result, StoreError};
pub use ids::{ContainerId, NodeId};
pub use value::Value;
