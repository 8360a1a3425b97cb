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

//! The value universe a [`crate::node::Node`] or an attribute can hold.

use crate::ids::{ContainerId, NodeId};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use std::cmp::Ordering;

/// A timestamp, either naive (no offset) or offset-aware.
///
/// Corresponds to the `::DH` / `::DHZ` TYTX suffixes in `spec.md` §4.4.
#[derive(Clone, Debug, PartialEq)]
pub enum Timestamp {
    Naive(NaiveDateTime),
    Aware(DateTime<FixedOffset>),
}

/// A node or attribute value.
///
/// `Container` is only valid as a node value, never as an attribute value
/// (`spec.md` §3: "no nested containers" in `attrs`); constructors that build
/// attribute maps reject it, see [`crate::container::Container::set_attr`].
///
/// `Node` is likewise never stored: it only appears as the result of a
/// `#__v` query projection (`spec.md` §4.2/§4.6), a handle to the node
/// object itself rather than a copy of its value. It never reaches the
/// TYTX codec, which only ever sees values actually held by a node.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Str(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(Timestamp),
    Container(ContainerId),
    Node(NodeId),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Value::Container(_))
    }

    pub fn as_container_id(&self) -> Option<ContainerId> {
        match self {
            Value::Container(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_node_id(&self) -> Option<NodeId> {
        match self {
            Value::Node(id) => Some(*id),
            _ => None,
        }
    }

    /// Best-effort numeric coercion, used by `sum` (§4.6) and ordering in
    /// `sort` (§4.2).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Decimal(d) => d.to_string().parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Lexical form used by `sort`'s `#k`/`#v`/`#a.<attr>` string comparisons.
    pub fn display_key(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Decimal(d) => d.to_string(),
            Value::Str(s) => s.clone(),
            Value::Bytes(b) => base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b),
            Value::Date(d) => d.to_string(),
            Value::Time(t) => t.to_string(),
            Value::Timestamp(Timestamp::Naive(t)) => t.to_string(),
            Value::Timestamp(Timestamp::Aware(t)) => t.to_rfc3339(),
            Value::Container(_) => String::new(),
            Value::Node(_) => String::new(),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

/// Partial order used by `sort`: numeric values compare numerically,
/// everything else falls back to the lexical form. Not a total order (NaN,
/// mixed types), which is why `sort` always asks for a case-(in)sensitive
/// string/numeric comparator rather than `Ord`.
pub fn compare_values(a: &Value, b: &Value, case_sensitive: bool) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    let (sa, sb) = (a.display_key(), b.display_key());
    if case_sensitive {
        sa.cmp(&sb)
    } else {
        sa.to_lowercase().cmp(&sb.to_lowercase())
    }
}
