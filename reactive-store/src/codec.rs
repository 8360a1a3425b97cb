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

//! C7: the TYTX type-preserving codec. Wraps the C6 flattener row stream
//! for a transport (JSON or MessagePack), tagging primitives with `::CODE`
//! suffixes so a decoder can reconstruct exact types — in particular
//! `Decimal`, dates/times, booleans and the container sentinel, none of
//! which plain JSON can represent losslessly (`spec.md` §4.4).

use crate::container::Store;
use crate::error::{Result, StoreError};
use crate::flatten::{self, FlatValue, Row, CONTAINER_SENTINEL};
use crate::ids::ContainerId;
use crate::label_table::Position;
use crate::value::{Timestamp, Value};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Json,
    MessagePack,
}

/// Encodes a single [`Value`] into its TYTX wire string (or JSON null).
fn encode_scalar(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Int(n) => serde_json::Value::String(format!("{n}::L")),
        Value::Float(f) => serde_json::Value::String(format!("{f}::R")),
        Value::Decimal(d) => serde_json::Value::String(format!("{d}::N")),
        Value::Bool(b) => serde_json::Value::String(format!("{b}::B")),
        Value::Date(d) => serde_json::Value::String(format!("{}::D", d.format("%Y-%m-%d"))),
        Value::Time(t) => serde_json::Value::String(format!("{}::H", t.format("%H:%M:%S%.6f"))),
        Value::Timestamp(Timestamp::Naive(ts)) => {
            serde_json::Value::String(format!("{}::DH", ts.format("%Y-%m-%dT%H:%M:%S%.6f")))
        }
        Value::Timestamp(Timestamp::Aware(ts)) => {
            serde_json::Value::String(format!("{}::DHZ", ts.format("%Y-%m-%dT%H:%M:%S%.6f%:z")))
        }
        Value::Bytes(b) => {
            let b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b);
            serde_json::Value::String(format!("{b64}::BY"))
        }
        Value::Container(_) => serde_json::Value::String(CONTAINER_SENTINEL.to_string()),
        // Query-projection-only (`#__v`); never held by a node, so this arm
        // is unreachable from `to_tytx`, which only flattens real node values.
        Value::Node(_) => serde_json::Value::Null,
    }
}

/// Decodes a TYTX-tagged JSON scalar back into a [`Value`]. Strings with no
/// recognised `::CODE` suffix decode as bare strings, per the wire table.
fn decode_scalar(raw: &serde_json::Value, row: usize) -> Result<Value> {
    match raw {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::String(s) => decode_tagged_string(s, row),
        other => Err(StoreError::CodecMalformed {
            row,
            reason: format!("unsupported TYTX scalar shape: {other}"),
        }),
    }
}

fn decode_tagged_string(s: &str, row: usize) -> Result<Value> {
    let malformed = |reason: String| StoreError::CodecMalformed { row, reason };
    if let Some(body) = s.strip_suffix("::L") {
        return body
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| malformed(format!("invalid integer '{body}': {e}")));
    }
    if let Some(body) = s.strip_suffix("::R") {
        return body
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| malformed(format!("invalid float '{body}': {e}")));
    }
    if let Some(body) = s.strip_suffix("::N") {
        return rust_decimal::Decimal::from_str(body)
            .map(Value::Decimal)
            .map_err(|e| malformed(format!("invalid decimal '{body}': {e}")));
    }
    if let Some(body) = s.strip_suffix("::B") {
        return match body {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            other => Err(malformed(format!("invalid boolean '{other}'"))),
        };
    }
    if let Some(body) = s.strip_suffix("::DHZ") {
        return chrono::DateTime::parse_from_str(body, "%Y-%m-%dT%H:%M:%S%.f%:z")
            .map(|t| Value::Timestamp(Timestamp::Aware(t)))
            .map_err(|e| malformed(format!("invalid offset timestamp '{body}': {e}")));
    }
    if let Some(body) = s.strip_suffix("::DH") {
        return NaiveDateTime::parse_from_str(body, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|t| Value::Timestamp(Timestamp::Naive(t)))
            .map_err(|e| malformed(format!("invalid timestamp '{body}': {e}")));
    }
    if let Some(body) = s.strip_suffix("::D") {
        return NaiveDate::parse_from_str(body, "%Y-%m-%d")
            .map(Value::Date)
            .map_err(|e| malformed(format!("invalid date '{body}': {e}")));
    }
    if let Some(body) = s.strip_suffix("::H") {
        return NaiveTime::parse_from_str(body, "%H:%M:%S%.f")
            .map(Value::Time)
            .map_err(|e| malformed(format!("invalid time '{body}': {e}")));
    }
    if let Some(body) = s.strip_suffix("::BY") {
        return base64::Engine::decode(&base64::engine::general_purpose::STANDARD, body)
            .map(Value::Bytes)
            .map_err(|e| malformed(format!("invalid base64 '{body}': {e}")));
    }
    if s == CONTAINER_SENTINEL {
        return Err(malformed("container sentinel decoded as a scalar".to_string()));
    }
    Ok(Value::Str(s.to_string()))
}

#[derive(Serialize, Deserialize)]
struct WireRow {
    parent: String,
    label: String,
    tag: Option<String>,
    value: serde_json::Value,
    attrs: BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize)]
struct WireDocument {
    rows: Vec<WireRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    paths: Option<BTreeMap<String, String>>,
}

fn row_to_wire(row: &Row) -> WireRow {
    let value = match &row.value {
        FlatValue::ContainerSentinel => serde_json::Value::String(CONTAINER_SENTINEL.to_string()),
        FlatValue::Scalar(v) => encode_scalar(v),
    };
    WireRow {
        parent: row.parent.clone(),
        label: row.label.clone(),
        tag: row.tag.clone(),
        value,
        attrs: row
            .attrs
            .iter()
            .map(|(k, v)| (k.clone(), encode_scalar(v)))
            .collect(),
    }
}

/// `to_tytx(container, transport)`: serialises `container` (path mode) as
/// the canonical `{"rows": [...]}` document.
pub fn to_tytx(store: &Store, container: ContainerId, transport: Transport) -> Vec<u8> {
    let rows = flatten::flatten_paths(store, container);
    let doc = WireDocument {
        rows: rows.iter().map(row_to_wire).collect(),
        paths: None,
    };
    encode_document(&doc, transport)
}

/// Compact-mode counterpart of [`to_tytx`]: rows reference their parent by
/// an integer code rather than a repeated dotted path, and the code ->
/// path registry is carried alongside as `{"paths": {...}}` (`spec.md`
/// §4.4/§6).
pub fn to_tytx_compact(store: &Store, container: ContainerId, transport: Transport) -> Vec<u8> {
    let (rows, registry) = flatten::flatten_compact(store, container);
    let paths = registry
        .iter()
        .enumerate()
        .map(|(code, path)| (code.to_string(), path.clone()))
        .collect();
    let doc = WireDocument {
        rows: rows.iter().map(|(_, row)| row_to_wire(row)).collect(),
        paths: Some(paths),
    };
    encode_document(&doc, transport)
}

fn encode_document(doc: &WireDocument, transport: Transport) -> Vec<u8> {
    match transport {
        Transport::Json => serde_json::to_vec(doc).expect("WireDocument is always JSON-serialisable"),
        Transport::MessagePack => rmp_serde::to_vec_named(doc).expect("WireDocument is always MessagePack-serialisable"),
    }
}

/// Decodes a row's `value`/`attrs` fields, reporting whether `value` is the
/// container sentinel so the caller knows to open a new container for it.
fn decode_row_body(row: &WireRow, i: usize) -> Result<(bool, Value, IndexMap<String, Value>)> {
    let is_container_row = matches!(&row.value, serde_json::Value::String(s) if s == CONTAINER_SENTINEL);
    let value = if is_container_row {
        Value::Null
    } else {
        decode_scalar(&row.value, i)?
    };
    let attrs: IndexMap<String, Value> = row
        .attrs
        .iter()
        .map(|(k, v)| Ok((k.clone(), decode_scalar(v, i)?)))
        .collect::<Result<_>>()?;
    Ok((is_container_row, value, attrs))
}

/// `from_tytx(bytes, transport)`: decodes a TYTX document and replays its
/// rows into `store`'s root container, reconstructing the tree
/// (`spec.md` §4.4). `store` is expected to be empty; existing children of
/// its root are left in place and new rows are appended alongside them.
/// Detects path mode vs. compact mode from whether the document carries a
/// `paths` registry.
pub fn from_tytx(bytes: &[u8], transport: Transport, store: &mut Store) -> Result<ContainerId> {
    let doc: WireDocument = decode_document(bytes, transport)?;
    let root = store.root();
    match &doc.paths {
        Some(paths) => replay_compact(&doc, paths, store, root),
        None => replay_paths(&doc, store, root),
    }
}

fn replay_paths(doc: &WireDocument, store: &mut Store, root: ContainerId) -> Result<ContainerId> {
    let mut by_path: IndexMap<String, ContainerId> = IndexMap::new();
    by_path.insert(String::new(), root);
    for (i, row) in doc.rows.iter().enumerate() {
        let parent_container = *by_path.get(&row.parent).ok_or_else(|| StoreError::CodecMalformed {
            row: i,
            reason: format!("row references unknown parent path '{}'", row.parent),
        })?;
        let (is_container_row, value, attrs) = decode_row_body(row, i)?;
        let node_id = store
            .set(parent_container, &row.label, value, attrs, Position::End, None, false)
            .map_err(|_| StoreError::CodecMalformed {
                row: i,
                reason: format!("failed to insert row at '{}.{}'", row.parent, row.label),
            })?;
        if is_container_row {
            let child_container = store.new_detached_container();
            store.attach_container_parent(child_container, node_id);
            store.set_value(node_id, Value::Container(child_container));
            let child_path = if row.parent.is_empty() {
                row.label.clone()
            } else {
                format!("{}.{}", row.parent, row.label)
            };
            by_path.insert(child_path, child_container);
        }
    }
    Ok(root)
}

/// Compact-mode counterpart of [`replay_paths`]: parents are resolved by
/// integer code against `paths` (code -> dotted path) rather than by a
/// repeated path string; a container row's own code is recovered by
/// computing its path from the parent's and looking it up in the same
/// registry, inverted.
fn replay_compact(doc: &WireDocument, paths: &BTreeMap<String, String>, store: &mut Store, root: ContainerId) -> Result<ContainerId> {
    let mut path_to_code: std::collections::HashMap<String, u32> = std::collections::HashMap::new();
    let mut code_to_path: std::collections::HashMap<u32, String> = std::collections::HashMap::new();
    for (code_str, path) in paths {
        let code: u32 = code_str.parse().map_err(|_| StoreError::CodecMalformed {
            row: 0,
            reason: format!("non-numeric path registry code '{code_str}'"),
        })?;
        path_to_code.insert(path.clone(), code);
        code_to_path.insert(code, path.clone());
    }
    let mut by_code: std::collections::HashMap<u32, ContainerId> = std::collections::HashMap::new();
    by_code.insert(0, root);

    for (i, row) in doc.rows.iter().enumerate() {
        let parent_code: u32 = row.parent.parse().map_err(|_| StoreError::CodecMalformed {
            row: i,
            reason: format!("row references non-numeric parent code '{}'", row.parent),
        })?;
        let parent_container = *by_code.get(&parent_code).ok_or_else(|| StoreError::CodecMalformed {
            row: i,
            reason: format!("row references unknown parent code {parent_code}"),
        })?;
        let (is_container_row, value, attrs) = decode_row_body(row, i)?;
        let node_id = store
            .set(parent_container, &row.label, value, attrs, Position::End, None, false)
            .map_err(|_| StoreError::CodecMalformed {
                row: i,
                reason: format!("failed to insert row '{}' under parent code {parent_code}", row.label),
            })?;
        if is_container_row {
            let child_container = store.new_detached_container();
            store.attach_container_parent(child_container, node_id);
            store.set_value(node_id, Value::Container(child_container));
            let parent_path = code_to_path.get(&parent_code).cloned().unwrap_or_default();
            let child_path = if parent_path.is_empty() {
                row.label.clone()
            } else {
                format!("{parent_path}.{}", row.label)
            };
            let child_code = *path_to_code.get(&child_path).ok_or_else(|| StoreError::CodecMalformed {
                row: i,
                reason: format!("container row at '{child_path}' missing from the path registry"),
            })?;
            by_code.insert(child_code, child_container);
        }
    }
    Ok(root)
}

fn decode_document(bytes: &[u8], transport: Transport) -> Result<WireDocument> {
    match transport {
        Transport::Json => serde_json::from_slice(bytes).map_err(|e| StoreError::CodecMalformed {
            row: 0,
            reason: format!("malformed TYTX JSON document: {e}"),
        }),
        Transport::MessagePack => rmp_serde::from_slice(bytes).map_err(|e| StoreError::CodecMalformed {
            row: 0,
            reason: format!("malformed TYTX MessagePack document: {e}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Store;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[test]
    fn round_trips_typed_scalars_and_nesting() {
        let mut store = Store::new();
        let root = store.root();
        store
            .set(root, "x", Value::Int(42), IndexMap::new(), Position::End, None, false)
            .unwrap();
        store
            .set(
                root,
                "y",
                Value::Decimal(Decimal::from_str("99.99").unwrap()),
                IndexMap::new(),
                Position::End,
                None,
                false,
            )
            .unwrap();
        store
            .set(
                root,
                "d",
                Value::Date(NaiveDate::from_ymd_opt(2026, 1, 4).unwrap()),
                IndexMap::new(),
                Position::End,
                None,
                false,
            )
            .unwrap();
        let child_container = store.new_detached_container();
        let child_node = store
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
        store.attach_container_parent(child_container, child_node);
        store
            .set(child_container, "inner", Value::Bool(true), IndexMap::new(), Position::End, None, false)
            .unwrap();

        let bytes = to_tytx(&store, root, Transport::Json);
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("42::L"));
        assert!(text.contains("99.99::N"));
        assert!(text.contains("2026-01-04::D"));
        assert!(text.contains("::X"));

        let mut decoded_store = Store::new();
        from_tytx(&bytes, Transport::Json, &mut decoded_store).unwrap();
        let x = crate::resolver::resolve_sync(decoded_store.get("x", None));
        assert_eq!(x.unwrap(), Value::Int(42));
        let inner = crate::resolver::resolve_sync(decoded_store.get("child.inner", None));
        assert_eq!(inner.unwrap(), Value::Bool(true));
    }

    #[test]
    fn round_trips_compact_mode() {
        let mut store = Store::new();
        let root = store.root();
        store
            .set(root, "x", Value::Int(7), IndexMap::new(), Position::End, None, false)
            .unwrap();
        let child_container = store.new_detached_container();
        let child_node = store
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
        store.attach_container_parent(child_container, child_node);
        store
            .set(child_container, "inner", Value::Bool(true), IndexMap::new(), Position::End, None, false)
            .unwrap();
        let grandchild_container = store.new_detached_container();
        let grandchild_node = store
            .set(
                child_container,
                "grand",
                Value::Container(grandchild_container),
                IndexMap::new(),
                Position::End,
                None,
                false,
            )
            .unwrap();
        store.attach_container_parent(grandchild_container, grandchild_node);
        store
            .set(grandchild_container, "leaf", Value::Int(99), IndexMap::new(), Position::End, None, false)
            .unwrap();

        let bytes = to_tytx_compact(&store, root, Transport::Json);
        let doc: WireDocument = decode_document(&bytes, Transport::Json).unwrap();
        assert!(doc.paths.is_some());
        for row in &doc.rows {
            assert!(row.parent.parse::<u32>().is_ok(), "parent '{}' is not a code", row.parent);
        }

        let mut decoded_store = Store::new();
        from_tytx(&bytes, Transport::Json, &mut decoded_store).unwrap();
        assert_eq!(
            crate::resolver::resolve_sync(decoded_store.get("x", None)).unwrap(),
            Value::Int(7)
        );
        assert_eq!(
            crate::resolver::resolve_sync(decoded_store.get("child.inner", None)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            crate::resolver::resolve_sync(decoded_store.get("child.grand.leaf", None)).unwrap(),
            Value::Int(99)
        );
    }
}
