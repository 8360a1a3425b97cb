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

//! C8: the legacy typed-XML reader. Decodes the `GenRoBag`-wrapped dialect
//! into a fresh `Store`, auto-detecting whether types are carried as a
//! per-element `_T`/`T` attribute or as a `::<TYPE>` text suffix
//! (`spec.md` §4.4, §6). Read-only: this crate never writes the dialect
//! back out, TYTX (`codec.rs`) is the canonical wire format.
//!
//! Parsing happens in two passes: `quick_xml` streams events into an
//! in-memory [`XmlNode`] tree first, then [`build_into_store`] walks that
//! tree recursively. This trades a little memory for a parser that reads
//! like the tree it produces, which matters more here than streaming a
//! single large document.

use crate::container::Store;
use crate::error::{Result, StoreError};
use crate::ids::ContainerId;
use crate::label_table::Position;
use crate::value::{Timestamp, Value};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::collections::HashMap;
use std::str::FromStr;

const ROOT_WRAPPER: &str = "GenRoBag";

struct XmlNode {
    tag: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<XmlNode>,
}

fn parse_tree(xml: &str) -> Result<Vec<XmlNode>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut roots = Vec::new();
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| StoreError::CodecMalformed {
                row: 0,
                reason: format!("XML parse error: {e}"),
            })?;
        match event {
            Event::Eof => break,
            Event::Start(start) => {
                let tag = String::from_utf8_lossy(start.name().as_ref()).to_string();
                let attrs = start
                    .attributes()
                    .flatten()
                    .map(|a| {
                        (
                            String::from_utf8_lossy(a.key.as_ref()).to_string(),
                            a.unescape_value().unwrap_or_default().to_string(),
                        )
                    })
                    .collect();
                stack.push(XmlNode {
                    tag,
                    attrs,
                    text: String::new(),
                    children: Vec::new(),
                });
            }
            Event::Empty(start) => {
                let tag = String::from_utf8_lossy(start.name().as_ref()).to_string();
                let attrs = start
                    .attributes()
                    .flatten()
                    .map(|a| {
                        (
                            String::from_utf8_lossy(a.key.as_ref()).to_string(),
                            a.unescape_value().unwrap_or_default().to_string(),
                        )
                    })
                    .collect();
                let node = XmlNode {
                    tag,
                    attrs,
                    text: String::new(),
                    children: Vec::new(),
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => roots.push(node),
                }
            }
            Event::Text(text) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text.unescape().unwrap_or_default());
                }
            }
            Event::End(_) => {
                let node = stack.pop().ok_or_else(|| StoreError::CodecMalformed {
                    row: 0,
                    reason: "unbalanced XML end tag".to_string(),
                })?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => roots.push(node),
                }
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(roots)
}

/// Decodes a complete typed-XML document into `store`'s root, stripping the
/// `GenRoBag` wrapper if present at the very top.
pub fn read_xml(store: &mut Store, xml: &str) -> Result<ContainerId> {
    let roots = parse_tree(xml)?;
    let root_nodes: Vec<&XmlNode> = if roots.len() == 1 && roots[0].tag == ROOT_WRAPPER {
        roots[0].children.iter().collect()
    } else {
        roots.iter().collect()
    };
    let root = store.root();
    let mut siblings = HashMap::new();
    for node in root_nodes {
        build_into_store(store, root, node, &mut siblings)?;
    }
    Ok(root)
}

fn type_attr<'a>(node: &'a XmlNode) -> Option<&'a str> {
    node.attrs
        .iter()
        .find(|(k, _)| k == "_T" || k == "T")
        .map(|(_, v)| v.as_str())
}

/// Recursively converts one [`XmlNode`] into a `Store` node under
/// `container`, returning nothing — mutation happens directly on `store`.
fn build_into_store(
    store: &mut Store,
    container: ContainerId,
    node: &XmlNode,
    siblings: &mut HashMap<String, usize>,
) -> Result<()> {
    let (label, original_tag) = sanitize_and_dedupe_label(&node.tag, container, store, siblings);

    let mut attrs: IndexMap<String, Value> = IndexMap::new();
    for (k, v) in &node.attrs {
        if k == "_T" || k == "T" {
            continue;
        }
        attrs.insert(k.clone(), Value::Str(v.clone()));
    }
    if let Some(tag) = original_tag {
        attrs.insert("_tag".to_string(), Value::Str(tag));
    }

    if node.children.is_empty() {
        let value = decode_typed_text(node.text.trim(), type_attr(node))?;
        store.set(container, &label, value, attrs, Position::End, None, false)?;
        return Ok(());
    }

    let node_id = store.set(container, &label, Value::Null, attrs, Position::End, None, false)?;
    let child_container = store.new_detached_container();
    store.attach_container_parent(child_container, node_id);
    store.set_value(node_id, Value::Container(child_container));
    let mut child_siblings = HashMap::new();
    for child in &node.children {
        build_into_store(store, child_container, child, &mut child_siblings)?;
    }
    Ok(())
}

/// Decodes a leaf's text body, following whichever convention applies: an
/// explicit `_T`/`T` code, or a `::TYPE` suffix on the text itself.
fn decode_typed_text(text: &str, type_code: Option<&str>) -> Result<Value> {
    if let Some(code) = type_code {
        return decode_by_code(text, code);
    }
    if let Some((body, code)) = text.rsplit_once("::") {
        if is_known_code(code) {
            return decode_by_code(body, code);
        }
    }
    if text.is_empty() {
        return Ok(Value::Null);
    }
    Ok(Value::Str(text.to_string()))
}

fn is_known_code(code: &str) -> bool {
    matches!(code, "L" | "R" | "N" | "B" | "D" | "DH" | "DHZ" | "H" | "BY" | "BAG" | "NN")
}

fn decode_by_code(body: &str, code: &str) -> Result<Value> {
    let malformed = |reason: String| StoreError::CodecMalformed { row: 0, reason };
    match code {
        "L" => body.parse::<i64>().map(Value::Int).map_err(|e| malformed(e.to_string())),
        "R" => body.parse::<f64>().map(Value::Float).map_err(|e| malformed(e.to_string())),
        "N" => rust_decimal::Decimal::from_str(body)
            .map(Value::Decimal)
            .map_err(|e| malformed(e.to_string())),
        "B" => match body {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" | "" => Ok(Value::Bool(false)),
            other => Err(malformed(format!("invalid legacy boolean '{other}'"))),
        },
        "D" => NaiveDate::parse_from_str(body, "%Y-%m-%d")
            .map(Value::Date)
            .map_err(|e| malformed(e.to_string())),
        "DH" => NaiveDateTime::parse_from_str(body, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(body, "%Y-%m-%d %H:%M:%S%.f"))
            .map(|t| Value::Timestamp(Timestamp::Naive(t)))
            .map_err(|e| malformed(e.to_string())),
        "DHZ" => chrono::DateTime::parse_from_rfc3339(body)
            .map(|t| Value::Timestamp(Timestamp::Aware(t)))
            .map_err(|e| malformed(e.to_string())),
        "H" => NaiveTime::parse_from_str(body, "%H:%M:%S%.f")
            .map(Value::Time)
            .map_err(|e| malformed(e.to_string())),
        "BY" => base64::Engine::decode(&base64::engine::general_purpose::STANDARD, body)
            .map(Value::Bytes)
            .map_err(|e| malformed(e.to_string())),
        "BAG" | "NN" => Ok(Value::Null),
        other => Err(malformed(format!("unknown legacy type code '{other}'"))),
    }
}

/// Sanitises invalid XML-tag-name characters to `_` and de-duplicates
/// sibling labels by suffixing `_1`, `_2`, … on the second and later
/// occurrence (`spec.md` §4.4, §6). Returns `(label, original_tag)` where
/// `original_tag` is `Some` only when sanitisation actually changed the
/// name (so callers know to stash it in `_tag`).
fn sanitize_and_dedupe_label(
    raw: &str,
    container: ContainerId,
    store: &Store,
    siblings: &mut HashMap<String, usize>,
) -> (String, Option<String>) {
    let sanitized: String = raw
        .chars()
        .map(|c| if is_valid_xml_name_char(c) { c } else { '_' })
        .collect();
    let original_tag = if sanitized != raw { Some(raw.to_string()) } else { None };

    let count = siblings.entry(sanitized.clone()).or_insert(0);
    let label = if *count == 0 && !store.contains_label(container, &sanitized) {
        sanitized.clone()
    } else {
        let mut n = (*count).max(1);
        loop {
            let candidate = format!("{sanitized}_{n}");
            if !store.contains_label(container, &candidate) {
                break candidate;
            }
            n += 1;
        }
    };
    *count += 1;
    (label, original_tag)
}

fn is_valid_xml_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_t_attribute_and_suffix_conventions() {
        assert_eq!(decode_typed_text("42", Some("L")).unwrap(), Value::Int(42));
        assert_eq!(decode_typed_text("42::L", None).unwrap(), Value::Int(42));
        assert_eq!(decode_typed_text("hello", None).unwrap(), Value::Str("hello".to_string()));
    }

    #[test]
    fn sibling_label_collisions_are_suffixed() {
        let mut store = Store::new();
        let root = store.root();
        let mut siblings = HashMap::new();
        let (a, _) = sanitize_and_dedupe_label("item", root, &store, &mut siblings);
        store
            .set(root, &a, Value::Null, IndexMap::new(), Position::End, None, false)
            .unwrap();
        let (b, _) = sanitize_and_dedupe_label("item", root, &store, &mut siblings);
        assert_eq!(a, "item");
        assert_eq!(b, "item_1");
    }

    #[test]
    fn invalid_tag_characters_are_sanitized() {
        let store = Store::new();
        let root = store.root();
        let mut siblings = HashMap::new();
        let (label, original) = sanitize_and_dedupe_label("a:b c", root, &store, &mut siblings);
        assert_eq!(label, "a_b_c");
        assert_eq!(original, Some("a:b c".to_string()));
    }

    #[test]
    fn reads_genrobag_wrapper_and_typed_leaves() {
        let xml = r#"<GenRoBag><x _T="L">42</x><y>99.99::N</y><child><inner _T="B">true</inner></child></GenRoBag>"#;
        let mut store = Store::new();
        read_xml(&mut store, xml).unwrap();
        let x = crate::resolver::resolve_sync(store.get("x", None)).unwrap();
        assert_eq!(x, Value::Int(42));
        let y = crate::resolver::resolve_sync(store.get("y", None)).unwrap();
        assert_eq!(y, Value::Decimal(rust_decimal::Decimal::from_str("99.99").unwrap()));
        let inner = crate::resolver::resolve_sync(store.get("child.inner", None)).unwrap();
        assert_eq!(inner, Value::Bool(true));
    }
}
