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

//! Ambient knobs shared by a [`crate::container::Store`], its codec and its
//! XML reader.

/// Which transport [`crate::codec`] uses by default when no caller-supplied
/// transport is given.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefaultTransport {
    Json,
    MessagePack,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Whether `set_item`/`set_attr` drop `Null`-valued attrs rather than
    /// storing them, unless the caller overrides it per call.
    pub remove_nulls: bool,
    pub default_transport: DefaultTransport,
    /// Replacement character used by the XML reader when sanitising a tag
    /// name into a valid label (`spec.md` §4.8).
    pub xml_sanitize_char: char,
    /// Batch size the flattener (`spec.md` §4.6) groups tuples into when a
    /// caller asks for a paginated walk rather than a single `Vec`.
    pub flatten_batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            remove_nulls: true,
            default_transport: DefaultTransport::Json,
            xml_sanitize_char: '_',
            flatten_batch_size: 256,
        }
    }
}
