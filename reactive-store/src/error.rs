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

//! Error taxonomy for the store.

use std::sync::Arc;
use thiserror::Error;

/// All ways a store operation can fail.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("path not found: {path}")]
    PathNotFound { path: String },

    #[error("#parent applied at the top level: {path}")]
    ParentOfRoot { path: String },

    #[error("cannot descend into scalar at {label} (path {path})")]
    CannotDescendIntoScalar { path: String, label: String },

    #[error("resolver for {label} failed: {source}")]
    ResolverFailure {
        label: String,
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    #[error("invalid path syntax in {path}: {reason}")]
    InvalidPathSyntax { path: String, reason: String },

    #[error("malformed codec row {row}: {reason}")]
    CodecMalformed { row: usize, reason: String },
}

impl PartialEq for StoreError {
    fn eq(&self, other: &Self) -> bool {
        format!("{self}") == format!("{other}")
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
