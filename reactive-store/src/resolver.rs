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

//! C5: the resolver engine. A lazy value provider with a TTL cache and
//! concurrent single-flight semantics, per `spec.md` §4.5.
//!
//! The single-flight lock + shared future is modelled on the
//! `tokio::sync::Mutex` guarding a job queue in
//! `proof-server/src/worker_pool.rs`: the first caller to observe an
//! expired cache takes the lock, starts the load, and publishes a
//! [`futures::future::Shared`] future that every other concurrent caller
//! awaits instead of re-invoking `load()`.

use crate::error::StoreError;
use crate::value::Value;
use async_trait::async_trait;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

/// `spec.md` §4.5 `cache_time`: `0` always-expired, `> 0` seconds-TTL, `-1`
/// indefinite until `reset()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheTime {
    AlwaysExpired,
    Seconds(u64),
    Indefinite,
}

impl CacheTime {
    pub fn from_seconds(v: i64) -> Self {
        match v {
            0 => CacheTime::AlwaysExpired,
            n if n < 0 => CacheTime::Indefinite,
            n => CacheTime::Seconds(n as u64),
        }
    }
}

/// `{module, class, args, kwargs}` — the serialised form of a resolver
/// (`spec.md` §4.5 `serialise()`/`deserialise()`, §6 "Resolver serialisation
/// schema").
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ResolverSnapshot {
    pub module: String,
    pub class: String,
    pub args: Vec<serde_json::Value>,
    pub kwargs: BTreeMap<String, serde_json::Value>,
}

impl ResolverSnapshot {
    /// A hash over the canonical JSON form, used as the fingerprint
    /// (`spec.md` §4.5: "The pair (class_name, class_args, _kw) forms a
    /// fingerprint"). `BTreeMap` keeps kwargs in a canonical key order.
    pub fn fingerprint(&self) -> u64 {
        let canon = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        canon.hash(&mut hasher);
        hasher.finish()
    }
}

/// The abstract resolver contract. Concrete resolvers (HTTP fetch, directory
/// walk, file load) are external collaborators per `spec.md` §1; this crate
/// only needs to honour and drive this trait, plus ship a trivial
/// [`CallbackResolver`] used in its own tests.
#[async_trait]
pub trait Resolver: std::fmt::Debug + Send + Sync {
    fn snapshot(&self) -> ResolverSnapshot;

    /// `true` (the default): a pure getter, never cached in the node.
    fn read_only(&self) -> bool {
        true
    }

    fn cache_time(&self) -> CacheTime {
        CacheTime::AlwaysExpired
    }

    /// `call_kwargs` is only populated for `read_only = true` resolvers; see
    /// `spec.md` §4.5 "Parameter precedence at call time".
    async fn load(
        &self,
        call_kwargs: &IndexMap<String, Value>,
    ) -> Result<Value, Arc<dyn std::error::Error + Send + Sync>>;
}

struct CacheState {
    last_update: Option<Instant>,
    loading: Option<Shared<BoxFuture<'static, Result<Value, StoreError>>>>,
}

/// The per-node binding of a [`Resolver`] plus its TTL/single-flight state.
/// `spec.md` §4.5: "the cache lives in the node, not in the resolver" — the
/// cached *value* is written back into the owning `Node::value`, but the
/// bookkeeping (`last_update`, in-flight future) lives here because it must
/// survive independently of whatever the node's value slot currently holds.
pub struct ResolverHandle {
    resolver: Arc<dyn Resolver>,
    snapshot: ResolverSnapshot,
    fingerprint: u64,
    state: Arc<AsyncMutex<CacheState>>,
}

impl ResolverHandle {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        let snapshot = resolver.snapshot();
        let fingerprint = snapshot.fingerprint();
        ResolverHandle {
            resolver,
            snapshot,
            fingerprint,
            state: Arc::new(AsyncMutex::new(CacheState {
                last_update: None,
                loading: None,
            })),
        }
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn snapshot(&self) -> &ResolverSnapshot {
        &self.snapshot
    }

    pub fn read_only(&self) -> bool {
        self.resolver.read_only()
    }

    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.resolver
    }

    /// Shares the underlying resolver and its cache state with a new
    /// handle — used by `query::deepcopy`, which references resolvers
    /// rather than re-running them (`spec.md` §4.2).
    pub fn clone_handle(&self) -> ResolverHandle {
        ResolverHandle {
            resolver: self.resolver.clone(),
            snapshot: self.snapshot.clone(),
            fingerprint: self.fingerprint,
            state: self.state.clone(),
        }
    }

    /// `reset()`: clears `last_update`, marking the cache expired. Does not
    /// cancel an in-flight load (`spec.md` §4.5).
    pub async fn reset(&self) {
        self.state.lock().await.last_update = None;
    }

    pub async fn expired(&self) -> bool {
        let state = self.state.lock().await;
        is_expired(state.last_update, self.resolver.cache_time())
    }

    /// Drives the resolver to a value, honouring TTL and single-flight.
    /// `cached_value` is the node's current value slot, used as the cache
    /// when `read_only = false`.
    pub async fn resolve(
        &self,
        cached_value: Option<Value>,
        call_kwargs: &IndexMap<String, Value>,
    ) -> Result<ResolveOutcome, StoreError> {
        if self.resolver.read_only() {
            // No lock, no shared future: every call is independent.
            let value = self
                .resolver
                .load(call_kwargs)
                .await
                .map_err(|source| StoreError::ResolverFailure {
                    label: self.snapshot.class.clone(),
                    source,
                })?;
            return Ok(ResolveOutcome {
                value,
                write_back: false,
            });
        }

        // read_only = false: TTL cache lives in the node, single-flight via
        // the shared async lock + future.
        let fut = {
            let mut state = self.state.lock().await;
            if !is_expired(state.last_update, self.resolver.cache_time()) {
                if let Some(v) = cached_value {
                    return Ok(ResolveOutcome {
                        value: v,
                        write_back: false,
                    });
                }
            }
            if let Some(shared) = &state.loading {
                shared.clone()
            } else {
                let resolver = self.resolver.clone();
                let class = self.snapshot.class.clone();
                let state_for_completion = self.state.clone();
                let kwargs = IndexMap::new(); // call kwargs are rejected for read_only=false
                // Spawned so the load runs to completion even if the caller
                // that kicked it off is cancelled before ever polling the
                // shared future again (`spec.md` §5 "Cancellation").
                let join = tokio::spawn(async move {
                    let result = resolver.load(&kwargs).await.map_err(|source| {
                        StoreError::ResolverFailure {
                            label: class,
                            source,
                        }
                    });
                    if result.is_ok() {
                        let mut s = state_for_completion.lock().await;
                        s.last_update = Some(Instant::now());
                        s.loading = None;
                    } else {
                        let mut s = state_for_completion.lock().await;
                        s.loading = None;
                    }
                    result
                });
                let shared: Shared<BoxFuture<'static, Result<Value, StoreError>>> = async move {
                    match join.await {
                        Ok(result) => result,
                        Err(join_err) => Err(StoreError::ResolverFailure {
                            label: "<unknown>".to_string(),
                            source: Arc::new(std::io::Error::other(join_err.to_string())),
                        }),
                    }
                }
                .boxed()
                .shared();
                state.loading = Some(shared.clone());
                shared
            }
        };
        let value = fut.await?;
        Ok(ResolveOutcome {
            value,
            write_back: true,
        })
    }
}

impl std::fmt::Debug for ResolverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverHandle")
            .field("class", &self.snapshot.class)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

pub struct ResolveOutcome {
    pub value: Value,
    /// Whether the engine should write `value` into the node's value slot
    /// (true for `read_only = false`).
    pub write_back: bool,
}

fn is_expired(last_update: Option<Instant>, cache_time: CacheTime) -> bool {
    match (last_update, cache_time) {
        (_, CacheTime::AlwaysExpired) => true,
        (None, _) => true,
        (Some(_), CacheTime::Indefinite) => false,
        (Some(t), CacheTime::Seconds(secs)) => t.elapsed() >= Duration::from_secs(secs),
    }
}

/// Drives either a sync or async call site through the same `load()`
/// future, per the duality helper in `spec.md` §9: "Do not expose two
/// methods; the duality is how the core is used, not how it is defined."
pub fn resolve_sync<F, T>(fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => tokio::task::block_in_place(|| handle.block_on(fut)),
        Err(_) => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to start a transient executor for a synchronous resolver call")
            .block_on(fut),
    }
}

/// A resolver wrapping a user-supplied closure, the "callback resolver"
/// mentioned as an external collaborator in `spec.md` §4.5 — kept here
/// (rather than left fully abstract) because it is exactly what this
/// crate's own resolver tests need, and costs nothing beyond the trait
/// itself.
pub struct CallbackResolver<F> {
    class: String,
    read_only: bool,
    cache_time: CacheTime,
    f: F,
}

impl<F> CallbackResolver<F> {
    pub fn new(class: impl Into<String>, read_only: bool, cache_time: CacheTime, f: F) -> Self {
        CallbackResolver {
            class: class.into(),
            read_only,
            cache_time,
            f,
        }
    }
}

impl<F> std::fmt::Debug for CallbackResolver<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackResolver")
            .field("class", &self.class)
            .finish()
    }
}

#[async_trait]
impl<F> Resolver for CallbackResolver<F>
where
    F: Fn() -> Result<Value, Arc<dyn std::error::Error + Send + Sync>> + Send + Sync,
{
    fn snapshot(&self) -> ResolverSnapshot {
        ResolverSnapshot {
            module: "reactive_store::resolver".to_string(),
            class: self.class.clone(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
        }
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    fn cache_time(&self) -> CacheTime {
        self.cache_time
    }

    async fn load(
        &self,
        _call_kwargs: &IndexMap<String, Value>,
    ) -> Result<Value, Arc<dyn std::error::Error + Send + Sync>> {
        (self.f)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    #[tokio::test]
    async fn read_only_resolver_invokes_load_every_time() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_cb = calls.clone();
        let resolver = Arc::new(CallbackResolver::new(
            "counter",
            true,
            CacheTime::AlwaysExpired,
            move || {
                calls_for_cb.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(Value::Int(calls_for_cb.load(AtomicOrdering::SeqCst) as i64))
            },
        ));
        let handle = ResolverHandle::new(resolver);
        handle.resolve(None, &IndexMap::new()).await.unwrap();
        handle.resolve(None, &IndexMap::new()).await.unwrap();
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cached_resolver_single_flights_concurrent_callers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_cb = calls.clone();
        let resolver = Arc::new(CallbackResolver::new(
            "slow",
            false,
            CacheTime::Indefinite,
            move || {
                calls_for_cb.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(Value::Int(42))
            },
        ));
        let handle = Arc::new(ResolverHandle::new(resolver));
        let mut joins = Vec::new();
        for _ in 0..8 {
            let handle = handle.clone();
            joins.push(tokio::spawn(async move {
                handle.resolve(None, &IndexMap::new()).await.unwrap()
            }));
        }
        for j in joins {
            let outcome = j.await.unwrap();
            assert_eq!(outcome.value, Value::Int(42));
        }
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_expires_after_ttl() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_cb = calls.clone();
        let resolver = Arc::new(CallbackResolver::new(
            "ttl",
            false,
            CacheTime::Seconds(0),
            move || {
                calls_for_cb.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(Value::Int(1))
            },
        ));
        let handle = ResolverHandle::new(resolver);
        handle.resolve(None, &IndexMap::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        handle.resolve(Some(Value::Int(1)), &IndexMap::new()).await.unwrap();
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[test]
    fn cache_time_from_seconds_maps_sentinels() {
        assert_eq!(CacheTime::from_seconds(0), CacheTime::AlwaysExpired);
        assert_eq!(CacheTime::from_seconds(-1), CacheTime::Indefinite);
        assert_eq!(CacheTime::from_seconds(30), CacheTime::Seconds(30));
    }
}
