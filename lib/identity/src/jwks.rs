//! Signing key cache, one entry per policy.
//!
//! Concurrent readers share the cached key set. When a key set is missing or a
//! token names a key ID the set does not contain, one refresh runs per policy;
//! callers arriving while it is in flight await the same fetch. A key ID miss
//! refetches at most once per [`MIN_REFRESH_INTERVAL`]. A failed fetch leaves
//! the previous key set in place.

use crate::error::TokenError;
use crate::policy::{Policy, PolicyName};
use futures::future::{BoxFuture, FutureExt, Shared};
use jsonwebtoken::jwk::{Jwk, JwkSet};
use rootcause::prelude::Report;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Timeout for a single key set fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum time between key set fetches triggered by an unknown key ID.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

type KeyFetch = Shared<BoxFuture<'static, Result<Arc<JwkSet>, String>>>;

#[derive(Default)]
struct Slot {
    keys: Option<Arc<JwkSet>>,
    fetched_at: Option<Instant>,
    in_flight: Option<(u64, KeyFetch)>,
}

/// Shared cache of provider signing keys.
#[derive(Clone)]
pub struct KeyCache {
    slots: Arc<Mutex<HashMap<PolicyName, Slot>>>,
    tickets: Arc<AtomicU64>,
    http: reqwest::Client,
    min_refresh_interval: Duration,
}

impl KeyCache {
    /// Creates a cache that fetches with `http`.
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            tickets: Arc::new(AtomicU64::new(0)),
            http,
            min_refresh_interval: MIN_REFRESH_INTERVAL,
        }
    }

    /// Overrides [`MIN_REFRESH_INTERVAL`].
    #[must_use]
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Returns the cached key set for `policy`, fetching it on first use.
    pub async fn key_set(&self, policy: &Policy) -> Result<Arc<JwkSet>, Report<TokenError>> {
        {
            let slots = self.slots.lock().await;
            if let Some(keys) = slots.get(&policy.name()).and_then(|s| s.keys.clone()) {
                return Ok(keys);
            }
        }
        self.refresh(policy).await
    }

    /// Finds the key a token was signed with.
    ///
    /// A token without `kid` is accepted only when the set holds a single key.
    /// A miss triggers one refresh before giving up, unless the key set was
    /// fetched within the minimum refresh interval.
    pub async fn signing_key(
        &self,
        policy: &Policy,
        kid: Option<&str>,
    ) -> Result<Jwk, Report<TokenError>> {
        let keys = self.key_set(policy).await?;
        if let Some(jwk) = select_key(&keys, kid) {
            return Ok(jwk.clone());
        }

        if self.fetched_recently(policy.name()).await {
            debug!(policy = %policy.name(), kid = ?kid, "signing key not cached, key set is fresh");
            return Err(no_matching_key(kid).into());
        }

        info!(policy = %policy.name(), kid = ?kid, "signing key not cached, refreshing key set");
        let keys = self.refresh(policy).await?;
        select_key(&keys, kid)
            .cloned()
            .ok_or_else(|| no_matching_key(kid).into())
    }

    async fn fetched_recently(&self, name: PolicyName) -> bool {
        let slots = self.slots.lock().await;
        slots
            .get(&name)
            .and_then(|slot| slot.fetched_at)
            .is_some_and(|at| at.elapsed() < self.min_refresh_interval)
    }

    /// Fetches the key set again, joining a fetch already in flight.
    pub async fn refresh(&self, policy: &Policy) -> Result<Arc<JwkSet>, Report<TokenError>> {
        let name = policy.name();
        let (ticket, fetch) = {
            let mut slots = self.slots.lock().await;
            let slot = slots.entry(name).or_default();
            match &slot.in_flight {
                Some((ticket, fetch)) => {
                    debug!(policy = %name, "joining in-flight key fetch");
                    (*ticket, fetch.clone())
                }
                None => {
                    let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
                    let fetch = fetch_key_set(
                        self.http.clone(),
                        name,
                        policy.endpoints().jwks_uri().to_string(),
                    )
                    .boxed()
                    .shared();
                    slot.in_flight = Some((ticket, fetch.clone()));
                    (ticket, fetch)
                }
            }
        };

        let result = fetch.await;

        let mut slots = self.slots.lock().await;
        let slot = slots.entry(name).or_default();
        if slot.in_flight.as_ref().is_some_and(|(t, _)| *t == ticket) {
            slot.in_flight = None;
        }
        match result {
            Ok(keys) => {
                slot.keys = Some(keys.clone());
                slot.fetched_at = Some(Instant::now());
                Ok(keys)
            }
            Err(reason) => Err(TokenError::KeyResolution {
                policy: name,
                reason,
            }
            .into()),
        }
    }
}

fn no_matching_key(kid: Option<&str>) -> TokenError {
    TokenError::Signature {
        reason: format!("no signing key matches kid '{}'", kid.unwrap_or("<none>")),
    }
}

fn select_key<'a>(keys: &'a JwkSet, kid: Option<&str>) -> Option<&'a Jwk> {
    match kid {
        Some(kid) => keys.find(kid),
        None if keys.keys.len() == 1 => keys.keys.first(),
        None => None,
    }
}

#[instrument(skip(http))]
async fn fetch_key_set(
    http: reqwest::Client,
    policy: PolicyName,
    jwks_uri: String,
) -> Result<Arc<JwkSet>, String> {
    let response = http
        .get(&jwks_uri)
        .send()
        .await
        .map_err(|e| format!("HTTP error: {e}"))?;

    if !response.status().is_success() {
        return Err(format!("HTTP status {}", response.status()));
    }

    let keys: JwkSet = response
        .json()
        .await
        .map_err(|e| format!("unparsable key set: {e}"))?;

    if keys.keys.is_empty() {
        warn!("provider returned an empty key set");
    }
    info!(key_count = keys.keys.len(), "signing keys cached");

    Ok(Arc::new(keys))
}
