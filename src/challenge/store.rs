//! In-memory challenge table with a background sweeper

use super::address::canonicalize;
use super::ChallengeError;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;

/// Raw challenge size (256 bits)
pub const CHALLENGE_BYTES: usize = 32;

/// An issued challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Hex-encoded random value
    pub value: String,
    pub expires_at: DateTime<Utc>,
    /// Canonical caller IP this challenge is bound to
    pub bound_address: String,
}

impl Challenge {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Raw challenge bytes, as embedded in a quote's extra data
    pub fn raw(&self) -> Option<Vec<u8>> {
        hex::decode(&self.value).ok()
    }
}

/// Issues and consumes challenges
pub struct ChallengeStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, Challenge>>,
}

impl ChallengeStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a fresh challenge bound to `caller`
    pub async fn issue(&self, caller: &str) -> Result<Challenge, ChallengeError> {
        self.issue_at(caller, Utc::now()).await
    }

    pub(crate) async fn issue_at(
        &self,
        caller: &str,
        now: DateTime<Utc>,
    ) -> Result<Challenge, ChallengeError> {
        let bound_address = canonicalize(caller)?;

        let mut raw = [0u8; CHALLENGE_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut raw);

        let challenge = Challenge {
            value: hex::encode(raw),
            expires_at: now + self.ttl,
            bound_address,
        };

        self.entries
            .lock()
            .await
            .insert(challenge.value.clone(), challenge.clone());

        debug!(
            "Issued challenge {}.. for {} (expires {})",
            short(&challenge.value),
            challenge.bound_address,
            challenge.expires_at
        );

        Ok(challenge)
    }

    /// Consume `value` on behalf of `caller`. Succeeds at most once per value.
    pub async fn consume(&self, caller: &str, value: &str) -> Result<Challenge, ChallengeError> {
        self.consume_at(caller, value, Utc::now()).await
    }

    pub(crate) async fn consume_at(
        &self,
        caller: &str,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<Challenge, ChallengeError> {
        let caller = canonicalize(caller)?;

        let mut entries = self.entries.lock().await;
        let entry = entries.get(value).ok_or(ChallengeError::NotFound)?;

        if entry.is_expired_at(now) {
            entries.remove(value);
            warn!("Rejected expired challenge {}.. from {}", short(value), caller);
            return Err(ChallengeError::Expired);
        }

        // A mismatched caller must not burn the legitimate owner's challenge.
        if entry.bound_address != caller {
            warn!(
                "Rejected challenge {}.. from {}: bound to {}",
                short(value),
                caller,
                entry.bound_address
            );
            return Err(ChallengeError::AddressMismatch);
        }

        let challenge = entries.remove(value).ok_or(ChallengeError::NotFound)?;
        drop(entries);

        debug!("Consumed challenge {}.. for {}", short(value), caller);
        Ok(challenge)
    }

    /// Drop every expired entry, returning how many were removed
    pub async fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now()).await
    }

    pub(crate) async fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, c| !c.is_expired_at(now));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Spawn the periodic sweep. The task exits once the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: std::time::Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = time::interval(every);
            loop {
                interval.tick().await;
                let Some(store) = store.upgrade() else {
                    debug!("Challenge store dropped, sweeper exiting");
                    break;
                };
                let removed = store.sweep_expired().await;
                if removed > 0 {
                    info!("Swept {} expired challenges", removed);
                }
            }
        })
    }
}

fn short(value: &str) -> &str {
    &value[..8.min(value.len())]
}
