//! Routing seam: maps effective partition keys to partition key ranges.
//!
//! A container's hash space is divided into contiguous ranges, each served by
//! one physical partition. When a partition splits, the old range id becomes
//! invalid and the client must re-resolve with a refreshed routing map.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use docdb_core::{DocDbError, EffectivePartitionKey, Result};
use tokio::sync::RwLock;

/// Identifier of a partition key range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKeyRangeId(String);

impl PartitionKeyRangeId {
    /// Creates a range id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKeyRangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionKeyRangeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Resolves effective partition keys to range ids.
#[async_trait]
pub trait RoutingResolver: Send + Sync {
    /// Returns the range owning `epk`.
    ///
    /// With `force_refresh` the resolver must bypass any cached routing map.
    async fn resolve(
        &self,
        epk: &EffectivePartitionKey,
        force_refresh: bool,
    ) -> Result<PartitionKeyRangeId>;
}

/// A contiguous slice `[min, max]` of the effective partition key space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionKeyRange {
    /// Range id.
    pub id: PartitionKeyRangeId,
    /// Inclusive lower bound.
    pub min: EffectivePartitionKey,
    /// Inclusive upper bound.
    pub max: EffectivePartitionKey,
}

impl PartitionKeyRange {
    /// Creates a range.
    pub fn new(id: impl Into<String>, min: u32, max: u32) -> Self {
        Self {
            id: PartitionKeyRangeId::new(id),
            min: EffectivePartitionKey::from_u32(min),
            max: EffectivePartitionKey::from_u32(max),
        }
    }

    fn contains(&self, epk: &EffectivePartitionKey) -> bool {
        self.min <= *epk && *epk <= self.max
    }
}

/// In-memory resolver over a fixed range table.
///
/// The table served to non-refreshing lookups is a cached copy. Replacing
/// the ranges only becomes visible to a lookup with `force_refresh`, which
/// mirrors how a stale routing cache behaves after a split.
#[derive(Debug)]
pub struct StaticRangeResolver {
    current: RwLock<Vec<PartitionKeyRange>>,
    cached: RwLock<Vec<PartitionKeyRange>>,
    resolve_count: AtomicU64,
    refresh_count: AtomicU64,
}

impl StaticRangeResolver {
    /// Creates a resolver over `ranges`.
    pub fn new(ranges: Vec<PartitionKeyRange>) -> Self {
        Self {
            current: RwLock::new(ranges.clone()),
            cached: RwLock::new(ranges),
            resolve_count: AtomicU64::new(0),
            refresh_count: AtomicU64::new(0),
        }
    }

    /// Creates a resolver with one range (`"0"`) covering the whole key space.
    pub fn single() -> Self {
        Self::new(vec![PartitionKeyRange::new("0", 0, u32::MAX)])
    }

    /// Creates a resolver with `count` equally sized ranges named `"0".."count-1"`.
    pub fn uniform(count: u32) -> Self {
        let count = count.max(1);
        let width = (u32::MAX / count).max(1);
        let ranges = (0..count)
            .map(|i| {
                let min = i * width;
                let max = if i + 1 == count {
                    u32::MAX
                } else {
                    (i + 1) * width - 1
                };
                PartitionKeyRange::new(i.to_string(), min, max)
            })
            .collect();
        Self::new(ranges)
    }

    /// Replaces the authoritative range table.
    pub async fn replace_ranges(&self, ranges: Vec<PartitionKeyRange>) {
        *self.current.write().await = ranges;
    }

    /// Returns the number of resolve calls made.
    pub fn resolve_count(&self) -> u64 {
        self.resolve_count.load(Ordering::Relaxed)
    }

    /// Returns the number of resolve calls that forced a refresh.
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RoutingResolver for StaticRangeResolver {
    async fn resolve(
        &self,
        epk: &EffectivePartitionKey,
        force_refresh: bool,
    ) -> Result<PartitionKeyRangeId> {
        self.resolve_count.fetch_add(1, Ordering::Relaxed);
        if force_refresh {
            self.refresh_count.fetch_add(1, Ordering::Relaxed);
            let current = self.current.read().await.clone();
            *self.cached.write().await = current;
            tracing::debug!(epk = %epk, "Refreshed routing map");
        }

        self.cached
            .read()
            .await
            .iter()
            .find(|range| range.contains(epk))
            .map(|range| range.id.clone())
            .ok_or_else(|| {
                DocDbError::InvalidState(format!("no partition key range owns {epk}"))
            })
    }
}
