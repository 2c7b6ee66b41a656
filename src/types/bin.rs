//! The BIN-lookup resolver contract: an injected collaborator that maps a
//! card's leading digits to issuer/brand metadata.
//!
//! The core never implements the lookup itself; it only depends on this
//! trait, memoizing results in-process since a BIN's metadata never changes
//! once looked up.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What a BIN lookup returns about a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinInfo {
    pub bin: u64,
    pub bank: Option<String>,
    /// The issuing bank's [`crate::types::terminal::BankCode`] tag, when the
    /// issuer is one this system also acquires for (drives on-us routing).
    pub bank_code: Option<String>,
    pub brand: Option<String>,
    pub card_type: Option<String>,
    pub card_family: Option<String>,
    pub country: Option<String>,
}

/// A pluggable BIN→metadata resolver.
///
/// Implementations typically call an upstream HTTP service; this crate
/// treats the upstream as an external collaborator and only depends on this
/// trait plus the memoizing wrapper below.
#[async_trait]
pub trait BinResolver: Send + Sync {
    async fn resolve(&self, bin: u64) -> Result<Option<BinInfo>>;
}

/// Wraps a [`BinResolver`] with an in-process cache.
///
/// BIN metadata is immutable once looked up, so entries are never
/// invalidated; the cache is safe under concurrent read/write because it's
/// guarded by a single [`RwLock`] and keys are plain integers.
pub struct MemoizingBinResolver<R: BinResolver> {
    inner: R,
    cache: RwLock<HashMap<u64, Option<BinInfo>>>,
}

impl<R: BinResolver> MemoizingBinResolver<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<R: BinResolver> BinResolver for MemoizingBinResolver<R> {
    async fn resolve(&self, bin: u64) -> Result<Option<BinInfo>> {
        if let Some(cached) = self.cache.read().expect("bin cache lock poisoned").get(&bin) {
            return Ok(cached.clone());
        }
        let resolved = self.inner.resolve(bin).await?;
        self.cache
            .write()
            .expect("bin cache lock poisoned")
            .insert(bin, resolved.clone());
        Ok(resolved)
    }
}

/// A resolver that never finds anything, useful for tests and for
/// deployments without a configured `BIN_API_URL`.
pub struct NullBinResolver;

#[async_trait]
impl BinResolver for NullBinResolver {
    async fn resolve(&self, _bin: u64) -> Result<Option<BinInfo>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BinResolver for CountingResolver {
        async fn resolve(&self, bin: u64) -> Result<Option<BinInfo>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(BinInfo {
                bin,
                bank: Some("Garanti BBVA".into()),
                bank_code: Some("garanti".into()),
                brand: Some("VISA".into()),
                card_type: Some("CREDIT".into()),
                card_family: Some("Bonus".into()),
                country: Some("TR".into()),
            }))
        }
    }

    #[tokio::test]
    async fn memoizes_after_first_resolve() {
        let resolver = MemoizingBinResolver::new(CountingResolver { calls: AtomicUsize::new(0) });
        let first = resolver.resolve(42822090).await.unwrap();
        let second = resolver.resolve(42822090).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(resolver.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_bins_both_resolve() {
        let resolver = MemoizingBinResolver::new(CountingResolver { calls: AtomicUsize::new(0) });
        resolver.resolve(42822090).await.unwrap();
        resolver.resolve(55287900).await.unwrap();
        assert_eq!(resolver.inner.calls.load(Ordering::SeqCst), 2);
    }
}
