// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Endpoint cache kept in step with the instance set.

use super::channel::{Endpoint, Factory};
use super::ClientError;
use crate::net::InstanceAddress;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// The endpoints of one pool, in registry order.
pub type Pool<E> = Arc<Vec<Arc<E>>>;

/// What one reconciliation changed.
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Addresses whose endpoint was built and inserted.
    pub added: Vec<InstanceAddress>,
    /// Addresses whose endpoint was removed and closed.
    pub removed: Vec<InstanceAddress>,
    /// Construction failures; those addresses stay out of the pool.
    pub failed: Vec<ClientError>,
}

impl Reconciliation {
    /// Whether the pool changed.
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Per-instance endpoints produced by a [`Factory`].
///
/// Only [`EndpointCache::reconcile`] and [`EndpointCache::clear`] mutate the pool. A new pool
/// is published with a single pointer swap, so readers observe either the old or the new one.
/// Once cleared, the cache stays empty.
pub struct EndpointCache<F: Factory> {
    factory: F,
    pool: RwLock<Pool<F::Endpoint>>,
    reconciling: Mutex<()>,
    closed: AtomicBool,
}

impl<F: Factory> EndpointCache<F> {
    /// Creates an empty cache.
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            pool: RwLock::new(Arc::new(Vec::new())),
            reconciling: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// The current pool. Never blocks on reconciliation.
    pub fn snapshot(&self) -> Pool<F::Endpoint> {
        match self.pool.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Addresses currently in the pool.
    pub fn addresses(&self) -> Vec<InstanceAddress> {
        self.snapshot().iter().map(|e| e.address().clone()).collect()
    }

    /// Number of endpoints in the pool.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Whether [`EndpointCache::clear`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn write_pool(&self) -> RwLockWriteGuard<'_, Pool<F::Endpoint>> {
        match self.pool.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Swaps in `pool` unless the cache was cleared meanwhile; then hands it back.
    fn publish(&self, pool: Vec<Arc<F::Endpoint>>) -> Result<(), Vec<Arc<F::Endpoint>>> {
        // Checked under the write lock: `clear` raises the flag before taking it.
        let mut guard = self.write_pool();
        if self.is_closed() {
            return Err(pool);
        }
        *guard = Arc::new(pool);
        Ok(())
    }

    /// Converges the pool to exactly the addresses in `next`.
    ///
    /// Endpoints are built for new addresses only, concurrently; endpoints whose address
    /// disappeared are removed and closed. Running it twice with the same input is a no-op.
    pub async fn reconcile(&self, next: &[InstanceAddress]) -> Reconciliation {
        let _guard = self.reconciling.lock().await;
        if self.is_closed() {
            return Reconciliation::default();
        }
        let current = self.snapshot();
        let mut kept: HashMap<InstanceAddress, Arc<F::Endpoint>> = current.iter().map(|e| (e.address().clone(), e.clone())).collect();

        let mut seen = HashSet::with_capacity(next.len());
        let to_build: Vec<&InstanceAddress> = next.iter().filter(|a| !kept.contains_key(*a) && seen.insert(*a)).collect();
        let built = join_all(to_build.into_iter().map(|address| async move { (address, self.factory.make(address).await) })).await;

        let mut report = Reconciliation::default();
        let mut fresh = HashMap::with_capacity(built.len());
        for (address, result) in built {
            match result {
                Ok(endpoint) => {
                    report.added.push(address.clone());
                    fresh.insert(address.clone(), Arc::new(endpoint));
                },
                Err(err) => {
                    warn!("[TRACKMESH] endpoint construction failed, {address} left out of the pool: {err}");
                    report.failed.push(err);
                },
            }
        }

        let pool: Vec<Arc<F::Endpoint>> = next.iter().filter_map(|a| kept.remove(a).or_else(|| fresh.remove(a))).collect();
        if !report.added.is_empty() || !kept.is_empty() {
            if let Err(pool) = self.publish(pool) {
                // Cleared while building: `clear` closed the old pool, the new endpoints are ours.
                pool.iter().filter(|e| report.added.contains(e.address())).for_each(|e| e.close());
                debug!("[TRACKMESH] cache cleared during reconciliation, {} new endpoint(s) closed", report.added.len());
                return Reconciliation {
                    failed: report.failed,
                    ..Default::default()
                };
            }
        }
        // Whatever is still in `kept` has left the registry.
        for (address, endpoint) in kept {
            endpoint.close();
            report.removed.push(address);
        }
        if report.changed() {
            debug!("[TRACKMESH] pool reconciled: +{:?} -{:?}", report.added, report.removed);
        }
        report
    }

    /// Removes and closes every endpoint, and keeps the cache empty from then on.
    /// Returns how many were released.
    ///
    /// A reconciliation still building endpoints closes them instead of publishing.
    pub fn clear(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let old = std::mem::replace(&mut *self.write_pool(), Arc::new(Vec::new()));
        old.iter().for_each(|e| e.close());
        old.len()
    }
}
