// Modifications Copyright Andeya Lee 2024
// Based on original source code from Volo Contributors licensed under MIT OR Apache-2.0
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Service discovery: registry adapters and the live instance set they feed.

use super::ClientError;
use crate::component::ServiceDescriptor;
use crate::net::InstanceAddress;
use async_broadcast::Receiver;
pub use consul::{ConsulConfig, ConsulDiscover};
use faststr::FastStr;
pub use fixed::FixedDiscover;
pub use memory::MemoryDiscover;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

pub mod consul;
mod fixed;
mod memory;

/// [`Discover`] is the most basic trait for Discover.
pub trait Discover: Send + Sync + 'static {
    /// `discover` returns the instances the registry currently reports for the service.
    fn discover<'s>(&'s self, descriptor: &'s ServiceDescriptor) -> impl Future<Output = Result<Vec<Arc<Instance>>, ClientError>> + Send;
    /// `watch` should return a [`async_broadcast::Receiver`] which can be used to subscribe [`Discovery`].
    ///
    /// `None` means the registry never changes.
    fn watch(&self, descriptor: &ServiceDescriptor) -> Option<Receiver<Discovery>>;
}

/// [`Instance`] contains information of an instance from the target service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// service address
    pub address: InstanceAddress,
    /// tags the instance was registered with
    pub tags: HashSet<FastStr>,
    /// whether the last reported health check passed
    pub healthy: bool,
}

impl Instance {
    /// Creates a healthy, untagged instance.
    pub fn new(address: impl Into<InstanceAddress>) -> Self {
        Self {
            address: address.into(),
            tags: HashSet::new(),
            healthy: true,
        }
    }

    /// Adds a tag.
    pub fn with_tag(mut self, tag: impl Into<FastStr>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Sets the health state.
    pub fn with_healthy(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }

    /// Whether this instance belongs to the pool described by `descriptor`.
    pub fn matches(&self, descriptor: &ServiceDescriptor) -> bool {
        (!descriptor.healthy_only || self.healthy) && descriptor.tags.iter().all(|tag| self.tags.contains(tag))
    }
}

/// Discovery indicates the change of the service discover.
#[derive(Debug, Clone)]
pub struct Discovery {
    /// Descriptor key.
    pub key: FastStr,
    /// What the registry reported.
    pub state: RegistryState,
}

/// The registry's latest report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryState {
    /// The registry answered with this instance list.
    Available(Vec<Arc<Instance>>),
    /// The registry could not be reached; the last snapshot stays in use.
    Unavailable(FastStr),
}

/// A live, eventually consistent view of the addresses matching one [`ServiceDescriptor`].
#[derive(Debug)]
pub struct InstanceSet {
    descriptor: ServiceDescriptor,
    snapshot: RwLock<Arc<Vec<InstanceAddress>>>,
    available: AtomicBool,
}

impl InstanceSet {
    /// Creates an empty set for `descriptor`.
    pub fn new(descriptor: ServiceDescriptor) -> Self {
        Self {
            descriptor,
            snapshot: RwLock::new(Arc::new(Vec::new())),
            available: AtomicBool::new(true),
        }
    }

    /// The descriptor this set filters by.
    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Latest known snapshot, in registry order. Never blocks on the registry.
    pub fn instances(&self) -> Arc<Vec<InstanceAddress>> {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Whether the last registry interaction succeeded.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Applies a registry report.
    ///
    /// Returns the new snapshot when the filtered address list changed.
    pub fn apply(&self, state: RegistryState) -> Option<Arc<Vec<InstanceAddress>>> {
        match state {
            RegistryState::Available(instances) => {
                self.available.store(true, Ordering::Release);
                self.replace(&instances)
            },
            RegistryState::Unavailable(_) => {
                self.available.store(false, Ordering::Release);
                None
            },
        }
    }

    /// Replaces the snapshot with the matching subset of `instances`.
    ///
    /// Duplicated addresses keep their first position.
    pub fn replace(&self, instances: &[Arc<Instance>]) -> Option<Arc<Vec<InstanceAddress>>> {
        let mut seen = HashSet::with_capacity(instances.len());
        let next: Vec<InstanceAddress> = instances
            .iter()
            .filter(|i| i.matches(&self.descriptor))
            .filter(|i| seen.insert(i.address.clone()))
            .map(|i| i.address.clone())
            .collect();
        let mut guard = match self.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if **guard == next {
            return None;
        }
        let next = Arc::new(next);
        *guard = next.clone();
        Some(next)
    }
}
