// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Resilient invoker: discovery, endpoint cache, load balance and retry composed.

use super::balance::{LoadBalance, RoundRobin};
use super::cache::EndpointCache;
use super::channel::{Endpoint, Factory};
use super::discover::{Discover, Discovery, InstanceSet, RegistryState};
use super::retry::{Retry, RetryPolicy};
use super::ClientError;
use crate::component::ServiceDescriptor;
use crate::net::InstanceAddress;
use async_broadcast::{Receiver, RecvError};
use futures_util::{select, FutureExt};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, trace, warn};

type Req<F> = <<F as Factory>::Endpoint as Endpoint>::Req;
type Resp<F> = <<F as Factory>::Endpoint as Endpoint>::Resp;

/// A resilient invoker config.
#[non_exhaustive]
pub struct Builder<D, F, LB = RoundRobin>
where
    D: Discover,
    F: Factory,
    LB: LoadBalance<F::Endpoint>,
{
    /// Which pool of the service to call.
    pub(crate) descriptor: ServiceDescriptor,
    /// discover instance.
    pub(crate) discover: D,
    /// endpoint factory.
    pub(crate) factory: F,
    /// load balance instance.
    pub(crate) load_balance: LB,
    /// Settings that bound the retries of one call.
    pub(crate) retry_policy: RetryPolicy,
}

impl<D, F> Builder<D, F, RoundRobin>
where
    D: Discover,
    F: Factory,
{
    /// Create a builder that balances round-robin with the default retry policy.
    pub fn new(descriptor: ServiceDescriptor, discover: D, factory: F) -> Self {
        Self {
            descriptor,
            discover,
            factory,
            load_balance: RoundRobin::new(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl<D, F, LB> Builder<D, F, LB>
where
    D: Discover,
    F: Factory,
    LB: LoadBalance<F::Endpoint>,
{
    /// Set the load balance policy.
    pub fn with_load_balance<LB2: LoadBalance<F::Endpoint>>(self, load_balance: LB2) -> Builder<D, F, LB2> {
        Builder {
            descriptor: self.descriptor,
            discover: self.discover,
            factory: self.factory,
            load_balance,
            retry_policy: self.retry_policy,
        }
    }
    /// Set the retry policy.
    /// Default is 3 attempts within 500ms.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }
    /// Discover the initial instances, build their endpoints and start following the registry.
    ///
    /// Fails when the initial discovery fails. Endpoint construction failures are only logged.
    pub async fn try_spawn(self) -> Result<ResilientInvoker<F, LB>, ClientError> {
        let Builder {
            descriptor,
            discover,
            factory,
            load_balance,
            retry_policy,
        } = self;
        // Subscribe first so no change between the initial query and the watch is missed.
        let recv_change = discover.watch(&descriptor);
        let instances = discover.discover(&descriptor).await.map_err(|err| match err {
            err @ ClientError::Discover(_) => err,
            err => ClientError::Discover(err.to_string().into()),
        })?;

        let shared = Arc::new(Shared {
            instances: InstanceSet::new(descriptor),
            cache: EndpointCache::new(factory),
            load_balance,
            retry: Retry::new(retry_policy),
        });
        shared.instances.replace(&instances);
        let report = shared.cache.reconcile(&shared.instances.instances()).await;
        info!(
            "[TRACKMESH] invoker for {} started with {} endpoint(s), {} failed",
            shared.instances.descriptor().key(),
            shared.cache.len(),
            report.failed.len()
        );

        let notify = Arc::new(Notify::new());
        if let Some(recv_change) = recv_change {
            tokio::spawn(follow(shared.clone(), notify.clone(), recv_change));
        }
        Ok(ResilientInvoker {
            shared,
            notify,
            closed: AtomicBool::new(false),
        })
    }
}

/// Applies registry changes to the instance set and the endpoint cache until notified.
async fn follow<F, LB>(shared: Arc<Shared<F, LB>>, notify: Arc<Notify>, mut recv_change: Receiver<Discovery>)
where
    F: Factory,
    LB: LoadBalance<F::Endpoint>,
{
    let key = shared.instances.descriptor().key();
    loop {
        select! {
            _ = notify.notified().fuse() => {
                trace!("[TRACKMESH] stop following {key}");
                return;
            },
            discovery = recv_change.recv().fuse() => match discovery {
                Ok(Discovery { state, .. }) => {
                    if let RegistryState::Unavailable(reason) = &state {
                        warn!("[TRACKMESH] registry unavailable for {key}, keeping the last snapshot: {reason}");
                    }
                    if let Some(snapshot) = shared.instances.apply(state) {
                        shared.cache.reconcile(&snapshot).await;
                    }
                },
                Err(RecvError::Overflowed(missed)) => warn!("[TRACKMESH] discovering subscription of {key} skipped {missed} change(s)"),
                Err(RecvError::Closed) => {
                    debug!("[TRACKMESH] discovering subscription of {key} closed");
                    return;
                },
            },
        }
    }
}

struct Shared<F: Factory, LB> {
    instances: InstanceSet,
    cache: EndpointCache<F>,
    load_balance: LB,
    retry: Retry,
}

/// Calls one remote operation on a live pool of instances.
///
/// The pool follows the registry in the background. Every call picks an endpoint with the
/// load balance policy and is retried per the [`RetryPolicy`]. Dropping the invoker stops
/// following the registry and closes every endpoint.
pub struct ResilientInvoker<F: Factory, LB = RoundRobin> {
    shared: Arc<Shared<F, LB>>,
    notify: Arc<Notify>,
    closed: AtomicBool,
}

impl<F, LB> ResilientInvoker<F, LB>
where
    F: Factory,
    LB: LoadBalance<F::Endpoint>,
{
    /// Calls the operation with `request`.
    ///
    /// Errors with [`ClientError::RetriesExhausted`] carrying the last cause once every
    /// attempt failed or the budget ran out.
    pub async fn call(&self, request: Req<F>) -> Result<Resp<F>, ClientError>
    where
        Req<F>: Clone,
    {
        let shared = &self.shared;
        shared.retry.call(|| shared.load_balance.pick(shared.cache.snapshot().as_slice()), request).await
    }

    /// The descriptor of the called pool.
    pub fn descriptor(&self) -> &ServiceDescriptor {
        self.shared.instances.descriptor()
    }

    /// The retry policy in use.
    pub fn retry_policy(&self) -> &RetryPolicy {
        self.shared.retry.policy()
    }

    /// Latest instance snapshot reported by the registry.
    pub fn instances(&self) -> Arc<Vec<InstanceAddress>> {
        self.shared.instances.instances()
    }

    /// Addresses that currently have an endpoint.
    pub fn endpoints(&self) -> Vec<InstanceAddress> {
        self.shared.cache.addresses()
    }

    /// Whether the registry answered the last query.
    pub fn registry_available(&self) -> bool {
        self.shared.instances.is_available()
    }

    /// Stops following the registry and closes every endpoint. Later calls fail with
    /// [`ClientError::NoEndpoints`] as last cause.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // A stored permit also stops a follower that is busy reconciling.
        self.notify.notify_one();
        let released = self.shared.cache.clear();
        debug!("[TRACKMESH] invoker for {} shut down, {released} endpoint(s) closed", self.descriptor().key());
    }
}

impl<F: Factory, LB> fmt::Debug for ResilientInvoker<F, LB> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientInvoker")
            .field("descriptor", self.shared.instances.descriptor())
            .field("endpoints", &self.shared.cache.addresses())
            .field("retry_policy", self.shared.retry.policy())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl<F: Factory, LB> Drop for ResilientInvoker<F, LB> {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
            self.shared.cache.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Builder;
    use crate::client::balance::RandomBalance;
    use crate::client::cache::tests::{addrs, EchoFactory, SLOW_MAKE};
    use crate::client::discover::{FixedDiscover, Instance, MemoryDiscover};
    use crate::client::retry::RetryPolicy;
    use crate::client::ClientError;
    use crate::component::ServiceDescriptor;
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use std::time::Duration;

    fn descriptor() -> ServiceDescriptor {
        ServiceDescriptor::new("trackerapi").with_tag("prod")
    }

    fn prod(address: &'static str) -> Arc<Instance> {
        Arc::new(Instance::new(address).with_tag("prod"))
    }

    async fn eventually(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_round_robin_over_discovered_pool() {
        let registry = MemoryDiscover::new("trackerapi");
        registry.publish(vec![prod("a:1"), prod("b:1"), Arc::new(Instance::new("c:1"))]);
        let invoker = Builder::new(descriptor(), registry, EchoFactory::default())
            .with_retry_policy(RetryPolicy::new(1, Duration::from_secs(1)))
            .try_spawn()
            .await
            .unwrap();

        assert_eq!(*invoker.instances(), addrs(&["a:1", "b:1"]));
        let mut replies = Vec::new();
        for _ in 0..3 {
            replies.push(invoker.call("watched".to_string()).await.unwrap());
        }
        assert_eq!(replies, vec!["a:1:watched", "b:1:watched", "a:1:watched"]);
    }

    #[tokio::test]
    async fn test_pool_follows_registry() {
        let registry = MemoryDiscover::new("trackerapi");
        registry.publish(vec![prod("a:1"), prod("b:1")]);
        let factory = EchoFactory::default();
        let ledger = factory.ledger.clone();
        let invoker = Builder::new(descriptor(), registry.clone(), factory).try_spawn().await.unwrap();

        registry.publish(vec![prod("b:1")]);
        eventually(|| invoker.endpoints() == addrs(&["b:1"])).await;
        for _ in 0..4 {
            assert_eq!(invoker.call("x".to_string()).await.unwrap(), "b:1:x");
        }
        assert_eq!(*ledger.closed.lock().unwrap(), vec!["a:1"]);

        registry.publish(vec![prod("b:1"), prod("c:1")]);
        eventually(|| invoker.endpoints() == addrs(&["b:1", "c:1"])).await;
        assert_eq!(*ledger.made.lock().unwrap(), vec!["a:1", "b:1", "c:1"]);
    }

    #[tokio::test]
    async fn test_empty_pool_then_recovers() {
        let registry = MemoryDiscover::new("trackerapi");
        let invoker = Builder::new(descriptor(), registry.clone(), EchoFactory::default())
            .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(200)))
            .try_spawn()
            .await
            .unwrap();

        let err = invoker.call("x".to_string()).await.unwrap_err();
        assert_matches!(&err, ClientError::RetriesExhausted { attempts: 2, .. });
        assert_eq!(err.last_cause(), Some(&ClientError::NoEndpoints));

        registry.publish(vec![prod("a:1")]);
        eventually(|| !invoker.endpoints().is_empty()).await;
        assert_eq!(invoker.call("x".to_string()).await.unwrap(), "a:1:x");
    }

    #[tokio::test]
    async fn test_initial_discovery_failure_is_fatal() {
        let registry = MemoryDiscover::new("trackerapi");
        registry.mark_unavailable("connection refused");
        let result = Builder::new(descriptor(), registry, EchoFactory::default()).try_spawn().await;
        assert_matches!(result, Err(ClientError::Discover(_)));
    }

    #[tokio::test]
    async fn test_stale_snapshot_served_while_registry_unavailable() {
        let registry = MemoryDiscover::new("trackerapi");
        registry.publish(vec![prod("a:1")]);
        let invoker = Builder::new(descriptor(), registry.clone(), EchoFactory::default()).try_spawn().await.unwrap();
        assert!(invoker.registry_available());

        registry.mark_unavailable("timeout");
        eventually(|| !invoker.registry_available()).await;
        assert_eq!(*invoker.instances(), addrs(&["a:1"]));
        assert_eq!(invoker.call("x".to_string()).await.unwrap(), "a:1:x");

        registry.publish(vec![prod("a:1")]);
        eventually(|| invoker.registry_available()).await;
    }

    #[tokio::test]
    async fn test_construction_failure_keeps_other_endpoints() {
        let discover = FixedDiscover::from_address_str(vec!["bad:1", "a:1"]);
        let invoker = Builder::new(ServiceDescriptor::new("trackerapi"), discover, EchoFactory::default())
            .with_load_balance(RandomBalance::new())
            .try_spawn()
            .await
            .unwrap();
        assert_eq!(*invoker.instances(), addrs(&["bad:1", "a:1"]));
        assert_eq!(invoker.endpoints(), addrs(&["a:1"]));
        assert_eq!(invoker.call("x".to_string()).await.unwrap(), "a:1:x");
    }

    #[tokio::test]
    async fn test_shutdown_closes_endpoints() {
        let registry = MemoryDiscover::new("trackerapi");
        registry.publish(vec![prod("a:1"), prod("b:1")]);
        let factory = EchoFactory::default();
        let ledger = factory.ledger.clone();
        let invoker = Builder::new(descriptor(), registry.clone(), factory).try_spawn().await.unwrap();

        invoker.shutdown();
        invoker.shutdown();
        assert!(invoker.endpoints().is_empty());
        assert_eq!(ledger.closed.lock().unwrap().len(), 2);
        let err = invoker.call("x".to_string()).await.unwrap_err();
        assert_eq!(err.last_cause(), Some(&ClientError::NoEndpoints));

        drop(invoker);
        assert_eq!(ledger.closed.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_drop_closes_endpoints() {
        let factory = EchoFactory::default();
        let ledger = factory.ledger.clone();
        let invoker = Builder::new(ServiceDescriptor::new("trackerapi"), FixedDiscover::from_address_str(vec!["a:1"]), factory)
            .try_spawn()
            .await
            .unwrap();
        drop(invoker);
        assert_eq!(*ledger.closed.lock().unwrap(), vec!["a:1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_reconcile_stays_shut() {
        let registry = MemoryDiscover::new("trackerapi");
        registry.publish(vec![prod("a:1")]);
        let factory = EchoFactory::default();
        let ledger = factory.ledger.clone();
        let invoker = Builder::new(descriptor(), registry.clone(), factory).try_spawn().await.unwrap();

        registry.publish(vec![prod("a:1"), prod("slow:1")]);
        tokio::time::sleep(SLOW_MAKE / 4).await;
        invoker.shutdown();
        tokio::time::sleep(SLOW_MAKE * 2).await;

        assert!(invoker.endpoints().is_empty());
        let mut closed = ledger.closed.lock().unwrap().clone();
        closed.sort();
        assert_eq!(closed, vec!["a:1", "slow:1"]);
        let err = invoker.call("x".to_string()).await.unwrap_err();
        assert_eq!(err.last_cause(), Some(&ClientError::NoEndpoints));
    }
}
