// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! In-process registry.

use super::{Discover, Discovery, Instance, RegistryState};
use crate::client::ClientError;
use crate::component::ServiceDescriptor;
use async_broadcast::{InactiveReceiver, Receiver, Sender, TrySendError};
use faststr::FastStr;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tracing::trace;

const CHANGE_BUFFER: usize = 16;

/// [`MemoryDiscover`] is a registry living inside the process.
///
/// Every [`MemoryDiscover::publish`] replaces the instance list and notifies all watchers.
/// Clones share the same registry.
#[derive(Clone)]
pub struct MemoryDiscover {
    inner: Arc<Inner>,
}

struct Inner {
    key: FastStr,
    state: RwLock<RegistryState>,
    sender: Sender<Discovery>,
    // Keeps the channel open while nobody watches.
    _keepalive: InactiveReceiver<Discovery>,
}

impl MemoryDiscover {
    /// Creates a registry for `key` that initially reports no instances.
    pub fn new(key: impl Into<FastStr>) -> Self {
        let (mut sender, receiver) = async_broadcast::broadcast(CHANGE_BUFFER);
        sender.set_overflow(true);
        Self {
            inner: Arc::new(Inner {
                key: key.into(),
                state: RwLock::new(RegistryState::Available(Vec::new())),
                sender,
                _keepalive: receiver.deactivate(),
            }),
        }
    }

    /// Replaces the reported instances and notifies watchers.
    pub fn publish(&self, instances: Vec<Arc<Instance>>) {
        self.set_state(RegistryState::Available(instances));
    }

    /// Reports the registry as unreachable. Discovery calls fail until the next publish.
    pub fn mark_unavailable(&self, reason: impl Into<FastStr>) {
        self.set_state(RegistryState::Unavailable(reason.into()));
    }

    fn set_state(&self, state: RegistryState) {
        match self.inner.state.write() {
            Ok(mut guard) => *guard = state.clone(),
            Err(poisoned) => *poisoned.into_inner() = state.clone(),
        }
        let discovery = Discovery {
            key: self.inner.key.clone(),
            state,
        };
        match self.inner.sender.try_broadcast(discovery) {
            Ok(_) | Err(TrySendError::Inactive(_)) => {},
            Err(err) => trace!("[TRACKMESH] memory registry change dropped: {err:?}"),
        }
    }
}

impl Discover for MemoryDiscover {
    fn discover<'s>(&'s self, _: &'s ServiceDescriptor) -> impl Future<Output = Result<Vec<Arc<Instance>>, ClientError>> + Send {
        async move {
            let state = match self.inner.state.read() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            };
            match state {
                RegistryState::Available(instances) => Ok(instances),
                RegistryState::Unavailable(reason) => Err(ClientError::Discover(reason)),
            }
        }
    }

    fn watch(&self, _: &ServiceDescriptor) -> Option<Receiver<Discovery>> {
        Some(self.inner.sender.new_receiver())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryDiscover;
    use crate::client::discover::{Discover, Instance, RegistryState};
    use crate::client::ClientError;
    use crate::component::ServiceDescriptor;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_publish_notifies_watchers() {
        let registry = MemoryDiscover::new("trackerapi");
        let descriptor = ServiceDescriptor::new("trackerapi");
        let mut watcher = registry.watch(&descriptor).unwrap();

        registry.publish(vec![Arc::new(Instance::new("a:1"))]);
        let change = watcher.recv().await.unwrap();
        assert_eq!(change.key.as_str(), "trackerapi");
        assert_eq!(change.state, RegistryState::Available(vec![Arc::new(Instance::new("a:1"))]));
        assert_eq!(registry.discover(&descriptor).await.unwrap().len(), 1);

        registry.mark_unavailable("down");
        assert_matches!(watcher.recv().await.unwrap().state, RegistryState::Unavailable(_));
        assert_matches!(registry.discover(&descriptor).await, Err(ClientError::Discover(_)));
    }

    #[test]
    fn test_publish_without_watchers() {
        let registry = MemoryDiscover::new("trackerapi");
        registry.publish(vec![Arc::new(Instance::new("a:1"))]);
        registry.publish(vec![]);
    }
}
