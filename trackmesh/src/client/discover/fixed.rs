// Modifications Copyright Andeya Lee 2024
// Based on original source code from Volo Contributors licensed under MIT OR Apache-2.0
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Fixed instance list discover.

use super::{Discover, Discovery, Instance};
use crate::client::ClientError;
use crate::component::ServiceDescriptor;
use crate::net::InstanceAddress;
use async_broadcast::Receiver;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

/// [`FixedDiscover`] is a simple implementation of [`Discover`] that returns a fixed list of instances.
///
/// Every instance is reported healthy and untagged unless built with [`FixedDiscover::new`].
#[derive(Clone, Debug)]
pub struct FixedDiscover {
    instances: Vec<Arc<Instance>>,
}

impl FixedDiscover {
    /// Creates a new [`FixedDiscover`].
    pub fn new(instances: Vec<Arc<Instance>>) -> Self {
        Self { instances }
    }

    /// Creates a new [`FixedDiscover`] from plain addresses.
    pub fn from_address(addresses: Vec<InstanceAddress>) -> Self {
        Self {
            instances: addresses.into_iter().map(|address| Arc::new(Instance::new(address))).collect(),
        }
    }

    /// Creates a new [`FixedDiscover`] from address strings.
    pub fn from_address_str<S: Into<String>>(addresses: Vec<S>) -> Self {
        Self::from_address(addresses.into_iter().map(|s| InstanceAddress::from(s.into())).collect())
    }
}

impl From<Vec<SocketAddr>> for FixedDiscover {
    fn from(addrs: Vec<SocketAddr>) -> Self {
        Self::from_address(addrs.into_iter().map(InstanceAddress::from).collect())
    }
}

impl Discover for FixedDiscover {
    fn discover<'s>(&'s self, _: &'s ServiceDescriptor) -> impl Future<Output = Result<Vec<Arc<Instance>>, ClientError>> + Send {
        async move { Ok(self.instances.clone()) }
    }

    fn watch(&self, _: &ServiceDescriptor) -> Option<Receiver<Discovery>> {
        None
    }
}
