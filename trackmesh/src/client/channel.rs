// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Endpoints bound to one instance, and the factories that build them.

use super::ClientError;
use crate::net::InstanceAddress;
use std::future::Future;
use std::sync::Arc;

/// A directly callable binding to one instance.
pub trait Endpoint: Send + Sync + 'static {
    /// Request sent per call.
    type Req: Send + 'static;
    /// Successful result of a call.
    type Resp: Send + 'static;

    /// The instance this endpoint is bound to.
    fn address(&self) -> &InstanceAddress;

    /// Calls the remote operation on the bound instance.
    fn invoke(&self, request: Self::Req) -> impl Future<Output = Result<Self::Resp, ClientError>> + Send;

    /// Releases per-endpoint resources. Called once when the instance leaves the pool.
    fn close(&self) {}
}

/// Converts an instance address into an [`Endpoint`] bound to it.
///
/// Implementations must depend only on the address and their own immutable settings,
/// so endpoints for different addresses can be built concurrently.
pub trait Factory: Send + Sync + 'static {
    /// The endpoint type produced.
    type Endpoint: Endpoint;

    /// Builds the endpoint for `address`.
    fn make(&self, address: &InstanceAddress) -> impl Future<Output = Result<Self::Endpoint, ClientError>> + Send;
}

impl<F: Factory> Factory for Arc<F> {
    type Endpoint = F::Endpoint;

    fn make(&self, address: &InstanceAddress) -> impl Future<Output = Result<Self::Endpoint, ClientError>> + Send {
        (**self).make(address)
    }
}
