// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! load balance for endpoints.

mod random;
mod round_robin;

pub use random::RandomBalance;
pub use round_robin::RoundRobin;

use super::ClientError;
use std::sync::Arc;

/// [`LoadBalance`] promise the feature of the load balance policy.
///
/// A policy holds no per-endpoint health or latency state: every pick is
/// independent of earlier call outcomes.
pub trait LoadBalance<E>: Send + Sync + 'static {
    /// `pick` selects one endpoint of `pool`, the current cache snapshot.
    ///
    /// Fails with [`ClientError::NoEndpoints`] when the pool is empty.
    fn pick(&self, pool: &[Arc<E>]) -> Result<Arc<E>, ClientError>;
}
