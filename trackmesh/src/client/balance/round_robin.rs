// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Round-robin load balance implemention

use super::LoadBalance;
use crate::client::ClientError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Round-robin over the current pool.
///
/// The shared cursor advances atomically on each pick and is taken modulo the pool size
/// at pick time, so a resize may revisit or skip an endpoint but never leaves the pool.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    /// Returns a [`RoundRobin`] starting at the first endpoint.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<E: Send + Sync + 'static> LoadBalance<E> for RoundRobin {
    fn pick(&self, pool: &[Arc<E>]) -> Result<Arc<E>, ClientError> {
        if pool.is_empty() {
            return Err(ClientError::NoEndpoints);
        }
        let cursor = self.cursor.fetch_add(1, Ordering::Relaxed);
        Ok(pool[cursor % pool.len()].clone())
    }
}
