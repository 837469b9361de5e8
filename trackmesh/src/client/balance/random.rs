// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Random load balance implemention

use super::LoadBalance;
use crate::client::ClientError;
use rand::Rng;
use std::sync::Arc;

/// Random load balance implemention: every endpoint of the pool is equally likely.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomBalance;

impl RandomBalance {
    /// Returns a [`RandomBalance`].
    pub fn new() -> Self {
        Self
    }
}

impl<E: Send + Sync + 'static> LoadBalance<E> for RandomBalance {
    fn pick(&self, pool: &[Arc<E>]) -> Result<Arc<E>, ClientError> {
        if pool.is_empty() {
            return Err(ClientError::NoEndpoints);
        }
        let offset = rand::thread_rng().gen_range(0..pool.len());
        Ok(pool[offset].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::RandomBalance;
    use crate::client::balance::LoadBalance;
    use crate::client::ClientError;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    #[test]
    fn test_random_pick_in_pool() {
        let lb = RandomBalance::new();
        assert_matches!(LoadBalance::<u8>::pick(&lb, &[]), Err(ClientError::NoEndpoints));
        let pool: Vec<Arc<u8>> = (0..4).map(Arc::new).collect();
        for _ in 0..64 {
            assert!(*lb.pick(&pool).unwrap() < 4);
        }
    }
}
