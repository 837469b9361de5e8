// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Bounded retry around pick-and-call.

use super::channel::Endpoint;
use super::ClientError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::trace;

/// Default number of attempts per call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default overall budget of one call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Settings that bound the retries of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct RetryPolicy {
    /// Maximum number of attempts, at least 1.
    /// Default is 3.
    pub max_attempts: u32,
    /// Budget shared by all attempts of one call, not per attempt.
    /// Default is 500ms.
    pub timeout: Duration,
    /// Pause between attempts, clipped to the remaining budget.
    /// Default is zero: attempts run back to back.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: DEFAULT_TIMEOUT,
            backoff: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy; zero attempts means one.
    pub fn new(max_attempts: u32, timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            timeout,
            backoff: Duration::ZERO,
        }
    }
    /// Set the maximum number of attempts; zero means one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
    /// Set the overall budget of one call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
    /// Set the pause between attempts.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Retry executor.
///
/// Each attempt picks a fresh endpoint, so a rotating balancer moves away from a failing
/// instance. The first success wins. When attempts or time run out the most recent failure
/// is returned inside [`ClientError::RetriesExhausted`]; earlier failures are dropped.
#[derive(Debug, Clone, Default)]
pub struct Retry {
    policy: RetryPolicy,
}

impl Retry {
    /// Creates an executor for `policy`.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `request` against endpoints produced by `pick`.
    ///
    /// A failing `pick` (e.g. [`ClientError::NoEndpoints`]) counts as a failed attempt.
    /// If the budget runs out while an attempt is in flight, that attempt is abandoned.
    pub async fn call<E, P>(&self, pick: P, request: E::Req) -> Result<E::Resp, ClientError>
    where
        E: Endpoint,
        E::Req: Clone,
        P: Fn() -> Result<Arc<E>, ClientError>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let deadline = Instant::now() + self.policy.timeout;
        let mut last = ClientError::NoEndpoints;
        let mut attempts = 0u32;

        while attempts < max_attempts {
            if attempts > 0 {
                self.pause(deadline).await;
                if Instant::now() >= deadline {
                    trace!("[TRACKMESH] retry budget of {:?} spent after {attempts} attempt(s)", self.policy.timeout);
                    break;
                }
            }
            attempts += 1;

            let endpoint = match pick() {
                Ok(endpoint) => endpoint,
                Err(err) => {
                    trace!("[TRACKMESH] attempt {attempts} found no endpoint: {err}");
                    last = err;
                    continue;
                },
            };
            match timeout_at(deadline, endpoint.invoke(request.clone())).await {
                Ok(Ok(resp)) => return Ok(resp),
                Ok(Err(err)) => {
                    trace!("[TRACKMESH] attempt {attempts} on {} failed: {err}", endpoint.address());
                    last = err;
                },
                Err(_) => {
                    trace!("[TRACKMESH] attempt {attempts} on {} abandoned at deadline", endpoint.address());
                    last = ClientError::DeadlineExceeded(self.policy.timeout);
                    break;
                },
            }
        }

        Err(ClientError::RetriesExhausted {
            attempts,
            source: Box::new(last),
        })
    }

    async fn pause(&self, deadline: Instant) {
        if self.policy.backoff.is_zero() {
            return;
        }
        sleep_until(deadline.min(Instant::now() + self.policy.backoff)).await;
    }
}
