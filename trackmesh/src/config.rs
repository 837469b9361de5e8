// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Settings of the tracker client.

use crate::client::discover::ConsulConfig;
use crate::client::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT};
use crate::component::ServiceDescriptor;
use crate::transport::Codec;
use std::time::Duration;

/// Default registry agent address.
pub const DEFAULT_REGISTRY_ADDRESS: &str = "127.0.0.1:8500";
/// Default logical service name.
pub const DEFAULT_SERVICE_NAME: &str = "trackerapi";
/// Default tag an instance must carry.
pub const DEFAULT_TAG: &str = "prod";

/// Settings that control how [`crate::tracker::TrackerClient`] finds and calls instances.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct TrackerConfig {
    /// Registry agent address.
    /// Default is `127.0.0.1:8500`.
    pub registry_address: String,
    /// Registry datacenter; `None` means the agent's own.
    pub datacenter: Option<String>,
    /// Registry ACL token.
    pub token: Option<String>,
    /// Logical service name.
    /// Default is `trackerapi`.
    pub service_name: String,
    /// Tags an instance must carry, all of them.
    /// Default is `["prod"]`.
    pub tags: Vec<String>,
    /// Only use instances whose health checks pass.
    /// Default is true.
    pub healthy_only: bool,
    /// Attempts per call.
    /// Default is 3.
    pub max_attempts: u32,
    /// Budget shared by all attempts of one call.
    /// Default is 500ms.
    pub retry_timeout: Duration,
    /// Pause between attempts.
    /// Default is zero.
    pub backoff: Duration,
    /// Wire codec, must match the servers.
    /// Default is JSON.
    pub codec: Codec,
    /// Maximum frame length, zero means unlimited.
    pub max_frame_len: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            registry_address: DEFAULT_REGISTRY_ADDRESS.to_owned(),
            datacenter: None,
            token: None,
            service_name: DEFAULT_SERVICE_NAME.to_owned(),
            tags: vec![DEFAULT_TAG.to_owned()],
            healthy_only: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_timeout: DEFAULT_TIMEOUT,
            backoff: Duration::ZERO,
            codec: Codec::default(),
            max_frame_len: 0,
        }
    }
}

impl TrackerConfig {
    /// Returns the default config.
    pub fn new() -> Self {
        Self::default()
    }
    /// Set the registry agent address.
    pub fn with_registry_address(mut self, registry_address: impl Into<String>) -> Self {
        self.registry_address = registry_address.into();
        self
    }
    /// Set the registry datacenter.
    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.datacenter = Some(datacenter.into());
        self
    }
    /// Set the registry ACL token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
    /// Set the logical service name.
    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }
    /// Replace the required tags. An empty list accepts every instance.
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
    /// Set whether unhealthy instances are skipped.
    pub fn with_healthy_only(mut self, healthy_only: bool) -> Self {
        self.healthy_only = healthy_only;
        self
    }
    /// Set the attempts per call; zero means one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
    /// Set the budget of one call.
    pub fn with_retry_timeout(mut self, retry_timeout: Duration) -> Self {
        self.retry_timeout = retry_timeout;
        self
    }
    /// Set the pause between attempts.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
    /// Set the wire codec.
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }
    /// Set the maximum frame length, zero means unlimited.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// The pool both tracker operations call.
    pub fn descriptor(&self) -> ServiceDescriptor {
        ServiceDescriptor::new(self.service_name.clone())
            .with_tags(self.tags.iter().cloned())
            .with_healthy_only(self.healthy_only)
    }

    /// The retry policy of every call.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.retry_timeout).with_backoff(self.backoff)
    }

    /// Settings of the Consul registry adapter.
    pub fn consul_config(&self) -> ConsulConfig {
        let mut config = ConsulConfig::new(self.registry_address.clone());
        if let Some(datacenter) = &self.datacenter {
            config = config.with_datacenter(datacenter.clone());
        }
        if let Some(token) = &self.token {
            config = config.with_token(token.clone());
        }
        config
    }
}
