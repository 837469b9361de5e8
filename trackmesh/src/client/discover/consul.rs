// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Service Discovery Based on Consul.
//!
//! Instances are read from the health endpoint, `GET /v1/health/service/<name>`.
//! [`ConsulDiscover::watch`] keeps a blocking query open and republishes the
//! instance list whenever the Consul index moves.

use super::{Discover, Discovery, Instance, RegistryState};
use crate::client::ClientError;
use crate::component::ServiceDescriptor;
use crate::net::InstanceAddress;
use async_broadcast::{Receiver, Sender, TrySendError};
use faststr::FastStr;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const CHANGE_BUFFER: usize = 16;
const INDEX_HEADER: &str = "X-Consul-Index";

/// Settings of the Consul registry client.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ConsulConfig {
    /// Consul agent address, e.g. `127.0.0.1:8500` or `http://consul:8500`.
    pub address: String,
    /// Datacenter to query. The agent's own when unset.
    pub datacenter: Option<String>,
    /// ACL token sent as `X-Consul-Token`.
    pub token: Option<String>,
    /// How long a blocking query may stay open.
    /// Default is 5 minutes.
    pub wait: Duration,
    /// Timeout of a non-blocking query.
    /// Default is 5 seconds.
    pub request_timeout: Duration,
    /// Pause after a failed or unchanged poll.
    /// Default is 1 second.
    pub retry_interval: Duration,
}

impl ConsulConfig {
    /// Returns a default config for the agent at `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            datacenter: None,
            token: None,
            wait: Duration::from_secs(300),
            request_timeout: Duration::from_secs(5),
            retry_interval: Duration::from_secs(1),
        }
    }
    /// Set the datacenter to query.
    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.datacenter = Some(datacenter.into());
        self
    }
    /// Set the ACL token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
    /// Set how long a blocking query may stay open.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }
    /// Set the timeout of a non-blocking query.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
    /// Set the pause after a failed or unchanged poll.
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }
}

/// Service discovery based on the Consul HTTP API.
#[derive(Clone, Debug)]
pub struct ConsulDiscover {
    client: Client,
    base: Url,
    config: Arc<ConsulConfig>,
}

impl ConsulDiscover {
    /// Creates a Consul discover.
    ///
    /// Fails when the address is not a valid URL or the HTTP client cannot be built.
    pub fn new(config: ConsulConfig) -> Result<Self, ClientError> {
        let address = if config.address.contains("://") {
            config.address.clone()
        } else {
            format!("http://{}", config.address)
        };
        let mut base = Url::parse(&address).map_err(|e| ClientError::Discover(format!("invalid registry address {address:?}: {e}").into()))?;
        // `join` replaces the last path segment unless the base ends with a slash.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .user_agent(concat!("trackmesh/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Discover(format!("failed to create registry client: {e}").into()))?;
        Ok(Self {
            client,
            base,
            config: Arc::new(config),
        })
    }

    /// The registry settings.
    pub fn config(&self) -> &ConsulConfig {
        &self.config
    }

    /// Runs one health query. A blocking query is issued when `index` is set.
    ///
    /// Returns the instances and the Consul index of the answer.
    async fn query(&self, descriptor: &ServiceDescriptor, index: Option<u64>) -> Result<(Vec<Arc<Instance>>, u64), ClientError> {
        let url = self
            .base
            .join(&format!("v1/health/service/{}", descriptor.name_ref()))
            .map_err(|e| ClientError::Discover(format!("invalid service name {:?}: {e}", descriptor.name_ref()).into()))?;

        let mut params: Vec<(&str, String)> = Vec::new();
        if descriptor.healthy_only {
            params.push(("passing", "true".to_string()));
        }
        for tag in &descriptor.tags {
            params.push(("tag", tag.to_string()));
        }
        if let Some(dc) = &self.config.datacenter {
            params.push(("dc", dc.clone()));
        }
        let timeout = match index {
            Some(index) => {
                params.push(("index", index.to_string()));
                params.push(("wait", format!("{}s", self.config.wait.as_secs().max(1))));
                // Consul adds up to wait/16 of jitter to a blocking query.
                self.config.wait + self.config.wait / 16 + self.config.request_timeout
            },
            None => self.config.request_timeout,
        };

        let mut request = self.client.get(url).query(&params).timeout(timeout);
        if let Some(token) = &self.config.token {
            request = request.header("X-Consul-Token", token);
        }
        let response = request.send().await.map_err(|e| ClientError::Discover(format!("registry request failed: {e}").into()))?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(ClientError::Discover(format!("registry answered {status}").into()));
        }
        let next_index = response
            .headers()
            .get(INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or_default();
        let entries: Vec<ServiceEntry> = response
            .json()
            .await
            .map_err(|e| ClientError::Discover(format!("malformed registry answer: {e}").into()))?;
        Ok((entries.into_iter().filter_map(ServiceEntry::into_instance).map(Arc::new).collect(), next_index))
    }

    async fn watch_loop(self, descriptor: ServiceDescriptor, sender: Sender<Discovery>) {
        let key = descriptor.key();
        let mut index = 0u64;
        let mut degraded = false;
        let mut published = false;
        loop {
            if sender.receiver_count() == 0 {
                debug!("[TRACKMESH] no watcher left for {key}, stop polling registry");
                return;
            }
            let state = match self.query(&descriptor, Some(index)).await {
                Ok((_, next_index)) if next_index == index && published && !degraded => {
                    tokio::time::sleep(self.config.retry_interval).await;
                    continue;
                },
                Ok((instances, next_index)) => {
                    // The index may go backwards after a Consul restart.
                    index = if next_index < index { 0 } else { next_index };
                    degraded = false;
                    published = true;
                    RegistryState::Available(instances)
                },
                Err(err) => {
                    warn!("[TRACKMESH] registry unavailable for {key}, serving last snapshot: {err}");
                    degraded = true;
                    RegistryState::Unavailable(err.to_string().into())
                },
            };
            let failed = matches!(state, RegistryState::Unavailable(_));
            match sender.try_broadcast(Discovery { key: key.clone(), state }) {
                Ok(_) | Err(TrySendError::Inactive(_)) | Err(TrySendError::Full(_)) => {},
                Err(TrySendError::Closed(_)) => return,
            }
            if failed {
                tokio::time::sleep(self.config.retry_interval).await;
            }
        }
    }
}

impl Discover for ConsulDiscover {
    fn discover<'s>(&'s self, descriptor: &'s ServiceDescriptor) -> impl Future<Output = Result<Vec<Arc<Instance>>, ClientError>> + Send {
        async move { self.query(descriptor, None).await.map(|(instances, _)| instances) }
    }

    fn watch(&self, descriptor: &ServiceDescriptor) -> Option<Receiver<Discovery>> {
        let (mut sender, receiver) = async_broadcast::broadcast(CHANGE_BUFFER);
        sender.set_overflow(true);
        tokio::spawn(self.clone().watch_loop(descriptor.clone(), sender));
        Some(receiver)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceEntry {
    node: NodeEntry,
    service: ServiceDetail,
    #[serde(default)]
    checks: Vec<CheckEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeEntry {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceDetail {
    #[serde(default)]
    address: String,
    port: u16,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CheckEntry {
    status: String,
}

impl ServiceEntry {
    fn into_instance(self) -> Option<Instance> {
        let host = if self.service.address.is_empty() { self.node.address } else { self.service.address };
        if host.is_empty() {
            return None;
        }
        let address = if host.contains(':') { format!("[{host}]:{}", self.service.port) } else { format!("{host}:{}", self.service.port) };
        Some(Instance {
            address: InstanceAddress::from(address),
            tags: self.service.tags.unwrap_or_default().into_iter().map(FastStr::new).collect(),
            healthy: self.checks.iter().all(|c| c.status == "passing"),
        })
    }
}
