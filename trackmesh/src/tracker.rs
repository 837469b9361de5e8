// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! The repository tracker protocol: wire types, the serving side and a resilient client.
//!
//! # Example
//!
//! ```no_run
//! use trackmesh::config::TrackerConfig;
//! use trackmesh::tracker::TrackerClient;
//!
//! # async fn run() -> Result<(), trackmesh::client::ClientError> {
//! let client = TrackerClient::connect(&TrackerConfig::default()).await?;
//! for repo in client.watched_repos("andeya").await? {
//!     println!("{}", repo.full_name);
//! }
//! # Ok(())
//! # }
//! ```

use crate::client::balance::{LoadBalance, RoundRobin};
use crate::client::channel::{Endpoint, Factory};
use crate::client::discover::{ConsulDiscover, Discover};
use crate::client::{Builder, ClientError, ResilientInvoker};
use crate::config::TrackerConfig;
use crate::net::InstanceAddress;
use crate::transport::{self, Codec};
use crate::{context, RequestName, ServerError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tarpc::client::RpcError;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// A repository as reported by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoInfo {
    /// `owner/name`.
    pub full_name: String,
}

impl RepoInfo {
    /// Creates a [`RepoInfo`].
    pub fn new(full_name: impl Into<String>) -> Self {
        Self { full_name: full_name.into() }
    }
}

/// The request sent over the wire from the client to the server.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerRequest {
    WatchedRepos { username: String },
    StarredRepos { username: String },
}

impl RequestName for TrackerRequest {
    fn name(&self) -> &'static str {
        match self {
            TrackerRequest::WatchedRepos { .. } => "RepoTracker.watched_repos",
            TrackerRequest::StarredRepos { .. } => "RepoTracker.starred_repos",
        }
    }
}

/// The response sent over the wire from the server to the client.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerResponse {
    WatchedRepos(Result<Vec<RepoInfo>, String>),
    StarredRepos(Result<Vec<RepoInfo>, String>),
}

/// The tracker service. Implement it to serve the protocol.
///
/// An empty username means the authenticated caller.
pub trait RepoTracker: Sized + Clone + Send + Sync + 'static {
    /// Repositories `username` watches.
    fn watched_repos(self, ctx: context::Context, username: String) -> impl Future<Output = Result<Vec<RepoInfo>, String>> + Send;
    /// Repositories `username` starred.
    fn starred_repos(self, ctx: context::Context, username: String) -> impl Future<Output = Result<Vec<RepoInfo>, String>> + Send;
    /// Returns a serving function to use with
    /// [InFlightRequest::execute](crate::server::InFlightRequest::execute).
    fn serve(self) -> ServeTracker<Self> {
        ServeTracker { service: self }
    }
    /// Wraps the service so every call is logged with its method, username and duration.
    fn with_logging(self) -> LoggingTracker<Self> {
        LoggingTracker { inner: self }
    }
}

/// A [`RepoTracker`] that logs every call at `info` level.
#[derive(Clone, Debug)]
pub struct LoggingTracker<T> {
    inner: T,
}

impl<T> LoggingTracker<T> {
    /// The wrapped service.
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

fn log_call(method: &str, username: &str, started: Instant, result: &Result<Vec<RepoInfo>, String>) {
    let took = started.elapsed();
    match result {
        Ok(repos) => info!(method, username, ?took, repos = repos.len(), "[TRACKMESH] served"),
        Err(err) => info!(method, username, ?took, err = %err, "[TRACKMESH] served"),
    }
}

impl<T: RepoTracker> RepoTracker for LoggingTracker<T> {
    fn watched_repos(self, ctx: context::Context, username: String) -> impl Future<Output = Result<Vec<RepoInfo>, String>> + Send {
        async move {
            let started = Instant::now();
            let result = self.inner.watched_repos(ctx, username.clone()).await;
            log_call("watched_repos", &username, started, &result);
            result
        }
    }

    fn starred_repos(self, ctx: context::Context, username: String) -> impl Future<Output = Result<Vec<RepoInfo>, String>> + Send {
        async move {
            let started = Instant::now();
            let result = self.inner.starred_repos(ctx, username.clone()).await;
            log_call("starred_repos", &username, started, &result);
            result
        }
    }
}

/// A serving function to use with [crate::server::InFlightRequest::execute].
#[derive(Clone, Debug)]
pub struct ServeTracker<S> {
    service: S,
}

impl<S> crate::server::Serve for ServeTracker<S>
where
    S: RepoTracker,
{
    type Req = TrackerRequest;
    type Resp = TrackerResponse;

    async fn serve(self, ctx: context::Context, req: TrackerRequest) -> Result<TrackerResponse, ServerError> {
        trace!("[TRACKMESH] serving {}", req.name());
        match req {
            TrackerRequest::WatchedRepos { username } => Ok(TrackerResponse::WatchedRepos(self.service.watched_repos(ctx, username).await)),
            TrackerRequest::StarredRepos { username } => Ok(TrackerResponse::StarredRepos(self.service.starred_repos(ctx, username).await)),
        }
    }
}

/// The tarpc channel speaking the tracker protocol.
pub type TrackerChannel = tarpc::client::Channel<TrackerRequest, TrackerResponse>;

/// Which tracker operation an endpoint performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerOperation {
    /// List watched repositories.
    WatchedRepos,
    /// List starred repositories.
    StarredRepos,
}

impl TrackerOperation {
    fn request(self, username: String) -> TrackerRequest {
        match self {
            TrackerOperation::WatchedRepos => TrackerRequest::WatchedRepos { username },
            TrackerOperation::StarredRepos => TrackerRequest::StarredRepos { username },
        }
    }

    fn unpack(self, response: TrackerResponse) -> Result<Vec<RepoInfo>, ClientError> {
        let result = match (self, response) {
            (TrackerOperation::WatchedRepos, TrackerResponse::WatchedRepos(result)) => result,
            (TrackerOperation::StarredRepos, TrackerResponse::StarredRepos(result)) => result,
            (_, other) => return Err(ClientError::Transport(format!("mismatched response for {self:?}: {other:?}").into())),
        };
        result.map_err(|err| ClientError::RemoteOperation(err.into()))
    }
}

/// One tracker operation bound to one instance.
///
/// The connection is opened on the first call and opened again after the previous one shut down.
pub struct TrackerEndpoint {
    address: InstanceAddress,
    host: String,
    port: u16,
    operation: TrackerOperation,
    codec: Codec,
    max_frame_len: usize,
    channel: RwLock<Option<TrackerChannel>>,
    closed: AtomicBool,
}

impl fmt::Debug for TrackerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerEndpoint")
            .field("address", &self.address)
            .field("operation", &self.operation)
            .field("codec", &self.codec)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl TrackerEndpoint {
    /// The operation this endpoint performs.
    pub fn operation(&self) -> TrackerOperation {
        self.operation
    }

    fn closed_error(&self) -> ClientError {
        ClientError::Transport(format!("endpoint {} is closed", self.address).into())
    }

    async fn channel(&self) -> Result<TrackerChannel, ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(self.closed_error());
        }
        if let Some(channel) = self.channel.read().await.as_ref() {
            return Ok(channel.clone());
        }
        let mut guard = self.channel.write().await;
        // `close` may have run while we waited for the lock.
        if self.closed.load(Ordering::Acquire) {
            guard.take();
            return Err(self.closed_error());
        }
        if let Some(channel) = guard.as_ref() {
            return Ok(channel.clone());
        }
        let channel: TrackerChannel = transport::connect((self.host.as_str(), self.port), self.codec, self.max_frame_len, Default::default())
            .await
            .map_err(|e| ClientError::Transport(format!("failed to connect {}: {e}", self.address).into()))?;
        debug!("[TRACKMESH] connected to {} ({})", self.address, self.codec);
        *guard = Some(channel.clone());
        Ok(channel)
    }

    async fn disconnect(&self) {
        self.channel.write().await.take();
    }
}

impl Endpoint for TrackerEndpoint {
    type Req = String;
    type Resp = Vec<RepoInfo>;

    fn address(&self) -> &InstanceAddress {
        &self.address
    }

    fn invoke(&self, username: String) -> impl Future<Output = Result<Vec<RepoInfo>, ClientError>> + Send {
        async move {
            let channel = self.channel().await?;
            match channel.call(context::current(), self.operation.request(username)).await {
                Ok(response) => self.operation.unpack(response),
                Err(RpcError::Server(ServerError { detail, .. })) => Err(ClientError::RemoteOperation(detail.into())),
                Err(RpcError::Shutdown) => {
                    self.disconnect().await;
                    Err(ClientError::Transport(format!("connection to {} shut down", self.address).into()))
                },
                Err(err) => Err(ClientError::Transport(err.to_string().into())),
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // Dropping the last channel handle ends the dispatch task. When the lock is busy, the
        // holder sees the flag: `channel` refuses to hand out or open a connection from now on.
        if let Ok(mut guard) = self.channel.try_write() {
            guard.take();
        }
    }
}

/// Builds [`TrackerEndpoint`]s for one operation.
#[derive(Debug, Clone)]
pub struct TrackerFactory {
    operation: TrackerOperation,
    codec: Codec,
    max_frame_len: usize,
}

impl TrackerFactory {
    /// Creates a factory for `operation` speaking `codec`.
    pub fn new(operation: TrackerOperation, codec: Codec) -> Self {
        Self {
            operation,
            codec,
            max_frame_len: 0,
        }
    }
    /// Set maximum frame length, zero means unlimited.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }
}

impl Factory for TrackerFactory {
    type Endpoint = TrackerEndpoint;

    fn make(&self, address: &InstanceAddress) -> impl Future<Output = Result<TrackerEndpoint, ClientError>> + Send {
        let endpoint = match address.host_port() {
            Some((host, port)) => Ok(TrackerEndpoint {
                address: address.clone(),
                host: host.to_owned(),
                port,
                operation: self.operation,
                codec: self.codec,
                max_frame_len: self.max_frame_len,
                channel: RwLock::new(None),
                closed: AtomicBool::new(false),
            }),
            None => Err(ClientError::EndpointConstruction {
                address: address.clone(),
                reason: "expected host:port".into(),
            }),
        };
        std::future::ready(endpoint)
    }
}

/// Resilient client of the tracker service.
///
/// Each operation has its own instance set, endpoint cache, balancer and retry executor.
pub struct TrackerClient<LB = RoundRobin>
where
    LB: LoadBalance<TrackerEndpoint>,
{
    watched: ResilientInvoker<TrackerFactory, LB>,
    starred: ResilientInvoker<TrackerFactory, LB>,
}

impl<LB> fmt::Debug for TrackerClient<LB>
where
    LB: LoadBalance<TrackerEndpoint>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerClient").field("watched", &self.watched).field("starred", &self.starred).finish()
    }
}

impl TrackerClient<RoundRobin> {
    /// Creates a client that discovers instances in the Consul registry named by `config`.
    pub async fn connect(config: &TrackerConfig) -> Result<Self, ClientError> {
        let discover = ConsulDiscover::new(config.consul_config())?;
        Self::with_discover(config, discover).await
    }

    /// Creates a client over any registry adapter.
    pub async fn with_discover<D>(config: &TrackerConfig, discover: D) -> Result<Self, ClientError>
    where
        D: Discover + Clone,
    {
        Self::with_load_balance(config, discover, RoundRobin::new, RoundRobin::new).await
    }
}

impl<LB> TrackerClient<LB>
where
    LB: LoadBalance<TrackerEndpoint>,
{
    /// Creates a client whose invokers use the balancers returned by `watched_lb` and `starred_lb`.
    pub async fn with_load_balance<D, W, S>(config: &TrackerConfig, discover: D, watched_lb: W, starred_lb: S) -> Result<Self, ClientError>
    where
        D: Discover + Clone,
        W: FnOnce() -> LB,
        S: FnOnce() -> LB,
    {
        let invoker = |operation, lb: LB, discover: D| {
            let factory = TrackerFactory::new(operation, config.codec).with_max_frame_len(config.max_frame_len);
            Builder::new(config.descriptor(), discover, factory)
                .with_load_balance(lb)
                .with_retry_policy(config.retry_policy())
                .try_spawn()
        };
        let watched = invoker(TrackerOperation::WatchedRepos, watched_lb(), discover.clone()).await?;
        let starred = invoker(TrackerOperation::StarredRepos, starred_lb(), discover).await?;
        Ok(Self { watched, starred })
    }

    /// Lists the repositories `username` watches.
    pub async fn watched_repos(&self, username: impl Into<String>) -> Result<Vec<RepoInfo>, ClientError> {
        self.watched.call(username.into()).await
    }

    /// Lists the repositories `username` starred.
    pub async fn starred_repos(&self, username: impl Into<String>) -> Result<Vec<RepoInfo>, ClientError> {
        self.starred.call(username.into()).await
    }

    /// The invoker behind [`TrackerClient::watched_repos`].
    pub fn watched_invoker(&self) -> &ResilientInvoker<TrackerFactory, LB> {
        &self.watched
    }

    /// The invoker behind [`TrackerClient::starred_repos`].
    pub fn starred_invoker(&self) -> &ResilientInvoker<TrackerFactory, LB> {
        &self.starred
    }

    /// Stops following the registry and closes every connection.
    pub fn shutdown(&self) {
        self.watched.shutdown();
        self.starred.shutdown();
    }
}
