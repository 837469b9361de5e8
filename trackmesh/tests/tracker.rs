// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use assert_matches::assert_matches;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use trackmesh::client::discover::{FixedDiscover, Instance, MemoryDiscover};
use trackmesh::client::ClientError;
use trackmesh::config::TrackerConfig;
use trackmesh::context;
use trackmesh::net::InstanceAddress;
use trackmesh::server::{spawn_tcp, TcpConfig};
use trackmesh::tracker::{RepoInfo, RepoTracker, TrackerClient};
use trackmesh::transport::Codec;

/// Answers `<name>/<username>`, or fails with `<name> is down`.
#[derive(Clone)]
struct NamedTracker {
    name: &'static str,
    down: bool,
    delay: Duration,
}

impl NamedTracker {
    fn up(name: &'static str) -> Self {
        Self {
            name,
            down: false,
            delay: Duration::ZERO,
        }
    }

    fn down(name: &'static str) -> Self {
        Self { down: true, ..Self::up(name) }
    }

    fn slow(name: &'static str, delay: Duration) -> Self {
        Self { delay, ..Self::up(name) }
    }

    fn answer(self, kind: &'static str, username: String) -> impl Future<Output = Result<Vec<RepoInfo>, String>> + Send {
        async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.down {
                return Err(format!("{} is down", self.name));
            }
            Ok(vec![RepoInfo::new(format!("{}/{kind}/{username}", self.name))])
        }
    }
}

impl RepoTracker for NamedTracker {
    fn watched_repos(self, _: context::Context, username: String) -> impl Future<Output = Result<Vec<RepoInfo>, String>> + Send {
        self.answer("watched", username)
    }

    fn starred_repos(self, _: context::Context, username: String) -> impl Future<Output = Result<Vec<RepoInfo>, String>> + Send {
        self.answer("starred", username)
    }
}

async fn start(tracker: NamedTracker, codec: Codec) -> anyhow::Result<SocketAddr> {
    Ok(spawn_tcp(tracker, TcpConfig::new(([127, 0, 0, 1], 0).into()).with_codec(codec)).await?)
}

fn config() -> TrackerConfig {
    // Fixed and in-memory instances carry no tags.
    TrackerConfig::new().with_tags(Vec::<String>::new()).with_retry_timeout(Duration::from_secs(5))
}

fn fixed(addresses: &[SocketAddr]) -> FixedDiscover {
    FixedDiscover::from(addresses.to_vec())
}

fn first(repos: Vec<RepoInfo>) -> String {
    repos.into_iter().next().map(|r| r.full_name).unwrap_or_default()
}

async fn eventually(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn round_robin_across_servers() -> anyhow::Result<()> {
    let a = start(NamedTracker::up("a"), Codec::Json).await?;
    let b = start(NamedTracker::up("b"), Codec::Json).await?;
    let client = TrackerClient::with_discover(&config().with_max_attempts(1), fixed(&[a, b])).await?;

    let mut served = Vec::new();
    for _ in 0..4 {
        served.push(first(client.watched_repos("octo").await?));
    }
    assert_eq!(served, vec!["a/watched/octo", "b/watched/octo", "a/watched/octo", "b/watched/octo"]);
    assert_eq!(first(client.starred_repos("").await?), "a/starred/");
    Ok(())
}

#[tokio::test]
async fn bincode_codec() -> anyhow::Result<()> {
    let a = start(NamedTracker::up("a"), Codec::Bincode).await?;
    let client = TrackerClient::with_discover(&config().with_codec(Codec::Bincode), fixed(&[a])).await?;
    assert_eq!(first(client.starred_repos("octo").await?), "a/starred/octo");
    Ok(())
}

#[tokio::test]
async fn retries_move_past_failing_server() -> anyhow::Result<()> {
    let down = start(NamedTracker::down("down"), Codec::Json).await?;
    let up = start(NamedTracker::up("up"), Codec::Json).await?;
    let client = TrackerClient::with_discover(&config().with_max_attempts(2), fixed(&[down, up])).await?;
    for _ in 0..4 {
        assert_eq!(first(client.watched_repos("octo").await?), "up/watched/octo");
    }
    Ok(())
}

#[tokio::test]
async fn unreachable_instance_is_a_transport_failure() -> anyhow::Result<()> {
    let closed = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?;
    let up = start(NamedTracker::up("up"), Codec::Json).await?;

    let client = TrackerClient::with_discover(&config().with_max_attempts(1), fixed(&[closed])).await?;
    let err = client.watched_repos("octo").await.unwrap_err();
    assert_matches!(err.last_cause(), Some(ClientError::Transport(_)));

    let client = TrackerClient::with_discover(&config().with_max_attempts(2), fixed(&[closed, up])).await?;
    assert_eq!(first(client.watched_repos("octo").await?), "up/watched/octo");
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_carry_the_last_remote_error() -> anyhow::Result<()> {
    let a = start(NamedTracker::down("a"), Codec::Json).await?;
    let b = start(NamedTracker::down("b"), Codec::Json).await?;
    let client = TrackerClient::with_discover(&config(), fixed(&[a, b])).await?;

    let err = client.starred_repos("octo").await.unwrap_err();
    assert_matches!(&err, ClientError::RetriesExhausted { attempts: 3, .. });
    // Attempts went a, b, a.
    assert_eq!(err.last_cause(), Some(&ClientError::RemoteOperation("a is down".into())));
    Ok(())
}

#[tokio::test]
async fn timeout_abandons_slow_server() -> anyhow::Result<()> {
    let slow = start(NamedTracker::slow("slow", Duration::from_secs(3)), Codec::Json).await?;
    let config = config().with_retry_timeout(Duration::from_millis(200));
    let client = TrackerClient::with_discover(&config, fixed(&[slow])).await?;

    let started = tokio::time::Instant::now();
    let err = client.watched_repos("octo").await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(err.last_cause(), Some(&ClientError::DeadlineExceeded(Duration::from_millis(200))));
    Ok(())
}

#[tokio::test]
async fn client_follows_registry_changes() -> anyhow::Result<()> {
    let a = start(NamedTracker::up("a"), Codec::Json).await?;
    let b = start(NamedTracker::up("b"), Codec::Json).await?;
    let registry = MemoryDiscover::new("trackerapi");
    registry.publish(vec![Arc::new(Instance::new(a))]);
    let client = TrackerClient::with_discover(&config(), registry.clone()).await?;
    assert_eq!(first(client.watched_repos("octo").await?), "a/watched/octo");

    registry.publish(vec![Arc::new(Instance::new(b))]);
    let only_b = vec![InstanceAddress::from(b)];
    eventually(|| client.watched_invoker().endpoints() == only_b && client.starred_invoker().endpoints() == only_b).await;
    for _ in 0..3 {
        assert_eq!(first(client.watched_repos("octo").await?), "b/watched/octo");
        assert_eq!(first(client.starred_repos("octo").await?), "b/starred/octo");
    }

    registry.mark_unavailable("registry restarting");
    eventually(|| !client.watched_invoker().registry_available()).await;
    assert_eq!(first(client.watched_repos("octo").await?), "b/watched/octo");

    client.shutdown();
    let err = client.watched_repos("octo").await.unwrap_err();
    assert_eq!(err.last_cause(), Some(&ClientError::NoEndpoints));
    Ok(())
}

#[tokio::test]
async fn startup_fails_when_registry_is_down() {
    let registry = MemoryDiscover::new("trackerapi");
    registry.mark_unavailable("connection refused");
    let result = TrackerClient::with_discover(&config(), registry).await;
    assert_matches!(result, Err(ClientError::Discover(_)));
}
