// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use clap::Parser;
use service::init_tracing;
use std::time::Duration;
use trackmesh::client::discover::FixedDiscover;
use trackmesh::config::{TrackerConfig, DEFAULT_REGISTRY_ADDRESS, DEFAULT_SERVICE_NAME};
use trackmesh::tracker::TrackerClient;
use trackmesh::transport::Codec;

#[derive(Parser)]
struct Flags {
    /// Sets the registry agent address.
    #[clap(long, default_value = DEFAULT_REGISTRY_ADDRESS)]
    registry: String,
    /// Sets the logical service name.
    #[clap(long, default_value = DEFAULT_SERVICE_NAME)]
    service: String,
    /// Sets a tag instances must carry; repeat for several. Defaults to `prod`.
    #[clap(long = "tag")]
    tags: Vec<String>,
    /// Also calls instances whose health checks fail.
    #[clap(long)]
    include_unhealthy: bool,
    /// Sets the attempts per call.
    #[clap(long, default_value_t = 3)]
    max_attempts: u32,
    /// Sets the budget of one call, e.g. `500ms` or `2s`.
    #[clap(long, default_value = "500ms", value_parser = humantime::parse_duration)]
    retry_timeout: Duration,
    /// Sets the pause between attempts.
    #[clap(long, default_value = "0s", value_parser = humantime::parse_duration)]
    backoff: Duration,
    /// Sets the wire codec: json or bincode.
    #[clap(long, default_value_t = Codec::Json)]
    codec: Codec,
    /// Calls these `host:port` instances instead of querying the registry; repeat for several.
    #[clap(long = "instance")]
    instances: Vec<String>,
    /// Lists starred instead of watched repositories.
    #[clap(long)]
    starred: bool,
    /// Sets the user to look up; empty means the authenticated viewer.
    #[clap(default_value = "")]
    username: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let flags = Flags::parse();
    init_tracing("Trackmesh Example Client")?;

    let mut config = TrackerConfig::new()
        .with_registry_address(flags.registry)
        .with_service_name(flags.service)
        .with_healthy_only(!flags.include_unhealthy)
        .with_max_attempts(flags.max_attempts)
        .with_retry_timeout(flags.retry_timeout)
        .with_backoff(flags.backoff)
        .with_codec(flags.codec);
    if !flags.tags.is_empty() {
        config = config.with_tags(flags.tags);
    }

    let client = if flags.instances.is_empty() {
        TrackerClient::connect(&config).await?
    } else {
        // Fixed instances carry no tags.
        let config = config.with_tags(Vec::<String>::new());
        TrackerClient::with_discover(&config, FixedDiscover::from_address_str(flags.instances)).await?
    };

    let repos = if flags.starred {
        client.starred_repos(flags.username).await
    } else {
        client.watched_repos(flags.username).await
    };
    client.shutdown();
    for repo in repos? {
        println!("{}", repo.full_name);
    }
    Ok(())
}
