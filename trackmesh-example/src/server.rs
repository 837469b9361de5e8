// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use clap::Parser;
use service::{init_tracing, CatalogTracker};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use trackmesh::server::TcpConfig;
use trackmesh::tracker::RepoTracker;
use trackmesh::transport::Codec;

#[derive(Parser)]
struct Flags {
    /// Sets the port number to listen on.
    #[clap(long)]
    port: u16,
    /// Sets the wire codec: json or bincode.
    #[clap(long, default_value_t = Codec::Json)]
    codec: Codec,
    /// Sets the user answering for an empty username.
    #[clap(long, default_value = "andeya")]
    viewer: String,
    /// Fails every call, to watch clients fail over.
    #[clap(long)]
    unavailable: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let flags = Flags::parse();
    init_tracing("Trackmesh Example Server")?;

    let tracker = CatalogTracker::demo(&flags.viewer).with_unavailable(flags.unavailable).with_logging();
    let config = TcpConfig::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), flags.port)).with_codec(flags.codec);
    let local_addr = trackmesh::server::spawn_tcp(tracker, config).await?;
    tracing::info!("serving the tracker on {local_addr}, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}
