// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use service::CatalogTracker;
use tokio::process::Command;
use trackmesh::server::{spawn_tcp, TcpConfig};

fn client() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_client"));
    command.args(["--max-attempts", "1", "--retry-timeout", "2s"]);
    command
}

#[tokio::test]
async fn prints_repositories() -> anyhow::Result<()> {
    let addr = spawn_tcp(CatalogTracker::demo("andeya"), TcpConfig::new(([127, 0, 0, 1], 0).into())).await?;
    let output = client().args(["--instance", &addr.to_string(), "--starred"]).output().await?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(!output.stdout.is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_call_exits_non_zero() -> anyhow::Result<()> {
    let closed = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?;
    let output = client().args(["--instance", &closed.to_string(), "octocat"]).output().await?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error"));
    Ok(())
}
