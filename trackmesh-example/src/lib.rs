// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use trackmesh::context;
use trackmesh::tracker::{RepoInfo, RepoTracker};
use tracing_subscriber::{fmt, EnvFilter};

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, `info` by default.
pub fn init_tracing(service_name: &'static str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).try_init().map_err(|e| anyhow::anyhow!("{service_name}: {e}"))?;
    tracing::info!("{service_name} starting");
    Ok(())
}

#[derive(Debug, Default)]
struct UserRepos {
    watched: Vec<RepoInfo>,
    starred: Vec<RepoInfo>,
}

/// An in-memory tracker serving a fixed catalog.
#[derive(Clone, Debug)]
pub struct CatalogTracker {
    viewer: Arc<str>,
    users: Arc<HashMap<String, UserRepos>>,
    unavailable: bool,
}

impl CatalogTracker {
    /// A catalog with a few demo users; `viewer` answers for the empty username.
    pub fn demo(viewer: &str) -> Self {
        let repos = |names: &[&str]| names.iter().map(|n| RepoInfo::new(*n)).collect::<Vec<_>>();
        let mut users = HashMap::new();
        users.insert(
            "andeya".to_owned(),
            UserRepos {
                watched: repos(&["andeya/logimesh", "andeya/trackmesh"]),
                starred: repos(&["google/tarpc", "tokio-rs/tokio"]),
            },
        );
        users.insert(
            "octocat".to_owned(),
            UserRepos {
                watched: repos(&["octocat/Hello-World"]),
                starred: repos(&["octocat/Spoon-Knife", "rust-lang/rust"]),
            },
        );
        Self {
            viewer: viewer.into(),
            users: Arc::new(users),
            unavailable: false,
        }
    }

    /// Makes every call fail, to watch clients fail over.
    pub fn with_unavailable(mut self, unavailable: bool) -> Self {
        self.unavailable = unavailable;
        self
    }

    fn lookup(&self, username: &str, pick: fn(&UserRepos) -> &Vec<RepoInfo>) -> Result<Vec<RepoInfo>, String> {
        if self.unavailable {
            return Err("tracker temporarily unavailable".to_owned());
        }
        let username = if username.is_empty() { &*self.viewer } else { username };
        self.users
            .get(username)
            .map(|user| pick(user).clone())
            .ok_or_else(|| format!("unknown user {username:?}"))
    }
}

impl RepoTracker for CatalogTracker {
    fn watched_repos(self, _: context::Context, username: String) -> impl Future<Output = Result<Vec<RepoInfo>, String>> + Send {
        let result = self.lookup(&username, |u| &u.watched);
        async move { result }
    }

    fn starred_repos(self, _: context::Context, username: String) -> impl Future<Output = Result<Vec<RepoInfo>, String>> + Send {
        let result = self.lookup(&username, |u| &u.starred);
        async move { result }
    }
}
