// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! The service descriptor identifies which registry instances belong to a pool.

use faststr::FastStr;
use std::collections::HashSet;

/// `ServiceDescriptor` names a logical service and the filter its instances must pass.
///
/// It is created once when an invoker is built and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// `name` is the most important information, which is used by the service discovering.
    pub name: FastStr,
    /// Every instance in the pool must carry all of these tags.
    pub tags: HashSet<FastStr>,
    /// Only admit instances whose last health check passed.
    pub healthy_only: bool,
}

impl ServiceDescriptor {
    /// Creates a descriptor with no required tags that admits healthy instances only.
    #[inline]
    pub fn new(name: impl Into<FastStr>) -> Self {
        Self {
            name: name.into(),
            tags: HashSet::new(),
            healthy_only: true,
        }
    }

    /// Adds a required tag.
    pub fn with_tag(mut self, tag: impl Into<FastStr>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Replaces the required tags.
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<FastStr>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Sets whether unhealthy instances are filtered out.
    pub fn with_healthy_only(mut self, healthy_only: bool) -> Self {
        self.healthy_only = healthy_only;
        self
    }

    /// Create descriptor key, used to tag discovery events.
    #[inline]
    pub fn key(&self) -> FastStr {
        self.name.clone()
    }

    /// Gets the service name.
    #[inline]
    pub fn name_ref(&self) -> &str {
        &self.name
    }
}
