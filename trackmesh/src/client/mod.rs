// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Provides a client that discovers instances, balances across them and retries failed calls.

pub mod balance;
pub mod cache;
pub mod channel;
pub mod discover;
pub mod invoker;
pub mod retry;

pub use invoker::{Builder, ResilientInvoker};

use crate::net::InstanceAddress;
use faststr::FastStr;
use std::time::Duration;

/// Errors produced while locating, balancing across and calling instances.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The endpoint pool is currently empty.
    #[error("No endpoints available")]
    NoEndpoints,
    /// The factory could not build an endpoint for one address.
    #[error("Endpoint construction failed for {address}: {reason}")]
    EndpointConstruction {
        /// The address that was excluded from the pool.
        address: InstanceAddress,
        /// Why construction failed.
        reason: FastStr,
    },
    /// The called instance reported an application-level failure.
    #[error("Remote operation failed: {0}")]
    RemoteOperation(FastStr),
    /// Could not reach the instance or exchange frames with it.
    #[error("Transport failed: {0}")]
    Transport(FastStr),
    /// The overall retry budget ran out while an attempt was in flight.
    #[error("Deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
    /// Every attempt failed; carries the last underlying cause.
    #[error("Retries exhausted after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        /// How many attempts were started.
        attempts: u32,
        /// The most recent failure.
        source: Box<ClientError>,
    },
    /// Service discovery failed.
    #[error("Service discovery failed: {0}")]
    Discover(FastStr),
}

impl ClientError {
    /// Returns the last underlying cause when this is [`ClientError::RetriesExhausted`].
    pub fn last_cause(&self) -> Option<&ClientError> {
        match self {
            ClientError::RetriesExhausted { source, .. } => Some(source),
            _ => None,
        }
    }
}
