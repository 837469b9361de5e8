// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! trackmesh turns a logical service name into a resilient callable operation.
//!
//! A [`client::ResilientInvoker`] composes four independently swappable parts:
//!
//! * a [`client::discover::Discover`] registry adapter feeding a live [`client::discover::InstanceSet`],
//! * a [`client::channel::Factory`] building one endpoint per instance, cached in an [`client::cache::EndpointCache`],
//! * a [`client::balance::LoadBalance`] policy picking one endpoint per attempt,
//! * a [`client::retry::Retry`] executor bounding attempts and elapsed time.
//!
//! [`tracker`] binds that machinery to the repository tracker protocol served over tarpc.
#![deny(missing_docs)]
#![allow(clippy::type_complexity)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod component;
pub mod config;
pub mod net;
pub mod server;
pub mod tracker;
pub mod transport;

pub use crate::tarpc::*;

mod tarpc {
    pub use ::tarpc::{context, RequestName, ServerError};
}
