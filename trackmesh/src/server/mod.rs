// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Server component.

use crate::tracker::RepoTracker;
use crate::transport::{tcp, Bincode, Codec, Json};
use futures::prelude::*;
use std::io;
use std::net::SocketAddr;
use tracing::{debug, info};

pub use core::*;

mod core {
    pub use ::tarpc::server::*;
}

/// TCP server config.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct TcpConfig {
    /// listen address.
    pub(crate) listen_address: SocketAddr,
    /// Wire codec, must match the clients.
    pub(crate) codec: Codec,
    /// Maximum frame length, default is usize::MAX.
    pub(crate) max_frame_len: usize,
    /// Controls the buffer size of the in-process channel over which a server's handlers send
    /// responses to the [`Channel`]. In other words, this is the number of responses that can sit
    /// in the outbound queue before request handlers begin blocking.
    /// Default is 100.
    pub(crate) pending_response_buffer: usize,
    /// How many connections are served at once.
    /// Default is 10, and zero means 10.
    pub(crate) buffer_unordered: usize,
}

impl TcpConfig {
    /// Create a new TCP config.
    pub fn new(listen_address: SocketAddr) -> Self {
        let server_config = Config::default();
        Self {
            listen_address,
            codec: Codec::default(),
            max_frame_len: usize::MAX,
            pending_response_buffer: server_config.pending_response_buffer,
            buffer_unordered: 10,
        }
    }
    /// listen address.
    pub fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }
    /// Set the wire codec.
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }
    /// Wire codec.
    pub fn codec(&self) -> Codec {
        self.codec
    }
    /// Set maximum frame length, default is usize::MAX.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = if max_frame_len == 0 { usize::MAX } else { max_frame_len };
        self
    }
    /// Maximum frame length, default is usize::MAX.
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
    /// Set the buffer size of the in-process channel over which a server's handlers send
    /// responses to the [`Channel`].
    /// Default is 100.
    pub fn with_pending_response_buffer(mut self, pending_response_buffer: usize) -> Self {
        self.pending_response_buffer = if pending_response_buffer == 0 { usize::MAX } else { pending_response_buffer };
        self
    }
    /// Buffer size of the in-process response channel.
    /// Default is 100.
    pub fn pending_response_buffer(&self) -> usize {
        self.pending_response_buffer
    }
    /// Set how many connections are served at once.
    /// Default is 10, and zero means 10.
    pub fn with_buffer_unordered(mut self, buffer_unordered: usize) -> Self {
        self.buffer_unordered = if buffer_unordered == 0 { 10 } else { buffer_unordered };
        self
    }
    /// How many connections are served at once.
    pub fn buffer_unordered(&self) -> usize {
        self.buffer_unordered
    }
}

/// Binds `config.listen_address` and serves `service` on every accepted connection in a
/// background task. Returns the bound address, useful when listening on port 0.
pub async fn spawn_tcp<T: RepoTracker>(service: T, config: TcpConfig) -> io::Result<SocketAddr> {
    // One arm per codec: the transport type depends on it.
    macro_rules! serve_with {
        ($format:ident) => {{
            let mut listener = tcp::listen(config.listen_address(), $format::default).await?;
            listener.config_mut().max_frame_length(config.max_frame_len());
            let local_addr = listener.local_addr();
            let serve = service.serve();
            let pending_response_buffer = config.pending_response_buffer();
            let accept = listener
                // Ignore accept errors.
                .filter_map(|r| future::ready(r.ok()))
                .map(move |transport| {
                    debug!("[TRACKMESH] accepted connection");
                    BaseChannel::new(Config { pending_response_buffer }, transport)
                })
                .map(move |channel| {
                    channel.execute(serve.clone()).for_each(|fut| async {
                        tokio::spawn(fut);
                    })
                })
                .buffer_unordered(config.buffer_unordered())
                .for_each(|_| async {});
            tokio::spawn(accept);
            local_addr
        }};
    }

    let local_addr = match config.codec() {
        Codec::Json => serve_with!(Json),
        Codec::Bincode => serve_with!(Bincode),
    };
    info!("[TRACKMESH] Listening on {local_addr} ({})", config.codec());
    Ok(local_addr)
}

/// Serves `service` until the process stops.
pub async fn serve_tcp<T: RepoTracker>(service: T, config: TcpConfig) -> io::Result<()> {
    spawn_tcp(service, config).await?;
    future::pending::<()>().await;
    Ok(())
}
