// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Length-delimited TCP transports with a selectable serde codec.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::io;
use std::str::FromStr;
use tokio::net::ToSocketAddrs;

pub use ::tarpc::serde_transport::tcp;
pub use ::tokio_serde::formats::{Bincode, Json};

/// Transport serde codec.
///
/// Both peers must agree on it; there is no negotiation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Codec {
    /// JSON codec using [serde_json](https://docs.rs/serde_json) crate.
    #[default]
    Json,
    /// Bincode codec using [bincode](https://docs.rs/bincode) crate.
    Bincode,
}

impl Codec {
    /// Lower-case codec name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::Json => "json",
            Codec::Bincode => "bincode",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Codec::Json),
            "bincode" => Ok(Codec::Bincode),
            other => Err(format!("unknown codec {other:?}, expected json or bincode")),
        }
    }
}

/// Dials `address` and spawns a tarpc client dispatch over the connection.
///
/// `max_frame_len` of zero means unlimited.
pub async fn connect<A, Req, Resp>(address: A, codec: Codec, max_frame_len: usize, config: ::tarpc::client::Config) -> io::Result<::tarpc::client::Channel<Req, Resp>>
where
    A: ToSocketAddrs,
    Req: Serialize + Send + 'static,
    Resp: DeserializeOwned + Send + 'static,
{
    let max_frame_len = if max_frame_len == 0 { usize::MAX } else { max_frame_len };
    match codec {
        Codec::Json => {
            let mut conn = tcp::connect(address, Json::default);
            conn.config_mut().max_frame_length(max_frame_len);
            Ok(::tarpc::client::new(config, conn.await?).spawn())
        },
        Codec::Bincode => {
            let mut conn = tcp::connect(address, Bincode::default);
            conn.config_mut().max_frame_length(max_frame_len);
            Ok(::tarpc::client::new(config, conn.await?).spawn())
        },
    }
}
