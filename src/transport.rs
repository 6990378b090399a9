//! Network selection, address resolution and socket tuning shared by the
//! listening and dialing sides.

use std::io::{Error as IoError, ErrorKind};
use std::net::SocketAddr;
use std::str::FromStr;

use log::debug;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{self, TcpStream};

use crate::config::Config;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    /// Any address family.
    Tcp,
    Tcp4,
    Tcp6,
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(network: &str) -> Result<Network> {
        match network {
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            other => Err(Error::UnsupportedNetwork(other.to_string())),
        }
    }
}

impl Network {
    fn admits(self, addr: &SocketAddr) -> bool {
        match self {
            Network::Tcp => true,
            Network::Tcp4 => addr.is_ipv4(),
            Network::Tcp6 => addr.is_ipv6(),
        }
    }

    /// Resolves `address` to the socket addresses of this network's family.
    pub async fn resolve(self, address: &str) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = net::lookup_host(address)
            .await?
            .filter(|addr| self.admits(addr))
            .collect();

        if addrs.is_empty() {
            return Err(IoError::new(ErrorKind::NotFound, format!("no {:?} address for {}", self, address)).into());
        }
        Ok(addrs)
    }
}

/// Disables Nagle coalescing and enables keep-alive probing on `stream`.
pub(crate) fn tune(stream: &TcpStream, config: &Config) -> Result<()> {
    stream.set_nodelay(true)?;

    let keepalive = TcpKeepalive::new().with_time(config.keep_alive);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)?;

    debug!(
        "tuned {:?}: nodelay, keep-alive after {:?}",
        stream.peer_addr().ok(),
        config.keep_alive
    );
    Ok(())
}
