use std::net::SocketAddr;

use sluice_net::{OriginalDestination, original_destination};
use tokio::net::TcpStream;

use crate::error::ProxyError;

/// Recovers where an accepted connection was originally headed.
pub trait DestinationResolver: Send + Sync {
    fn resolve(&self, stream: &TcpStream) -> Result<OriginalDestination, ProxyError>;
}

/// Reads the netfilter `SO_ORIGINAL_DST` socket option.
#[derive(Debug, Default, Clone, Copy)]
pub struct SocketOriginalDst;

impl DestinationResolver for SocketOriginalDst {
    fn resolve(&self, stream: &TcpStream) -> Result<OriginalDestination, ProxyError> {
        original_destination(stream).map_err(|err| ProxyError::Destination(err.to_string()))
    }
}

/// Sends every connection to one address, for setups without redirection.
#[derive(Debug, Clone, Copy)]
pub struct FixedDestination(pub SocketAddr);

impl DestinationResolver for FixedDestination {
    fn resolve(&self, _stream: &TcpStream) -> Result<OriginalDestination, ProxyError> {
        Ok(OriginalDestination::new(self.0))
    }
}
