use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("cannot resolve {endpoint}: {source}")]
    Resolve { endpoint: String, source: io::Error },

    #[error("cannot resolve {endpoint}: no IPv4 stream address")]
    NoAddress { endpoint: String },

    #[error("cannot connect to {endpoint}: {source}")]
    Connect { endpoint: String, source: io::Error },
}

/// Resolves `hostname`/`port` and returns a connected stream socket.
///
/// Only IPv4 addresses are considered. They are tried in resolver order and the
/// first one that accepts the connection wins; if none does, the last connect
/// error is reported.
pub fn resolve(hostname: &str, port: &str) -> Result<TcpStream, EndpointError> {
    let endpoint = format!("{}:{}", hostname, port);

    let addrs: Vec<SocketAddr> = endpoint
        .to_socket_addrs()
        .map_err(|source| EndpointError::Resolve {
            endpoint: endpoint.clone(),
            source,
        })?
        .filter(|addr| addr.is_ipv4())
        .collect();

    let mut last_error = None;
    for addr in &addrs {
        match TcpStream::connect(addr) {
            Ok(stream) => {
                debug!(%addr, "connected network endpoint");
                return Ok(stream);
            }
            Err(error) => {
                debug!(%addr, %error, "connect attempt failed");
                last_error = Some(error);
            }
        }
    }

    let Some(source) = last_error else {
        return Err(EndpointError::NoAddress { endpoint });
    };

    return Err(EndpointError::Connect { endpoint, source });
}
