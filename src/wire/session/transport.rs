use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

pub struct Connection {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

/// Opens transport connections for a session. Reads on the returned
/// reader must time out periodically so the receive loop can notice stop
/// requests.
pub trait Connector: Send {
    fn connect(&self) -> io::Result<Connection>;
}

/// Plain TCP connector. With several broker addresses they are tried in
/// order on every connect, first success wins.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    addresses: Vec<String>,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>, connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self::failover(vec![address.into()], connect_timeout, read_timeout)
    }

    pub fn failover(addresses: Vec<String>, connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            addresses,
            connect_timeout,
            read_timeout,
        }
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    fn connect_to(&self, address: &str) -> io::Result<Connection> {
        let mut last_error = None;
        for socket_addr in address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&socket_addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(Some(self.read_timeout))?;
                    let writer = stream.try_clone()?;
                    return Ok(Connection {
                        reader: Box::new(stream),
                        writer: Box::new(writer),
                    });
                }
                Err(error) => last_error = Some(error),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("'{address}' did not resolve to any address"),
            )
        }))
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> io::Result<Connection> {
        let mut last_error = None;
        for address in &self.addresses {
            match self.connect_to(address) {
                Ok(connection) => return Ok(connection),
                Err(error) => {
                    debug!(address = %address, %error, "Broker connection attempt failed");
                    last_error = Some(error);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no broker addresses configured")))
    }
}
