use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::EmpStream;

/// Connect to the Agent at `host:port` (blocking).
///
/// Every resolved address is tried in turn; the error of the last attempt
/// is reported when none accepts.
pub fn connect(host: &str, port: u16) -> Result<EmpStream> {
    connect_timeout(host, port, None)
}

/// Connect with an optional per-address connect timeout.
pub fn connect_timeout(host: &str, port: u16, timeout: Option<Duration>) -> Result<EmpStream> {
    let addr = format!("{host}:{port}");
    let candidates = resolve(host, port)?;

    let mut last_err = std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "address resolved to nothing",
    );
    for candidate in candidates {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&candidate, timeout),
            None => TcpStream::connect(candidate),
        };
        match attempt {
            Ok(stream) => {
                debug!(%candidate, "connected to agent");
                let stream = EmpStream::from_tcp(stream);
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(err) => {
                debug!(%candidate, error = %err, "connect attempt failed");
                last_err = err;
            }
        }
    }

    Err(TransportError::Connect {
        addr,
        source: last_err,
    })
}

fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    (host, port)
        .to_socket_addrs()
        .map(|addrs| addrs.collect())
        .map_err(|source| TransportError::Resolve {
            addr: format!("{host}:{port}"),
            source,
        })
}

/// Accepting side of the Agent socket.
///
/// Used by test doubles and the CLI mock agent; applications only ever
/// [`connect`].
pub struct AgentListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl AgentListener {
    /// Bind and listen on `host:port`. Port `0` picks an ephemeral port.
    pub fn bind(host: &str, port: u16) -> Result<Self> {
        let display = format!("{host}:{port}");
        let candidates = resolve(host, port)?;
        let listener = TcpListener::bind(&candidates[..]).map_err(|source| {
            TransportError::Bind {
                addr: display.clone(),
                source,
            }
        })?;
        let addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind {
                addr: display,
                source,
            })?;

        info!(%addr, "listening for emp connections");

        Ok(Self { listener, addr })
    }

    /// Bind on the IPv4 loopback interface.
    pub fn bind_loopback(port: u16) -> Result<Self> {
        Self::bind("127.0.0.1", port)
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<EmpStream> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(%peer, "accepted connection");
        let stream = EmpStream::from_tcp(stream);
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// The bound address (with the real port when bound to `0`).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp-loopback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn test_bind_accept_connect() {
        let listener = AgentListener::bind_loopback(0).unwrap();
        let port = listener.port();
        assert_ne!(port, 0);

        let handle = std::thread::spawn(move || {
            let mut client = connect("127.0.0.1", port).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.join().unwrap();
    }

    #[test]
    fn test_connect_refused_reports_address() {
        let port = {
            let listener = AgentListener::bind_loopback(0).unwrap();
            listener.port()
        };

        let err = connect("127.0.0.1", port).unwrap_err();
        match err {
            TransportError::Connect { addr, .. } => assert_eq!(addr, format!("127.0.0.1:{port}")),
            other => panic!("expected connect error, got {other:?}"),
        }
    }

    #[test]
    fn test_shutdown_unblocks_clone() {
        let listener = AgentListener::bind_loopback(0).unwrap();
        let port = listener.port();

        let client = connect("127.0.0.1", port).unwrap();
        let _server = listener.accept().unwrap();

        let mut reader = client.try_clone().unwrap();
        let blocked = std::thread::spawn(move || {
            let mut buf = [0u8; 1];
            reader.read(&mut buf)
        });

        client.shutdown().unwrap();
        let read = blocked.join().unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
    }
}
