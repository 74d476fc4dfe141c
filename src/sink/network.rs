//! Network sinks: newline-framed TCP and one-datagram-per-record UDP.
//!
//! Transport internals (reconnect policy, framing beyond newline, TLS) are
//! external concerns; these sinks connect lazily, write, and surface I/O
//! failures to the sink-error callback like any other sink.

use std::io::Write;
use std::net::{TcpStream, UdpSocket};

use parking_lot::Mutex;

use crate::error::{LogError, Result};

/// Lazily-connected TCP sink. A failed write drops the connection so the
/// next write reconnects.
pub struct TcpSink {
    addr: String,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpSink {
    pub fn new(addr: &str) -> TcpSink {
        TcpSink {
            addr: addr.to_string(),
            stream: Mutex::new(None),
        }
    }

    pub fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let mut guard = self.stream.lock();
        let mut stream = match guard.take() {
            Some(stream) => stream,
            None => {
                let stream =
                    TcpStream::connect(&self.addr).map_err(|e| LogError::sink_io(name, e))?;
                let _ = stream.set_nodelay(true);
                stream
            }
        };
        match stream.write_all(bytes) {
            Ok(()) => {
                *guard = Some(stream);
                Ok(())
            }
            // Drop the connection; the next write reconnects.
            Err(e) => Err(LogError::sink_io(name, e)),
        }
    }

    pub fn flush(&self, name: &str) -> Result<()> {
        if let Some(stream) = self.stream.lock().as_mut() {
            stream.flush().map_err(|e| LogError::sink_io(name, e))?;
        }
        Ok(())
    }
}

/// Connectionless UDP sink; each record is one datagram.
pub struct UdpSink {
    addr: String,
    socket: Mutex<Option<UdpSocket>>,
}

impl UdpSink {
    pub fn new(addr: &str) -> UdpSink {
        UdpSink {
            addr: addr.to_string(),
            socket: Mutex::new(None),
        }
    }

    pub fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let mut guard = self.socket.lock();
        let socket = match guard.take() {
            Some(socket) => socket,
            None => UdpSocket::bind("0.0.0.0:0").map_err(|e| LogError::sink_io(name, e))?,
        };
        let sent = socket.send_to(bytes, &self.addr);
        *guard = Some(socket);
        sent.map_err(|e| LogError::sink_io(name, e))?;
        Ok(())
    }

    pub fn flush(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}
