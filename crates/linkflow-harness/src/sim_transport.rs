//! Framed transport over Turmoil's simulated TCP.
//!
//! Frames travel as length-prefixed CBOR documents
//! ([`linkflow_proto::frame`]). Writes are buffered until `flush`, matching
//! the engine's `SendFrame`* then `Flush` action pattern.

use std::io;

use async_trait::async_trait;
use bytes::BytesMut;
use linkflow_core::Transport;
use linkflow_proto::{Performative, frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::trace;
use turmoil::net::{TcpListener, TcpStream};

/// One simulated, framed connection.
pub struct SimTransport {
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl SimTransport {
    /// Wrap an established stream.
    pub fn new(stream: TcpStream) -> Self {
        Self { stream, read_buf: BytesMut::new(), write_buf: BytesMut::new() }
    }

    /// Connect to `addr` (`"host:port"`) inside the simulation.
    pub async fn connect(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::new(stream))
    }

    /// Bind a listener inside the simulation.
    pub async fn bind(addr: &str) -> io::Result<TcpListener> {
        TcpListener::bind(addr).await
    }

    /// Accept the next connection on `listener`.
    pub async fn accept(listener: &TcpListener) -> io::Result<Self> {
        let (stream, peer) = listener.accept().await?;
        trace!(%peer, "accepted simulated connection");
        Ok(Self::new(stream))
    }
}

fn invalid_data(err: linkflow_proto::ProtocolError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[async_trait]
impl Transport for SimTransport {
    async fn read_frame(&mut self) -> io::Result<Option<Performative>> {
        loop {
            if let Some(frame) = frame::decode(&mut self.read_buf).map_err(invalid_data)? {
                return Ok(Some(frame));
            }

            let read = self.stream.read_buf(&mut self.read_buf).await?;
            if read == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed inside a frame",
                ));
            }
        }
    }

    async fn write_frame(&mut self, frame: &Performative) -> io::Result<()> {
        frame::encode(frame, &mut self.write_buf).map_err(invalid_data)
    }

    async fn flush(&mut self) -> io::Result<()> {
        if !self.write_buf.is_empty() {
            self.stream.write_all(&self.write_buf).await?;
            self.write_buf.clear();
        }
        self.stream.flush().await
    }

    async fn disconnect(&mut self) -> io::Result<()> {
        self.write_buf.clear();
        self.stream.shutdown().await
    }
}
