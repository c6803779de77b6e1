//! Transport abstraction.
//!
//! The engine produces logical frames and consumes engine events; moving
//! them across a byte stream is the driver's job. A [`Transport`] is one
//! bidirectional, framed connection to the peer. Production would back it
//! with the protocol engine over TCP; the harness backs it with a
//! length-prefixed codec over a simulated network.

use std::io;

use async_trait::async_trait;
use linkflow_proto::Performative;

/// One framed connection to a peer.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Read the next frame from the peer.
    ///
    /// Returns `Ok(None)` once the peer closed the stream cleanly.
    async fn read_frame(&mut self) -> io::Result<Option<Performative>>;

    /// Queue a frame for the peer. It may sit in a buffer until
    /// [`Self::flush`].
    async fn write_frame(&mut self, frame: &Performative) -> io::Result<()>;

    /// Write out everything queued so far.
    async fn flush(&mut self) -> io::Result<()>;

    /// Tear the connection down. Reads on the peer's end then return
    /// `Ok(None)` or an error.
    async fn disconnect(&mut self) -> io::Result<()>;
}
