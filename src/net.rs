//! Async feed adapter.
//!
//! [`EventReader`] owns the read buffer for one connection: it pulls bytes
//! from any [`AsyncRead`] transport and drives a [`Decoder`], so callers
//! see a stream of decode events instead of raw reads. The decoder stays
//! the framing authority; this module never inspects message bytes.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::decoder::{DecodeEvent, Decoder};
use crate::error::{Error, IcapResult};

const READ_CHUNK: usize = 8 * 1024;

/// Reads a transport and yields decode events for one connection.
#[derive(Debug)]
pub struct EventReader<S> {
    io: S,
    buf: Vec<u8>,
    decoder: Decoder,
}

impl<S> EventReader<S>
where
    S: AsyncRead + Unpin,
{
    pub fn new(io: S, decoder: Decoder) -> Self {
        Self {
            io,
            buf: Vec::with_capacity(2 * READ_CHUNK),
            decoder,
        }
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn decoder_mut(&mut self) -> &mut Decoder {
        &mut self.decoder
    }

    /// Give back the transport, dropping any buffered bytes.
    pub fn into_inner(self) -> S {
        self.io
    }

    /// Next decode event, reading from the transport whenever the decoder
    /// asks for more bytes.
    ///
    /// Returns `Ok(None)` on a clean close (EOF while the decoder is idle
    /// between messages); EOF mid-message is [`Error::EarlyClose`].
    pub async fn next_event(&mut self) -> IcapResult<Option<DecodeEvent>> {
        loop {
            match self.decoder.decode(&mut self.buf)? {
                DecodeEvent::NeedMore => {
                    let mut tmp = [0u8; READ_CHUNK];
                    let n = self.io.read(&mut tmp).await?;
                    if n == 0 {
                        if self.decoder.is_idle() && self.buf.is_empty() {
                            return Ok(None);
                        }
                        return Err(Error::EarlyClose);
                    }
                    trace!(n, "fed decoder from transport");
                    self.buf.extend_from_slice(&tmp[..n]);
                }
                event => return Ok(Some(event)),
            }
        }
    }
}
