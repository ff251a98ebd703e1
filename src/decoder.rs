//! Incremental ICAP message decoder.
//!
//! [`Decoder`] is a push decoder: the caller owns a growable byte buffer,
//! appends whatever the transport delivered, and calls [`Decoder::decode`]
//! until it returns [`DecodeEvent::NeedMore`]. The decoder consumes
//! committed bytes by draining them from the front of the buffer; when a
//! logical unit (a line, a header block, a section window, a chunk) is
//! incomplete, nothing is drained and the unit replays from its start on
//! the next call. That makes suspension a first-class value rather than
//! hidden control flow, and the decoder never keeps a reference into the
//! buffer across calls.
//!
//! One decoder serves one connection. Messages stream out as a head event
//! followed by zero or more body chunks, the optional preview boundary,
//! and an end-of-message marker.

mod buffer;
mod chunk;
mod http_embed;

use tracing::{debug, trace, warn};

use crate::encapsulated::{Encapsulated, SectionKind};
use crate::error::{Error, IcapResult};
use crate::message::IcapMessage;

use buffer::{ByteCursor, SizeDelimiter};
use chunk::Chunk;

/// Default cap on the ICAP initial line, terminator excluded.
pub const DEFAULT_MAX_INITIAL_LINE_LEN: usize = 4096;
/// Default cap on the aggregate size of one header block.
pub const DEFAULT_MAX_ICAP_HEADER_SIZE: usize = 8192;
/// Default cap on a single body-chunk payload.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 8192;

/// Size limits enforced by one decoder instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Bytes allowed in the initial line, excluding the CRLF.
    pub max_initial_line_len: usize,
    /// Cumulative bytes allowed in one header block (also bounds each
    /// embedded HTTP header window and the body trailer block).
    pub max_icap_header_size: usize,
    /// Payload bytes allowed in a single body chunk; 0 forbids bodies.
    pub max_chunk_size: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_initial_line_len: DEFAULT_MAX_INITIAL_LINE_LEN,
            max_icap_header_size: DEFAULT_MAX_ICAP_HEADER_SIZE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
        }
    }
}

/// Factory invoked exactly once per message, right after the initial line
/// splits into three tokens. It validates the tokens and produces the
/// message the decoder will populate; rejection is fatal for the message.
pub type MessageFactory = Box<dyn FnMut(&[&str; 3]) -> IcapResult<IcapMessage> + Send>;

/// One step of decoder output.
#[derive(Debug)]
pub enum DecodeEvent {
    /// The buffer ends mid-unit; append more bytes and call again.
    NeedMore,
    /// Initial line, ICAP headers and embedded HTTP heads are complete.
    /// Ownership of the message transfers to the caller.
    Head(IcapMessage),
    /// One body chunk payload, in wire order.
    Chunk(Vec<u8>),
    /// The preview part of the body is complete. Whether more chunks
    /// follow depends on the terminator: after `0; ieof` the next event is
    /// end-of-message; after a plain zero chunk the decoder streams
    /// whatever continuation chunks arrive.
    PreviewComplete,
    /// The message is fully decoded and the decoder has reset.
    EndOfMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SkipControlChars,
    ReadIcapInitial,
    ReadIcapHeader,
    ReadHttpRequestHeader,
    ReadHttpResponseHeader,
    ReadHttpBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyPhase {
    /// Streaming chunks; `preview` is true until the announced preview's
    /// terminator has been seen.
    Chunks { preview: bool },
    /// Zero chunk seen; consuming trailer lines up to the blank line.
    Trailers { preview: bool, ieof: bool },
    /// Nothing left on the wire; emit end-of-message on the next call.
    AwaitEnd,
}

/// Resumable ICAP message decoder. See the module docs for the calling
/// convention.
pub struct Decoder {
    config: DecoderConfig,
    is_request: bool,
    factory: MessageFactory,
    state: State,
    message: Option<IcapMessage>,
    /// Kept past head emission, which surrenders the message itself.
    encapsulated: Option<Encapsulated>,
    preview: Option<usize>,
    body_phase: BodyPhase,
    failed: Option<Error>,
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("config", &self.config)
            .field("is_request", &self.is_request)
            .field("state", &self.state)
            .field("body_phase", &self.body_phase)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

impl Decoder {
    /// Decoder for ICAP requests, using the default request-line factory.
    pub fn request(config: DecoderConfig) -> IcapResult<Self> {
        Self::with_factory(config, true, Box::new(IcapMessage::from_request_line))
    }

    /// Decoder for ICAP responses, using the default status-line factory.
    pub fn response(config: DecoderConfig) -> IcapResult<Self> {
        Self::with_factory(config, false, Box::new(IcapMessage::from_status_line))
    }

    /// Decoder with a caller-supplied message factory.
    pub fn with_factory(
        config: DecoderConfig,
        is_request: bool,
        factory: MessageFactory,
    ) -> IcapResult<Self> {
        if config.max_initial_line_len == 0 {
            return Err(Error::configuration("max_initial_line_len must be positive"));
        }
        if config.max_icap_header_size == 0 {
            return Err(Error::configuration("max_icap_header_size must be positive"));
        }
        Ok(Self {
            config,
            is_request,
            factory,
            state: State::SkipControlChars,
            message: None,
            encapsulated: None,
            preview: None,
            body_phase: BodyPhase::AwaitEnd,
            failed: None,
        })
    }

    /// Fixed at construction: whether this instance decodes requests.
    pub fn is_decoding_request(&self) -> bool {
        self.is_request
    }

    pub fn config(&self) -> DecoderConfig {
        self.config
    }

    /// No message in progress and no latched error.
    pub fn is_idle(&self) -> bool {
        self.state == State::SkipControlChars && self.message.is_none() && self.failed.is_none()
    }

    /// Acknowledge a fatal error, or abandon the message in progress, and
    /// return to scanning for the next initial line. Bytes already in the
    /// caller's buffer are untouched.
    pub fn reset(&mut self) {
        self.failed = None;
        self.reset_after_message();
    }

    /// Advance the decode by at most one emission.
    ///
    /// A fatal parse error is latched: every subsequent call returns the
    /// same error until [`Decoder::reset`] acknowledges it.
    pub fn decode(&mut self, buf: &mut Vec<u8>) -> IcapResult<DecodeEvent> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        loop {
            trace!(state = ?self.state, buffered = buf.len(), "decode step");
            match self.state {
                State::SkipControlChars => {
                    let mut cur = ByteCursor::new(buf);
                    let found = buffer::skip_control_chars(&mut cur);
                    let skipped = cur.pos();
                    buf.drain(..skipped);
                    if !found {
                        return Ok(DecodeEvent::NeedMore);
                    }
                    self.state = State::ReadIcapInitial;
                }
                State::ReadIcapInitial => {
                    let mut cur = ByteCursor::new(buf);
                    let line = match buffer::read_line(&mut cur, self.config.max_initial_line_len)
                    {
                        Ok(Some(line)) => line,
                        Ok(None) => return Ok(DecodeEvent::NeedMore),
                        Err(err) => return Err(self.fail(err)),
                    };
                    let consumed = cur.pos();
                    buf.drain(..consumed);
                    let Some(tokens) = buffer::split_initial_line(&line) else {
                        // tolerant re-sync: stray bytes between messages
                        // never kill the stream
                        warn!(line = %line, "discarding unparseable initial line");
                        self.state = State::SkipControlChars;
                        continue;
                    };
                    let message = match (self.factory)(&tokens) {
                        Ok(message) => message,
                        Err(err) => return Err(self.fail(err)),
                    };
                    debug!(line = %line, "accepted initial line");
                    self.message = Some(message);
                    self.state = State::ReadIcapHeader;
                }
                State::ReadIcapHeader => {
                    match self.read_icap_headers(buf) {
                        Ok(Some(consumed)) => buf.drain(..consumed),
                        Ok(None) => return Ok(DecodeEvent::NeedMore),
                        Err(err) => return Err(self.fail(err)),
                    };
                    if self.descriptor_has(SectionKind::ReqHdr) {
                        self.state = State::ReadHttpRequestHeader;
                    } else if self.descriptor_has(SectionKind::ResHdr) {
                        self.state = State::ReadHttpResponseHeader;
                    } else {
                        return self.emit_head();
                    }
                }
                State::ReadHttpRequestHeader => {
                    match self.read_embedded_head(buf, SectionKind::ReqHdr) {
                        Ok(Some(consumed)) => buf.drain(..consumed),
                        Ok(None) => return Ok(DecodeEvent::NeedMore),
                        Err(err) => return Err(self.fail(err)),
                    };
                    if self.descriptor_has(SectionKind::ResHdr) {
                        self.state = State::ReadHttpResponseHeader;
                    } else {
                        return self.emit_head();
                    }
                }
                State::ReadHttpResponseHeader => {
                    match self.read_embedded_head(buf, SectionKind::ResHdr) {
                        Ok(Some(consumed)) => buf.drain(..consumed),
                        Ok(None) => return Ok(DecodeEvent::NeedMore),
                        Err(err) => return Err(self.fail(err)),
                    };
                    return self.emit_head();
                }
                State::ReadHttpBody => match self.body_phase {
                    BodyPhase::Chunks { preview } => {
                        let mut cur = ByteCursor::new(buf);
                        match chunk::read_chunk(&mut cur, self.config.max_chunk_size) {
                            Ok(None) => return Ok(DecodeEvent::NeedMore),
                            Ok(Some(Chunk::Data(payload))) => {
                                let consumed = cur.pos();
                                buf.drain(..consumed);
                                trace!(len = payload.len(), "body chunk");
                                return Ok(DecodeEvent::Chunk(payload));
                            }
                            Ok(Some(Chunk::Terminator { ieof })) => {
                                let consumed = cur.pos();
                                buf.drain(..consumed);
                                self.body_phase = BodyPhase::Trailers { preview, ieof };
                            }
                            Err(err) => return Err(self.fail(err)),
                        }
                    }
                    BodyPhase::Trailers { preview, ieof } => {
                        match self.read_trailers(buf) {
                            Ok(Some(consumed)) => buf.drain(..consumed),
                            Ok(None) => return Ok(DecodeEvent::NeedMore),
                            Err(err) => return Err(self.fail(err)),
                        };
                        if preview {
                            debug!(ieof, "preview complete");
                            self.body_phase = if ieof {
                                BodyPhase::AwaitEnd
                            } else {
                                BodyPhase::Chunks { preview: false }
                            };
                            return Ok(DecodeEvent::PreviewComplete);
                        }
                        self.reset_after_message();
                        return Ok(DecodeEvent::EndOfMessage);
                    }
                    BodyPhase::AwaitEnd => {
                        self.reset_after_message();
                        return Ok(DecodeEvent::EndOfMessage);
                    }
                },
            }
        }
    }

    /// Read the whole ICAP header block as one replay unit. On success,
    /// validates the mandatory headers, attaches the `Encapsulated`
    /// descriptor and returns the bytes to commit.
    fn read_icap_headers(&mut self, buf: &[u8]) -> IcapResult<Option<usize>> {
        let Some(message) = self.message.as_mut() else {
            return Err(Error::unknown("no message while reading headers"));
        };
        let mut cur = ByteCursor::new(buf);
        let mut delimiter = SizeDelimiter::new(self.config.max_icap_header_size);
        // a replayed block starts over, so never keep earlier values
        message.clear_headers();
        let complete =
            buffer::read_header_block(&mut cur, &mut delimiter, |name, value| {
                message.add_header(name, value)
            })?;
        if !complete {
            return Ok(None);
        }
        if !message.contains_header("Host") {
            return Err(Error::MissingMandatoryHeader("Host"));
        }
        if !message.contains_header("Encapsulated") {
            return Err(Error::MissingMandatoryHeader("Encapsulated"));
        }
        if message.header_values("Encapsulated").count() > 1 {
            return Err(Error::encapsulated("duplicate Encapsulated header"));
        }
        let raw = message
            .header("Encapsulated")
            .map(str::to_owned)
            .ok_or_else(|| Error::encapsulated("unreadable Encapsulated header"))?;
        let descriptor = Encapsulated::parse(message.method(), &raw)?;
        debug!(encapsulated = %descriptor, "parsed section descriptor");
        self.preview = if self.is_request {
            message.preview_size()
        } else {
            None
        };
        message.set_encapsulated(descriptor.clone());
        self.encapsulated = Some(descriptor);
        Ok(Some(cur.pos()))
    }

    /// Read one embedded HTTP head. Its window length comes from the
    /// descriptor offsets; the full window is one replay unit.
    fn read_embedded_head(&mut self, buf: &[u8], kind: SectionKind) -> IcapResult<Option<usize>> {
        let Some(descriptor) = self.encapsulated.as_ref() else {
            return Err(Error::unknown("no descriptor while reading a section"));
        };
        let Some(window_len) = descriptor.section_len(kind) else {
            return Err(Error::encapsulated(format!("no window for {kind} section")));
        };
        if window_len > self.config.max_icap_header_size {
            return Err(Error::frame_too_long(format!(
                "{kind} section of {window_len} bytes exceeds the {} byte cap",
                self.config.max_icap_header_size
            )));
        }
        if buf.len() < window_len {
            return Ok(None);
        }
        let window = &buf[..window_len];
        let Some(message) = self.message.as_mut() else {
            return Err(Error::unknown("no message while reading a section"));
        };
        match kind {
            SectionKind::ReqHdr => {
                message.set_http_request(http_embed::parse_request_head(window)?);
            }
            SectionKind::ResHdr => {
                message.set_http_response(http_embed::parse_response_head(window)?);
            }
            other => {
                return Err(Error::unknown(format!("{other} is not a header section")));
            }
        }
        trace!(%kind, window_len, "embedded head attached");
        Ok(Some(window_len))
    }

    /// Consume trailer lines after a zero chunk, up to the blank line.
    /// Trailers are discarded; the head was surrendered long ago.
    fn read_trailers(&self, buf: &[u8]) -> IcapResult<Option<usize>> {
        let mut cur = ByteCursor::new(buf);
        let mut delimiter = SizeDelimiter::new(self.config.max_icap_header_size);
        loop {
            let Some(line) = buffer::read_header_line(&mut cur, &mut delimiter)? else {
                return Ok(None);
            };
            if line.is_empty() {
                return Ok(Some(cur.pos()));
            }
            trace!(trailer = %line, "discarding body trailer");
        }
    }

    /// Surrender the head and move on to the body (or straight to the
    /// end-of-message emission when no body follows).
    fn emit_head(&mut self) -> IcapResult<DecodeEvent> {
        let message = self
            .message
            .take()
            .ok_or_else(|| Error::unknown("no message at head emission"))?;
        let has_body = self.encapsulated.as_ref().is_some_and(Encapsulated::has_body);
        self.body_phase = if has_body {
            BodyPhase::Chunks {
                preview: self.preview.is_some(),
            }
        } else {
            BodyPhase::AwaitEnd
        };
        self.state = State::ReadHttpBody;
        debug!(has_body, preview = ?self.preview, "message head complete");
        Ok(DecodeEvent::Head(message))
    }

    fn descriptor_has(&self, kind: SectionKind) -> bool {
        self.encapsulated
            .as_ref()
            .is_some_and(|descriptor| descriptor.contains(kind))
    }

    fn fail(&mut self, err: Error) -> Error {
        debug!(%err, "decode failed");
        self.failed = Some(err.clone());
        err
    }

    fn reset_after_message(&mut self) {
        self.state = State::SkipControlChars;
        self.message = None;
        self.encapsulated = None;
        self.preview = None;
        self.body_phase = BodyPhase::AwaitEnd;
    }
}
