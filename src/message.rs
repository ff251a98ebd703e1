//! ICAP message model.
//!
//! [`IcapMessage`] is the mutable builder the decoder populates while it
//! owns the parse: initial line, ICAP headers, the `Encapsulated`
//! descriptor and the embedded HTTP heads. Ownership transfers to the
//! caller when the decoder emits the head event.

use std::borrow::Cow;
use std::fmt;
use std::fmt::Write as _;

use http::{HeaderMap, HeaderName, HeaderValue};

use crate::encapsulated::Encapsulated;
use crate::error::{Error, IcapResult};

/// ICAP request methods (RFC 3507 section 4.3.2), open for extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Options,
    ReqMod,
    RespMod,
    Extension(String),
}

impl Method {
    /// Wire name of the method.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Options => "OPTIONS",
            Method::ReqMod => "REQMOD",
            Method::RespMod => "RESPMOD",
            Method::Extension(name) => name,
        }
    }

    /// Parse a method token. Unknown tokens become [`Method::Extension`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "OPTIONS" => Method::Options,
            "REQMOD" => Method::ReqMod,
            "RESPMOD" => Method::RespMod,
            other => Method::Extension(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Method::from_name(s))
    }
}

/// First line of an ICAP message.
///
/// The protocol version is stored without the `ICAP/` prefix, so a
/// `REQMOD icap://h/s ICAP/1.0` line yields `version == "1.0"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    /// Request line: `REQMOD icap://host/service ICAP/1.0`.
    Request {
        method: Method,
        uri: String,
        version: String,
    },
    /// Status line: `ICAP/1.0 200 OK`.
    Status {
        version: String,
        code: u16,
        reason: String,
    },
}

/// One ICAP message under construction.
#[derive(Debug)]
pub struct IcapMessage {
    start: StartLine,
    headers: HeaderMap,
    encapsulated: Option<Encapsulated>,
    http_request: Option<http::Request<()>>,
    http_response: Option<http::Response<()>>,
}

impl IcapMessage {
    /// Create an empty message from its start line.
    pub fn new(start: StartLine) -> Self {
        Self {
            start,
            headers: HeaderMap::new(),
            encapsulated: None,
            http_request: None,
            http_response: None,
        }
    }

    /// Default factory for request decoding: build a message from the three
    /// initial-line tokens `[method, uri, version]`.
    pub fn from_request_line(tokens: &[&str; 3]) -> IcapResult<Self> {
        let [method, uri, version] = *tokens;
        let Some(version) = version.strip_prefix("ICAP/") else {
            return Err(Error::initial_line(format!(
                "unsupported protocol in request line: {version}"
            )));
        };
        if uri.is_empty() {
            return Err(Error::initial_line("empty request URI"));
        }
        Ok(Self::new(StartLine::Request {
            method: Method::from_name(method),
            uri: uri.to_string(),
            version: version.to_string(),
        }))
    }

    /// Default factory for response decoding: build a message from the three
    /// initial-line tokens `[version, code, reason]`.
    pub fn from_status_line(tokens: &[&str; 3]) -> IcapResult<Self> {
        let [version, code, reason] = *tokens;
        let Some(version) = version.strip_prefix("ICAP/") else {
            return Err(Error::initial_line(format!(
                "unsupported protocol in status line: {version}"
            )));
        };
        let code: u16 = code
            .parse()
            .map_err(|_| Error::initial_line(format!("invalid status code: {code}")))?;
        Ok(Self::new(StartLine::Status {
            version: version.to_string(),
            code,
            reason: reason.to_string(),
        }))
    }

    pub fn start_line(&self) -> &StartLine {
        &self.start
    }

    /// Request method, `None` for status-line messages.
    pub fn method(&self) -> Option<&Method> {
        match &self.start {
            StartLine::Request { method, .. } => Some(method),
            StartLine::Status { .. } => None,
        }
    }

    /// Request URI, `None` for status-line messages.
    pub fn uri(&self) -> Option<&str> {
        match &self.start {
            StartLine::Request { uri, .. } => Some(uri),
            StartLine::Status { .. } => None,
        }
    }

    /// ICAP protocol version (without the `ICAP/` prefix).
    pub fn version(&self) -> &str {
        match &self.start {
            StartLine::Request { version, .. } | StartLine::Status { version, .. } => version,
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Drop all ICAP headers. The decoder calls this when it (re)enters the
    /// header block, so a replayed block never duplicates values.
    pub fn clear_headers(&mut self) {
        self.headers.clear();
    }

    /// Append one header, preserving duplicates in insertion order.
    pub fn add_header(&mut self, name: &str, value: &str) -> IcapResult<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::header(format!("invalid header name: {name:?}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| Error::header(format!("invalid value for header {name}")))?;
        self.headers.append(name, value);
        Ok(())
    }

    /// ASCII case-insensitive presence check.
    pub fn contains_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// First value of a header, if present and readable as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// All values of a header, in insertion order.
    pub fn header_values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
    }

    pub fn set_encapsulated(&mut self, descriptor: Encapsulated) {
        self.encapsulated = Some(descriptor);
    }

    pub fn encapsulated(&self) -> Option<&Encapsulated> {
        self.encapsulated.as_ref()
    }

    /// Embedded HTTP request head, when the message carried `req-hdr`.
    pub fn http_request(&self) -> Option<&http::Request<()>> {
        self.http_request.as_ref()
    }

    pub fn set_http_request(&mut self, head: http::Request<()>) {
        self.http_request = Some(head);
    }

    /// Embedded HTTP response head, when the message carried `res-hdr`.
    pub fn http_response(&self) -> Option<&http::Response<()>> {
        self.http_response.as_ref()
    }

    pub fn set_http_response(&mut self, head: http::Response<()>) {
        self.http_response = Some(head);
    }

    /// Announced preview size, when a parseable `Preview` header is present.
    pub fn preview_size(&self) -> Option<usize> {
        self.header("Preview").and_then(|v| v.trim().parse().ok())
    }

    /// Whether the client advertised `Allow: 204`.
    pub fn allow_204(&self) -> bool {
        self.header("Allow")
            .map(|v| v.split(',').any(|p| p.trim() == "204"))
            .unwrap_or(false)
    }

    /// Serialise the ICAP head (initial line + headers + blank line) back
    /// to wire bytes. Header names are rendered canonically.
    pub fn head_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        match &self.start {
            StartLine::Request {
                method,
                uri,
                version,
            } => {
                write!(&mut out, "{method} {uri} ICAP/{version}\r\n").unwrap();
            }
            StartLine::Status {
                version,
                code,
                reason,
            } => {
                write!(&mut out, "ICAP/{version} {code} {reason}\r\n").unwrap();
            }
        }
        for (name, value) in self.headers.iter() {
            write!(
                &mut out,
                "{}: {}\r\n",
                canon_icap_header(name.as_str()),
                value.to_str().unwrap_or_default()
            )
            .unwrap();
        }
        out.push_str("\r\n");
        out.into_bytes()
    }
}

/// Return canonical ICAP header name (title-cased, with special-cases).
/// Input should be lowercased (`http::HeaderName::as_str()` already is).
fn canon_icap_header(name: &str) -> Cow<'_, str> {
    match name {
        "istag" => Cow::Borrowed("ISTag"),
        "encapsulated" => Cow::Borrowed("Encapsulated"),
        "options-ttl" => Cow::Borrowed("Options-TTL"),
        "service-id" => Cow::Borrowed("Service-ID"),
        // Fallback: Title-Case each hyphen-separated token.
        _ => {
            let mut out = String::with_capacity(name.len());
            for (i, seg) in name.split('-').enumerate() {
                if i > 0 {
                    out.push('-');
                }
                let mut chars = seg.chars();
                if let Some(c0) = chars.next() {
                    out.extend(c0.to_uppercase());
                    for c in chars {
                        out.extend(c.to_lowercase());
                    }
                }
            }
            Cow::Owned(out)
        }
    }
}
