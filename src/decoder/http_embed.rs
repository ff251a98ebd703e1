//! Embedded HTTP head parsing.
//!
//! `req-hdr` / `res-hdr` sections carry a plain HTTP/1.x head (start line
//! + headers + blank line) inside a byte window whose length comes from
//! the `Encapsulated` offsets. The window is fully buffered before we get
//! here, so under-run is impossible: a missing terminator is a hard error.

use http::{HeaderMap, HeaderName, HeaderValue, Version};

use crate::error::{Error, IcapResult};

use super::buffer::{ByteCursor, SizeDelimiter, read_header_block, read_line, split_initial_line};

fn parse_http_version(token: &str) -> Version {
    match token {
        "HTTP/0.9" => Version::HTTP_09,
        "HTTP/1.0" => Version::HTTP_10,
        "HTTP/1.1" => Version::HTTP_11,
        "HTTP/2.0" | "HTTP/2" => Version::HTTP_2,
        "HTTP/3.0" | "HTTP/3" => Version::HTTP_3,
        _ => Version::HTTP_11,
    }
}

/// Parse an embedded HTTP request head out of its section window.
pub(crate) fn parse_request_head(window: &[u8]) -> IcapResult<http::Request<()>> {
    let mut cur = ByteCursor::new(window);
    let Some(line) = read_line(&mut cur, window.len())? else {
        return Err(Error::header("embedded request head has no line terminator"));
    };
    let Some([method, uri, version]) = split_initial_line(&line) else {
        return Err(Error::initial_line(format!(
            "invalid embedded request line: {line:?}"
        )));
    };
    let headers = read_window_headers(&mut cur)?;
    let mut builder = http::Request::builder()
        .method(method)
        .uri(uri)
        .version(parse_http_version(version));
    {
        let map = builder
            .headers_mut()
            .ok_or_else(|| Error::initial_line(format!("invalid embedded request line: {line:?}")))?;
        map.extend(headers);
    }
    builder
        .body(())
        .map_err(|e| Error::initial_line(format!("embedded request head: {e}")))
}

/// Parse an embedded HTTP response head out of its section window.
pub(crate) fn parse_response_head(window: &[u8]) -> IcapResult<http::Response<()>> {
    let mut cur = ByteCursor::new(window);
    let Some(line) = read_line(&mut cur, window.len())? else {
        return Err(Error::header("embedded response head has no line terminator"));
    };
    // VERSION SP CODE [SP reason]; the reason phrase may be empty and is
    // not retained (http::Response has no slot for it)
    let mut parts = line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    let code = parts
        .next()
        .ok_or_else(|| Error::initial_line(format!("invalid embedded status line: {line:?}")))?;
    let code: u16 = code
        .parse()
        .map_err(|_| Error::initial_line(format!("invalid embedded status code: {code:?}")))?;
    let headers = read_window_headers(&mut cur)?;
    let mut builder = http::Response::builder()
        .status(code)
        .version(parse_http_version(version));
    {
        let map = builder
            .headers_mut()
            .ok_or_else(|| Error::initial_line(format!("invalid embedded status line: {line:?}")))?;
        map.extend(headers);
    }
    builder
        .body(())
        .map_err(|e| Error::initial_line(format!("embedded response head: {e}")))
}

fn read_window_headers(cur: &mut ByteCursor<'_>) -> IcapResult<HeaderMap> {
    // the window is already bounded, so the delimiter can never fire
    let mut delimiter = SizeDelimiter::new(cur.remaining().len());
    let mut map = HeaderMap::new();
    let complete = read_header_block(cur, &mut delimiter, |name, value| {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::header(format!("invalid embedded header name: {name:?}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| Error::header(format!("invalid value for embedded header {name}")))?;
        map.append(name, value);
        Ok(())
    })?;
    if !complete {
        return Err(Error::header(
            "embedded header section has no blank-line terminator",
        ));
    }
    Ok(map)
}
