//! HTTP/1.0 request framing and reply parsing.

use serde_json::Value;

use crate::errors::RpcError;
use crate::reply::RpcReply;
use crate::session::Session;

/// User agent announced with every request.
pub const USER_AGENT: &str = "cmonjsclient/1.0";

/// Bytes requested from the socket per read.
pub const READ_CHUNK: usize = 512;

/// A request split into its header block and body.
///
/// The two halves are written to the socket separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    /// Request line and headers, including the terminating blank line.
    pub head: Vec<u8>,
    /// JSON payload.
    pub body: Vec<u8>,
}

/// Status and length read from a response header block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseHead {
    /// HTTP status code, when the status line parsed.
    pub status: Option<u16>,
    /// Declared `Content-Length`.
    pub content_length: Option<usize>,
}

/// Renders a `POST` of `payload` to `uri`.
///
/// The `Cookie` header is only sent when the session holds cookies.
#[must_use]
pub fn build_request(
    uri: &str,
    payload: &[u8],
    host: &str,
    port: u16,
    session: &Session,
) -> RequestFrame {
    let host = if host.contains(':') {
        format!("[{host}]")
    } else {
        host.to_owned()
    };
    let head = format!(
        "POST {uri} HTTP/1.0\r\n\
         Host: {host}:{port}\r\n\
         User-Agent: {USER_AGENT}\r\n\
         Connection: close\r\n\
         Accept: application/json\r\n\
         Transfer-Encoding: identity\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {length}\r\n\
         {cookies}\r\n",
        length = payload.len(),
        cookies = session.cookie_header(),
    );
    RequestFrame {
        head: head.into_bytes(),
        body: payload.to_vec(),
    }
}

/// Splits `raw` at the first blank line into header block and body.
#[must_use]
pub fn split_head(raw: &[u8]) -> Option<(&[u8], &[u8])> {
    raw.windows(2).enumerate().find_map(|(index, pair)| {
        if pair != b"\n\n" && pair != b"\r\n" {
            return None;
        }
        if pair == b"\n\n" {
            return Some((raw.get(..index)?, raw.get(index + 2..)?));
        }
        if raw.get(index + 2..index + 4) == Some(b"\r\n".as_slice()) {
            return Some((raw.get(..index)?, raw.get(index + 4..)?));
        }
        None
    })
}

/// Reads the status code and `Content-Length` from a header block.
#[must_use]
pub fn parse_head(head: &[u8]) -> ResponseHead {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.lines();
    let status = lines
        .next()
        .filter(|line| line.starts_with("HTTP/"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok());
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok());
    ResponseHead {
        status,
        content_length,
    }
}

/// Whether `raw` already holds the header block and the declared body.
///
/// Without a `Content-Length` the reply is complete only when the peer
/// closes the connection.
#[must_use]
pub fn response_complete(raw: &[u8]) -> bool {
    split_head(raw).is_some_and(|(head, body)| {
        parse_head(head)
            .content_length
            .is_some_and(|length| body.len() >= length)
    })
}

/// Parses a complete response, feeding its headers to `session`.
pub fn parse_response(raw: &[u8], session: &mut Session) -> Result<RpcReply, RpcError> {
    let (head, body) = split_head(raw).ok_or_else(|| {
        RpcError::malformed(format!(
            "reply of {} bytes has no header terminator",
            raw.len()
        ))
    })?;
    session.parse_headers(head);
    let parsed = parse_head(head);
    let body = match parsed.content_length {
        Some(length) => body.get(..length).ok_or_else(|| {
            RpcError::malformed(format!(
                "reply body truncated at {} of {length} bytes",
                body.len()
            ))
        })?,
        None => body,
    };
    decode_object(body).map_err(|error| match (error, parsed.status) {
        (RpcError::MalformedReply { reason }, Some(status)) => {
            RpcError::malformed(format!("HTTP {status}: {reason}"))
        }
        (other, _) => other,
    })
}

/// Decodes `bytes` as one JSON object.
pub fn decode_object(bytes: &[u8]) -> Result<RpcReply, RpcError> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(fields)) => Ok(RpcReply::new(fields)),
        Ok(other) => Err(RpcError::malformed(format!(
            "expected a JSON object, found {}",
            json_kind(&other)
        ))),
        Err(error) => Err(RpcError::malformed(error.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
