//! HTTP/1.1 framing for the command transport: request serialization and
//! incremental response parsing.

use crate::{
    buffer::ResponseBuffer,
    constants::*,
    error::{AriError, AriResult},
    method::Method,
};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use std::fmt::Write as _;
use tracing::trace;

/// Response to a command request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    version: String,
    status: u16,
    reason: String,
    headers: IndexMap<String, String>,
    body: String,
}

impl HttpResponse {
    pub fn new(status: u16, reason: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            version: HTTP_VERSION.to_string(),
            status,
            reason: reason.into(),
            headers: IndexMap::new(),
            body: body.into(),
        }
    }

    /// Numeric status code
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Reason phrase from the status line
    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn into_body(self) -> String {
        self.body
    }

    pub fn headers(&self) -> &IndexMap<String, String> {
        &self.headers
    }

    /// Header value, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// `true` for 2xx statuses
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Deserialize the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> AriResult<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Whether the server allows the connection to carry another request
    pub fn keep_alive(&self) -> bool {
        let connection = self.header(HEADER_CONNECTION).map(str::to_ascii_lowercase);
        match connection.as_deref() {
            Some(value) if value.contains("close") => false,
            Some(value) if value.contains("keep-alive") => true,
            _ => self.version != "HTTP/1.0",
        }
    }
}

fn find_header<'a>(headers: &'a IndexMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Serialized form of one command request
pub(crate) struct RequestHead<'a> {
    pub method: Method,
    pub target: &'a str,
    pub host: &'a str,
    pub authorization: &'a str,
    pub user_agent: &'a str,
    pub body: &'a str,
}

impl RequestHead<'_> {
    pub fn to_wire_format(&self) -> Vec<u8> {
        let mut head = String::with_capacity(256 + self.body.len());
        let _ = write!(
            head,
            "{} {} {}{}",
            self.method, self.target, HTTP_VERSION, CRLF
        );
        let headers = [
            (HEADER_HOST, self.host),
            (HEADER_AUTHORIZATION, self.authorization),
            (HEADER_USER_AGENT, self.user_agent),
            (HEADER_CONTENT_TYPE, CONTENT_TYPE_JSON),
        ];
        for (name, value) in headers {
            let _ = write!(head, "{}: {}{}", name, value, CRLF);
        }
        let _ = write!(
            head,
            "{}: {}{}{}",
            HEADER_CONTENT_LENGTH,
            self.body.len(),
            CRLF,
            CRLF
        );
        head.push_str(self.body);
        head.into_bytes()
    }
}

#[derive(Debug)]
struct ResponseHead {
    version: String,
    status: u16,
    reason: String,
    headers: IndexMap<String, String>,
}

impl ResponseHead {
    fn into_response(self, body: &[u8]) -> AriResult<HttpResponse> {
        let body = String::from_utf8(body.to_vec())
            .map_err(|_| AriError::protocol_error("Invalid UTF-8 in body"))?;
        Ok(HttpResponse {
            version: self.version,
            status: self.status,
            reason: self.reason,
            headers: self.headers,
            body,
        })
    }

    /// Pick the body framing mandated by RFC 9112 section 6.3
    fn body_state(self) -> AriResult<ParseState> {
        if matches!(self.status, 204 | 304) {
            return Ok(ParseState::Fixed {
                head: self,
                length: 0,
            });
        }

        let chunked = find_header(&self.headers, HEADER_TRANSFER_ENCODING)
            .map(|value| value.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false);
        if chunked {
            return Ok(ParseState::ChunkSize {
                head: self,
                body: Vec::new(),
            });
        }

        match find_header(&self.headers, HEADER_CONTENT_LENGTH) {
            Some(value) => {
                let length: usize = value.trim().parse().map_err(|_| AriError::InvalidHeader {
                    header: format!("{}: {}", HEADER_CONTENT_LENGTH, value),
                })?;
                if length > MAX_BODY_SIZE {
                    return Err(AriError::BufferOverflow {
                        size: length,
                        limit: MAX_BODY_SIZE,
                    });
                }
                Ok(ParseState::Fixed { head: self, length })
            }
            None => Ok(ParseState::UntilEof { head: self }),
        }
    }
}

#[derive(Debug)]
enum ParseState {
    Head,
    Fixed {
        head: ResponseHead,
        length: usize,
    },
    ChunkSize {
        head: ResponseHead,
        body: Vec<u8>,
    },
    ChunkData {
        head: ResponseHead,
        body: Vec<u8>,
        size: usize,
    },
    Trailers {
        head: ResponseHead,
        body: Vec<u8>,
    },
    UntilEof {
        head: ResponseHead,
    },
}

/// Incremental HTTP/1.1 response parser
pub struct ResponseParser {
    buffer: ResponseBuffer,
    state: ParseState,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            buffer: ResponseBuffer::new(),
            state: ParseState::Head,
        }
    }

    pub fn add_data(&mut self, data: &[u8]) -> AriResult<()> {
        self.buffer.extend_from_slice(data)
    }

    /// Drop any partial response, e.g. after the socket was replaced
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = ParseState::Head;
    }

    /// Try to take one complete response off the buffer
    pub fn parse_response(&mut self) -> AriResult<Option<HttpResponse>> {
        loop {
            match std::mem::replace(&mut self.state, ParseState::Head) {
                ParseState::Head => {
                    let Some(raw) = self.buffer.take_until(HEAD_TERMINATOR) else {
                        if self.buffer.len() > MAX_HEAD_SIZE {
                            return Err(AriError::BufferOverflow {
                                size: self.buffer.len(),
                                limit: MAX_HEAD_SIZE,
                            });
                        }
                        return Ok(None);
                    };
                    let head = parse_head(&raw)?;
                    if (100..200).contains(&head.status) {
                        trace!("[HTTP] Skipping interim response {}", head.status);
                        continue;
                    }
                    self.state = head.body_state()?;
                }
                ParseState::Fixed { head, length } => match self.buffer.take(length) {
                    Some(body) => return head.into_response(&body).map(Some),
                    None => {
                        self.state = ParseState::Fixed { head, length };
                        return Ok(None);
                    }
                },
                ParseState::ChunkSize { head, body } => {
                    let Some(line) = self.buffer.take_until(CRLF.as_bytes()) else {
                        self.state = ParseState::ChunkSize { head, body };
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&line)?;
                    let total = body.len().saturating_add(size);
                    if total > MAX_BODY_SIZE {
                        return Err(AriError::BufferOverflow {
                            size: total,
                            limit: MAX_BODY_SIZE,
                        });
                    }
                    self.state = if size == 0 {
                        ParseState::Trailers { head, body }
                    } else {
                        ParseState::ChunkData { head, body, size }
                    };
                }
                ParseState::ChunkData {
                    head,
                    mut body,
                    size,
                } => {
                    if self.buffer.len() < size.saturating_add(CRLF.len()) {
                        self.state = ParseState::ChunkData { head, body, size };
                        return Ok(None);
                    }
                    if let Some(data) = self.buffer.take(size) {
                        body.extend_from_slice(&data);
                    }
                    match self.buffer.take(CRLF.len()) {
                        Some(end) if &end[..] == CRLF.as_bytes() => {}
                        _ => return Err(AriError::protocol_error("Chunk not terminated by CRLF")),
                    }
                    self.state = ParseState::ChunkSize { head, body };
                }
                ParseState::Trailers { head, body } => {
                    let Some(line) = self.buffer.take_until(CRLF.as_bytes()) else {
                        self.state = ParseState::Trailers { head, body };
                        return Ok(None);
                    };
                    if line.is_empty() {
                        return head.into_response(&body).map(Some);
                    }
                    self.state = ParseState::Trailers { head, body };
                }
                state @ ParseState::UntilEof { .. } => {
                    if self.buffer.len() > MAX_BODY_SIZE {
                        return Err(AriError::BufferOverflow {
                            size: self.buffer.len(),
                            limit: MAX_BODY_SIZE,
                        });
                    }
                    self.state = state;
                    return Ok(None);
                }
            }
        }
    }

    /// The peer closed the connection: complete a read-until-close body,
    /// or report a truncated response.
    pub fn finish(&mut self) -> AriResult<Option<HttpResponse>> {
        match std::mem::replace(&mut self.state, ParseState::Head) {
            ParseState::UntilEof { head } => {
                let body = self.buffer.take_all();
                head.into_response(&body).map(Some)
            }
            ParseState::Head if self.buffer.is_empty() => Ok(None),
            _ => {
                self.buffer.clear();
                Err(AriError::ConnectionClosed)
            }
        }
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_head(raw: &[u8]) -> AriResult<ResponseHead> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| AriError::protocol_error("Invalid UTF-8 in response head"))?;
    let mut lines = text.split(CRLF);

    let status_line = lines
        .next()
        .ok_or_else(|| AriError::protocol_error("Empty response head"))?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(AriError::protocol_error(format!(
            "Invalid status line: {}",
            status_line
        )));
    }
    let status: u16 = parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| AriError::protocol_error(format!("Invalid status line: {}", status_line)))?;
    let reason = parts.next().unwrap_or_default().trim().to_string();

    let mut headers: IndexMap<String, String> = IndexMap::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let (key, value) = line.split_once(':').ok_or_else(|| AriError::InvalidHeader {
            header: line.to_string(),
        })?;
        let key = key.trim().to_string();
        let value = value.trim();
        match headers.get_mut(&key) {
            Some(existing) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => {
                headers.insert(key, value.to_string());
            }
        }
    }

    Ok(ResponseHead {
        version: version.to_string(),
        status,
        reason,
        headers,
    })
}

fn parse_chunk_size(line: &[u8]) -> AriResult<usize> {
    let text = std::str::from_utf8(line)
        .map_err(|_| AriError::protocol_error("Invalid UTF-8 in chunk size"))?;
    // chunk extensions follow a ';'
    let size = text.split(';').next().unwrap_or_default().trim();
    let size = usize::from_str_radix(size, 16)
        .map_err(|_| AriError::protocol_error(format!("Invalid chunk size: {}", text)))?;
    if size > MAX_BODY_SIZE {
        return Err(AriError::BufferOverflow {
            size,
            limit: MAX_BODY_SIZE,
        });
    }
    Ok(size)
}
