//! Credential encoding for the two places Asterisk expects them: the
//! `Authorization` header on REST commands and the `api_key` query parameter
//! on the event WebSocket.

use base64::{engine::general_purpose::STANDARD, Engine};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters left untouched in query components (RFC 3986 unreserved set)
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// `Basic <base64(user:password)>` header value
pub fn basic_auth(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password)))
}

/// `user:password` for the `api_key` query parameter, each half percent-encoded
pub fn api_key(user: &str, password: &str) -> String {
    format!(
        "{}:{}",
        encode_query_component(user),
        encode_query_component(password)
    )
}

/// Percent-encode a single query or path component
pub fn encode_query_component(value: &str) -> String {
    utf8_percent_encode(value, QUERY_COMPONENT).to_string()
}
