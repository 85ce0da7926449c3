//! Client side of the WebSocket opening handshake (RFC 6455 Section 4).
//!
//! The client sends an HTTP Upgrade request carrying a random
//! `Sec-WebSocket-Key` and checks that the server's `101` response echoes
//! the matching `Sec-WebSocket-Accept` value.

use crate::error::{Error, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};
use std::collections::HashMap;

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Default `Sec-WebSocket-Version`.
pub const WS_VERSION: &str = "13";

/// End-of-headers marker.
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Response headers that must appear at most once.
const SINGLE_VALUE_HEADERS: [&str; 3] = ["upgrade", "connection", "sec-websocket-accept"];

/// Parse HTTP headers into a map keyed by lowercase name.
///
/// Repeated headers are joined with `", "`, except the ones listed in
/// `single_value`, which are rejected when duplicated.
///
/// # Errors
/// Returns `Error::InvalidHandshake` if a single-value header is duplicated.
fn parse_headers<'a, I>(lines: I, single_value: &[&str]) -> Result<HashMap<String, String>>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers: HashMap<String, String> = HashMap::new();

    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name_lower = name.trim().to_ascii_lowercase();
        let value = value.trim();

        match headers.get_mut(&name_lower) {
            Some(_) if single_value.contains(&name_lower.as_str()) => {
                return Err(Error::InvalidHandshake(format!(
                    "Duplicate header: {}",
                    name.trim()
                )));
            }
            Some(existing) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => {
                headers.insert(name_lower, value.to_string());
            }
        }
    }

    Ok(headers)
}

/// Reject header values that could inject extra header lines.
fn validate_header_value(header_name: &str, value: &str) -> Result<()> {
    if value.contains('\r') || value.contains('\n') {
        return Err(Error::InvalidHandshake(format!(
            "Header {header_name} contains CR or LF characters"
        )));
    }
    Ok(())
}

/// Position just past the `\r\n\r\n` that ends an HTTP head, if present.
#[must_use]
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_END.len())
        .position(|w| w == HEADER_END)
        .map(|pos| pos + HEADER_END.len())
}

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use wsclient::protocol::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    BASE64.encode(hash)
}

/// The key sent with one connection attempt and the accept value expected back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeKey {
    key: String,
    accept: String,
}

impl HandshakeKey {
    /// Generate a key from 16 random bytes.
    #[must_use]
    pub fn generate() -> Self {
        let mut nonce = [0u8; 16];
        if getrandom::getrandom(&mut nonce).is_err() {
            let seed = crate::protocol::mask::random_mask_key();
            for (i, byte) in nonce.iter_mut().enumerate() {
                *byte = seed[i % 4].rotate_left(i as u32) ^ i as u8;
            }
        }
        Self::from_key(BASE64.encode(nonce))
    }

    /// Use a fixed key.
    #[must_use]
    pub fn from_key(key: impl Into<String>) -> Self {
        let key = key.into();
        let accept = compute_accept_key(&key);
        Self { key, accept }
    }

    /// The `Sec-WebSocket-Key` value.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The `Sec-WebSocket-Accept` value the server must answer with.
    #[must_use]
    pub fn accept(&self) -> &str {
        &self.accept
    }
}

/// Settings for the client's opening handshake request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// The Host header value, usually `host:port`.
    pub host: String,
    /// The request path (e.g., "/chat").
    pub path: String,
    /// The Origin header value. Defaults to `http://<host>`.
    pub origin: Option<String>,
    /// The Sec-WebSocket-Version value; `None` omits the header.
    pub version: Option<String>,
    /// Requested subprotocols, sent as one Sec-WebSocket-Protocol header.
    pub protocols: Vec<String>,
    /// Declared extensions, passed through as Sec-WebSocket-Extensions.
    pub extensions: Vec<String>,
    /// Extra headers. Values for the same name are joined with `", "`.
    pub headers: Vec<(String, Vec<String>)>,
}

impl HandshakeRequest {
    /// Create a request for `path` on `host`.
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        let host = host.into();
        let mut path = path.into();
        if path.is_empty() {
            path.push('/');
        }
        Self {
            origin: Some(format!("http://{host}")),
            host,
            path,
            version: Some(WS_VERSION.to_string()),
            protocols: Vec::new(),
            extensions: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Override or drop the Origin header.
    #[must_use]
    pub fn with_origin(mut self, origin: Option<String>) -> Self {
        self.origin = origin;
        self
    }

    /// Override or drop the Sec-WebSocket-Version header.
    #[must_use]
    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }

    /// Request a subprotocol.
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Declare an extension.
    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extensions.push(extension.into());
        self
    }

    /// Add a value for an extra header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some((_, values)) => values.push(value),
            None => self.headers.push((name, vec![value])),
        }
        self
    }

    /// Write the request for `key` to a buffer.
    ///
    /// # Errors
    /// Returns `Error::InvalidHandshake` if any header value contains CR or LF.
    pub fn write(&self, key: &HandshakeKey, buf: &mut Vec<u8>) -> Result<()> {
        validate_header_value("Request-Line", &self.path)?;
        validate_header_value("Host", &self.host)?;

        buf.extend_from_slice(format!("GET {} HTTP/1.1\r\n", self.path).as_bytes());
        buf.extend_from_slice(format!("Host: {}\r\n", self.host).as_bytes());
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        if let Some(ref origin) = self.origin {
            validate_header_value("Origin", origin)?;
            buf.extend_from_slice(format!("Origin: {origin}\r\n").as_bytes());
        }
        buf.extend_from_slice(format!("Sec-WebSocket-Key: {}\r\n", key.key()).as_bytes());
        if let Some(ref version) = self.version {
            validate_header_value("Sec-WebSocket-Version", version)?;
            buf.extend_from_slice(format!("Sec-WebSocket-Version: {version}\r\n").as_bytes());
        }
        if !self.protocols.is_empty() {
            let protocols = self.protocols.join(", ");
            validate_header_value("Sec-WebSocket-Protocol", &protocols)?;
            buf.extend_from_slice(format!("Sec-WebSocket-Protocol: {protocols}\r\n").as_bytes());
        }
        if !self.extensions.is_empty() {
            let extensions = self.extensions.join(", ");
            validate_header_value("Sec-WebSocket-Extensions", &extensions)?;
            buf.extend_from_slice(
                format!("Sec-WebSocket-Extensions: {extensions}\r\n").as_bytes(),
            );
        }
        for (name, values) in &self.headers {
            let value = values.join(", ");
            validate_header_value(name, name)?;
            validate_header_value(name, &value)?;
            buf.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }

        buf.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Serialize the request for `key`.
    ///
    /// # Errors
    /// See [`write`](Self::write).
    pub fn to_bytes(&self, key: &HandshakeKey) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(256);
        self.write(key, &mut buf)?;
        Ok(buf)
    }
}

/// Server's handshake response: status and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// HTTP status code.
    pub status: u16,
    /// Headers keyed by lowercase name.
    pub headers: HashMap<String, String>,
}

impl HandshakeResponse {
    /// Parse an HTTP response head (status line and headers).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - The data is not valid UTF-8.
    /// - The response is empty or the status line is malformed.
    /// - A single-value header (`Upgrade`, `Connection`, `Sec-WebSocket-Accept`) repeats.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;

        let mut lines = text.lines();

        // "HTTP/1.1 101 Switching Protocols"
        let status_line = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| Error::InvalidHandshake("Empty response".into()))?;

        let mut parts = status_line.split_whitespace();
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid status line: {status_line}"
            )));
        }
        let status = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| {
                Error::InvalidHandshake(format!("Invalid status line: {status_line}"))
            })?;

        let headers = parse_headers(lines, &SINGLE_VALUE_HEADERS)?;
        Ok(Self { status, headers })
    }

    /// Parse a response, refusing heads larger than `max_size`.
    ///
    /// # Errors
    ///
    /// - `Error::HandshakeTooLarge` if data exceeds `max_size`
    /// - Other handshake errors as per `parse()`
    pub fn parse_with_limit(data: &[u8], max_size: usize) -> Result<Self> {
        if data.len() > max_size {
            return Err(Error::HandshakeTooLarge {
                size: data.len(),
                max: max_size,
            });
        }
        Self::parse(data)
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The subprotocol selected by the server.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.header("sec-websocket-protocol")
    }

    /// Extensions the server listed.
    #[must_use]
    pub fn extensions(&self) -> Vec<String> {
        self.header("sec-websocket-extensions")
            .map(|e| e.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default()
    }

    /// Check that this response accepts the upgrade for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] naming the first failed check:
    /// - The status code is not `101`.
    /// - `Upgrade` is missing or not `websocket` (case-insensitive).
    /// - `Connection` is missing or does not contain `upgrade`.
    /// - `Sec-WebSocket-Accept` is missing or does not match.
    pub fn validate(&self, key: &HandshakeKey) -> Result<()> {
        if self.status != 101 {
            return Err(Error::InvalidHandshake(format!(
                "Expected 101 status, got: {}",
                self.status
            )));
        }

        let upgrade = self
            .header("upgrade")
            .ok_or_else(|| Error::InvalidHandshake("Missing Upgrade header in response".into()))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Upgrade header: {upgrade}"
            )));
        }

        let connection = self.header("connection").ok_or_else(|| {
            Error::InvalidHandshake("Missing Connection header in response".into())
        })?;
        if !connection.to_ascii_lowercase().contains("upgrade") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Connection header: {connection}"
            )));
        }

        let accept = self
            .header("sec-websocket-accept")
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Accept header".into()))?;
        if accept != key.accept() {
            return Err(Error::InvalidHandshake(format!(
                "Sec-WebSocket-Accept mismatch: expected {}, got {accept}",
                key.accept()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RFC_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
    const RFC_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

    fn response(accept: &str) -> Vec<u8> {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {accept}\r\n\
             \r\n"
        )
        .into_bytes()
    }

    #[test]
    fn test_compute_accept_key_rfc_example() {
        assert_eq!(compute_accept_key(RFC_KEY), RFC_ACCEPT);
        let key = HandshakeKey::from_key(RFC_KEY);
        assert_eq!(key.accept(), RFC_ACCEPT);
    }

    #[test]
    fn test_generated_key_is_16_bytes() {
        let key = HandshakeKey::generate();
        let decoded = BASE64.decode(key.key()).unwrap();
        assert_eq!(decoded.len(), 16);
        assert_eq!(key.accept(), compute_accept_key(key.key()));
        assert_ne!(HandshakeKey::generate().key(), key.key());
    }

    #[test]
    fn test_write_request() {
        let request = HandshakeRequest::new("example.com:8080", "/chat")
            .with_protocol("chat")
            .with_protocol("superchat")
            .with_extension("permessage-deflate")
            .with_header("X-Token", "a")
            .with_header("x-token", "b");
        let bytes = request.to_bytes(&HandshakeKey::from_key(RFC_KEY)).unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.starts_with("GET /chat HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com:8080\r\n"));
        assert!(text.contains("Upgrade: websocket\r\n"));
        assert!(text.contains("Connection: Upgrade\r\n"));
        assert!(text.contains("Origin: http://example.com:8080\r\n"));
        assert!(text.contains(&format!("Sec-WebSocket-Key: {RFC_KEY}\r\n")));
        assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(text.contains("Sec-WebSocket-Protocol: chat, superchat\r\n"));
        assert!(text.contains("Sec-WebSocket-Extensions: permessage-deflate\r\n"));
        assert!(text.contains("X-Token: a, b\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_write_request_optional_headers_omitted() {
        let request = HandshakeRequest::new("h", "")
            .with_origin(None)
            .with_version(None);
        let text =
            String::from_utf8(request.to_bytes(&HandshakeKey::from_key(RFC_KEY)).unwrap())
                .unwrap();
        assert!(text.starts_with("GET / HTTP/1.1\r\n"));
        assert!(!text.contains("Origin"));
        assert!(!text.contains("Sec-WebSocket-Version"));
        assert!(!text.contains("Sec-WebSocket-Protocol"));
    }

    #[test]
    fn test_crlf_in_header_rejected() {
        let request = HandshakeRequest::new("h", "/").with_header("X-Evil", "a\r\nHost: b");
        let result = request.to_bytes(&HandshakeKey::from_key(RFC_KEY));
        assert!(matches!(result, Err(Error::InvalidHandshake(msg)) if msg.contains("X-Evil")));
    }

    #[test]
    fn test_parse_and_validate_response() {
        let resp = HandshakeResponse::parse(&response(RFC_ACCEPT)).unwrap();
        assert_eq!(resp.status, 101);
        assert_eq!(resp.header("Sec-WebSocket-Accept"), Some(RFC_ACCEPT));
        assert!(resp.validate(&HandshakeKey::from_key(RFC_KEY)).is_ok());
    }

    #[test]
    fn test_case_insensitive_headers() {
        let data = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             UPGRADE: WebSocket\r\n\
             connection: keep-alive, Upgrade\r\n\
             SEC-WEBSOCKET-ACCEPT: {RFC_ACCEPT}\r\n\
             Sec-WebSocket-Protocol: chat\r\n\
             \r\n"
        );
        let resp = HandshakeResponse::parse(data.as_bytes()).unwrap();
        assert!(resp.validate(&HandshakeKey::from_key(RFC_KEY)).is_ok());
        assert_eq!(resp.protocol(), Some("chat"));
        assert_eq!(resp.headers.get("upgrade").map(String::as_str), Some("WebSocket"));
    }

    #[test]
    fn test_extensions_listed() {
        let data = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {RFC_ACCEPT}\r\n\
             Sec-WebSocket-Extensions: permessage-deflate; client_max_window_bits , x-custom\r\n\
             \r\n"
        );
        let resp = HandshakeResponse::parse(data.as_bytes()).unwrap();
        assert_eq!(
            resp.extensions(),
            vec!["permessage-deflate; client_max_window_bits", "x-custom"]
        );
        assert_eq!(resp.protocol(), None);

        let plain = HandshakeResponse::parse(&response(RFC_ACCEPT)).unwrap();
        assert!(plain.extensions().is_empty());
    }

    #[test]
    fn test_wrong_status() {
        let data = b"HTTP/1.1 200 OK\r\nUpgrade: websocket\r\n\r\n";
        let resp = HandshakeResponse::parse(data).unwrap();
        let err = resp.validate(&HandshakeKey::from_key(RFC_KEY)).unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("101")));
    }

    #[test]
    fn test_missing_upgrade() {
        let data = format!(
            "HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {RFC_ACCEPT}\r\n\r\n"
        );
        let resp = HandshakeResponse::parse(data.as_bytes()).unwrap();
        let err = resp.validate(&HandshakeKey::from_key(RFC_KEY)).unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("Upgrade")));
    }

    #[test]
    fn test_bad_connection_header() {
        let data = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: close\r\nSec-WebSocket-Accept: {RFC_ACCEPT}\r\n\r\n"
        );
        let resp = HandshakeResponse::parse(data.as_bytes()).unwrap();
        let err = resp.validate(&HandshakeKey::from_key(RFC_KEY)).unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("Connection")));
    }

    #[test]
    fn test_missing_accept() {
        let data = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n";
        let resp = HandshakeResponse::parse(data).unwrap();
        let err = resp.validate(&HandshakeKey::from_key(RFC_KEY)).unwrap_err();
        assert!(
            matches!(err, Error::InvalidHandshake(msg) if msg.contains("Sec-WebSocket-Accept"))
        );
    }

    #[test]
    fn test_accept_mismatch() {
        let resp = HandshakeResponse::parse(&response("bm90IHRoZSByaWdodCBvbmU=")).unwrap();
        let err = resp.validate(&HandshakeKey::from_key(RFC_KEY)).unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("mismatch")));
    }

    #[test]
    fn test_duplicate_accept_rejected() {
        let data = format!(
            "HTTP/1.1 101 Switching Protocols\r\nSec-WebSocket-Accept: {RFC_ACCEPT}\r\nSec-WebSocket-Accept: x\r\n\r\n"
        );
        let result = HandshakeResponse::parse(data.as_bytes());
        assert!(matches!(result, Err(Error::InvalidHandshake(msg)) if msg.contains("Duplicate")));
    }

    #[test]
    fn test_repeated_header_joined() {
        let data = b"HTTP/1.1 101 Switching Protocols\r\nX-A: 1\r\nx-a: 2\r\n\r\n";
        let resp = HandshakeResponse::parse(data).unwrap();
        assert_eq!(resp.header("x-a"), Some("1, 2"));
    }

    #[test]
    fn test_malformed_status_line() {
        assert!(HandshakeResponse::parse(b"").is_err());
        assert!(HandshakeResponse::parse(b"garbage\r\n\r\n").is_err());
        assert!(HandshakeResponse::parse(b"HTTP/1.1 abc\r\n\r\n").is_err());
    }

    #[test]
    fn test_handshake_too_large() {
        let large_data = vec![b'A'; 10000];
        let result = HandshakeResponse::parse_with_limit(&large_data, 8192);
        assert!(matches!(result, Err(Error::HandshakeTooLarge { .. })));
    }

    #[test]
    fn test_find_header_end() {
        let mut data = response(RFC_ACCEPT);
        let head_len = data.len();
        data.extend_from_slice(&[0x81, 0x00]);
        assert_eq!(find_header_end(&data), Some(head_len));
        assert_eq!(find_header_end(b"HTTP/1.1 101\r\nUpgrade: x\r\n"), None);
    }
}
