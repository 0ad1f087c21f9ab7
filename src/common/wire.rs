//! Request/response framing between the dispatcher and connection handlers
//!
//! Request: a textual header block terminated by a blank line, optionally
//! carrying `Content-Length`, followed by exactly that many body bytes.
//! Response: status line, `Content-Type`, `Connection: close`, blank line,
//! then a body acknowledging what was served.
//!
//! A body equal to [`STOP_TOKEN`] is a control instruction, not payload.

use crate::common::{Error, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Reserved body that asks a server to stop
pub const STOP_TOKEN: &str = "stop";

/// Header lines accepted before the blank separator
pub const MAX_HEADER_LINES: usize = 64;

/// Bytes accepted in a single header line, terminator included
pub const MAX_HEADER_LINE_BYTES: usize = 8 * 1024;

/// Largest response a dispatcher will buffer
pub const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

const CONTENT_LENGTH: &str = "content-length";

/// Parsed request header block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHead {
    /// First header line, if any
    pub request_line: Option<String>,
    /// Declared body length (zero when absent)
    pub content_length: usize,
}

/// Parsed response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Body a dispatcher sends for sequence number `seq`
pub fn request_payload(seq: u64) -> String {
    format!("Client request no: {}", seq)
}

/// Acknowledgement body a handler returns for `payload`
pub fn serving_body(payload: &str) -> String {
    format!("Serving: {}", payload)
}

/// Encode a request carrying `body` to `host`
pub fn encode_request(host: &str, body: &str) -> Vec<u8> {
    format!(
        "POST / HTTP/1.1\r\nHost: {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        host,
        body.len(),
        body
    )
    .into_bytes()
}

/// Encode the single response a handler writes
pub fn encode_response(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\n{}",
        body
    )
    .into_bytes()
}

/// Extract a `Content-Length` value from one header line.
///
/// Returns `Ok(None)` for any other header.
pub fn parse_content_length(line: &str) -> Result<Option<usize>> {
    let Some((name, value)) = line.split_once(':') else {
        return Ok(None);
    };
    if !name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
        return Ok(None);
    }
    value
        .trim()
        .parse::<usize>()
        .map(Some)
        .map_err(|_| Error::Protocol(format!("invalid content length: {:?}", value.trim())))
}

/// Read header lines up to the blank separator (or EOF).
pub async fn read_head<R>(reader: &mut R) -> Result<RequestHead>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = RequestHead::default();
    let mut declared = false;
    let mut line = String::new();

    for _ in 0..MAX_HEADER_LINES {
        line.clear();
        let read = (&mut *reader)
            .take(MAX_HEADER_LINE_BYTES as u64)
            .read_line(&mut line)
            .await?;
        if read == 0 {
            return Ok(head);
        }
        if read == MAX_HEADER_LINE_BYTES && !line.ends_with('\n') {
            return Err(Error::Protocol(format!(
                "header line exceeds {} bytes",
                MAX_HEADER_LINE_BYTES
            )));
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Ok(head);
        }

        if head.request_line.is_none() {
            head.request_line = Some(trimmed.to_string());
        }
        // first declaration wins
        if !declared {
            if let Some(len) = parse_content_length(trimmed)? {
                head.content_length = len;
                declared = true;
            }
        }
    }

    Err(Error::Protocol(format!(
        "header block exceeds {} lines",
        MAX_HEADER_LINES
    )))
}

/// Parse a complete response read until the peer closed the connection
pub fn parse_response(raw: &[u8]) -> Result<Response> {
    let text = String::from_utf8_lossy(raw);
    let (head, body) = text
        .split_once("\r\n\r\n")
        .ok_or_else(|| Error::Protocol("response has no header terminator".into()))?;

    let status_line = head
        .lines()
        .next()
        .ok_or_else(|| Error::Protocol("empty response".into()))?;
    let mut parts = status_line.split_whitespace();
    match parts.next() {
        Some(version) if version.starts_with("HTTP/") => {}
        _ => {
            return Err(Error::Protocol(format!(
                "malformed status line: {:?}",
                status_line
            )))
        }
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| Error::Protocol(format!("malformed status line: {:?}", status_line)))?;

    Ok(Response {
        status,
        body: body.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn test_parse_content_length() {
        assert_eq!(parse_content_length("Content-Length: 12").unwrap(), Some(12));
        assert_eq!(parse_content_length("content-length:4").unwrap(), Some(4));
        assert_eq!(parse_content_length("Host: localhost:9000").unwrap(), None);
        assert_eq!(parse_content_length("POST / HTTP/1.1").unwrap(), None);
        assert!(parse_content_length("Content-Length: lots").is_err());
    }

    #[tokio::test]
    async fn test_read_head_from_encoded_request() {
        let raw = encode_request("localhost:9000", "Client request no: 7");
        let mut reader = BufReader::new(&raw[..]);

        let head = read_head(&mut reader).await.unwrap();
        assert_eq!(head.request_line.as_deref(), Some("POST / HTTP/1.1"));
        assert_eq!(head.content_length, "Client request no: 7".len());
    }

    #[tokio::test]
    async fn test_read_head_without_length_defaults_to_zero() {
        let raw = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut reader = BufReader::new(&raw[..]);
        let head = read_head(&mut reader).await.unwrap();
        assert_eq!(head.content_length, 0);
    }

    #[tokio::test]
    async fn test_read_head_eof_ends_headers() {
        let raw = b"POST / HTTP/1.1\nContent-Length: 3\n";
        let mut reader = BufReader::new(&raw[..]);
        let head = read_head(&mut reader).await.unwrap();
        assert_eq!(head.content_length, 3);
    }

    #[tokio::test]
    async fn test_read_head_rejects_endless_headers() {
        let raw = "X-Filler: 1\r\n".repeat(MAX_HEADER_LINES + 1);
        let mut reader = BufReader::new(raw.as_bytes());
        assert!(matches!(
            read_head(&mut reader).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_read_head_rejects_overlong_line() {
        let raw = vec![b'A'; MAX_HEADER_LINE_BYTES * 4];
        let mut reader = BufReader::new(&raw[..]);
        assert!(matches!(
            read_head(&mut reader).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_read_head_accepts_line_at_limit() {
        let mut raw = "X-Pad: ".to_string();
        raw.push_str(&"a".repeat(MAX_HEADER_LINE_BYTES - raw.len() - 1));
        raw.push('\n');
        raw.push_str("Content-Length: 2\n\n");
        let mut reader = BufReader::new(raw.as_bytes());
        let head = read_head(&mut reader).await.unwrap();
        assert_eq!(head.content_length, 2);
    }

    #[test]
    fn test_parse_response() {
        let raw = encode_response(&serving_body("Client request no: 3"));
        let response = parse_response(&raw).unwrap();
        assert!(response.is_success());
        assert_eq!(response.body, "Serving: Client request no: 3");
    }

    #[test]
    fn test_parse_response_malformed() {
        assert!(parse_response(b"").is_err());
        assert!(parse_response(b"garbage without terminator").is_err());
        assert!(parse_response(b"SMTP 220\r\n\r\nhello").is_err());
        assert!(parse_response(b"HTTP/1.1 abc\r\n\r\n").is_err());
    }
}
