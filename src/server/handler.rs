//! Connection handlers
//!
//! A [`RequestHandler`] owns one accepted connection from first byte to
//! close. New protocols are added as new implementations of the trait.
//!
//! [`HttpEchoHandler`] walks each connection through
//! `ReadHeader → ReadBody → (Stop | Echo) → Respond → Close`.

use crate::common::wire::{self, STOP_TOKEN};
use crate::common::{Error, Result};
use crate::server::lifecycle::ServerLifecycle;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Handles exactly one connection.
///
/// Errors are scoped to that connection; the caller logs and moves on.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle<S>(&self, stream: S) -> impl Future<Output = Result<()>> + Send
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static;
}

/// Echo handler for the text request protocol, honoring the `stop` body
#[derive(Debug, Clone)]
pub struct HttpEchoHandler {
    lifecycle: ServerLifecycle,
    max_body_bytes: usize,
}

impl HttpEchoHandler {
    pub fn new(lifecycle: ServerLifecycle, max_body_bytes: usize) -> Self {
        Self {
            lifecycle,
            max_body_bytes,
        }
    }

    pub fn lifecycle(&self) -> &ServerLifecycle {
        &self.lifecycle
    }

    async fn respond<S>(&self, reader: &mut BufReader<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let head = wire::read_head(reader).await?;

        // ignore further work once stopping
        if self.lifecycle.is_stopping() {
            tracing::debug!("Server stopping, closing connection without a response");
            return Ok(());
        }

        if head.content_length > self.max_body_bytes {
            return Err(Error::Protocol(format!(
                "declared body of {} bytes exceeds limit of {}",
                head.content_length, self.max_body_bytes
            )));
        }

        let mut body = vec![0u8; head.content_length];
        reader.read_exact(&mut body).await?;
        let entity = String::from_utf8_lossy(&body);
        tracing::debug!(
            "{} | entity payload: {}",
            head.request_line.as_deref().unwrap_or("<no request line>"),
            entity
        );

        if entity == STOP_TOKEN {
            self.lifecycle.request_stop();
        }

        let writer = reader.get_mut();
        writer
            .write_all(&wire::encode_response(&wire::serving_body(&entity)))
            .await?;
        writer.flush().await?;
        Ok(())
    }
}

impl RequestHandler for HttpEchoHandler {
    async fn handle<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut reader = BufReader::new(stream);
        let result = self.respond(&mut reader).await;

        // close unconditionally, whatever happened above
        if let Err(e) = reader.get_mut().shutdown().await {
            tracing::trace!("Shutdown after response failed: {}", e);
        }
        tracing::debug!("Connection closed");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn handler() -> HttpEchoHandler {
        HttpEchoHandler::new(ServerLifecycle::new(), 1024)
    }

    #[tokio::test]
    async fn test_echoes_payload() {
        let request = wire::encode_request("localhost:8111", "Client request no: 4");
        let response = wire::encode_response("Serving: Client request no: 4");
        let stream = Builder::new().read(&request).write(&response).build();

        let handler = handler();
        handler.handle(stream).await.unwrap();
        assert!(!handler.lifecycle().is_stopping());
    }

    #[tokio::test]
    async fn test_stop_body_raises_flag_and_still_responds() {
        let request = wire::encode_request("localhost:8111", STOP_TOKEN);
        let response = wire::encode_response("Serving: stop");
        let stream = Builder::new().read(&request).write(&response).build();

        let handler = handler();
        handler.handle(stream).await.unwrap();
        assert!(handler.lifecycle().is_stopping());
    }

    #[tokio::test]
    async fn test_stopping_server_writes_nothing() {
        let request = wire::encode_request("localhost:8111", "Client request no: 9");
        // no write expectation: any response would fail the mock
        let stream = Builder::new().read(&request).build();

        let handler = handler();
        handler.lifecycle().request_stop();
        handler.handle(stream).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_needs_exact_body() {
        let request = wire::encode_request("localhost:8111", "stop please");
        let response = wire::encode_response("Serving: stop please");
        let stream = Builder::new().read(&request).write(&response).build();

        let handler = handler();
        handler.handle(stream).await.unwrap();
        assert!(!handler.lifecycle().is_stopping());
    }

    #[tokio::test]
    async fn test_missing_length_echoes_empty_body() {
        let stream = Builder::new()
            .read(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .write(&wire::encode_response("Serving: "))
            .build();
        handler().handle(stream).await.unwrap();
    }

    #[tokio::test]
    async fn test_truncated_body_is_connection_error() {
        let stream = Builder::new()
            .read(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nshort")
            .build();
        let result = handler().handle(stream).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_unterminated_header_line_is_rejected() {
        // a full line's worth of bytes and still no terminator
        let line = vec![b'A'; wire::MAX_HEADER_LINE_BYTES];
        // no write expectation: the handler must not answer
        let stream = Builder::new().read(&line).build();
        let result = handler().handle(stream).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let stream = Builder::new()
            .read(b"POST / HTTP/1.1\r\nContent-Length: 999999\r\n\r\n")
            .build();
        let result = handler().handle(stream).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
