//! Mock Asterisk ARI server for integration testing
//!
//! Serves raw HTTP/1.1 and WebSocket upgrades on one listener, like Asterisk
//! does on port 8088. Each test drives the server step by step.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub struct MockAriServer {
    listener: TcpListener,
}

/// One accepted HTTP connection
pub struct MockHttpConn {
    reader: BufReader<TcpStream>,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    /// Header names lowercased
    pub headers: HashMap<String, String>,
    pub body: String,
}

pub struct MockWebSocket {
    ws: WebSocketStream<TcpStream>,
    /// Request target of the upgrade, path plus query
    pub uri: String,
}

impl MockAriServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        Self { listener }
    }

    pub fn addr(&self) -> SocketAddr {
        self.listener
            .local_addr()
            .unwrap()
    }

    pub fn port(&self) -> u16 {
        self.addr()
            .port()
    }

    pub async fn accept_stream(&self) -> TcpStream {
        let (stream, _addr) = tokio::time::timeout(Duration::from_secs(5), self.listener.accept())
            .await
            .expect("timeout waiting for a connection")
            .unwrap();
        stream
    }

    /// `None` if nobody connects within `wait`
    pub async fn try_accept(&self, wait: Duration) -> Option<TcpStream> {
        match tokio::time::timeout(wait, self.listener.accept()).await {
            Ok(Ok((stream, _))) => Some(stream),
            _ => None,
        }
    }

    pub async fn accept_http(&self) -> MockHttpConn {
        MockHttpConn {
            reader: BufReader::new(self.accept_stream().await),
        }
    }

    /// Accept a connection and complete the WebSocket upgrade
    pub async fn accept_websocket(&self) -> MockWebSocket {
        let stream = self.accept_stream().await;
        let uri = Arc::new(Mutex::new(String::new()));
        let captured = uri.clone();
        let ws = tokio_tungstenite::accept_hdr_async(
            stream,
            move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                *captured
                    .lock()
                    .unwrap() = request
                    .uri()
                    .to_string();
                Ok(response)
            },
        )
        .await
        .unwrap();
        let uri = uri
            .lock()
            .unwrap()
            .clone();
        MockWebSocket { ws, uri }
    }

    /// Accept a connection, read the upgrade request and refuse it.
    /// Returns the request target.
    pub async fn reject_websocket(&self) -> String {
        let mut conn = self.accept_http().await;
        let request = conn
            .read_request()
            .await
            .expect("no upgrade request");
        conn.respond_raw(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        request.target
    }
}

impl MockHttpConn {
    /// Read one request; `None` when the client closed the connection
    pub async fn read_request(&mut self) -> Option<RecordedRequest> {
        let mut request_line = String::new();
        let n = self
            .reader
            .read_line(&mut request_line)
            .await
            .ok()?;
        if n == 0 {
            return None;
        }
        let mut parts = request_line
            .trim_end()
            .splitn(3, ' ');
        let method = parts
            .next()
            .unwrap_or_default()
            .to_string();
        let target = parts
            .next()
            .unwrap_or_default()
            .to_string();

        let mut headers = HashMap::new();
        loop {
            let mut line = String::new();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .ok()?;
            if n == 0 {
                return None;
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                headers.insert(
                    key.trim()
                        .to_ascii_lowercase(),
                    value
                        .trim()
                        .to_string(),
                );
            }
        }

        let length: usize = headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let mut body = vec![0u8; length];
        self.reader
            .read_exact(&mut body)
            .await
            .ok()?;

        Some(RecordedRequest {
            method,
            target,
            headers,
            body: String::from_utf8(body).unwrap(),
        })
    }

    pub async fn respond_raw(&mut self, data: &str) {
        self.reader
            .get_mut()
            .write_all(data.as_bytes())
            .await
            .unwrap();
    }

    pub async fn respond(&mut self, status: u16, reason: &str, body: &str) {
        let data = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            status,
            reason,
            body.len(),
            body
        );
        self.respond_raw(&data)
            .await;
    }

    /// `true` once the client closes its end
    pub async fn wait_closed(&mut self) -> bool {
        let mut buf = [0u8; 64];
        matches!(
            tokio::time::timeout(Duration::from_secs(5), self.reader.read(&mut buf)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }

    /// Drop the TCP connection
    pub async fn drop_connection(self) {
        drop(self.reader);
    }
}

impl MockWebSocket {
    pub async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string()))
            .await
            .unwrap();
    }

    /// Next frame from the client, if any arrives within 5 seconds
    pub async fn next_message(&mut self) -> Option<Message> {
        match tokio::time::timeout(Duration::from_secs(5), self.ws.next()).await {
            Ok(Some(Ok(message))) => Some(message),
            _ => None,
        }
    }

    pub async fn close(&mut self) {
        let _ = self
            .ws
            .close(None)
            .await;
    }
}
