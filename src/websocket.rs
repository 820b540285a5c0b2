//! Event stream connection.
//!
//! Owns the WebSocket to `/ari/events`. [`EventStream::connect`] performs
//! the handshake, optionally retrying on a flat interval;
//! [`EventStream::receive`] hands the socket to a background task that
//! delivers every payload to a callback until the stream fails or is closed.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    constants::DEFAULT_CONNECT_TIMEOUT_MS,
    dispatch::panic_message,
    error::{AriError, AriResult},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of the event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out the retry interval after a failed handshake
    Reconnecting,
    /// Shut down with `close()`; terminal
    Closed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Disconnected => "disconnected",
            StreamState::Connecting => "connecting",
            StreamState::Connected => "connected",
            StreamState::Reconnecting => "reconnecting",
            StreamState::Closed => "closed",
        };
        f.write_str(name)
    }
}

struct Reader {
    task: JoinHandle<()>,
    stop: CancellationToken,
}

pub struct EventStream {
    base_url: String,
    connect_timeout: Duration,
    state: Arc<watch::Sender<StreamState>>,
    shutdown: CancellationToken,
    /// Connected socket not yet handed to a receive loop
    socket: Mutex<Option<WsStream>>,
    reader: Mutex<Option<Reader>>,
}

impl EventStream {
    /// `base_url` is the scheme and authority, e.g. `ws://localhost:8088`
    pub fn new(base_url: impl Into<String>) -> Self {
        let (state, _) = watch::channel(StreamState::Disconnected);
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            state: Arc::new(state),
            shutdown: CancellationToken::new(),
            socket: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    /// Bound on each handshake attempt; an attempt that runs over counts as failed
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    /// Perform the WebSocket handshake on `path` (path plus query).
    ///
    /// With a zero `retry_interval` the first failure is returned and no
    /// further attempt is made. Otherwise failures are logged and the
    /// handshake is retried every `retry_interval` until it succeeds or the
    /// stream is closed, in which case this returns [`AriError::Closed`].
    pub async fn connect(&self, path: &str, retry_interval: Duration) -> AriResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(AriError::Closed);
        }
        self.disconnect();

        let url = format!("{}{}", self.base_url, path);
        // the query carries credentials
        let resource = path.split('?').next().unwrap_or(path);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.transition(StreamState::Connecting);
            debug!(
                "[CONNECT] Event stream attempt {} to {}{}",
                attempt, self.base_url, resource
            );

            let result = tokio::select! {
                result = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str())) => {
                    match result {
                        Ok(handshake) => handshake.map_err(AriError::from),
                        Err(_) => Err(AriError::timeout(self.connect_timeout)),
                    }
                }
                _ = self.shutdown.cancelled() => return Err(AriError::Closed),
            };

            match result {
                Ok((socket, response)) => {
                    info!(
                        "Event stream connected to {}{} (HTTP {})",
                        self.base_url,
                        resource,
                        response.status()
                    );
                    *self
                        .socket
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) = Some(socket);
                    self.transition(StreamState::Connected);
                    if self.shutdown.is_cancelled() {
                        self.drop_socket();
                        return Err(AriError::Closed);
                    }
                    return Ok(());
                }
                Err(e) if retry_interval.is_zero() => {
                    warn!("[CONNECT] Event stream handshake failed: {}", e);
                    self.transition(StreamState::Disconnected);
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "[CONNECT] Event stream attempt {} failed: {}; retrying in {}ms",
                        attempt,
                        e,
                        retry_interval.as_millis()
                    );
                    self.transition(StreamState::Reconnecting);
                    tokio::select! {
                        _ = tokio::time::sleep(retry_interval) => {}
                        _ = self.shutdown.cancelled() => return Err(AriError::Closed),
                    }
                }
            }
        }
    }

    /// Start the receive loop on the connected socket.
    ///
    /// `on_message` gets `Ok(payload)` for each text frame. On a read error or
    /// a close from the server it gets one `Err` and the loop ends with the
    /// stream `Disconnected`; reconnecting is up to the caller.
    pub fn receive<F>(&self, on_message: F) -> AriResult<()>
    where
        F: FnMut(AriResult<String>) + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(AriError::Closed);
        }
        let socket = self
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(AriError::NotConnected)?;

        let stop = self.shutdown.child_token();
        let task = tokio::spawn(receive_loop(
            socket,
            stop.clone(),
            self.state.clone(),
            on_message,
        ));

        let previous = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Reader { task, stop });
        if let Some(previous) = previous {
            previous.stop.cancel();
        }
        Ok(())
    }

    /// Drop the current connection without closing the stream for good.
    /// A later [`connect`](Self::connect) starts over.
    pub fn disconnect(&self) {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            debug!("[WS] Stopping receive loop");
            reader.stop.cancel();
            drop(reader.task);
        }
        self.drop_socket();
        self.transition(StreamState::Disconnected);
    }

    /// Shut the stream down. Idempotent; later calls do nothing.
    pub fn close(&self) {
        let first = self.state.send_if_modified(|current| {
            if *current == StreamState::Closed {
                return false;
            }
            *current = StreamState::Closed;
            true
        });
        if !first {
            trace!("[WS] Event stream already closed");
            return;
        }
        info!("Closing event stream to {}", self.base_url);
        self.shutdown.cancel();
        self.drop_socket();
    }

    fn drop_socket(&self) {
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn transition(&self, next: StreamState) {
        transition(&self.state, next);
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Move to `next` unless the stream was closed
fn transition(state: &watch::Sender<StreamState>, next: StreamState) {
    state.send_if_modified(|current| {
        if *current == StreamState::Closed || *current == next {
            return false;
        }
        debug!("[WS] {} -> {}", current, next);
        *current = next;
        true
    });
}

async fn receive_loop<F>(
    mut socket: WsStream,
    stop: CancellationToken,
    state: Arc<watch::Sender<StreamState>>,
    mut on_message: F,
) where
    F: FnMut(AriResult<String>) + Send + 'static,
{
    let failure = loop {
        let frame = tokio::select! {
            frame = socket.next() => frame,
            _ = stop.cancelled() => {
                debug!("[WS] Sending close frame");
                let _ = socket.close(None).await;
                return;
            }
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                trace!("[WS] <= {}", text);
                deliver(&mut on_message, Ok(text));
            }
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                Ok(text) => deliver(&mut on_message, Ok(text)),
                Err(_) => warn!("[WS] Dropping non UTF-8 binary frame"),
            },
            Some(Ok(Message::Close(frame))) => {
                info!("Event stream closed by server: {:?}", frame);
                break AriError::ConnectionClosed;
            }
            // ping/pong answered by tungstenite
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("[WS] Event stream read failed: {}", e);
                break e.into();
            }
            None => break AriError::ConnectionClosed,
        }
    };

    transition(&state, StreamState::Disconnected);
    deliver(&mut on_message, Err(failure));
}

fn deliver<F>(on_message: &mut F, message: AriResult<String>)
where
    F: FnMut(AriResult<String>),
{
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| on_message(message))) {
        warn!(
            "[WS] Receive callback panicked: {}",
            panic_message(panic.as_ref())
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_is_idempotent() {
        let stream = EventStream::new("ws://127.0.0.1:1");
        let mut states = stream.subscribe_state();
        assert_eq!(stream.state(), StreamState::Disconnected);

        stream.close();
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), StreamState::Closed);

        stream.close();
        assert!(!states.has_changed().unwrap());
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[tokio::test]
    async fn test_connect_after_close_fails() {
        let stream = EventStream::new("ws://127.0.0.1:1");
        stream.close();
        assert!(matches!(
            stream
                .connect("/ari/events", Duration::ZERO)
                .await,
            Err(AriError::Closed)
        ));
        assert!(matches!(
            stream.receive(|_| {}),
            Err(AriError::Closed)
        ));
    }

    #[test]
    fn test_receive_requires_connection() {
        let stream = EventStream::new("ws://127.0.0.1:1");
        assert!(matches!(
            stream.receive(|_| {}),
            Err(AriError::NotConnected)
        ));
    }

    #[test]
    fn test_closed_state_is_sticky() {
        let stream = EventStream::new("ws://127.0.0.1:1");
        stream.close();
        stream.disconnect();
        assert_eq!(stream.state(), StreamState::Closed);
    }
}
