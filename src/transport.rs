//! Command queue transport.
//!
//! A single background task owns one TCP connection to the ARI HTTP
//! endpoint and services command requests strictly in submission order,
//! one at a time. The connection is opened when a request arrives with no
//! socket, reused while requests keep arriving, and closed once the queue
//! drains.
//!
//! After any transport error the socket is dropped; the next queued request
//! resolves and connects again rather than writing to a socket that may be
//! broken.

use std::future::Future;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::{
    config::AriConnectOptions,
    constants::*,
    dispatch::panic_message,
    error::{AriError, AriResult},
    method::Method,
    protocol::{HttpResponse, RequestHead, ResponseParser},
};

/// Where the transport is in its connect/write/read cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// No socket; waiting for a request
    Idle,
    Resolving,
    Connecting,
    Writing,
    ReadingResponse,
}

/// Callback form of a command response
pub type ResponseCallback = Box<dyn FnOnce(AriResult<HttpResponse>) + Send + 'static>;

enum Responder {
    Future(oneshot::Sender<AriResult<HttpResponse>>),
    Callback(ResponseCallback),
}

impl Responder {
    fn respond(self, result: AriResult<HttpResponse>) {
        match self {
            Responder::Future(reply) => {
                // receiver gone means the caller stopped waiting
                let _ = reply.send(result);
            }
            Responder::Callback(callback) => {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(move || callback(result))) {
                    warn!(
                        "[HTTP] Response callback panicked: {}",
                        panic_message(panic.as_ref())
                    );
                }
            }
        }
    }
}

struct CommandRequest {
    method: Method,
    target: String,
    body: String,
    responder: Responder,
}

/// Handle to the command transport.
///
/// Cheap to clone; all clones feed the same queue. The transport task exits
/// once every handle is dropped and the queue is empty.
#[derive(Clone)]
pub struct HttpClient {
    queue: mpsc::UnboundedSender<CommandRequest>,
    state: watch::Receiver<TransportState>,
}

impl HttpClient {
    /// Start the transport task. Must be called from within a Tokio runtime.
    pub fn new(options: &AriConnectOptions) -> Self {
        let (queue, requests) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(TransportState::Idle);

        let transport = Transport {
            host: options.host.clone(),
            port: options.port,
            authority: options.authority(),
            authorization: options.authorization(),
            user_agent: options.user_agent.clone(),
            request_timeout: options.request_timeout(),
            connect_timeout: options.connect_timeout(),
            requests,
            state: state_tx,
            socket: None,
            parser: ResponseParser::new(),
            read_buffer: vec![0u8; SOCKET_BUF_SIZE],
        };
        tokio::spawn(transport.run());

        Self { queue, state }
    }

    /// Queue a request now and return a future for its response.
    ///
    /// The request takes its place in the queue when this is called, not when
    /// the future is first polled.
    pub fn submit(
        &self,
        method: Method,
        target: impl Into<String>,
        body: impl Into<String>,
    ) -> impl Future<Output = AriResult<HttpResponse>> + Send + 'static {
        let (reply, response) = oneshot::channel();
        let queued = self
            .enqueue(CommandRequest {
                method,
                target: target.into(),
                body: body.into(),
                responder: Responder::Future(reply),
            })
            .is_ok();
        async move {
            if !queued {
                return Err(AriError::TransportShutdown);
            }
            response
                .await
                .map_err(|_| AriError::TransportShutdown)?
        }
    }

    /// Queue a request whose response is handed to `callback`.
    ///
    /// The callback is invoked exactly once, on the transport task, before the
    /// next queued request is written.
    pub fn submit_with<F>(
        &self,
        method: Method,
        target: impl Into<String>,
        body: impl Into<String>,
        callback: F,
    ) where
        F: FnOnce(AriResult<HttpResponse>) + Send + 'static,
    {
        let request = CommandRequest {
            method,
            target: target.into(),
            body: body.into(),
            responder: Responder::Callback(Box::new(callback)),
        };
        if let Err(request) = self.enqueue(request) {
            request
                .responder
                .respond(Err(AriError::TransportShutdown));
        }
    }

    /// Send a request and wait for its response
    pub async fn send_request(
        &self,
        method: Method,
        target: impl Into<String>,
        body: impl Into<String>,
    ) -> AriResult<HttpResponse> {
        self.submit(method, target, body)
            .await
    }

    pub async fn get(&self, target: impl Into<String>) -> AriResult<HttpResponse> {
        self.send_request(Method::Get, target, "")
            .await
    }

    pub async fn post(
        &self,
        target: impl Into<String>,
        body: impl Into<String>,
    ) -> AriResult<HttpResponse> {
        self.send_request(Method::Post, target, body)
            .await
    }

    pub async fn put(
        &self,
        target: impl Into<String>,
        body: impl Into<String>,
    ) -> AriResult<HttpResponse> {
        self.send_request(Method::Put, target, body)
            .await
    }

    pub async fn delete(&self, target: impl Into<String>) -> AriResult<HttpResponse> {
        self.send_request(Method::Delete, target, "")
            .await
    }

    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    /// Watch state transitions, e.g. to wait for the transport to go idle
    pub fn subscribe_state(&self) -> watch::Receiver<TransportState> {
        self.state.clone()
    }

    fn enqueue(&self, request: CommandRequest) -> Result<(), CommandRequest> {
        trace!("[HTTP] Queueing {} {}", request.method, request.target);
        self.queue
            .send(request)
            .map_err(|e| e.0)
    }
}

struct Transport {
    host: String,
    port: u16,
    authority: String,
    authorization: String,
    user_agent: String,
    request_timeout: Option<Duration>,
    connect_timeout: Duration,
    requests: mpsc::UnboundedReceiver<CommandRequest>,
    state: watch::Sender<TransportState>,
    socket: Option<TcpStream>,
    parser: ResponseParser,
    read_buffer: Vec<u8>,
}

impl Transport {
    async fn run(mut self) {
        while let Some(request) = self.requests.recv().await {
            let mut next = Some(request);
            while let Some(request) = next.take() {
                self.complete(request).await;
                next = self.requests.try_recv().ok();
            }
            self.close_socket("queue drained");
        }
        debug!("[HTTP] All client handles dropped, transport task exiting");
    }

    /// Run one request to completion and fire its responder
    async fn complete(&mut self, request: CommandRequest) {
        // The responder may hold a callback that is Send but not Sync, so it
        // must not be borrowed across the request's await points.
        let CommandRequest {
            method,
            target,
            body,
            responder,
        } = request;

        let result = match self.request_timeout {
            Some(limit) => match timeout(limit, self.execute(method, &target, &body)).await
            {
                Ok(result) => result,
                Err(_) => Err(AriError::timeout(limit)),
            },
            None => self.execute(method, &target, &body).await,
        };

        match &result {
            Ok(response) => {
                trace!("[HTTP] <= {} {}", response.status(), response.reason());
                if !response.body().is_empty() {
                    trace!("[HTTP]    {}", response.body());
                }
                if !response.keep_alive() {
                    self.close_socket("server closed the connection");
                }
            }
            Err(e) => {
                warn!("[HTTP] {} {} failed: {}", method, target, e);
                self.close_socket("transport error");
            }
        }

        responder.respond(result);
    }

    async fn execute(
        &mut self,
        method: Method,
        target: &str,
        body: &str,
    ) -> AriResult<HttpResponse> {
        if self.socket.is_none() {
            let socket = self.connect().await?;
            self.parser.reset();
            self.socket = Some(socket);
        }

        self.set_state(TransportState::Writing);
        trace!("[HTTP] => {} {}", method, target);
        let wire = RequestHead {
            method,
            target,
            host: &self.authority,
            authorization: &self.authorization,
            user_agent: &self.user_agent,
            body,
        }
        .to_wire_format();

        let socket = self
            .socket
            .as_mut()
            .ok_or(AriError::NotConnected)?;
        socket.write_all(&wire).await?;

        self.set_state(TransportState::ReadingResponse);
        self.read_response().await
    }

    async fn connect(&mut self) -> AriResult<TcpStream> {
        self.set_state(TransportState::Resolving);
        debug!("[CONNECT] Resolving {}", self.authority);
        let addrs: Vec<SocketAddr> = lookup_host((self.host.as_str(), self.port))
            .await?
            .collect();
        if addrs.is_empty() {
            return Err(AriError::Resolve {
                host: self.host.clone(),
            });
        }

        self.set_state(TransportState::Connecting);
        let mut last_error = None;
        for addr in addrs {
            debug!(
                "[CONNECT] Connecting to {} with {}ms timeout",
                addr,
                self.connect_timeout.as_millis()
            );
            match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(socket)) => {
                    socket.set_nodelay(true)?;
                    debug!("[CONNECT] TCP connection established to {}", addr);
                    return Ok(socket);
                }
                Ok(Err(e)) => {
                    debug!("[CONNECT] TCP connect to {} failed: {}", addr, e);
                    last_error = Some(AriError::Io(e));
                }
                Err(_) => {
                    debug!("[CONNECT] TCP connect to {} timed out", addr);
                    last_error = Some(AriError::timeout(self.connect_timeout));
                }
            }
        }
        Err(last_error.unwrap_or(AriError::Resolve {
            host: self.host.clone(),
        }))
    }

    async fn read_response(&mut self) -> AriResult<HttpResponse> {
        loop {
            if let Some(response) = self.parser.parse_response()? {
                return Ok(response);
            }

            let socket = self
                .socket
                .as_mut()
                .ok_or(AriError::NotConnected)?;
            let bytes_read = socket
                .read(&mut self.read_buffer)
                .await?;
            trace!("[RECV] Read {} bytes from socket", bytes_read);

            if bytes_read == 0 {
                return self
                    .parser
                    .finish()?
                    .ok_or(AriError::ConnectionClosed);
            }
            self.parser
                .add_data(&self.read_buffer[..bytes_read])?;
        }
    }

    fn close_socket(&mut self, reason: &str) {
        if let Some(socket) = self.socket.take() {
            debug!("[HTTP] Closing connection: {}", reason);
            drop(socket);
        }
        self.parser.reset();
        self.set_state(TransportState::Idle);
    }

    fn set_state(&self, state: TransportState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            trace!("[HTTP] {:?} -> {:?}", current, state);
            *current = state;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_connection_refused_reaches_every_request() {
        let port = unused_port().await;
        let client = HttpClient::new(&AriConnectOptions::new("127.0.0.1", port, "u", "p", "app"));

        let first = client.submit(Method::Get, "/ari/asterisk/info", "");
        let second = client.submit(Method::Get, "/ari/channels", "");

        let first = first.await;
        let second = second.await;
        assert!(matches!(first, Err(AriError::Io(_))));
        assert!(matches!(second, Err(AriError::Io(_))));
        assert_eq!(client.state(), TransportState::Idle);
    }

    #[tokio::test]
    async fn test_callback_panic_does_not_stop_queue() {
        let port = unused_port().await;
        let client = HttpClient::new(&AriConnectOptions::new("127.0.0.1", port, "u", "p", "app"));
        let (tx, rx) = oneshot::channel();

        client.submit_with(Method::Get, "/first", "", |_| panic!("callback bug"));
        client.submit_with(Method::Get, "/second", "", move |result| {
            let _ = tx.send(result.is_err());
        });

        assert!(tokio_test::assert_ok!(rx.await));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_callback_need_not_be_sync() {
        let port = unused_port().await;
        let client = HttpClient::new(&AriConnectOptions::new("127.0.0.1", port, "u", "p", "app"));
        let (tx, rx) = oneshot::channel();
        let attempts = std::cell::Cell::new(0u32);

        client.submit_with(Method::Get, "/ari/channels", "", move |result| {
            attempts.set(attempts.get() + 1);
            let _ = tx.send((attempts.get(), result.is_err()));
        });

        assert_eq!(tokio_test::assert_ok!(rx.await), (1, true));
    }
}
