//! Client facade: one event stream, one command queue, one dispatch registry

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    config::AriConnectOptions,
    dispatch::EventRegistry,
    error::{AriError, AriResult, HandlerResult},
    event::AriEvent,
    method::Method,
    protocol::HttpResponse,
    transport::HttpClient,
    websocket::{EventStream, StreamState},
};

/// Client for one Stasis application on one Asterisk server.
///
/// Commands can be sent as soon as the client is created; events are
/// delivered to handlers registered with [`on_event`](Self::on_event) once
/// [`connect`](Self::connect) succeeds.
pub struct AriClient {
    options: AriConnectOptions,
    http: HttpClient,
    stream: EventStream,
    registry: Arc<EventRegistry>,
    ready: Arc<AtomicBool>,
}

impl AriClient {
    /// Create the client and start its command transport.
    /// Must be called from within a Tokio runtime.
    pub fn new(options: AriConnectOptions) -> Self {
        let http = HttpClient::new(&options);
        let stream =
            EventStream::new(options.websocket_url()).with_connect_timeout(options.connect_timeout());
        Self {
            options,
            http,
            stream,
            registry: Arc::new(EventRegistry::new()),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open the event stream and register the application's subscriptions.
    ///
    /// A zero `retry_interval` fails on the first handshake error; otherwise
    /// the handshake is retried on that interval until it succeeds or
    /// [`close`](Self::close) is called. The result is that of the
    /// finalizing subscription command: a handshake that succeeds followed by
    /// a rejected subscription is an error.
    pub async fn connect(&self, retry_interval: Duration) -> AriResult<()> {
        self.ready.store(false, Ordering::SeqCst);
        info!(
            "Connecting application {} to {}",
            self.options.application,
            self.options.authority()
        );

        self.stream
            .connect(&self.options.events_path(), retry_interval)
            .await?;

        let registry = self.registry.clone();
        let ready = self.ready.clone();
        self.stream.receive(move |message| match message {
            Ok(payload) => {
                if let Err(e) = registry.dispatch(&payload) {
                    warn!("Dropping event: {}", e);
                    debug!("Dropped payload: {}", payload);
                }
            }
            Err(e) => {
                ready.store(false, Ordering::SeqCst);
                warn!("Event stream lost: {}", e);
            }
        })?;

        let response = match self
            .http
            .send_request(Method::Post, self.options.subscription_path(), "")
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Subscription command failed: {}", e);
                self.stream.disconnect();
                return Err(e);
            }
        };
        if !response.is_success() {
            warn!(
                "Subscription rejected: {} {}",
                response.status(),
                response.reason()
            );
            self.stream.disconnect();
            return Err(AriError::SubscriptionFailed {
                status: response.status(),
                reason: response.reason().to_string(),
            });
        }

        self.ready.store(true, Ordering::SeqCst);
        info!("Application {} ready", self.options.application);
        Ok(())
    }

    /// Run `handler` for every event of `event_type`
    pub fn on_event<F>(&self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(&AriEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry
            .register(event_type, handler);
    }

    /// Queue a raw command; `callback` receives the response exactly once
    pub fn raw_cmd<F>(
        &self,
        method: Method,
        path: impl Into<String>,
        body: impl Into<String>,
        callback: F,
    ) where
        F: FnOnce(AriResult<HttpResponse>) + Send + 'static,
    {
        self.http
            .submit_with(method, path, body, callback);
    }

    /// Send a raw command and wait for the response
    pub async fn request(
        &self,
        method: Method,
        path: impl Into<String>,
        body: impl Into<String>,
    ) -> AriResult<HttpResponse> {
        self.http
            .send_request(method, path, body)
            .await
    }

    /// Cloneable handle to the command queue
    pub fn commands(&self) -> HttpClient {
        self.http.clone()
    }

    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &AriConnectOptions {
        &self.options
    }

    /// Subscribed and the event stream is still up
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && self.stream.state() == StreamState::Connected
    }

    pub fn stream_state(&self) -> StreamState {
        self.stream.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<StreamState> {
        self.stream.subscribe_state()
    }

    /// Tear down the event stream. Queued commands still complete.
    pub fn close(&self) {
        self.ready.store(false, Ordering::SeqCst);
        self.stream.close();
    }
}

impl Drop for AriClient {
    fn drop(&mut self) {
        self.close();
    }
}
