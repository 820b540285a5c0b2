//! Connection options shared by the command transport and the event stream

use crate::{auth, constants::*};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Where and how to reach the Asterisk HTTP server.
///
/// Deserializable with defaults for every field, so a partial config file
/// section is enough:
///
/// ```rust
/// use asterisk_ari_tokio::AriConnectOptions;
///
/// let options: AriConnectOptions = serde_json::from_str(
///     r#"{"host":"pbx.example.com","application":"ivr","request_timeout_ms":2000}"#,
/// ).unwrap();
/// assert_eq!(options.port, 8088);
/// assert_eq!(options.events_path(), "/ari/events?api_key=asterisk:asterisk&app=ivr&subscribeAll=true");
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AriConnectOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Stasis application name
    pub application: String,
    /// Fail a command that gets no response in time. Disabled when `None`.
    pub request_timeout_ms: Option<u64>,
    pub connect_timeout_ms: u64,
    /// Add `subscribeAll=true` to the event stream handshake
    pub subscribe_all: bool,
    /// `eventSource` values for the finalizing subscription command
    pub event_sources: Vec<String>,
    pub user_agent: String,
}

impl Default for AriConnectOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_ARI_PORT,
            username: "asterisk".to_string(),
            password: "asterisk".to_string(),
            application: "attendant".to_string(),
            request_timeout_ms: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            subscribe_all: true,
            event_sources: DEFAULT_EVENT_SOURCES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl AriConnectOptions {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        application: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            application: application.into(),
            ..Default::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_subscribe_all(mut self, subscribe_all: bool) -> Self {
        self.subscribe_all = subscribe_all;
        self
    }

    pub fn with_event_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_sources = sources
            .into_iter()
            .map(Into::into)
            .collect();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms
            .map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `host:port` as used in the `Host` header and URLs
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn authorization(&self) -> String {
        auth::basic_auth(&self.username, &self.password)
    }

    pub fn websocket_url(&self) -> String {
        format!("ws://{}", self.authority())
    }

    /// Event stream handshake path with credentials and application embedded
    pub fn events_path(&self) -> String {
        let mut path = format!(
            "{}?api_key={}&app={}",
            ARI_EVENTS_PATH,
            auth::api_key(&self.username, &self.password),
            auth::encode_query_component(&self.application)
        );
        if self.subscribe_all {
            path.push_str("&subscribeAll=true");
        }
        path
    }

    /// Target of the finalizing subscription command
    pub fn subscription_path(&self) -> String {
        format!(
            "{}/{}/subscription?eventSource={}",
            ARI_APPLICATIONS_PATH,
            auth::encode_query_component(&self.application),
            self.event_sources.join(",")
        )
    }
}

impl fmt::Debug for AriConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AriConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("application", &self.application)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("subscribe_all", &self.subscribe_all)
            .field("event_sources", &self.event_sources)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let options = AriConnectOptions::new("10.0.0.5", 8088, "ari", "p@ss", "hold");
        assert_eq!(
            options.events_path(),
            "/ari/events?api_key=ari:p%40ss&app=hold&subscribeAll=true"
        );
        assert_eq!(
            options.subscription_path(),
            "/ari/applications/hold/subscription?eventSource=channel:,endpoint:,bridge:,deviceState:"
        );
        assert_eq!(options.websocket_url(), "ws://10.0.0.5:8088");
    }

    #[test]
    fn test_subscribe_all_disabled() {
        let options = AriConnectOptions::default()
            .with_subscribe_all(false)
            .with_event_sources(["channel:"]);
        assert!(!options.events_path().contains("subscribeAll"));
        assert!(options.subscription_path().ends_with("eventSource=channel:"));
    }

    #[test]
    fn test_ipv6_authority() {
        let options = AriConnectOptions::new("::1", 8088, "a", "b", "c");
        assert_eq!(options.authority(), "[::1]:8088");
    }

    #[test]
    fn test_debug_hides_password() {
        let options = AriConnectOptions::new("h", 1, "user", "hunter2", "app");
        let text = format!("{:?}", options);
        assert!(!text.contains("hunter2"));
    }

    #[test]
    fn test_timeouts() {
        let options = AriConnectOptions::default();
        assert_eq!(options.request_timeout(), None);
        assert_eq!(options.connect_timeout(), Duration::from_millis(5000));

        let options = options.with_request_timeout(Duration::from_millis(250));
        assert_eq!(options.request_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_huge_timeouts_saturate() {
        let options = AriConnectOptions::default()
            .with_request_timeout(Duration::MAX)
            .with_connect_timeout(Duration::MAX);
        assert_eq!(options.request_timeout_ms, Some(u64::MAX));
        assert_eq!(options.connect_timeout_ms, u64::MAX);
    }
}
