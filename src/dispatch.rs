//! Event-type dispatch registry.
//!
//! Maps event type names to application handlers. Every handler registered
//! for a type runs for each event of that type; a handler that returns an
//! error or panics is logged and skipped without affecting the others.

use crate::{
    error::{AriResult, HandlerResult},
    event::AriEvent,
};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, trace, warn};

/// Shared handler for one event type
pub type EventHandler = Arc<dyn Fn(&AriEvent) -> HandlerResult + Send + Sync>;

/// Outcome of dispatching one event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub event_type: String,
    /// Handlers that ran (including failed ones)
    pub invoked: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
}

#[derive(Default)]
pub struct EventRegistry {
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for `event_type`. Handlers are never removed.
    pub fn register<F>(&self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(&AriEvent) -> HandlerResult + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        debug!("Registering handler for {}", event_type);
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_type)
            .or_default()
            .push(Arc::new(handler));
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Event types with at least one handler
    pub fn event_types(&self) -> Vec<String> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Parse `raw` and run every handler registered for its type.
    ///
    /// Returns an error only when the payload cannot be parsed; handler
    /// failures are logged and counted in the report.
    pub fn dispatch(&self, raw: &str) -> AriResult<DispatchReport> {
        let event = AriEvent::parse(raw)?;
        Ok(self.dispatch_event(&event))
    }

    pub fn dispatch_event(&self, event: &AriEvent) -> DispatchReport {
        let event_type = event.event_type();
        // released before the handlers run so they may register more
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .cloned()
            .unwrap_or_default();

        let mut report = DispatchReport {
            event_type: event_type.to_string(),
            ..Default::default()
        };

        if handlers.is_empty() {
            trace!("No handler for {}", event_type);
            return report;
        }

        for handler in handlers {
            report.invoked += 1;
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!("Handler for {} failed: {}", event_type, e);
                }
                Err(panic) => {
                    report.failed += 1;
                    warn!(
                        "Handler for {} panicked: {}",
                        event_type,
                        panic_message(panic.as_ref())
                    );
                }
            }
        }

        report
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AriError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn counter(registry: &EventRegistry, event_type: &str) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        registry.register(event_type, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        count
    }

    #[test]
    fn test_unhandled_type_is_dropped() {
        let registry = EventRegistry::new();
        let pings = counter(&registry, "Ping");

        let report = registry.dispatch(r#"{"type":"Pong"}"#).unwrap();
        assert_eq!(report.invoked, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(pings.load(Ordering::SeqCst), 0);
        assert_eq!(registry.handler_count("Pong"), 0);
        assert_eq!(registry.event_types(), vec!["Ping".to_string()]);
    }

    #[test]
    fn test_handler_sees_document() {
        let registry = EventRegistry::new();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        registry.register("Ping", move |event| {
            *s.lock().unwrap() = Some((
                event.get_str("type").map(str::to_string),
                event.get_i64("id"),
            ));
            Ok(())
        });

        registry.dispatch(r#"{"type":"Ping","id":1}"#).unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            Some((Some("Ping".to_string()), Some(1)))
        );
    }

    #[test]
    fn test_failing_handlers_are_contained() {
        let registry = EventRegistry::new();
        let first = counter(&registry, "ChannelDestroyed");
        registry.register("ChannelDestroyed", |_| Err("boom".into()));
        registry.register("ChannelDestroyed", |_| panic!("handler bug"));
        let last = counter(&registry, "ChannelDestroyed");

        let report = registry
            .dispatch(r#"{"type":"ChannelDestroyed","cause":16}"#)
            .unwrap();
        assert_eq!(report.invoked, 4);
        assert_eq!(report.failed, 2);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(last.load(Ordering::SeqCst), 1);

        // the next event is unaffected
        registry
            .dispatch(r#"{"type":"ChannelDestroyed","cause":16}"#)
            .unwrap();
        assert_eq!(last.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_parse_errors_returned() {
        let registry = EventRegistry::new();
        let pings = counter(&registry, "Ping");

        assert!(matches!(registry.dispatch("not json"), Err(AriError::Json(_))));
        assert!(matches!(
            registry.dispatch(r#"{"id":1}"#),
            Err(AriError::MissingField { .. })
        ));
        assert_eq!(pings.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handler_can_register_during_dispatch() {
        let registry = Arc::new(EventRegistry::new());
        let r = registry.clone();
        registry.register("StasisStart", move |_| {
            r.register("StasisEnd", |_| Ok(()));
            Ok(())
        });

        registry.dispatch(r#"{"type":"StasisStart"}"#).unwrap();
        assert_eq!(registry.handler_count("StasisEnd"), 1);
    }
}
