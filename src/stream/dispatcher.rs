use crate::core::kernel::codec::{FrameCodec, JsonCodec};
use crate::core::kernel::ws::ConnectionHandle;
use crate::stream::registry::EndpointRegistry;
use serde_json::Value;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, trace, warn};

/// What happened to one inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// No live endpoint owns the handle
    Stale,
    /// Payload failed to decode and was dropped
    Malformed,
    /// Handler returned an error or panicked
    HandlerFailed,
}

/// Sole caller of application handlers.
///
/// Looks the owning endpoint up through the registry's handle index (O(1)),
/// decodes the frame and runs the handler with the registry unlocked. Decode
/// errors, handler errors and handler panics all stop here.
pub struct MessageDispatcher<C = JsonCodec> {
    registry: Arc<EndpointRegistry>,
    codec: C,
}

impl MessageDispatcher<JsonCodec> {
    pub fn new(registry: Arc<EndpointRegistry>) -> Self {
        Self::with_codec(registry, JsonCodec)
    }
}

impl<C> MessageDispatcher<C>
where
    C: FrameCodec<Message = Value>,
{
    pub fn with_codec(registry: Arc<EndpointRegistry>, codec: C) -> Self {
        Self { registry, codec }
    }

    pub fn dispatch(&self, handle: ConnectionHandle, payload: &[u8]) -> DispatchOutcome {
        let decoded = self.codec.decode(payload);

        let (path, handler) = {
            let mut inner = self.registry.lock();
            let Some(entry) = inner.entry_by_handle(handle) else {
                trace!(%handle, "frame for stale connection dropped");
                return DispatchOutcome::Stale;
            };
            // any frame proves the connection is alive
            entry.last_activity = Instant::now();
            entry.probe_outstanding = false;
            if decoded.is_ok() {
                entry.retry_count = 0;
            }
            (entry.path.clone(), Arc::clone(&entry.handler))
        };

        let message = match decoded {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    path = %path,
                    %handle,
                    bytes = payload.len(),
                    error = %e,
                    "dropping malformed stream message"
                );
                return DispatchOutcome::Malformed;
            }
        };

        match catch_unwind(AssertUnwindSafe(|| handler(&message))) {
            Ok(Ok(())) => DispatchOutcome::Delivered,
            Ok(Err(e)) => {
                warn!(path = %path, error = %e, "stream handler returned an error");
                DispatchOutcome::HandlerFailed
            }
            Err(panic) => {
                error!(
                    path = %path,
                    panic = %panic_message(panic.as_ref()),
                    "stream handler panicked"
                );
                DispatchOutcome::HandlerFailed
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::registry::{handler_fn, Handler};
    use std::sync::Mutex;

    fn registry_with(path: &str, handler: Handler) -> (Arc<EndpointRegistry>, ConnectionHandle) {
        let registry = Arc::new(EndpointRegistry::default());
        registry.insert(path, handler).unwrap();
        let handle = ConnectionHandle::new(1);
        registry.lock().bind(path, handle);
        (registry, handle)
    }

    #[test]
    fn test_delivers_parsed_message() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let (registry, handle) = registry_with(
            "/ws/a",
            handler_fn(move |v| {
                sink.lock().unwrap().push(v.clone());
                Ok(())
            }),
        );
        let dispatcher = MessageDispatcher::new(registry);

        assert_eq!(
            dispatcher.dispatch(handle, br#"{"x":1}"#),
            DispatchOutcome::Delivered
        );
        assert_eq!(*seen.lock().unwrap(), vec![serde_json::json!({"x": 1})]);
    }

    #[test]
    fn test_unknown_handle_is_stale() {
        let (registry, _) = registry_with("/ws/a", handler_fn(|_| Ok(())));
        let dispatcher = MessageDispatcher::new(registry);
        assert_eq!(
            dispatcher.dispatch(ConnectionHandle::new(99), b"{}"),
            DispatchOutcome::Stale
        );
    }

    #[test]
    fn test_malformed_frame_keeps_retry_count() {
        let (registry, handle) = registry_with("/ws/a", handler_fn(|_| Ok(())));
        registry.lock().entries.get_mut("/ws/a").unwrap().retry_count = 3;
        let dispatcher = MessageDispatcher::new(Arc::clone(&registry));

        assert_eq!(
            dispatcher.dispatch(handle, b"{not json"),
            DispatchOutcome::Malformed
        );
        assert_eq!(registry.find("/ws/a").unwrap().retry_count, 3);

        assert_eq!(dispatcher.dispatch(handle, b"[]"), DispatchOutcome::Delivered);
        assert_eq!(registry.find("/ws/a").unwrap().retry_count, 0);
    }

    #[test]
    fn test_handler_error_and_panic_are_contained() {
        let (registry, handle) = registry_with(
            "/ws/a",
            handler_fn(|v| {
                if v["panic"].as_bool() == Some(true) {
                    panic!("boom");
                }
                anyhow::bail!("rejected")
            }),
        );
        let dispatcher = MessageDispatcher::new(registry);

        assert_eq!(
            dispatcher.dispatch(handle, br#"{"panic":false}"#),
            DispatchOutcome::HandlerFailed
        );
        assert_eq!(
            dispatcher.dispatch(handle, br#"{"panic":true}"#),
            DispatchOutcome::HandlerFailed
        );
    }

    #[test]
    fn test_handler_may_reenter_registry() {
        let registry = Arc::new(EndpointRegistry::default());
        let inner_registry = Arc::clone(&registry);
        registry
            .insert(
                "/ws/a",
                handler_fn(move |_| {
                    inner_registry.request_close("/ws/a");
                    Ok(())
                }),
            )
            .unwrap();
        let handle = ConnectionHandle::new(5);
        registry.lock().bind("/ws/a", handle);

        let dispatcher = MessageDispatcher::new(Arc::clone(&registry));
        assert_eq!(dispatcher.dispatch(handle, b"{}"), DispatchOutcome::Delivered);
        assert!(registry.find("/ws/a").unwrap().close_requested);
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
