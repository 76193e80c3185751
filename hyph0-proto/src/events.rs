//! Named, per-event ordered dispatch of user-supplied callbacks.
//!
//! Grounded on `original_source/hyphen0/hyphen0/client.py`'s `add_hook`/`_call_hook`: hooks
//! are addressable by name so a caller can later remove a specific one, and emission walks
//! hooks for an event in insertion order. [`crate::proto_socket::ProtoSocket`] raises
//! `packet_received`/`ptype_<name>_received` from its own hub; [`crate::handshake::HandshakeEngine`]
//! raises the rest of spec.md §4.7's named events at the matching phase transitions.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Result;

type BoxFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// A cooperative event callback. May suspend (it returns a future) and may fail; a
/// failing hook propagates and closes the connection.
pub trait Hook: Send + Sync {
    fn call(&self, payload: &EventPayload) -> BoxFuture<'_>;
}

impl<F, Fut> Hook for F
where
    F: Fn(&EventPayload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn call(&self, payload: &EventPayload) -> BoxFuture<'_> {
        Box::pin(self(payload))
    }
}

/// The argument passed to a hook. Most events carry no data (`None`); packet-arrival
/// events carry the received packet's debug representation and type name.
#[derive(Debug, Clone, Default)]
pub struct EventPayload {
    pub event: String,
    pub detail: Option<String>,
}

/// Ordered, named hook registry for one connection endpoint.
///
/// Hooks for a given event name fire in the order they were added; hooks across
/// different event names have no relative ordering guarantee.
#[derive(Default)]
pub struct EventHub {
    hooks: HashMap<String, Vec<(String, Arc<dyn Hook>)>>,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field(
                "hooks",
                &self
                    .hooks
                    .iter()
                    .map(|(event, hooks)| (event.clone(), hooks.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>()))
                    .collect::<HashMap<_, _>>(),
            )
            .finish()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `hook` under `event`, addressable later as `name`. Re-registering the
    /// same `name` under the same event replaces the previous hook in place (same
    /// position), matching an ordered map's "insert or update" semantics.
    pub fn on<H>(&mut self, event: impl Into<String>, name: impl Into<String>, hook: H)
    where
        H: Hook + 'static,
    {
        let event = event.into();
        let name = name.into();
        let hook: Arc<dyn Hook> = Arc::new(hook);
        let bucket = self.hooks.entry(event).or_default();
        if let Some(slot) = bucket.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = hook;
        } else {
            bucket.push((name, hook));
        }
    }

    /// Removes a previously registered hook. No-op if it was never registered.
    pub fn remove(&mut self, event: &str, name: &str) {
        if let Some(bucket) = self.hooks.get_mut(event) {
            bucket.retain(|(n, _)| n != name);
        }
    }

    /// Emits `event`, running every registered hook in insertion order. The first hook
    /// to fail aborts emission; its error is propagated to the caller, which is expected
    /// to close the connection.
    pub async fn emit(&self, event: &str, detail: Option<String>) -> Result<()> {
        let Some(bucket) = self.hooks.get(event) else {
            return Ok(());
        };
        let payload = EventPayload {
            event: event.to_string(),
            detail,
        };
        for (_, hook) in bucket {
            hook.call(&payload).await?;
        }
        Ok(())
    }
}
