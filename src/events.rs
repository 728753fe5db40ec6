use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use anyhow::Result;
use tracing::debug;

use crate::dom::{Element, ElementHandle};

/// A single occurrence delivered to listeners.
///
/// `proceed_with_default` starts `true` and can only ever become `false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    event_type: String,
    proceed_with_default: bool,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            proceed_with_default: true,
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn proceed_with_default(&self) -> bool {
        self.proceed_with_default
    }

    pub fn cancel_default(&mut self) {
        self.proceed_with_default = false;
    }

    pub fn prevent_default(&mut self) {
        self.cancel_default();
    }
}

/// Listeners keyed by element handle, then by event type, in registration order.
///
/// Entries are never removed or deduplicated; registering the same listener twice
/// makes it run twice.
pub struct ListenerRegistry<L> {
    entries: HashMap<ElementHandle, HashMap<String, Vec<L>>>,
}

impl<L> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<L> fmt::Debug for ListenerRegistry<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("targets", &self.entries.len())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl<L> ListenerRegistry<L> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_event_listener(
        &mut self,
        handle: &ElementHandle,
        event_type: impl Into<String>,
        listener: L,
    ) {
        self.entries
            .entry(handle.clone())
            .or_default()
            .entry(event_type.into())
            .or_default()
            .push(listener);
    }

    pub fn is_listening(&self, handle: &ElementHandle, event_type: &str) -> bool {
        self.entries
            .get(handle)
            .and_then(|types| types.get(event_type))
            .is_some_and(|list| !list.is_empty())
    }

    pub fn listener_count(&self) -> usize {
        self.entries
            .values()
            .flat_map(|types| types.values())
            .map(Vec::len)
            .sum()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<L: Clone> ListenerRegistry<L> {
    /// Snapshot of the listeners for `(handle, event_type)`; empty when none were added.
    pub fn listeners(&self, handle: &ElementHandle, event_type: &str) -> Vec<L> {
        self.entries
            .get(handle)
            .and_then(|types| types.get(event_type))
            .cloned()
            .unwrap_or_default()
    }
}

pub type SharedRegistry<L> = Rc<RefCell<ListenerRegistry<L>>>;

/// Invoke `listeners` in order against `event` and report whether the default action
/// should proceed.
///
/// The first failing listener stops the dispatch and its error is returned as is;
/// later listeners do not run.
pub fn dispatch_listeners<L, E, F>(listeners: &[L], event: &mut Event, mut invoke: F) -> Result<bool, E>
where
    F: FnMut(&L, &mut Event) -> Result<(), E>,
{
    debug!(
        target: "events",
        event_type = event.event_type(),
        listeners = listeners.len(),
        "dispatching event"
    );

    for listener in listeners {
        invoke(listener, event)?;
    }

    Ok(event.proceed_with_default())
}

/// Listener callable used by native Rust callers. The target element is passed explicitly.
pub type NativeListener = Rc<dyn Fn(&Element, &mut Event) -> Result<()>>;

/// Registration and dispatch over an injected listener registry.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: SharedRegistry<NativeListener>,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventDispatcher")
            .field(&self.registry.borrow())
            .finish()
    }
}

impl EventDispatcher {
    pub fn new(registry: SharedRegistry<NativeListener>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> SharedRegistry<NativeListener> {
        Rc::clone(&self.registry)
    }

    pub fn add_event_listener<F>(&self, handle: &ElementHandle, event_type: &str, listener: F)
    where
        F: Fn(&Element, &mut Event) -> Result<()> + 'static,
    {
        self.registry
            .borrow_mut()
            .add_event_listener(handle, event_type, Rc::new(listener) as NativeListener);
    }

    pub fn is_listening(&self, handle: &ElementHandle, event_type: &str) -> bool {
        self.registry.borrow().is_listening(handle, event_type)
    }

    /// Run every listener registered for `(target, event.type)` with `target` as context.
    ///
    /// Listeners registered while the dispatch is running take effect on the next one.
    pub fn dispatch_event(&self, target: &Element, event: &mut Event) -> Result<bool> {
        let listeners = self
            .registry
            .borrow()
            .listeners(target.handle(), event.event_type());
        dispatch_listeners(&listeners, event, |listener, event| listener(target, event))
    }
}
