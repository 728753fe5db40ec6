use std::fmt;
use std::rc::Rc;

use anyhow::Result;

use crate::bridge::{BridgeClient, BridgeFailure, HostValue};
use crate::events::{Event, EventDispatcher};

/// Opaque token minted by the host for one of its nodes.
///
/// Two handles with equal tokens refer to the same host node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementHandle(Rc<str>);

impl ElementHandle {
    pub fn new(token: impl AsRef<str>) -> Self {
        Self(Rc::from(token.as_ref()))
    }

    pub fn token(&self) -> &str {
        &self.0
    }

    /// Accept string tokens as-is and integer tokens in decimal form.
    pub fn from_host_value(value: &HostValue) -> Option<Self> {
        match value {
            HostValue::String(token) => Some(Self::new(token)),
            HostValue::Number(number) if number.is_u64() || number.is_i64() => {
                Some(Self::new(number.to_string()))
            }
            _ => None,
        }
    }

    pub fn to_host_value(&self) -> HostValue {
        HostValue::String(self.0.to_string())
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Document-like entry point for native callers.
#[derive(Debug, Clone)]
pub struct Document {
    client: BridgeClient,
    dispatcher: EventDispatcher,
}

impl Document {
    pub fn new(client: BridgeClient, dispatcher: EventDispatcher) -> Self {
        Self { client, dispatcher }
    }

    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<Element>, BridgeFailure> {
        let handles = self.client.query_selector_all(selector)?;
        Ok(handles
            .into_iter()
            .map(|handle| self.element(handle))
            .collect())
    }

    pub fn element(&self, handle: ElementHandle) -> Element {
        Element {
            handle,
            client: self.client.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }
}

/// A host node together with the capabilities that operate on it.
#[derive(Debug, Clone)]
pub struct Element {
    handle: ElementHandle,
    client: BridgeClient,
    dispatcher: EventDispatcher,
}

impl Element {
    pub fn handle(&self) -> &ElementHandle {
        &self.handle
    }

    pub fn get_attribute(&self, name: &str) -> Result<Option<String>, BridgeFailure> {
        self.client.get_attribute(&self.handle, name)
    }

    pub fn set_inner_content(&self, value: impl fmt::Display) -> Result<(), BridgeFailure> {
        self.client.set_inner_html(&self.handle, &value.to_string())
    }

    pub fn add_event_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&Element, &mut Event) -> Result<()> + 'static,
    {
        self.dispatcher
            .add_event_listener(&self.handle, event_type, listener);
    }

    pub fn dispatch_event(&self, event: &mut Event) -> Result<bool> {
        self.dispatcher.dispatch_event(self, event)
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for Element {}
