//! Scripting runtime that drives a host-owned document through a narrow,
//! synchronous call boundary.

pub mod bridge;
pub mod config;
pub mod dom;
pub mod events;
pub mod js;
pub mod request;

pub use bridge::{BridgeClient, BridgeFailure, HostBridge, HostValue};
pub use config::{ConfigError, RuntimeConfig};
pub use dom::{Document, Element, ElementHandle};
pub use events::{Event, EventDispatcher, ListenerRegistry};
pub use js::{ScriptEnvironment, ScriptSource};
pub use request::{allowed_origins_from_csp, RequestError, RequestPolicy, SyncRequest, UsageError};
