use std::fmt;
use std::rc::Rc;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::trace;

use crate::dom::ElementHandle;

/// Value exchanged with the host. Sequences are JSON arrays and absence is `null`.
pub type HostValue = JsonValue;

/// Operation names understood by the host.
pub mod ops {
    pub const QUERY_SELECTOR_ALL: &str = "querySelectorAll";
    pub const GET_ATTRIBUTE: &str = "getAttribute";
    pub const INNER_HTML_SET: &str = "innerHTML_set";
    pub const XHR_SEND: &str = "XMLHttpRequest_send";
}

/// The host call itself failed, or replied with something the operation cannot accept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("host call `{op}` failed: {message}")]
pub struct BridgeFailure {
    pub op: String,
    pub message: String,
}

impl BridgeFailure {
    pub fn new(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            message: message.into(),
        }
    }
}

/// Synchronous call boundary to the process that owns the document and the network.
pub trait HostBridge {
    fn call(&self, op: &str, args: &[HostValue]) -> Result<HostValue, BridgeFailure>;
}

impl<F> HostBridge for F
where
    F: Fn(&str, &[HostValue]) -> Result<HostValue, BridgeFailure>,
{
    fn call(&self, op: &str, args: &[HostValue]) -> Result<HostValue, BridgeFailure> {
        self(op, args)
    }
}

/// Typed wrapper over a [`HostBridge`].
///
/// Every method performs exactly one host call and hands failures back unchanged.
#[derive(Clone)]
pub struct BridgeClient {
    host: Rc<dyn HostBridge>,
}

impl fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeClient").finish_non_exhaustive()
    }
}

impl BridgeClient {
    pub fn new(host: impl HostBridge + 'static) -> Self {
        Self {
            host: Rc::new(host),
        }
    }

    pub fn from_shared(host: Rc<dyn HostBridge>) -> Self {
        Self { host }
    }

    fn call(&self, op: &str, args: &[HostValue]) -> Result<HostValue, BridgeFailure> {
        trace!(target: "bridge", op, args = args.len(), "host call");
        self.host.call(op, args)
    }

    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<ElementHandle>, BridgeFailure> {
        let reply = self.call(
            ops::QUERY_SELECTOR_ALL,
            &[HostValue::String(selector.to_string())],
        )?;

        let tokens = match reply {
            HostValue::Null => return Ok(Vec::new()),
            HostValue::Array(tokens) => tokens,
            other => {
                return Err(BridgeFailure::new(
                    ops::QUERY_SELECTOR_ALL,
                    format!("expected a sequence of handles, got {other}"),
                ))
            }
        };

        tokens
            .into_iter()
            .map(|token| {
                ElementHandle::from_host_value(&token).ok_or_else(|| {
                    BridgeFailure::new(
                        ops::QUERY_SELECTOR_ALL,
                        format!("malformed handle token {token}"),
                    )
                })
            })
            .collect()
    }

    pub fn get_attribute(
        &self,
        handle: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, BridgeFailure> {
        let reply = self.call(
            ops::GET_ATTRIBUTE,
            &[handle.to_host_value(), HostValue::String(name.to_string())],
        )?;

        match reply {
            HostValue::Null => Ok(None),
            HostValue::String(value) => Ok(Some(value)),
            HostValue::Number(value) => Ok(Some(value.to_string())),
            HostValue::Bool(value) => Ok(Some(value.to_string())),
            other => Err(BridgeFailure::new(
                ops::GET_ATTRIBUTE,
                format!("expected an attribute value, got {other}"),
            )),
        }
    }

    pub fn set_inner_html(&self, handle: &ElementHandle, value: &str) -> Result<(), BridgeFailure> {
        self.call(
            ops::INNER_HTML_SET,
            &[handle.to_host_value(), HostValue::String(value.to_string())],
        )?;
        Ok(())
    }

    /// Perform one blocking request/response round trip through the host.
    pub fn send_request(
        &self,
        method: &str,
        url: &str,
        body: Option<&str>,
    ) -> Result<String, BridgeFailure> {
        let body = body
            .map(|body| HostValue::String(body.to_string()))
            .unwrap_or(HostValue::Null);
        let reply = self.call(
            ops::XHR_SEND,
            &[
                HostValue::String(method.to_string()),
                HostValue::String(url.to_string()),
                body,
            ],
        )?;

        match reply {
            HostValue::String(text) => Ok(text),
            other => Err(BridgeFailure::new(
                ops::XHR_SEND,
                format!("expected a response body, got {other}"),
            )),
        }
    }
}
