#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use bridgejs::bridge::ops;
use bridgejs::{BridgeFailure, HostBridge, HostValue};
use serde_json::json;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Default)]
pub struct FakeNode {
    pub tag: String,
    pub attributes: HashMap<String, String>,
    pub inner_html: Option<String>,
}

#[derive(Debug, Default)]
struct FakeHostState {
    nodes: Vec<FakeNode>,
    responses: HashMap<(String, String), String>,
    failing_ops: HashSet<String>,
    calls: Vec<(String, Vec<HostValue>)>,
}

/// In-memory host: handles are node indices and selectors match tag names.
#[derive(Debug, Clone, Default)]
pub struct FakeHost {
    state: Rc<RefCell<FakeHostState>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node and return its handle token.
    pub fn add_node(&self, tag: &str, attributes: &[(&str, &str)]) -> String {
        let mut state = self.state.borrow_mut();
        state.nodes.push(FakeNode {
            tag: tag.to_string(),
            attributes: attributes
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            inner_html: None,
        });
        (state.nodes.len() - 1).to_string()
    }

    pub fn set_attribute(&self, token: &str, name: &str, value: &str) {
        let index: usize = token.parse().expect("numeric token");
        self.state.borrow_mut().nodes[index]
            .attributes
            .insert(name.to_string(), value.to_string());
    }

    pub fn inner_html(&self, token: &str) -> Option<String> {
        let index: usize = token.parse().expect("numeric token");
        self.state.borrow().nodes[index].inner_html.clone()
    }

    pub fn respond(&self, method: &str, url: &str, body: &str) {
        self.state
            .borrow_mut()
            .responses
            .insert((method.to_string(), url.to_string()), body.to_string());
    }

    pub fn fail(&self, op: &str) {
        self.state.borrow_mut().failing_ops.insert(op.to_string());
    }

    pub fn calls(&self, op: &str) -> Vec<Vec<HostValue>> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|(name, _)| name == op)
            .map(|(_, args)| args.clone())
            .collect()
    }

    fn node_index(state: &FakeHostState, op: &str, token: &HostValue) -> Result<usize, BridgeFailure> {
        token
            .as_str()
            .and_then(|token| token.parse::<usize>().ok())
            .filter(|index| *index < state.nodes.len())
            .ok_or_else(|| BridgeFailure::new(op, format!("no node for handle {token}")))
    }
}

impl HostBridge for FakeHost {
    fn call(&self, op: &str, args: &[HostValue]) -> Result<HostValue, BridgeFailure> {
        let mut state = self.state.borrow_mut();
        state.calls.push((op.to_string(), args.to_vec()));
        if state.failing_ops.contains(op) {
            return Err(BridgeFailure::new(op, "host unavailable"));
        }

        match op {
            ops::QUERY_SELECTOR_ALL => {
                let selector = args[0].as_str().unwrap_or_default();
                let handles: Vec<_> = state
                    .nodes
                    .iter()
                    .enumerate()
                    .filter(|(_, node)| node.tag == selector)
                    .map(|(index, _)| json!(index))
                    .collect();
                Ok(HostValue::Array(handles))
            }
            ops::GET_ATTRIBUTE => {
                let index = Self::node_index(&state, op, &args[0])?;
                let name = args[1].as_str().unwrap_or_default();
                Ok(state.nodes[index]
                    .attributes
                    .get(name)
                    .map(|value| json!(value))
                    .unwrap_or(HostValue::Null))
            }
            ops::INNER_HTML_SET => {
                let index = Self::node_index(&state, op, &args[0])?;
                state.nodes[index].inner_html = args[1].as_str().map(str::to_string);
                Ok(HostValue::Null)
            }
            ops::XHR_SEND => {
                let method = args[0].as_str().unwrap_or_default().to_string();
                let url = args[1].as_str().unwrap_or_default().to_string();
                state
                    .responses
                    .get(&(method.clone(), url.clone()))
                    .map(|body| json!(body))
                    .ok_or_else(|| BridgeFailure::new(op, format!("404 for {method} {url}")))
            }
            other => Err(BridgeFailure::new(other, "unknown operation")),
        }
    }
}

/// A page with one form and the given inputs, as `(form, inputs)` handle tokens.
pub fn form_page(host: &FakeHost, inputs: &[&[(&str, &str)]]) -> (String, Vec<String>) {
    let form = host.add_node("form", &[("action", "/add")]);
    let inputs = inputs
        .iter()
        .map(|attributes| host.add_node("input", attributes))
        .collect();
    (form, inputs)
}
