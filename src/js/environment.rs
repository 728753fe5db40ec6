use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use anyhow::{Context as AnyhowContext, Result};
use rquickjs::function::{Constructor, This};
use rquickjs::{Ctx, Function, IntoJs, Object, Persistent, Value};
use tracing::{debug, error};

use super::runtime::ScriptEngine;
use crate::bridge::{BridgeClient, HostBridge};
use crate::config::RuntimeConfig;
use crate::dom::ElementHandle;
use crate::events::{dispatch_listeners, Event, ListenerRegistry};
use crate::request::{RequestError, RequestPolicy, SyncRequest, UsageError};

type ScriptListener = Persistent<Function<'static>>;

#[derive(Default)]
struct ScriptState {
    listeners: ListenerRegistry<ScriptListener>,
    /// Opened requests waiting for `send`; entries leave the table when sent.
    requests: HashMap<u32, SyncRequest>,
    next_request_id: u32,
}

impl ScriptState {
    fn next_request_id(&mut self) -> u32 {
        // 0 is reserved for sent requests on the script side.
        loop {
            self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
            if !self.requests.contains_key(&self.next_request_id) {
                return self.next_request_id;
            }
        }
    }
}

/// Script execution context exposing `document`, `Node`, `Event` and
/// `XMLHttpRequest` on top of a host bridge.
pub struct ScriptEnvironment {
    state: Rc<RefCell<ScriptState>>,
    // Captured at bootstrap so page scripts cannot replace host dispatch.
    host_dispatch: Persistent<Function<'static>>,
    engine: ScriptEngine,
}

impl ScriptEnvironment {
    pub fn new(host: impl HostBridge + 'static, config: &RuntimeConfig) -> Result<Self> {
        Self::with_client(BridgeClient::new(host), config)
    }

    pub fn with_client(client: BridgeClient, config: &RuntimeConfig) -> Result<Self> {
        let state = Rc::new(RefCell::new(ScriptState::default()));
        let engine = ScriptEngine::new(config.max_pending_jobs)?;
        let policy = RequestPolicy::from_config(config).context("invalid request policy")?;

        let bindings_state = Rc::clone(&state);
        engine
            .with_context(move |ctx| install_bindings(&ctx, bindings_state, client, policy))
            .context("failed to install host bindings")?;
        let host_dispatch = engine
            .with_context(|ctx| {
                let dispatch: Function = ctx.eval(RUNTIME_BOOTSTRAP)?;
                Ok(Persistent::save(&ctx, dispatch))
            })
            .context("failed to evaluate runtime bootstrap")?;

        Ok(Self {
            state,
            host_dispatch,
            engine,
        })
    }

    /// Evaluate `source`. Script exceptions come back as errors.
    pub fn eval(&self, source: &str, filename: &str) -> Result<()> {
        self.engine.eval(source, filename)
    }

    pub fn eval_with<V>(&self, source: &str, filename: &str) -> Result<V>
    where
        V: for<'js> rquickjs::FromJs<'js>,
    {
        self.engine.eval_with(source, filename)
    }

    /// Whether any script listener is registered for `(handle, event_type)`.
    pub fn is_listening(&self, handle: &ElementHandle, event_type: &str) -> bool {
        self.state.borrow().listeners.is_listening(handle, event_type)
    }

    pub fn listener_count(&self) -> usize {
        self.state.borrow().listeners.listener_count()
    }

    /// Requests opened by scripts and not yet sent.
    pub fn pending_request_count(&self) -> usize {
        self.state.borrow().requests.len()
    }

    /// Dispatch a fresh `event_type` event at `handle` and report whether the
    /// caller should go on with the default action.
    ///
    /// A listener that throws aborts the dispatch and the exception is returned.
    pub fn dispatch_event(&self, handle: &ElementHandle, event_type: &str) -> Result<bool> {
        debug!(target: "quickjs", handle = %handle, event_type, "host dispatch");
        self.engine.with_context(|ctx| {
            let dispatch = self.host_dispatch.clone().restore(&ctx)?;
            dispatch.call::<_, bool>((handle.token().to_string(), event_type.to_string()))
        })
    }

    pub fn console_messages(&self) -> Vec<String> {
        self.engine.console_messages()
    }
}

impl Drop for ScriptEnvironment {
    fn drop(&mut self) {
        // Persistent handles must be released while the QuickJS runtime is alive.
        let mut state = self.state.borrow_mut();
        state.listeners.clear();
        state.requests.clear();
    }
}

fn install_bindings<'js>(
    ctx: &Ctx<'js>,
    state: Rc<RefCell<ScriptState>>,
    client: BridgeClient,
    policy: RequestPolicy,
) -> rquickjs::Result<()> {
    let global = ctx.globals();

    // Element lookup and content
    {
        let client = client.clone();
        let func = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, selector: String| -> rquickjs::Result<Vec<String>> {
                match client.query_selector_all(&selector) {
                    Ok(handles) => Ok(handles
                        .iter()
                        .map(|handle| handle.token().to_string())
                        .collect()),
                    Err(err) => throw_error(&ctx, "BridgeFailure", &err.to_string()),
                }
            },
        )?
        .with_name("__bridge_query_selector_all")?;
        global.set("__bridge_query_selector_all", func)?;
    }

    {
        let client = client.clone();
        let func = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, handle: String, name: String| -> rquickjs::Result<Value<'js>> {
                match client.get_attribute(&ElementHandle::new(handle), &name) {
                    Ok(Some(value)) => value.into_js(&ctx),
                    Ok(None) => Ok(Value::new_null(ctx.clone())),
                    Err(err) => throw_error(&ctx, "BridgeFailure", &err.to_string()),
                }
            },
        )?
        .with_name("__bridge_get_attribute")?;
        global.set("__bridge_get_attribute", func)?;
    }

    {
        let client = client.clone();
        let func = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, handle: String, value: String| -> rquickjs::Result<()> {
                match client.set_inner_html(&ElementHandle::new(handle), &value) {
                    Ok(()) => Ok(()),
                    Err(err) => throw_error(&ctx, "BridgeFailure", &err.to_string()),
                }
            },
        )?
        .with_name("__bridge_set_inner_html")?;
        global.set("__bridge_set_inner_html", func)?;
    }

    // Listener registry and dispatch
    {
        let state_ref = Rc::clone(&state);
        let func = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>,
                  handle: String,
                  event_type: String,
                  listener: Function<'js>|
                  -> rquickjs::Result<()> {
                let listener = Persistent::save(&ctx, listener);
                state_ref.borrow_mut().listeners.add_event_listener(
                    &ElementHandle::new(handle),
                    event_type,
                    listener,
                );
                Ok(())
            },
        )?
        .with_name("__bridge_add_listener")?;
        global.set("__bridge_add_listener", func)?;
    }

    {
        let state_ref = Rc::clone(&state);
        let func = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, node: Object<'js>, event: Object<'js>| -> rquickjs::Result<bool> {
                let handle = ElementHandle::new(node.get::<_, String>("handle")?);
                let mut native = Event::new(event.get::<_, String>("type")?);
                if event.get::<_, Option<bool>>("proceedWithDefault")? == Some(false) {
                    native.cancel_default();
                }

                let listeners = state_ref
                    .borrow()
                    .listeners
                    .listeners(&handle, native.event_type());

                dispatch_listeners(&listeners, &mut native, |listener, native| {
                    let callback = listener.clone().restore(&ctx)?;
                    callback.call::<_, Value<'js>>((This(node.clone()), event.clone()))?;
                    if event.get::<_, Option<bool>>("proceedWithDefault")? == Some(false) {
                        native.cancel_default();
                    }
                    event.set("proceedWithDefault", native.proceed_with_default())
                })
            },
        )?
        .with_name("__bridge_dispatch")?;
        global.set("__bridge_dispatch", func)?;
    }

    // Synchronous requests
    {
        let state_ref = Rc::clone(&state);
        let func = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>,
                  id: Option<u32>,
                  method: String,
                  url: String,
                  is_async: bool|
                  -> rquickjs::Result<u32> {
                let mut guard = state_ref.borrow_mut();
                let opened = match id {
                    None => {
                        let mut request = SyncRequest::with_policy(client.clone(), policy.clone());
                        request.open(&method, &url, is_async).map(|()| {
                            let id = guard.next_request_id();
                            guard.requests.insert(id, request);
                            id
                        })
                    }
                    Some(id) => match guard.requests.get_mut(&id) {
                        Some(request) => request.open(&method, &url, is_async).map(|()| id),
                        None => Err(UsageError::AlreadyOpened.into()),
                    },
                };
                drop(guard);
                opened.or_else(|err| throw_request_error(&ctx, err))
            },
        )?
        .with_name("__bridge_xhr_open")?;
        global.set("__bridge_xhr_open", func)?;
    }

    {
        let state_ref = Rc::clone(&state);
        let func = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, id: Option<u32>, body: Option<String>| -> rquickjs::Result<String> {
                let Some(id) = id else {
                    return throw_request_error(&ctx, UsageError::SendBeforeOpen.into());
                };
                let Some(mut request) = state_ref.borrow_mut().requests.remove(&id) else {
                    return throw_request_error(&ctx, UsageError::AlreadySent.into());
                };
                match request.send(body.as_deref()) {
                    Ok(text) => Ok(text.to_string()),
                    Err(err) => throw_request_error(&ctx, err),
                }
            },
        )?
        .with_name("__bridge_xhr_send")?;
        global.set("__bridge_xhr_send", func)?;
    }

    Ok(())
}

fn throw_request_error<T>(ctx: &Ctx<'_>, err: RequestError) -> rquickjs::Result<T> {
    let name = match &err {
        RequestError::UnsupportedMode => "UnsupportedModeError",
        RequestError::Usage(_) => "UsageError",
        RequestError::Bridge(_) => "BridgeFailure",
        RequestError::InvalidUrl { .. } => "SyntaxError",
        RequestError::CrossOrigin { .. } | RequestError::OriginNotAllowed { .. } => {
            "SecurityError"
        }
    };
    throw_error(ctx, name, &err.to_string())
}

fn throw_error<'js, T>(ctx: &Ctx<'js>, name: &str, message: &str) -> rquickjs::Result<T> {
    error!(target: "quickjs", name, message, "host operation failed");
    let constructor: Constructor<'js> = ctx.globals().get("Error")?;
    let error: Object<'js> = constructor.construct((message.to_string(),))?;
    error.set("name", name)?;
    Err(ctx.throw(error.into_value()))
}

// Evaluates to the host-side dispatch function. The `__bridge_*` globals are
// captured and removed so later scripts only reach them through these objects.
const RUNTIME_BOOTSTRAP: &str = r#"
(() => {
    const global = globalThis;
    const native = {
        querySelectorAll: global.__bridge_query_selector_all,
        getAttribute: global.__bridge_get_attribute,
        setInnerHtml: global.__bridge_set_inner_html,
        addListener: global.__bridge_add_listener,
        dispatch: global.__bridge_dispatch,
        xhrOpen: global.__bridge_xhr_open,
        xhrSend: global.__bridge_xhr_send,
    };
    [
        '__bridge_query_selector_all',
        '__bridge_get_attribute',
        '__bridge_set_inner_html',
        '__bridge_add_listener',
        '__bridge_dispatch',
        '__bridge_xhr_open',
        '__bridge_xhr_send',
    ].forEach(function (name) {
        delete global[name];
    });

    function Node(handle) {
        this.handle = String(handle);
    }
    Node.prototype.getAttribute = function (name) {
        return native.getAttribute(this.handle, String(name));
    };
    Node.prototype.setInnerContent = function (value) {
        native.setInnerHtml(this.handle, String(value));
    };
    Node.prototype.addEventListener = function (type, listener) {
        native.addListener(this.handle, String(type), listener);
    };
    Node.prototype.dispatchEvent = function (event) {
        return native.dispatch(this, event);
    };
    Object.defineProperty(Node.prototype, 'innerHTML', {
        set: function (value) {
            this.setInnerContent(value);
        },
        configurable: true,
    });

    function Event(type) {
        this.type = String(type);
        this.proceedWithDefault = true;
    }
    Event.prototype.cancelDefault = function () {
        this.proceedWithDefault = false;
    };
    Event.prototype.preventDefault = Event.prototype.cancelDefault;

    // `__request` is undefined until open() and 0 once sent.
    function XMLHttpRequest() {
        this.__request = undefined;
        this.responseText = null;
    }
    XMLHttpRequest.prototype.open = function (method, url, isAsync) {
        this.__request = native.xhrOpen(this.__request, String(method), String(url), !!isAsync);
    };
    XMLHttpRequest.prototype.send = function (body) {
        const payload = body === undefined || body === null ? null : String(body);
        const request = this.__request;
        if (request !== undefined) {
            this.__request = 0;
        }
        this.responseText = native.xhrSend(request, payload);
    };

    global.Node = Node;
    global.Event = Event;
    global.XMLHttpRequest = XMLHttpRequest;
    global.document = {
        querySelectorAll: function (selector) {
            return native.querySelectorAll(String(selector)).map(function (handle) {
                return new Node(handle);
            });
        },
    };

    return function (handle, type) {
        return native.dispatch(new Node(handle), new Event(type));
    };
})();
"#;
