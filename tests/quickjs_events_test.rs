mod common;

use bridgejs::{ElementHandle, RuntimeConfig, ScriptEnvironment};
use common::{form_page, init_tracing, FakeHost};

fn environment(host: &FakeHost) -> ScriptEnvironment {
    ScriptEnvironment::new(host.clone(), &RuntimeConfig::default()).expect("environment")
}

#[test]
fn test_listeners_fire_in_order() {
    init_tracing();
    let host = FakeHost::new();
    host.add_node("button", &[]);
    let environment = environment(&host);

    let order: String = environment
        .eval_with(
            r#"
            var order = [];
            var btn = document.querySelectorAll('button')[0];
            btn.addEventListener('x', function () { order.push('A'); });
            btn.addEventListener('x', function () { order.push('B'); });
            btn.addEventListener('x', function () { order.push('C'); });
            btn.dispatchEvent(new Event('x'));
            order.join('');
        "#,
            "order-test.js",
        )
        .expect("evaluate script");

    assert_eq!(order, "ABC");
}

#[test]
fn test_listener_this_is_target_node() {
    let host = FakeHost::new();
    host.add_node("input", &[("name", "first")]);
    host.add_node("input", &[("name", "second")]);
    let environment = environment(&host);

    let seen: String = environment
        .eval_with(
            r#"
            var seen = [];
            var inputs = document.querySelectorAll('input');
            function record() { seen.push(this.getAttribute('name')); }
            inputs[0].addEventListener('keydown', record);
            inputs[1].addEventListener('keydown', record);
            inputs[1].dispatchEvent(new Event('keydown'));
            inputs[0].dispatchEvent(new Event('keydown'));
            seen.join(',');
        "#,
            "this-test.js",
        )
        .expect("evaluate script");

    assert_eq!(seen, "second,first");
}

#[test]
fn test_cancel_default_returns_false() {
    let host = FakeHost::new();
    host.add_node("form", &[]);
    let environment = environment(&host);

    let outcome: String = environment
        .eval_with(
            r#"
            var form = document.querySelectorAll('form')[0];
            var observed = [];
            form.addEventListener('submit', function (e) { e.preventDefault(); });
            form.addEventListener('submit', function (e) {
                observed.push(e.proceedWithDefault);
                e.proceedWithDefault = true;
            });
            var result = form.dispatchEvent(new Event('submit'));
            observed.push(result);
            observed.join(',');
        "#,
            "cancel-test.js",
        )
        .expect("evaluate script");

    assert_eq!(outcome, "false,false");
}

#[test]
fn test_dispatch_without_listeners_proceeds() {
    let host = FakeHost::new();
    host.add_node("form", &[]);
    let environment = environment(&host);

    let result: bool = environment
        .eval_with(
            "document.querySelectorAll('form')[0].dispatchEvent(new Event('submit'))",
            "no-listeners.js",
        )
        .expect("evaluate script");
    assert!(result);
}

#[test]
fn test_isolation_by_handle_and_type() {
    let host = FakeHost::new();
    host.add_node("input", &[]);
    host.add_node("input", &[]);
    let environment = environment(&host);

    let hits: String = environment
        .eval_with(
            r#"
            var hits = [];
            var inputs = document.querySelectorAll('input');
            inputs[0].addEventListener('x', function () { hits.push('0x'); });
            inputs[0].addEventListener('y', function () { hits.push('0y'); });
            inputs[1].addEventListener('x', function () { hits.push('1x'); });
            inputs[0].dispatchEvent(new Event('x'));
            hits.join(',');
        "#,
            "isolation-test.js",
        )
        .expect("evaluate script");

    assert_eq!(hits, "0x");
}

#[test]
fn test_throwing_listener_aborts_dispatch() {
    let host = FakeHost::new();
    host.add_node("button", &[]);
    let environment = environment(&host);

    let outcome: String = environment
        .eval_with(
            r#"
            var ran = [];
            var btn = document.querySelectorAll('button')[0];
            btn.addEventListener('click', function () { ran.push(1); });
            btn.addEventListener('click', function () { ran.push(2); throw new Error('boom'); });
            btn.addEventListener('click', function () { ran.push(3); });
            var caught = 'none';
            try {
                btn.dispatchEvent(new Event('click'));
            } catch (err) {
                caught = err.message;
            }
            ran.join('') + ':' + caught;
        "#,
            "fail-fast.js",
        )
        .expect("evaluate script");

    assert_eq!(outcome, "12:boom");
}

#[test]
fn test_host_dispatch_reports_listener_exception() {
    let host = FakeHost::new();
    let token = host.add_node("button", &[]);
    let environment = environment(&host);

    environment
        .eval(
            r#"
            document.querySelectorAll('button')[0].addEventListener('click', function () {
                throw new RangeError('listener failed');
            });
        "#,
            "host-dispatch-error.js",
        )
        .expect("register listener");

    let err = environment
        .dispatch_event(&ElementHandle::new(&token), "click")
        .unwrap_err();
    assert!(err.to_string().starts_with("RangeError: listener failed"), "{err}");
}

#[test]
fn test_is_listening_tracks_registrations() {
    let host = FakeHost::new();
    let token = host.add_node("button", &[]);
    let environment = environment(&host);
    let handle = ElementHandle::new(&token);

    assert!(!environment.is_listening(&handle, "click"));
    environment
        .eval(
            "var b = document.querySelectorAll('button')[0]; b.addEventListener('click', function () {}); b.addEventListener('click', function () {});",
            "listening.js",
        )
        .expect("register listener");

    assert!(environment.is_listening(&handle, "click"));
    assert!(!environment.is_listening(&handle, "keydown"));
    assert_eq!(environment.listener_count(), 2);
}

#[test]
fn test_length_check_gates_submission() {
    init_tracing();
    let host = FakeHost::new();
    let (form, inputs) = form_page(
        &host,
        &[&[("name", "comment")], &[("name", "author"), ("value", "")]],
    );
    let environment = environment(&host);
    environment
        .eval(include_str!("fixtures/length_check.js"), "length_check.js")
        .expect("install length check");

    let form = ElementHandle::new(&form);
    let comment = ElementHandle::new(&inputs[0]);
    let author = ElementHandle::new(&inputs[1]);

    assert!(environment.dispatch_event(&comment, "keydown").unwrap());
    assert!(environment.dispatch_event(&author, "keydown").unwrap());
    assert!(environment.dispatch_event(&form, "submit").unwrap());
    assert!(environment.console_messages().is_empty());

    host.set_attribute(&inputs[0], "value", &"x".repeat(101));
    environment.dispatch_event(&comment, "keydown").unwrap();
    assert!(!environment.dispatch_event(&form, "submit").unwrap());
    assert_eq!(
        environment.console_messages(),
        vec!["Input comment has too much text."]
    );

    // the last check wins
    environment.dispatch_event(&author, "keydown").unwrap();
    assert!(environment.dispatch_event(&form, "submit").unwrap());
}

#[test]
fn test_host_dispatch_survives_overwritten_globals() {
    let host = FakeHost::new();
    let token = host.add_node("form", &[]);
    let environment = environment(&host);

    environment
        .eval(
            r#"
            document.querySelectorAll('form')[0].addEventListener('submit', function (e) {
                e.cancelDefault();
            });
            globalThis.__bridge = { dispatch: function () { return true; } };
            globalThis.__bridge_dispatch = function () { return true; };
            Node = function () {};
            Event = function () {};
        "#,
            "hijack.js",
        )
        .expect("overwrite globals");

    assert!(!environment
        .dispatch_event(&ElementHandle::new(&token), "submit")
        .unwrap());
}

#[test]
fn test_bridge_primitives_are_not_global() {
    let host = FakeHost::new();
    let environment = environment(&host);

    let exposed: String = environment
        .eval_with(
            "Object.keys(globalThis).filter(function (k) { return k.indexOf('__bridge_') === 0 && k !== '__bridge_log'; }).join(',')",
            "globals.js",
        )
        .expect("evaluate script");
    assert_eq!(exposed, "");
}
