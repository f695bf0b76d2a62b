use super::*;
use serde_json::json;

fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> Box<dyn Fn(&Event) -> HandlerResult + Send + Sync>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let log_for_factory = Arc::clone(&log);
    let factory = move |label: &'static str| {
        let log = Arc::clone(&log_for_factory);
        Box::new(move |event: &Event| {
            log.lock().unwrap().push(format!("{label}:{}", event.data));
            Ok(())
        }) as Box<dyn Fn(&Event) -> HandlerResult + Send + Sync>
    };
    (log, factory)
}

#[test]
fn publish_invokes_handlers_in_subscription_order() {
    let bus = EventBus::new();
    let (log, handler) = recorder();
    bus.subscribe("slaveAdded", handler("a"));
    bus.subscribe("slaveAdded", handler("b"));
    bus.subscribe("slaveRemoved", handler("other"));

    let delivered = bus.emit("slaveAdded", json!(1));

    assert_eq!(delivered, 2);
    assert_eq!(*log.lock().unwrap(), vec!["a:1", "b:1"]);
}

#[test]
fn publish_without_subscribers_is_dropped() {
    let bus = EventBus::new();
    assert_eq!(bus.emit("unknownType", json!({})), 0);
}

#[test]
fn subscribe_once_fires_a_single_time() {
    let bus = EventBus::new();
    let (log, handler) = recorder();
    bus.subscribe_once("slaves", handler("once"));
    bus.subscribe("slaves", handler("always"));

    bus.emit("slaves", json!(1));
    bus.emit("slaves", json!(2));

    assert_eq!(*log.lock().unwrap(), vec!["once:1", "always:1", "always:2"]);
    assert_eq!(bus.listener_count("slaves"), 1);
}

#[test]
fn unsubscribe_removes_only_that_registration() {
    let bus = EventBus::new();
    let (log, handler) = recorder();
    let first = bus.subscribe("pong", handler("first"));
    bus.subscribe("pong", handler("second"));

    assert!(bus.unsubscribe(first));
    assert!(!bus.unsubscribe(first));
    bus.emit("pong", json!(null));

    assert_eq!(*log.lock().unwrap(), vec!["second:null"]);
}

#[test]
fn failing_handler_does_not_block_later_handlers() {
    let bus = EventBus::new();
    let (log, handler) = recorder();
    bus.subscribe("error", |_event: &Event| Err("boom".into()));
    bus.subscribe("error", handler("after"));

    assert_eq!(bus.emit("error", json!("x")), 2);
    assert_eq!(*log.lock().unwrap(), vec![r#"after:"x""#]);
}

#[test]
fn panicking_handler_does_not_block_later_handlers() {
    let bus = EventBus::new();
    let (log, handler) = recorder();
    bus.subscribe("close", |_event: &Event| -> HandlerResult { panic!("handler bug") });
    bus.subscribe("close", handler("after"));

    bus.emit("close", json!(1006));

    assert_eq!(*log.lock().unwrap(), vec!["after:1006"]);
}

#[test]
fn handler_may_subscribe_during_publish() {
    let bus = EventBus::new();
    let inner_bus = bus.clone();
    bus.subscribe_once("open", move |_event: &Event| {
        inner_bus.subscribe("slaves", |_event: &Event| Ok(()));
        Ok(())
    });

    bus.emit("open", Value::Null);

    assert_eq!(bus.listener_count("open"), 0);
    assert_eq!(bus.listener_count("slaves"), 1);
}

#[test]
fn correlated_subscription_skips_other_requests() {
    let bus = EventBus::new();
    let (log, handler) = recorder();
    bus.subscribe_once_correlated("sources", "req-a", handler("a"));
    bus.subscribe_once_correlated("sources", "req-b", handler("b"));

    bus.publish(&Event::new("sources", json!("for-b")).with_correlation("req-b"));
    assert_eq!(*log.lock().unwrap(), vec![r#"b:"for-b""#]);
    assert_eq!(bus.listener_count("sources"), 1);

    bus.publish(&Event::new("sources", json!("for-a")).with_correlation("req-a"));
    assert_eq!(*log.lock().unwrap(), vec![r#"b:"for-b""#, r#"a:"for-a""#]);
    assert!(bus.is_empty());
}

#[test]
fn correlated_subscription_accepts_uncorrelated_events() {
    let bus = EventBus::new();
    let (log, handler) = recorder();
    bus.subscribe_once_correlated("slaves", "req-a", handler("a"));

    bus.emit("slaves", json!([]));

    assert_eq!(*log.lock().unwrap(), vec!["a:[]"]);
    assert!(bus.is_empty());
}

#[test]
fn plain_subscription_sees_correlated_events() {
    let bus = EventBus::new();
    let (log, handler) = recorder();
    bus.subscribe("slaves", handler("observer"));

    bus.publish(&Event::new("slaves", json!(1)).with_correlation("req-z"));

    assert_eq!(*log.lock().unwrap(), vec!["observer:1"]);
}
