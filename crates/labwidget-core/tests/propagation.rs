//! Integration tests for property propagation across bindings.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use labwidget_core::{BindMode, ObjectHandle, ObjectSpec, Session, SyncError, Value};

fn setup() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn object(session: &Session, name: &str, prop: &str, initial: i64) -> ObjectHandle {
    session
        .create_object(ObjectSpec::new(name).property(prop, initial))
        .unwrap()
}

fn count_events(session: &Session, handle: &ObjectHandle, name: &str) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&counter);
    session
        .subscribe(handle.id(), name, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    counter
}

#[test]
fn test_counter_counts_distinct_writes_only() {
    setup();
    let session = Session::new();
    let obj = object(&session, "Counter", "value", 0);
    let counter = count_events(&session, &obj, "value");

    let writes = [1, 1, 2, 3, 3, 3, 4, 1, 1];
    let repeats = writes.windows(2).filter(|w| w[0] == w[1]).count();
    for value in writes {
        obj.set("value", value).unwrap();
    }

    assert_eq!(counter.load(Ordering::SeqCst), writes.len() - repeats);
    assert_eq!(obj.get("value").unwrap(), Some(Value::Int(1)));
}

#[test]
fn test_mirror_keeps_both_sides_equal() {
    setup();
    let session = Session::new();
    let a = object(&session, "A", "x", 10);
    let b = object(&session, "B", "y", 0);
    session
        .bind(b.id(), "y", a.id(), "x", BindMode::Mirror)
        .unwrap();
    assert_eq!(b.get("y").unwrap(), Some(Value::Int(10)));

    a.set("x", 11).unwrap();
    assert_eq!(b.get("y").unwrap(), Some(Value::Int(11)));
    b.set("y", 12).unwrap();
    assert_eq!(a.get("x").unwrap(), Some(Value::Int(12)));

    let a_events = count_events(&session, &a, "x");
    let b_events = count_events(&session, &b, "y");
    assert!(!a.set("x", 12).unwrap());
    assert!(!b.set("y", 12).unwrap());
    assert_eq!(a_events.load(Ordering::SeqCst), 0);
    assert_eq!(b_events.load(Ordering::SeqCst), 0);
}

#[test]
fn test_one_way_does_not_flow_back() {
    setup();
    let session = Session::new();
    let source = object(&session, "Source", "value", 1);
    let target = object(&session, "Target", "value", 0);
    session
        .bind(target.id(), "value", source.id(), "value", BindMode::OneWay)
        .unwrap();
    assert_eq!(target.get("value").unwrap(), Some(Value::Int(1)));

    target.set("value", 99).unwrap();
    assert_eq!(source.get("value").unwrap(), Some(Value::Int(1)));

    source.set("value", 2).unwrap();
    assert_eq!(target.get("value").unwrap(), Some(Value::Int(2)));
}

#[test]
fn test_mirror_chain_converges() {
    setup();
    let session = Session::new();
    let a = object(&session, "A", "v", 1);
    let b = object(&session, "B", "v", 0);
    let c = object(&session, "C", "v", 0);
    session.bind(b.id(), "v", a.id(), "v", BindMode::Mirror).unwrap();
    session.bind(c.id(), "v", b.id(), "v", BindMode::Mirror).unwrap();

    assert_eq!(b.get("v").unwrap(), Some(Value::Int(1)));
    assert_eq!(c.get("v").unwrap(), Some(Value::Int(1)));

    let events: Vec<_> = [&a, &b, &c]
        .into_iter()
        .map(|h| count_events(&session, h, "v"))
        .collect();
    c.set("v", 5).unwrap();

    for handle in [&a, &b, &c] {
        assert_eq!(handle.get("v").unwrap(), Some(Value::Int(5)));
    }
    for counter in events {
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn test_mirror_triangle_terminates() {
    setup();
    let session = Session::new();
    let a = object(&session, "A", "v", 0);
    let b = object(&session, "B", "v", 0);
    let c = object(&session, "C", "v", 0);
    session.bind(b.id(), "v", a.id(), "v", BindMode::Mirror).unwrap();
    session.bind(c.id(), "v", b.id(), "v", BindMode::Mirror).unwrap();
    session.bind(a.id(), "v", c.id(), "v", BindMode::Mirror).unwrap();

    b.set("v", 3).unwrap();
    for handle in [&a, &b, &c] {
        assert_eq!(handle.get("v").unwrap(), Some(Value::Int(3)));
    }
}

#[test]
fn test_bind_with_unset_source_leaves_target() {
    setup();
    let session = Session::new();
    let source = session
        .create_object(ObjectSpec::new("Source").unset_property("value"))
        .unwrap();
    let target = object(&session, "Target", "value", 4);
    session
        .bind(target.id(), "value", source.id(), "value", BindMode::Mirror)
        .unwrap();

    assert_eq!(target.get("value").unwrap(), Some(Value::Int(4)));
    assert_eq!(source.get("value").unwrap(), None);

    // The first write on either side settles both.
    target.set("value", 8).unwrap();
    assert_eq!(source.get("value").unwrap(), Some(Value::Int(8)));
}

#[test]
fn test_unbind_keeps_last_values() {
    setup();
    let session = Session::new();
    let a = object(&session, "A", "x", 1);
    let b = object(&session, "B", "y", 0);
    let id = session
        .bind(b.id(), "y", a.id(), "x", BindMode::Mirror)
        .unwrap();

    let info = session.unbind(id).unwrap();
    assert_eq!(info.mode, BindMode::Mirror);
    assert_eq!(b.get("y").unwrap(), Some(Value::Int(1)));

    a.set("x", 2).unwrap();
    assert_eq!(b.get("y").unwrap(), Some(Value::Int(1)));
    assert!(matches!(session.unbind(id), Err(SyncError::UnknownBinding)));
}

#[test]
fn test_bind_rejects_triggers_and_self() {
    setup();
    let session = Session::new();
    let button = session
        .create_object(ObjectSpec::new("Button").property("label", "ok").trigger("click"))
        .unwrap();
    let other = object(&session, "Other", "label", 0);

    assert!(matches!(
        session.bind(other.id(), "label", button.id(), "click", BindMode::OneWay),
        Err(SyncError::NotAProperty { .. })
    ));
    assert!(matches!(
        session.bind(button.id(), "label", button.id(), "label", BindMode::Mirror),
        Err(SyncError::SelfBinding { .. })
    ));
    assert_eq!(session.binding_count(), 0);
}

#[test]
fn test_callbacks_see_settled_values() {
    setup();
    let session = Session::new();
    let a = object(&session, "A", "x", 0);
    let b = object(&session, "B", "y", 0);
    session
        .bind(b.id(), "y", a.id(), "x", BindMode::OneWay)
        .unwrap();

    let seen = Arc::new(parking_lot::Mutex::new(None));
    let s = Arc::clone(&seen);
    let observer = session.clone();
    let b_id = b.id();
    session
        .subscribe(a.id(), "x", move |_| {
            *s.lock() = observer.get(b_id, "y").unwrap();
        })
        .unwrap();

    a.set("x", 6).unwrap();
    assert_eq!(*seen.lock(), Some(Value::Int(6)));
}

#[test]
fn test_concurrent_writers_serialize() {
    setup();
    let session = Session::new();
    let a = object(&session, "A", "x", 0);
    let b = object(&session, "B", "y", 0);
    session
        .bind(b.id(), "y", a.id(), "x", BindMode::Mirror)
        .unwrap();

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let a = a.clone();
            std::thread::spawn(move || {
                for i in 0..50 {
                    a.set("x", t * 100 + i).unwrap();
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(a.get("x").unwrap(), b.get("y").unwrap());
}

#[test]
fn test_repeated_nan_writes_count_once() {
    setup();
    let session = Session::new();
    let obj = session
        .create_object(ObjectSpec::new("Gauge").property("value", 0.0))
        .unwrap();
    let events = count_events(&session, &obj, "value");

    let changed = (0..3)
        .filter(|_| obj.set("value", f64::NAN).unwrap())
        .count();

    assert_eq!(changed, 1);
    assert_eq!(events.load(Ordering::SeqCst), 1);
}

#[test]
fn test_callback_clamp_leaves_mirror_at_pass_value() {
    setup();
    let session = Session::new();
    let a = object(&session, "A", "v", 0);
    let b = object(&session, "B", "v", 0);
    session.bind(b.id(), "v", a.id(), "v", BindMode::Mirror).unwrap();
    let clamp = session.clone();
    let a_id = a.id();
    session
        .subscribe(a.id(), "v", move |event| {
            if event.value.as_i64().is_some_and(|v| v > 10) {
                clamp.set(a_id, "v", 10).unwrap();
            }
        })
        .unwrap();

    a.set("v", 50).unwrap();
    assert_eq!(a.get("v").unwrap(), Some(Value::Int(10)));
    assert_eq!(b.get("v").unwrap(), Some(Value::Int(50)));

    // The next write outside a pass brings both sides together again.
    a.set("v", 7).unwrap();
    assert_eq!(b.get("v").unwrap(), Some(Value::Int(7)));
}
