//! Integration tests for message and teardown interception.

use interpose::{
    ClassBuilder, DropReason, EventKind, InterceptError, Interceptable, Interceptor, InstanceId,
    Observable, ObserverError, Runtime, Selector, StreamEvent, Target, Value,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

fn counter_setup() -> (Interceptor, Arc<interpose::Class>) {
    let runtime = Arc::new(Runtime::new());
    let counter = ClassBuilder::new("Counter")
        .void_method("increment", |obj| {
            let n = obj.value_for_key("count").as_int().unwrap_or(0);
            obj.set_value_for_key("count", Value::Int(n + 1));
        })
        .integer_method("count", |obj| obj.value_for_key("count").as_int().unwrap_or(0))
        .method("add:to:", "q@:qq", |_, args| {
            let a = args[0].as_int().unwrap_or(0);
            let b = args[1].as_int().unwrap_or(0);
            Ok(Value::Int(a + b))
        })
        .method("move:", "v@:{CGPoint=dd}", |_, _| Ok(Value::Nil))
        .register(&runtime)
        .unwrap();
    (Interceptor::new(runtime), counter)
}

fn counting(
    count: &Arc<AtomicUsize>,
) -> impl Fn(&interpose::Invocation) -> interpose::ObserverResult + Send + Sync + 'static {
    let count = Arc::clone(count);
    move |_| {
        count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// --- Scenarios ---

#[test]
fn test_observed_increments_reach_original() {
    init_tracing();
    let (interceptor, counter) = counter_setup();
    let target = interceptor.instantiate(&counter);

    let fired = Arc::new(AtomicUsize::new(0));
    let _token = target.observe_sent("increment", counting(&fired)).unwrap();

    for _ in 0..3 {
        target.send_void(&"increment".into()).unwrap();
    }

    assert_eq!(fired.load(Ordering::SeqCst), 3);
    assert_eq!(target.send_integer(&"count".into()).unwrap(), 3);
}

#[test]
fn test_deallocating_fires_once() {
    let (interceptor, counter) = counter_setup();
    let widget = interceptor.instantiate(&counter);

    let fired = Arc::new(AtomicUsize::new(0));
    widget.observe_deallocating(counting(&fired)).unwrap();

    widget.destroy().unwrap();
    widget.destroy().unwrap();
    drop(widget);

    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_observers_are_per_instance() {
    let (interceptor, counter) = counter_setup();
    let a = interceptor.instantiate(&counter);
    let b = interceptor.instantiate(&counter);

    let fired = Arc::new(AtomicUsize::new(0));
    let _token = a.observe_sent("increment", counting(&fired)).unwrap();

    b.send_void(&"increment".into()).unwrap();
    b.send(&"increment".into(), &[]).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    a.send_void(&"increment".into()).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unsupported_signature_leaves_class_usable() {
    let (interceptor, counter) = counter_setup();
    let target = interceptor.instantiate(&counter);

    let err = target.observe_sent("move:", |_| Ok(())).unwrap_err();
    assert!(matches!(err, InterceptError::UnsupportedSignature { .. }));

    let fired = Arc::new(AtomicUsize::new(0));
    target.observe_sent("increment", counting(&fired)).unwrap();
    target.send_void(&"increment".into()).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

// --- Dispatch properties ---

#[test]
fn test_hook_without_observers_is_pass_through() {
    let (interceptor, counter) = counter_setup();
    let plain = interceptor.instantiate(&counter);
    let hooked = interceptor.instantiate(&counter);

    let token = hooked.observe_sent("add:to:", |_| Ok(())).unwrap();
    token.dispose();
    assert!(hooked
        .synthetic_subclass()
        .unwrap()
        .is_intercepting(&"add:to:".into()));

    let args = [Value::Int(40), Value::Int(2)];
    let expected = plain.send(&"add:to:".into(), &args).unwrap();
    let actual = hooked.send(&"add:to:".into(), &args).unwrap();
    assert_eq!(actual, expected);
    assert_eq!(actual, Value::Int(42));
}

#[test]
fn test_observer_sees_arguments_as_sent() {
    let (interceptor, counter) = counter_setup();
    let target = interceptor.instantiate(&counter);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    target
        .observe_sent("add:to:", move |invocation| {
            sink.lock().push(invocation.arguments().to_vec());
            Ok(())
        })
        .unwrap();

    let result = target
        .send(&"add:to:".into(), &[Value::Int(2), Value::Int(3)])
        .unwrap();
    assert_eq!(result, Value::Int(5));
    assert_eq!(*seen.lock(), vec![vec![Value::Int(2), Value::Int(3)]]);
}

#[test]
fn test_each_observer_fires_once_in_order() {
    let (interceptor, counter) = counter_setup();
    let target = interceptor.instantiate(&counter);

    let order = Arc::new(Mutex::new(Vec::new()));
    for label in ["first", "second", "third"] {
        let order = Arc::clone(&order);
        target
            .observe_sent("increment", move |_| {
                order.lock().push(label);
                Ok(())
            })
            .unwrap();
    }

    target.send_void(&"increment".into()).unwrap();
    assert_eq!(*order.lock(), vec!["first", "second", "third"]);
}

#[test]
fn test_observer_failure_reported_after_original() {
    let (interceptor, counter) = counter_setup();
    let target = interceptor.instantiate(&counter);

    target
        .observe_sent("increment", |_| Err(ObserverError::new("rejected")))
        .unwrap();

    let err = target.send_void(&"increment".into()).unwrap_err();
    match err {
        InterceptError::ObserverFailed { selector, failures } => {
            assert_eq!(selector, Selector::new("increment"));
            assert_eq!(failures.len(), 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    // Observers never veto the original.
    assert_eq!(target.object().value_for_key("count"), Value::Int(1));
}

// --- Teardown ---

#[test]
fn test_teardown_order_and_binding_release() {
    let runtime = Arc::new(Runtime::new());
    let log = Arc::new(Mutex::new(Vec::new()));
    let original_log = Arc::clone(&log);
    let widget = ClassBuilder::new("Widget")
        .property("title")
        .void_method("dealloc", move |_| original_log.lock().push("original".to_string()))
        .register(&runtime)
        .unwrap();
    let interceptor = Interceptor::new(runtime);
    let target = interceptor.instantiate(&widget);
    target.set_value("title", "last words").unwrap();
    let id = target.id();

    let observer_log = Arc::clone(&log);
    target
        .observe_deallocating(move |invocation| {
            let title = invocation.receiver().value_for_key("title");
            observer_log.lock().push(format!("observer:{}", title.as_str().unwrap_or("")));
            Ok(())
        })
        .unwrap();
    assert!(interceptor.observers().has_binding(id));

    target.destroy().unwrap();

    assert_eq!(
        *log.lock(),
        vec!["observer:last words".to_string(), "original".to_string()]
    );
    assert!(!interceptor.observers().has_binding(id));
    assert!(matches!(
        target.send(&"title".into(), &[]),
        Err(InterceptError::Deallocated(i)) if i == id
    ));
    assert!(matches!(
        target.observe_deallocating(|_| Ok(())),
        Err(InterceptError::Deallocated(_))
    ));
}

#[test]
fn test_drop_of_last_handle_tears_down() {
    let (interceptor, counter) = counter_setup();
    let target = interceptor.instantiate(&counter);
    let weak = target.downgrade();

    let fired = Arc::new(AtomicUsize::new(0));
    target.observe_deallocating(counting(&fired)).unwrap();
    let id: InstanceId = target.id();

    let clone = target.clone();
    drop(target);
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    drop(clone);

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(weak.upgrade().is_none());
    assert!(!interceptor.observers().has_binding(id));
    assert_eq!(interceptor.stats().live_targets, 0);
}

#[test]
fn test_sending_dealloc_destroys() {
    let (interceptor, counter) = counter_setup();
    let target = interceptor.instantiate(&counter);
    let fired = Arc::new(AtomicUsize::new(0));
    target.observe_sent(Selector::dealloc(), counting(&fired)).unwrap();

    target.send_void(&Selector::dealloc()).unwrap();
    assert!(target.is_deallocated());
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_retaining_observer_keeps_target_alive() {
    let (interceptor, counter) = counter_setup();
    let target = interceptor.instantiate(&counter);
    let weak = target.downgrade();

    let token = target
        .observe(
            interpose::EventKind::MessageSent("increment".into()),
            |_| Ok(()),
            true,
        )
        .unwrap();
    drop(target);
    assert!(weak.upgrade().is_some());

    token.dispose();
    assert!(weak.upgrade().is_none());
    assert_eq!(interceptor.stats().active_bindings, 0);
}

// --- Disposal ---

#[test]
fn test_dispose_is_idempotent() {
    let (interceptor, counter) = counter_setup();
    let target = interceptor.instantiate(&counter);

    let fired = Arc::new(AtomicUsize::new(0));
    let keep = target.observe_sent("increment", counting(&fired)).unwrap();
    let token = target.observe_sent("increment", counting(&fired)).unwrap();

    token.dispose();
    token.dispose();
    assert!(token.is_disposed());
    assert!(!keep.is_disposed());
    assert_eq!(interceptor.observers().entry_count(target.id()), 1);

    target.send_void(&"increment".into()).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    keep.dispose();
    assert!(!interceptor.observers().has_binding(target.id()));
    // Hooks stay installed.
    assert_eq!(interceptor.stats().installed_hooks, 1);
}

#[test]
fn test_observer_disposing_itself_mid_fanout() {
    let (interceptor, counter) = counter_setup();
    let target = interceptor.instantiate(&counter);

    let slot: Arc<Mutex<Option<interpose::Token>>> = Arc::new(Mutex::new(None));
    let fired = Arc::new(AtomicUsize::new(0));

    let own = Arc::clone(&slot);
    let first = Arc::clone(&fired);
    let token = target
        .observe_sent("increment", move |_| {
            first.fetch_add(1, Ordering::SeqCst);
            if let Some(token) = own.lock().take() {
                token.dispose();
            }
            Ok(())
        })
        .unwrap();
    *slot.lock() = Some(token);
    target.observe_sent("increment", counting(&fired)).unwrap();

    target.send_void(&"increment".into()).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 2);
    target.send_void(&"increment".into()).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 3);
    assert_eq!(interceptor.observers().entry_count(target.id()), 1);
}

// --- Class hierarchy ---

#[test]
fn test_base_and_subclass_intercepted_independently() {
    let runtime = Arc::new(Runtime::new());
    let base = ClassBuilder::new("View")
        .void_method("layout", |_| {})
        .register(&runtime)
        .unwrap();
    let derived = ClassBuilder::new("Button")
        .superclass(&base)
        .register(&runtime)
        .unwrap();
    let interceptor = Interceptor::new(runtime);

    let view = interceptor.instantiate(&base);
    let button = interceptor.instantiate(&derived);

    let view_fired = Arc::new(AtomicUsize::new(0));
    let button_fired = Arc::new(AtomicUsize::new(0));
    view.observe_sent("layout", counting(&view_fired)).unwrap();
    button.observe_sent("layout", counting(&button_fired)).unwrap();

    view.send_void(&"layout".into()).unwrap();
    button.send_void(&"layout".into()).unwrap();
    button.send_void(&"layout".into()).unwrap();

    assert_eq!(view_fired.load(Ordering::SeqCst), 1);
    assert_eq!(button_fired.load(Ordering::SeqCst), 2);

    let view_class = view.acting_class();
    let button_class = button.acting_class();
    assert!(!Arc::ptr_eq(&view_class, &button_class));
    assert!(button_class.is_subclass_of(&derived));
    assert!(!view_class.is_subclass_of(&derived));
    assert_eq!(interceptor.stats().dynamic_subclasses, 2);
}

#[test]
fn test_interceptable_trait_installs_on_synthetic_subclass() {
    let (interceptor, counter) = counter_setup();
    interceptor.install_hook(&counter, &"increment".into()).unwrap();

    let subclass = interceptor.subclass_for(&counter).unwrap();
    assert!(subclass.is_intercepting(&"increment".into()));
    assert_eq!(subclass.class().own_method_count(), 0);
    assert!(Arc::ptr_eq(subclass.original(), &counter));

    let target: Target = interceptor.instantiate(&counter);
    let fired = Arc::new(AtomicUsize::new(0));
    target.observe_sent("increment", counting(&fired)).unwrap();
    assert!(Arc::ptr_eq(&target.synthetic_subclass().unwrap(), &subclass));
}

// --- Streams ---

#[test]
fn test_stream_receives_messages_then_completes() {
    let (interceptor, counter) = counter_setup();
    let target = interceptor.instantiate(&counter);
    let stream = target.sent_messages("add:to:").unwrap();

    target
        .send(&"add:to:".into(), &[Value::Int(1), Value::Int(2)])
        .unwrap();
    target.destroy().unwrap();

    match stream.recv_timeout(Duration::from_secs(1)).unwrap() {
        StreamEvent::Message(invocation) => {
            assert_eq!(invocation.arguments(), &[Value::Int(1), Value::Int(2)]);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(matches!(
        stream.recv_timeout(Duration::from_secs(1)).unwrap(),
        StreamEvent::Completed
    ));
    assert!(!stream.is_active());
    assert_eq!(interceptor.stats().active_bindings, 0);
}

#[test]
fn test_stream_overflow_drops_subscription() {
    let runtime = Arc::new(Runtime::new());
    let counter = ClassBuilder::new("Ticker")
        .void_method("tick", |_| {})
        .register(&runtime)
        .unwrap();
    let interceptor = Interceptor::with_config(
        runtime,
        interpose::InterceptorConfig {
            stream_buffer_size: 2,
            ..Default::default()
        },
    );
    let target = interceptor.instantiate(&counter);
    let stream = target.sent_messages("tick").unwrap();

    for _ in 0..3 {
        target.send_void(&"tick".into()).unwrap();
    }

    assert!(matches!(stream.try_recv().unwrap(), StreamEvent::Message(_)));
    assert!(matches!(stream.try_recv().unwrap(), StreamEvent::Message(_)));
    assert!(matches!(
        stream.try_recv().unwrap(),
        StreamEvent::Dropped(DropReason::BufferOverflow)
    ));
    assert!(stream.try_recv().is_err());
    assert!(!stream.is_active());

    // Nothing follows the drop, not even completion.
    target.destroy().unwrap();
    assert!(stream.try_recv().is_err());
}

#[test]
fn test_stream_completes_with_full_buffer() {
    let runtime = Arc::new(Runtime::new());
    let counter = ClassBuilder::new("Ticker")
        .void_method("tick", |_| {})
        .register(&runtime)
        .unwrap();
    let interceptor = Interceptor::with_config(
        runtime,
        interpose::InterceptorConfig {
            stream_buffer_size: 2,
            ..Default::default()
        },
    );
    let target = interceptor.instantiate(&counter);
    let stream = target.sent_messages("tick").unwrap();

    target.send_void(&"tick".into()).unwrap();
    target.send_void(&"tick".into()).unwrap();
    target.destroy().unwrap();

    assert!(matches!(stream.try_recv().unwrap(), StreamEvent::Message(_)));
    assert!(matches!(stream.try_recv().unwrap(), StreamEvent::Message(_)));
    assert!(matches!(stream.try_recv().unwrap(), StreamEvent::Completed));
}

#[test]
fn test_dropped_streams_release_observers() {
    let (interceptor, counter) = counter_setup();
    let target = interceptor.instantiate(&counter);

    for _ in 0..100 {
        let stream = target.sent_messages("increment").unwrap();
        assert!(stream.is_active());
    }

    assert_eq!(interceptor.stats().observers, 0);
    assert_eq!(interceptor.stats().active_bindings, 0);
    // The hook stays installed and passes through.
    target.send_void(&"increment".into()).unwrap();
    assert_eq!(target.send_integer(&"count".into()).unwrap(), 1);
}

// --- Deallocated ---

#[test]
fn test_deallocated_fires_after_original_dealloc() {
    let runtime = Arc::new(Runtime::new());
    let log = Arc::new(Mutex::new(Vec::new()));
    let original_log = Arc::clone(&log);
    let widget = ClassBuilder::new("Widget")
        .void_method("dealloc", move |_| original_log.lock().push("original".to_string()))
        .register(&runtime)
        .unwrap();
    let interceptor = Interceptor::new(runtime);
    let target = interceptor.instantiate(&widget);

    let after = Arc::clone(&log);
    let token = target
        .observe_deallocated(move |invocation| {
            assert!(invocation.selector().is_dealloc());
            after.lock().push("deallocated".to_string());
            Ok(())
        })
        .unwrap();
    let before = Arc::clone(&log);
    target
        .observe_deallocating(move |_| {
            before.lock().push("deallocating".to_string());
            Ok(())
        })
        .unwrap();
    assert!(!token.is_disposed());

    drop(target);

    assert_eq!(
        *log.lock(),
        vec![
            "deallocating".to_string(),
            "original".to_string(),
            "deallocated".to_string()
        ]
    );
    assert!(token.is_disposed());
    assert_eq!(interceptor.stats().observers, 0);
}

#[test]
fn test_deallocated_replays_to_late_observers() {
    let (interceptor, counter) = counter_setup();
    let target = interceptor.instantiate(&counter);
    let fired = Arc::new(AtomicUsize::new(0));

    target.destroy().unwrap();
    let token = target.observe_deallocated(counting(&fired)).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(token.is_disposed());
    token.dispose();

    // Through the generic registration path as well.
    interceptor
        .register(&target, EventKind::Deallocated, Box::new(counting(&fired)))
        .unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 2);
    assert_eq!(interceptor.stats().observers, 0);

    let failing = target.observe_deallocated(|_| Err(ObserverError::new("late")));
    assert!(matches!(failing, Err(InterceptError::ObserverFailed { .. })));
}

#[test]
fn test_disposed_deallocated_observer_is_skipped() {
    let (interceptor, counter) = counter_setup();
    let target = interceptor.instantiate(&counter);
    let fired = Arc::new(AtomicUsize::new(0));

    let token = target.observe_deallocated(counting(&fired)).unwrap();
    token.dispose();
    target.destroy().unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(interceptor.stats().live_targets, 0);
}
