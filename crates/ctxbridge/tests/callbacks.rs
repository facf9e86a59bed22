//! Host functions resolving their context through the registry
#![cfg_attr(
    test,
    allow(
        dead_code,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::tests_outside_test_module,
        reason = "Test allows"
    )
)]

use std::sync::{Arc, Barrier, Mutex, PoisonError};
use std::thread;

use anyhow::Result;
use ctxbridge::abi::{CallbackHandler, Engine, ReferenceId};
use ctxbridge::{
    BoaEngine, Bridge, BridgeError, Context, ContextOptions, FunctionCallbackInfo, ObjectTemplate,
};
use serde_json::{Value as JsonValue, json};

/// Template exposing `whoami()`, which answers the caller's reference id.
fn whoami_template(bridge: &Bridge) -> ObjectTemplate {
    let bridge = bridge.clone();
    let mut template = ObjectTemplate::new();
    template.set_function("whoami", move |info| {
        let in_flight = bridge.in_flight(info.context());
        if in_flight == 0 {
            return Err("callback context is not registered".to_owned());
        }
        Ok(json!(info.context().reference_id().0))
    });
    template
}

fn new_context(bridge: &Bridge, template: ObjectTemplate) -> Result<Context> {
    Ok(bridge.new_context(ContextOptions::new().with_global_template(template))?)
}

#[test]
fn test_callback_receives_its_own_context() -> Result<()> {
    let bridge = Bridge::new();
    let context = new_context(&bridge, whoami_template(&bridge))?;

    let value = context.run_script("whoami()", "t.js")?.expect("value");

    assert_eq!(value.to_json()?, json!(context.reference_id().0));
    assert_eq!(bridge.active_contexts(), 0);
    Ok(())
}

#[test]
fn test_callbacks_resolve_correctly_under_concurrency() -> Result<()> {
    const THREADS: usize = 8;
    const ROUNDS: usize = 25;

    let bridge = Bridge::new();
    let shared = bridge.new_isolate()?;
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|index| {
            let bridge = bridge.clone();
            let barrier = Arc::clone(&barrier);
            // Half the contexts share one isolate, the rest get their own.
            let options = if index % 2 == 0 {
                ContextOptions::new().with_isolate(shared.clone())
            } else {
                ContextOptions::new()
            };
            thread::spawn(move || -> Result<()> {
                let context = bridge
                    .new_context(options.with_global_template(whoami_template(&bridge)))?;
                let expected = json!(context.reference_id().0);
                barrier.wait();
                for _ in 0..ROUNDS {
                    let value = context.run_script("whoami()", "t.js")?.expect("value");
                    assert_eq!(value.to_json()?, expected);
                }
                Ok(())
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker thread panicked")?;
    }
    assert_eq!(bridge.active_contexts(), 0);
    Ok(())
}

#[test]
fn test_callback_arguments_are_converted() -> Result<()> {
    let bridge = Bridge::new();
    let mut template = ObjectTemplate::new();
    template.set_function("describe", |info| {
        Ok(json!({ "count": info.args().len(), "first": info.arg(0), "missing": info.arg(5) }))
    });
    let context = new_context(&bridge, template)?;

    let value = context
        .run_script("describe({ a: [1, 2] }, 'two', true)", "t.js")?
        .expect("value");

    assert_eq!(
        value.to_json()?,
        json!({ "count": 3, "first": { "a": [1, 2] }, "missing": null })
    );
    Ok(())
}

#[test]
fn test_callback_error_is_thrown_into_script() -> Result<()> {
    let bridge = Bridge::new();
    let mut template = ObjectTemplate::new();
    template.set_function("fail", |_| Err("nope".to_owned()));
    let context = new_context(&bridge, template)?;

    let caught = context
        .run_script("try { fail(); } catch (err) { err.message }", "t.js")?
        .expect("value");
    assert_eq!(caught.to_json()?, json!("nope"));

    match context.run_script("fail()", "t.js") {
        Err(BridgeError::Script(err)) => assert!(err.message.contains("nope")),
        other => panic!("expected a script error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_reentrant_run_is_rejected() -> Result<()> {
    let bridge = Bridge::new();
    let mut template = ObjectTemplate::new();
    template.set_function("nested", |info| {
        info.context()
            .run_script("1", "inner.js")
            .map(|_| JsonValue::Null)
            .map_err(|err| err.to_string())
    });
    let context = new_context(&bridge, template)?;

    match context.run_script("nested()", "outer.js") {
        Err(BridgeError::Script(err)) => {
            assert!(err.message.contains("re-entrant"), "message: {}", err.message);
        }
        other => panic!("expected a script error, got {other:?}"),
    }

    // The context is still usable and nothing stays registered.
    let value = context.run_script("2 * 21", "t.js")?.expect("value");
    assert_eq!(value.to_json()?, json!(42));
    assert_eq!(bridge.active_contexts(), 0);
    Ok(())
}

#[test]
fn test_callback_may_close_its_context() -> Result<()> {
    let bridge = Bridge::new();
    let mut template = ObjectTemplate::new();
    template.set_function("shutdown", |info| {
        info.context().close();
        Ok(json!("closing"))
    });
    let context = new_context(&bridge, template)?;

    let value = context.run_script("shutdown()", "t.js")?;
    drop(value);

    assert!(context.is_closed());
    assert!(matches!(
        context.run_script("1", "t.js"),
        Err(BridgeError::ContextDisposed(_))
    ));
    Ok(())
}

#[test]
fn test_contexts_on_separate_bridges_are_isolated() -> Result<()> {
    let left = Bridge::new();
    let right = Bridge::new();
    let left_context = new_context(&left, whoami_template(&left))?;
    let right_context = new_context(&right, whoami_template(&right))?;

    // Both registries start counting at one.
    assert_eq!(left_context.reference_id(), right_context.reference_id());

    let left_value = left_context.run_script("whoami()", "l.js")?.expect("value");
    let right_value = right_context.run_script("whoami()", "r.js")?.expect("value");

    assert_eq!(left_value.to_json()?, right_value.to_json()?);
    assert!(left_value.context() != right_value.context());
    Ok(())
}

/// Bridge plus the callback handler its engine was built with.
fn bridge_with_handler() -> (Bridge, Arc<dyn CallbackHandler>) {
    let mut captured = None;
    let bridge = Bridge::with_engine(|handler| -> Arc<dyn Engine> {
        captured = Some(Arc::clone(&handler));
        Arc::new(BoaEngine::new(handler))
    });
    let handler = captured.unwrap_or_else(|| panic!("engine was not built"));
    (bridge, handler)
}

#[test]
fn test_unknown_reference_is_not_found() {
    let (_bridge, handler) = bridge_with_handler();

    let err = handler
        .invoke(ReferenceId(999), 0, Vec::new())
        .expect_err("nothing is registered");

    assert_eq!(err, "context 999 is not registered");
}

#[test]
fn test_idle_context_does_not_resolve() -> Result<()> {
    let (bridge, handler) = bridge_with_handler();
    let context = new_context(&bridge, whoami_template(&bridge))?;

    // Resolvable only while a script runs on its behalf.
    context.run_script("whoami()", "t.js")?;
    let err = handler
        .invoke(context.reference_id(), 0, Vec::new())
        .expect_err("idle context");

    assert_eq!(err, format!("context {} is not registered", context.reference_id()));
    Ok(())
}

#[test]
fn test_missing_slot_is_reported() -> Result<()> {
    let (bridge, handler) = bridge_with_handler();
    let mut template = ObjectTemplate::new();
    template.set_function("lookupSlot", move |info| {
        let reference = info.context().reference_id();
        match handler.invoke(reference, 7, Vec::new()) {
            Ok(_) => Err("slot 7 unexpectedly resolved".to_owned()),
            Err(message) => Ok(json!(message)),
        }
    });
    let context = new_context(&bridge, template)?;

    let value = context.run_script("lookupSlot()", "t.js")?.expect("value");

    assert_eq!(
        value.to_json()?,
        json!(format!(
            "context {} has no host function in slot 7",
            context.reference_id()
        ))
    );
    Ok(())
}

#[test]
fn test_cyclic_callback_argument_is_thrown() -> Result<()> {
    let bridge = Bridge::new();
    let mut template = ObjectTemplate::new();
    template.set_function("accept", |_| Ok(JsonValue::Null));
    let context = new_context(&bridge, template)?;

    let value = context
        .run_script(
            "var a = {}; a.self = a; try { accept(a); 'accepted' } catch (err) { err.message }",
            "t.js",
        )?
        .expect("value");

    assert_eq!(value.to_json()?, json!("cyclic value"));
    Ok(())
}

#[test]
fn test_cross_isolate_cycle_is_rejected() -> Result<()> {
    let bridge = Bridge::new();
    let peer: Arc<Mutex<Option<Context>>> = Arc::new(Mutex::new(None));
    let origin: Arc<Mutex<Option<Context>>> = Arc::new(Mutex::new(None));

    let forward = |slot: &Arc<Mutex<Option<Context>>>, source: &'static str| {
        let slot = Arc::clone(slot);
        move |_: &FunctionCallbackInfo| {
            let target = slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
                .ok_or_else(|| "target not set".to_owned())?;
            target
                .run_script(source, "forward.js")
                .map(|_| JsonValue::Null)
                .map_err(|err| err.to_string())
        }
    };

    let mut first_template = ObjectTemplate::new();
    first_template.set_function("callPeer", forward(&peer, "callOrigin()"));
    let mut second_template = ObjectTemplate::new();
    second_template.set_function("callOrigin", forward(&origin, "1"));

    // Each context gets its own isolate.
    let first = new_context(&bridge, first_template)?;
    let second = new_context(&bridge, second_template)?;
    assert!(first.isolate()? != second.isolate()?);
    *origin.lock().unwrap_or_else(PoisonError::into_inner) = Some(first.clone());
    *peer.lock().unwrap_or_else(PoisonError::into_inner) = Some(second.clone());

    match first.run_script("callPeer()", "start.js") {
        Err(BridgeError::Script(err)) => {
            assert!(err.message.contains("re-entrant"), "message: {}", err.message);
        }
        other => panic!("expected a script error, got {other:?}"),
    }

    // Both isolates are still responsive.
    assert_eq!(
        second.run_script("2 + 2", "t.js")?.expect("value").to_json()?,
        json!(4)
    );
    assert_eq!(
        first.run_script("3 + 3", "t.js")?.expect("value").to_json()?,
        json!(6)
    );
    assert_eq!(bridge.active_contexts(), 0);

    // Break the context <-> callback reference cycle.
    origin.lock().unwrap_or_else(PoisonError::into_inner).take();
    peer.lock().unwrap_or_else(PoisonError::into_inner).take();
    Ok(())
}
