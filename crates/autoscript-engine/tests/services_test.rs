//! `@service` functions exposed through the service registry

mod common;

use autoscript_core::Context;
use autoscript_engine::{CompiledFunction, CompiledUnit, DecoratorCall, FunctionError, Invocation};
use autoscript_service_registry::ServiceError;
use common::*;
use serde_json::{json, Value};
use std::time::Duration;

fn service() -> DecoratorCall {
    DecoratorCall::new("service")
}

fn func1() -> CompiledFunction {
    CompiledFunction::new("func1", |inv: Invocation| async move {
        let seq_num = inv.globals.increment("seq_num", 1);
        let arg1 = inv.arg("arg1").cloned().unwrap_or(Value::Null);
        let arg2 = inv.arg("arg2").cloned().unwrap_or(Value::Null);
        inv.set_state("autoscript.done", format!("{} {} {}", seq_num, arg1, arg2))?;
        let caller = inv
            .arg("context")
            .and_then(|c| c.get("id"))
            .and_then(Value::as_str)
            .unwrap_or("none")
            .to_string();
        inv.set_state("autoscript.caller", caller)?;
        Ok::<(), FunctionError>(())
    })
    .param_default("arg1", 1)
    .param_default("arg2", 2)
    .param_default("context", Value::Null)
    .decorator(service())
}

fn func2() -> CompiledFunction {
    CompiledFunction::new("func2", |inv: Invocation| async move {
        let mut keys: Vec<&str> = inv.kwargs.keys().map(String::as_str).collect();
        keys.sort_unstable();
        inv.set_state("autoscript.func2_keys", keys.join(","))?;
        inv.set_state(
            "autoscript.func2_type",
            inv.arg_str("trigger_type").unwrap_or("?").to_string(),
        )?;
        Ok::<(), FunctionError>(())
    })
    .var_kwargs()
    .decorator(service())
}

fn failing() -> CompiledFunction {
    CompiledFunction::new("failing", |_inv| async {
        Err(FunctionError::raise("ValueError", "bad input"))
    })
    .decorator(service())
}

fn func_yaml() -> CompiledFunction {
    CompiledFunction::new("func_yaml", |_inv| async { Ok(()) })
        .param("arg1")
        .param("arg2")
        .doc("yaml\ndescription: This is func_yaml\nfields:\n  arg1:\n    description: This is arg1\n    example: 12\n")
        .decorator(service())
}

fn svc_unit() -> CompiledUnit {
    CompiledUnit::new("file.svc")
        .global("seq_num", 0)
        .function(func1())
        .function(func2())
        .function(failing())
        .function(func_yaml())
}

async fn setup() -> (TestHost, autoscript_engine::Autoscript) {
    let th = TestHost::new();
    let engine = th.engine();
    engine.setup(FakeLoader::new().with_unit(svc_unit()).shared());
    (th, engine)
}

#[tokio::test]
async fn test_service_binds_data_over_defaults() {
    let (th, engine) = setup().await;
    let caller = Context::new();

    let result = th
        .host
        .services
        .call(DOMAIN, "func1", json!({"arg1": 10}), caller.clone())
        .await;
    assert!(result.is_ok());
    // the call returns only once the function has finished
    assert_eq!(th.state("autoscript.done").as_deref(), Some("1 10 2"));
    assert_eq!(th.state("autoscript.caller"), Some(caller.id.clone()));

    th.call("func1", json!({"arg1": 3, "arg2": 4})).await.unwrap();
    assert_eq!(th.state("autoscript.done").as_deref(), Some("2 3 4"));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_var_kwargs_receive_service_bindings() {
    let (th, engine) = setup().await;

    th.call("func2", json!({"x": 1, "y": "two"})).await.unwrap();
    assert_eq!(
        th.state("autoscript.func2_keys").as_deref(),
        Some("context,trigger_type,x,y")
    );
    assert_eq!(th.state("autoscript.func2_type").as_deref(), Some("service"));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_failing_service_reports_error() {
    let (logs, _guard) = LogCapture::install();
    let (th, engine) = setup().await;

    let err = th.call("failing", json!({})).await.unwrap_err();
    assert!(matches!(&err, ServiceError::CallFailed(msg) if msg.contains("ValueError: bad input")));
    logs.assert_logged("Exception in <file.svc.failing>: ValueError: bad input");

    // the failure released nothing it should not have; later calls still work
    th.call("func1", json!({})).await.unwrap();
    assert_eq!(th.state("autoscript.done").as_deref(), Some("1 1 2"));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_unknown_service() {
    let (th, engine) = setup().await;
    let err = th.call("nope", json!({})).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound { .. }));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_service_descriptions() {
    let (th, engine) = setup().await;

    let desc = th.host.services.get_service(DOMAIN, "func1").unwrap();
    assert_eq!(desc.description.as_deref(), Some("autoscript function func1()"));
    assert_eq!(
        serde_json::to_value(&desc.fields).unwrap(),
        json!({
            "arg1": {"description": "argument arg1"},
            "arg2": {"description": "argument arg2"},
        })
    );

    let desc = th.host.services.get_service(DOMAIN, "func_yaml").unwrap();
    assert_eq!(desc.description.as_deref(), Some("This is func_yaml"));
    assert_eq!(
        serde_json::to_value(&desc.fields).unwrap(),
        json!({"arg1": {"description": "This is arg1", "example": "12"}})
    );

    assert_eq!(
        engine.contexts().describe("file.svc", "func_yaml"),
        Some(desc)
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn test_queued_service_discards_while_busy() {
    let th = TestHost::new();
    let engine = th.engine();
    let slow = CompiledFunction::new("slow", |inv: Invocation| async move {
        let runs = inv.globals.increment("runs", 1);
        inv.set_state("autoscript.runs", runs)?;
        while inv.get_state("autoscript.release").as_deref() != Some("go") {
            inv.sleep(Duration::from_millis(2)).await;
        }
        Ok::<(), FunctionError>(())
    })
    .decorator(service())
    .decorator(DecoratorCall::new("task_queue").arg("slow"));
    engine.setup(
        FakeLoader::new()
            .with_unit(CompiledUnit::new("file.slow").function(slow))
            .shared(),
    );

    let services = th.host.services.clone();
    let first = tokio::spawn(async move {
        services
            .call(DOMAIN, "slow", json!({}), Context::new())
            .await
    });
    th.wait_for_state("autoscript.runs", "1").await;

    th.call("slow", json!({})).await.unwrap();
    assert!(engine.tasks().is_group_busy("slow"));
    assert_eq!(th.state("autoscript.runs").as_deref(), Some("1"));

    th.set_state("autoscript.release", "go");
    first.await.unwrap().unwrap();
    assert!(!engine.tasks().is_group_busy("slow"));

    engine.shutdown().await;
}
