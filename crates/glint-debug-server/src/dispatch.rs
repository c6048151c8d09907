//! Command Dispatcher (component F): the static method table and per-method
//! parameter validation, exactly matching the original's `cmd_map`.

use glint_debugger::{controller::ExecutionController, frame::EvalOptions, state::StepMode};
use glint_vm::VmContract;
use serde_json::{json, Value as Json};

use crate::protocol::{DispatchError, ResponseError};

/// Runs one request against the controller and the VM, returning the
/// `(result, error)` pair a response carries. Unknown methods are the
/// caller's responsibility (see [`dispatch`]'s `MethodNotFound` fallback).
pub fn dispatch(
    controller: &ExecutionController,
    vm: &dyn VmContract,
    method: &str,
    params: &Json,
) -> (Json, Option<ResponseError>) {
    match method {
        "step" | "step_over" => {
            controller.request_step(vm, StepMode::Over);
            (Json::Null, None)
        },
        "step_in" => {
            controller.request_step(vm, StepMode::In);
            (Json::Null, None)
        },
        "step_out" => {
            controller.request_step(vm, StepMode::Out);
            (Json::Null, None)
        },
        "continue" => {
            controller.continue_exec();
            (Json::Null, None)
        },
        "pause" => {
            controller.pause_request();
            (Json::Null, None)
        },
        "add_breakpoint" => add_breakpoint(controller, params),
        "clear_breakpoints" => clear_breakpoints(controller, params),
        "get_breakpoints" => get_breakpoints(controller),
        "get_stacktrace" => get_stacktrace(vm),
        "get_local_variable" => get_locals_or_upvalues(vm, params, Scope::Local),
        "get_upvalues" => get_locals_or_upvalues(vm, params, Scope::Upvalue),
        "eval" => eval(vm, params),
        "get_global" => get_global(vm, params),
        other => (
            Json::Null,
            Some(DispatchError::MethodNotFound(format!("method not found: {other}")).into()),
        ),
    }
}

fn invalid_params(message: &str) -> (Json, Option<ResponseError>) {
    (Json::Null, Some(DispatchError::InvalidParams(message.to_string()).into()))
}

fn add_breakpoint(controller: &ExecutionController, params: &Json) -> (Json, Option<ResponseError>) {
    let (Some(file), Some(line)) = (params["file"].as_str(), params["line"].as_u64()) else {
        return invalid_params("invalid params");
    };
    let condition = params["condition"].as_str().map(str::to_string);
    let hit_condition = params["hit_condition"].as_str().map(str::to_string);
    controller.add_breakpoint(file, line as u32, condition, hit_condition);
    (Json::Bool(true), None)
}

fn clear_breakpoints(controller: &ExecutionController, params: &Json) -> (Json, Option<ResponseError>) {
    let file = params["file"].as_str();
    let line = params["line"].as_u64().map(|l| l as u32);
    controller.clear_breakpoints(file, line);
    (Json::Bool(true), None)
}

fn get_breakpoints(controller: &ExecutionController) -> (Json, Option<ResponseError>) {
    let descriptors = controller.list_breakpoints();
    let arr: Vec<Json> = descriptors
        .iter()
        .map(|bp| {
            let mut obj = serde_json::Map::new();
            obj.insert("file".into(), json!(bp.file));
            if let Some(func) = &bp.func {
                obj.insert("func".into(), json!(func));
            }
            obj.insert("line".into(), json!(bp.line));
            if let Some(cond) = &bp.condition {
                obj.insert("condition".into(), json!(cond));
            }
            obj.insert("hit_count".into(), json!(bp.hit_count));
            Json::Object(obj)
        })
        .collect();
    (Json::Array(arr), None)
}

fn get_stacktrace(vm: &dyn VmContract) -> (Json, Option<ResponseError>) {
    let depth = vm.call_stack_depth();
    let mut arr = Vec::with_capacity(depth);
    for level in 0..depth {
        let Some(activation) = vm.activation(level as u32) else { continue };
        arr.push(json!({
            "file": activation.source_path,
            "func": activation.name,
            "line": activation.current_line,
            "id": activation.short_source,
        }));
    }
    (Json::Array(arr), None)
}

enum Scope {
    Local,
    Upvalue,
}

fn get_locals_or_upvalues(
    vm: &dyn VmContract,
    params: &Json,
    scope: Scope,
) -> (Json, Option<ResponseError>) {
    let Some(stack_no) = params["stack_no"].as_u64() else {
        return invalid_params("invalid params");
    };
    if stack_no as usize >= vm.call_stack_depth() {
        return invalid_params("invalid params");
    }
    let inspector = glint_debugger::frame::FrameInspector::new(vm, stack_no as u32);
    let depth = params["depth"].as_u64().unwrap_or(1) as u32;
    let entries = match scope {
        Scope::Local => inspector.locals(),
        Scope::Upvalue => inspector.upvalues(),
    };
    let Ok(entries) = entries else {
        return invalid_params("invalid params");
    };
    let mut obj = serde_json::Map::new();
    for (name, value) in entries {
        obj.insert(name, glint_debugger::value::to_json(vm, &value, depth));
    }
    (Json::Object(obj), None)
}

fn eval(vm: &dyn VmContract, params: &Json) -> (Json, Option<ResponseError>) {
    let (Some(chunk), Some(stack_no)) = (params["chunk"].as_str(), params["stack_no"].as_u64())
    else {
        return invalid_params("invalid params");
    };
    if stack_no as usize >= vm.call_stack_depth() {
        return invalid_params("invalid params");
    }
    let opts = EvalOptions {
        include_globals: params["global"].as_bool().unwrap_or(true),
        include_upvalues: params["upvalue"].as_bool().unwrap_or(true),
        include_locals: params["local"].as_bool().unwrap_or(true),
        // +1: the synthesized environment table itself consumes one level
        // of depth budget before its members are expanded.
        depth: params["depth"].as_u64().unwrap_or(1) as u32 + 1,
    };
    let inspector = glint_debugger::frame::FrameInspector::new(vm, stack_no as u32);
    match inspector.eval(chunk, opts) {
        Ok(values) => (Json::Array(values), None),
        Err(e) => invalid_params(&e.to_string()),
    }
}

fn get_global(vm: &dyn VmContract, params: &Json) -> (Json, Option<ResponseError>) {
    let depth = params["depth"].as_u64().unwrap_or(1) as u32 + 1;
    (glint_debugger::value::to_json(vm, &vm.globals(), depth), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorCode;
    use glint_vm::demo::{Program, Stmt};
    use glint_vm::{DemoVm, HookEvent, HookSink};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    struct NoopTick;
    impl glint_debugger::controller::TickPump for NoopTick {
        fn tick(&self, _vm: &dyn VmContract) {}
    }
    struct NoopPause;
    impl glint_debugger::controller::PausePump for NoopPause {
        fn run(&self, _vm: &dyn VmContract, _reason: glint_debugger::PauseReason) {}
    }

    fn program() -> Program {
        Program {
            source_path: "t.demo".into(),
            main: vec![
                (1, Stmt::Let("a".into(), glint_vm::demo::Expr::Int(10))),
                (2, Stmt::Print(glint_vm::demo::Expr::Var("a".into()))),
            ],
            functions: Default::default(),
        }
    }

    #[test]
    fn unknown_method_is_method_not_found() {
        let controller = ExecutionController::new(Box::new(NoopTick), Box::new(NoopPause));
        let vm = DemoVm::new(program());
        let (_, err) = dispatch(&controller, &vm, "frobnicate", &Json::Null);
        let err = err.unwrap();
        assert_eq!(err.code, ErrorCode::MethodNotFound.code());
        assert_eq!(err.message, "method not found: frobnicate");
    }

    #[test]
    fn add_breakpoint_without_line_is_invalid_params() {
        let controller = ExecutionController::new(Box::new(NoopTick), Box::new(NoopPause));
        let vm = DemoVm::new(program());
        let (_, err) = dispatch(&controller, &vm, "add_breakpoint", &json!({"file": "a.demo"}));
        assert_eq!(err.unwrap().code, ErrorCode::InvalidParams.code());
    }

    #[test]
    fn eval_reads_locals_while_paused() {
        let controller = Arc::new(ExecutionController::new(Box::new(NoopTick), Box::new(NoopPause)));
        struct Check(Arc<ExecutionController>);
        impl HookSink for Check {
            fn on_hook(&self, vm: &dyn VmContract, event: HookEvent) {
                if event == HookEvent::Line(2) {
                    let (result, err) =
                        eval(vm, &json!({"chunk": "a", "stack_no": 0}));
                    assert!(err.is_none());
                    assert_eq!(result, json!([10]));
                }
            }
        }
        let vm = DemoVm::new(program());
        let mut vm = vm;
        vm.install_hook(Arc::new(Check(controller)));
        vm.run();
    }
}
