//! Drives `DemoVm` through the full server loop (dispatcher, controller,
//! an in-memory transport) to cover the scenarios a real client/VM pairing
//! would exercise. No sockets, no stdio — `MemoryTransport` below plays the
//! part of the wire.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use glint_debug_server::{build_controller, teardown, Transport};
use glint_vm::demo::{BinOp, Expr, FunctionDef, Program, Stmt};
use glint_vm::DemoVm;
use serde_json::{json, Value as Json};

/// An in-memory transport for end-to-end tests. Inbound traffic is split
/// into two queues because the two read paths aren't interchangeable: the
/// tick pump's non-blocking `poll` runs on every hook event, including the
/// one about to decide whether to pause, so it must only ever see messages
/// a real client would send while the VM is still running (e.g. an
/// `add_breakpoint` sent up front); `run_one` is read only from inside the
/// pause pump's blocking loop and sees messages sent in response to a
/// `paused` notification, the way a real client only ever replies after
/// observing one.
struct MemoryTransport {
    tick_inbound: VecDeque<Json>,
    pause_inbound: VecDeque<Json>,
    outbound: Arc<Mutex<Vec<Json>>>,
    open: bool,
}

impl Transport for MemoryTransport {
    fn close(&mut self) {
        self.open = false;
    }
    fn is_open(&self) -> bool {
        self.open
    }
    fn poll(&mut self) -> Vec<Json> {
        self.tick_inbound.drain(..).collect()
    }
    fn run_one(&mut self) -> Option<Json> {
        self.pause_inbound.pop_front()
    }
    fn wait_for_connection(&mut self) {}
    fn send_message(&mut self, msg: &Json) -> bool {
        self.outbound.lock().unwrap().push(msg.clone());
        true
    }
}

fn run_scenario(program: Program, tick_inbound: Vec<Json>, pause_inbound: Vec<Json>) -> Vec<Json> {
    let outbound = Arc::new(Mutex::new(Vec::new()));
    let transport = MemoryTransport {
        tick_inbound: tick_inbound.into(),
        pause_inbound: pause_inbound.into(),
        outbound: outbound.clone(),
        open: true,
    };
    let transport = Arc::new(Mutex::new(transport));
    let controller = build_controller(transport.clone());

    let mut vm = DemoVm::new(program);
    vm.install_hook(controller);
    vm.run();
    teardown(&transport);

    outbound.lock().unwrap().clone()
}

fn id_response<'a>(sent: &'a [Json], id: i64) -> &'a Json {
    sent.iter().find(|m| m.get("id") == Some(&json!(id))).expect("response with matching id")
}

/// Scenario 1: basic breakpoint — add one while running, then resolve the
/// entry pause and the breakpoint pause with one `continue` each.
#[test]
fn basic_breakpoint_pauses_once_then_completes() {
    let program = Program {
        source_path: "test1.demo".into(),
        main: vec![
            (1, Stmt::Let("x".into(), Expr::Int(0))),
            (5, Stmt::Assign("x".into(), Expr::Int(1))),
            (6, Stmt::Print(Expr::Var("x".into()))),
        ],
        functions: Default::default(),
    };
    let tick_inbound =
        vec![json!({"method": "add_breakpoint", "id": 1, "params": {"file": "test1.demo", "line": 5}})];
    let pause_inbound =
        vec![json!({"method": "continue", "id": 2}), json!({"method": "continue", "id": 3})];
    let sent = run_scenario(program, tick_inbound, pause_inbound);

    let paused: Vec<&Json> = sent.iter().filter(|m| m["method"] == "paused").collect();
    assert_eq!(paused.len(), 2, "entry pause plus the breakpoint pause");
    assert_eq!(paused[0]["params"]["reason"], "entry");
    assert_eq!(paused[1]["params"]["reason"], "breakpoint");
    assert_eq!(sent.iter().filter(|m| m["method"] == "running").count(), 2);
    assert_eq!(id_response(&sent, 1)["result"], json!(true));
}

/// Scenario 2: step_in across a call. Entry pauses at the program's first
/// line; `step_in` from there walks into `f`'s body, then back out onto
/// the line after the call.
#[test]
fn step_in_walks_into_and_out_of_a_call() {
    let mut functions = std::collections::HashMap::new();
    functions.insert(
        "f".to_string(),
        FunctionDef {
            name: "f".into(),
            params: vec![],
            is_vararg: false,
            body: vec![(1, Stmt::Return(Some(Expr::Int(1))))],
            upvalues: vec![],
            line_defined: 1,
            last_line_defined: 1,
        },
    );
    let program = Program {
        source_path: "test2.demo".into(),
        main: vec![
            (2, Stmt::Let("x".into(), Expr::Call("f".into(), vec![]))),
            (3, Stmt::Print(Expr::Var("x".into()))),
        ],
        functions,
    };
    let pause_inbound = vec![
        json!({"method": "get_stacktrace", "id": 1}),
        json!({"method": "step_in", "id": 2}),
        json!({"method": "get_stacktrace", "id": 3}),
        json!({"method": "step_in", "id": 4}),
        json!({"method": "get_stacktrace", "id": 5}),
    ];
    let sent = run_scenario(program, Vec::new(), pause_inbound);

    let line_at = |id| id_response(&sent, id)["result"][0]["line"].as_i64().unwrap();
    assert_eq!(line_at(1), 2, "entry pause lands on main's call line");
    assert_eq!(line_at(3), 1, "step_in follows the call into f's body");
    assert_eq!(line_at(5), 3, "stepping from f's only line returns to the statement after the call");
}

/// Scenario 3: a hit-condition `<7` inside a 10-iteration loop pauses on
/// hits 1 through 6 only.
#[test]
fn hit_condition_caps_the_pause_count() {
    let mut main = vec![(1, Stmt::Let("i".into(), Expr::Int(0)))];
    for _ in 0..10 {
        main.push((
            2,
            Stmt::Assign(
                "i".into(),
                Expr::Binary(BinOp::Add, Box::new(Expr::Var("i".into())), Box::new(Expr::Int(1))),
            ),
        ));
    }
    let program = Program { source_path: "loop.demo".into(), main, functions: Default::default() };

    let tick_inbound = vec![
        json!({"method": "add_breakpoint", "id": 1, "params": {"file": "loop.demo", "line": 2, "hit_condition": "<7"}}),
        // Cancels the entry pause before it's ever evaluated, so only
        // breakpoint pauses are counted below.
        json!({"method": "continue", "id": 2}),
    ];
    let pause_inbound: Vec<Json> =
        (3..9).map(|id| json!({"method": "continue", "id": id})).collect();
    let sent = run_scenario(program, tick_inbound, pause_inbound);

    let breakpoint_pauses =
        sent.iter().filter(|m| m["method"] == "paused" && m["params"]["reason"] == "breakpoint").count();
    assert_eq!(breakpoint_pauses, 6);
}

/// Scenario 4: a `condition` of `"i==4"` inside the same 10-iteration loop
/// pauses exactly once, with `hit_count == 1` (the condition gates whether a
/// hit is even recorded, so only the one matching iteration counts).
#[test]
fn conditional_breakpoint_pauses_exactly_once() {
    let mut main = vec![(1, Stmt::Let("i".into(), Expr::Int(0)))];
    for _ in 0..10 {
        main.push((
            2,
            Stmt::Assign(
                "i".into(),
                Expr::Binary(BinOp::Add, Box::new(Expr::Var("i".into())), Box::new(Expr::Int(1))),
            ),
        ));
    }
    let program = Program { source_path: "loop4.demo".into(), main, functions: Default::default() };

    let tick_inbound = vec![
        json!({"method": "add_breakpoint", "id": 1, "params": {"file": "loop4.demo", "line": 2, "condition": "i==4"}}),
        json!({"method": "continue", "id": 2}),
    ];
    // Only one line event ever satisfies `i==4` (checked before that
    // iteration's increment runs), so only one pause needs resolving.
    let pause_inbound =
        vec![json!({"method": "get_breakpoints", "id": 3}), json!({"method": "continue", "id": 4})];
    let sent = run_scenario(program, tick_inbound, pause_inbound);

    let breakpoint_pauses: Vec<&Json> =
        sent.iter().filter(|m| m["method"] == "paused" && m["params"]["reason"] == "breakpoint").collect();
    assert_eq!(breakpoint_pauses.len(), 1);
    assert_eq!(id_response(&sent, 3)["result"][0]["hit_count"], json!(1));
}

/// A condition or hit-condition that divides/mods by zero must not unwind
/// across the VM hook boundary — `eval`'s integer `%` falls back to a float
/// NaN instead of panicking on a zero divisor, the same way `/` already
/// falls back to float infinity/NaN.
#[test]
fn eval_of_zero_divisor_modulo_does_not_panic() {
    let program = Program {
        source_path: "t4b.demo".into(),
        main: vec![(1, Stmt::Print(Expr::Int(0)))],
        functions: Default::default(),
    };
    let pause_inbound = vec![
        json!({"method": "eval", "id": 1, "params": {"chunk": "1 % 0", "stack_no": 0}}),
        json!({"method": "continue", "id": 2}),
    ];
    let sent = run_scenario(program, Vec::new(), pause_inbound);

    assert_eq!(id_response(&sent, 1)["result"], json!(["NaN"]));
    assert_eq!(sent.last().unwrap()["method"], "exit", "the VM hook never unwound");
}

/// Scenario 5: `eval` sees locals assigned so far at a pause.
#[test]
fn eval_reads_current_locals_at_a_pause() {
    let program = Program {
        source_path: "t5.demo".into(),
        main: vec![
            (1, Stmt::Let("a".into(), Expr::Int(1))),
            (2, Stmt::Let("b".into(), Expr::Int(2))),
            (3, Stmt::Print(Expr::Var("a".into()))),
        ],
        functions: Default::default(),
    };
    let pause_inbound = vec![
        json!({"method": "step", "id": 1}),
        json!({"method": "step", "id": 2}),
        json!({"method": "eval", "id": 3, "params": {"chunk": "a + b", "stack_no": 0}}),
    ];
    let sent = run_scenario(program, Vec::new(), pause_inbound);

    assert_eq!(id_response(&sent, 3)["result"], json!([3]));
}

/// Scenario 6: `get_global {depth: 0}` returns an object (every aggregate
/// member collapsed to an opaque placeholder, checked at the unit level in
/// `glint_debugger::value`'s own tests).
#[test]
fn get_global_at_depth_zero_returns_an_object() {
    let program = Program {
        source_path: "t6.demo".into(),
        main: vec![(1, Stmt::ExprStmt(Expr::Int(0)))],
        functions: Default::default(),
    };
    let pause_inbound = vec![json!({"method": "get_global", "id": 1, "params": {"depth": 0}})];
    let sent = run_scenario(program, Vec::new(), pause_inbound);

    assert!(id_response(&sent, 1)["result"].is_object());
}

/// `connected` always precedes any response, and `exit` always follows
/// teardown, on the same transport.
#[test]
fn handshake_and_exit_bookend_the_session() {
    let program = Program {
        source_path: "t7.demo".into(),
        main: vec![(1, Stmt::ExprStmt(Expr::Int(0)))],
        functions: Default::default(),
    };
    let sent = run_scenario(program, Vec::new(), vec![json!({"method": "continue", "id": 1})]);

    assert_eq!(sent.first().unwrap()["method"], "connected");
    assert_eq!(sent.last().unwrap()["method"], "exit");
}
