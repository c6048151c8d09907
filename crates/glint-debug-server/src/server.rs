//! Server Loop (component G): owns the transport, wires the tick/pause
//! pumps into the [`ExecutionController`], handles the connection
//! handshake and teardown.
//!
//! The controller never owns a reference back to the server: the pump
//! adapters below hold a [`Weak`] handle into the controller they were
//! built alongside (via [`Arc::new_cyclic`]), so the only strong-reference
//! cycle that could exist never forms.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use glint_debugger::controller::{ExecutionController, PausePump, TickPump};
use glint_debugger::PauseReason;
use glint_vm::VmContract;
use log::{debug, warn};
use serde_json::{json, Value as Json};

use crate::dispatch::dispatch;
use crate::protocol::{serialize_notify, serialize_response, Incoming};

pub const PROTOCOL_VERSION: &str = "2";

/// The byte-stream contract a server loop needs from its transport.
/// Translated from a callback-registration shape (`on_connection`,
/// `on_data`, `on_close`, `on_error`) into polling returns, which reads
/// more naturally against Rust ownership than four stored closures would.
pub trait Transport: Send {
    fn close(&mut self);
    fn is_open(&self) -> bool;
    /// Non-blocking: drains whatever inbound messages have already arrived.
    fn poll(&mut self) -> Vec<Json>;
    /// Blocks until at least one inbound message is available, or the
    /// transport closes (in which case it returns `None`).
    fn run_one(&mut self) -> Option<Json>;
    /// Blocks until a peer attaches. A no-op for transports that are
    /// connected from the moment they're constructed (e.g. stdio).
    fn wait_for_connection(&mut self);
    fn send_message(&mut self, msg: &Json) -> bool;
}

struct Shared<T: Transport> {
    transport: Arc<Mutex<T>>,
    waiting_for_connect: AtomicBool,
}

impl<T: Transport> Shared<T> {
    fn send_notify(&self, method: &str, params: Option<Json>) {
        let msg = serialize_notify(method, params);
        debug!("-> {msg}");
        self.transport.lock().unwrap().send_message(&msg);
    }

    fn connected_handshake(&self, vm: &dyn VmContract) {
        self.waiting_for_connect.store(false, Ordering::SeqCst);
        let identity = vm.version();
        let params = json!({
            "protocol_version": PROTOCOL_VERSION,
            "vm": {
                "version": identity.version,
                "release": identity.release,
                "copyright": identity.copyright,
            },
        });
        self.send_notify("connected", Some(params));
    }

    fn handle_one(&self, controller: &ExecutionController, vm: &dyn VmContract, msg: Json) {
        let Some(incoming) = Incoming::from_json(&msg) else {
            warn!("dropping unclassifiable message: {msg}");
            return;
        };
        let Incoming::Request(req) = incoming else {
            // Inbound notifications/responses have no current consumer on
            // this side of the wire.
            return;
        };
        let (result, error) = dispatch(controller, vm, &req.method, &req.params);
        let response = serialize_response(&req.id, result, error);
        debug!("-> {response}");
        self.transport.lock().unwrap().send_message(&response);
    }
}

/// Installed as the controller's tick pump: called on every hook event.
/// Gates VM execution on the first connection, then polls the transport
/// without blocking.
struct TickAdapter<T: Transport> {
    shared: Arc<Shared<T>>,
    controller: Weak<ExecutionController>,
}

impl<T: Transport> TickPump for TickAdapter<T> {
    fn tick(&self, vm: &dyn VmContract) {
        let Some(controller) = self.controller.upgrade() else { return };

        if self.shared.waiting_for_connect.load(Ordering::SeqCst) {
            self.shared.transport.lock().unwrap().wait_for_connection();
            self.shared.connected_handshake(vm);
        }

        let inbound = self.shared.transport.lock().unwrap().poll();
        for msg in inbound {
            self.shared.handle_one(&controller, vm, msg);
        }
    }
}

/// Installed as the controller's pause pump: sends `paused`, then blocks
/// reading and dispatching requests until resumed or the transport closes.
struct PauseAdapter<T: Transport> {
    shared: Arc<Shared<T>>,
    controller: Weak<ExecutionController>,
}

impl<T: Transport> PausePump for PauseAdapter<T> {
    fn run(&self, vm: &dyn VmContract, reason: PauseReason) {
        let Some(controller) = self.controller.upgrade() else { return };

        self.shared.send_notify("paused", Some(json!({ "reason": reason.as_str() })));

        while controller.is_paused() && self.shared.transport.lock().unwrap().is_open() {
            let Some(msg) = self.shared.transport.lock().unwrap().run_one() else { break };
            self.shared.handle_one(&controller, vm, msg);
        }
        // Transport closure is an implicit continue: the VM must not
        // deadlock waiting on a peer that is gone.
        if !self.shared.transport.lock().unwrap().is_open() {
            controller.continue_exec();
        }

        self.shared.send_notify("running", None);
    }
}

/// Builds an [`ExecutionController`] wired to `transport`, ready to install
/// on a VM via [`glint_vm::VmContract::install_hook`].
///
/// Takes the transport behind `Arc<Mutex<_>>` rather than owning it outright
/// so the caller retains a handle to call [`teardown`] once the VM's run
/// loop returns.
pub fn build_controller<T: Transport + 'static>(transport: Arc<Mutex<T>>) -> Arc<ExecutionController> {
    let shared = Arc::new(Shared { transport, waiting_for_connect: AtomicBool::new(true) });

    Arc::new_cyclic(|weak: &Weak<ExecutionController>| {
        ExecutionController::new(
            Box::new(TickAdapter { shared: shared.clone(), controller: weak.clone() }),
            Box::new(PauseAdapter { shared, controller: weak.clone() }),
        )
    })
}

/// Sends the `exit` notification and closes the transport. Call once the
/// VM has finished running.
pub fn teardown<T: Transport>(transport: &Mutex<T>) {
    let exit = serialize_notify("exit", None);
    let mut transport = transport.lock().unwrap();
    transport.send_message(&exit);
    transport.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use glint_vm::demo::{Program, Stmt};
    use glint_vm::DemoVm;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// An in-memory transport for tests: "connected" immediately, outbound
    /// messages are recorded. Inbound traffic is split into two queues
    /// because the two read paths aren't interchangeable: `poll` (used by
    /// the tick pump, non-blocking, runs on every hook event including the
    /// one about to decide whether to pause) must only ever see messages a
    /// real client would have sent while the VM was still running, while
    /// `run_one` (used only inside the pause pump's blocking loop) sees
    /// messages sent in response to a `paused` notification. A single
    /// shared queue would let a pre-loaded "continue" meant for the pause
    /// loop get drained by `poll` first and cancel a pause before it ever
    /// happens.
    struct MemoryTransport {
        tick_inbound: VecDeque<Json>,
        pause_inbound: VecDeque<Json>,
        outbound: Arc<StdMutex<Vec<Json>>>,
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

    fn program() -> Program {
        Program {
            source_path: "t.demo".into(),
            main: vec![(1, Stmt::Let("a".into(), glint_vm::demo::Expr::Int(1)))],
            functions: Default::default(),
        }
    }

    #[test]
    fn handshake_sends_connected_before_any_response() {
        let outbound = Arc::new(StdMutex::new(Vec::new()));
        let transport = MemoryTransport {
            tick_inbound: VecDeque::new(),
            pause_inbound: VecDeque::new(),
            outbound: outbound.clone(),
            open: true,
        };
        let controller = build_controller(Arc::new(Mutex::new(transport)));
        controller.continue_exec();

        let vm = DemoVm::new(program());
        let mut vm = vm;
        vm.install_hook(controller);
        vm.run();

        let sent = outbound.lock().unwrap();
        assert_eq!(sent[0]["method"], "connected");
        assert_eq!(sent[0]["params"]["protocol_version"], PROTOCOL_VERSION);
    }

    #[test]
    fn pause_pump_dispatches_queued_continue_and_sends_running() {
        let outbound = Arc::new(StdMutex::new(Vec::new()));
        let pause_inbound = VecDeque::from([json!({"method": "continue", "id": 1})]);
        let transport = MemoryTransport {
            tick_inbound: VecDeque::new(),
            pause_inbound,
            outbound: outbound.clone(),
            open: true,
        };
        let controller = build_controller(Arc::new(Mutex::new(transport)));
        // leave step_mode at its Entry default so the first line pauses; the
        // queued "continue" sits in pause_inbound, so it's only visible to
        // the blocking pause loop, never to the tick pump's poll.

        let vm = DemoVm::new(program());
        let mut vm = vm;
        vm.install_hook(controller);
        vm.run();

        let sent = outbound.lock().unwrap();
        let methods: Vec<&str> = sent.iter().filter_map(|m| m["method"].as_str()).collect();
        assert!(methods.contains(&"paused"));
        assert!(methods.contains(&"running"));
        assert!(sent.iter().any(|m| m.get("id") == Some(&json!(1))));
    }
}
