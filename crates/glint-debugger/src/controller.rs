//! Execution Controller (component D): turns VM hook events into pause
//! decisions, owns the step-mode state machine and the breakpoint table.
//!
//! The controller never holds a reference back to the server loop — the
//! cycle (controller calls out to pause; the pause loop calls back in to
//! dispatch commands against the controller) is broken by taking the tick
//! and pause behaviors as injected strategies instead.

use std::sync::Mutex;

use glint_vm::{HookEvent, HookSink, VmContract};
use parking_lot::RwLock;

use crate::breakpoint::{hit_condition_expr, BreakpointDescriptor, BreakpointId, BreakpointTable};
use crate::frame::{EvalOptions, FrameInspector};
use crate::state::{DebuggerState, PauseReason, StepMode};

/// Runs on every hook event, line or not — this is how the Server Loop gets
/// a chance to poll its transport without blocking the VM.
pub trait TickPump: Send + Sync {
    fn tick(&self, vm: &dyn VmContract);
}

/// Runs once per pause: sends the `paused` notification, then drives the
/// blocking read-dispatch loop until resumed, then sends `running`.
pub trait PausePump: Send + Sync {
    fn run(&self, vm: &dyn VmContract, reason: PauseReason);
}

pub struct ExecutionController {
    state: RwLock<DebuggerState>,
    breakpoints: Mutex<BreakpointTable>,
    tick: Box<dyn TickPump>,
    pause: Box<dyn PausePump>,
}

impl ExecutionController {
    pub fn new(tick: Box<dyn TickPump>, pause: Box<dyn PausePump>) -> Self {
        Self { state: RwLock::new(DebuggerState::default()), breakpoints: Mutex::new(BreakpointTable::new()), tick, pause }
    }

    pub fn set_working_dir(&self, dir: Option<std::path::PathBuf>) {
        self.breakpoints.lock().unwrap().working_dir = dir.clone();
        self.state.write().working_dir = dir;
    }

    pub fn is_paused(&self) -> bool {
        self.state.read().paused
    }

    pub fn add_breakpoint(
        &self,
        file: &str,
        line: u32,
        condition: Option<String>,
        hit_condition: Option<String>,
    ) -> BreakpointId {
        self.breakpoints.lock().unwrap().insert(file, line, condition, hit_condition)
    }

    pub fn clear_breakpoints(&self, file: Option<&str>, line: Option<u32>) {
        self.breakpoints.lock().unwrap().clear(file, line);
    }

    pub fn list_breakpoints(&self) -> Vec<BreakpointDescriptor> {
        self.breakpoints.lock().unwrap().list_all().to_vec()
    }

    /// `None`/`Over`/`In`/`Out` step requests: records the call-stack depth
    /// at request time so the hook action's depth comparisons are relative
    /// to this call frame.
    pub fn request_step(&self, vm: &dyn VmContract, mode: StepMode) {
        let depth = vm.call_stack_depth();
        let mut state = self.state.write();
        state.step_mode = mode;
        state.step_callstack_depth = depth;
        state.paused = false;
        state.current_breakpoint = None;
    }

    pub fn pause_request(&self) {
        self.state.write().step_mode = StepMode::Pause;
    }

    pub fn continue_exec(&self) {
        let mut state = self.state.write();
        state.step_mode = StepMode::None;
        state.paused = false;
        state.current_breakpoint = None;
    }

    fn step_predicate_fires(&self, mode: StepMode, recorded_depth: usize, current_depth: usize) -> bool {
        match mode {
            StepMode::None => false,
            StepMode::Over => current_depth <= recorded_depth,
            StepMode::In | StepMode::Entry => true,
            StepMode::Out => current_depth < recorded_depth,
            StepMode::Pause => true,
        }
    }

    fn evaluate_predicate(&self, vm: &dyn VmContract, script: &str) -> bool {
        FrameInspector::new(vm, 0)
            .eval(script, EvalOptions { depth: 1, ..EvalOptions::default() })
            .ok()
            .and_then(|results| results.into_iter().next())
            .is_some_and(|v| !matches!(v, serde_json::Value::Null | serde_json::Value::Bool(false)))
    }

    fn run_breakpoint_check(&self, vm: &dyn VmContract, line: u32) {
        let source_path = match FrameInspector::new(vm, 0).activation() {
            Ok(a) => a.source_path,
            Err(_) => return,
        };

        let index = {
            let breakpoints = self.breakpoints.lock().unwrap();
            breakpoints.find_index(&source_path, line)
        };
        let Some(index) = index else { return };

        let condition = self.breakpoints.lock().unwrap().get(index).and_then(|bp| bp.condition.clone());
        if let Some(cond) = condition {
            if !self.evaluate_predicate(vm, &cond) {
                return;
            }
        }

        let hit_count = self.breakpoints.lock().unwrap().record_hit(index);
        let hit_condition = self
            .breakpoints
            .lock()
            .unwrap()
            .get(index)
            .and_then(|bp| bp.hit_condition.clone())
            .unwrap_or_else(|| ">=1".to_string());
        let predicate = hit_condition_expr(hit_count, &hit_condition);
        if self.evaluate_predicate(vm, &predicate) {
            let mut state = self.state.write();
            state.paused = true;
            state.current_breakpoint = Some(index);
        }
    }

    /// The reason to report on the `paused` notification for the state the
    /// controller is in right now.
    fn pause_reason(&self, state: &DebuggerState) -> PauseReason {
        if state.current_breakpoint.is_some() {
            PauseReason::Breakpoint
        } else {
            PauseReason::from_step_mode(state.step_mode)
        }
    }
}

impl HookSink for ExecutionController {
    fn on_hook(&self, vm: &dyn VmContract, event: HookEvent) {
        self.state.write().current_breakpoint = None;

        self.tick.tick(vm);

        let HookEvent::Line(line) = event else { return };

        let (mode, recorded_depth) = {
            let state = self.state.read();
            (state.step_mode, state.step_callstack_depth)
        };
        if mode != StepMode::None {
            let current_depth = vm.call_stack_depth();
            if self.step_predicate_fires(mode, recorded_depth, current_depth) {
                self.state.write().paused = true;
            }
        }

        self.run_breakpoint_check(vm, line);

        let should_pause = self.state.read().paused;
        if should_pause {
            let reason = self.pause_reason(&self.state.read());
            self.pause.run(vm, reason);
            if self.state.read().step_mode == StepMode::None {
                self.state.write().paused = false;
            }
        }
    }
}
