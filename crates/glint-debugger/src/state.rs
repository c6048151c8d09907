//! Debugger session state: the step-mode machine and why a pause happened.

/// What the Execution Controller is doing with line events right now.
/// Starts as [`StepMode::Entry`]: the very first line event pauses
/// unconditionally, mirroring `entry` behaving like `in` at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepMode {
    None,
    Over,
    In,
    Out,
    Pause,
    #[default]
    Entry,
}

/// Why the VM is currently paused, reported verbatim on the `paused`
/// notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    Breakpoint,
    Step,
    StepIn,
    StepOut,
    Pause,
    Entry,
    /// Reserved; the controller never produces this today.
    Exception,
}

impl PauseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Breakpoint => "breakpoint",
            Self::Step => "step",
            Self::StepIn => "step_in",
            Self::StepOut => "step_out",
            Self::Pause => "pause",
            Self::Entry => "entry",
            Self::Exception => "exception",
        }
    }

    /// The reason implied by the current step mode, for when no breakpoint
    /// fired — `StepMode::None`/`StepMode::Pause` via an explicit `pause()`
    /// request resolve outside this mapping (see the controller).
    pub fn from_step_mode(mode: StepMode) -> Self {
        match mode {
            StepMode::Over => Self::Step,
            StepMode::In => Self::StepIn,
            StepMode::Out => Self::StepOut,
            StepMode::Pause => Self::Pause,
            StepMode::Entry | StepMode::None => Self::Entry,
        }
    }
}

/// Session-wide debugger state, mutated only on the VM thread.
#[derive(Debug, Clone)]
pub struct DebuggerState {
    pub paused: bool,
    pub step_mode: StepMode,
    /// Call-stack depth recorded at the moment a step was requested.
    pub step_callstack_depth: usize,
    /// Index into the breakpoint table of whichever descriptor caused the
    /// current pause, if any.
    pub current_breakpoint: Option<usize>,
    pub working_dir: Option<std::path::PathBuf>,
}

impl Default for DebuggerState {
    fn default() -> Self {
        Self {
            paused: false,
            step_mode: StepMode::Entry,
            step_callstack_depth: 0,
            current_breakpoint: None,
            working_dir: None,
        }
    }
}
