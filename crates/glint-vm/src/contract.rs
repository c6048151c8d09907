//! The interface the debugger core requires from a host VM.
//!
//! A conforming VM gives the core: a hook it can install to be called on
//! every executed line and on function call/return; a way to reflect on the
//! current activation record; indexed enumeration and mutation of locals and
//! upvalues; a script-compile-and-protected-call primitive with multi-return;
//! table iteration and length; and a small keyed registry so the core can
//! find itself again from inside the hook.

use std::sync::Arc;

/// One VM value as seen across the hook boundary.
///
/// Aggregates (tables, functions, threads, userdata) are opaque handles —
/// the VM owns their storage; the core never holds a raw VM pointer across a
/// hook call, only this handle.
#[derive(Debug, Clone, PartialEq)]
pub enum VmValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Table(Handle),
    Function(Handle),
    Thread(Handle),
    UserData(Handle),
    LightUserData(u64),
}

/// An opaque handle to a VM-owned aggregate. `id` is stable for the lifetime
/// of the value and doubles as the identity token used for opaque
/// placeholders during marshalling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u64);

/// A compiled, not-yet-run chunk returned by [`VmContract::compile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkHandle(pub u64);

/// Why the hook fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    Line(u32),
    Call,
    TailCall,
    Return,
}

/// What kind of name the VM attaches to an activation's function, mirroring
/// what a typical `getinfo`-style facility reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    Local,
    Global,
    Method,
    Upvalue,
    Unknown,
}

/// A snapshot of one call-stack entry, valid only between hook entry and
/// hook return — callers must materialize anything they need before
/// unwinding.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub name: String,
    pub kind: ActivationKind,
    /// As the VM reports it: `@`-prefixed for file-loaded chunks, bare for
    /// string-loaded ones.
    pub source_path: String,
    pub current_line: u32,
    pub line_defined: u32,
    pub last_line_defined: u32,
    pub short_source: String,
    pub n_upvalues: u32,
    pub n_params: u32,
    pub is_vararg: bool,
    pub is_tailcall: bool,
}

/// Things that can go wrong calling into the VM from the core.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VmError {
    #[error("compile error: {0}")]
    Compile(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("stack level out of range: {0}")]
    NoSuchFrame(u32),
}

/// Implemented by the debugger core, installed into the VM via
/// [`VmContract::install_hook`]. Called synchronously on the VM's own
/// execution thread; the VM does not proceed past the call until it returns.
pub trait HookSink: Send + Sync {
    fn on_hook(&self, vm: &dyn VmContract, event: HookEvent);
}

/// The contract a host VM implements so the debugger core can attach to it.
///
/// All methods operate on the calling (VM) thread. `level` is 0-based, 0
/// being the currently executing frame.
pub trait VmContract: Send {
    fn install_hook(&mut self, sink: Arc<dyn HookSink>);
    fn remove_hook(&mut self);

    fn call_stack_depth(&self) -> usize;
    fn activation(&self, level: u32) -> Option<Activation>;

    /// 1-based index; returns `None` once the VM says there is no such
    /// local/upvalue, matching the enumerate-until-`None` pattern locals and
    /// upvalues are walked with.
    fn local(&self, level: u32, index: u32) -> Option<(String, VmValue)>;
    fn set_local(&self, level: u32, index_or_name: LocalRef<'_>, value: VmValue) -> bool;
    fn upvalue(&self, level: u32, index: u32) -> Option<(String, VmValue)>;
    fn set_upvalue(&self, level: u32, index_or_name: LocalRef<'_>, value: VmValue) -> bool;
    fn varargs(&self, level: u32) -> Vec<VmValue>;

    fn globals(&self) -> VmValue;

    /// Compile `source` as a standalone chunk (no binding yet).
    fn compile(&self, source: &str) -> Result<ChunkHandle, String>;
    /// Run a compiled chunk with `env` bound as its environment, in
    /// protected mode, returning all results.
    fn call_protected(&self, chunk: ChunkHandle, env: VmValue) -> Result<Vec<VmValue>, String>;

    /// `None` for non-sequence aggregates (object-shaped tables).
    fn table_len(&self, value: &VmValue) -> Option<usize>;
    /// Materializes the full key/value set in one call — the core never
    /// holds a live VM iterator across the hook boundary.
    fn table_iter(&self, value: &VmValue) -> Vec<(VmValue, VmValue)>;
    /// A fresh table with a metatable whose `__index` chains to `parent`.
    fn new_table_with_index(&self, parent: VmValue) -> VmValue;
    fn table_set(&self, table: &VmValue, key: VmValue, value: VmValue);
    fn set_index_metafield(&self, table: &VmValue, parent: VmValue);

    /// `__name` metafield, if the value carries one.
    fn meta_name(&self, value: &VmValue) -> Option<String>;
    fn meta_to_string(&self, value: &VmValue) -> Option<String>;
    fn meta_to_table(&self, value: &VmValue) -> Option<VmValue>;

    fn type_name(&self, value: &VmValue) -> &'static str;

    fn registry_set(&self, key: &'static str, value: VmValue);
    fn registry_get(&self, key: &'static str) -> Option<VmValue>;

    fn version(&self) -> VmIdentity;
}

/// Lookup-by-name or lookup-by-index, as `set_local`/`set_upvalue` accept
/// either (the Frame Inspector scans by name first).
#[derive(Debug, Clone, Copy)]
pub enum LocalRef<'a> {
    Index(u32),
    Name(&'a str),
}

/// The VM's own build identity, reported in the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmIdentity {
    pub version: String,
    pub release: String,
    pub copyright: String,
}
