//! A tiny in-process scripting engine implementing [`VmContract`].
//!
//! Not a language — just enough of one (locals, globals, upvalues, nested
//! calls, a handful of expression operators) to drive the end-to-end
//! debugger scenarios and the CLI's demo mode without depending on an
//! external embedder.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::contract::{
    Activation, ActivationKind, ChunkHandle, Handle, HookEvent, HookSink, LocalRef, VmContract,
    VmIdentity, VmValue,
};

pub mod expr;
pub use expr::{BinOp, Expr, ParseError, UnOp};

/// One statement line in a demo program.
#[derive(Debug, Clone)]
pub enum Stmt {
    Let(String, Expr),
    Assign(String, Expr),
    ExprStmt(Expr),
    Return(Option<Expr>),
    Print(Expr),
}

/// A user-defined function: parameters, body lines, and the upvalues it
/// closes over (captured by value at definition time, for demo purposes).
#[derive(Debug, Clone, Default)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub is_vararg: bool,
    pub body: Vec<(u32, Stmt)>,
    pub upvalues: Vec<(String, VmValue)>,
    pub line_defined: u32,
    pub last_line_defined: u32,
}

/// A whole demo program: top-level statements plus named functions.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub source_path: String,
    pub main: Vec<(u32, Stmt)>,
    pub functions: HashMap<String, FunctionDef>,
}

#[derive(Debug, Clone)]
struct TableData {
    entries: Vec<(VmValue, VmValue)>,
    index_parent: Option<VmValue>,
    name: Option<String>,
}

struct ActiveFrame {
    name: String,
    kind: ActivationKind,
    source_path: String,
    line_defined: u32,
    last_line_defined: u32,
    is_vararg: bool,
    n_params: u32,
    current_line: u32,
    locals: Vec<(String, VmValue)>,
    upvalues: Vec<(String, VmValue)>,
    varargs: Vec<VmValue>,
}

/// The output side of `print` — tests and the CLI observe it instead of
/// writing to stdout directly.
pub type OutputSink = Box<dyn Fn(&str) + Send>;

/// The reference VM. Owns the program, the call stack, and VM-side table
/// storage; exposes [`VmContract`] over all of it via interior mutability so
/// evaluation can run while only holding `&self` (the shape real embedded
/// VMs present, since their handle is just a pointer).
pub struct DemoVm {
    program: Program,
    stack: RefCell<Vec<ActiveFrame>>,
    tables: RefCell<HashMap<u64, TableData>>,
    next_handle: RefCell<u64>,
    chunks: RefCell<HashMap<u64, Expr>>,
    next_chunk: RefCell<u64>,
    registry: RefCell<HashMap<&'static str, VmValue>>,
    hook: RefCell<Option<Arc<dyn HookSink>>>,
    out: Option<OutputSink>,
    args: Vec<String>,
}

impl DemoVm {
    pub fn new(program: Program) -> Self {
        let mut vm = Self {
            program,
            stack: RefCell::new(Vec::new()),
            tables: RefCell::new(HashMap::new()),
            next_handle: RefCell::new(1),
            chunks: RefCell::new(HashMap::new()),
            next_chunk: RefCell::new(1),
            registry: RefCell::new(HashMap::new()),
            hook: RefCell::new(None),
            out: None,
            args: Vec::new(),
        };
        let globals_handle = vm.alloc_table(None, None);
        vm.registry.borrow_mut().insert("globals", globals_handle);
        vm
    }

    pub fn with_output(mut self, sink: OutputSink) -> Self {
        self.out = Some(sink);
        self
    }

    /// Forwarded to `main`'s varargs, the way a script's own `...` would see
    /// process-level arguments in an embedding VM.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    fn alloc_table(&self, index_parent: Option<VmValue>, name: Option<String>) -> VmValue {
        let mut next = self.next_handle.borrow_mut();
        let id = *next;
        *next += 1;
        self.tables.borrow_mut().insert(id, TableData { entries: Vec::new(), index_parent, name });
        VmValue::Table(Handle(id))
    }

    fn table_get_own(&self, handle: u64, key: &VmValue) -> Option<VmValue> {
        self.tables.borrow().get(&handle).and_then(|t| {
            t.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        })
    }

    /// `__index` chain lookup, as the synthesized evaluation environment
    /// relies on.
    fn table_get_chained(&self, value: &VmValue, key: &VmValue) -> Option<VmValue> {
        let VmValue::Table(Handle(id)) = value else { return None };
        if let Some(v) = self.table_get_own(*id, key) {
            return Some(v);
        }
        let parent = self.tables.borrow().get(id).and_then(|t| t.index_parent.clone());
        parent.and_then(|p| self.table_get_chained(&p, key))
    }

    /// Runs the whole program to completion, firing hook events as it goes.
    /// The hook's pause callback may block the calling thread indefinitely;
    /// that is the point — it is how the pause pump suspends VM execution.
    pub fn run(&self) {
        let main = self.program.main.clone();
        self.push_frame(ActiveFrame {
            name: "main".into(),
            kind: ActivationKind::Global,
            source_path: format!("@{}", self.program.source_path),
            line_defined: 0,
            last_line_defined: main.last().map_or(0, |(l, _)| *l),
            is_vararg: false,
            n_params: 0,
            current_line: 0,
            locals: Vec::new(),
            upvalues: Vec::new(),
            varargs: self.args.iter().cloned().map(VmValue::Str).collect(),
        });
        let _ = self.exec_block(&main);
        self.pop_frame();
    }

    fn push_frame(&self, frame: ActiveFrame) {
        self.stack.borrow_mut().push(frame);
    }

    fn pop_frame(&self) {
        self.stack.borrow_mut().pop();
    }

    fn fire(&self, event: HookEvent) {
        if let Some(sink) = self.hook.borrow().clone() {
            sink.on_hook(self, event);
        }
    }

    /// Returns `Some(value)` on an executed `return`.
    fn exec_block(&self, body: &[(u32, Stmt)]) -> Option<VmValue> {
        for (line, stmt) in body {
            {
                let mut stack = self.stack.borrow_mut();
                if let Some(top) = stack.last_mut() {
                    top.current_line = *line;
                }
            }
            self.fire(HookEvent::Line(*line));
            match stmt {
                Stmt::Let(name, expr) => {
                    let v = self.eval_in_frame(expr);
                    self.stack.borrow_mut().last_mut().unwrap().locals.push((name.clone(), v));
                },
                Stmt::Assign(name, expr) => {
                    let v = self.eval_in_frame(expr);
                    let mut stack = self.stack.borrow_mut();
                    let top = stack.last_mut().unwrap();
                    if let Some(slot) = top.locals.iter_mut().find(|(n, _)| n == name) {
                        slot.1 = v;
                    } else {
                        drop(stack);
                        self.table_set(&self.globals(), VmValue::Str(name.clone()), v);
                    }
                },
                Stmt::ExprStmt(expr) => {
                    let _ = self.eval_in_frame(expr);
                },
                Stmt::Print(expr) => {
                    let v = self.eval_in_frame(expr);
                    if let Some(out) = &self.out {
                        out(&display_value(&v));
                    }
                },
                Stmt::Return(expr) => {
                    return Some(expr.as_ref().map_or(VmValue::Nil, |e| self.eval_in_frame(e)));
                },
            }
        }
        None
    }

    fn eval_in_frame(&self, expr: &Expr) -> VmValue {
        let env = EnvView::Frame(self);
        expr::eval(expr, &env).unwrap_or(VmValue::Nil)
    }

    fn call_user_function(&self, name: &str, args: Vec<VmValue>) -> Result<VmValue, String> {
        let def = self
            .program
            .functions
            .get(name)
            .ok_or_else(|| format!("attempt to call a nil value (global '{name}')"))?
            .clone();
        self.fire(HookEvent::Call);
        let mut locals: Vec<(String, VmValue)> = def
            .params
            .iter()
            .cloned()
            .zip(args.iter().cloned().chain(std::iter::repeat(VmValue::Nil)))
            .collect();
        let varargs = if def.is_vararg && args.len() > def.params.len() {
            args[def.params.len()..].to_vec()
        } else {
            Vec::new()
        };
        if locals.len() > def.params.len() {
            locals.truncate(def.params.len());
        }
        self.push_frame(ActiveFrame {
            name: def.name.clone(),
            kind: ActivationKind::Global,
            source_path: format!("@{}", self.program.source_path),
            line_defined: def.line_defined,
            last_line_defined: def.last_line_defined,
            is_vararg: def.is_vararg,
            n_params: def.params.len() as u32,
            current_line: def.line_defined,
            locals,
            upvalues: def.upvalues.clone(),
            varargs,
        });
        let result = self.exec_block(&def.body).unwrap_or(VmValue::Nil);
        self.pop_frame();
        self.fire(HookEvent::Return);
        Ok(result)
    }

    fn table_by_handle(&self, handle: u64) -> Option<TableData> {
        self.tables.borrow().get(&handle).cloned()
    }
}

/// Binds an [`Expr`] evaluator to either the live call stack (statement
/// execution) or to a synthesized environment table (the Frame Inspector's
/// `eval`).
pub(crate) enum EnvView<'a> {
    Frame(&'a DemoVm),
    Table(&'a DemoVm, VmValue),
}

impl expr::EvalEnv for EnvView<'_> {
    fn lookup(&self, name: &str) -> Option<VmValue> {
        match self {
            EnvView::Frame(vm) => {
                let stack = vm.stack.borrow();
                let top = stack.last()?;
                if let Some((_, v)) = top.locals.iter().rev().find(|(n, _)| n == name) {
                    return Some(v.clone());
                }
                if let Some((_, v)) = top.upvalues.iter().find(|(n, _)| n == name) {
                    return Some(v.clone());
                }
                drop(stack);
                vm.table_get_chained(&vm.globals(), &VmValue::Str(name.to_string()))
            },
            EnvView::Table(vm, env) => vm.table_get_chained(env, &VmValue::Str(name.to_string())),
        }
    }

    fn call(&self, name: &str, args: Vec<VmValue>) -> Result<VmValue, String> {
        match name {
            "len" => Ok(VmValue::Int(args.first().map_or(0, |v| match v {
                VmValue::Str(s) => s.len() as i64,
                _ => 0,
            }))),
            other => match self {
                EnvView::Frame(vm) => vm.call_user_function(other, args),
                EnvView::Table(vm, _) => vm.call_user_function(other, args),
            },
        }
    }

    fn set(&self, name: &str, value: VmValue) {
        // Writes from an evaluated chunk land in the synthesized
        // environment only; they never escape into real locals/upvalues.
        if let EnvView::Table(vm, env) = self {
            vm.table_set(env, VmValue::Str(name.to_string()), value);
        }
    }
}

fn display_value(v: &VmValue) -> String {
    match v {
        VmValue::Nil => "nil".into(),
        VmValue::Bool(b) => b.to_string(),
        VmValue::Int(i) => i.to_string(),
        VmValue::Float(f) => f.to_string(),
        VmValue::Str(s) => s.clone(),
        VmValue::Table(h) => format!("table: 0x{:016x}", h.0),
        VmValue::Function(h) => format!("function: 0x{:016x}", h.0),
        VmValue::Thread(h) => format!("thread: 0x{:016x}", h.0),
        VmValue::UserData(h) => format!("userdata: 0x{:016x}", h.0),
        VmValue::LightUserData(a) => format!("0x{a:016x}"),
    }
}

impl VmContract for DemoVm {
    fn install_hook(&mut self, sink: Arc<dyn HookSink>) {
        *self.hook.borrow_mut() = Some(sink);
    }

    fn remove_hook(&mut self) {
        *self.hook.borrow_mut() = None;
    }

    fn call_stack_depth(&self) -> usize {
        self.stack.borrow().len()
    }

    fn activation(&self, level: u32) -> Option<Activation> {
        let stack = self.stack.borrow();
        let ix = stack.len().checked_sub(1)?.checked_sub(level as usize)?;
        let f = stack.get(ix)?;
        Some(Activation {
            name: f.name.clone(),
            kind: f.kind,
            source_path: f.source_path.clone(),
            current_line: f.current_line,
            line_defined: f.line_defined,
            last_line_defined: f.last_line_defined,
            short_source: f.source_path.trim_start_matches('@').to_string(),
            n_upvalues: f.upvalues.len() as u32,
            n_params: f.n_params,
            is_vararg: f.is_vararg,
            is_tailcall: false,
        })
    }

    fn local(&self, level: u32, index: u32) -> Option<(String, VmValue)> {
        let stack = self.stack.borrow();
        let ix = stack.len().checked_sub(1)?.checked_sub(level as usize)?;
        let f = stack.get(ix)?;
        f.locals.get(index.checked_sub(1)? as usize).cloned()
    }

    fn set_local(&self, level: u32, index_or_name: LocalRef<'_>, value: VmValue) -> bool {
        let mut stack = self.stack.borrow_mut();
        let Some(ix) = stack.len().checked_sub(1).and_then(|t| t.checked_sub(level as usize))
        else {
            return false;
        };
        let Some(f) = stack.get_mut(ix) else { return false };
        match index_or_name {
            LocalRef::Index(i) => {
                let Some(slot) = i.checked_sub(1).and_then(|i| f.locals.get_mut(i as usize))
                else {
                    return false;
                };
                slot.1 = value;
                true
            },
            LocalRef::Name(name) => {
                let Some(slot) = f.locals.iter_mut().find(|(n, _)| n == name) else {
                    return false;
                };
                slot.1 = value;
                true
            },
        }
    }

    fn upvalue(&self, level: u32, index: u32) -> Option<(String, VmValue)> {
        let stack = self.stack.borrow();
        let ix = stack.len().checked_sub(1)?.checked_sub(level as usize)?;
        let f = stack.get(ix)?;
        f.upvalues.get(index.checked_sub(1)? as usize).cloned()
    }

    fn set_upvalue(&self, level: u32, index_or_name: LocalRef<'_>, value: VmValue) -> bool {
        let mut stack = self.stack.borrow_mut();
        let Some(ix) = stack.len().checked_sub(1).and_then(|t| t.checked_sub(level as usize))
        else {
            return false;
        };
        let Some(f) = stack.get_mut(ix) else { return false };
        match index_or_name {
            LocalRef::Index(i) => {
                let Some(slot) = i.checked_sub(1).and_then(|i| f.upvalues.get_mut(i as usize))
                else {
                    return false;
                };
                slot.1 = value;
                true
            },
            LocalRef::Name(name) => {
                let Some(slot) = f.upvalues.iter_mut().find(|(n, _)| n == name) else {
                    return false;
                };
                slot.1 = value;
                true
            },
        }
    }

    fn varargs(&self, level: u32) -> Vec<VmValue> {
        let stack = self.stack.borrow();
        stack
            .len()
            .checked_sub(1)
            .and_then(|t| t.checked_sub(level as usize))
            .and_then(|ix| stack.get(ix))
            .map_or_else(Vec::new, |f| f.varargs.clone())
    }

    fn globals(&self) -> VmValue {
        self.registry.borrow().get("globals").cloned().expect("globals installed at construction")
    }

    fn compile(&self, source: &str) -> Result<ChunkHandle, String> {
        let expr = expr::parse(source).map_err(|e| e.to_string())?;
        let mut next = self.next_chunk.borrow_mut();
        let id = *next;
        *next += 1;
        self.chunks.borrow_mut().insert(id, expr);
        Ok(ChunkHandle(id))
    }

    fn call_protected(&self, chunk: ChunkHandle, env: VmValue) -> Result<Vec<VmValue>, String> {
        let expr: Expr = self.chunks.borrow().get(&chunk.0).cloned().ok_or("stale chunk handle")?;
        let view = EnvView::Table(self, env);
        expr::eval(&expr, &view).map(|v| vec![v])
    }

    fn table_len(&self, value: &VmValue) -> Option<usize> {
        let VmValue::Table(Handle(id)) = value else { return None };
        let t = self.table_by_handle(*id)?;
        let mut n = 0usize;
        loop {
            let key = VmValue::Int((n + 1) as i64);
            if t.entries.iter().any(|(k, _)| *k == key) {
                n += 1;
            } else {
                break;
            }
        }
        Some(n)
    }

    fn table_iter(&self, value: &VmValue) -> Vec<(VmValue, VmValue)> {
        let VmValue::Table(Handle(id)) = value else { return Vec::new() };
        self.table_by_handle(*id).map_or_else(Vec::new, |t| t.entries)
    }

    fn new_table_with_index(&self, parent: VmValue) -> VmValue {
        self.alloc_table(Some(parent), None)
    }

    fn table_set(&self, table: &VmValue, key: VmValue, value: VmValue) {
        let VmValue::Table(Handle(id)) = table else { return };
        let mut tables = self.tables.borrow_mut();
        let Some(t) = tables.get_mut(id) else { return };
        if let Some(slot) = t.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            t.entries.push((key, value));
        }
    }

    fn set_index_metafield(&self, table: &VmValue, parent: VmValue) {
        let VmValue::Table(Handle(id)) = table else { return };
        if let Some(t) = self.tables.borrow_mut().get_mut(id) {
            t.index_parent = Some(parent);
        }
    }

    fn meta_name(&self, value: &VmValue) -> Option<String> {
        let VmValue::Table(Handle(id)) = value else { return None };
        self.table_by_handle(*id).and_then(|t| t.name)
    }

    fn meta_to_string(&self, _value: &VmValue) -> Option<String> {
        None
    }

    fn meta_to_table(&self, _value: &VmValue) -> Option<VmValue> {
        None
    }

    fn type_name(&self, value: &VmValue) -> &'static str {
        match value {
            VmValue::Nil => "nil",
            VmValue::Bool(_) => "boolean",
            VmValue::Int(_) | VmValue::Float(_) => "number",
            VmValue::Str(_) => "string",
            VmValue::Table(_) => "table",
            VmValue::Function(_) => "function",
            VmValue::Thread(_) => "thread",
            VmValue::UserData(_) | VmValue::LightUserData(_) => "userdata",
        }
    }

    fn registry_set(&self, key: &'static str, value: VmValue) {
        self.registry.borrow_mut().insert(key, value);
    }

    fn registry_get(&self, key: &'static str) -> Option<VmValue> {
        self.registry.borrow().get(key).cloned()
    }

    fn version(&self) -> VmIdentity {
        VmIdentity {
            version: "demo-vm 0.1".into(),
            release: "demo-vm 0.1.0".into(),
            copyright: "reference VM for debugger core testing".into(),
        }
    }
}
