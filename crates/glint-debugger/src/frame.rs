//! Frame Inspector (component B): wraps one activation record, exposes
//! locals/upvalues/varargs, and runs the `eval` execution protocol.

use glint_vm::{Activation, ChunkHandle, LocalRef, VmContract, VmValue};

use crate::error::Error;
use crate::value;

/// Options controlling which layers `eval` weaves into the synthesized
/// environment, and how deep results are marshalled.
#[derive(Debug, Clone, Copy)]
pub struct EvalOptions {
    pub include_globals: bool,
    pub include_upvalues: bool,
    pub include_locals: bool,
    pub depth: u32,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self { include_globals: true, include_upvalues: true, include_locals: true, depth: 1 }
    }
}

const VARARG_NAME: &str = "(*vararg)";

/// One activation record, lazily fetched and memoized so repeat queries
/// don't re-enter the VM.
pub struct FrameInspector<'vm> {
    vm: &'vm dyn VmContract,
    level: u32,
    activation: once_cell_lite::Lazy<Option<Activation>>,
}

/// A tiny one-shot memo cell — this crate doesn't pull in `once_cell` for a
/// single use site.
mod once_cell_lite {
    use std::cell::RefCell;

    pub struct Lazy<T>(RefCell<Option<T>>);

    impl<T: Clone> Lazy<T> {
        pub fn new() -> Self {
            Self(RefCell::new(None))
        }

        pub fn get_or_init(&self, f: impl FnOnce() -> T) -> T {
            if self.0.borrow().is_none() {
                *self.0.borrow_mut() = Some(f());
            }
            self.0.borrow().clone().unwrap()
        }
    }
}

impl<'vm> FrameInspector<'vm> {
    pub fn new(vm: &'vm dyn VmContract, level: u32) -> Self {
        Self { vm, level, activation: once_cell_lite::Lazy::new() }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn activation(&self) -> Result<Activation, Error> {
        self.activation
            .get_or_init(|| self.vm.activation(self.level))
            .ok_or(Error::NoSuchFrame(self.level))
    }

    /// Named locals in declaration order, skipping VM-internal names (those
    /// starting with `(`), with a synthetic vararg entry appended for
    /// variadic frames.
    pub fn locals(&self) -> Result<Vec<(String, VmValue)>, Error> {
        let activation = self.activation()?;
        let mut out = Vec::new();
        let mut index = 1u32;
        while let Some((name, value)) = self.vm.local(self.level, index) {
            if !name.starts_with('(') {
                out.push((name, value));
            }
            index += 1;
        }
        if activation.is_vararg {
            out.push((VARARG_NAME.to_string(), self.varargs_table()));
        }
        Ok(out)
    }

    /// Materializes this frame's varargs as a 1-indexed VM table.
    fn varargs_table(&self) -> VmValue {
        let varargs = self.vm.varargs(self.level);
        let table = self.vm.new_table_with_index(VmValue::Nil);
        for (i, v) in varargs.into_iter().enumerate() {
            self.vm.table_set(&table, VmValue::Int((i + 1) as i64), v);
        }
        table
    }

    pub fn upvalues(&self) -> Result<Vec<(String, VmValue)>, Error> {
        self.activation()?;
        let mut out = Vec::new();
        let mut index = 1u32;
        while let Some((name, value)) = self.vm.upvalue(self.level, index) {
            if !name.starts_with('(') {
                out.push((name, value));
            }
            index += 1;
        }
        Ok(out)
    }

    /// Scans locals by name first (matching the protocol's lookup-by-name
    /// convention), falling back to treating `name_or_index` as a 1-based
    /// index if it parses as one.
    pub fn set_local(&self, name_or_index: &str, value: VmValue) -> Result<(), Error> {
        if self.vm.set_local(self.level, LocalRef::Name(name_or_index), value.clone()) {
            return Ok(());
        }
        let set = name_or_index
            .parse::<u32>()
            .is_ok_and(|i| self.vm.set_local(self.level, LocalRef::Index(i), value));
        if set {
            Ok(())
        } else {
            Err(Error::NoSuchVariable(name_or_index.to_string()))
        }
    }

    pub fn set_upvalue(&self, name_or_index: &str, value: VmValue) -> Result<(), Error> {
        if self.vm.set_upvalue(self.level, LocalRef::Name(name_or_index), value.clone()) {
            return Ok(());
        }
        let set = name_or_index
            .parse::<u32>()
            .is_ok_and(|i| self.vm.set_upvalue(self.level, LocalRef::Index(i), value));
        if set {
            Ok(())
        } else {
            Err(Error::NoSuchVariable(name_or_index.to_string()))
        }
    }

    /// Runs the five-step `eval` protocol: expression-form compile, fall
    /// back to statement-form; synthesize the layered environment; invoke
    /// in protected mode; marshal results to JSON at `opts.depth`.
    ///
    /// Step 5 ("restore VM stack top") has no counterpart here: this
    /// contract never exposes a literal VM stack pointer across the hook
    /// boundary, so there is nothing for the core to restore.
    pub fn eval(
        &self,
        script: &str,
        opts: EvalOptions,
    ) -> Result<Vec<serde_json::Value>, Error> {
        let chunk = self.compile_expression_or_statement(script)?;
        let env = self.synthesize_environment(opts)?;
        let results =
            self.vm.call_protected(chunk, env).map_err(Error::Eval)?;
        Ok(results.iter().map(|v| value::to_json(self.vm, v, opts.depth)).collect())
    }

    fn compile_expression_or_statement(&self, script: &str) -> Result<ChunkHandle, Error> {
        let as_expr = format!("return {script}");
        self.vm.compile(&as_expr).or_else(|_| self.vm.compile(script)).map_err(Error::Compile)
    }

    fn synthesize_environment(&self, opts: EvalOptions) -> Result<VmValue, Error> {
        let activation = self.activation()?;
        let env = self.vm.new_table_with_index(VmValue::Nil);

        if opts.include_globals {
            self.vm.set_index_metafield(&env, self.vm.globals());
        }

        if opts.include_upvalues {
            let mut index = 1u32;
            while let Some((name, v)) = self.vm.upvalue(self.level, index) {
                if name == "_ENV" {
                    self.vm.set_index_metafield(&env, v.clone());
                }
                self.vm.table_set(&env, VmValue::Str(name), v);
                index += 1;
            }
        }

        if opts.include_locals {
            let mut index = 1u32;
            while let Some((name, v)) = self.vm.local(self.level, index) {
                if name == "_ENV" {
                    self.vm.set_index_metafield(&env, v.clone());
                }
                self.vm.table_set(&env, VmValue::Str(name), v);
                index += 1;
            }
        }

        if activation.is_vararg {
            self.vm.table_set(&env, VmValue::Str(VARARG_NAME.to_string()), self.varargs_table());
        }

        Ok(env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glint_vm::demo::{Expr, FunctionDef, Program, Stmt};
    use glint_vm::DemoVm;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn paused_at_line3() -> Program {
        let mut functions = HashMap::new();
        functions.insert(
            "noop".into(),
            FunctionDef { name: "noop".into(), ..Default::default() },
        );
        Program {
            source_path: "t.demo".into(),
            main: vec![
                (1, Stmt::Let("a".into(), Expr::Int(1))),
                (2, Stmt::Let("b".into(), Expr::Int(2))),
                (3, Stmt::Print(Expr::Var("a".into()))),
            ],
            functions,
        }
    }

    #[test]
    fn locals_skip_internal_names_and_keep_order() {
        let vm = DemoVm::new(paused_at_line3());
        struct Check;
        impl glint_vm::HookSink for Check {
            fn on_hook(&self, vm: &dyn VmContract, event: glint_vm::HookEvent) {
                if event == glint_vm::HookEvent::Line(3) {
                    let inspector = FrameInspector::new(vm, 0);
                    let locals = inspector.locals().unwrap();
                    assert_eq!(locals[0].0, "a");
                    assert_eq!(locals[1].0, "b");
                }
            }
        }
        let mut vm = vm;
        vm.install_hook(std::sync::Arc::new(Check));
        vm.run();
    }

    #[test]
    fn eval_reads_locals_and_globals_through_synthesized_env() {
        let vm = DemoVm::new(paused_at_line3());
        struct Check;
        impl glint_vm::HookSink for Check {
            fn on_hook(&self, vm: &dyn VmContract, event: glint_vm::HookEvent) {
                if event == glint_vm::HookEvent::Line(3) {
                    let inspector = FrameInspector::new(vm, 0);
                    let result = inspector.eval("a + b", EvalOptions::default()).unwrap();
                    assert_eq!(result, vec![serde_json::json!(3)]);
                }
            }
        }
        let mut vm = vm;
        vm.install_hook(std::sync::Arc::new(Check));
        vm.run();
    }

    #[test]
    fn eval_falls_back_to_statement_form_on_expression_compile_failure() {
        let vm = DemoVm::new(paused_at_line3());
        struct Check;
        impl glint_vm::HookSink for Check {
            fn on_hook(&self, vm: &dyn VmContract, event: glint_vm::HookEvent) {
                if event == glint_vm::HookEvent::Line(3) {
                    let inspector = FrameInspector::new(vm, 0);
                    let result = inspector.eval("return a", EvalOptions::default()).unwrap();
                    assert_eq!(result, vec![serde_json::json!(1)]);
                }
            }
        }
        let mut vm = vm;
        vm.install_hook(std::sync::Arc::new(Check));
        vm.run();
    }

    #[test]
    fn unknown_frame_level_is_no_such_frame() {
        let vm = DemoVm::new(paused_at_line3());
        struct Check;
        impl glint_vm::HookSink for Check {
            fn on_hook(&self, vm: &dyn VmContract, event: glint_vm::HookEvent) {
                if event == glint_vm::HookEvent::Line(3) {
                    let inspector = FrameInspector::new(vm, 9);
                    assert!(matches!(inspector.activation(), Err(Error::NoSuchFrame(9))));
                }
            }
        }
        let mut vm = vm;
        vm.install_hook(std::sync::Arc::new(Check));
        vm.run();
    }
}
