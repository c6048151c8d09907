//! Loads the CLI launcher's positional script path into a [`Program`].
//!
//! The reference VM's statement language is deliberately tiny (`let`,
//! assignment, `print`, `return`, and a one-level `fn ... end` block) — just
//! enough for the debugger scenarios and the launcher's demo mode. There is
//! no control flow; that is a property of the reference VM, not a limit this
//! loader imposes.

use std::fmt;

use glint_vm::demo::expr;
use glint_vm::demo::{Expr, FunctionDef, Program, Stmt};

#[derive(Debug)]
pub struct ScriptError(pub String);

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ScriptError {}

/// Parses `source` (as read from `source_path`) into a [`Program`].
pub fn parse_program(source: &str, source_path: &str) -> Result<Program, ScriptError> {
    let lines: Vec<(u32, &str)> =
        source.lines().enumerate().map(|(i, l)| (i as u32 + 1, strip_comment(l))).collect();

    let mut main = Vec::new();
    let mut functions = std::collections::HashMap::new();
    let mut i = 0;
    while i < lines.len() {
        let (lineno, raw) = lines[i];
        let line = raw.trim();
        if line.is_empty() {
            i += 1;
            continue;
        }
        if let Some(header) = line.strip_prefix("fn ") {
            let (def, consumed) = parse_function(header, lineno, &lines[i + 1..])?;
            functions.insert(def.name.clone(), def);
            i += 1 + consumed;
            continue;
        }
        main.push((lineno, parse_stmt(line)?));
        i += 1;
    }

    Ok(Program { source_path: source_path.to_string(), main, functions })
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(i) => &line[..i],
        None => line,
    }
}

/// `header` is the text after `fn `, e.g. `add(a, b):`. Returns the parsed
/// definition and how many lines of `rest` (the `end` line included) it
/// consumed.
fn parse_function(
    header: &str,
    line_defined: u32,
    rest: &[(u32, &str)],
) -> Result<(FunctionDef, usize), ScriptError> {
    let header = header.trim().strip_suffix(':').unwrap_or(header.trim());
    let open = header.find('(').ok_or_else(|| ScriptError(format!("malformed fn header: {header}")))?;
    let close = header.find(')').ok_or_else(|| ScriptError(format!("malformed fn header: {header}")))?;
    let name = header[..open].trim().to_string();
    let mut params: Vec<String> =
        header[open + 1..close].split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect();
    let is_vararg = params.last().map(String::as_str) == Some("...");
    if is_vararg {
        params.pop();
    }

    let mut body = Vec::new();
    let mut last_line = line_defined;
    for (consumed, &(lineno, raw)) in rest.iter().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if line == "end" {
            return Ok((
                FunctionDef {
                    name,
                    params,
                    is_vararg,
                    body,
                    upvalues: Vec::new(),
                    line_defined,
                    last_line_defined: last_line,
                },
                consumed + 1,
            ));
        }
        last_line = lineno;
        body.push((lineno, parse_stmt(line)?));
    }
    Err(ScriptError(format!("fn {name} missing closing `end`")))
}

fn parse_stmt(line: &str) -> Result<Stmt, ScriptError> {
    if let Some(rest) = line.strip_prefix("let ") {
        let (name, rhs) = split_assign(rest).ok_or_else(|| ScriptError(format!("malformed let: {line}")))?;
        let value = expr::parse(rhs).map_err(|e| ScriptError(e.to_string()))?;
        return Ok(Stmt::Let(name.to_string(), value));
    }
    if let Some(rest) = line.strip_prefix("print ") {
        let value = expr::parse(rest).map_err(|e| ScriptError(e.to_string()))?;
        return Ok(Stmt::Print(value));
    }
    if line == "return" {
        return Ok(Stmt::Return(None));
    }
    if let Some(rest) = line.strip_prefix("return ") {
        let value = expr::parse(rest).map_err(|e| ScriptError(e.to_string()))?;
        return Ok(Stmt::Return(Some(value)));
    }
    match expr::parse(line).map_err(|e| ScriptError(e.to_string()))? {
        Expr::Assign(name, rhs) => Ok(Stmt::Assign(name, *rhs)),
        other => Ok(Stmt::ExprStmt(other)),
    }
}

fn split_assign(rest: &str) -> Option<(&str, &str)> {
    let (name, rhs) = rest.split_once('=')?;
    Some((name.trim(), rhs.trim()))
}
