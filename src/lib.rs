//! lwscript: a small dynamically-typed scripting language with a
//! stack-based bytecode virtual machine.
//!
//! The pipeline runs lexer → parser → AST optimizer → compiler → VM, each
//! stage living in its own module so a host can stop partway (e.g. a
//! linter that only needs the AST). [`run`] and [`eval`] wire the whole
//! pipeline together for the common case.

pub mod common;
pub mod compiler;
pub mod error;
pub mod vm;

use std::rc::Rc;

use common::frame::Frame;
use common::value::Value;
use compiler::compile::Compiler;
use compiler::lex::Lexer;
use compiler::optimize::optimize;
use compiler::parse::Parser;
use error::InterpretError;
use vm::vm::VM;

/// Runs the full pipeline, from source text through the compiled bytecode,
/// without executing it. Used by the CLI's `--dump-*` flags and by
/// `run`/`eval` themselves.
pub fn compile(source: &str, optimize_enabled: bool) -> Result<Rc<Frame>, InterpretError> {
    let tokens = Lexer::lex(source)?;
    let ast = Parser::parse(tokens)?;
    let ast = optimize(ast, optimize_enabled);
    let frame = Compiler::compile(&ast)?;
    Ok(Rc::new(frame))
}

/// Compiles and runs `source` against a fresh [`VM`], returning the
/// program's final value (a trailing `return`'s value, or `Nil`).
pub fn run(source: &str) -> Result<Value, InterpretError> {
    let frame = compile(source, true)?;
    let mut vm = VM::new();
    Ok(vm.interpret(frame)?)
}

/// Like [`run`], but against a caller-supplied `VM` so state (bindings
/// defined at the root scope, the heap, the GC) persists across calls —
/// the shape a REPL needs.
pub fn eval(vm: &mut VM, source: &str) -> Result<Value, InterpretError> {
    let frame = compile(source, true)?;
    Ok(vm.interpret(frame)?)
}
