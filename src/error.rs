//! The four error kinds raised by each pipeline stage, plus a unifying
//! [`InterpretError`] for callers that just want to print a failure and
//! set an exit code.

use thiserror::Error;

/// Raised by the lexer: illegal characters, unterminated strings, malformed
/// numbers.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Lex Error at line {line}: {message}")]
pub struct LexError {
    pub line: usize,
    pub message: String,
}

impl LexError {
    pub fn new(line: usize, message: impl Into<String>) -> LexError {
        LexError { line, message: message.into() }
    }
}

/// Raised by the parser: token mismatches during `consume`, unexpected
/// prefixes, grammar positions the parser refuses (e.g. `...rest` not last
/// in a destructuring pattern).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Parse Error at line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> ParseError {
        ParseError { line, message: message.into() }
    }
}

/// Raised by the compiler: AST shapes it cannot lower to bytecode.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Compile Error at line {line}: {message}")]
pub struct CompileError {
    pub line: usize,
    pub message: String,
}

impl CompileError {
    pub fn new(line: usize, message: impl Into<String>) -> CompileError {
        CompileError { line, message: message.into() }
    }
}

/// Raised by the VM: type mismatches, out-of-range indices, redefinition,
/// assignment to an immutable binding, undefined names, stack over/underflow.
///
/// Runtime errors carry no line number: by the time the VM is running,
/// source positions have been erased by the compiler, and the bytecode
/// format has no field to retain them in.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Runtime Error: {message}")]
pub struct RuntimeError {
    pub message: String,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> RuntimeError {
        RuntimeError { message: message.into() }
    }
}

/// Unifies the four pipeline-stage errors so a driver can match once and
/// print consistently.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InterpretError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl InterpretError {
    /// A conventional shell exit code, distinct per pipeline stage
    /// (non-zero is required; distinct codes are not, but are friendlier
    /// to script authors).
    pub fn exit_code(&self) -> i32 {
        match self {
            InterpretError::Lex(_) => 65,
            InterpretError::Parse(_) => 66,
            InterpretError::Compile(_) => 67,
            InterpretError::Runtime(_) => 70,
        }
    }
}
