//! Shared data types threaded through every pipeline stage: tokens, AST,
//! bytecode frames, opcodes, and runtime values.

pub mod ast;
pub mod frame;
pub mod opcode;
pub mod token;
pub mod value;
