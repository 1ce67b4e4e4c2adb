//! A compiled unit of bytecode: the program root, a function/lambda body,
//! or a class body. Owns its children by [`Rc`] rather than by raw
//! pointer — a frame never outlives the `Rc<Frame>` handles held by the
//! `Value::Function`s and `functions`/`classes` tables that reference it,
//! so there is no separate arena for frames the way there is for heap
//! [`crate::common::value::Value`]s.

use std::collections::HashMap;
use std::rc::Rc;

use crate::common::ast::Param;

#[derive(Debug, Default)]
pub struct Frame {
    pub code: Vec<u8>,
    pub ints: Vec<i64>,
    pub floats: Vec<f64>,
    pub strings: Vec<String>,
    /// Named function/lambda frames declared directly in this frame's
    /// lexical scope, keyed by name for `FunctionCall`/`GetVar` fallback
    /// resolution.
    pub functions: HashMap<String, Rc<Frame>>,
    /// Named class frames declared directly in this frame's lexical scope.
    pub classes: HashMap<String, Rc<Frame>>,
    /// Method frames, present only on a class's own frame.
    pub methods: HashMap<String, Rc<Frame>>,
    /// Parent class names, present only on a class's own frame.
    pub parents: Vec<String>,
    pub params: Vec<Param>,
    pub var_arg: bool,
}

impl Frame {
    pub fn new() -> Frame {
        Frame::default()
    }

    /// Appends to the integer pool and returns its index. Never deduped:
    /// `Jump`/`JumpIfFalse` targets share this pool and are patched in
    /// place by index after being reserved, so two equal-valued entries
    /// must never collapse into one slot.
    pub fn add_int(&mut self, value: i64) -> u8 {
        self.ints.push(value);
        debug_assert!(self.ints.len() <= 256, "int-pool overflow: more than 256 entries in one frame");
        (self.ints.len() - 1) as u8
    }

    pub fn add_float(&mut self, value: f64) -> u8 {
        self.floats.push(value);
        debug_assert!(self.floats.len() <= 256, "float-pool overflow: more than 256 entries in one frame");
        (self.floats.len() - 1) as u8
    }

    pub fn add_string(&mut self, value: impl Into<String>) -> u8 {
        self.strings.push(value.into());
        debug_assert!(self.strings.len() <= 256, "string-pool overflow: more than 256 entries in one frame");
        (self.strings.len() - 1) as u8
    }

    /// Reserves an int-pool slot for a forward jump target, to be patched
    /// once the destination offset is known.
    pub fn reserve_jump_target(&mut self) -> u8 {
        let idx = self.ints.len();
        self.ints.push(-1);
        debug_assert!(self.ints.len() <= 256, "int-pool overflow: more than 256 entries in one frame");
        idx as u8
    }

    pub fn patch_jump_target(&mut self, pool_index: u8, offset: usize) {
        self.ints[pool_index as usize] = offset as i64;
    }

    pub fn here(&self) -> usize {
        self.code.len()
    }
}
