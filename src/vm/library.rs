//! Native function registry: a [`Library`] maps a name to a handler, and a
//! [`LibraryManager`] holds several libraries and scans them in
//! registration order to resolve a call. `VM::new` registers the built-in
//! `IO`, `DataStructure`, and `Math` libraries (see
//! [`crate::vm::vm::VM::new`]).

use std::rc::Rc;

use log::info;

use crate::common::value::{NativeFn, Value};

/// A named collection of native handlers, e.g. `IO` or `DataStructure`.
pub struct Library {
    name: String,
    functions: Vec<(String, Rc<NativeFn>)>,
}

impl Library {
    pub fn new(name: impl Into<String>) -> Library {
        Library { name: name.into(), functions: Vec::new() }
    }

    pub fn add(&mut self, name: impl Into<String>, handler: impl Fn(&mut crate::vm::vm::VM, &[Value]) -> Result<Value, crate::error::RuntimeError> + 'static) {
        self.functions.push((name.into(), Rc::new(handler)));
    }

    pub fn has(&self, name: &str) -> bool {
        self.functions.iter().any(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<Rc<NativeFn>> {
        self.functions.iter().find(|(n, _)| n == name).map(|(_, f)| f.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Holds every registered [`Library`] and resolves calls across all of
/// them, in registration order.
#[derive(Default)]
pub struct LibraryManager {
    libraries: Vec<Library>,
}

impl LibraryManager {
    pub fn new() -> LibraryManager {
        LibraryManager::default()
    }

    pub fn register(&mut self, library: Library) {
        info!("registered native library '{}' ({} functions)", library.name(), library.functions.len());
        self.libraries.push(library);
    }

    pub fn has(&self, name: &str) -> bool {
        self.libraries.iter().any(|lib| lib.has(name))
    }

    pub fn get(&self, name: &str) -> Option<Rc<NativeFn>> {
        self.libraries.iter().find_map(|lib| lib.get(name))
    }
}
