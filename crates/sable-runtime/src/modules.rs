//! Module instances and the loader surface.
//!
//! Each module gets one static export slot per named export plus the
//! reserved `$default` slot. Import lowering reads from these slots;
//! export lowering writes to them. The resolver maps import specifiers to
//! canonical paths; the loader callback (installed by the driver)
//! compiles a path to bytecode. Host modules register native exports in
//! the same table shape.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;
use sable_bytecode::Module;

use crate::value::{RuntimeClass, UpvalueCell, Value};

/// Reserved slot key for the default export
pub const DEFAULT_EXPORT: &str = sable_bytecode::module::DEFAULT_EXPORT;

/// Export slots of one module: name → storage cell, insertion-ordered
#[derive(Default)]
pub struct ExportTable {
    slots: RefCell<IndexMap<Rc<str>, UpvalueCell>>,
}

impl ExportTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the slot for `name`. Creation on first touch keeps
    /// cyclic imports working: the importer reads the same cell the
    /// exporter later writes.
    pub fn slot(&self, name: &str) -> UpvalueCell {
        if let Some(cell) = self.slots.borrow().get(name) {
            return cell.clone();
        }
        let cell = UpvalueCell::default();
        self.slots.borrow_mut().insert(name.into(), cell.clone());
        cell
    }

    /// Write an export
    pub fn store(&self, name: &str, value: Value) {
        self.slot(name).set(value);
    }

    /// Exported names in insertion order
    pub fn names(&self) -> Vec<Rc<str>> {
        self.slots.borrow().keys().cloned().collect()
    }

    /// Snapshot all exports
    pub fn snapshot(&self) -> Vec<(Rc<str>, Value)> {
        self.slots
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.get()))
            .collect()
    }
}

/// A module instantiated in the VM
pub struct ModuleCtx {
    /// Compiled bytecode
    pub module: Rc<Module>,
    /// Canonical path
    pub path: Rc<str>,
    /// Export slots
    pub exports: Rc<ExportTable>,
    /// Runtime class objects, bound when their declarations execute
    pub classes: RefCell<Vec<Option<Rc<RuntimeClass>>>>,
}

impl ModuleCtx {
    /// Wrap a compiled module for instantiation
    pub fn new(module: Rc<Module>, path: Rc<str>) -> Rc<Self> {
        let class_count = module.classes.len();
        Rc::new(Self {
            module,
            path,
            exports: Rc::new(ExportTable::new()),
            classes: RefCell::new(vec![None; class_count]),
        })
    }

    /// The bound runtime class at `index`, if its declaration has run
    pub fn runtime_class(&self, index: u32) -> Option<Rc<RuntimeClass>> {
        self.classes.borrow().get(index as usize)?.clone()
    }
}

/// Maps import specifiers to canonical module paths
pub trait ModuleResolver {
    /// Resolve `specifier` as imported from `referrer`. `None` means the
    /// specifier names a host module (or is unresolvable).
    fn resolve(&self, specifier: &str, referrer: &str) -> Option<String>;
}

/// Filesystem resolver: relative specifiers resolve against the
/// referrer's directory, probing `.ts` / `.js` extensions. Bare names are
/// left to the host-module table.
#[derive(Debug, Default)]
pub struct FsResolver;

impl ModuleResolver for FsResolver {
    fn resolve(&self, specifier: &str, referrer: &str) -> Option<String> {
        if !specifier.starts_with('.') && !specifier.starts_with('/') {
            return None;
        }

        let base = Path::new(referrer).parent().unwrap_or(Path::new(""));
        let joined: PathBuf = base.join(specifier);
        let candidates = [
            joined.clone(),
            joined.with_extension("ts"),
            joined.with_extension("js"),
        ];
        for candidate in candidates {
            if candidate.is_file() {
                return Some(candidate.to_string_lossy().into_owned());
            }
        }
        // Fall back to the joined path; a missing file surfaces as a load
        // error with the path in the message.
        Some(joined.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_slots_are_shared() {
        let table = ExportTable::new();
        let early = table.slot("x");
        table.store("x", Value::Number(7.0));
        assert_eq!(early.get().as_number(), Some(7.0));
    }

    #[test]
    fn names_preserve_insertion_order() {
        let table = ExportTable::new();
        table.store("b", Value::Number(1.0));
        table.store("a", Value::Number(2.0));
        table.store(DEFAULT_EXPORT, Value::Number(3.0));
        let names: Vec<String> = table.names().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, vec!["b", "a", DEFAULT_EXPORT]);
    }

    #[test]
    fn bare_specifiers_are_host_modules() {
        let resolver = FsResolver;
        assert!(resolver.resolve("crypto", "main.ts").is_none());
        assert!(resolver.resolve("./util", "src/main.ts").is_some());
    }
}
