//! Compilation context: the symbol and state directory for one
//! compilation unit. All cross-component lookups route through it.
//!
//! Created per compilation, mutated only during emission, discarded once
//! the module is finalized.

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use sable_bytecode::ClassIndex;

use crate::types::{StaticType, TypeMap};

/// A declared instance property, emitter view
#[derive(Debug, Clone)]
pub struct PropRecord {
    /// Absolute slot index (superclass slots included)
    pub slot: u16,
    /// Readonly: writable only from the declaring constructor
    pub readonly: bool,
    /// Declared type
    pub ty: StaticType,
}

/// A class record in the compilation context
#[derive(Debug, Clone)]
pub struct ClassRecord {
    /// Index into the module class table
    pub index: ClassIndex,
    /// Qualified name (namespace path joined with dots)
    pub qualified: String,
    /// Superclass qualified name
    pub superclass: Option<String>,
    /// Own declared properties
    pub properties: IndexMap<String, PropRecord>,
    /// Own instance method names → position in the method table
    pub methods: FxHashMap<String, u16>,
    /// Own static member names
    pub statics: FxHashSet<String>,
    /// Own private field names (no `#`)
    pub private_fields: FxHashSet<String>,
    /// Own private method names
    pub private_methods: FxHashSet<String>,
    /// Slot index where own properties start
    pub slot_offset: u16,
    /// Total slots including inherited
    pub total_slots: u16,
}

/// A named function usable for direct-call emission
#[derive(Debug, Clone)]
pub struct FunctionRecord {
    /// Qualified name
    pub qualified: String,
    /// Declared parameter count (defaults included, rest excluded)
    pub arity: u8,
    /// Has a rest parameter
    pub has_rest: bool,
    /// async flag
    pub is_async: bool,
    /// generator flag
    pub is_generator: bool,
}

/// Per-compilation symbol directory
#[derive(Debug, Default)]
pub struct CompilationContext {
    /// Classes by qualified name
    pub classes: IndexMap<String, ClassRecord>,
    /// Named functions by qualified name
    pub functions: FxHashMap<String, FunctionRecord>,
    /// Module export names in declaration order
    pub export_names: Vec<String>,
    /// Static type side-table
    pub type_map: TypeMap,
    /// Active namespace path during emission
    namespace_stack: Vec<String>,
}

impl CompilationContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a namespace (TS `namespace N { … }`)
    pub fn push_namespace(&mut self, name: &str) {
        self.namespace_stack.push(name.to_string());
    }

    /// Leave the innermost namespace
    pub fn pop_namespace(&mut self) {
        self.namespace_stack.pop();
    }

    /// Qualify a simple name with the active namespace path
    pub fn qualify(&self, simple: &str) -> String {
        if self.namespace_stack.is_empty() {
            simple.to_string()
        } else {
            format!("{}.{}", self.namespace_stack.join("."), simple)
        }
    }

    /// Translate a source-visible class name into its qualified form,
    /// searching the innermost namespace outward.
    pub fn resolve_class_name(&self, simple: &str) -> Option<&str> {
        for depth in (0..=self.namespace_stack.len()).rev() {
            let candidate = if depth == 0 {
                simple.to_string()
            } else {
                format!("{}.{}", self.namespace_stack[..depth].join("."), simple)
            };
            if let Some((key, _)) = self.classes.get_key_value(candidate.as_str()) {
                return Some(key);
            }
        }
        None
    }

    /// Translate a source-visible function name into its qualified form
    pub fn resolve_function_name(&self, simple: &str) -> Option<&FunctionRecord> {
        for depth in (0..=self.namespace_stack.len()).rev() {
            let candidate = if depth == 0 {
                simple.to_string()
            } else {
                format!("{}.{}", self.namespace_stack[..depth].join("."), simple)
            };
            if let Some(record) = self.functions.get(candidate.as_str()) {
                return Some(record);
            }
        }
        None
    }

    /// Walk the superclass chain for an instance method; returns the
    /// declaring class and the method's table position.
    pub fn resolve_instance_method(
        &self,
        class_name: &str,
        method: &str,
    ) -> Option<(&ClassRecord, u16)> {
        let mut current = self.classes.get(class_name);
        while let Some(class) = current {
            if let Some(position) = class.methods.get(method) {
                return Some((class, *position));
            }
            current = class
                .superclass
                .as_deref()
                .and_then(|name| self.classes.get(name));
        }
        None
    }

    /// Walk the superclass chain for a declared property
    pub fn resolve_property(&self, class_name: &str, prop: &str) -> Option<(&ClassRecord, &PropRecord)> {
        let mut current = self.classes.get(class_name);
        while let Some(class) = current {
            if let Some(record) = class.properties.get(prop) {
                return Some((class, record));
            }
            current = class
                .superclass
                .as_deref()
                .and_then(|name| self.classes.get(name));
        }
        None
    }

    /// Whether `prop` is declared (with a typed backing slot) on the class
    /// or an ancestor
    pub fn is_declared_property(&self, class_name: &str, prop: &str) -> bool {
        self.resolve_property(class_name, prop).is_some()
    }

    /// Whether `prop` is readonly on the class or an ancestor
    pub fn is_readonly_property(&self, class_name: &str, prop: &str) -> bool {
        self.resolve_property(class_name, prop)
            .map(|(_, record)| record.readonly)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(qualified: &str, superclass: Option<&str>, props: &[(&str, bool)], offset: u16) -> ClassRecord {
        let mut properties = IndexMap::new();
        for (i, (name, readonly)) in props.iter().enumerate() {
            properties.insert(
                name.to_string(),
                PropRecord {
                    slot: offset + i as u16,
                    readonly: *readonly,
                    ty: StaticType::Unknown,
                },
            );
        }
        ClassRecord {
            index: ClassIndex(0),
            qualified: qualified.to_string(),
            superclass: superclass.map(str::to_string),
            properties,
            methods: FxHashMap::default(),
            statics: FxHashSet::default(),
            private_fields: FxHashSet::default(),
            private_methods: FxHashSet::default(),
            slot_offset: offset,
            total_slots: offset + props.len() as u16,
        }
    }

    #[test]
    fn property_resolution_walks_the_chain() {
        let mut ctx = CompilationContext::new();
        ctx.classes
            .insert("Base".into(), class("Base", None, &[("a", true)], 0));
        ctx.classes
            .insert("Derived".into(), class("Derived", Some("Base"), &[("b", false)], 1));

        let (declaring, record) = ctx.resolve_property("Derived", "a").unwrap();
        assert_eq!(declaring.qualified, "Base");
        assert_eq!(record.slot, 0);
        assert!(ctx.is_readonly_property("Derived", "a"));
        assert!(!ctx.is_readonly_property("Derived", "b"));
        assert!(!ctx.is_declared_property("Derived", "c"));
    }

    #[test]
    fn namespace_qualification() {
        let mut ctx = CompilationContext::new();
        ctx.push_namespace("App");
        assert_eq!(ctx.qualify("Point"), "App.Point");
        ctx.classes
            .insert("App.Point".into(), class("App.Point", None, &[], 0));
        assert_eq!(ctx.resolve_class_name("Point"), Some("App.Point"));
        ctx.pop_namespace();
        assert_eq!(ctx.resolve_class_name("Point"), None);
    }
}
