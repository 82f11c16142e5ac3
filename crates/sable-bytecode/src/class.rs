//! Class metadata carried by a compiled module.
//!
//! Classes are compilation entities: declared properties get typed
//! backing slots laid out superclass-first, so emitted code can address
//! them by index. Everything assigned outside the declared set lands in
//! the instance's extras mapping at runtime.

use serde::{Deserialize, Serialize};

use crate::operand::{ClassIndex, FunctionIndex};

/// Static type tag of a declared property's backing slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TypeTag {
    /// No usable annotation
    #[default]
    Any,
    /// number
    Number,
    /// boolean
    Boolean,
    /// string
    String,
    /// Some object/class/array/function type
    Object,
}

/// A declared instance property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    /// Source-visible property name
    pub name: String,
    /// Slot type from the declaration's annotation
    pub type_tag: TypeTag,
    /// Writable only from the declaring constructor
    pub readonly: bool,
}

/// Method kind (plain method or accessor half)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodKind {
    /// Ordinary method
    Method,
    /// Property getter
    Getter,
    /// Property setter
    Setter,
}

/// A method table entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    /// Method name
    pub name: String,
    /// Compiled body
    pub func: FunctionIndex,
    /// Plain method or accessor
    pub kind: MethodKind,
}

/// A class record in the module class table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDef {
    /// Qualified name (namespace path joined with dots)
    pub name: String,
    /// Superclass, if any (must precede this entry in the table)
    pub superclass: Option<ClassIndex>,
    /// Declared instance properties, in declaration order. The slot
    /// index of `properties[i]` is `superclass slot count + i`.
    pub properties: Vec<PropertyDef>,
    /// Constructor body, if declared
    pub constructor: Option<FunctionIndex>,
    /// Instance methods and accessors
    pub methods: Vec<MethodDef>,
    /// Static methods and accessors
    pub static_methods: Vec<MethodDef>,
    /// Private instance fields (`#name`, without the hash)
    pub private_fields: Vec<String>,
    /// Private instance methods
    pub private_methods: Vec<MethodDef>,
}

impl ClassDef {
    /// Number of slots this class's own declared properties occupy
    pub fn own_slot_count(&self) -> u16 {
        self.properties.len() as u16
    }

    /// Find an own instance method by name
    pub fn find_method(&self, name: &str, kind: MethodKind) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.kind == kind && m.name == name)
    }

    /// Position of an own method in the method table (for `CallDirect`)
    pub fn method_position(&self, name: &str) -> Option<u16> {
        self.methods
            .iter()
            .position(|m| m.kind == MethodKind::Method && m.name == name)
            .map(|i| i as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(name: &str, idx: u32) -> MethodDef {
        MethodDef {
            name: name.to_string(),
            func: FunctionIndex(idx),
            kind: MethodKind::Method,
        }
    }

    #[test]
    fn method_positions_skip_accessors() {
        let class = ClassDef {
            name: "Point".into(),
            superclass: None,
            properties: vec![
                PropertyDef {
                    name: "x".into(),
                    type_tag: TypeTag::Number,
                    readonly: false,
                },
                PropertyDef {
                    name: "y".into(),
                    type_tag: TypeTag::Number,
                    readonly: true,
                },
            ],
            constructor: None,
            methods: vec![
                MethodDef {
                    name: "len".into(),
                    func: FunctionIndex(0),
                    kind: MethodKind::Getter,
                },
                method("norm", 1),
            ],
            static_methods: Vec::new(),
            private_fields: Vec::new(),
            private_methods: Vec::new(),
        };

        assert_eq!(class.own_slot_count(), 2);
        assert_eq!(class.method_position("norm"), Some(1));
        assert_eq!(class.method_position("len"), None);
        assert!(class.find_method("len", MethodKind::Getter).is_some());
    }
}
