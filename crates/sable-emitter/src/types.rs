//! Static type information consumed for dispatch decisions.
//!
//! The external checker's knowledge reaches the emitter two ways: type
//! annotations left in the AST (harvested here) and inference over
//! literal shapes. Every query may miss; consumers must fall back to
//! dynamic emission on `Unknown`.

use oxc_ast::ast::{TSType, TSTypeAnnotation, TSTypeName};
use sable_bytecode::{Register, TypeTag};

/// Abstract representation tag for an expression result register.
///
/// Tracked while lowering so redundant conversions can be elided and
/// number/string-specialized instructions selected. Never trusted across
/// control-flow joins: merges reset to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaticTag {
    /// Nothing known; the generic boxed representation
    #[default]
    Unknown,
    /// 64-bit float
    Double,
    /// Boolean
    Boolean,
    /// String
    String,
    /// The null singleton
    Null,
}

impl StaticTag {
    /// Tag after a control-flow join of two arms
    pub fn join(self, other: Self) -> Self {
        if self == other { self } else { Self::Unknown }
    }
}

/// An emitted expression: its result register plus the static tag of the
/// value it left there.
#[derive(Debug, Clone, Copy)]
pub struct TypedReg {
    /// Result register
    pub reg: Register,
    /// Static representation tag
    pub tag: StaticTag,
}

impl TypedReg {
    /// Untagged result
    pub fn unknown(reg: Register) -> Self {
        Self {
            reg,
            tag: StaticTag::Unknown,
        }
    }

    /// Tagged result
    pub fn tagged(reg: Register, tag: StaticTag) -> Self {
        Self { reg, tag }
    }
}

/// Static type of an expression, as far as the emitter can know it
#[derive(Debug, Clone, PartialEq)]
pub enum StaticType {
    /// No usable information
    Unknown,
    /// number
    Number,
    /// boolean
    Boolean,
    /// string
    String,
    /// null / undefined / void
    Nullish,
    /// Array (element type is not tracked)
    Array,
    /// Plain object / interface type
    Object,
    /// Date
    Date,
    /// Map
    Map,
    /// Set
    Set,
    /// WeakMap
    WeakMap,
    /// WeakSet
    WeakSet,
    /// RegExp
    Regex,
    /// Buffer
    Buffer,
    /// Promise
    Promise,
    /// Function type
    Function,
    /// A user class, by qualified name
    Class(String),
    /// Union of member types (strategy order: string before array)
    Union(Vec<StaticType>),
}

impl StaticType {
    /// Harvest a static type from a TS annotation
    pub fn from_annotation(annotation: &TSTypeAnnotation) -> Self {
        Self::from_ts_type(&annotation.type_annotation)
    }

    /// Harvest a static type from a TS type node
    pub fn from_ts_type(ty: &TSType) -> Self {
        match ty {
            TSType::TSNumberKeyword(_) => Self::Number,
            TSType::TSBooleanKeyword(_) => Self::Boolean,
            TSType::TSStringKeyword(_) => Self::String,
            TSType::TSNullKeyword(_) | TSType::TSUndefinedKeyword(_) | TSType::TSVoidKeyword(_) => {
                Self::Nullish
            }
            TSType::TSArrayType(_) => Self::Array,
            TSType::TSObjectKeyword(_) => Self::Object,
            TSType::TSFunctionType(_) => Self::Function,
            TSType::TSUnionType(union) => {
                let members: Vec<Self> =
                    union.types.iter().map(Self::from_ts_type).collect();
                if members.iter().any(|m| *m == Self::Unknown) {
                    Self::Unknown
                } else {
                    Self::Union(members)
                }
            }
            TSType::TSTypeReference(reference) => {
                let TSTypeName::IdentifierReference(ident) = &reference.type_name else {
                    return Self::Unknown;
                };
                let name = ident.name.to_string();
                match name.as_str() {
                    "Array" => Self::Array,
                    "Date" => Self::Date,
                    "Map" => Self::Map,
                    "Set" => Self::Set,
                    "WeakMap" => Self::WeakMap,
                    "WeakSet" => Self::WeakSet,
                    "RegExp" => Self::Regex,
                    "Buffer" => Self::Buffer,
                    "Promise" => Self::Promise,
                    "Function" => Self::Function,
                    _ => Self::Class(name),
                }
            }
            _ => Self::Unknown,
        }
    }

    /// The slot tag recorded in the class table for a declared property
    pub fn slot_tag(&self) -> TypeTag {
        match self {
            Self::Number => TypeTag::Number,
            Self::Boolean => TypeTag::Boolean,
            Self::String => TypeTag::String,
            Self::Unknown | Self::Nullish | Self::Union(_) => TypeTag::Any,
            _ => TypeTag::Object,
        }
    }

    /// The representation tag values of this type carry on the stack
    pub fn stack_tag(&self) -> StaticTag {
        match self {
            Self::Number => StaticTag::Double,
            Self::Boolean => StaticTag::Boolean,
            Self::String => StaticTag::String,
            _ => StaticTag::Unknown,
        }
    }
}

/// Side-table from AST spans to static types. The checker is an external
/// collaborator; entries exist only where annotations (or literal
/// inference) produced one, and `get` may return nothing.
#[derive(Debug, Default)]
pub struct TypeMap {
    entries: rustc_hash::FxHashMap<u32, StaticType>,
}

impl TypeMap {
    /// Record the type of the node starting at `span_start`
    pub fn insert(&mut self, span_start: u32, ty: StaticType) {
        if ty != StaticType::Unknown {
            self.entries.insert(span_start, ty);
        }
    }

    /// Look up a node's type; absent entries mean dynamic emission
    pub fn get(&self, span_start: u32) -> Option<&StaticType> {
        self.entries.get(&span_start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_resets_disagreeing_tags() {
        assert_eq!(StaticTag::Double.join(StaticTag::Double), StaticTag::Double);
        assert_eq!(StaticTag::Double.join(StaticTag::String), StaticTag::Unknown);
        assert_eq!(StaticTag::Unknown.join(StaticTag::Unknown), StaticTag::Unknown);
    }

    #[test]
    fn slot_tags() {
        assert_eq!(StaticType::Number.slot_tag(), TypeTag::Number);
        assert_eq!(StaticType::Unknown.slot_tag(), TypeTag::Any);
        assert_eq!(StaticType::Array.slot_tag(), TypeTag::Object);
    }

    #[test]
    fn type_map_skips_unknown() {
        let mut map = TypeMap::default();
        map.insert(0, StaticType::Unknown);
        map.insert(4, StaticType::Number);
        assert!(map.get(0).is_none());
        assert_eq!(map.get(4), Some(&StaticType::Number));
    }
}
