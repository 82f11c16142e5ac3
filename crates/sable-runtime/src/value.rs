//! The dynamic value model.
//!
//! Every user-visible value is one arm of a fixed tagged universe. Heap
//! data is `Rc`-shared with `RefCell` interiors; execution is cooperative
//! on a single logical thread, so interior mutability is never contended.
//! The uniform `Value` slot is the "boxed" representation; unboxed
//! primitives exist only transiently inside runtime helpers.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use num_bigint::BigInt;
use rustc_hash::FxHashMap;

use crate::error::{VmError, VmResult};
use crate::machine::Machine;
use crate::modules::ModuleCtx;
use crate::promise::PromiseData;
use crate::vm::Vm;

/// A heap cell shared between a declaring frame and every closure that
/// captures the variable. Writes through either view update the one cell.
#[derive(Clone)]
pub struct UpvalueCell(Rc<RefCell<Value>>);

impl UpvalueCell {
    /// Create a new cell holding `value`
    pub fn new(value: Value) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    /// Read the current value
    pub fn get(&self) -> Value {
        self.0.borrow().clone()
    }

    /// Replace the value
    pub fn set(&self, value: Value) {
        *self.0.borrow_mut() = value;
    }
}

impl Default for UpvalueCell {
    fn default() -> Self {
        Self::new(Value::Undefined)
    }
}

impl std::fmt::Debug for UpvalueCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cell({:?})", *self.0.borrow())
    }
}

/// Native function handler: `(vm, this, args) -> value`
pub type NativeFn = Rc<dyn Fn(&mut Vm, &Value, &[Value]) -> VmResult<Value>>;

/// A JavaScript value
#[derive(Clone)]
pub enum Value {
    /// The undefined singleton
    Undefined,
    /// null
    Null,
    /// boolean
    Bool(bool),
    /// 64-bit float — the sole numeric type
    Number(f64),
    /// Arbitrary-precision integer
    BigInt(Rc<BigInt>),
    /// Immutable string
    Str(Rc<str>),
    /// Unique identity + optional description
    Symbol(Rc<SymbolData>),
    /// Ordered sequence of values
    Array(Rc<ArrayData>),
    /// String/symbol-keyed mapping with insertion-ordered properties
    Object(Rc<ObjectData>),
    /// Class instance with typed backing slots + extras mapping
    Instance(Rc<InstanceData>),
    /// Callable (bytecode closure, native, or bound)
    Function(Rc<FunctionData>),
    /// A class value (constructable, holds statics)
    Class(Rc<RuntimeClass>),
    /// Promise handle
    Promise(Rc<PromiseData>),
    /// Generator / async-generator object (a suspended state machine)
    Generator(Rc<Machine>),
    /// Date wrapper (milliseconds since epoch)
    Date(Rc<DateData>),
    /// Regular expression handle
    Regex(Rc<RegexData>),
    /// Byte buffer
    Buffer(Rc<BufferData>),
    /// Map keyed by SameValueZero equality
    Map(Rc<MapData>),
    /// Set keyed by SameValueZero equality
    Set(Rc<SetData>),
    /// WeakMap (object keys held weakly)
    WeakMap(Rc<WeakMapData>),
    /// WeakSet
    WeakSet(Rc<WeakSetData>),
    /// Opaque host object (crypto hashes, iterator handles, …)
    Host(Rc<dyn HostObject>),
}

impl Value {
    /// Create a number value
    #[inline]
    pub fn number(n: f64) -> Self {
        Self::Number(n)
    }

    /// Create a string value
    #[inline]
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Self::Str(s.into())
    }

    /// Create a boolean value
    #[inline]
    pub const fn boolean(b: bool) -> Self {
        Self::Bool(b)
    }

    /// Create an empty array
    pub fn array(elements: Vec<Value>) -> Self {
        Self::Array(Rc::new(ArrayData::new(elements)))
    }

    /// Create a native function value
    pub fn native<F>(name: &str, f: F) -> Self
    where
        F: Fn(&mut Vm, &Value, &[Value]) -> VmResult<Value> + 'static,
    {
        Self::Function(Rc::new(FunctionData {
            name: RefCell::new(name.into()),
            kind: FnKind::Native(Rc::new(f)),
            props: RefCell::new(IndexMap::new()),
        }))
    }

    /// Check for undefined
    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Check for null
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check for null or undefined
    #[inline]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Check for a number
    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }

    /// Check for a string
    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, Self::Str(_))
    }

    /// Check for any callable (function or class)
    #[inline]
    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Function(_) | Self::Class(_))
    }

    /// Get as number
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as string slice
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Get as array data
    #[inline]
    pub fn as_array(&self) -> Option<&Rc<ArrayData>> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get as promise
    #[inline]
    pub fn as_promise(&self) -> Option<&Rc<PromiseData>> {
        match self {
            Self::Promise(p) => Some(p),
            _ => None,
        }
    }

    /// Truthiness per JS rules (`IsTruthy` helper)
    pub fn to_boolean(&self) -> bool {
        match self {
            Self::Undefined | Self::Null | Self::Bool(false) => false,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) => !s.is_empty(),
            Self::BigInt(b) => **b != BigInt::from(0),
            Self::Bool(true) => true,
            _ => true,
        }
    }

    /// `typeof` result — one of the fixed set of strings
    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "object", // historical
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::BigInt(_) => "bigint",
            Self::Str(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Function(_) | Self::Class(_) => "function",
            _ => "object",
        }
    }

    /// Reference identity for the heap arms (strict equality on objects)
    pub fn same_reference(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Instance(a), Self::Instance(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Class(a), Self::Class(b)) => Rc::ptr_eq(a, b),
            (Self::Promise(a), Self::Promise(b)) => Rc::ptr_eq(a, b),
            (Self::Generator(a), Self::Generator(b)) => Rc::ptr_eq(a, b),
            (Self::Date(a), Self::Date(b)) => Rc::ptr_eq(a, b),
            (Self::Regex(a), Self::Regex(b)) => Rc::ptr_eq(a, b),
            (Self::Buffer(a), Self::Buffer(b)) => Rc::ptr_eq(a, b),
            (Self::Map(a), Self::Map(b)) => Rc::ptr_eq(a, b),
            (Self::Set(a), Self::Set(b)) => Rc::ptr_eq(a, b),
            (Self::WeakMap(a), Self::WeakMap(b)) => Rc::ptr_eq(a, b),
            (Self::WeakSet(a), Self::WeakSet(b)) => Rc::ptr_eq(a, b),
            (Self::Host(a), Self::Host(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Undefined
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{}", crate::number::to_js_string(*n)),
            Self::BigInt(b) => write!(f, "{b}n"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Symbol(s) => match &s.description {
                Some(d) => write!(f, "Symbol({d})"),
                None => write!(f, "Symbol()"),
            },
            Self::Array(a) => write!(f, "[array len={}]", a.len()),
            Self::Object(_) => write!(f, "[object Object]"),
            Self::Instance(i) => write!(f, "[instance {}]", i.class.name),
            Self::Function(func) => write!(f, "[Function: {}]", func.name.borrow()),
            Self::Class(c) => write!(f, "[class {}]", c.name),
            Self::Promise(_) => write!(f, "[object Promise]"),
            Self::Generator(_) => write!(f, "[object Generator]"),
            Self::Date(d) => write!(f, "[Date {}]", d.millis.get()),
            Self::Regex(r) => write!(f, "/{}/{}", r.pattern, r.flags),
            Self::Buffer(b) => write!(f, "<Buffer len={}>", b.bytes.borrow().len()),
            Self::Map(m) => write!(f, "[Map size={}]", m.size()),
            Self::Set(s) => write!(f, "[Set size={}]", s.size()),
            Self::WeakMap(_) => write!(f, "[object WeakMap]"),
            Self::WeakSet(_) => write!(f, "[object WeakSet]"),
            Self::Host(h) => write!(f, "[host {}]", h.class_name()),
        }
    }
}

// ============================================================================
// Symbols
// ============================================================================

/// A symbol: unique identity plus optional description
#[derive(Debug)]
pub struct SymbolData {
    /// Unique id (identity)
    pub id: u64,
    /// Optional description
    pub description: Option<Rc<str>>,
}

/// Well-known symbol ids, published before any emitted code runs
pub mod well_known {
    /// `Symbol.iterator`
    pub const ITERATOR: u64 = 1;
    /// `Symbol.asyncIterator`
    pub const ASYNC_ITERATOR: u64 = 2;
    /// `Symbol.toStringTag`
    pub const TO_STRING_TAG: u64 = 3;
    /// `Symbol.hasInstance`
    pub const HAS_INSTANCE: u64 = 4;
    /// Internal brand marking error objects (never user-visible)
    pub const ERROR_BRAND: u64 = 5;
    /// First id available to user symbols
    pub const FIRST_USER: u64 = 16;
}

/// Process-wide symbol registry (`Symbol()` allocation + `Symbol.for`)
pub struct SymbolRegistry {
    next_id: Cell<u64>,
    global: RefCell<FxHashMap<Rc<str>, Rc<SymbolData>>>,
}

impl Default for SymbolRegistry {
    fn default() -> Self {
        Self {
            next_id: Cell::new(well_known::FIRST_USER),
            global: RefCell::new(FxHashMap::default()),
        }
    }
}

impl SymbolRegistry {
    /// Allocate a fresh unique symbol
    pub fn create(&self, description: Option<Rc<str>>) -> Rc<SymbolData> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        Rc::new(SymbolData { id, description })
    }

    /// `Symbol.for(key)`: one shared symbol per key
    pub fn intern(&self, key: Rc<str>) -> Rc<SymbolData> {
        if let Some(existing) = self.global.borrow().get(&key) {
            return existing.clone();
        }
        let sym = self.create(Some(key.clone()));
        self.global.borrow_mut().insert(key, sym.clone());
        sym
    }

    /// `Symbol.keyFor(sym)`
    pub fn key_for(&self, sym: &SymbolData) -> Option<Rc<str>> {
        self.global
            .borrow()
            .iter()
            .find(|(_, v)| v.id == sym.id)
            .map(|(k, _)| k.clone())
    }
}

// ============================================================================
// Arrays and objects
// ============================================================================

/// Array backing storage. Arrays are objects: the occasional named
/// property (tagged-template `raw`, user annotations) lives in `props`.
#[derive(Debug, Default)]
pub struct ArrayData {
    /// Elements in order
    pub elements: RefCell<Vec<Value>>,
    /// Non-index properties
    pub props: RefCell<IndexMap<PropKey, Value>>,
}

impl ArrayData {
    /// Create from a vector
    pub fn new(elements: Vec<Value>) -> Self {
        Self {
            elements: RefCell::new(elements),
            props: RefCell::new(IndexMap::new()),
        }
    }

    /// Element count
    pub fn len(&self) -> usize {
        self.elements.borrow().len()
    }

    /// Whether the array is empty
    pub fn is_empty(&self) -> bool {
        self.elements.borrow().is_empty()
    }

    /// Clone element `i` (undefined when out of range)
    pub fn get(&self, i: usize) -> Value {
        self.elements.borrow().get(i).cloned().unwrap_or(Value::Undefined)
    }
}

/// Property key: interned string or symbol identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropKey {
    /// String key
    Str(Rc<str>),
    /// Symbol key (by id)
    Sym(u64),
}

impl PropKey {
    /// String key constructor
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Self::Str(s.into())
    }
}

/// An object property: plain data or accessor pair
#[derive(Debug, Clone)]
pub enum Property {
    /// Ordinary data property
    Data(Value),
    /// Getter/setter pair
    Accessor {
        /// Getter, if defined
        get: Option<Value>,
        /// Setter, if defined
        set: Option<Value>,
    },
}

/// Plain object: insertion-ordered properties
#[derive(Debug, Default)]
pub struct ObjectData {
    /// Own properties in insertion order
    pub props: RefCell<IndexMap<PropKey, Property>>,
    /// Set by `Object.freeze`
    pub frozen: Cell<bool>,
}

impl ObjectData {
    /// Create an empty object
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a data property (accessors are the caller's concern)
    pub fn get_data(&self, key: &PropKey) -> Option<Value> {
        match self.props.borrow().get(key) {
            Some(Property::Data(v)) => Some(v.clone()),
            _ => None,
        }
    }

    /// Insert/overwrite a data property (no-op when frozen)
    pub fn set_data(&self, key: PropKey, value: Value) {
        if self.frozen.get() {
            return;
        }
        self.props.borrow_mut().insert(key, Property::Data(value));
    }
}

/// Class instance: typed backing slots for declared properties, extras
/// for everything assigned past the declaration, and a private-field
/// table keyed by the declaring class's identity.
pub struct InstanceData {
    /// The instance's class
    pub class: Rc<RuntimeClass>,
    /// Backing slots for declared properties (superclass slots first)
    pub slots: RefCell<Vec<Value>>,
    /// Dynamically added properties
    pub extras: RefCell<IndexMap<PropKey, Value>>,
    /// Private fields, keyed by (declaring class identity, name)
    pub privates: RefCell<FxHashMap<(usize, Rc<str>), Value>>,
}

impl std::fmt::Debug for InstanceData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Instance({})", self.class.name)
    }
}

impl InstanceData {
    /// Allocate an instance of `class` with all slots undefined
    pub fn new(class: Rc<RuntimeClass>) -> Self {
        let slots = vec![Value::Undefined; class.total_slots as usize];
        Self {
            class,
            slots: RefCell::new(slots),
            extras: RefCell::new(IndexMap::new()),
            privates: RefCell::new(FxHashMap::default()),
        }
    }
}

// ============================================================================
// Callables and classes
// ============================================================================

/// A callable value. Functions are objects in JS; the `props` table
/// carries statics hung off builtin constructors (`Promise.all`,
/// `Buffer.from`) and anything user code assigns.
pub struct FunctionData {
    /// Function name (reassignable for inferred names)
    pub name: RefCell<Rc<str>>,
    /// Implementation
    pub kind: FnKind,
    /// Properties attached to the function object
    pub props: RefCell<IndexMap<Rc<str>, Value>>,
}

impl std::fmt::Debug for FunctionData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Function({})", self.name.borrow())
    }
}

/// Callable implementation kinds
pub enum FnKind {
    /// Compiled bytecode closure
    Bytecode(Rc<Closure>),
    /// Native Rust function
    Native(NativeFn),
    /// `Function.prototype.bind` result. Re-binding keeps the innermost
    /// `this`; argument lists concatenate outermost-first.
    Bound {
        /// The wrapped callable
        target: Value,
        /// Bound receiver (first binding wins)
        this: Value,
        /// Partially applied arguments
        args: Vec<Value>,
    },
}

/// A bytecode closure: a function index paired with its captured cells
pub struct Closure {
    /// The instantiated module the function belongs to
    pub module: Rc<ModuleCtx>,
    /// Function index within the module
    pub function: u32,
    /// Captured upvalue cells
    pub upvalues: Vec<UpvalueCell>,
    /// Lexically captured `this` (arrow functions)
    pub captured_this: Option<Value>,
    /// Declaring class (methods; resolves `super`)
    pub home_class: Option<Rc<RuntimeClass>>,
}

impl Closure {
    /// The function's bytecode
    pub fn function_def(&self) -> &sable_bytecode::Function {
        &self.module.module.functions[self.function as usize]
    }
}

/// A method slot on a runtime class
#[derive(Clone)]
pub struct MethodSlot {
    /// Method name
    pub name: Rc<str>,
    /// Plain method or accessor half
    pub kind: sable_bytecode::MethodKind,
    /// The bound closure value
    pub func: Value,
}

/// A class instantiated in some frame: metadata from the module class
/// table plus method closures bound over that frame's environment.
pub struct RuntimeClass {
    /// Qualified name
    pub name: Rc<str>,
    /// Module the class was compiled in
    pub module: Rc<ModuleCtx>,
    /// Index into the module class table
    pub class_index: u32,
    /// Superclass, if any
    pub parent: Option<Rc<RuntimeClass>>,
    /// Slot index where this class's own declared properties begin
    pub slot_offset: u16,
    /// Total slots including inherited
    pub total_slots: u16,
    /// Declared-property layout: name → slot (inherited included)
    pub layout: FxHashMap<Rc<str>, u16>,
    /// Constructor closure, if declared (filled after construction:
    /// method closures reference their declaring class)
    pub constructor: RefCell<Option<Value>>,
    /// Instance methods/accessors, in class-table order
    pub methods: RefCell<Vec<MethodSlot>>,
    /// Private instance methods
    pub private_methods: RefCell<Vec<MethodSlot>>,
    /// Static members (methods at bind time, fields as initialized)
    pub statics: RefCell<IndexMap<Rc<str>, Value>>,
}

impl std::fmt::Debug for RuntimeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Class({})", self.name)
    }
}

impl RuntimeClass {
    /// Identity used for private-member scoping
    pub fn identity(self: &Rc<Self>) -> usize {
        Rc::as_ptr(self) as usize
    }

    /// Walk the superclass chain for an instance method
    pub fn resolve_method(&self, name: &str) -> Option<MethodSlot> {
        let found = self
            .methods
            .borrow()
            .iter()
            .find(|m| m.kind == sable_bytecode::MethodKind::Method && &*m.name == name)
            .cloned();
        match found {
            Some(m) => Some(m),
            None => self.parent.as_deref().and_then(|p| p.resolve_method(name)),
        }
    }

    /// Walk the superclass chain for an accessor
    pub fn resolve_accessor(
        &self,
        name: &str,
        kind: sable_bytecode::MethodKind,
    ) -> Option<MethodSlot> {
        let found = self
            .methods
            .borrow()
            .iter()
            .find(|m| m.kind == kind && &*m.name == name)
            .cloned();
        match found {
            Some(m) => Some(m),
            None => self
                .parent
                .as_deref()
                .and_then(|p| p.resolve_accessor(name, kind)),
        }
    }

    /// Walk the superclass chain for a constructor to run on `new`
    pub fn resolve_constructor(&self) -> Option<Value> {
        if let Some(ctor) = self.constructor.borrow().clone() {
            return Some(ctor);
        }
        self.parent.as_deref().and_then(|p| p.resolve_constructor())
    }

    /// Slot of a declared property (inherited included)
    pub fn slot_of(&self, name: &str) -> Option<u16> {
        self.layout.get(name).copied()
    }

    /// Whether `self` is `other` or a subclass of it
    pub fn extends(self: &Rc<Self>, other: &Rc<RuntimeClass>) -> bool {
        let mut current = Some(self.clone());
        while let Some(c) = current {
            if Rc::ptr_eq(&c, other) {
                return true;
            }
            current = c.parent.clone();
        }
        false
    }
}

// ============================================================================
// Wrapper types
// ============================================================================

/// Date wrapper
#[derive(Debug)]
pub struct DateData {
    /// Milliseconds since the Unix epoch
    pub millis: Cell<f64>,
}

/// Regular expression handle
pub struct RegexData {
    /// Source pattern
    pub pattern: Rc<str>,
    /// Flags string
    pub flags: Rc<str>,
    /// Compiled engine regex
    pub regex: regress::Regex,
    /// `lastIndex` for sticky/global matching
    pub last_index: Cell<usize>,
}

impl std::fmt::Debug for RegexData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}/{}", self.pattern, self.flags)
    }
}

impl RegexData {
    /// Compile a pattern with flags
    pub fn compile(pattern: &str, flags: &str) -> VmResult<Self> {
        let regex = regress::Regex::with_flags(pattern, flags)
            .map_err(|e| VmError::Syntax(format!("Invalid regular expression: {e}")))?;
        Ok(Self {
            pattern: pattern.into(),
            flags: flags.into(),
            regex,
            last_index: Cell::new(0),
        })
    }
}

/// Byte buffer
#[derive(Debug, Default)]
pub struct BufferData {
    /// Raw bytes
    pub bytes: RefCell<Vec<u8>>,
}

// ============================================================================
// Map / Set (SameValueZero keys, insertion order)
// ============================================================================

/// A hashable wrapper implementing SameValueZero equality: NaN equals
/// NaN, +0 equals -0, heap values compare by identity.
#[derive(Debug, Clone)]
pub struct ValueKey(pub Value);

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => {
                (a.is_nan() && b.is_nan()) || a == b // +0 == -0 via f64 eq
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a.id == b.id,
            _ => self.0.same_reference(&other.0),
        }
    }
}

impl Eq for ValueKey {}

impl std::hash::Hash for ValueKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match &self.0 {
            Value::Undefined => 0u8.hash(state),
            Value::Null => 1u8.hash(state),
            Value::Bool(b) => (2u8, b).hash(state),
            Value::Number(n) => {
                let canonical = if n.is_nan() {
                    f64::NAN.to_bits()
                } else if *n == 0.0 {
                    0u64
                } else {
                    n.to_bits()
                };
                (3u8, canonical).hash(state);
            }
            Value::Str(s) => (4u8, s).hash(state),
            Value::BigInt(b) => (5u8, b).hash(state),
            Value::Symbol(s) => (6u8, s.id).hash(state),
            other => (7u8, heap_identity(other)).hash(state),
        }
    }
}

fn heap_identity(v: &Value) -> usize {
    match v {
        Value::Array(r) => Rc::as_ptr(r) as usize,
        Value::Object(r) => Rc::as_ptr(r) as usize,
        Value::Instance(r) => Rc::as_ptr(r) as usize,
        Value::Function(r) => Rc::as_ptr(r) as usize,
        Value::Class(r) => Rc::as_ptr(r) as usize,
        Value::Promise(r) => Rc::as_ptr(r) as usize,
        Value::Generator(r) => Rc::as_ptr(r) as usize,
        Value::Date(r) => Rc::as_ptr(r) as usize,
        Value::Regex(r) => Rc::as_ptr(r) as usize,
        Value::Buffer(r) => Rc::as_ptr(r) as usize,
        Value::Map(r) => Rc::as_ptr(r) as usize,
        Value::Set(r) => Rc::as_ptr(r) as usize,
        Value::WeakMap(r) => Rc::as_ptr(r) as usize,
        Value::WeakSet(r) => Rc::as_ptr(r) as usize,
        Value::Host(r) => Rc::as_ptr(r).cast::<()>() as usize,
        _ => 0,
    }
}

/// Map backing storage: insertion-ordered entries
#[derive(Debug, Default)]
pub struct MapData {
    /// Entries in insertion order
    pub entries: RefCell<IndexMap<ValueKey, Value>>,
}

impl MapData {
    /// Live entry count
    pub fn size(&self) -> usize {
        self.entries.borrow().len()
    }
}

/// Set backing storage: insertion-ordered members
#[derive(Debug, Default)]
pub struct SetData {
    /// Members in insertion order
    pub entries: RefCell<IndexMap<ValueKey, ()>>,
}

impl SetData {
    /// Live member count
    pub fn size(&self) -> usize {
        self.entries.borrow().len()
    }
}

/// A weakly held map key. Upgrade fails once the referent is gone.
#[derive(Clone)]
pub enum WeakRef {
    /// Plain object key
    Object(Weak<ObjectData>),
    /// Class instance key
    Instance(Weak<InstanceData>),
    /// Array key
    Array(Weak<ArrayData>),
    /// Function key
    Function(Weak<FunctionData>),
}

impl WeakRef {
    /// Downgrade a value into a weak key; `None` for non-object values
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Object(o) => Some(Self::Object(Rc::downgrade(o))),
            Value::Instance(i) => Some(Self::Instance(Rc::downgrade(i))),
            Value::Array(a) => Some(Self::Array(Rc::downgrade(a))),
            Value::Function(f) => Some(Self::Function(Rc::downgrade(f))),
            _ => None,
        }
    }

    /// Whether this weak key still refers to `value`
    pub fn refers_to(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Object(w), Value::Object(o)) => {
                w.upgrade().is_some_and(|u| Rc::ptr_eq(&u, o))
            }
            (Self::Instance(w), Value::Instance(i)) => {
                w.upgrade().is_some_and(|u| Rc::ptr_eq(&u, i))
            }
            (Self::Array(w), Value::Array(a)) => w.upgrade().is_some_and(|u| Rc::ptr_eq(&u, a)),
            (Self::Function(w), Value::Function(f)) => {
                w.upgrade().is_some_and(|u| Rc::ptr_eq(&u, f))
            }
            _ => false,
        }
    }

    /// Whether the referent is still alive
    pub fn alive(&self) -> bool {
        match self {
            Self::Object(w) => w.strong_count() > 0,
            Self::Instance(w) => w.strong_count() > 0,
            Self::Array(w) => w.strong_count() > 0,
            Self::Function(w) => w.strong_count() > 0,
        }
    }
}

/// WeakMap backing storage
#[derive(Default)]
pub struct WeakMapData {
    /// (weak key, value) pairs; dead keys are swept lazily
    pub entries: RefCell<Vec<(WeakRef, Value)>>,
}

/// WeakSet backing storage
#[derive(Default)]
pub struct WeakSetData {
    /// Weak members; dead entries are swept lazily
    pub entries: RefCell<Vec<WeakRef>>,
}

// ============================================================================
// Host objects
// ============================================================================

/// An opaque host object: the interop arm of the value universe.
pub trait HostObject {
    /// Class name shown in diagnostics
    fn class_name(&self) -> &'static str;

    /// Downcast support
    fn as_any(&self) -> &dyn std::any::Any;

    /// Property read; `None` falls through to undefined
    fn get(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Method invocation. `this` is the receiver value wrapping `self`,
    /// for methods that return the receiver (chaining).
    fn call_method(&self, vm: &mut Vm, this: &Value, name: &str, args: &[Value])
    -> VmResult<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Undefined.to_boolean());
        assert!(!Value::Null.to_boolean());
        assert!(!Value::Number(0.0).to_boolean());
        assert!(!Value::Number(f64::NAN).to_boolean());
        assert!(!Value::str("").to_boolean());
        assert!(Value::str("x").to_boolean());
        assert!(Value::Number(-1.0).to_boolean());
        assert!(Value::array(vec![]).to_boolean());
    }

    #[test]
    fn typeof_strings() {
        assert_eq!(Value::Undefined.type_of(), "undefined");
        assert_eq!(Value::Null.type_of(), "object");
        assert_eq!(Value::Number(1.0).type_of(), "number");
        assert_eq!(Value::str("s").type_of(), "string");
        assert_eq!(Value::array(vec![]).type_of(), "object");
    }

    #[test]
    fn same_value_zero_keys() {
        let nan1 = ValueKey(Value::Number(f64::NAN));
        let nan2 = ValueKey(Value::Number(f64::NAN));
        assert_eq!(nan1, nan2);

        let pos = ValueKey(Value::Number(0.0));
        let neg = ValueKey(Value::Number(-0.0));
        assert_eq!(pos, neg);

        let a = Value::array(vec![]);
        let b = Value::array(vec![]);
        assert_ne!(ValueKey(a.clone()), ValueKey(b));
        assert_eq!(ValueKey(a.clone()), ValueKey(a));
    }

    #[test]
    fn upvalue_cells_share_writes() {
        let cell = UpvalueCell::new(Value::Number(1.0));
        let alias = cell.clone();
        alias.set(Value::Number(2.0));
        assert_eq!(cell.get().as_number(), Some(2.0));
    }

    #[test]
    fn symbol_registry_interning() {
        let reg = SymbolRegistry::default();
        let a = reg.intern("k".into());
        let b = reg.intern("k".into());
        assert_eq!(a.id, b.id);
        let c = reg.create(Some("k".into()));
        assert_ne!(a.id, c.id);
        assert_eq!(reg.key_for(&a).as_deref(), Some("k"));
        assert_eq!(reg.key_for(&c), None);
    }
}
