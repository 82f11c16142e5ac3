//! Runtime helper operations invoked from emitted code.
//!
//! Every helper has a stable contract: emitted instructions call these
//! without knowledge of their internals. Helpers never read global
//! mutable state beyond the symbol registry and the undefined singleton.

use std::cell::RefCell;
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use crate::error::{VmError, VmResult};
use crate::number;
use crate::value::{InstanceData, PropKey, Property, Value};
use crate::vm::Vm;

/// Maximum depth for nested array stringification
const STRINGIFY_DEPTH: usize = 8;

// ============================================================================
// Arithmetic & coercion
// ============================================================================

/// `a + b`: string concatenation if either side is string-like after
/// ToPrimitive, otherwise numeric addition with NaN propagation.
pub fn add(vm: &mut Vm, a: &Value, b: &Value) -> VmResult<Value> {
    if let (Value::BigInt(x), Value::BigInt(y)) = (a, b) {
        return Ok(Value::BigInt(Rc::new((**x).clone() + (**y).clone())));
    }
    let concat = matches!(a, Value::Str(_) | Value::Array(_) | Value::Object(_) | Value::Instance(_))
        || matches!(b, Value::Str(_) | Value::Array(_) | Value::Object(_) | Value::Instance(_));
    if concat {
        let left = stringify(vm, a)?;
        let right = stringify(vm, b)?;
        let mut s = String::with_capacity(left.len() + right.len());
        s.push_str(&left);
        s.push_str(&right);
        return Ok(Value::str(s));
    }
    Ok(Value::Number(to_number(vm, a)? + to_number(vm, b)?))
}

/// `a - b`
pub fn sub(vm: &mut Vm, a: &Value, b: &Value) -> VmResult<Value> {
    if let (Value::BigInt(x), Value::BigInt(y)) = (a, b) {
        return Ok(Value::BigInt(Rc::new((**x).clone() - (**y).clone())));
    }
    Ok(Value::Number(to_number(vm, a)? - to_number(vm, b)?))
}

/// `a * b`
pub fn mul(vm: &mut Vm, a: &Value, b: &Value) -> VmResult<Value> {
    if let (Value::BigInt(x), Value::BigInt(y)) = (a, b) {
        return Ok(Value::BigInt(Rc::new((**x).clone() * (**y).clone())));
    }
    Ok(Value::Number(to_number(vm, a)? * to_number(vm, b)?))
}

/// `a / b`
pub fn div(vm: &mut Vm, a: &Value, b: &Value) -> VmResult<Value> {
    if let (Value::BigInt(x), Value::BigInt(y)) = (a, b) {
        if y.is_zero() {
            return Err(VmError::range_error("Division by zero"));
        }
        return Ok(Value::BigInt(Rc::new((**x).clone() / (**y).clone())));
    }
    Ok(Value::Number(to_number(vm, a)? / to_number(vm, b)?))
}

/// `a % b`
pub fn rem(vm: &mut Vm, a: &Value, b: &Value) -> VmResult<Value> {
    if let (Value::BigInt(x), Value::BigInt(y)) = (a, b) {
        if y.is_zero() {
            return Err(VmError::range_error("Division by zero"));
        }
        return Ok(Value::BigInt(Rc::new((**x).clone() % (**y).clone())));
    }
    Ok(Value::Number(to_number(vm, a)? % to_number(vm, b)?))
}

/// `a ** b`
pub fn pow(vm: &mut Vm, a: &Value, b: &Value) -> VmResult<Value> {
    if let (Value::BigInt(x), Value::BigInt(y)) = (a, b) {
        let exp = y
            .to_u32()
            .ok_or_else(|| VmError::range_error("Exponent must be non-negative"))?;
        return Ok(Value::BigInt(Rc::new(x.pow(exp))));
    }
    Ok(Value::Number(to_number(vm, a)?.powf(to_number(vm, b)?)))
}

/// Unary `-`
pub fn neg(vm: &mut Vm, v: &Value) -> VmResult<Value> {
    if let Value::BigInt(x) = v {
        return Ok(Value::BigInt(Rc::new(-(**x).clone())));
    }
    Ok(Value::Number(-to_number(vm, v)?))
}

/// `ToDouble`: numeric coercion
pub fn to_number(vm: &mut Vm, v: &Value) -> VmResult<f64> {
    match v {
        Value::Undefined => Ok(f64::NAN),
        Value::Null => Ok(0.0),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => Ok(*n),
        Value::Str(s) => Ok(number::parse_js_number(s)),
        Value::BigInt(_) => Err(VmError::type_error("Cannot convert a BigInt to a number")),
        Value::Symbol(_) => Err(VmError::type_error("Cannot convert a Symbol to a number")),
        Value::Date(d) => Ok(d.millis.get()),
        Value::Array(a) => {
            // ToPrimitive on arrays joins; [] -> 0, [n] -> n, else NaN
            let elements = a.elements.borrow();
            match elements.len() {
                0 => Ok(0.0),
                1 => {
                    let first = elements[0].clone();
                    drop(elements);
                    to_number(vm, &first)
                }
                _ => Ok(f64::NAN),
            }
        }
        _ => Ok(f64::NAN),
    }
}

/// `Stringify`: JS-compatible string conversion
pub fn stringify(vm: &mut Vm, v: &Value) -> VmResult<Rc<str>> {
    stringify_depth(vm, v, 0)
}

fn stringify_depth(vm: &mut Vm, v: &Value, depth: usize) -> VmResult<Rc<str>> {
    Ok(match v {
        Value::Undefined => "undefined".into(),
        Value::Null => "null".into(),
        Value::Bool(b) => if *b { "true" } else { "false" }.into(),
        Value::Number(n) => number::to_js_string(*n).into(),
        Value::BigInt(b) => b.to_string().into(),
        Value::Str(s) => s.clone(),
        Value::Symbol(s) => match &s.description {
            Some(d) => format!("Symbol({d})").into(),
            None => "Symbol()".into(),
        },
        Value::Array(a) => {
            if depth >= STRINGIFY_DEPTH {
                return Ok("[...]".into());
            }
            let elements: Vec<Value> = a.elements.borrow().clone();
            let mut out = String::from("[");
            for (i, el) in elements.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&stringify_depth(vm, el, depth + 1)?);
            }
            out.push(']');
            out.into()
        }
        Value::Object(o) => {
            // An own callable `toString` wins over the default form
            if let Some(Property::Data(f)) =
                o.props.borrow().get(&PropKey::str("toString")).cloned()
                && f.is_callable()
            {
                let result = vm.call_value(&f, v.clone(), &[])?;
                return stringify_depth(vm, &result, depth + 1);
            }
            "[object Object]".into()
        }
        Value::Instance(inst) => {
            if let Some(method) = inst.class.resolve_method("toString") {
                let f = method.func.clone();
                let result = vm.call_value(&f, v.clone(), &[])?;
                return stringify_depth(vm, &result, depth + 1);
            }
            "[object Object]".into()
        }
        Value::Function(f) => format!("[Function: {}]", f.name.borrow()).into(),
        Value::Class(c) => format!("[class {}]", c.name).into(),
        Value::Promise(_) => "[object Promise]".into(),
        Value::Generator(_) => "[object Generator]".into(),
        Value::Date(d) => crate::intrinsics::date::to_iso_string(d.millis.get())
            .unwrap_or_else(|| "Invalid Date".to_string())
            .into(),
        Value::Regex(r) => format!("/{}/{}", r.pattern, r.flags).into(),
        Value::Buffer(b) => {
            let bytes = b.bytes.borrow();
            String::from_utf8_lossy(&bytes).into_owned().into()
        }
        Value::Map(_) => "[object Map]".into(),
        Value::Set(_) => "[object Set]".into(),
        Value::WeakMap(_) => "[object WeakMap]".into(),
        Value::WeakSet(_) => "[object WeakSet]".into(),
        Value::Host(h) => format!("[object {}]", h.class_name()).into(),
    })
}

// ============================================================================
// Equality
// ============================================================================

/// Strict equality: `NaN ≠ NaN`, `+0 === -0`, reference equality for
/// heap values, byte equality for strings.
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::BigInt(x), Value::BigInt(y)) => x == y,
        (Value::Symbol(x), Value::Symbol(y)) => x.id == y.id,
        _ => a.same_reference(b),
    }
}

/// Loose equality (`==`)
pub fn loose_equals(vm: &mut Vm, a: &Value, b: &Value) -> VmResult<bool> {
    if std::mem::discriminant(a) == std::mem::discriminant(b) {
        return Ok(strict_equals(a, b));
    }
    Ok(match (a, b) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Number(x), Value::Str(s)) | (Value::Str(s), Value::Number(x)) => {
            *x == number::parse_js_number(s)
        }
        (Value::Bool(_), other) => {
            let lhs = to_number(vm, a)?;
            let rhs = to_number(vm, other)?;
            lhs == rhs
        }
        (other, Value::Bool(_)) => {
            let lhs = to_number(vm, other)?;
            let rhs = to_number(vm, b)?;
            lhs == rhs
        }
        (Value::BigInt(x), Value::Number(n)) | (Value::Number(n), Value::BigInt(x)) => x
            .to_f64()
            .map(|f| f == *n)
            .unwrap_or(false),
        (Value::Array(_) | Value::Object(_), Value::Str(_) | Value::Number(_)) => {
            let prim = stringify(vm, a)?;
            loose_equals(vm, &Value::Str(prim), b)?
        }
        (Value::Str(_) | Value::Number(_), Value::Array(_) | Value::Object(_)) => {
            let prim = stringify(vm, b)?;
            loose_equals(vm, a, &Value::Str(prim))?
        }
        _ => false,
    })
}

/// Relational comparison result selector
#[derive(Debug, Clone, Copy)]
pub enum CompareOp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// `<`, `<=`, `>`, `>=`: lexicographic for two strings, numeric otherwise
/// (false on NaN).
pub fn compare(vm: &mut Vm, op: CompareOp, a: &Value, b: &Value) -> VmResult<bool> {
    if let (Value::Str(x), Value::Str(y)) = (a, b) {
        return Ok(match op {
            CompareOp::Lt => x < y,
            CompareOp::Le => x <= y,
            CompareOp::Gt => x > y,
            CompareOp::Ge => x >= y,
        });
    }
    if let (Value::BigInt(x), Value::BigInt(y)) = (a, b) {
        return Ok(match op {
            CompareOp::Lt => x < y,
            CompareOp::Le => x <= y,
            CompareOp::Gt => x > y,
            CompareOp::Ge => x >= y,
        });
    }
    let x = to_number(vm, a)?;
    let y = to_number(vm, b)?;
    Ok(match op {
        CompareOp::Lt => x < y,
        CompareOp::Le => x <= y,
        CompareOp::Gt => x > y,
        CompareOp::Ge => x >= y,
    })
}

// ============================================================================
// Bitwise
// ============================================================================

/// Binary bitwise / shift operations over ToInt32 operands
pub fn bitwise(vm: &mut Vm, op: BitOp, a: &Value, b: &Value) -> VmResult<Value> {
    let x = number::to_int32(to_number(vm, a)?);
    let y = number::to_int32(to_number(vm, b)?);
    let result = match op {
        BitOp::And => x & y,
        BitOp::Or => x | y,
        BitOp::Xor => x ^ y,
        BitOp::Shl => x.wrapping_shl(y as u32 & 31),
        BitOp::Shr => x.wrapping_shr(y as u32 & 31),
        BitOp::Ushr => {
            let u = number::to_uint32(to_number(vm, a)?);
            return Ok(Value::Number(u.wrapping_shr(y as u32 & 31) as f64));
        }
    };
    Ok(Value::Number(result as f64))
}

/// Bitwise operator selector
#[derive(Debug, Clone, Copy)]
#[allow(missing_docs)]
pub enum BitOp {
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

// ============================================================================
// Property access
// ============================================================================

/// `GetProperty(obj, name)`: dispatch on the concrete kind of the
/// receiver. Declared class property → typed backing slot; instance
/// extras → mapping lookup; built-in wrapper → accessor; string/array
/// `.length` → count; otherwise `undefined`.
pub fn get_property(vm: &mut Vm, obj: &Value, name: &str) -> VmResult<Value> {
    match obj {
        Value::Undefined | Value::Null => Err(VmError::type_error(format!(
            "Cannot read properties of {} (reading '{name}')",
            obj.type_of_nullish()
        ))),
        Value::Instance(inst) => get_instance_property(vm, obj, inst, name),
        Value::Object(o) => {
            let prop = o.props.borrow().get(&PropKey::str(name)).cloned();
            match prop {
                Some(Property::Data(v)) => Ok(v),
                Some(Property::Accessor { get: Some(g), .. }) => vm.call_value(&g, obj.clone(), &[]),
                Some(Property::Accessor { .. }) => Ok(Value::Undefined),
                None => Ok(builtin_member(obj, name)),
            }
        }
        Value::Array(a) => {
            if name == "length" {
                return Ok(Value::Number(a.len() as f64));
            }
            if let Ok(idx) = name.parse::<usize>() {
                return Ok(a.get(idx));
            }
            if let Some(v) = a.props.borrow().get(&PropKey::str(name)) {
                return Ok(v.clone());
            }
            Ok(builtin_member(obj, name))
        }
        Value::Str(s) => {
            if name == "length" {
                return Ok(Value::Number(s.chars().count() as f64));
            }
            if let Ok(idx) = name.parse::<usize>() {
                return Ok(s
                    .chars()
                    .nth(idx)
                    .map(|c| Value::str(c.to_string()))
                    .unwrap_or(Value::Undefined));
            }
            Ok(builtin_member(obj, name))
        }
        Value::Function(f) => {
            if let Some(v) = f.props.borrow().get(name) {
                return Ok(v.clone());
            }
            match name {
                "name" => Ok(Value::Str(f.name.borrow().clone())),
                "length" => Ok(Value::Number(vm.function_arity(f) as f64)),
                "call" => Ok(Value::native("call", |vm, this, args| {
                    let target_this = args.first().cloned().unwrap_or(Value::Undefined);
                    let rest = args.get(1..).unwrap_or(&[]);
                    vm.call_value(this, target_this, rest)
                })),
                "apply" => Ok(Value::native("apply", |vm, this, args| {
                    let target_this = args.first().cloned().unwrap_or(Value::Undefined);
                    let call_args = match args.get(1) {
                        Some(Value::Array(a)) => a.elements.borrow().clone(),
                        Some(Value::Undefined | Value::Null) | None => Vec::new(),
                        Some(other) => {
                            return Err(VmError::type_error(format!(
                                "CreateListFromArrayLike called on {}",
                                other.type_of()
                            )));
                        }
                    };
                    vm.call_value(this, target_this, &call_args)
                })),
                "bind" => Ok(Value::native("bind", |_vm, this, args| {
                    let bound_this = args.first().cloned().unwrap_or(Value::Undefined);
                    let bound_args = args.get(1..).unwrap_or(&[]).to_vec();
                    Ok(Value::Function(Rc::new(crate::value::FunctionData {
                        name: RefCell::new("bound".into()),
                        kind: crate::value::FnKind::Bound {
                            target: this.clone(),
                            this: bound_this,
                            args: bound_args,
                        },
                        props: RefCell::new(indexmap::IndexMap::new()),
                    })))
                })),
                _ => Ok(builtin_member(obj, name)),
            }
        }
        Value::Class(c) => {
            if name == "name" {
                return Ok(Value::Str(c.name.clone()));
            }
            if let Some(v) = c.statics.borrow().get(name) {
                return Ok(v.clone());
            }
            // Inherited statics
            let mut parent = c.parent.clone();
            while let Some(p) = parent {
                if let Some(v) = p.statics.borrow().get(name) {
                    return Ok(v.clone());
                }
                parent = p.parent.clone();
            }
            Ok(Value::Undefined)
        }
        Value::Map(m) => {
            if name == "size" {
                return Ok(Value::Number(m.size() as f64));
            }
            Ok(builtin_member(obj, name))
        }
        Value::Set(s) => {
            if name == "size" {
                return Ok(Value::Number(s.size() as f64));
            }
            Ok(builtin_member(obj, name))
        }
        Value::Buffer(b) => {
            if name == "length" {
                return Ok(Value::Number(b.bytes.borrow().len() as f64));
            }
            if let Ok(idx) = name.parse::<usize>() {
                return Ok(b
                    .bytes
                    .borrow()
                    .get(idx)
                    .map(|byte| Value::Number(*byte as f64))
                    .unwrap_or(Value::Undefined));
            }
            Ok(builtin_member(obj, name))
        }
        Value::Regex(r) => match name {
            "source" => Ok(Value::Str(r.pattern.clone())),
            "flags" => Ok(Value::Str(r.flags.clone())),
            "global" => Ok(Value::Bool(r.flags.contains('g'))),
            "lastIndex" => Ok(Value::Number(r.last_index.get() as f64)),
            _ => Ok(builtin_member(obj, name)),
        },
        Value::Symbol(s) => match name {
            "description" => Ok(s
                .description
                .clone()
                .map(Value::Str)
                .unwrap_or(Value::Undefined)),
            _ => Ok(Value::Undefined),
        },
        Value::Host(h) => {
            if let Some(v) = h.get(name) {
                return Ok(v);
            }
            Ok(builtin_member(obj, name))
        }
        _ => Ok(builtin_member(obj, name)),
    }
}

impl Value {
    fn type_of_nullish(&self) -> &'static str {
        if self.is_null() { "null" } else { "undefined" }
    }
}

fn get_instance_property(
    vm: &mut Vm,
    receiver: &Value,
    inst: &Rc<InstanceData>,
    name: &str,
) -> VmResult<Value> {
    if let Some(slot) = inst.class.slot_of(name) {
        return Ok(inst.slots.borrow()[slot as usize].clone());
    }
    if let Some(v) = inst.extras.borrow().get(&PropKey::str(name)) {
        return Ok(v.clone());
    }
    if let Some(getter) = inst
        .class
        .resolve_accessor(name, sable_bytecode::MethodKind::Getter)
    {
        let f = getter.func.clone();
        return vm.call_value(&f, receiver.clone(), &[]);
    }
    if let Some(method) = inst.class.resolve_method(name) {
        return Ok(method.func.clone());
    }
    Ok(Value::Undefined)
}

/// A builtin method surfaced as a first-class value. Shares its
/// implementation with the strategy-emitted fast path.
fn builtin_member(receiver: &Value, name: &str) -> Value {
    let Some(op) = crate::intrinsics::method_intrinsic(receiver, name) else {
        return Value::Undefined;
    };
    Value::native(name, move |vm, this, args| {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(this.clone());
        full.extend_from_slice(args);
        crate::intrinsics::invoke(vm, op, &full)
    })
}

/// `SetProperty(obj, name, value)`
pub fn set_property(vm: &mut Vm, obj: &Value, name: &str, value: Value) -> VmResult<()> {
    match obj {
        Value::Undefined | Value::Null => Err(VmError::type_error(format!(
            "Cannot set properties of {} (setting '{name}')",
            obj.type_of_nullish()
        ))),
        Value::Instance(inst) => {
            if let Some(slot) = inst.class.slot_of(name) {
                inst.slots.borrow_mut()[slot as usize] = value;
                return Ok(());
            }
            if let Some(setter) = inst
                .class
                .resolve_accessor(name, sable_bytecode::MethodKind::Setter)
            {
                let f = setter.func.clone();
                vm.call_value(&f, obj.clone(), &[value])?;
                return Ok(());
            }
            inst.extras.borrow_mut().insert(PropKey::str(name), value);
            Ok(())
        }
        Value::Object(o) => {
            let accessor = match o.props.borrow().get(&PropKey::str(name)) {
                Some(Property::Accessor { set, .. }) => set.clone(),
                _ => None,
            };
            if let Some(setter) = accessor {
                vm.call_value(&setter, obj.clone(), &[value])?;
                return Ok(());
            }
            o.set_data(PropKey::str(name), value);
            Ok(())
        }
        Value::Array(a) => {
            if name == "length" {
                let new_len = to_number(vm, &value)? as usize;
                a.elements.borrow_mut().resize(new_len, Value::Undefined);
                return Ok(());
            }
            match name.parse::<usize>() {
                Ok(idx) => set_array_index(a, idx, value),
                Err(_) => {
                    a.props.borrow_mut().insert(PropKey::str(name), value);
                }
            }
            Ok(())
        }
        Value::Class(c) => {
            c.statics.borrow_mut().insert(name.into(), value);
            Ok(())
        }
        Value::Function(f) => {
            f.props.borrow_mut().insert(name.into(), value);
            Ok(())
        }
        Value::Regex(r) => {
            if name == "lastIndex" {
                r.last_index.set(to_number(vm, &value)? as usize);
            }
            Ok(())
        }
        // Writes to other primitives/wrappers silently no-op
        _ => Ok(()),
    }
}

fn set_array_index(a: &Rc<crate::value::ArrayData>, idx: usize, value: Value) {
    let mut elements = a.elements.borrow_mut();
    if idx < elements.len() {
        elements[idx] = value;
    } else {
        elements.resize(idx, Value::Undefined);
        elements.push(value);
    }
}

/// `GetIndex(obj, index)`
pub fn get_index(vm: &mut Vm, obj: &Value, key: &Value) -> VmResult<Value> {
    match (obj, key) {
        (Value::Array(a), Value::Number(n)) => {
            if n.fract() != 0.0 || *n < 0.0 {
                return Ok(Value::Undefined);
            }
            Ok(a.get(*n as usize))
        }
        (Value::Str(s), Value::Number(n)) => {
            if n.fract() != 0.0 || *n < 0.0 {
                return Ok(Value::Undefined);
            }
            Ok(s.chars()
                .nth(*n as usize)
                .map(|c| Value::str(c.to_string()))
                .unwrap_or(Value::Undefined))
        }
        (Value::Buffer(b), Value::Number(n)) => Ok(b
            .bytes
            .borrow()
            .get(*n as usize)
            .map(|byte| Value::Number(*byte as f64))
            .unwrap_or(Value::Undefined)),
        (Value::Object(o), Value::Symbol(s)) => {
            Ok(o.get_data(&PropKey::Sym(s.id)).unwrap_or(Value::Undefined))
        }
        (Value::Instance(inst), Value::Symbol(s)) => Ok(inst
            .extras
            .borrow()
            .get(&PropKey::Sym(s.id))
            .cloned()
            .unwrap_or(Value::Undefined)),
        _ => {
            let name = stringify(vm, key)?;
            get_property(vm, obj, &name)
        }
    }
}

/// `SetIndex(obj, index, value)`
pub fn set_index(vm: &mut Vm, obj: &Value, key: &Value, value: Value) -> VmResult<()> {
    match (obj, key) {
        (Value::Array(a), Value::Number(n)) => {
            if n.fract() == 0.0 && *n >= 0.0 {
                set_array_index(a, *n as usize, value);
            }
            Ok(())
        }
        (Value::Buffer(b), Value::Number(n)) => {
            let idx = *n as usize;
            let byte = to_number(vm, &value)? as i64 as u8;
            let mut bytes = b.bytes.borrow_mut();
            if idx < bytes.len() {
                bytes[idx] = byte;
            }
            Ok(())
        }
        (Value::Object(o), Value::Symbol(s)) => {
            o.set_data(PropKey::Sym(s.id), value);
            Ok(())
        }
        (Value::Instance(inst), Value::Symbol(s)) => {
            inst.extras.borrow_mut().insert(PropKey::Sym(s.id), value);
            Ok(())
        }
        _ => {
            let name = stringify(vm, key)?;
            set_property(vm, obj, &name, value)
        }
    }
}

/// `delete obj[key]`
pub fn delete_property(vm: &mut Vm, obj: &Value, key: &Value) -> VmResult<bool> {
    let name = stringify(vm, key)?;
    match obj {
        Value::Object(o) => {
            o.props.borrow_mut().shift_remove(&PropKey::Str(name));
            Ok(true)
        }
        Value::Instance(inst) => {
            inst.extras.borrow_mut().shift_remove(&PropKey::Str(name));
            Ok(true)
        }
        Value::Array(a) => {
            if let Ok(idx) = name.parse::<usize>() {
                let mut elements = a.elements.borrow_mut();
                if idx < elements.len() {
                    elements[idx] = Value::Undefined;
                }
            }
            Ok(true)
        }
        _ => Ok(true),
    }
}

// ============================================================================
// instanceof / in
// ============================================================================

/// `lhs instanceof rhs`, honoring the well-known `hasInstance` symbol on
/// object right-hand sides.
pub fn instance_of(vm: &mut Vm, lhs: &Value, rhs: &Value) -> VmResult<bool> {
    if let Value::Object(o) = rhs
        && let Some(handler) =
            o.get_data(&PropKey::Sym(crate::value::well_known::HAS_INSTANCE))
        && handler.is_callable()
    {
        let result = vm.call_value(&handler, rhs.clone(), &[lhs.clone()])?;
        return Ok(result.to_boolean());
    }

    match rhs {
        Value::Class(class) => Ok(match lhs {
            Value::Instance(inst) => inst.class.extends(class),
            _ => false,
        }),
        Value::Function(_) => Ok(vm.builtin_instance_of(lhs, rhs)),
        _ => Err(VmError::type_error(
            "Right-hand side of 'instanceof' is not callable",
        )),
    }
}

/// `key in obj`: own and inherited keys
pub fn in_op(vm: &mut Vm, key: &Value, obj: &Value) -> VmResult<bool> {
    let name = stringify(vm, key)?;
    match obj {
        Value::Object(o) => Ok(o.props.borrow().contains_key(&PropKey::Str(name))),
        Value::Instance(inst) => Ok(inst.class.slot_of(&name).is_some()
            || inst.extras.borrow().contains_key(&PropKey::Str(name.clone()))
            || inst.class.resolve_method(&name).is_some()),
        Value::Array(a) => {
            if &*name == "length" {
                return Ok(true);
            }
            Ok(name
                .parse::<usize>()
                .map(|idx| idx < a.len())
                .unwrap_or(false))
        }
        Value::Map(_) | Value::Set(_) => Ok(&*name == "size"),
        _ => Err(VmError::type_error(format!(
            "Cannot use 'in' operator to search for '{name}' in {}",
            obj.type_of()
        ))),
    }
}

/// BigInt constructor helper (`BigInt(v)`)
pub fn to_bigint(vm: &mut Vm, v: &Value) -> VmResult<Rc<BigInt>> {
    match v {
        Value::BigInt(b) => Ok(b.clone()),
        Value::Number(n) => {
            if n.fract() != 0.0 || !n.is_finite() {
                return Err(VmError::range_error(
                    "The number is not a safe integer for BigInt conversion",
                ));
            }
            Ok(Rc::new(BigInt::from(*n as i64)))
        }
        Value::Str(s) => s
            .trim()
            .parse::<BigInt>()
            .map(Rc::new)
            .map_err(|_| VmError::Syntax(format!("Cannot convert {s} to a BigInt"))),
        Value::Bool(b) => Ok(Rc::new(BigInt::from(*b as i64))),
        _ => {
            let _ = vm;
            Err(VmError::type_error("Cannot convert value to a BigInt"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;

    fn vm() -> Vm {
        Vm::for_tests()
    }

    #[test]
    fn add_concats_with_strings() {
        let mut vm = vm();
        let r = add(&mut vm, &Value::str("a"), &Value::Number(1.0)).unwrap();
        assert_eq!(r.as_str(), Some("a1"));
        let r = add(&mut vm, &Value::Number(1.0), &Value::Number(2.0)).unwrap();
        assert_eq!(r.as_number(), Some(3.0));
        let r = add(&mut vm, &Value::Undefined, &Value::Number(2.0)).unwrap();
        assert!(r.as_number().unwrap().is_nan());
    }

    #[test]
    fn strict_equality_rules() {
        assert!(!strict_equals(
            &Value::Number(f64::NAN),
            &Value::Number(f64::NAN)
        ));
        assert!(strict_equals(&Value::Number(0.0), &Value::Number(-0.0)));
        assert!(strict_equals(&Value::str("ab"), &Value::str("ab")));
        let a = Value::array(vec![]);
        assert!(strict_equals(&a, &a.clone()));
        assert!(!strict_equals(&a, &Value::array(vec![])));
        assert!(!strict_equals(&Value::Null, &Value::Undefined));
    }

    #[test]
    fn loose_equality_rules() {
        let mut vm = vm();
        assert!(loose_equals(&mut vm, &Value::Null, &Value::Undefined).unwrap());
        assert!(loose_equals(&mut vm, &Value::Number(1.0), &Value::str("1")).unwrap());
        assert!(loose_equals(&mut vm, &Value::Bool(true), &Value::Number(1.0)).unwrap());
        assert!(!loose_equals(&mut vm, &Value::Number(1.0), &Value::str("2")).unwrap());
    }

    #[test]
    fn array_length_and_index() {
        let mut vm = vm();
        let arr = Value::array(vec![Value::Number(1.0), Value::Number(2.0)]);
        let len = get_property(&mut vm, &arr, "length").unwrap();
        assert_eq!(len.as_number(), Some(2.0));

        let v = get_index(&mut vm, &arr, &Value::Number(1.0)).unwrap();
        assert_eq!(v.as_number(), Some(2.0));
        let v = get_index(&mut vm, &arr, &Value::Number(5.0)).unwrap();
        assert!(v.is_undefined());

        set_index(&mut vm, &arr, &Value::Number(3.0), Value::Number(9.0)).unwrap();
        let len = get_property(&mut vm, &arr, "length").unwrap();
        assert_eq!(len.as_number(), Some(4.0));
    }

    #[test]
    fn string_length_counts_chars() {
        let mut vm = vm();
        let s = Value::str("héllo");
        let len = get_property(&mut vm, &s, "length").unwrap();
        assert_eq!(len.as_number(), Some(5.0));
    }

    #[test]
    fn nullish_property_access_throws() {
        let mut vm = vm();
        assert!(get_property(&mut vm, &Value::Null, "x").is_err());
        assert!(get_property(&mut vm, &Value::Undefined, "x").is_err());
    }

    #[test]
    fn stringify_arrays_bracketed() {
        let mut vm = vm();
        let arr = Value::array(vec![
            Value::Number(1.0),
            Value::str("x"),
            Value::array(vec![Value::Number(2.0)]),
        ]);
        assert_eq!(&*stringify(&mut vm, &arr).unwrap(), "[1,x,[2]]");
    }

    #[test]
    fn bitwise_wraps_to_int32() {
        let mut vm = vm();
        let r = bitwise(
            &mut vm,
            BitOp::Or,
            &Value::Number(4294967296.0),
            &Value::Number(1.0),
        )
        .unwrap();
        assert_eq!(r.as_number(), Some(1.0));

        let r = bitwise(
            &mut vm,
            BitOp::Ushr,
            &Value::Number(-1.0),
            &Value::Number(0.0),
        )
        .unwrap();
        assert_eq!(r.as_number(), Some(4294967295.0));
    }
}
