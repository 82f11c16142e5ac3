//! Iterator protocol.
//!
//! `GetIterator` retrieves the iterator for a value — native fast paths
//! for the builtin containers, the well-known iterator symbol for user
//! objects — and `iterator_next` pulls one `{value, done}` record.
//! The async variant probes the async protocol first and falls back to
//! the sync iterator.

use std::cell::Cell;
use std::rc::Rc;

use crate::error::{VmError, VmResult};
use crate::machine::MachineKind;
use crate::ops;
use crate::value::{ArrayData, HostObject, PropKey, Value, well_known};
use crate::vm::Vm;

/// Native iterator over a live array (length re-read on every pull)
pub struct ArrayIter {
    arr: Rc<ArrayData>,
    idx: Cell<usize>,
}

impl HostObject for ArrayIter {
    fn class_name(&self) -> &'static str {
        "Array Iterator"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn call_method(
        &self,
        _vm: &mut Vm,
        _this: &Value,
        name: &str,
        _args: &[Value],
    ) -> VmResult<Value> {
        match name {
            "next" => Ok(iter_result(self.pull())),
            _ => Err(VmError::type_error(format!("{name} is not a function"))),
        }
    }
}

impl ArrayIter {
    fn pull(&self) -> Option<Value> {
        let i = self.idx.get();
        if i < self.arr.len() {
            self.idx.set(i + 1);
            Some(self.arr.get(i))
        } else {
            None
        }
    }
}

/// Native iterator over a snapshot of values (string chars, map/set views)
pub struct SnapshotIter {
    items: Vec<Value>,
    idx: Cell<usize>,
    name: &'static str,
}

impl HostObject for SnapshotIter {
    fn class_name(&self) -> &'static str {
        self.name
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn call_method(
        &self,
        _vm: &mut Vm,
        _this: &Value,
        name: &str,
        _args: &[Value],
    ) -> VmResult<Value> {
        match name {
            "next" => Ok(iter_result(self.pull())),
            _ => Err(VmError::type_error(format!("{name} is not a function"))),
        }
    }
}

impl SnapshotIter {
    /// Wrap a materialized item list
    pub fn new(items: Vec<Value>, name: &'static str) -> Self {
        Self {
            items,
            idx: Cell::new(0),
            name,
        }
    }

    fn pull(&self) -> Option<Value> {
        let i = self.idx.get();
        if i < self.items.len() {
            self.idx.set(i + 1);
            Some(self.items[i].clone())
        } else {
            None
        }
    }
}

fn iter_result(value: Option<Value>) -> Value {
    let obj = crate::value::ObjectData::new();
    match value {
        Some(v) => {
            obj.set_data(PropKey::str("value"), v);
            obj.set_data(PropKey::str("done"), Value::Bool(false));
        }
        None => {
            obj.set_data(PropKey::str("value"), Value::Undefined);
            obj.set_data(PropKey::str("done"), Value::Bool(true));
        }
    }
    Value::Object(Rc::new(obj))
}

/// Retrieve the iterator of `v`
pub fn get_iterator(vm: &mut Vm, v: &Value) -> VmResult<Value> {
    match v {
        Value::Array(a) => Ok(Value::Host(Rc::new(ArrayIter {
            arr: a.clone(),
            idx: Cell::new(0),
        }))),
        Value::Str(s) => {
            let items = s.chars().map(|c| Value::str(c.to_string())).collect();
            Ok(Value::Host(Rc::new(SnapshotIter::new(items, "String Iterator"))))
        }
        Value::Map(m) => {
            let items = m
                .entries
                .borrow()
                .iter()
                .map(|(k, val)| Value::array(vec![k.0.clone(), val.clone()]))
                .collect();
            Ok(Value::Host(Rc::new(SnapshotIter::new(items, "Map Iterator"))))
        }
        Value::Set(s) => {
            let items = s.entries.borrow().keys().map(|k| k.0.clone()).collect();
            Ok(Value::Host(Rc::new(SnapshotIter::new(items, "Set Iterator"))))
        }
        Value::Buffer(b) => {
            let items = b
                .bytes
                .borrow()
                .iter()
                .map(|byte| Value::Number(*byte as f64))
                .collect();
            Ok(Value::Host(Rc::new(SnapshotIter::new(items, "Buffer Iterator"))))
        }
        Value::Generator(m) => {
            if m.kind == MachineKind::AsyncGenerator {
                return Err(VmError::type_error("value is not sync iterable"));
            }
            Ok(v.clone())
        }
        Value::Host(_) => Ok(v.clone()),
        Value::Object(o) => {
            let method = o.get_data(&PropKey::Sym(well_known::ITERATOR));
            match method {
                Some(f) if f.is_callable() => vm.call_value(&f, v.clone(), &[]),
                // An object shaped like an iterator can be consumed directly
                _ if o.get_data(&PropKey::str("next")).is_some() => Ok(v.clone()),
                _ => Err(VmError::type_error("value is not iterable")),
            }
        }
        Value::Instance(inst) => {
            let method = inst.extras.borrow().get(&PropKey::Sym(well_known::ITERATOR)).cloned();
            match method {
                Some(f) if f.is_callable() => vm.call_value(&f, v.clone(), &[]),
                _ => Err(VmError::type_error("value is not iterable")),
            }
        }
        _ => Err(VmError::type_error(format!(
            "{} is not iterable",
            v.type_of()
        ))),
    }
}

/// Retrieve the async iterator of `v`, probing the async protocol first
pub fn get_async_iterator(vm: &mut Vm, v: &Value) -> VmResult<Value> {
    match v {
        Value::Generator(m) if m.kind == MachineKind::AsyncGenerator => Ok(v.clone()),
        Value::Object(o) => {
            let method = o.get_data(&PropKey::Sym(well_known::ASYNC_ITERATOR));
            match method {
                Some(f) if f.is_callable() => vm.call_value(&f, v.clone(), &[]),
                _ => get_iterator(vm, v),
            }
        }
        _ => get_iterator(vm, v),
    }
}

/// Pull one record from an iterator: `(value, done)`
pub fn iterator_next(vm: &mut Vm, iter: &Value, arg: &Value) -> VmResult<(Value, bool)> {
    match iter {
        Value::Host(h) => {
            if let Some(ai) = h.as_any().downcast_ref::<ArrayIter>() {
                return Ok(match ai.pull() {
                    Some(v) => (v, false),
                    None => (Value::Undefined, true),
                });
            }
            if let Some(si) = h.as_any().downcast_ref::<SnapshotIter>() {
                return Ok(match si.pull() {
                    Some(v) => (v, false),
                    None => (Value::Undefined, true),
                });
            }
            let result = h.call_method(vm, iter, "next", std::slice::from_ref(arg))?;
            destructure_result(vm, &result)
        }
        Value::Generator(m) => {
            let m = m.clone();
            vm.generator_next(&m, arg.clone())
        }
        Value::Object(_) | Value::Instance(_) => {
            let next = ops::get_property(vm, iter, "next")?;
            if !next.is_callable() {
                return Err(VmError::type_error("iterator.next is not a function"));
            }
            let result = vm.call_value(&next, iter.clone(), std::slice::from_ref(arg))?;
            destructure_result(vm, &result)
        }
        _ => Err(VmError::type_error("value is not an iterator")),
    }
}

fn destructure_result(vm: &mut Vm, result: &Value) -> VmResult<(Value, bool)> {
    if !matches!(result, Value::Object(_) | Value::Instance(_)) {
        return Err(VmError::type_error("iterator result is not an object"));
    }
    let value = ops::get_property(vm, result, "value")?;
    let done = ops::get_property(vm, result, "done")?.to_boolean();
    Ok((value, done))
}

/// Materialize every remaining element of an iterable into `out`
/// (spread arguments, `ConcatArrays`, array-pattern rest)
pub fn collect_into(vm: &mut Vm, iterable: &Value, out: &mut Vec<Value>) -> VmResult<()> {
    let iter = get_iterator(vm, iterable)?;
    loop {
        let (value, done) = iterator_next(vm, &iter, &Value::Undefined)?;
        if done {
            return Ok(());
        }
        out.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;

    #[test]
    fn array_iteration_sees_live_growth() {
        let mut vm = Vm::for_tests();
        let arr = Value::array(vec![Value::Number(1.0)]);
        let iter = get_iterator(&mut vm, &arr).unwrap();

        let (v, done) = iterator_next(&mut vm, &iter, &Value::Undefined).unwrap();
        assert!(!done);
        assert_eq!(v.as_number(), Some(1.0));

        // Grow mid-iteration: the iterator sees the new element
        arr.as_array()
            .unwrap()
            .elements
            .borrow_mut()
            .push(Value::Number(2.0));
        let (v, done) = iterator_next(&mut vm, &iter, &Value::Undefined).unwrap();
        assert!(!done);
        assert_eq!(v.as_number(), Some(2.0));

        let (_, done) = iterator_next(&mut vm, &iter, &Value::Undefined).unwrap();
        assert!(done);
    }

    #[test]
    fn string_iteration_yields_chars() {
        let mut vm = Vm::for_tests();
        let mut out = Vec::new();
        collect_into(&mut vm, &Value::str("ab"), &mut out).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_str(), Some("a"));
        assert_eq!(out[1].as_str(), Some("b"));
    }

    #[test]
    fn non_iterable_rejects() {
        let mut vm = Vm::for_tests();
        assert!(get_iterator(&mut vm, &Value::Number(3.0)).is_err());
    }
}
