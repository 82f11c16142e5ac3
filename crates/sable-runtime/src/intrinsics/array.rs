//! Array builtin operations.
//!
//! Callback-taking operations snapshot the length up front and read
//! elements live, so callbacks that mutate the receiver see their own
//! writes without breaking iteration bounds.

use std::rc::Rc;

use crate::error::{VmError, VmResult};
use crate::iterator::{SnapshotIter, collect_into};
use crate::ops;
use crate::value::{ArrayData, Value};
use crate::vm::Vm;

use super::{arg, to_num};

fn recv(args: &[Value]) -> VmResult<Rc<ArrayData>> {
    match args.first() {
        Some(Value::Array(a)) => Ok(a.clone()),
        other => Err(VmError::type_error(format!(
            "Array operation on non-array {:?}",
            other.map(Value::type_of).unwrap_or("undefined")
        ))),
    }
}

/// Clamp a possibly-negative relative index into `[0, len]`
fn rel_index(n: f64, len: usize) -> usize {
    if n.is_nan() {
        return 0;
    }
    if n < 0.0 {
        let back = (-n) as usize;
        len.saturating_sub(back)
    } else {
        (n as usize).min(len)
    }
}

pub fn push(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let arr = recv(args)?;
    arr.elements.borrow_mut().extend_from_slice(&args[1..]);
    Ok(Value::Number(arr.len() as f64))
}

pub fn pop(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let arr = recv(args)?;
    let popped = arr.elements.borrow_mut().pop();
    Ok(popped.unwrap_or(Value::Undefined))
}

pub fn shift(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let arr = recv(args)?;
    let mut elements = arr.elements.borrow_mut();
    if elements.is_empty() {
        return Ok(Value::Undefined);
    }
    Ok(elements.remove(0))
}

pub fn unshift(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let arr = recv(args)?;
    let mut elements = arr.elements.borrow_mut();
    for (i, v) in args[1..].iter().enumerate() {
        elements.insert(i, v.clone());
    }
    Ok(Value::Number(elements.len() as f64))
}

pub fn join(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let arr = recv(args)?;
    let sep = match arg(args, 1) {
        Value::Undefined => ",".to_string(),
        v => ops::stringify(vm, &v)?.to_string(),
    };
    let elements: Vec<Value> = arr.elements.borrow().clone();
    let mut out = String::new();
    for (i, el) in elements.iter().enumerate() {
        if i > 0 {
            out.push_str(&sep);
        }
        if !el.is_nullish() {
            out.push_str(&ops::stringify(vm, el)?);
        }
    }
    Ok(Value::str(out))
}

pub fn slice(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let arr = recv(args)?;
    let len = arr.len();
    let start = match arg(args, 1) {
        Value::Undefined => 0,
        v => rel_index(to_num(vm, &v)?, len),
    };
    let end = match arg(args, 2) {
        Value::Undefined => len,
        v => rel_index(to_num(vm, &v)?, len),
    };
    let elements = arr.elements.borrow();
    let out: Vec<Value> = if start < end {
        elements[start..end].to_vec()
    } else {
        Vec::new()
    };
    Ok(Value::array(out))
}

pub fn splice(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let arr = recv(args)?;
    let len = arr.len();
    let start = rel_index(to_num(vm, &arg(args, 1))?, len);
    let delete_count = match arg(args, 2) {
        Value::Undefined => len - start,
        v => (to_num(vm, &v)?.max(0.0) as usize).min(len - start),
    };
    let inserted: Vec<Value> = args.get(3..).unwrap_or(&[]).to_vec();
    let mut elements = arr.elements.borrow_mut();
    let removed: Vec<Value> = elements
        .splice(start..start + delete_count, inserted)
        .collect();
    Ok(Value::array(removed))
}

pub fn index_of(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let arr = recv(args)?;
    let needle = arg(args, 1);
    let found = arr
        .elements
        .borrow()
        .iter()
        .position(|el| ops::strict_equals(el, &needle));
    Ok(Value::Number(found.map(|i| i as f64).unwrap_or(-1.0)))
}

pub fn last_index_of(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let arr = recv(args)?;
    let needle = arg(args, 1);
    let found = arr
        .elements
        .borrow()
        .iter()
        .rposition(|el| ops::strict_equals(el, &needle));
    Ok(Value::Number(found.map(|i| i as f64).unwrap_or(-1.0)))
}

pub fn includes(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let arr = recv(args)?;
    let needle = arg(args, 1);
    // SameValueZero: unlike indexOf, NaN is found
    let found = arr.elements.borrow().iter().any(|el| {
        ops::strict_equals(el, &needle)
            || matches!(
                (el, &needle),
                (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan()
            )
    });
    Ok(Value::Bool(found))
}

pub fn concat(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let arr = recv(args)?;
    let mut out: Vec<Value> = arr.elements.borrow().clone();
    for extra in &args[1..] {
        match extra {
            Value::Array(a) => out.extend(a.elements.borrow().iter().cloned()),
            other => out.push(other.clone()),
        }
    }
    Ok(Value::array(out))
}

pub fn reverse(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let arr = recv(args)?;
    arr.elements.borrow_mut().reverse();
    Ok(args[0].clone())
}

pub fn to_reversed(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let arr = recv(args)?;
    let mut out: Vec<Value> = arr.elements.borrow().clone();
    out.reverse();
    Ok(Value::array(out))
}

/// Insertion sort so comparator errors propagate cleanly
fn sort_values(vm: &mut Vm, values: &mut Vec<Value>, comparator: &Value) -> VmResult<()> {
    for i in 1..values.len() {
        let mut j = i;
        while j > 0 {
            let ordered = sort_le(vm, &values[j - 1], &values[j], comparator)?;
            if ordered {
                break;
            }
            values.swap(j - 1, j);
            j -= 1;
        }
    }
    Ok(())
}

fn sort_le(vm: &mut Vm, a: &Value, b: &Value, comparator: &Value) -> VmResult<bool> {
    // undefined sorts last regardless of comparator
    if a.is_undefined() {
        return Ok(b.is_undefined());
    }
    if b.is_undefined() {
        return Ok(true);
    }
    if comparator.is_callable() {
        let r = vm.call_value(comparator, Value::Undefined, &[a.clone(), b.clone()])?;
        let n = to_num(vm, &r)?;
        Ok(n <= 0.0 || n.is_nan())
    } else {
        let sa = ops::stringify(vm, a)?;
        let sb = ops::stringify(vm, b)?;
        Ok(sa <= sb)
    }
}

pub fn sort(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let arr = recv(args)?;
    let comparator = arg(args, 1);
    let mut values: Vec<Value> = arr.elements.borrow().clone();
    sort_values(vm, &mut values, &comparator)?;
    *arr.elements.borrow_mut() = values;
    Ok(args[0].clone())
}

pub fn to_sorted(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let arr = recv(args)?;
    let comparator = arg(args, 1);
    let mut values: Vec<Value> = arr.elements.borrow().clone();
    sort_values(vm, &mut values, &comparator)?;
    Ok(Value::array(values))
}

pub fn with(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let arr = recv(args)?;
    let len = arr.len();
    let raw = to_num(vm, &arg(args, 1))?;
    let idx = if raw < 0.0 { raw + len as f64 } else { raw };
    if idx < 0.0 || idx >= len as f64 {
        return Err(VmError::range_error("Invalid index"));
    }
    let mut out: Vec<Value> = arr.elements.borrow().clone();
    out[idx as usize] = arg(args, 2);
    Ok(Value::array(out))
}

pub fn at(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let arr = recv(args)?;
    let len = arr.len() as f64;
    // ToIntegerOrInfinity truncates before the relative adjustment
    let raw = to_num(vm, &arg(args, 1))?.trunc();
    let idx = if raw < 0.0 { raw + len } else { raw };
    if idx < 0.0 || idx >= len {
        return Ok(Value::Undefined);
    }
    Ok(arr.get(idx as usize))
}

fn callback(args: &[Value]) -> VmResult<Value> {
    let cb = arg(args, 1);
    if !cb.is_callable() {
        return Err(VmError::type_error("callback is not a function"));
    }
    Ok(cb)
}

pub fn map(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let arr = recv(args)?;
    let cb = callback(args)?;
    let len = arr.len();
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let el = arr.get(i);
        out.push(vm.call_value(&cb, Value::Undefined, &[el, Value::Number(i as f64), args[0].clone()])?);
    }
    Ok(Value::array(out))
}

pub fn filter(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let arr = recv(args)?;
    let cb = callback(args)?;
    let len = arr.len();
    let mut out = Vec::new();
    for i in 0..len {
        let el = arr.get(i);
        let keep = vm.call_value(
            &cb,
            Value::Undefined,
            &[el.clone(), Value::Number(i as f64), args[0].clone()],
        )?;
        if keep.to_boolean() {
            out.push(el);
        }
    }
    Ok(Value::array(out))
}

pub fn for_each(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let arr = recv(args)?;
    let cb = callback(args)?;
    let len = arr.len();
    for i in 0..len {
        let el = arr.get(i);
        vm.call_value(&cb, Value::Undefined, &[el, Value::Number(i as f64), args[0].clone()])?;
    }
    Ok(Value::Undefined)
}

pub fn reduce(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let arr = recv(args)?;
    let cb = callback(args)?;
    let len = arr.len();
    let mut acc;
    let mut start = 0;
    if args.len() > 2 {
        acc = arg(args, 2);
    } else {
        if len == 0 {
            return Err(VmError::type_error("Reduce of empty array with no initial value"));
        }
        acc = arr.get(0);
        start = 1;
    }
    for i in start..len {
        let el = arr.get(i);
        acc = vm.call_value(
            &cb,
            Value::Undefined,
            &[acc, el, Value::Number(i as f64), args[0].clone()],
        )?;
    }
    Ok(acc)
}

pub fn reduce_right(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let arr = recv(args)?;
    let cb = callback(args)?;
    let len = arr.len();
    let mut acc;
    let mut start;
    if args.len() > 2 {
        acc = arg(args, 2);
        start = len;
    } else {
        if len == 0 {
            return Err(VmError::type_error("Reduce of empty array with no initial value"));
        }
        acc = arr.get(len - 1);
        start = len - 1;
    }
    while start > 0 {
        start -= 1;
        let el = arr.get(start);
        acc = vm.call_value(
            &cb,
            Value::Undefined,
            &[acc, el, Value::Number(start as f64), args[0].clone()],
        )?;
    }
    Ok(acc)
}

fn find_impl(vm: &mut Vm, args: &[Value], reverse: bool, want_index: bool) -> VmResult<Value> {
    let arr = recv(args)?;
    let cb = callback(args)?;
    let len = arr.len();
    let indices: Vec<usize> = if reverse {
        (0..len).rev().collect()
    } else {
        (0..len).collect()
    };
    for i in indices {
        let el = arr.get(i);
        let hit = vm.call_value(
            &cb,
            Value::Undefined,
            &[el.clone(), Value::Number(i as f64), args[0].clone()],
        )?;
        if hit.to_boolean() {
            return Ok(if want_index { Value::Number(i as f64) } else { el });
        }
    }
    Ok(if want_index {
        Value::Number(-1.0)
    } else {
        Value::Undefined
    })
}

pub fn find(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    find_impl(vm, args, false, false)
}

pub fn find_index(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    find_impl(vm, args, false, true)
}

pub fn find_last(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    find_impl(vm, args, true, false)
}

pub fn find_last_index(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    find_impl(vm, args, true, true)
}

pub fn some(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let arr = recv(args)?;
    let cb = callback(args)?;
    let len = arr.len();
    for i in 0..len {
        let el = arr.get(i);
        let hit = vm.call_value(&cb, Value::Undefined, &[el, Value::Number(i as f64), args[0].clone()])?;
        if hit.to_boolean() {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

pub fn every(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let arr = recv(args)?;
    let cb = callback(args)?;
    let len = arr.len();
    for i in 0..len {
        let el = arr.get(i);
        let hit = vm.call_value(&cb, Value::Undefined, &[el, Value::Number(i as f64), args[0].clone()])?;
        if !hit.to_boolean() {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn flatten_into(out: &mut Vec<Value>, v: &Value, depth: usize) {
    match v {
        Value::Array(a) if depth > 0 => {
            let elements: Vec<Value> = a.elements.borrow().clone();
            for el in elements {
                flatten_into(out, &el, depth - 1);
            }
        }
        other => out.push(other.clone()),
    }
}

pub fn flat(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let arr = recv(args)?;
    let depth = match arg(args, 1) {
        Value::Undefined => 1,
        v => to_num(vm, &v)?.max(0.0) as usize,
    };
    let mut out = Vec::new();
    let elements: Vec<Value> = arr.elements.borrow().clone();
    for el in elements {
        flatten_into(&mut out, &el, depth);
    }
    Ok(Value::array(out))
}

pub fn flat_map(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let mapped = map(vm, args)?;
    flat(vm, &[mapped])
}

pub fn fill(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let arr = recv(args)?;
    let len = arr.len();
    let value = arg(args, 1);
    let start = match arg(args, 2) {
        Value::Undefined => 0,
        v => rel_index(to_num(vm, &v)?, len),
    };
    let end = match arg(args, 3) {
        Value::Undefined => len,
        v => rel_index(to_num(vm, &v)?, len),
    };
    // An inverted range fills nothing (the receiver comes back unchanged)
    let (lo, hi) = (start.min(len), end.min(len));
    let mut elements = arr.elements.borrow_mut();
    for slot in elements[lo..hi.max(lo)].iter_mut() {
        *slot = value.clone();
    }
    Ok(args[0].clone())
}

pub fn keys(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let arr = recv(args)?;
    let items = (0..arr.len()).map(|i| Value::Number(i as f64)).collect();
    Ok(Value::Host(Rc::new(SnapshotIter::new(items, "Array Iterator"))))
}

pub fn values(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let arr = recv(args)?;
    let items = arr.elements.borrow().clone();
    Ok(Value::Host(Rc::new(SnapshotIter::new(items, "Array Iterator"))))
}

pub fn entries(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let arr = recv(args)?;
    let items = arr
        .elements
        .borrow()
        .iter()
        .enumerate()
        .map(|(i, v)| Value::array(vec![Value::Number(i as f64), v.clone()]))
        .collect();
    Ok(Value::Host(Rc::new(SnapshotIter::new(items, "Array Iterator"))))
}

// ---- statics ----

pub fn is_array(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    Ok(Value::Bool(matches!(arg(args, 0), Value::Array(_))))
}

pub fn from(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let source = arg(args, 0);
    let mapper = arg(args, 1);
    let mut out = Vec::new();
    collect_into(vm, &source, &mut out)?;
    if mapper.is_callable() {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = vm.call_value(&mapper, Value::Undefined, &[slot.clone(), Value::Number(i as f64)])?;
        }
    }
    Ok(Value::array(out))
}

pub fn of(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    Ok(Value::array(args.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;

    fn arr(nums: &[f64]) -> Value {
        Value::array(nums.iter().map(|n| Value::Number(*n)).collect())
    }

    #[test]
    fn at_negative_and_out_of_range() {
        let mut vm = Vm::for_tests();
        let a = arr(&[1.0, 2.0, 3.0]);
        let last = at(&mut vm, &[a.clone(), Value::Number(-1.0)]).unwrap();
        assert_eq!(last.as_number(), Some(3.0));
        assert!(at(&mut vm, &[a.clone(), Value::Number(3.0)]).unwrap().is_undefined());
        assert!(at(&mut vm, &[a.clone(), Value::Number(-4.0)]).unwrap().is_undefined());
        // Fractional indices truncate (ToIntegerOrInfinity)
        let first = at(&mut vm, &[a.clone(), Value::Number(0.5)]).unwrap();
        assert_eq!(first.as_number(), Some(1.0));
        let second = at(&mut vm, &[a, Value::Number(-1.5)]).unwrap();
        assert_eq!(second.as_number(), Some(3.0));
    }

    #[test]
    fn fill_with_inverted_range_is_a_noop() {
        let mut vm = Vm::for_tests();
        // start > end after clamping: nothing is written
        let a = arr(&[1.0, 2.0, 3.0]);
        let r = fill(
            &mut vm,
            &[a.clone(), Value::Number(0.0), Value::Number(2.0), Value::Number(1.0)],
        )
        .unwrap();
        assert!(ops::strict_equals(&r, &a));
        let inner = a.as_array().unwrap();
        assert_eq!(inner.get(0).as_number(), Some(1.0));
        assert_eq!(inner.get(2).as_number(), Some(3.0));

        // Negative indices resolving out of order: also a no-op
        let b = arr(&[1.0, 2.0, 3.0]);
        fill(
            &mut vm,
            &[b.clone(), Value::Number(0.0), Value::Number(-1.0), Value::Number(-3.0)],
        )
        .unwrap();
        assert_eq!(b.as_array().unwrap().get(2).as_number(), Some(3.0));

        // A forward range still fills
        let c = arr(&[1.0, 2.0, 3.0]);
        fill(
            &mut vm,
            &[c.clone(), Value::Number(9.0), Value::Number(1.0), Value::Number(3.0)],
        )
        .unwrap();
        let inner = c.as_array().unwrap();
        assert_eq!(inner.get(0).as_number(), Some(1.0));
        assert_eq!(inner.get(1).as_number(), Some(9.0));
        assert_eq!(inner.get(2).as_number(), Some(9.0));
    }

    #[test]
    fn slice_clamps_negative() {
        let mut vm = Vm::for_tests();
        let a = arr(&[1.0, 2.0, 3.0, 4.0]);
        let s = slice(&mut vm, &[a, Value::Number(-2.0)]).unwrap();
        let s = s.as_array().unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.get(0).as_number(), Some(3.0));
    }

    #[test]
    fn to_reversed_does_not_mutate() {
        let mut vm = Vm::for_tests();
        let a = arr(&[1.0, 2.0]);
        let r = to_reversed(&mut vm, &[a.clone()]).unwrap();
        assert_eq!(r.as_array().unwrap().get(0).as_number(), Some(2.0));
        assert_eq!(a.as_array().unwrap().get(0).as_number(), Some(1.0));
    }

    #[test]
    fn with_does_not_mutate_and_checks_range() {
        let mut vm = Vm::for_tests();
        let a = arr(&[1.0, 2.0]);
        let r = with(&mut vm, &[a.clone(), Value::Number(1.0), Value::Number(9.0)]).unwrap();
        assert_eq!(r.as_array().unwrap().get(1).as_number(), Some(9.0));
        assert_eq!(a.as_array().unwrap().get(1).as_number(), Some(2.0));
        assert!(with(&mut vm, &[a, Value::Number(5.0), Value::Null]).is_err());
    }

    #[test]
    fn includes_finds_nan() {
        let mut vm = Vm::for_tests();
        let a = arr(&[f64::NAN]);
        let r = includes(&mut vm, &[a.clone(), Value::Number(f64::NAN)]).unwrap();
        assert!(r.to_boolean());
        let r = index_of(&mut vm, &[a, Value::Number(f64::NAN)]).unwrap();
        assert_eq!(r.as_number(), Some(-1.0));
    }

    #[test]
    fn join_skips_nullish() {
        let mut vm = Vm::for_tests();
        let a = Value::array(vec![Value::Number(1.0), Value::Null, Value::str("x")]);
        let r = join(&mut vm, &[a, Value::Undefined]).unwrap();
        assert_eq!(r.as_str(), Some("1,,x"));
    }

    #[test]
    fn default_sort_is_lexicographic() {
        let mut vm = Vm::for_tests();
        let a = arr(&[10.0, 9.0, 1.0]);
        sort(&mut vm, &[a.clone(), Value::Undefined]).unwrap();
        let inner = a.as_array().unwrap();
        assert_eq!(inner.get(0).as_number(), Some(1.0));
        assert_eq!(inner.get(1).as_number(), Some(10.0));
        assert_eq!(inner.get(2).as_number(), Some(9.0));
    }
}
