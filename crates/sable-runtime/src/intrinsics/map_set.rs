//! Map / Set / WeakMap / WeakSet operations (SameValueZero keys,
//! insertion-ordered iteration).

use std::rc::Rc;

use crate::error::{VmError, VmResult};
use crate::iterator::{SnapshotIter, collect_into};
use crate::ops;
use crate::value::{MapData, SetData, Value, ValueKey, WeakMapData, WeakRef, WeakSetData};
use crate::vm::Vm;

use super::arg;

fn recv_map(args: &[Value]) -> VmResult<Rc<MapData>> {
    match args.first() {
        Some(Value::Map(m)) => Ok(m.clone()),
        _ => Err(VmError::type_error("Receiver is not a Map")),
    }
}

fn recv_set(args: &[Value]) -> VmResult<Rc<SetData>> {
    match args.first() {
        Some(Value::Set(s)) => Ok(s.clone()),
        _ => Err(VmError::type_error("Receiver is not a Set")),
    }
}

fn recv_weak_map(args: &[Value]) -> VmResult<Rc<WeakMapData>> {
    match args.first() {
        Some(Value::WeakMap(m)) => Ok(m.clone()),
        _ => Err(VmError::type_error("Receiver is not a WeakMap")),
    }
}

fn recv_weak_set(args: &[Value]) -> VmResult<Rc<WeakSetData>> {
    match args.first() {
        Some(Value::WeakSet(s)) => Ok(s.clone()),
        _ => Err(VmError::type_error("Receiver is not a WeakSet")),
    }
}

// ---- constructors ----

pub fn new_map(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let map = Rc::new(MapData::default());
    if let Some(iterable) = args.first().filter(|v| !v.is_nullish()) {
        let mut pairs = Vec::new();
        collect_into(vm, iterable, &mut pairs)?;
        for pair in pairs {
            let k = ops::get_index(vm, &pair, &Value::Number(0.0))?;
            let v = ops::get_index(vm, &pair, &Value::Number(1.0))?;
            map.entries.borrow_mut().insert(ValueKey(k), v);
        }
    }
    Ok(Value::Map(map))
}

pub fn new_set(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let set = Rc::new(SetData::default());
    if let Some(iterable) = args.first().filter(|v| !v.is_nullish()) {
        let mut items = Vec::new();
        collect_into(vm, iterable, &mut items)?;
        for item in items {
            set.entries.borrow_mut().insert(ValueKey(item), ());
        }
    }
    Ok(Value::Set(set))
}

pub fn new_weak_map(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = (vm, args);
    Ok(Value::WeakMap(Rc::new(WeakMapData::default())))
}

pub fn new_weak_set(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = (vm, args);
    Ok(Value::WeakSet(Rc::new(WeakSetData::default())))
}

// ---- Map methods ----

pub fn map_get(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let map = recv_map(args)?;
    let key = ValueKey(arg(args, 1));
    Ok(map.entries.borrow().get(&key).cloned().unwrap_or(Value::Undefined))
}

pub fn map_set(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let map = recv_map(args)?;
    map.entries.borrow_mut().insert(ValueKey(arg(args, 1)), arg(args, 2));
    Ok(args[0].clone())
}

pub fn map_has(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let map = recv_map(args)?;
    Ok(Value::Bool(map.entries.borrow().contains_key(&ValueKey(arg(args, 1)))))
}

pub fn map_delete(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let map = recv_map(args)?;
    let removed = map.entries.borrow_mut().shift_remove(&ValueKey(arg(args, 1)));
    Ok(Value::Bool(removed.is_some()))
}

pub fn map_clear(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let map = recv_map(args)?;
    map.entries.borrow_mut().clear();
    Ok(Value::Undefined)
}

pub fn map_for_each(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let map = recv_map(args)?;
    let cb = arg(args, 1);
    if !cb.is_callable() {
        return Err(VmError::type_error("callback is not a function"));
    }
    let entries: Vec<(Value, Value)> = map
        .entries
        .borrow()
        .iter()
        .map(|(k, v)| (k.0.clone(), v.clone()))
        .collect();
    for (k, v) in entries {
        vm.call_value(&cb, Value::Undefined, &[v, k, args[0].clone()])?;
    }
    Ok(Value::Undefined)
}

pub fn map_keys(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let map = recv_map(args)?;
    let items = map.entries.borrow().keys().map(|k| k.0.clone()).collect();
    Ok(Value::Host(Rc::new(SnapshotIter::new(items, "Map Iterator"))))
}

pub fn map_values(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let map = recv_map(args)?;
    let items = map.entries.borrow().values().cloned().collect();
    Ok(Value::Host(Rc::new(SnapshotIter::new(items, "Map Iterator"))))
}

pub fn map_entries(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let map = recv_map(args)?;
    let items = map
        .entries
        .borrow()
        .iter()
        .map(|(k, v)| Value::array(vec![k.0.clone(), v.clone()]))
        .collect();
    Ok(Value::Host(Rc::new(SnapshotIter::new(items, "Map Iterator"))))
}

// ---- Set methods ----

pub fn set_add(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let set = recv_set(args)?;
    set.entries.borrow_mut().insert(ValueKey(arg(args, 1)), ());
    Ok(args[0].clone())
}

pub fn set_has(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let set = recv_set(args)?;
    Ok(Value::Bool(set.entries.borrow().contains_key(&ValueKey(arg(args, 1)))))
}

pub fn set_delete(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let set = recv_set(args)?;
    let removed = set.entries.borrow_mut().shift_remove(&ValueKey(arg(args, 1)));
    Ok(Value::Bool(removed.is_some()))
}

pub fn set_clear(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let set = recv_set(args)?;
    set.entries.borrow_mut().clear();
    Ok(Value::Undefined)
}

pub fn set_for_each(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let set = recv_set(args)?;
    let cb = arg(args, 1);
    if !cb.is_callable() {
        return Err(VmError::type_error("callback is not a function"));
    }
    let items: Vec<Value> = set.entries.borrow().keys().map(|k| k.0.clone()).collect();
    for item in items {
        vm.call_value(&cb, Value::Undefined, &[item.clone(), item, args[0].clone()])?;
    }
    Ok(Value::Undefined)
}

pub fn set_keys(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    set_values(vm, args)
}

pub fn set_values(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let set = recv_set(args)?;
    let items = set.entries.borrow().keys().map(|k| k.0.clone()).collect();
    Ok(Value::Host(Rc::new(SnapshotIter::new(items, "Set Iterator"))))
}

pub fn set_entries(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let set = recv_set(args)?;
    let items = set
        .entries
        .borrow()
        .keys()
        .map(|k| Value::array(vec![k.0.clone(), k.0.clone()]))
        .collect();
    Ok(Value::Host(Rc::new(SnapshotIter::new(items, "Set Iterator"))))
}

// ---- WeakMap / WeakSet methods ----

fn require_object_key(key: &Value) -> VmResult<WeakRef> {
    WeakRef::of(key).ok_or_else(|| {
        VmError::type_error("Invalid value used as weak map key")
    })
}

fn sweep_weak_map(map: &WeakMapData) {
    map.entries.borrow_mut().retain(|(k, _)| k.alive());
}

pub fn weak_map_get(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let map = recv_weak_map(args)?;
    sweep_weak_map(&map);
    let key = arg(args, 1);
    let found = map
        .entries
        .borrow()
        .iter()
        .find(|(k, _)| k.refers_to(&key))
        .map(|(_, v)| v.clone());
    Ok(found.unwrap_or(Value::Undefined))
}

pub fn weak_map_set(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let map = recv_weak_map(args)?;
    sweep_weak_map(&map);
    let key = arg(args, 1);
    let weak = require_object_key(&key)?;
    let value = arg(args, 2);
    let mut entries = map.entries.borrow_mut();
    if let Some(slot) = entries.iter_mut().find(|(k, _)| k.refers_to(&key)) {
        slot.1 = value;
    } else {
        entries.push((weak, value));
    }
    drop(entries);
    Ok(args[0].clone())
}

pub fn weak_map_has(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let map = recv_weak_map(args)?;
    sweep_weak_map(&map);
    let key = arg(args, 1);
    Ok(Value::Bool(
        map.entries.borrow().iter().any(|(k, _)| k.refers_to(&key)),
    ))
}

pub fn weak_map_delete(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let map = recv_weak_map(args)?;
    sweep_weak_map(&map);
    let key = arg(args, 1);
    let mut entries = map.entries.borrow_mut();
    let before = entries.len();
    entries.retain(|(k, _)| !k.refers_to(&key));
    Ok(Value::Bool(entries.len() != before))
}

pub fn weak_set_add(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let set = recv_weak_set(args)?;
    set.entries.borrow_mut().retain(WeakRef::alive);
    let item = arg(args, 1);
    let weak = require_object_key(&item)?;
    if !set.entries.borrow().iter().any(|k| k.refers_to(&item)) {
        set.entries.borrow_mut().push(weak);
    }
    Ok(args[0].clone())
}

pub fn weak_set_has(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let set = recv_weak_set(args)?;
    set.entries.borrow_mut().retain(WeakRef::alive);
    let item = arg(args, 1);
    Ok(Value::Bool(
        set.entries.borrow().iter().any(|k| k.refers_to(&item)),
    ))
}

pub fn weak_set_delete(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let set = recv_weak_set(args)?;
    let item = arg(args, 1);
    let mut entries = set.entries.borrow_mut();
    let before = entries.len();
    entries.retain(|k| k.alive() && !k.refers_to(&item));
    Ok(Value::Bool(entries.len() != before))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;

    #[test]
    fn map_preserves_insertion_order() {
        let mut vm = Vm::for_tests();
        let map = new_map(&mut vm, &[]).unwrap();
        map_set(&mut vm, &[map.clone(), Value::str("z"), Value::Number(1.0)]).unwrap();
        map_set(&mut vm, &[map.clone(), Value::str("a"), Value::Number(2.0)]).unwrap();
        let keys: Vec<Value> = match map_keys(&mut vm, &[map]).unwrap() {
            Value::Host(h) => {
                let mut out = Vec::new();
                let iter = Value::Host(h);
                crate::iterator::collect_into(&mut vm, &iter, &mut out).ok();
                out
            }
            _ => panic!("expected iterator"),
        };
        assert_eq!(keys[0].as_str(), Some("z"));
        assert_eq!(keys[1].as_str(), Some("a"));
    }

    #[test]
    fn nan_is_a_usable_map_key() {
        let mut vm = Vm::for_tests();
        let map = new_map(&mut vm, &[]).unwrap();
        map_set(
            &mut vm,
            &[map.clone(), Value::Number(f64::NAN), Value::str("found")],
        )
        .unwrap();
        let v = map_get(&mut vm, &[map, Value::Number(f64::NAN)]).unwrap();
        assert_eq!(v.as_str(), Some("found"));
    }

    #[test]
    fn weak_map_drops_dead_keys() {
        let mut vm = Vm::for_tests();
        let wm = new_weak_map(&mut vm, &[]).unwrap();
        let key = Value::array(vec![]);
        weak_map_set(&mut vm, &[wm.clone(), key.clone(), Value::Number(1.0)]).unwrap();
        let has = weak_map_has(&mut vm, &[wm.clone(), key.clone()]).unwrap();
        assert!(has.to_boolean());

        drop(key);
        // All strong refs gone; entry is swept on next access
        let Value::WeakMap(data) = &wm else { panic!() };
        sweep_weak_map(data);
        assert!(data.entries.borrow().is_empty());
    }

    #[test]
    fn weak_map_rejects_primitive_keys() {
        let mut vm = Vm::for_tests();
        let wm = new_weak_map(&mut vm, &[]).unwrap();
        assert!(weak_map_set(&mut vm, &[wm, Value::Number(1.0), Value::Null]).is_err());
    }
}
