//! Object statics and the generic object strategy's operations

use std::rc::Rc;

use crate::error::{VmError, VmResult};
use crate::iterator::collect_into;
use crate::ops;
use crate::value::{ObjectData, PropKey, Property, Value};
use crate::vm::Vm;

use super::arg;

/// Own enumerable string keys of objects/instances/arrays, in order
pub fn own_keys(value: &Value) -> Vec<Rc<str>> {
    match value {
        Value::Object(o) => o
            .props
            .borrow()
            .keys()
            .filter_map(|k| match k {
                PropKey::Str(s) => Some(s.clone()),
                PropKey::Sym(_) => None,
            })
            .collect(),
        Value::Instance(inst) => {
            let mut keys: Vec<Rc<str>> = Vec::new();
            let mut chain = Vec::new();
            let mut current = Some(inst.class.clone());
            while let Some(c) = current {
                chain.push(c.clone());
                current = c.parent.clone();
            }
            for class in chain.iter().rev() {
                let def = &class.module.module.classes[class.class_index as usize];
                for prop in &def.properties {
                    keys.push(prop.name.as_str().into());
                }
            }
            for k in inst.extras.borrow().keys() {
                if let PropKey::Str(s) = k {
                    keys.push(s.clone());
                }
            }
            keys
        }
        Value::Array(a) => (0..a.len()).map(|i| Rc::from(i.to_string())).collect(),
        _ => Vec::new(),
    }
}

pub fn keys(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let keys = own_keys(&arg(args, 0));
    Ok(Value::array(keys.into_iter().map(Value::Str).collect()))
}

pub fn values(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let target = arg(args, 0);
    let mut out = Vec::new();
    for key in own_keys(&target) {
        out.push(ops::get_property(vm, &target, &key)?);
    }
    Ok(Value::array(out))
}

pub fn entries(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let target = arg(args, 0);
    let mut out = Vec::new();
    for key in own_keys(&target) {
        let value = ops::get_property(vm, &target, &key)?;
        out.push(Value::array(vec![Value::Str(key), value]));
    }
    Ok(Value::array(out))
}

pub fn assign(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let target = arg(args, 0);
    if target.is_nullish() {
        return Err(VmError::type_error("Cannot convert undefined or null to object"));
    }
    for source in &args[1..] {
        if source.is_nullish() {
            continue;
        }
        for key in own_keys(source) {
            let value = ops::get_property(vm, source, &key)?;
            ops::set_property(vm, &target, &key, value)?;
        }
    }
    Ok(target)
}

pub fn freeze(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let target = arg(args, 0);
    if let Value::Object(o) = &target {
        o.frozen.set(true);
    }
    Ok(target)
}

pub fn from_entries(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let source = arg(args, 0);
    let mut pairs = Vec::new();
    collect_into(vm, &source, &mut pairs)?;

    let obj = ObjectData::new();
    for pair in pairs {
        let key = ops::get_index(vm, &pair, &Value::Number(0.0))?;
        let value = ops::get_index(vm, &pair, &Value::Number(1.0))?;
        let name = ops::stringify(vm, &key)?;
        obj.set_data(PropKey::Str(name), value);
    }
    Ok(Value::Object(Rc::new(obj)))
}

pub fn get_own_property_names(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let mut names: Vec<Value> = own_keys(&arg(args, 0)).into_iter().map(Value::Str).collect();
    if matches!(arg(args, 0), Value::Array(_)) {
        names.push(Value::str("length"));
    }
    Ok(Value::array(names))
}

/// `hasOwnProperty`, surfaced for the dynamic path
pub fn has_own_property(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let target = arg(args, 0);
    let name = ops::stringify(vm, &arg(args, 1))?;
    let has = match &target {
        Value::Object(o) => {
            matches!(o.props.borrow().get(&PropKey::Str(name)), Some(Property::Data(_) | Property::Accessor { .. }))
        }
        Value::Instance(inst) => {
            inst.class.slot_of(&name).is_some()
                || inst.extras.borrow().contains_key(&PropKey::Str(name))
        }
        Value::Array(a) => name
            .parse::<usize>()
            .map(|i| i < a.len())
            .unwrap_or(name.as_ref() == "length"),
        _ => false,
    };
    Ok(Value::Bool(has))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;

    fn obj(entries: &[(&str, f64)]) -> Value {
        let o = ObjectData::new();
        for (k, v) in entries {
            o.set_data(PropKey::str(*k), Value::Number(*v));
        }
        Value::Object(Rc::new(o))
    }

    #[test]
    fn keys_preserve_insertion_order() {
        let mut vm = Vm::for_tests();
        let o = obj(&[("b", 1.0), ("a", 2.0)]);
        let keys = keys(&mut vm, &[o]).unwrap();
        let keys = keys.as_array().unwrap();
        assert_eq!(keys.get(0).as_str(), Some("b"));
        assert_eq!(keys.get(1).as_str(), Some("a"));
    }

    #[test]
    fn assign_copies_enumerable_props() {
        let mut vm = Vm::for_tests();
        let target = obj(&[("a", 1.0)]);
        let source = obj(&[("b", 2.0)]);
        assign(&mut vm, &[target.clone(), source]).unwrap();
        let b = ops::get_property(&mut vm, &target, "b").unwrap();
        assert_eq!(b.as_number(), Some(2.0));
    }

    #[test]
    fn freeze_blocks_writes() {
        let mut vm = Vm::for_tests();
        let target = obj(&[("a", 1.0)]);
        freeze(&mut vm, &[target.clone()]).unwrap();
        ops::set_property(&mut vm, &target, "a", Value::Number(9.0)).unwrap();
        let a = ops::get_property(&mut vm, &target, "a").unwrap();
        assert_eq!(a.as_number(), Some(1.0));
    }

    #[test]
    fn from_entries_builds_object() {
        let mut vm = Vm::for_tests();
        let pairs = Value::array(vec![
            Value::array(vec![Value::str("x"), Value::Number(1.0)]),
            Value::array(vec![Value::str("y"), Value::Number(2.0)]),
        ]);
        let o = from_entries(&mut vm, &[pairs]).unwrap();
        let y = ops::get_property(&mut vm, &o, "y").unwrap();
        assert_eq!(y.as_number(), Some(2.0));
    }
}
