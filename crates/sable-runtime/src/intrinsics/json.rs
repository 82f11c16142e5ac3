//! JSON.parse / JSON.stringify

use std::rc::Rc;

use crate::error::{VmError, VmResult};
use crate::number;
use crate::ops;
use crate::value::{ObjectData, PropKey, Property, Value};
use crate::vm::Vm;

use super::{arg, to_num};

pub fn parse(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let text = ops::stringify(vm, &arg(args, 0))?;
    let parsed: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| VmError::Syntax(format!("Unexpected token in JSON: {e}")))?;
    Ok(from_json(&parsed))
}

fn from_json(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::str(s.clone()),
        serde_json::Value::Array(items) => Value::array(items.iter().map(from_json).collect()),
        serde_json::Value::Object(entries) => {
            let obj = ObjectData::new();
            for (k, v) in entries {
                obj.set_data(PropKey::str(k.clone()), from_json(v));
            }
            Value::Object(Rc::new(obj))
        }
    }
}

pub fn stringify(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let value = arg(args, 0);
    // args[1] is the replacer (unsupported, ignored); args[2] the indent
    let indent = match arg(args, 2) {
        Value::Undefined | Value::Null => 0,
        Value::Str(s) => s.len().min(10),
        v => (to_num(vm, &v)?.max(0.0) as usize).min(10),
    };
    let mut out = String::new();
    match write_json(vm, &value, indent, 0, &mut out)? {
        true => Ok(Value::str(out)),
        false => Ok(Value::Undefined),
    }
}

/// Serialize `v` into `out`; false means the value is not representable
/// (undefined, function, symbol) and the caller should omit it.
fn write_json(
    vm: &mut Vm,
    v: &Value,
    indent: usize,
    depth: usize,
    out: &mut String,
) -> VmResult<bool> {
    if depth > 64 {
        return Err(VmError::type_error("Converting circular structure to JSON"));
    }
    match v {
        Value::Undefined | Value::Function(_) | Value::Class(_) | Value::Symbol(_) => Ok(false),
        Value::Null => {
            out.push_str("null");
            Ok(true)
        }
        Value::Bool(b) => {
            out.push_str(if *b { "true" } else { "false" });
            Ok(true)
        }
        Value::Number(n) => {
            if n.is_finite() {
                out.push_str(&number::to_js_string(*n));
            } else {
                out.push_str("null");
            }
            Ok(true)
        }
        Value::BigInt(_) => Err(VmError::type_error("Do not know how to serialize a BigInt")),
        Value::Str(s) => {
            write_json_string(s, out);
            Ok(true)
        }
        Value::Array(a) => {
            let elements: Vec<Value> = a.elements.borrow().clone();
            out.push('[');
            for (i, el) in elements.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                newline_indent(out, indent, depth + 1);
                if !write_json(vm, el, indent, depth + 1, out)? {
                    out.push_str("null");
                }
            }
            if !elements.is_empty() {
                newline_indent(out, indent, depth);
            }
            out.push(']');
            Ok(true)
        }
        Value::Object(o) => {
            let entries: Vec<(PropKey, Property)> = o
                .props
                .borrow()
                .iter()
                .map(|(k, p)| (k.clone(), p.clone()))
                .collect();
            out.push('{');
            let mut first = true;
            for (key, prop) in entries {
                let PropKey::Str(name) = key else { continue };
                let value = match prop {
                    Property::Data(v) => v,
                    Property::Accessor { get: Some(g), .. } => {
                        vm.call_value(&g, v.clone(), &[])?
                    }
                    Property::Accessor { .. } => continue,
                };
                let mut piece = String::new();
                if write_json(vm, &value, indent, depth + 1, &mut piece)? {
                    if !first {
                        out.push(',');
                    }
                    first = false;
                    newline_indent(out, indent, depth + 1);
                    write_json_string(&name, out);
                    out.push(':');
                    if indent > 0 {
                        out.push(' ');
                    }
                    out.push_str(&piece);
                }
            }
            if !first {
                newline_indent(out, indent, depth);
            }
            out.push('}');
            Ok(true)
        }
        Value::Instance(inst) => {
            // Serialize declared slots then extras, in declaration order
            let mut entries: Vec<(Rc<str>, Value)> = Vec::new();
            let mut chain = Vec::new();
            let mut current = Some(inst.class.clone());
            while let Some(c) = current {
                chain.push(c.clone());
                current = c.parent.clone();
            }
            for class in chain.iter().rev() {
                let def = &class.module.module.classes[class.class_index as usize];
                for (i, prop) in def.properties.iter().enumerate() {
                    let slot = class.slot_offset as usize + i;
                    entries.push((
                        prop.name.as_str().into(),
                        inst.slots.borrow()[slot].clone(),
                    ));
                }
            }
            for (k, val) in inst.extras.borrow().iter() {
                if let PropKey::Str(name) = k {
                    entries.push((name.clone(), val.clone()));
                }
            }

            out.push('{');
            let mut first = true;
            for (name, value) in entries {
                let mut piece = String::new();
                if write_json(vm, &value, indent, depth + 1, &mut piece)? {
                    if !first {
                        out.push(',');
                    }
                    first = false;
                    newline_indent(out, indent, depth + 1);
                    write_json_string(&name, out);
                    out.push(':');
                    if indent > 0 {
                        out.push(' ');
                    }
                    out.push_str(&piece);
                }
            }
            if !first {
                newline_indent(out, indent, depth);
            }
            out.push('}');
            Ok(true)
        }
        Value::Map(_) | Value::Set(_) | Value::WeakMap(_) | Value::WeakSet(_)
        | Value::Promise(_) | Value::Generator(_) | Value::Regex(_) | Value::Host(_) => {
            out.push_str("{}");
            Ok(true)
        }
        Value::Date(d) => {
            let iso = super::date::to_iso_string(d.millis.get())
                .map(|s| format!("\"{s}\""))
                .unwrap_or_else(|| "null".to_string());
            out.push_str(&iso);
            Ok(true)
        }
        Value::Buffer(b) => {
            // Node-style: {"type":"Buffer","data":[...]}
            out.push_str("{\"type\":\"Buffer\",\"data\":[");
            for (i, byte) in b.bytes.borrow().iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(itoa::Buffer::new().format(*byte));
            }
            out.push_str("]}");
            Ok(true)
        }
    }
}

fn newline_indent(out: &mut String, indent: usize, depth: usize) {
    if indent > 0 {
        out.push('\n');
        out.push_str(&" ".repeat(indent * depth));
    }
}

fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;

    #[test]
    fn parse_then_stringify_roundtrip() {
        let mut vm = Vm::for_tests();
        let parsed = parse(&mut vm, &[Value::str(r#"{"a":[1,2.5,"x"],"b":null}"#)]).unwrap();
        let text = stringify(&mut vm, &[parsed]).unwrap();
        assert_eq!(text.as_str(), Some(r#"{"a":[1,2.5,"x"],"b":null}"#));
    }

    #[test]
    fn stringify_drops_undefined_members() {
        let mut vm = Vm::for_tests();
        let obj = ObjectData::new();
        obj.set_data(PropKey::str("keep"), Value::Number(1.0));
        obj.set_data(PropKey::str("drop"), Value::Undefined);
        let text = stringify(&mut vm, &[Value::Object(Rc::new(obj))]).unwrap();
        assert_eq!(text.as_str(), Some(r#"{"keep":1}"#));
    }

    #[test]
    fn stringify_undefined_is_undefined() {
        let mut vm = Vm::for_tests();
        let r = stringify(&mut vm, &[Value::Undefined]).unwrap();
        assert!(r.is_undefined());
    }

    #[test]
    fn integers_have_no_decimal_point() {
        let mut vm = Vm::for_tests();
        let r = stringify(&mut vm, &[Value::Number(3.0)]).unwrap();
        assert_eq!(r.as_str(), Some("3"));
    }

    #[test]
    fn parse_rejects_garbage() {
        let mut vm = Vm::for_tests();
        assert!(parse(&mut vm, &[Value::str("{nope")]).is_err());
    }
}
