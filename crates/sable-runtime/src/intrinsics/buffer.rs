//! Buffer operations. `toString` validates its encoding argument and
//! raises on anything that is not a known encoding string.

use std::rc::Rc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::{VmError, VmResult};
use crate::value::{BufferData, Value};
use crate::vm::Vm;

use super::{arg, to_num};

fn recv(args: &[Value]) -> VmResult<Rc<BufferData>> {
    match args.first() {
        Some(Value::Buffer(b)) => Ok(b.clone()),
        _ => Err(VmError::type_error("Receiver is not a Buffer")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Utf8,
    Base64,
    Hex,
}

fn parse_encoding(v: &Value) -> VmResult<Encoding> {
    match v {
        Value::Undefined => Ok(Encoding::Utf8),
        Value::Str(s) => match &**s {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "base64" => Ok(Encoding::Base64),
            "hex" => Ok(Encoding::Hex),
            other => Err(VmError::type_error(format!("Unknown encoding: {other}"))),
        },
        other => Err(VmError::type_error(format!(
            "Encoding must be a string, got {}",
            other.type_of()
        ))),
    }
}

pub fn from(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let source = arg(args, 0);
    let bytes = match &source {
        Value::Str(s) => match parse_encoding(&arg(args, 1))? {
            Encoding::Utf8 => s.as_bytes().to_vec(),
            Encoding::Base64 => BASE64
                .decode(s.as_bytes())
                .map_err(|e| VmError::type_error(format!("Invalid base64 input: {e}")))?,
            Encoding::Hex => hex::decode(&**s)
                .map_err(|e| VmError::type_error(format!("Invalid hex input: {e}")))?,
        },
        Value::Array(a) => {
            let mut out = Vec::with_capacity(a.len());
            let elements: Vec<Value> = a.elements.borrow().clone();
            for el in elements {
                out.push(to_num(vm, &el)? as i64 as u8);
            }
            out
        }
        Value::Buffer(b) => b.bytes.borrow().clone(),
        other => {
            return Err(VmError::type_error(format!(
                "Cannot create Buffer from {}",
                other.type_of()
            )));
        }
    };
    Ok(Value::Buffer(Rc::new(BufferData {
        bytes: std::cell::RefCell::new(bytes),
    })))
}

pub fn alloc(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let size = to_num(vm, &arg(args, 0))?;
    if size < 0.0 || !size.is_finite() {
        return Err(VmError::range_error("Invalid Buffer size"));
    }
    Ok(Value::Buffer(Rc::new(BufferData {
        bytes: std::cell::RefCell::new(vec![0u8; size as usize]),
    })))
}

pub fn concat(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let list = match arg(args, 0) {
        Value::Array(a) => a,
        other => {
            return Err(VmError::type_error(format!(
                "Buffer.concat expects an array, got {}",
                other.type_of()
            )));
        }
    };
    let mut out = Vec::new();
    for item in list.elements.borrow().iter() {
        match item {
            Value::Buffer(b) => out.extend_from_slice(&b.bytes.borrow()),
            other => {
                return Err(VmError::type_error(format!(
                    "Buffer.concat list contains {}",
                    other.type_of()
                )));
            }
        }
    }
    Ok(Value::Buffer(Rc::new(BufferData {
        bytes: std::cell::RefCell::new(out),
    })))
}

pub fn to_string(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let buf = recv(args)?;
    let bytes = buf.bytes.borrow();
    Ok(Value::str(match parse_encoding(&arg(args, 1))? {
        Encoding::Utf8 => String::from_utf8_lossy(&bytes).into_owned(),
        Encoding::Base64 => BASE64.encode(&*bytes),
        Encoding::Hex => hex::encode(&*bytes),
    }))
}

pub fn slice(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let buf = recv(args)?;
    let bytes = buf.bytes.borrow();
    let len = bytes.len();
    let clamp = |n: f64| -> usize {
        if n < 0.0 {
            len.saturating_sub((-n) as usize)
        } else {
            (n as usize).min(len)
        }
    };
    let start = match arg(args, 1) {
        Value::Undefined => 0,
        v => clamp(to_num(vm, &v)?),
    };
    let end = match arg(args, 2) {
        Value::Undefined => len,
        v => clamp(to_num(vm, &v)?),
    };
    let out = if start < end {
        bytes[start..end].to_vec()
    } else {
        Vec::new()
    };
    Ok(Value::Buffer(Rc::new(BufferData {
        bytes: std::cell::RefCell::new(out),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;

    #[test]
    fn utf8_roundtrip() {
        let mut vm = Vm::for_tests();
        let b = from(&mut vm, &[Value::str("hello"), Value::Undefined]).unwrap();
        let s = to_string(&mut vm, &[b, Value::str("utf8")]).unwrap();
        assert_eq!(s.as_str(), Some("hello"));
    }

    #[test]
    fn hex_and_base64_encodings() {
        let mut vm = Vm::for_tests();
        let b = from(&mut vm, &[Value::str("abc"), Value::Undefined]).unwrap();
        let hex_s = to_string(&mut vm, &[b.clone(), Value::str("hex")]).unwrap();
        assert_eq!(hex_s.as_str(), Some("616263"));
        let b64 = to_string(&mut vm, &[b, Value::str("base64")]).unwrap();
        assert_eq!(b64.as_str(), Some("YWJj"));
    }

    #[test]
    fn non_string_encoding_is_rejected() {
        let mut vm = Vm::for_tests();
        let b = from(&mut vm, &[Value::str("x"), Value::Undefined]).unwrap();
        assert!(to_string(&mut vm, &[b, Value::Number(8.0)]).is_err());
    }

    #[test]
    fn concat_joins_buffers() {
        let mut vm = Vm::for_tests();
        let a = from(&mut vm, &[Value::str("ab"), Value::Undefined]).unwrap();
        let b = from(&mut vm, &[Value::str("cd"), Value::Undefined]).unwrap();
        let joined = concat(&mut vm, &[Value::array(vec![a, b])]).unwrap();
        let s = to_string(&mut vm, &[joined, Value::Undefined]).unwrap();
        assert_eq!(s.as_str(), Some("abcd"));
    }
}
