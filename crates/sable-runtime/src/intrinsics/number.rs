//! Number statics, global numeric functions, and number instance methods

use crate::error::{VmError, VmResult};
use crate::number;
use crate::ops;
use crate::value::Value;
use crate::vm::Vm;

use super::{arg, to_num};

pub fn is_integer(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    Ok(Value::Bool(match arg(args, 0) {
        Value::Number(n) => n.is_finite() && n.fract() == 0.0,
        _ => false,
    }))
}

pub fn is_finite_strict(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    Ok(Value::Bool(matches!(arg(args, 0), Value::Number(n) if n.is_finite())))
}

pub fn is_nan_strict(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    Ok(Value::Bool(matches!(arg(args, 0), Value::Number(n) if n.is_nan())))
}

// ---- global functions (coercing) ----

pub fn parse_int(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let s = ops::stringify(vm, &arg(args, 0))?;
    let radix = match arg(args, 1) {
        Value::Undefined => 0,
        v => to_num(vm, &v)? as u32,
    };
    Ok(Value::Number(number::parse_int(&s, radix)))
}

pub fn parse_float(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let s = ops::stringify(vm, &arg(args, 0))?;
    Ok(Value::Number(number::parse_float(&s)))
}

pub fn global_is_nan(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let n = to_num(vm, &arg(args, 0))?;
    Ok(Value::Bool(n.is_nan()))
}

pub fn global_is_finite(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let n = to_num(vm, &arg(args, 0))?;
    Ok(Value::Bool(n.is_finite()))
}

// ---- instance methods (dynamic dispatch on number receivers) ----

pub fn to_fixed(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let n = to_num(vm, &arg(args, 0))?;
    let digits = match arg(args, 1) {
        Value::Undefined => 0,
        v => to_num(vm, &v)? as i64,
    };
    if !(0..=100).contains(&digits) {
        return Err(VmError::range_error("toFixed() digits argument must be between 0 and 100"));
    }
    Ok(Value::str(format!("{:.*}", digits as usize, n)))
}

pub fn to_string_radix(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let n = to_num(vm, &arg(args, 0))?;
    let radix = match arg(args, 1) {
        Value::Undefined => 10,
        v => to_num(vm, &v)? as u32,
    };
    if radix == 10 {
        return Ok(Value::str(number::to_js_string(n)));
    }
    if !(2..=36).contains(&radix) {
        return Err(VmError::range_error("toString() radix must be between 2 and 36"));
    }
    if !n.is_finite() {
        return Ok(Value::str(number::to_js_string(n)));
    }

    let negative = n < 0.0;
    let mut int = n.abs().trunc() as u64;
    let digits = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::new();
    loop {
        out.push(digits[(int % radix as u64) as usize]);
        int /= radix as u64;
        if int == 0 {
            break;
        }
    }
    if negative {
        out.push(b'-');
    }
    out.reverse();
    Ok(Value::str(String::from_utf8_lossy(&out).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;

    #[test]
    fn strict_checks_do_not_coerce() {
        let mut vm = Vm::for_tests();
        let r = is_nan_strict(&mut vm, &[Value::str("abc")]).unwrap();
        assert!(!r.to_boolean());
        let r = global_is_nan(&mut vm, &[Value::str("abc")]).unwrap();
        assert!(r.to_boolean());
    }

    #[test]
    fn to_fixed_pads() {
        let mut vm = Vm::for_tests();
        let r = to_fixed(&mut vm, &[Value::Number(1.5), Value::Number(3.0)]).unwrap();
        assert_eq!(r.as_str(), Some("1.500"));
    }

    #[test]
    fn to_string_radix_16() {
        let mut vm = Vm::for_tests();
        let r = to_string_radix(&mut vm, &[Value::Number(255.0), Value::Number(16.0)]).unwrap();
        assert_eq!(r.as_str(), Some("ff"));
        let r = to_string_radix(&mut vm, &[Value::Number(-8.0), Value::Number(2.0)]).unwrap();
        assert_eq!(r.as_str(), Some("-1000"));
    }
}
