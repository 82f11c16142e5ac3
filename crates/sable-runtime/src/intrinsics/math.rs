//! Math statics

use crate::error::VmResult;
use crate::value::Value;
use crate::vm::Vm;

use super::{arg, to_num};

fn unary(vm: &mut Vm, args: &[Value], f: impl Fn(f64) -> f64) -> VmResult<Value> {
    Ok(Value::Number(f(to_num(vm, &arg(args, 0))?)))
}

fn binary(vm: &mut Vm, args: &[Value], f: impl Fn(f64, f64) -> f64) -> VmResult<Value> {
    let a = to_num(vm, &arg(args, 0))?;
    let b = to_num(vm, &arg(args, 1))?;
    Ok(Value::Number(f(a, b)))
}

pub fn abs(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    unary(vm, args, f64::abs)
}

pub fn floor(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    unary(vm, args, f64::floor)
}

pub fn ceil(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    unary(vm, args, f64::ceil)
}

pub fn round(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    // JS rounds half-up (toward +inf), unlike Rust's half-away-from-zero
    unary(vm, args, |n| (n + 0.5).floor())
}

pub fn trunc(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    unary(vm, args, f64::trunc)
}

pub fn sqrt(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    unary(vm, args, f64::sqrt)
}

pub fn cbrt(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    unary(vm, args, f64::cbrt)
}

pub fn pow(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    binary(vm, args, f64::powf)
}

pub fn min(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let mut best = f64::INFINITY;
    for v in args {
        let n = to_num(vm, v)?;
        if n.is_nan() {
            return Ok(Value::Number(f64::NAN));
        }
        best = best.min(n);
    }
    Ok(Value::Number(best))
}

pub fn max(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let mut best = f64::NEG_INFINITY;
    for v in args {
        let n = to_num(vm, v)?;
        if n.is_nan() {
            return Ok(Value::Number(f64::NAN));
        }
        best = best.max(n);
    }
    Ok(Value::Number(best))
}

pub fn random(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = args;
    Ok(Value::Number(vm.next_random()))
}

pub fn log(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    unary(vm, args, f64::ln)
}

pub fn log2(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    unary(vm, args, f64::log2)
}

pub fn log10(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    unary(vm, args, f64::log10)
}

pub fn exp(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    unary(vm, args, f64::exp)
}

pub fn sin(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    unary(vm, args, f64::sin)
}

pub fn cos(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    unary(vm, args, f64::cos)
}

pub fn tan(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    unary(vm, args, f64::tan)
}

pub fn asin(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    unary(vm, args, f64::asin)
}

pub fn acos(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    unary(vm, args, f64::acos)
}

pub fn atan(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    unary(vm, args, f64::atan)
}

pub fn atan2(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    binary(vm, args, f64::atan2)
}

pub fn sign(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    unary(vm, args, |n| {
        if n.is_nan() || n == 0.0 { n } else { n.signum() }
    })
}

pub fn hypot(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let mut sum = 0.0;
    for v in args {
        let n = to_num(vm, v)?;
        sum += n * n;
    }
    Ok(Value::Number(sum.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;

    #[test]
    fn round_is_half_up() {
        let mut vm = Vm::for_tests();
        let r = round(&mut vm, &[Value::Number(-0.5)]).unwrap();
        assert_eq!(r.as_number(), Some(0.0));
        let r = round(&mut vm, &[Value::Number(2.5)]).unwrap();
        assert_eq!(r.as_number(), Some(3.0));
    }

    #[test]
    fn min_max_with_nan() {
        let mut vm = Vm::for_tests();
        let r = min(&mut vm, &[Value::Number(1.0), Value::Number(f64::NAN)]).unwrap();
        assert!(r.as_number().unwrap().is_nan());
        let r = max(&mut vm, &[]).unwrap();
        assert_eq!(r.as_number(), Some(f64::NEG_INFINITY));
    }
}
