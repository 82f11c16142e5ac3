//! Console operations. One line per call: no arguments prints an empty
//! line, multiple arguments print space-separated stringifications.

use crate::error::VmResult;
use crate::ops;
use crate::value::Value;
use crate::vm::Vm;

fn format_args(vm: &mut Vm, args: &[Value]) -> VmResult<String> {
    let mut out = String::new();
    for (i, v) in args.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&ops::stringify(vm, v)?);
    }
    Ok(out)
}

pub fn log(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let line = format_args(vm, args)?;
    vm.console.write_out(&line);
    Ok(Value::Undefined)
}

pub fn error(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let line = format_args(vm, args)?;
    vm.console.write_err(&line);
    Ok(Value::Undefined)
}

pub fn warn(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    error(vm, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;

    #[test]
    fn multiple_args_space_separated() {
        let mut vm = Vm::for_tests();
        log(
            &mut vm,
            &[Value::str("a"), Value::Number(1.0), Value::Bool(true)],
        )
        .unwrap();
        log(&mut vm, &[]).unwrap();
        assert_eq!(vm.captured_stdout(), "a 1 true\n\n");
    }

    #[test]
    fn error_goes_to_stderr() {
        let mut vm = Vm::for_tests();
        error(&mut vm, &[Value::str("bad")]).unwrap();
        assert_eq!(vm.captured_stdout(), "");
        assert_eq!(vm.captured_stderr(), "bad\n");
    }
}
