//! Minimal `process` surface

use std::rc::Rc;

use crate::error::{VmError, VmResult};
use crate::value::{ObjectData, PropKey, Value};
use crate::vm::Vm;

use super::{arg, to_num};

pub fn cwd(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = (vm, args);
    let dir = std::env::current_dir()
        .map_err(|e| VmError::Host {
            code: "ENOENT".into(),
            message: e.to_string(),
        })?
        .to_string_lossy()
        .into_owned();
    Ok(Value::str(dir))
}

pub fn exit(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let code = match arg(args, 0) {
        Value::Undefined => 0,
        v => to_num(vm, &v)? as i32,
    };
    Err(VmError::Exit(code))
}

pub fn env(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = (vm, args);
    let obj = ObjectData::new();
    for (k, v) in std::env::vars() {
        obj.set_data(PropKey::str(k), Value::str(v));
    }
    Ok(Value::Object(Rc::new(obj)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;

    #[test]
    fn exit_is_uncatchable() {
        let mut vm = Vm::for_tests();
        let err = exit(&mut vm, &[Value::Number(3.0)]).unwrap_err();
        assert!(!err.is_catchable());
        assert!(matches!(err, VmError::Exit(3)));
    }
}
