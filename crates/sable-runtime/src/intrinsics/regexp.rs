//! RegExp operations

use std::rc::Rc;

use crate::error::{VmError, VmResult};
use crate::ops;
use crate::value::{RegexData, Value};
use crate::vm::Vm;

use super::arg;

fn recv(args: &[Value]) -> VmResult<Rc<RegexData>> {
    match args.first() {
        Some(Value::Regex(r)) => Ok(r.clone()),
        _ => Err(VmError::type_error("Receiver is not a RegExp")),
    }
}

pub fn new_regexp(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let (pattern, flags) = match (arg(args, 0), arg(args, 1)) {
        (Value::Regex(r), Value::Undefined) => (r.pattern.to_string(), r.flags.to_string()),
        (Value::Regex(r), flags) => (r.pattern.to_string(), ops::stringify(vm, &flags)?.to_string()),
        (pattern, Value::Undefined) => (ops::stringify(vm, &pattern)?.to_string(), String::new()),
        (pattern, flags) => (
            ops::stringify(vm, &pattern)?.to_string(),
            ops::stringify(vm, &flags)?.to_string(),
        ),
    };
    Ok(Value::Regex(Rc::new(RegexData::compile(&pattern, &flags)?)))
}

pub fn test(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let regex = recv(args)?;
    let input = ops::stringify(vm, &arg(args, 1))?;
    let sticky = regex.flags.contains('g') || regex.flags.contains('y');
    let start = if sticky { regex.last_index.get().min(input.len()) } else { 0 };

    match regex.regex.find_from(&input, start).next() {
        Some(m) => {
            if sticky {
                regex.last_index.set(m.end());
            }
            Ok(Value::Bool(true))
        }
        None => {
            if sticky {
                regex.last_index.set(0);
            }
            Ok(Value::Bool(false))
        }
    }
}

pub fn exec(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let regex = recv(args)?;
    let input = ops::stringify(vm, &arg(args, 1))?;
    let global = regex.flags.contains('g') || regex.flags.contains('y');
    let start = if global { regex.last_index.get().min(input.len()) } else { 0 };

    match regex.regex.find_from(&input, start).next() {
        Some(m) => {
            if global {
                regex.last_index.set(m.end());
            }
            let mut groups = vec![Value::str(&input[m.range()])];
            for capture in m.captures.iter() {
                groups.push(match capture {
                    Some(range) => Value::str(&input[range.clone()]),
                    None => Value::Undefined,
                });
            }
            Ok(Value::array(groups))
        }
        None => {
            if global {
                regex.last_index.set(0);
            }
            Ok(Value::Null)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;

    #[test]
    fn test_matches_and_advances_last_index() {
        let mut vm = Vm::for_tests();
        let re = new_regexp(&mut vm, &[Value::str("a+"), Value::str("g")]).unwrap();
        let hit = test(&mut vm, &[re.clone(), Value::str("baab")]).unwrap();
        assert!(hit.to_boolean());
        let hit = test(&mut vm, &[re.clone(), Value::str("baab")]).unwrap();
        assert!(!hit.to_boolean());
        // lastIndex reset after a miss; matches again
        let hit = test(&mut vm, &[re, Value::str("baab")]).unwrap();
        assert!(hit.to_boolean());
    }

    #[test]
    fn exec_returns_capture_groups() {
        let mut vm = Vm::for_tests();
        let re = new_regexp(&mut vm, &[Value::str("(a)(b)?"), Value::Undefined]).unwrap();
        let result = exec(&mut vm, &[re, Value::str("ac")]).unwrap();
        let groups = result.as_array().unwrap();
        assert_eq!(groups.get(0).as_str(), Some("a"));
        assert_eq!(groups.get(1).as_str(), Some("a"));
        assert!(groups.get(2).is_undefined());
    }

    #[test]
    fn invalid_pattern_is_syntax_error() {
        let mut vm = Vm::for_tests();
        assert!(new_regexp(&mut vm, &[Value::str("("), Value::Undefined]).is_err());
    }
}
