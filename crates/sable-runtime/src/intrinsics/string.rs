//! String builtin operations. Indices follow character positions;
//! `charCodeAt`/`codePointAt` work over UTF-16 units to match JS.

use std::rc::Rc;

use crate::error::{VmError, VmResult};
use crate::ops;
use crate::value::Value;
use crate::vm::Vm;

use super::{arg, to_num};

fn recv(args: &[Value]) -> VmResult<Rc<str>> {
    match args.first() {
        Some(Value::Str(s)) => Ok(s.clone()),
        other => Err(VmError::type_error(format!(
            "String operation on {}",
            other.map(Value::type_of).unwrap_or("undefined")
        ))),
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Clamp a possibly-negative relative index into `[0, len]`
fn rel_index(n: f64, len: usize) -> usize {
    if n.is_nan() {
        return 0;
    }
    if n < 0.0 {
        len.saturating_sub((-n) as usize)
    } else {
        (n as usize).min(len)
    }
}

fn substring_chars(s: &str, start: usize, end: usize) -> String {
    s.chars().skip(start).take(end.saturating_sub(start)).collect()
}

pub fn slice(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let s = recv(args)?;
    let len = char_len(&s);
    let start = match arg(args, 1) {
        Value::Undefined => 0,
        v => rel_index(to_num(vm, &v)?, len),
    };
    let end = match arg(args, 2) {
        Value::Undefined => len,
        v => rel_index(to_num(vm, &v)?, len),
    };
    Ok(Value::str(substring_chars(&s, start, end)))
}

pub fn substring(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let s = recv(args)?;
    let len = char_len(&s);
    let mut start = match arg(args, 1) {
        Value::Undefined => 0,
        v => (to_num(vm, &v)?.max(0.0) as usize).min(len),
    };
    let mut end = match arg(args, 2) {
        Value::Undefined => len,
        v => (to_num(vm, &v)?.max(0.0) as usize).min(len),
    };
    if start > end {
        std::mem::swap(&mut start, &mut end);
    }
    Ok(Value::str(substring_chars(&s, start, end)))
}

pub fn index_of(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let s = recv(args)?;
    let needle = ops::stringify(vm, &arg(args, 1))?;
    let found = s.find(&*needle).map(|byte| s[..byte].chars().count() as f64);
    Ok(Value::Number(found.unwrap_or(-1.0)))
}

pub fn last_index_of(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let s = recv(args)?;
    let needle = ops::stringify(vm, &arg(args, 1))?;
    let found = s.rfind(&*needle).map(|byte| s[..byte].chars().count() as f64);
    Ok(Value::Number(found.unwrap_or(-1.0)))
}

pub fn includes(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let s = recv(args)?;
    let needle = ops::stringify(vm, &arg(args, 1))?;
    Ok(Value::Bool(s.contains(&*needle)))
}

pub fn starts_with(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let s = recv(args)?;
    let needle = ops::stringify(vm, &arg(args, 1))?;
    Ok(Value::Bool(s.starts_with(&*needle)))
}

pub fn ends_with(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let s = recv(args)?;
    let needle = ops::stringify(vm, &arg(args, 1))?;
    Ok(Value::Bool(s.ends_with(&*needle)))
}

pub fn to_upper_case(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    Ok(Value::str(recv(args)?.to_uppercase()))
}

pub fn to_lower_case(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    Ok(Value::str(recv(args)?.to_lowercase()))
}

pub fn trim(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    Ok(Value::str(recv(args)?.trim().to_string()))
}

pub fn trim_start(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    Ok(Value::str(recv(args)?.trim_start().to_string()))
}

pub fn trim_end(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    Ok(Value::str(recv(args)?.trim_end().to_string()))
}

pub fn split(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let s = recv(args)?;
    let limit = match arg(args, 2) {
        Value::Undefined => usize::MAX,
        v => to_num(vm, &v)?.max(0.0) as usize,
    };
    let parts: Vec<Value> = match arg(args, 1) {
        Value::Undefined => vec![Value::Str(s.clone())],
        Value::Str(sep) if sep.is_empty() => {
            s.chars().map(|c| Value::str(c.to_string())).collect()
        }
        Value::Str(sep) => s.split(&*sep).map(Value::str).collect(),
        Value::Regex(r) => {
            let mut parts = Vec::new();
            let mut last = 0;
            for m in r.regex.find_iter(&s) {
                parts.push(Value::str(&s[last..m.start()]));
                last = m.end();
            }
            parts.push(Value::str(&s[last..]));
            parts
        }
        other => {
            let sep = ops::stringify(vm, &other)?;
            s.split(&*sep).map(Value::str).collect()
        }
    };
    Ok(Value::array(parts.into_iter().take(limit).collect()))
}

pub fn repeat(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let s = recv(args)?;
    let count = to_num(vm, &arg(args, 1))?;
    if count < 0.0 || !count.is_finite() {
        return Err(VmError::range_error("Invalid count value"));
    }
    Ok(Value::str(s.repeat(count as usize)))
}

fn pad(vm: &mut Vm, args: &[Value], start: bool) -> VmResult<Value> {
    let s = recv(args)?;
    let target = to_num(vm, &arg(args, 1))?.max(0.0) as usize;
    let filler = match arg(args, 2) {
        Value::Undefined => " ".to_string(),
        v => ops::stringify(vm, &v)?.to_string(),
    };
    let len = char_len(&s);
    if len >= target || filler.is_empty() {
        return Ok(Value::Str(s));
    }
    let missing = target - len;
    let mut padding: String = filler.chars().cycle().take(missing).collect();
    if start {
        padding.push_str(&s);
        Ok(Value::str(padding))
    } else {
        let mut out = s.to_string();
        out.push_str(&padding);
        Ok(Value::str(out))
    }
}

pub fn pad_start(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    pad(vm, args, true)
}

pub fn pad_end(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    pad(vm, args, false)
}

pub fn char_at(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let s = recv(args)?;
    let idx = to_num(vm, &arg(args, 1))?;
    if idx < 0.0 || idx.fract() != 0.0 {
        return Ok(Value::str(""));
    }
    Ok(s.chars()
        .nth(idx as usize)
        .map(|c| Value::str(c.to_string()))
        .unwrap_or_else(|| Value::str("")))
}

pub fn char_code_at(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let s = recv(args)?;
    let idx = to_num(vm, &arg(args, 1))?.max(0.0) as usize;
    Ok(s.encode_utf16()
        .nth(idx)
        .map(|u| Value::Number(u as f64))
        .unwrap_or(Value::Number(f64::NAN)))
}

pub fn code_point_at(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let s = recv(args)?;
    let idx = to_num(vm, &arg(args, 1))?.max(0.0) as usize;
    Ok(s.chars()
        .nth(idx)
        .map(|c| Value::Number(c as u32 as f64))
        .unwrap_or(Value::Undefined))
}

pub fn at(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let s = recv(args)?;
    let len = char_len(&s) as f64;
    let raw = to_num(vm, &arg(args, 1))?;
    let idx = if raw < 0.0 { raw + len } else { raw };
    if idx < 0.0 || idx >= len {
        return Ok(Value::Undefined);
    }
    Ok(s.chars()
        .nth(idx as usize)
        .map(|c| Value::str(c.to_string()))
        .unwrap_or(Value::Undefined))
}

pub fn concat(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let s = recv(args)?;
    let mut out = s.to_string();
    for extra in &args[1..] {
        out.push_str(&ops::stringify(vm, extra)?);
    }
    Ok(Value::str(out))
}

fn replacement_for(vm: &mut Vm, replacement: &Value, matched: &str) -> VmResult<String> {
    if replacement.is_callable() {
        let out = vm.call_value(replacement, Value::Undefined, &[Value::str(matched)])?;
        Ok(ops::stringify(vm, &out)?.to_string())
    } else {
        Ok(ops::stringify(vm, replacement)?.to_string())
    }
}

pub fn replace(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let s = recv(args)?;
    let replacement = arg(args, 2);
    match arg(args, 1) {
        Value::Regex(r) => {
            let global = r.flags.contains('g');
            let mut out = String::new();
            let mut last = 0;
            for m in r.regex.find_iter(&s) {
                let matched = &s[m.range()];
                out.push_str(&s[last..m.start()]);
                out.push_str(&replacement_for(vm, &replacement, matched)?);
                last = m.end();
                if !global {
                    break;
                }
            }
            out.push_str(&s[last..]);
            Ok(Value::str(out))
        }
        pattern => {
            let needle = ops::stringify(vm, &pattern)?;
            match s.find(&*needle) {
                Some(pos) => {
                    let rep = replacement_for(vm, &replacement, &needle)?;
                    let mut out = String::with_capacity(s.len());
                    out.push_str(&s[..pos]);
                    out.push_str(&rep);
                    out.push_str(&s[pos + needle.len()..]);
                    Ok(Value::str(out))
                }
                None => Ok(Value::Str(s)),
            }
        }
    }
}

pub fn replace_all(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let s = recv(args)?;
    let replacement = arg(args, 2);
    match arg(args, 1) {
        Value::Regex(r) => {
            if !r.flags.contains('g') {
                return Err(VmError::type_error(
                    "replaceAll must be called with a global RegExp",
                ));
            }
            replace(vm, args)
        }
        pattern => {
            let needle = ops::stringify(vm, &pattern)?;
            if needle.is_empty() {
                return Ok(Value::Str(s));
            }
            let mut out = String::with_capacity(s.len());
            let mut rest: &str = &s;
            while let Some(pos) = rest.find(&*needle) {
                out.push_str(&rest[..pos]);
                out.push_str(&replacement_for(vm, &replacement, &needle)?);
                rest = &rest[pos + needle.len()..];
            }
            out.push_str(rest);
            Ok(Value::str(out))
        }
    }
}

pub fn match_(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let s = recv(args)?;
    let regex = match arg(args, 1) {
        Value::Regex(r) => r,
        other => {
            let pattern = ops::stringify(vm, &other)?;
            Rc::new(crate::value::RegexData::compile(&pattern, "")?)
        }
    };
    if regex.flags.contains('g') {
        let matches: Vec<Value> = regex
            .regex
            .find_iter(&s)
            .map(|m| Value::str(&s[m.range()]))
            .collect();
        if matches.is_empty() {
            return Ok(Value::Null);
        }
        return Ok(Value::array(matches));
    }
    match regex.regex.find(&s) {
        Some(m) => {
            let mut groups = vec![Value::str(&s[m.range()])];
            for g in m.captures.iter() {
                groups.push(match g {
                    Some(range) => Value::str(&s[range.clone()]),
                    None => Value::Undefined,
                });
            }
            Ok(Value::array(groups))
        }
        None => Ok(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;

    #[test]
    fn slice_negative_clamps_from_end() {
        let mut vm = Vm::for_tests();
        let r = slice(&mut vm, &[Value::str("hello"), Value::Number(-3.0)]).unwrap();
        assert_eq!(r.as_str(), Some("llo"));
        let r = slice(
            &mut vm,
            &[Value::str("hello"), Value::Number(1.0), Value::Number(-1.0)],
        )
        .unwrap();
        assert_eq!(r.as_str(), Some("ell"));
    }

    #[test]
    fn substring_swaps_out_of_order() {
        let mut vm = Vm::for_tests();
        let r = substring(
            &mut vm,
            &[Value::str("hello"), Value::Number(3.0), Value::Number(1.0)],
        )
        .unwrap();
        assert_eq!(r.as_str(), Some("el"));
    }

    #[test]
    fn split_empty_separator_yields_chars() {
        let mut vm = Vm::for_tests();
        let r = split(&mut vm, &[Value::str("abc"), Value::str("")]).unwrap();
        assert_eq!(r.as_array().unwrap().len(), 3);
    }

    #[test]
    fn repeat_rejects_negative() {
        let mut vm = Vm::for_tests();
        assert!(repeat(&mut vm, &[Value::str("ab"), Value::Number(-1.0)]).is_err());
        let r = repeat(&mut vm, &[Value::str("ab"), Value::Number(3.0)]).unwrap();
        assert_eq!(r.as_str(), Some("ababab"));
    }

    #[test]
    fn pad_start_cycles_filler() {
        let mut vm = Vm::for_tests();
        let r = pad_start(
            &mut vm,
            &[Value::str("5"), Value::Number(4.0), Value::str("ab")],
        )
        .unwrap();
        assert_eq!(r.as_str(), Some("aba5"));
    }

    #[test]
    fn replace_all_replaces_every_occurrence() {
        let mut vm = Vm::for_tests();
        let r = replace_all(
            &mut vm,
            &[Value::str("a.b.c"), Value::str("."), Value::str("-")],
        )
        .unwrap();
        assert_eq!(r.as_str(), Some("a-b-c"));
    }
}
