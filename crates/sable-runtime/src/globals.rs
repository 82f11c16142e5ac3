//! Global builtin objects.
//!
//! These back the fully dynamic dispatch tier: when the emitter cannot
//! resolve a call statically, emitted code falls back to `GetGlobal` +
//! dynamic invocation, and must observe the same behavior the strategy
//! fast paths produce. Every native here routes through the shared
//! intrinsic implementations.
//!
//! Published once at VM construction, before any emitted code runs, and
//! treated as immutable thereafter.

use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use sable_bytecode::Intrinsic;

use crate::intrinsics;
use crate::value::{ObjectData, PropKey, SymbolData, Value, well_known};

fn intrinsic_fn(name: &'static str, op: Intrinsic) -> Value {
    Value::native(name, move |vm, _this, args| intrinsics::invoke(vm, op, args))
}

fn object_of(entries: Vec<(&str, Value)>) -> Value {
    let obj = ObjectData::new();
    for (k, v) in entries {
        obj.set_data(PropKey::str(k), v);
    }
    Value::Object(Rc::new(obj))
}

fn with_props(f: Value, entries: Vec<(&str, Value)>) -> Value {
    if let Value::Function(data) = &f {
        let mut props = data.props.borrow_mut();
        for (k, v) in entries {
            props.insert(k.into(), v);
        }
    }
    f
}

/// Build the global table. Well-known symbols are allocated here with
/// their fixed ids so emitted code and the VM agree on identity.
pub fn default_globals() -> FxHashMap<Rc<str>, Value> {
    let mut globals: FxHashMap<Rc<str>, Value> = FxHashMap::default();
    let mut set = |name: &str, value: Value| {
        globals.insert(name.into(), value);
    };

    set(
        "console",
        object_of(vec![
            ("log", intrinsic_fn("log", Intrinsic::ConsoleLog)),
            ("info", intrinsic_fn("info", Intrinsic::ConsoleInfo)),
            ("debug", intrinsic_fn("debug", Intrinsic::ConsoleDebug)),
            ("error", intrinsic_fn("error", Intrinsic::ConsoleError)),
            ("warn", intrinsic_fn("warn", Intrinsic::ConsoleWarn)),
        ]),
    );

    set(
        "Math",
        object_of(vec![
            ("PI", Value::Number(std::f64::consts::PI)),
            ("E", Value::Number(std::f64::consts::E)),
            ("LN2", Value::Number(std::f64::consts::LN_2)),
            ("LN10", Value::Number(std::f64::consts::LN_10)),
            ("SQRT2", Value::Number(std::f64::consts::SQRT_2)),
            ("abs", intrinsic_fn("abs", Intrinsic::MathAbs)),
            ("floor", intrinsic_fn("floor", Intrinsic::MathFloor)),
            ("ceil", intrinsic_fn("ceil", Intrinsic::MathCeil)),
            ("round", intrinsic_fn("round", Intrinsic::MathRound)),
            ("trunc", intrinsic_fn("trunc", Intrinsic::MathTrunc)),
            ("sqrt", intrinsic_fn("sqrt", Intrinsic::MathSqrt)),
            ("cbrt", intrinsic_fn("cbrt", Intrinsic::MathCbrt)),
            ("pow", intrinsic_fn("pow", Intrinsic::MathPow)),
            ("min", intrinsic_fn("min", Intrinsic::MathMin)),
            ("max", intrinsic_fn("max", Intrinsic::MathMax)),
            ("random", intrinsic_fn("random", Intrinsic::MathRandom)),
            ("log", intrinsic_fn("log", Intrinsic::MathLog)),
            ("log2", intrinsic_fn("log2", Intrinsic::MathLog2)),
            ("log10", intrinsic_fn("log10", Intrinsic::MathLog10)),
            ("exp", intrinsic_fn("exp", Intrinsic::MathExp)),
            ("sin", intrinsic_fn("sin", Intrinsic::MathSin)),
            ("cos", intrinsic_fn("cos", Intrinsic::MathCos)),
            ("tan", intrinsic_fn("tan", Intrinsic::MathTan)),
            ("asin", intrinsic_fn("asin", Intrinsic::MathAsin)),
            ("acos", intrinsic_fn("acos", Intrinsic::MathAcos)),
            ("atan", intrinsic_fn("atan", Intrinsic::MathAtan)),
            ("atan2", intrinsic_fn("atan2", Intrinsic::MathAtan2)),
            ("sign", intrinsic_fn("sign", Intrinsic::MathSign)),
            ("hypot", intrinsic_fn("hypot", Intrinsic::MathHypot)),
        ]),
    );

    set(
        "JSON",
        object_of(vec![
            ("parse", intrinsic_fn("parse", Intrinsic::JsonParse)),
            ("stringify", intrinsic_fn("stringify", Intrinsic::JsonStringify)),
        ]),
    );

    set(
        "Object",
        with_props(
            Value::native("Object", |_vm, _this, args| {
                Ok(match args.first() {
                    Some(v) if !v.is_nullish() => v.clone(),
                    _ => Value::Object(Rc::new(ObjectData::new())),
                })
            }),
            vec![
                ("keys", intrinsic_fn("keys", Intrinsic::ObjectKeys)),
                ("values", intrinsic_fn("values", Intrinsic::ObjectValues)),
                ("entries", intrinsic_fn("entries", Intrinsic::ObjectEntries)),
                ("assign", intrinsic_fn("assign", Intrinsic::ObjectAssign)),
                ("freeze", intrinsic_fn("freeze", Intrinsic::ObjectFreeze)),
                ("fromEntries", intrinsic_fn("fromEntries", Intrinsic::ObjectFromEntries)),
                (
                    "getOwnPropertyNames",
                    intrinsic_fn("getOwnPropertyNames", Intrinsic::ObjectGetOwnPropertyNames),
                ),
            ],
        ),
    );

    set(
        "Array",
        with_props(
            Value::native("Array", |_vm, _this, args| {
                Ok(match args {
                    [Value::Number(n)] if n.fract() == 0.0 && *n >= 0.0 => {
                        Value::array(vec![Value::Undefined; *n as usize])
                    }
                    _ => Value::array(args.to_vec()),
                })
            }),
            vec![
                ("isArray", intrinsic_fn("isArray", Intrinsic::ArrayIsArray)),
                ("from", intrinsic_fn("from", Intrinsic::ArrayFrom)),
                ("of", intrinsic_fn("of", Intrinsic::ArrayOf)),
            ],
        ),
    );

    set(
        "Number",
        with_props(
            intrinsic_fn("Number", Intrinsic::NumberCast),
            vec![
                ("MAX_SAFE_INTEGER", Value::Number(9_007_199_254_740_991.0)),
                ("MIN_SAFE_INTEGER", Value::Number(-9_007_199_254_740_991.0)),
                ("EPSILON", Value::Number(f64::EPSILON)),
                ("POSITIVE_INFINITY", Value::Number(f64::INFINITY)),
                ("NEGATIVE_INFINITY", Value::Number(f64::NEG_INFINITY)),
                ("NaN", Value::Number(f64::NAN)),
                ("isInteger", intrinsic_fn("isInteger", Intrinsic::NumberIsInteger)),
                ("isFinite", intrinsic_fn("isFinite", Intrinsic::NumberIsFinite)),
                ("isNaN", intrinsic_fn("isNaN", Intrinsic::NumberIsNaN)),
                ("parseFloat", intrinsic_fn("parseFloat", Intrinsic::NumberParseFloat)),
                ("parseInt", intrinsic_fn("parseInt", Intrinsic::NumberParseInt)),
            ],
        ),
    );

    set(
        "String",
        with_props(
            intrinsic_fn("String", Intrinsic::StringCast),
            vec![(
                "fromCharCode",
                Value::native("fromCharCode", |vm, _this, args| {
                    let mut out = String::new();
                    let mut units: Vec<u16> = Vec::with_capacity(args.len());
                    for v in args {
                        units.push(crate::ops::to_number(vm, v)? as i64 as u16);
                    }
                    out.extend(char::decode_utf16(units).map(|r| {
                        r.unwrap_or(char::REPLACEMENT_CHARACTER)
                    }));
                    Ok(Value::str(out))
                }),
            )],
        ),
    );

    set("Boolean", intrinsic_fn("Boolean", Intrinsic::BooleanCast));
    set("BigInt", intrinsic_fn("BigInt", Intrinsic::BigIntNew));

    let well_known_symbol = |id: u64, description: &str| {
        Value::Symbol(Rc::new(SymbolData {
            id,
            description: Some(description.into()),
        }))
    };
    set(
        "Symbol",
        with_props(
            intrinsic_fn("Symbol", Intrinsic::SymbolNew),
            vec![
                ("for", intrinsic_fn("for", Intrinsic::SymbolFor)),
                ("keyFor", intrinsic_fn("keyFor", Intrinsic::SymbolKeyFor)),
                (
                    "iterator",
                    well_known_symbol(well_known::ITERATOR, "Symbol.iterator"),
                ),
                (
                    "asyncIterator",
                    well_known_symbol(well_known::ASYNC_ITERATOR, "Symbol.asyncIterator"),
                ),
                (
                    "toStringTag",
                    well_known_symbol(well_known::TO_STRING_TAG, "Symbol.toStringTag"),
                ),
                (
                    "hasInstance",
                    well_known_symbol(well_known::HAS_INSTANCE, "Symbol.hasInstance"),
                ),
            ],
        ),
    );

    set(
        "Promise",
        with_props(
            intrinsic_fn("Promise", Intrinsic::NewPromise),
            vec![
                ("resolve", intrinsic_fn("resolve", Intrinsic::PromiseResolve)),
                ("reject", intrinsic_fn("reject", Intrinsic::PromiseReject)),
                ("all", intrinsic_fn("all", Intrinsic::PromiseAll)),
                ("allSettled", intrinsic_fn("allSettled", Intrinsic::PromiseAllSettled)),
                ("race", intrinsic_fn("race", Intrinsic::PromiseRace)),
                ("any", intrinsic_fn("any", Intrinsic::PromiseAny)),
            ],
        ),
    );

    set("Map", intrinsic_fn("Map", Intrinsic::NewMap));
    set("Set", intrinsic_fn("Set", Intrinsic::NewSet));
    set("WeakMap", intrinsic_fn("WeakMap", Intrinsic::NewWeakMap));
    set("WeakSet", intrinsic_fn("WeakSet", Intrinsic::NewWeakSet));
    set("RegExp", intrinsic_fn("RegExp", Intrinsic::NewRegExp));
    set(
        "Date",
        with_props(
            intrinsic_fn("Date", Intrinsic::NewDate),
            vec![("now", intrinsic_fn("now", Intrinsic::DateNow))],
        ),
    );

    for name in ["Error", "TypeError", "RangeError", "SyntaxError", "ReferenceError", "AggregateError"] {
        set(
            name,
            Value::native(name, move |vm, _this, args| {
                let message = match args.first() {
                    Some(Value::Undefined) | None => String::new(),
                    Some(v) => crate::ops::stringify(vm, v)?.to_string(),
                };
                Ok(vm.make_error(name, &message))
            }),
        );
    }

    set(
        "Buffer",
        with_props(
            intrinsic_fn("Buffer", Intrinsic::BufferFrom),
            vec![
                ("from", intrinsic_fn("from", Intrinsic::BufferFrom)),
                ("concat", intrinsic_fn("concat", Intrinsic::BufferConcat)),
                ("alloc", intrinsic_fn("alloc", Intrinsic::BufferAlloc)),
            ],
        ),
    );

    set("parseInt", intrinsic_fn("parseInt", Intrinsic::ParseInt));
    set("parseFloat", intrinsic_fn("parseFloat", Intrinsic::ParseFloat));
    set("isNaN", intrinsic_fn("isNaN", Intrinsic::IsNaN));
    set("isFinite", intrinsic_fn("isFinite", Intrinsic::IsFinite));

    set("NaN", Value::Number(f64::NAN));
    set("Infinity", Value::Number(f64::INFINITY));

    let argv: Vec<Value> = std::env::args().map(Value::str).collect();
    let process_env = {
        let obj = ObjectData::new();
        let mut entries = IndexMap::new();
        for (k, v) in std::env::vars() {
            entries.insert(
                PropKey::str(k),
                crate::value::Property::Data(Value::str(v)),
            );
        }
        *obj.props.borrow_mut() = entries;
        Value::Object(Rc::new(obj))
    };
    set(
        "process",
        object_of(vec![
            ("argv", Value::array(argv)),
            ("env", process_env),
            ("cwd", intrinsic_fn("cwd", Intrinsic::ProcessCwd)),
            ("exit", intrinsic_fn("exit", Intrinsic::ProcessExit)),
        ]),
    );

    globals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;

    #[test]
    fn globals_cover_the_builtin_surface() {
        let globals = default_globals();
        for name in [
            "console", "Math", "JSON", "Object", "Array", "Number", "Promise", "Symbol",
            "parseInt", "process", "Error",
        ] {
            assert!(globals.contains_key(name), "missing global {name}");
        }
    }

    #[test]
    fn dynamic_math_matches_intrinsic_path() {
        let mut vm = Vm::for_tests();
        let globals = default_globals();
        let math = globals.get("Math").unwrap().clone();
        let floor = crate::ops::get_property(&mut vm, &math, "floor").unwrap();
        let via_global = vm
            .call_value(&floor, Value::Undefined, &[Value::Number(3.7)])
            .unwrap();
        let via_intrinsic =
            intrinsics::invoke(&mut vm, Intrinsic::MathFloor, &[Value::Number(3.7)]).unwrap();
        assert_eq!(via_global.as_number(), via_intrinsic.as_number());
    }
}
