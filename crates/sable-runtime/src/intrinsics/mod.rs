//! Builtin operation implementations.
//!
//! One module per receiver kind, mirroring the emitter's strategy
//! registries. `invoke` is the single entry point for
//! `CallIntrinsic`-emitted fast paths; `method_intrinsic` maps a
//! (receiver kind, method name) pair to the same operations for the
//! fully dynamic dispatch path, so both paths share one implementation.

pub mod array;
pub mod buffer;
pub mod console;
pub mod date;
pub mod json;
pub mod map_set;
pub mod math;
pub mod number;
pub mod object;
pub mod process;
pub mod promise;
pub mod regexp;
pub mod string;

use std::rc::Rc;

use sable_bytecode::Intrinsic;

use crate::error::{VmError, VmResult};
use crate::ops;
use crate::value::Value;
use crate::vm::Vm;

/// Argument accessor: missing arguments read as undefined
pub(crate) fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Undefined)
}

/// Numeric coercion shorthand
pub(crate) fn to_num(vm: &mut Vm, v: &Value) -> VmResult<f64> {
    ops::to_number(vm, v)
}

/// Execute one builtin operation. For instance operations, `args[0]` is
/// the receiver.
pub fn invoke(vm: &mut Vm, op: Intrinsic, args: &[Value]) -> VmResult<Value> {
    use Intrinsic as I;
    match op {
        // console
        I::ConsoleLog | I::ConsoleInfo | I::ConsoleDebug => console::log(vm, args),
        I::ConsoleError => console::error(vm, args),
        I::ConsoleWarn => console::warn(vm, args),

        // global functions
        I::ParseInt => number::parse_int(vm, args),
        I::ParseFloat => number::parse_float(vm, args),
        I::IsNaN => number::global_is_nan(vm, args),
        I::IsFinite => number::global_is_finite(vm, args),

        // constructor-like calls
        I::SymbolNew => {
            let description = match arg(args, 0) {
                Value::Undefined => None,
                v => Some(ops::stringify(vm, &v)?),
            };
            Ok(Value::Symbol(vm.symbols.create(description)))
        }
        I::BigIntNew => Ok(Value::BigInt(ops::to_bigint(vm, &arg(args, 0))?)),
        I::DateCall => date::date_call(vm, args),
        I::StringCast => Ok(Value::Str(ops::stringify(vm, &arg(args, 0))?)),
        I::NumberCast => Ok(Value::Number(to_num(vm, &arg(args, 0))?)),
        I::BooleanCast => Ok(Value::Bool(arg(args, 0).to_boolean())),

        // constructors
        I::NewDate => date::new_date(vm, args),
        I::NewMap => map_set::new_map(vm, args),
        I::NewSet => map_set::new_set(vm, args),
        I::NewWeakMap => map_set::new_weak_map(vm, args),
        I::NewWeakSet => map_set::new_weak_set(vm, args),
        I::NewRegExp => regexp::new_regexp(vm, args),
        I::NewPromise => promise::new_promise(vm, args),
        I::NewError => new_error(vm, args, "Error"),
        I::NewTypeError => new_error(vm, args, "TypeError"),
        I::NewRangeError => new_error(vm, args, "RangeError"),

        // Math
        I::MathAbs => math::abs(vm, args),
        I::MathFloor => math::floor(vm, args),
        I::MathCeil => math::ceil(vm, args),
        I::MathRound => math::round(vm, args),
        I::MathTrunc => math::trunc(vm, args),
        I::MathSqrt => math::sqrt(vm, args),
        I::MathCbrt => math::cbrt(vm, args),
        I::MathPow => math::pow(vm, args),
        I::MathMin => math::min(vm, args),
        I::MathMax => math::max(vm, args),
        I::MathRandom => math::random(vm, args),
        I::MathLog => math::log(vm, args),
        I::MathLog2 => math::log2(vm, args),
        I::MathLog10 => math::log10(vm, args),
        I::MathExp => math::exp(vm, args),
        I::MathSin => math::sin(vm, args),
        I::MathCos => math::cos(vm, args),
        I::MathTan => math::tan(vm, args),
        I::MathAsin => math::asin(vm, args),
        I::MathAcos => math::acos(vm, args),
        I::MathAtan => math::atan(vm, args),
        I::MathAtan2 => math::atan2(vm, args),
        I::MathSign => math::sign(vm, args),
        I::MathHypot => math::hypot(vm, args),

        // JSON
        I::JsonParse => json::parse(vm, args),
        I::JsonStringify => json::stringify(vm, args),

        // Object statics
        I::ObjectKeys => object::keys(vm, args),
        I::ObjectValues => object::values(vm, args),
        I::ObjectEntries => object::entries(vm, args),
        I::ObjectAssign => object::assign(vm, args),
        I::ObjectFreeze => object::freeze(vm, args),
        I::ObjectFromEntries => object::from_entries(vm, args),
        I::ObjectGetOwnPropertyNames => object::get_own_property_names(vm, args),

        // Array statics
        I::ArrayIsArray => array::is_array(vm, args),
        I::ArrayFrom => array::from(vm, args),
        I::ArrayOf => array::of(vm, args),

        // Number statics + instance methods
        I::NumberIsInteger => number::is_integer(vm, args),
        I::NumberIsFinite => number::is_finite_strict(vm, args),
        I::NumberIsNaN => number::is_nan_strict(vm, args),
        I::NumberParseFloat => number::parse_float(vm, args),
        I::NumberParseInt => number::parse_int(vm, args),
        I::NumberToFixed => number::to_fixed(vm, args),
        I::NumberToStringRadix => number::to_string_radix(vm, args),

        // Promise statics
        I::PromiseResolve => promise::resolve(vm, args),
        I::PromiseReject => promise::reject(vm, args),
        I::PromiseAll => promise::all(vm, args),
        I::PromiseAllSettled => promise::all_settled(vm, args),
        I::PromiseRace => promise::race(vm, args),
        I::PromiseAny => promise::any(vm, args),

        // Symbol statics
        I::SymbolFor => {
            let key = ops::stringify(vm, &arg(args, 0))?;
            Ok(Value::Symbol(vm.symbols.intern(key)))
        }
        I::SymbolKeyFor => match arg(args, 0) {
            Value::Symbol(s) => Ok(vm
                .symbols
                .key_for(&s)
                .map(Value::Str)
                .unwrap_or(Value::Undefined)),
            _ => Err(VmError::type_error("Symbol.keyFor expects a symbol")),
        },

        // process
        I::ProcessCwd => process::cwd(vm, args),
        I::ProcessExit => process::exit(vm, args),
        I::ProcessEnv => process::env(vm, args),

        // Date statics
        I::DateNow => date::now(vm, args),

        // Buffer statics
        I::BufferFrom => buffer::from(vm, args),
        I::BufferConcat => buffer::concat(vm, args),
        I::BufferAlloc => buffer::alloc(vm, args),

        // Array methods
        I::ArrayPush => array::push(vm, args),
        I::ArrayPop => array::pop(vm, args),
        I::ArrayShift => array::shift(vm, args),
        I::ArrayUnshift => array::unshift(vm, args),
        I::ArrayJoin => array::join(vm, args),
        I::ArraySlice => array::slice(vm, args),
        I::ArraySplice => array::splice(vm, args),
        I::ArrayIndexOf => array::index_of(vm, args),
        I::ArrayLastIndexOf => array::last_index_of(vm, args),
        I::ArrayIncludes => array::includes(vm, args),
        I::ArrayConcat => array::concat(vm, args),
        I::ArrayReverse => array::reverse(vm, args),
        I::ArrayToReversed => array::to_reversed(vm, args),
        I::ArraySort => array::sort(vm, args),
        I::ArrayToSorted => array::to_sorted(vm, args),
        I::ArrayWith => array::with(vm, args),
        I::ArrayAt => array::at(vm, args),
        I::ArrayMap => array::map(vm, args),
        I::ArrayFilter => array::filter(vm, args),
        I::ArrayForEach => array::for_each(vm, args),
        I::ArrayReduce => array::reduce(vm, args),
        I::ArrayReduceRight => array::reduce_right(vm, args),
        I::ArrayFind => array::find(vm, args),
        I::ArrayFindIndex => array::find_index(vm, args),
        I::ArrayFindLast => array::find_last(vm, args),
        I::ArrayFindLastIndex => array::find_last_index(vm, args),
        I::ArraySome => array::some(vm, args),
        I::ArrayEvery => array::every(vm, args),
        I::ArrayFlat => array::flat(vm, args),
        I::ArrayFlatMap => array::flat_map(vm, args),
        I::ArrayFill => array::fill(vm, args),
        I::ArrayKeys => array::keys(vm, args),
        I::ArrayValues => array::values(vm, args),
        I::ArrayEntries => array::entries(vm, args),

        // String methods
        I::StringCharAt => string::char_at(vm, args),
        I::StringCharCodeAt => string::char_code_at(vm, args),
        I::StringCodePointAt => string::code_point_at(vm, args),
        I::StringAt => string::at(vm, args),
        I::StringIndexOf => string::index_of(vm, args),
        I::StringLastIndexOf => string::last_index_of(vm, args),
        I::StringIncludes => string::includes(vm, args),
        I::StringStartsWith => string::starts_with(vm, args),
        I::StringEndsWith => string::ends_with(vm, args),
        I::StringSlice => string::slice(vm, args),
        I::StringSubstring => string::substring(vm, args),
        I::StringToUpperCase => string::to_upper_case(vm, args),
        I::StringToLowerCase => string::to_lower_case(vm, args),
        I::StringTrim => string::trim(vm, args),
        I::StringTrimStart => string::trim_start(vm, args),
        I::StringTrimEnd => string::trim_end(vm, args),
        I::StringSplit => string::split(vm, args),
        I::StringRepeat => string::repeat(vm, args),
        I::StringPadStart => string::pad_start(vm, args),
        I::StringPadEnd => string::pad_end(vm, args),
        I::StringConcat => string::concat(vm, args),
        I::StringReplace => string::replace(vm, args),
        I::StringReplaceAll => string::replace_all(vm, args),
        I::StringMatch => string::match_(vm, args),

        // Date methods
        I::DateGetTime => date::get_time(vm, args),
        I::DateGetFullYear => date::get_full_year(vm, args),
        I::DateGetMonth => date::get_month(vm, args),
        I::DateGetDate => date::get_date(vm, args),
        I::DateGetDay => date::get_day(vm, args),
        I::DateGetHours => date::get_hours(vm, args),
        I::DateGetMinutes => date::get_minutes(vm, args),
        I::DateGetSeconds => date::get_seconds(vm, args),
        I::DateGetMilliseconds => date::get_milliseconds(vm, args),
        I::DateToIsoString => date::to_iso(vm, args),

        // Map methods
        I::MapGet => map_set::map_get(vm, args),
        I::MapSet => map_set::map_set(vm, args),
        I::MapHas => map_set::map_has(vm, args),
        I::MapDelete => map_set::map_delete(vm, args),
        I::MapClear => map_set::map_clear(vm, args),
        I::MapForEach => map_set::map_for_each(vm, args),
        I::MapKeys => map_set::map_keys(vm, args),
        I::MapValues => map_set::map_values(vm, args),
        I::MapEntries => map_set::map_entries(vm, args),

        // Set methods
        I::SetAdd => map_set::set_add(vm, args),
        I::SetHas => map_set::set_has(vm, args),
        I::SetDelete => map_set::set_delete(vm, args),
        I::SetClear => map_set::set_clear(vm, args),
        I::SetForEach => map_set::set_for_each(vm, args),
        I::SetKeys => map_set::set_keys(vm, args),
        I::SetValues => map_set::set_values(vm, args),
        I::SetEntries => map_set::set_entries(vm, args),

        // WeakMap / WeakSet
        I::WeakMapGet => map_set::weak_map_get(vm, args),
        I::WeakMapSet => map_set::weak_map_set(vm, args),
        I::WeakMapHas => map_set::weak_map_has(vm, args),
        I::WeakMapDelete => map_set::weak_map_delete(vm, args),
        I::WeakSetAdd => map_set::weak_set_add(vm, args),
        I::WeakSetHas => map_set::weak_set_has(vm, args),
        I::WeakSetDelete => map_set::weak_set_delete(vm, args),

        // RegExp
        I::RegexTest => regexp::test(vm, args),
        I::RegexExec => regexp::exec(vm, args),

        // Buffer methods
        I::BufferToString => buffer::to_string(vm, args),
        I::BufferSlice => buffer::slice(vm, args),

        // Promise methods
        I::PromiseThen => promise::then(vm, args),
        I::PromiseCatch => promise::catch(vm, args),
        I::PromiseFinally => promise::finally(vm, args),
    }
}

fn new_error(vm: &mut Vm, args: &[Value], name: &str) -> VmResult<Value> {
    let message = match arg(args, 0) {
        Value::Undefined => Rc::from(""),
        v => ops::stringify(vm, &v)?,
    };
    Ok(vm.make_error(name, &message))
}

/// Map a (receiver kind, method name) pair to its operation. Returning
/// `None` sends the caller down the next dispatch tier.
pub fn method_intrinsic(receiver: &Value, name: &str) -> Option<Intrinsic> {
    use Intrinsic as I;
    let op = match receiver {
        Value::Array(_) => match name {
            "push" => I::ArrayPush,
            "pop" => I::ArrayPop,
            "shift" => I::ArrayShift,
            "unshift" => I::ArrayUnshift,
            "join" => I::ArrayJoin,
            "slice" => I::ArraySlice,
            "splice" => I::ArraySplice,
            "indexOf" => I::ArrayIndexOf,
            "lastIndexOf" => I::ArrayLastIndexOf,
            "includes" => I::ArrayIncludes,
            "concat" => I::ArrayConcat,
            "reverse" => I::ArrayReverse,
            "toReversed" => I::ArrayToReversed,
            "sort" => I::ArraySort,
            "toSorted" => I::ArrayToSorted,
            "with" => I::ArrayWith,
            "at" => I::ArrayAt,
            "map" => I::ArrayMap,
            "filter" => I::ArrayFilter,
            "forEach" => I::ArrayForEach,
            "reduce" => I::ArrayReduce,
            "reduceRight" => I::ArrayReduceRight,
            "find" => I::ArrayFind,
            "findIndex" => I::ArrayFindIndex,
            "findLast" => I::ArrayFindLast,
            "findLastIndex" => I::ArrayFindLastIndex,
            "some" => I::ArraySome,
            "every" => I::ArrayEvery,
            "flat" => I::ArrayFlat,
            "flatMap" => I::ArrayFlatMap,
            "fill" => I::ArrayFill,
            "keys" => I::ArrayKeys,
            "values" => I::ArrayValues,
            "entries" => I::ArrayEntries,
            _ => return None,
        },
        Value::Str(_) => match name {
            "charAt" => I::StringCharAt,
            "charCodeAt" => I::StringCharCodeAt,
            "codePointAt" => I::StringCodePointAt,
            "at" => I::StringAt,
            "indexOf" => I::StringIndexOf,
            "lastIndexOf" => I::StringLastIndexOf,
            "includes" => I::StringIncludes,
            "startsWith" => I::StringStartsWith,
            "endsWith" => I::StringEndsWith,
            "slice" => I::StringSlice,
            "substring" => I::StringSubstring,
            "toUpperCase" => I::StringToUpperCase,
            "toLowerCase" => I::StringToLowerCase,
            "trim" => I::StringTrim,
            "trimStart" => I::StringTrimStart,
            "trimEnd" => I::StringTrimEnd,
            "split" => I::StringSplit,
            "repeat" => I::StringRepeat,
            "padStart" => I::StringPadStart,
            "padEnd" => I::StringPadEnd,
            "concat" => I::StringConcat,
            "replace" => I::StringReplace,
            "replaceAll" => I::StringReplaceAll,
            "match" => I::StringMatch,
            _ => return None,
        },
        Value::Number(_) => match name {
            "toFixed" => I::NumberToFixed,
            "toString" => I::NumberToStringRadix,
            _ => return None,
        },
        Value::Date(_) => match name {
            "getTime" | "valueOf" => I::DateGetTime,
            "getFullYear" => I::DateGetFullYear,
            "getMonth" => I::DateGetMonth,
            "getDate" => I::DateGetDate,
            "getDay" => I::DateGetDay,
            "getHours" => I::DateGetHours,
            "getMinutes" => I::DateGetMinutes,
            "getSeconds" => I::DateGetSeconds,
            "getMilliseconds" => I::DateGetMilliseconds,
            "toISOString" => I::DateToIsoString,
            _ => return None,
        },
        Value::Map(_) => match name {
            "get" => I::MapGet,
            "set" => I::MapSet,
            "has" => I::MapHas,
            "delete" => I::MapDelete,
            "clear" => I::MapClear,
            "forEach" => I::MapForEach,
            "keys" => I::MapKeys,
            "values" => I::MapValues,
            "entries" => I::MapEntries,
            _ => return None,
        },
        Value::Set(_) => match name {
            "add" => I::SetAdd,
            "has" => I::SetHas,
            "delete" => I::SetDelete,
            "clear" => I::SetClear,
            "forEach" => I::SetForEach,
            "keys" => I::SetKeys,
            "values" => I::SetValues,
            "entries" => I::SetEntries,
            _ => return None,
        },
        Value::WeakMap(_) => match name {
            "get" => I::WeakMapGet,
            "set" => I::WeakMapSet,
            "has" => I::WeakMapHas,
            "delete" => I::WeakMapDelete,
            _ => return None,
        },
        Value::WeakSet(_) => match name {
            "add" => I::WeakSetAdd,
            "has" => I::WeakSetHas,
            "delete" => I::WeakSetDelete,
            _ => return None,
        },
        Value::Regex(_) => match name {
            "test" => I::RegexTest,
            "exec" => I::RegexExec,
            _ => return None,
        },
        Value::Buffer(_) => match name {
            "toString" => I::BufferToString,
            "slice" => I::BufferSlice,
            _ => return None,
        },
        Value::Promise(_) => match name {
            "then" => I::PromiseThen,
            "catch" => I::PromiseCatch,
            "finally" => I::PromiseFinally,
            _ => return None,
        },
        _ => return None,
    };
    Some(op)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_mapping_is_name_filtered() {
        let arr = Value::array(vec![]);
        assert_eq!(method_intrinsic(&arr, "push"), Some(Intrinsic::ArrayPush));
        assert_eq!(method_intrinsic(&arr, "nope"), None);
        // slice resolves per receiver kind
        assert_eq!(method_intrinsic(&arr, "slice"), Some(Intrinsic::ArraySlice));
        assert_eq!(
            method_intrinsic(&Value::str("x"), "slice"),
            Some(Intrinsic::StringSlice)
        );
    }
}
