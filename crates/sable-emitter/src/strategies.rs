//! Per-receiver-type strategies for method and property emission.
//!
//! A strategy is a name-filtered table: it must decide from the method
//! name alone, before anything touches the receiver, so a declining
//! strategy leaves no stale value behind. Unhandled names fall through to
//! the next dispatch tier.

use sable_bytecode::Intrinsic;

use crate::types::{StaticTag, StaticType};

/// Result type of a strategy-emitted operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Returns {
    /// Nothing known
    Unknown,
    /// number
    Number,
    /// boolean
    Boolean,
    /// string
    String,
    /// Array
    Array,
    /// Promise
    Promise,
    /// Buffer
    Buffer,
    /// An iterator handle
    Iterator,
    /// The receiver itself (chaining methods)
    SameAsReceiver,
}

impl Returns {
    /// Stack tag of the result
    pub fn tag(self) -> StaticTag {
        match self {
            Self::Number => StaticTag::Double,
            Self::Boolean => StaticTag::Boolean,
            Self::String => StaticTag::String,
            _ => StaticTag::Unknown,
        }
    }

    /// Static type of the result given the receiver's type
    pub fn static_type(self, receiver: &StaticType) -> StaticType {
        match self {
            Self::Number => StaticType::Number,
            Self::Boolean => StaticType::Boolean,
            Self::String => StaticType::String,
            Self::Array => StaticType::Array,
            Self::Promise => StaticType::Promise,
            Self::Buffer => StaticType::Buffer,
            Self::SameAsReceiver => receiver.clone(),
            Self::Unknown | Self::Iterator => StaticType::Unknown,
        }
    }
}

/// One method a strategy handles
#[derive(Debug, Clone, Copy)]
pub struct MethodEntry {
    /// Method name
    pub name: &'static str,
    /// The operation to emit
    pub op: Intrinsic,
    /// Result type
    pub returns: Returns,
}

const fn entry(name: &'static str, op: Intrinsic, returns: Returns) -> MethodEntry {
    MethodEntry { name, op, returns }
}

use Returns::{
    Array as RArr, Boolean as RBool, Buffer as RBuf, Iterator as RIter, Number as RNum,
    Promise as RProm, SameAsReceiver as RSelf, String as RStr, Unknown as RUnk,
};

// ---- instance strategies ----

static ARRAY_METHODS: &[MethodEntry] = &[
    entry("push", Intrinsic::ArrayPush, RNum),
    entry("pop", Intrinsic::ArrayPop, RUnk),
    entry("shift", Intrinsic::ArrayShift, RUnk),
    entry("unshift", Intrinsic::ArrayUnshift, RNum),
    entry("join", Intrinsic::ArrayJoin, RStr),
    entry("slice", Intrinsic::ArraySlice, RArr),
    entry("splice", Intrinsic::ArraySplice, RArr),
    entry("indexOf", Intrinsic::ArrayIndexOf, RNum),
    entry("lastIndexOf", Intrinsic::ArrayLastIndexOf, RNum),
    entry("includes", Intrinsic::ArrayIncludes, RBool),
    entry("concat", Intrinsic::ArrayConcat, RArr),
    entry("reverse", Intrinsic::ArrayReverse, RSelf),
    entry("toReversed", Intrinsic::ArrayToReversed, RArr),
    entry("sort", Intrinsic::ArraySort, RSelf),
    entry("toSorted", Intrinsic::ArrayToSorted, RArr),
    entry("with", Intrinsic::ArrayWith, RArr),
    entry("at", Intrinsic::ArrayAt, RUnk),
    entry("map", Intrinsic::ArrayMap, RArr),
    entry("filter", Intrinsic::ArrayFilter, RArr),
    entry("forEach", Intrinsic::ArrayForEach, RUnk),
    entry("reduce", Intrinsic::ArrayReduce, RUnk),
    entry("reduceRight", Intrinsic::ArrayReduceRight, RUnk),
    entry("find", Intrinsic::ArrayFind, RUnk),
    entry("findIndex", Intrinsic::ArrayFindIndex, RNum),
    entry("findLast", Intrinsic::ArrayFindLast, RUnk),
    entry("findLastIndex", Intrinsic::ArrayFindLastIndex, RNum),
    entry("some", Intrinsic::ArraySome, RBool),
    entry("every", Intrinsic::ArrayEvery, RBool),
    entry("flat", Intrinsic::ArrayFlat, RArr),
    entry("flatMap", Intrinsic::ArrayFlatMap, RArr),
    entry("fill", Intrinsic::ArrayFill, RSelf),
    entry("keys", Intrinsic::ArrayKeys, RIter),
    entry("values", Intrinsic::ArrayValues, RIter),
    entry("entries", Intrinsic::ArrayEntries, RIter),
];

static STRING_METHODS: &[MethodEntry] = &[
    entry("charAt", Intrinsic::StringCharAt, RStr),
    entry("charCodeAt", Intrinsic::StringCharCodeAt, RNum),
    entry("codePointAt", Intrinsic::StringCodePointAt, RUnk),
    entry("at", Intrinsic::StringAt, RUnk),
    entry("indexOf", Intrinsic::StringIndexOf, RNum),
    entry("lastIndexOf", Intrinsic::StringLastIndexOf, RNum),
    entry("includes", Intrinsic::StringIncludes, RBool),
    entry("startsWith", Intrinsic::StringStartsWith, RBool),
    entry("endsWith", Intrinsic::StringEndsWith, RBool),
    entry("slice", Intrinsic::StringSlice, RStr),
    entry("substring", Intrinsic::StringSubstring, RStr),
    entry("toUpperCase", Intrinsic::StringToUpperCase, RStr),
    entry("toLowerCase", Intrinsic::StringToLowerCase, RStr),
    entry("trim", Intrinsic::StringTrim, RStr),
    entry("trimStart", Intrinsic::StringTrimStart, RStr),
    entry("trimEnd", Intrinsic::StringTrimEnd, RStr),
    entry("split", Intrinsic::StringSplit, RArr),
    entry("repeat", Intrinsic::StringRepeat, RStr),
    entry("padStart", Intrinsic::StringPadStart, RStr),
    entry("padEnd", Intrinsic::StringPadEnd, RStr),
    entry("concat", Intrinsic::StringConcat, RStr),
    entry("replace", Intrinsic::StringReplace, RStr),
    entry("replaceAll", Intrinsic::StringReplaceAll, RStr),
    entry("match", Intrinsic::StringMatch, RUnk),
];

static DATE_METHODS: &[MethodEntry] = &[
    entry("getTime", Intrinsic::DateGetTime, RNum),
    entry("valueOf", Intrinsic::DateGetTime, RNum),
    entry("getFullYear", Intrinsic::DateGetFullYear, RNum),
    entry("getMonth", Intrinsic::DateGetMonth, RNum),
    entry("getDate", Intrinsic::DateGetDate, RNum),
    entry("getDay", Intrinsic::DateGetDay, RNum),
    entry("getHours", Intrinsic::DateGetHours, RNum),
    entry("getMinutes", Intrinsic::DateGetMinutes, RNum),
    entry("getSeconds", Intrinsic::DateGetSeconds, RNum),
    entry("getMilliseconds", Intrinsic::DateGetMilliseconds, RNum),
    entry("toISOString", Intrinsic::DateToIsoString, RStr),
];

static MAP_METHODS: &[MethodEntry] = &[
    entry("get", Intrinsic::MapGet, RUnk),
    entry("set", Intrinsic::MapSet, RSelf),
    entry("has", Intrinsic::MapHas, RBool),
    entry("delete", Intrinsic::MapDelete, RBool),
    entry("clear", Intrinsic::MapClear, RUnk),
    entry("forEach", Intrinsic::MapForEach, RUnk),
    entry("keys", Intrinsic::MapKeys, RIter),
    entry("values", Intrinsic::MapValues, RIter),
    entry("entries", Intrinsic::MapEntries, RIter),
];

static SET_METHODS: &[MethodEntry] = &[
    entry("add", Intrinsic::SetAdd, RSelf),
    entry("has", Intrinsic::SetHas, RBool),
    entry("delete", Intrinsic::SetDelete, RBool),
    entry("clear", Intrinsic::SetClear, RUnk),
    entry("forEach", Intrinsic::SetForEach, RUnk),
    entry("keys", Intrinsic::SetKeys, RIter),
    entry("values", Intrinsic::SetValues, RIter),
    entry("entries", Intrinsic::SetEntries, RIter),
];

static WEAK_MAP_METHODS: &[MethodEntry] = &[
    entry("get", Intrinsic::WeakMapGet, RUnk),
    entry("set", Intrinsic::WeakMapSet, RSelf),
    entry("has", Intrinsic::WeakMapHas, RBool),
    entry("delete", Intrinsic::WeakMapDelete, RBool),
];

static WEAK_SET_METHODS: &[MethodEntry] = &[
    entry("add", Intrinsic::WeakSetAdd, RSelf),
    entry("has", Intrinsic::WeakSetHas, RBool),
    entry("delete", Intrinsic::WeakSetDelete, RBool),
];

static REGEX_METHODS: &[MethodEntry] = &[
    entry("test", Intrinsic::RegexTest, RBool),
    entry("exec", Intrinsic::RegexExec, RUnk),
];

static BUFFER_METHODS: &[MethodEntry] = &[
    entry("toString", Intrinsic::BufferToString, RStr),
    entry("slice", Intrinsic::BufferSlice, RBuf),
];

static PROMISE_METHODS: &[MethodEntry] = &[
    entry("then", Intrinsic::PromiseThen, RProm),
    entry("catch", Intrinsic::PromiseCatch, RProm),
    entry("finally", Intrinsic::PromiseFinally, RProm),
];

// ---- static strategies ----

static MATH_STATICS: &[MethodEntry] = &[
    entry("abs", Intrinsic::MathAbs, RNum),
    entry("floor", Intrinsic::MathFloor, RNum),
    entry("ceil", Intrinsic::MathCeil, RNum),
    entry("round", Intrinsic::MathRound, RNum),
    entry("trunc", Intrinsic::MathTrunc, RNum),
    entry("sqrt", Intrinsic::MathSqrt, RNum),
    entry("cbrt", Intrinsic::MathCbrt, RNum),
    entry("pow", Intrinsic::MathPow, RNum),
    entry("min", Intrinsic::MathMin, RNum),
    entry("max", Intrinsic::MathMax, RNum),
    entry("random", Intrinsic::MathRandom, RNum),
    entry("log", Intrinsic::MathLog, RNum),
    entry("log2", Intrinsic::MathLog2, RNum),
    entry("log10", Intrinsic::MathLog10, RNum),
    entry("exp", Intrinsic::MathExp, RNum),
    entry("sin", Intrinsic::MathSin, RNum),
    entry("cos", Intrinsic::MathCos, RNum),
    entry("tan", Intrinsic::MathTan, RNum),
    entry("asin", Intrinsic::MathAsin, RNum),
    entry("acos", Intrinsic::MathAcos, RNum),
    entry("atan", Intrinsic::MathAtan, RNum),
    entry("atan2", Intrinsic::MathAtan2, RNum),
    entry("sign", Intrinsic::MathSign, RNum),
    entry("hypot", Intrinsic::MathHypot, RNum),
];

static JSON_STATICS: &[MethodEntry] = &[
    entry("parse", Intrinsic::JsonParse, RUnk),
    // stringify returns undefined for unrepresentable values
    entry("stringify", Intrinsic::JsonStringify, RUnk),
];

static OBJECT_STATICS: &[MethodEntry] = &[
    entry("keys", Intrinsic::ObjectKeys, RArr),
    entry("values", Intrinsic::ObjectValues, RArr),
    entry("entries", Intrinsic::ObjectEntries, RArr),
    entry("assign", Intrinsic::ObjectAssign, RUnk),
    entry("freeze", Intrinsic::ObjectFreeze, RUnk),
    entry("fromEntries", Intrinsic::ObjectFromEntries, RUnk),
    entry("getOwnPropertyNames", Intrinsic::ObjectGetOwnPropertyNames, RArr),
];

static ARRAY_STATICS: &[MethodEntry] = &[
    entry("isArray", Intrinsic::ArrayIsArray, RBool),
    entry("from", Intrinsic::ArrayFrom, RArr),
    entry("of", Intrinsic::ArrayOf, RArr),
];

static NUMBER_STATICS: &[MethodEntry] = &[
    entry("isInteger", Intrinsic::NumberIsInteger, RBool),
    entry("isFinite", Intrinsic::NumberIsFinite, RBool),
    entry("isNaN", Intrinsic::NumberIsNaN, RBool),
    entry("parseFloat", Intrinsic::NumberParseFloat, RNum),
    entry("parseInt", Intrinsic::NumberParseInt, RNum),
];

static PROMISE_STATICS: &[MethodEntry] = &[
    entry("resolve", Intrinsic::PromiseResolve, RProm),
    entry("reject", Intrinsic::PromiseReject, RProm),
    entry("all", Intrinsic::PromiseAll, RProm),
    entry("allSettled", Intrinsic::PromiseAllSettled, RProm),
    entry("race", Intrinsic::PromiseRace, RProm),
    entry("any", Intrinsic::PromiseAny, RProm),
];

static SYMBOL_STATICS: &[MethodEntry] = &[
    entry("for", Intrinsic::SymbolFor, RUnk),
    entry("keyFor", Intrinsic::SymbolKeyFor, RUnk),
];

static PROCESS_STATICS: &[MethodEntry] = &[
    entry("cwd", Intrinsic::ProcessCwd, RStr),
    entry("exit", Intrinsic::ProcessExit, RUnk),
];

static BUFFER_STATICS: &[MethodEntry] = &[
    entry("from", Intrinsic::BufferFrom, RBuf),
    entry("concat", Intrinsic::BufferConcat, RBuf),
    entry("alloc", Intrinsic::BufferAlloc, RBuf),
];

static DATE_STATICS: &[MethodEntry] = &[entry("now", Intrinsic::DateNow, RNum)];

/// Look up the instance strategy table for a receiver type
pub fn instance_methods(ty: &StaticType) -> Option<&'static [MethodEntry]> {
    Some(match ty {
        StaticType::Array => ARRAY_METHODS,
        StaticType::String => STRING_METHODS,
        StaticType::Date => DATE_METHODS,
        StaticType::Map => MAP_METHODS,
        StaticType::Set => SET_METHODS,
        StaticType::WeakMap => WEAK_MAP_METHODS,
        StaticType::WeakSet => WEAK_SET_METHODS,
        StaticType::Regex => REGEX_METHODS,
        StaticType::Buffer => BUFFER_METHODS,
        StaticType::Promise => PROMISE_METHODS,
        _ => return None,
    })
}

/// Look up a static strategy table by global namespace name
pub fn static_methods(global: &str) -> Option<&'static [MethodEntry]> {
    Some(match global {
        "Math" => MATH_STATICS,
        "JSON" => JSON_STATICS,
        "Object" => OBJECT_STATICS,
        "Array" => ARRAY_STATICS,
        "Number" => NUMBER_STATICS,
        "Promise" => PROMISE_STATICS,
        "Symbol" => SYMBOL_STATICS,
        "process" => PROCESS_STATICS,
        "Buffer" => BUFFER_STATICS,
        "Date" => DATE_STATICS,
        _ => return None,
    })
}

/// Name-filter a strategy table (never touches the receiver)
pub fn find(table: &'static [MethodEntry], name: &str) -> Option<&'static MethodEntry> {
    table.iter().find(|m| m.name == name)
}

/// Resolve a method against a static type, trying union members in
/// deterministic order (string before array before the rest).
pub fn resolve_method(ty: &StaticType, name: &str) -> Option<&'static MethodEntry> {
    match ty {
        StaticType::Union(members) => {
            let mut ordered: Vec<&StaticType> = members.iter().collect();
            ordered.sort_by_key(|m| match m {
                StaticType::String => 0,
                StaticType::Array => 1,
                _ => 2,
            });
            for member in ordered {
                if let Some(found) = instance_methods(member).and_then(|t| find(t, name)) {
                    return Some(found);
                }
            }
            None
        }
        other => instance_methods(other).and_then(|t| find(t, name)),
    }
}

/// Property-read strategy: the tags of builtin data properties
pub fn property_tag(ty: &StaticType, name: &str) -> Option<StaticTag> {
    match (ty, name) {
        (StaticType::Array | StaticType::String | StaticType::Buffer, "length") => {
            Some(StaticTag::Double)
        }
        (StaticType::Map | StaticType::Set, "size") => Some(StaticTag::Double),
        (StaticType::Regex, "source" | "flags") => Some(StaticTag::String),
        (StaticType::Regex, "global") => Some(StaticTag::Boolean),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_filter_declines_unknown_methods() {
        assert!(resolve_method(&StaticType::Array, "push").is_some());
        assert!(resolve_method(&StaticType::Array, "nope").is_none());
        assert!(resolve_method(&StaticType::Unknown, "push").is_none());
    }

    #[test]
    fn union_prefers_string_over_array() {
        let union = StaticType::Union(vec![StaticType::Array, StaticType::String]);
        let found = resolve_method(&union, "slice").unwrap();
        assert_eq!(found.op, Intrinsic::StringSlice);

        let found = resolve_method(&union, "push").unwrap();
        assert_eq!(found.op, Intrinsic::ArrayPush);
    }

    #[test]
    fn chained_result_types() {
        let filter = resolve_method(&StaticType::Array, "filter").unwrap();
        assert_eq!(filter.returns.static_type(&StaticType::Array), StaticType::Array);
        let join = resolve_method(&StaticType::Array, "join").unwrap();
        assert_eq!(join.returns.static_type(&StaticType::Array), StaticType::String);
        let add = resolve_method(&StaticType::Set, "add").unwrap();
        assert_eq!(add.returns.static_type(&StaticType::Set), StaticType::Set);
    }

    #[test]
    fn static_tables_cover_the_builtin_namespaces() {
        for name in ["Math", "JSON", "Object", "Array", "Number", "Promise", "Symbol", "process"] {
            assert!(static_methods(name).is_some(), "missing static registry {name}");
        }
        assert!(static_methods("Reflect").is_none());
    }

    #[test]
    fn length_reads_are_number_tagged() {
        assert_eq!(property_tag(&StaticType::Array, "length"), Some(StaticTag::Double));
        assert_eq!(property_tag(&StaticType::Map, "size"), Some(StaticTag::Double));
        assert_eq!(property_tag(&StaticType::Object, "length"), None);
    }
}
