//! Intrinsic operations selected by the emitter's type strategies.
//!
//! Each variant names one builtin operation with a fixed argument shape.
//! Instance operations receive the receiver as argument 0. The runtime
//! implements every variant in `sable-runtime::intrinsics`; the same
//! implementations back the dynamically-dispatched builtin methods, so
//! the strategy fast path and the fallback path cannot disagree.

use serde::{Deserialize, Serialize};

/// A builtin operation invocable through `Instruction::CallIntrinsic`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Intrinsic {
    // ---- console ----
    ConsoleLog,
    ConsoleInfo,
    ConsoleDebug,
    ConsoleError,
    ConsoleWarn,

    // ---- global functions ----
    ParseInt,
    ParseFloat,
    IsNaN,
    IsFinite,

    // ---- constructor-like calls without `new` ----
    SymbolNew,
    BigIntNew,
    DateCall,
    StringCast,
    NumberCast,
    BooleanCast,

    // ---- built-in constructors (with `new`) ----
    NewDate,
    NewMap,
    NewSet,
    NewWeakMap,
    NewWeakSet,
    NewRegExp,
    NewPromise,
    NewError,
    NewTypeError,
    NewRangeError,

    // ---- Math statics ----
    MathAbs,
    MathFloor,
    MathCeil,
    MathRound,
    MathTrunc,
    MathSqrt,
    MathCbrt,
    MathPow,
    MathMin,
    MathMax,
    MathRandom,
    MathLog,
    MathLog2,
    MathLog10,
    MathExp,
    MathSin,
    MathCos,
    MathTan,
    MathAsin,
    MathAcos,
    MathAtan,
    MathAtan2,
    MathSign,
    MathHypot,

    // ---- JSON statics ----
    JsonParse,
    JsonStringify,

    // ---- Object statics ----
    ObjectKeys,
    ObjectValues,
    ObjectEntries,
    ObjectAssign,
    ObjectFreeze,
    ObjectFromEntries,
    ObjectGetOwnPropertyNames,

    // ---- Array statics ----
    ArrayIsArray,
    ArrayFrom,
    ArrayOf,

    // ---- Number statics ----
    NumberIsInteger,
    NumberIsFinite,
    NumberIsNaN,
    NumberParseFloat,
    NumberParseInt,

    // ---- Number instance methods (dynamic dispatch only) ----
    NumberToFixed,
    NumberToStringRadix,

    // ---- Promise statics ----
    PromiseResolve,
    PromiseReject,
    PromiseAll,
    PromiseAllSettled,
    PromiseRace,
    PromiseAny,

    // ---- Symbol statics ----
    SymbolFor,
    SymbolKeyFor,

    // ---- process statics ----
    ProcessCwd,
    ProcessExit,
    ProcessEnv,

    // ---- Date statics ----
    DateNow,

    // ---- Buffer statics ----
    BufferFrom,
    BufferConcat,
    BufferAlloc,

    // ---- Array methods ----
    ArrayPush,
    ArrayPop,
    ArrayShift,
    ArrayUnshift,
    ArrayJoin,
    ArraySlice,
    ArraySplice,
    ArrayIndexOf,
    ArrayLastIndexOf,
    ArrayIncludes,
    ArrayConcat,
    ArrayReverse,
    ArrayToReversed,
    ArraySort,
    ArrayToSorted,
    ArrayWith,
    ArrayAt,
    ArrayMap,
    ArrayFilter,
    ArrayForEach,
    ArrayReduce,
    ArrayReduceRight,
    ArrayFind,
    ArrayFindIndex,
    ArrayFindLast,
    ArrayFindLastIndex,
    ArraySome,
    ArrayEvery,
    ArrayFlat,
    ArrayFlatMap,
    ArrayFill,
    ArrayKeys,
    ArrayValues,
    ArrayEntries,

    // ---- String methods ----
    StringCharAt,
    StringCharCodeAt,
    StringCodePointAt,
    StringAt,
    StringIndexOf,
    StringLastIndexOf,
    StringIncludes,
    StringStartsWith,
    StringEndsWith,
    StringSlice,
    StringSubstring,
    StringToUpperCase,
    StringToLowerCase,
    StringTrim,
    StringTrimStart,
    StringTrimEnd,
    StringSplit,
    StringRepeat,
    StringPadStart,
    StringPadEnd,
    StringConcat,
    StringReplace,
    StringReplaceAll,
    StringMatch,

    // ---- Date methods ----
    DateGetTime,
    DateGetFullYear,
    DateGetMonth,
    DateGetDate,
    DateGetDay,
    DateGetHours,
    DateGetMinutes,
    DateGetSeconds,
    DateGetMilliseconds,
    DateToIsoString,

    // ---- Map methods ----
    MapGet,
    MapSet,
    MapHas,
    MapDelete,
    MapClear,
    MapForEach,
    MapKeys,
    MapValues,
    MapEntries,

    // ---- Set methods ----
    SetAdd,
    SetHas,
    SetDelete,
    SetClear,
    SetForEach,
    SetKeys,
    SetValues,
    SetEntries,

    // ---- WeakMap / WeakSet methods ----
    WeakMapGet,
    WeakMapSet,
    WeakMapHas,
    WeakMapDelete,
    WeakSetAdd,
    WeakSetHas,
    WeakSetDelete,

    // ---- RegExp methods ----
    RegexTest,
    RegexExec,

    // ---- Buffer methods ----
    BufferToString,
    BufferSlice,

    // ---- Promise methods ----
    PromiseThen,
    PromiseCatch,
    PromiseFinally,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsics_are_copy_and_comparable() {
        let op = Intrinsic::ArrayPush;
        let other = op;
        assert_eq!(op, other);
        assert_ne!(Intrinsic::MathAbs, Intrinsic::MathFloor);
    }
}
