//! Bytecode instructions

use serde::{Deserialize, Serialize};

use crate::intrinsic::Intrinsic;
use crate::operand::{
    ClassIndex, ConstantIndex, FunctionIndex, JumpOffset, LocalIndex, Register, UpvalueIndex,
};

/// A decoded instruction with its operands.
///
/// Register-based instruction set. Most instructions take a destination
/// register and one or more source registers/operands. Calls use the
/// contiguous-frame convention: the callee (or receiver) sits at `frame`
/// and the arguments occupy `frame+1 .. frame+1+argc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Instruction {
    // ==================== Constants ====================
    /// dst = undefined
    LoadUndefined { dst: Register },
    /// dst = null
    LoadNull { dst: Register },
    /// dst = true
    LoadTrue { dst: Register },
    /// dst = false
    LoadFalse { dst: Register },
    /// dst = imm32 (as a number)
    LoadInt { dst: Register, value: i32 },
    /// dst = constants\[idx\]
    LoadConst { dst: Register, idx: ConstantIndex },

    // ==================== Variables ====================
    /// dst = locals\[idx\]
    GetLocal { dst: Register, idx: LocalIndex },
    /// locals\[idx\] = src
    SetLocal { idx: LocalIndex, src: Register },
    /// dst = upvalues\[idx\]
    GetUpvalue { dst: Register, idx: UpvalueIndex },
    /// upvalues\[idx\] = src
    SetUpvalue { idx: UpvalueIndex, src: Register },
    /// dst = globals\[name\] (builtin namespace objects and functions)
    GetGlobal { dst: Register, name: ConstantIndex },
    /// dst = this
    LoadThis { dst: Register },
    /// dst = new.target
    LoadNewTarget { dst: Register },
    /// dst = src
    Move { dst: Register, src: Register },

    // ==================== Arithmetic ====================
    /// dst = lhs + rhs (JS semantics: concatenation if either is string)
    Add { dst: Register, lhs: Register, rhs: Register },
    Sub { dst: Register, lhs: Register, rhs: Register },
    Mul { dst: Register, lhs: Register, rhs: Register },
    Div { dst: Register, lhs: Register, rhs: Register },
    Rem { dst: Register, lhs: Register, rhs: Register },
    Pow { dst: Register, lhs: Register, rhs: Register },
    /// dst = -src
    Neg { dst: Register, src: Register },
    /// dst = src + 1 (numeric)
    Inc { dst: Register, src: Register },
    /// dst = src - 1 (numeric)
    Dec { dst: Register, src: Register },

    // ============ Specialized forms (stack-type tag) ============
    // Emitted when the static tag of both operands is known, skipping
    // the runtime type dispatch of the generic forms.
    AddNumber { dst: Register, lhs: Register, rhs: Register },
    SubNumber { dst: Register, lhs: Register, rhs: Register },
    MulNumber { dst: Register, lhs: Register, rhs: Register },
    DivNumber { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs + rhs where both operands are known strings
    Concat { dst: Register, lhs: Register, rhs: Register },

    // ==================== Bitwise ====================
    BitAnd { dst: Register, lhs: Register, rhs: Register },
    BitOr { dst: Register, lhs: Register, rhs: Register },
    BitXor { dst: Register, lhs: Register, rhs: Register },
    BitNot { dst: Register, src: Register },
    Shl { dst: Register, lhs: Register, rhs: Register },
    Shr { dst: Register, lhs: Register, rhs: Register },
    Ushr { dst: Register, lhs: Register, rhs: Register },

    // ==================== Conversions ====================
    /// dst = ToNumber(src)
    ToNumber { dst: Register, src: Register },
    /// dst = Stringify(src) (JS-compatible string conversion)
    Stringify { dst: Register, src: Register },

    // ==================== Comparison ====================
    StrictEq { dst: Register, lhs: Register, rhs: Register },
    StrictNe { dst: Register, lhs: Register, rhs: Register },
    LooseEq { dst: Register, lhs: Register, rhs: Register },
    LooseNe { dst: Register, lhs: Register, rhs: Register },
    Lt { dst: Register, lhs: Register, rhs: Register },
    Le { dst: Register, lhs: Register, rhs: Register },
    Gt { dst: Register, lhs: Register, rhs: Register },
    Ge { dst: Register, lhs: Register, rhs: Register },

    // ==================== Logical / type ====================
    /// dst = !IsTruthy(src)
    Not { dst: Register, src: Register },
    /// dst = typeof src
    TypeOf { dst: Register, src: Register },
    /// dst = lhs instanceof rhs
    InstanceOf { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs in rhs
    In { dst: Register, lhs: Register, rhs: Register },

    // ==================== Objects ====================
    /// dst = obj.name
    GetProp { dst: Register, obj: Register, name: ConstantIndex },
    /// obj.name = src
    SetProp { obj: Register, name: ConstantIndex, src: Register },
    /// dst = obj\[key\]
    GetIndex { dst: Register, obj: Register, key: Register },
    /// obj\[key\] = src
    SetIndex { obj: Register, key: Register, src: Register },
    /// dst = delete obj\[key\]
    DeleteProp { dst: Register, obj: Register, key: Register },
    /// dst = {}
    NewObject { dst: Register },
    /// Define own property (object literals; no setter lookup)
    DefineProp { obj: Register, key: Register, src: Register },
    /// Define getter on object
    DefineGetter { obj: Register, key: Register, func: Register },
    /// Define setter on object
    DefineSetter { obj: Register, key: Register, func: Register },
    /// Copy own enumerable properties of src into dst (`{...src}`)
    CopyProps { dst: Register, src: Register },
    /// dst = own enumerable props of src minus the excluded names
    ObjectRest { dst: Register, src: Register, exclude: Vec<ConstantIndex> },

    // ==================== Classes ====================
    /// dst = typed backing slot `slot` of obj (receiver statically Class(C))
    GetSlot { dst: Register, obj: Register, class: ClassIndex, slot: u16 },
    /// typed backing slot `slot` of obj = src
    SetSlot { obj: Register, class: ClassIndex, slot: u16, src: Register },
    /// dst = private field `name` declared on `class`
    GetPrivate { dst: Register, obj: Register, class: ClassIndex, name: ConstantIndex },
    /// private field `name` declared on `class` = src
    SetPrivate { obj: Register, class: ClassIndex, name: ConstantIndex, src: Register },
    /// dst = static member `name` of `class`
    GetStatic { dst: Register, class: ClassIndex, name: ConstantIndex },
    /// static member `name` of `class` = src
    SetStatic { class: ClassIndex, name: ConstantIndex, src: Register },
    /// Instantiate the class in the current frame (binds method closures)
    /// and store the class value in dst
    BindClass { dst: Register, class: ClassIndex },
    /// dst = new class(args…); frame holds args (no callee slot)
    NewInstance { dst: Register, class: ClassIndex, frame: Register, argc: u8 },
    /// Direct dispatch: dst = method #`method` of `class` called with
    /// this = regs\[frame\], args at frame+1…
    CallDirect { dst: Register, class: ClassIndex, method: u16, frame: Register, argc: u8 },
    /// dst = private method `name` of `class` called on regs\[frame\]
    CallPrivate { dst: Register, class: ClassIndex, name: ConstantIndex, frame: Register, argc: u8 },
    /// dst = super.name
    GetSuperProp { dst: Register, name: ConstantIndex },
    /// dst = super.name(args…); this = regs\[frame\], args at frame+1…
    CallSuperMethod { dst: Register, name: ConstantIndex, frame: Register, argc: u8 },
    /// super(args…); args at frame…
    CallSuper { frame: Register, argc: u8 },
    /// super(...args) where args is an argument array
    CallSuperSpread { args: Register },

    // ==================== Arrays ====================
    /// dst = \[\]
    NewArray { dst: Register },
    /// arr.push(src) (array literal construction)
    AppendElement { arr: Register, src: Register },
    /// Append all elements of iterable src to arr (`[...src]`)
    SpreadAppend { arr: Register, src: Register },

    // ==================== Functions / calls ====================
    /// dst = closure over functions\[func\] capturing per its descriptor
    Closure { dst: Register, func: FunctionIndex },
    /// dst = regs\[frame\](args…); args at frame+1…
    Call { dst: Register, frame: Register, argc: u8 },
    /// dst = regs\[frame\].name(args…); args at frame+1…
    CallMethod { dst: Register, frame: Register, name: ConstantIndex, argc: u8 },
    /// dst = regs\[frame\]\[regs\[frame+1\]\](args…); args at frame+2…
    CallComputed { dst: Register, frame: Register, argc: u8 },
    /// dst = func(...args) where args is an argument array
    CallSpread { dst: Register, func: Register, args: Register },
    /// dst = obj.name(...args) where args is an argument array
    CallMethodSpread { dst: Register, obj: Register, name: ConstantIndex, args: Register },
    /// dst = new regs\[frame\](args…); args at frame+1…
    Construct { dst: Register, frame: Register, argc: u8 },
    /// dst = new func(...args) where args is an argument array
    ConstructSpread { dst: Register, func: Register, args: Register },
    /// dst = intrinsic op applied to args at frame… (receiver first for
    /// instance operations)
    CallIntrinsic { dst: Register, op: Intrinsic, frame: Register, argc: u8 },
    /// Return regs\[src\]
    Return { src: Register },
    /// Return undefined
    ReturnUndefined,

    // ==================== Control flow ====================
    Jump { offset: JumpOffset },
    JumpIfTrue { cond: Register, offset: JumpOffset },
    JumpIfFalse { cond: Register, offset: JumpOffset },
    JumpIfNullish { src: Register, offset: JumpOffset },
    JumpIfNotNullish { src: Register, offset: JumpOffset },

    // ==================== Exception handling ====================
    /// Begin exception region; on throw, control transfers to the catch
    /// offset with the thrown value pending
    TryStart { catch_offset: JumpOffset },
    /// End exception region
    TryEnd,
    /// Throw regs\[src\]
    Throw { src: Register },
    /// Move the pending thrown value into dst (start of catch block)
    Catch { dst: Register },

    // ==================== Iteration ====================
    /// dst = iterator of src via the well-known iterator symbol
    GetIterator { dst: Register, src: Register },
    /// dst = async iterator of src (probes the async protocol first,
    /// falling back to the sync iterator)
    GetAsyncIterator { dst: Register, src: Register },
    /// Pull one `{value, done}` record: value/done from iter.next(arg)
    IteratorNext { value: Register, done: Register, iter: Register, arg: Register },
    /// dst = array of enumerable own + inherited string keys (for..in)
    ForInKeys { dst: Register, src: Register },

    // ==================== State machines ====================
    /// Suspend the state machine yielding regs\[src\]; on resume, the sent
    /// value lands in dst. `state` labels the resume point.
    Yield { dst: Register, src: Register, state: u16 },
    /// Await regs\[src\]; on resume, the settled value lands in dst (or the
    /// rejection is rethrown). `state` labels the resume point.
    Await { dst: Register, src: Register, state: u16 },

    // ==================== Modules ====================
    /// dst = export slot `name` of the module at path constants\[module\]
    LoadExport { dst: Register, module: ConstantIndex, name: ConstantIndex },
    /// Current module's export slot `name` = src
    StoreExport { name: ConstantIndex, src: Register },
    /// dst = namespace object of the module at path constants\[module\]
    LoadNamespace { dst: Register, module: ConstantIndex },
    /// dst = promise of the namespace object for the path in regs\[spec\]
    DynamicImport { dst: Register, spec: Register },

    // ==================== Misc ====================
    Nop,
}

impl Instruction {
    /// Whether this instruction unconditionally transfers control away
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Jump { .. } | Self::Return { .. } | Self::ReturnUndefined | Self::Throw { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminators() {
        assert!(Instruction::ReturnUndefined.is_terminator());
        assert!(
            Instruction::Jump {
                offset: JumpOffset(3)
            }
            .is_terminator()
        );
        assert!(
            !Instruction::Nop.is_terminator()
                && !Instruction::LoadTrue {
                    dst: Register::new(0)
                }
                .is_terminator()
        );
    }
}
