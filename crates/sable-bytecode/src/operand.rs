//! Bytecode operands

use serde::{Deserialize, Serialize};

/// Virtual register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Register(pub u16);

impl Register {
    /// Create a new register
    #[inline]
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// Get register index
    #[inline]
    pub const fn index(self) -> u16 {
        self.0
    }

    /// The register `n` slots after this one (call-frame addressing)
    #[inline]
    pub const fn offset(self, n: u16) -> Self {
        Self(self.0 + n)
    }
}

/// Index into the module constant pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ConstantIndex(pub u32);

impl ConstantIndex {
    /// Get index value
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Index into a function's local variable slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct LocalIndex(pub u16);

impl LocalIndex {
    /// Get index value
    #[inline]
    pub const fn index(self) -> u16 {
        self.0
    }
}

/// Index into a function's captured upvalues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct UpvalueIndex(pub u16);

/// Index into the module function table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FunctionIndex(pub u32);

impl FunctionIndex {
    /// Get index value
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Index into the module class table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ClassIndex(pub u32);

impl ClassIndex {
    /// Get index value
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Jump offset, relative to the instruction following the jump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct JumpOffset(pub i32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_offsets() {
        let base = Register::new(4);
        assert_eq!(base.index(), 4);
        assert_eq!(base.offset(3).index(), 7);
    }
}
