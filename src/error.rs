//! Error taxonomy. See `init`/`init_std` and `Ijvm::step` for where these surface.
//!
//! The public facade collapses both tiers to a single bit of information
//! (`Option::None` from the loader, `halted = true` from the dispatcher) -
//! these types exist so the reason is still diagnosable from logs and tests.

use thiserror::Error;

/// Why the loader refused to produce a VM. Never reaches a caller of
/// `init`/`init_std` directly - it is logged and then collapsed to `None`.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("could not open binary image: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad magic number: expected 0x1DEADFAD, found {0:#010X}")]
    BadMagic(u32),

    #[error("constant pool section truncated: declared {declared} bytes, {available} available")]
    TruncatedConstantPool { declared: u32, available: usize },

    #[error("text section truncated: declared {declared} bytes, {available} available")]
    TruncatedText { declared: u32, available: usize },

    #[error("image has no text section")]
    MissingTextSection,
}

/// A run-time fault. Every variant is fatal: the dispatcher sets `halted`
/// and stops as soon as one is produced. Kept on the machine for
/// introspection (tests, logs); not part of the public facade.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    #[error("stack underflow")]
    StackUnderflow,

    #[error("program counter {pc} out of range (text is {text_len} bytes)")]
    ImmediateOutOfRange { pc: usize, text_len: usize },

    #[error("branch target {target} out of range (text is {text_len} bytes)")]
    BranchOutOfRange { target: i64, text_len: usize },

    #[error("constant pool index {index} out of range ({size} constants)")]
    BadConstantIndex { index: u16, size: usize },

    #[error("method header at {addr} is out of range (text is {text_len} bytes)")]
    BadMethodAddress { addr: u32, text_len: usize },

    #[error("WIDE prefix used with illegal sub-opcode {sub:#04X}")]
    IllegalWideSubOpcode { sub: u8 },

    #[error("NEWARRAY called with negative count {0}")]
    NegativeArrayCount(i32),

    #[error("array access out of bounds: index {index} on array of size {size}")]
    ArrayIndexOutOfBounds { index: i32, size: usize },

    #[error("reference {0} does not identify a live array")]
    UnknownReference(i32),

    #[error("unknown opcode {opcode:#04X} at pc {pc}")]
    UnknownOpcode { opcode: u8, pc: usize },

    #[error("IRETURN with no caller frame")]
    NoCallerFrame,

    #[error("heap allocation failed during collection")]
    AllocationFailed,
}
