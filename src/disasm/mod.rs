//! Instruction decoders used by the object-backed program model.
//!
//! Always-on adapters:
//! - iced-x86 for x86/x64
//! - capstone for ARM/AArch64, MIPS, PPC, RISC-V
//!
//! Decoders only answer what the program model needs: how long the
//! instruction at an address is, and whether it ends a basic block.

pub mod capstone;
pub mod iced;
pub mod registry;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte order of the decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endianness {
    Little,
    Big,
}

/// Architectures a decoder can be selected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    X86,
    X86_64,
    ARM,
    ARM64,
    MIPS,
    MIPS64,
    PPC,
    PPC64,
    RISCV,
    RISCV64,
    Unknown,
}

impl Architecture {
    pub fn address_bits(&self) -> u8 {
        match self {
            Architecture::X86
            | Architecture::ARM
            | Architecture::MIPS
            | Architecture::PPC
            | Architecture::RISCV => 32,
            _ => 64,
        }
    }

    pub fn is_64_bit(&self) -> bool {
        self.address_bits() == 64
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Architecture::X86 => "x86",
            Architecture::X86_64 => "x86_64",
            Architecture::ARM => "arm",
            Architecture::ARM64 => "arm64",
            Architecture::MIPS => "mips",
            Architecture::MIPS64 => "mips64",
            Architecture::PPC => "ppc",
            Architecture::PPC64 => "ppc64",
            Architecture::RISCV => "riscv",
            Architecture::RISCV64 => "riscv64",
            Architecture::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl From<object::Architecture> for Architecture {
    fn from(a: object::Architecture) -> Self {
        use object::Architecture as O;
        match a {
            O::I386 => Architecture::X86,
            O::X86_64 => Architecture::X86_64,
            O::Arm => Architecture::ARM,
            O::Aarch64 => Architecture::ARM64,
            O::Mips => Architecture::MIPS,
            O::Mips64 => Architecture::MIPS64,
            O::PowerPc => Architecture::PPC,
            O::PowerPc64 => Architecture::PPC64,
            O::Riscv32 => Architecture::RISCV,
            O::Riscv64 => Architecture::RISCV64,
            _ => Architecture::Unknown,
        }
    }
}

/// Control-flow class of one decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Falls through to the next instruction
    Next,
    /// Direct or indirect jump; `target` is known for direct ones
    Branch { target: Option<u64>, conditional: bool },
    /// Call; execution continues after it
    Call,
    Return,
    /// Trap or halt; nothing falls through
    Stop,
}

impl Flow {
    /// Whether the instruction terminates its basic block.
    pub fn ends_block(&self) -> bool {
        matches!(self, Flow::Branch { .. } | Flow::Return | Flow::Stop)
    }

    /// Whether execution can fall through to the next instruction.
    pub fn falls_through(&self) -> bool {
        match self {
            Flow::Next | Flow::Call => true,
            Flow::Branch { conditional, .. } => *conditional,
            Flow::Return | Flow::Stop => false,
        }
    }
}

/// Length and flow class of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub length: usize,
    pub flow: Flow,
}

/// Single-instruction decoder.
pub trait InstructionDecoder {
    /// Decode the instruction at `address` from `bytes`; `None` if the
    /// bytes do not form a valid instruction.
    fn decode(&self, address: u64, bytes: &[u8]) -> Option<Decoded>;

    fn max_instruction_length(&self) -> usize;

    fn instruction_alignment(&self) -> usize;

    fn architecture(&self) -> Architecture;

    fn endianness(&self) -> Endianness;

    fn name(&self) -> &str;
}
