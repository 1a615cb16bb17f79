use crate::disasm::{Architecture, Decoded, Endianness, Flow, InstructionDecoder};
use capstone::arch::arm::ArmOperandType;
use capstone::arch::arm64::Arm64OperandType;
use capstone::prelude::*;
use capstone::{Arch, Capstone, Endian, Mode, NO_EXTRA_MODE};

pub struct CapstoneDecoder {
    cs: capstone::Capstone,
    arch: Architecture,
    endianness: Endianness,
}

fn cs_arch_mode(arch: Architecture, end: Endianness) -> Option<(Arch, Mode, Option<Endian>)> {
    let endian = Some(if matches!(end, Endianness::Big) {
        Endian::Big
    } else {
        Endian::Little
    });
    match arch {
        Architecture::ARM => Some((Arch::ARM, Mode::Arm, endian)),
        Architecture::ARM64 => Some((Arch::ARM64, Mode::Arm, endian)),
        Architecture::MIPS => Some((Arch::MIPS, Mode::Mips32, endian)),
        Architecture::MIPS64 => Some((Arch::MIPS, Mode::Mips64, endian)),
        Architecture::PPC => Some((Arch::PPC, Mode::Mode32, endian)),
        Architecture::PPC64 => Some((Arch::PPC, Mode::Mode64, endian)),
        Architecture::RISCV => Some((Arch::RISCV, Mode::RiscV32, None)),
        Architecture::RISCV64 => Some((Arch::RISCV, Mode::RiscV64, None)),
        Architecture::X86 | Architecture::X86_64 | Architecture::Unknown => None,
    }
}

// Mnemonics that jump without a condition.
const UNCONDITIONAL: &[&str] = &["b", "br", "bx", "j", "jr", "c.j", "c.jr", "ba", "bctr"];
const RETURNS: &[&str] = &["ret", "eret", "c.ret", "blr", "jr ra"];

impl CapstoneDecoder {
    pub fn new(arch: Architecture, endianness: Endianness) -> Option<Self> {
        let (a, m, endian) = cs_arch_mode(arch, endianness)?;
        let mut cs = Capstone::new_raw(a, m, NO_EXTRA_MODE, endian).ok()?;
        // Details carry instruction groups and branch operands
        let _ = cs.set_detail(true);
        Some(Self {
            cs,
            arch,
            endianness,
        })
    }

    /// Hex immediate at the end of the operand text (`#0x1000`, `0x1000`).
    fn parse_target(op_str: &str) -> Option<u64> {
        let last = op_str.rsplit(',').next()?.trim().trim_start_matches('#');
        let hex = last.strip_prefix("0x")?;
        u64::from_str_radix(hex, 16).ok()
    }

    fn direct_target(&self, detail: &capstone::InsnDetail, op_str: &str) -> Option<u64> {
        let arch_detail = detail.arch_detail();
        match self.arch {
            Architecture::ARM64 => arch_detail.arm64().and_then(|ad| {
                ad.operands().find_map(|op| match op.op_type {
                    Arm64OperandType::Imm(i) => Some(i as u64),
                    _ => None,
                })
            }),
            Architecture::ARM => arch_detail.arm().and_then(|ad| {
                ad.operands().find_map(|op| match op.op_type {
                    ArmOperandType::Imm(i) => Some(i as u32 as u64),
                    _ => None,
                })
            }),
            _ => Self::parse_target(op_str),
        }
    }

    fn flow(&self, insn: &capstone::Insn) -> Flow {
        let mnemonic = insn.mnemonic().unwrap_or("").to_ascii_lowercase();
        let op_str = insn.op_str().unwrap_or("");
        let full = if op_str.is_empty() {
            mnemonic.clone()
        } else {
            format!("{} {}", mnemonic, op_str.to_ascii_lowercase())
        };

        let detail = self.cs.insn_detail(insn).ok();
        let groups: Vec<String> = detail
            .as_ref()
            .map(|d| {
                d.groups()
                    .iter()
                    .filter_map(|g| self.cs.group_name(*g))
                    .collect()
            })
            .unwrap_or_default();
        let has_group = |name: &str| groups.iter().any(|g| g == name);

        if has_group("ret")
            || has_group("return")
            || RETURNS.contains(&mnemonic.as_str())
            || RETURNS.contains(&full.as_str())
        {
            return Flow::Return;
        }
        if has_group("call") {
            return Flow::Call;
        }
        if has_group("jump") || has_group("branch_relative") {
            let target = detail
                .as_ref()
                .and_then(|d| self.direct_target(d, op_str));
            return Flow::Branch {
                target,
                conditional: !UNCONDITIONAL.contains(&mnemonic.as_str()),
            };
        }
        if matches!(mnemonic.as_str(), "brk" | "udf" | "break" | "ebreak" | "trap") {
            return Flow::Stop;
        }
        Flow::Next
    }
}

impl InstructionDecoder for CapstoneDecoder {
    fn decode(&self, address: u64, bytes: &[u8]) -> Option<Decoded> {
        if bytes.is_empty() {
            return None;
        }
        let insns = self.cs.disasm_count(bytes, address, 1).ok()?;
        let insn = insns.iter().next()?;
        let length = insn.bytes().len();
        if length == 0 {
            return None;
        }
        Some(Decoded {
            length,
            flow: self.flow(&insn),
        })
    }

    fn max_instruction_length(&self) -> usize {
        match self.arch {
            Architecture::RISCV | Architecture::RISCV64 => 4,
            _ => 8,
        }
    }

    fn instruction_alignment(&self) -> usize {
        match self.arch {
            // compressed instructions are 2-byte aligned
            Architecture::RISCV | Architecture::RISCV64 => 2,
            _ => 4,
        }
    }

    fn architecture(&self) -> Architecture {
        self.arch
    }

    fn endianness(&self) -> Endianness {
        self.endianness
    }

    fn name(&self) -> &str {
        "capstone"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_arm64_ret_and_branch() {
        let d = CapstoneDecoder::new(Architecture::ARM64, Endianness::Little).unwrap();
        // ret
        let ret = d.decode(0x1000, &[0xC0, 0x03, 0x5F, 0xD6]).unwrap();
        assert_eq!(ret.length, 4);
        assert_eq!(ret.flow, Flow::Return);
        // b #0x1008 from 0x1000
        let b = d.decode(0x1000, &[0x02, 0x00, 0x00, 0x14]).unwrap();
        assert_eq!(
            b.flow,
            Flow::Branch {
                target: Some(0x1008),
                conditional: false
            }
        );
        // nop
        let nop = d.decode(0x1000, &[0x1F, 0x20, 0x03, 0xD5]).unwrap();
        assert_eq!(nop.flow, Flow::Next);
        assert_eq!(d.instruction_alignment(), 4);
    }

    #[test]
    fn parse_target_text() {
        assert_eq!(CapstoneDecoder::parse_target("a0, a1, 0x104"), Some(0x104));
        assert_eq!(CapstoneDecoder::parse_target("#0x20"), Some(0x20));
        assert_eq!(CapstoneDecoder::parse_target("ra"), None);
    }

    #[test]
    fn x86_not_supported() {
        assert!(CapstoneDecoder::new(Architecture::X86_64, Endianness::Little).is_none());
    }
}
