use crate::disasm::{Architecture, Decoded, Endianness, Flow, InstructionDecoder};

pub struct IcedDecoder {
    bits: u32,
    arch: Architecture,
}

impl IcedDecoder {
    pub fn new(arch: Architecture) -> Self {
        let bits = match arch {
            Architecture::X86 => 32,
            _ => 64,
        };
        Self { bits, arch }
    }

    fn flow(instr: &iced_x86::Instruction) -> Flow {
        use iced_x86::{FlowControl, OpKind};
        let direct_target = || match instr.op0_kind() {
            OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64 => {
                Some(instr.near_branch_target())
            }
            _ => None,
        };
        match instr.flow_control() {
            FlowControl::Next | FlowControl::Interrupt | FlowControl::XbeginXabortXend => {
                Flow::Next
            }
            FlowControl::UnconditionalBranch => Flow::Branch {
                target: direct_target(),
                conditional: false,
            },
            FlowControl::ConditionalBranch => Flow::Branch {
                target: direct_target(),
                conditional: true,
            },
            FlowControl::IndirectBranch => Flow::Branch {
                target: None,
                conditional: false,
            },
            FlowControl::Call | FlowControl::IndirectCall => Flow::Call,
            FlowControl::Return => Flow::Return,
            FlowControl::Exception => Flow::Stop,
        }
    }
}

impl InstructionDecoder for IcedDecoder {
    fn decode(&self, address: u64, bytes: &[u8]) -> Option<Decoded> {
        use iced_x86::{Decoder, DecoderOptions};

        if bytes.is_empty() {
            return None;
        }
        let mut decoder = Decoder::with_ip(self.bits, bytes, address, DecoderOptions::NONE);
        let instr = decoder.decode();
        if instr.is_invalid() {
            return None;
        }
        Some(Decoded {
            length: instr.len(),
            flow: Self::flow(&instr),
        })
    }

    fn max_instruction_length(&self) -> usize {
        15
    }

    fn instruction_alignment(&self) -> usize {
        1
    }

    fn architecture(&self) -> Architecture {
        self.arch
    }

    fn endianness(&self) -> Endianness {
        Endianness::Little
    }

    fn name(&self) -> &str {
        "iced-x86"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_x86_64_flow() {
        let d = IcedDecoder::new(Architecture::X86_64);
        // xor rax, rax
        let ins = d.decode(0x401000, &[0x48, 0x31, 0xC0]).unwrap();
        assert_eq!(ins.length, 3);
        assert_eq!(ins.flow, Flow::Next);
        // ret
        assert_eq!(d.decode(0x401003, &[0xC3]).unwrap().flow, Flow::Return);
        // jmp short +2 -> 0x401004
        let jmp = d.decode(0x401000, &[0xEB, 0x02]).unwrap();
        assert_eq!(
            jmp.flow,
            Flow::Branch {
                target: Some(0x401004),
                conditional: false
            }
        );
        // je short -2
        let je = d.decode(0x401010, &[0x74, 0xFE]).unwrap();
        assert_eq!(
            je.flow,
            Flow::Branch {
                target: Some(0x401010),
                conditional: true
            }
        );
    }

    #[test]
    fn decode_invalid_bytes() {
        let d = IcedDecoder::new(Architecture::X86_64);
        assert!(d.decode(0, &[]).is_none());
        // truncated mov rax, imm64
        assert!(d.decode(0, &[0x48, 0xB8, 0x01]).is_none());
    }
}
