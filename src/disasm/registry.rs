use crate::disasm::{Architecture, Decoded, Endianness, InstructionDecoder};

pub enum Backend {
    Iced(super::iced::IcedDecoder),
    Cap(super::capstone::CapstoneDecoder),
}

impl InstructionDecoder for Backend {
    fn decode(&self, address: u64, bytes: &[u8]) -> Option<Decoded> {
        match self {
            Backend::Iced(d) => d.decode(address, bytes),
            Backend::Cap(d) => d.decode(address, bytes),
        }
    }

    fn max_instruction_length(&self) -> usize {
        match self {
            Backend::Iced(d) => d.max_instruction_length(),
            Backend::Cap(d) => d.max_instruction_length(),
        }
    }

    fn instruction_alignment(&self) -> usize {
        match self {
            Backend::Iced(d) => d.instruction_alignment(),
            Backend::Cap(d) => d.instruction_alignment(),
        }
    }

    fn architecture(&self) -> Architecture {
        match self {
            Backend::Iced(d) => d.architecture(),
            Backend::Cap(d) => d.architecture(),
        }
    }

    fn endianness(&self) -> Endianness {
        match self {
            Backend::Iced(d) => d.endianness(),
            Backend::Cap(d) => d.endianness(),
        }
    }

    fn name(&self) -> &str {
        match self {
            Backend::Iced(d) => d.name(),
            Backend::Cap(d) => d.name(),
        }
    }
}

/// Select a decoder backend for the given architecture.
pub fn for_arch(arch: Architecture, endianness: Endianness) -> Option<Backend> {
    match arch {
        Architecture::X86 | Architecture::X86_64 => {
            Some(Backend::Iced(super::iced::IcedDecoder::new(arch)))
        }
        Architecture::ARM
        | Architecture::ARM64
        | Architecture::MIPS
        | Architecture::MIPS64
        | Architecture::PPC
        | Architecture::PPC64
        | Architecture::RISCV
        | Architecture::RISCV64 => {
            super::capstone::CapstoneDecoder::new(arch, endianness).map(Backend::Cap)
        }
        Architecture::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_backends() {
        let x = for_arch(Architecture::X86_64, Endianness::Little).unwrap();
        assert_eq!(x.name(), "iced-x86");
        let a = for_arch(Architecture::ARM64, Endianness::Little).unwrap();
        assert_eq!(a.name(), "capstone");
        assert!(for_arch(Architecture::Unknown, Endianness::Little).is_none());
    }
}
