/// The tracee architectures the adapter understands. Recordings of 32-bit
/// and 64-bit processes can appear in the same trace.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SupportedArch {
    X86,
    X64,
}

impl Default for SupportedArch {
    fn default() -> Self {
        SupportedArch::X64
    }
}

pub fn word_size(arch: SupportedArch) -> usize {
    match arch {
        SupportedArch::X86 => 4,
        SupportedArch::X64 => 8,
    }
}
