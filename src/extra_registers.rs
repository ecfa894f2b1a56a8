use crate::{gdb_register::GdbRegister, kernel_abi::SupportedArch, registers::MAX_REG_SIZE_BYTES};
use std::collections::BTreeMap;

/// The "extra" register file: x87/SSE state that lives outside the
/// general-purpose set. Same undefined-register semantics as `Registers`.
#[derive(Clone, Default, Debug)]
pub struct ExtraRegisters {
    arch: SupportedArch,
    values: BTreeMap<GdbRegister, Vec<u8>>,
}

impl ExtraRegisters {
    pub fn new(arch: SupportedArch) -> ExtraRegisters {
        ExtraRegisters {
            arch,
            values: BTreeMap::new(),
        }
    }

    pub fn arch(&self) -> SupportedArch {
        self.arch
    }

    pub fn read_register(&self, buf: &mut [u8], regname: GdbRegister) -> Option<usize> {
        let v = self.values.get(&regname)?;
        buf[..v.len()].copy_from_slice(v);
        Some(v.len())
    }

    pub fn write_register(&mut self, value: &[u8], regname: GdbRegister) {
        debug_assert!(value.len() <= MAX_REG_SIZE_BYTES);
        self.values.insert(regname, value.to_owned());
    }
}
