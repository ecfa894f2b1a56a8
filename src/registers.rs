use crate::{
    gdb_register::{GdbRegister, DREG_EIP, DREG_RIP},
    kernel_abi::SupportedArch,
    remote_code_ptr::RemoteCodePtr,
};
use static_assertions::const_assert;
use std::collections::BTreeMap;

/// Large enough for an XMM register, the widest value the debugger can name
/// in the general or FXSAVE files.
pub const MAX_REG_SIZE_BYTES: usize = 16;
const_assert!(MAX_REG_SIZE_BYTES >= 8);

#[derive(Copy, Clone, Debug)]
struct RegisterValue {
    bytes: [u8; MAX_REG_SIZE_BYTES],
    size: usize,
}

/// The general-purpose register file of a task, keyed by debugger register
/// number. Registers the replay engine never populated read back as
/// undefined, which the protocol layer reports as `defined = false` rather
/// than inventing zeroes.
#[derive(Clone, Default, Debug)]
pub struct Registers {
    arch: SupportedArch,
    values: BTreeMap<GdbRegister, RegisterValue>,
}

impl Registers {
    pub fn new(arch: SupportedArch) -> Registers {
        Registers {
            arch,
            values: BTreeMap::new(),
        }
    }

    pub fn arch(&self) -> SupportedArch {
        self.arch
    }

    /// Read `regname` into `buf`, returning how many bytes are valid, or
    /// `None` if the register has no defined value.
    pub fn read_register(&self, buf: &mut [u8], regname: GdbRegister) -> Option<usize> {
        let v = self.values.get(&regname)?;
        buf[..v.size].copy_from_slice(&v.bytes[..v.size]);
        Some(v.size)
    }

    pub fn write_register(&mut self, value: &[u8], regname: GdbRegister) {
        debug_assert!(value.len() <= MAX_REG_SIZE_BYTES);
        let mut bytes = [0u8; MAX_REG_SIZE_BYTES];
        bytes[..value.len()].copy_from_slice(value);
        self.values.insert(
            regname,
            RegisterValue {
                bytes,
                size: value.len(),
            },
        );
    }

    pub fn write_register_u64(&mut self, value: u64, regname: GdbRegister) {
        match self.arch {
            SupportedArch::X86 => self.write_register(&(value as u32).to_le_bytes(), regname),
            SupportedArch::X64 => self.write_register(&value.to_le_bytes(), regname),
        }
    }

    fn read_register_u64(&self, regname: GdbRegister) -> u64 {
        let mut buf = [0u8; MAX_REG_SIZE_BYTES];
        match self.read_register(&mut buf, regname) {
            Some(size) if size <= 8 => {
                let mut word = [0u8; 8];
                word[..size].copy_from_slice(&buf[..size]);
                u64::from_le_bytes(word)
            }
            _ => 0,
        }
    }

    pub fn ip(&self) -> RemoteCodePtr {
        let reg = match self.arch {
            SupportedArch::X86 => DREG_EIP,
            SupportedArch::X64 => DREG_RIP,
        };
        RemoteCodePtr::new(self.read_register_u64(reg) as usize)
    }

    pub fn set_ip(&mut self, ip: RemoteCodePtr) {
        let reg = match self.arch {
            SupportedArch::X86 => DREG_EIP,
            SupportedArch::X64 => DREG_RIP,
        };
        self.write_register_u64(ip.as_usize() as u64, reg);
    }

    /// True when every register defined in both files agrees. Registers
    /// defined on only one side are ignored.
    pub fn matches(&self, other: &Registers) -> bool {
        if self.arch != other.arch {
            return false;
        }
        for (reg, v) in &self.values {
            if let Some(w) = other.values.get(reg) {
                if v.size != w.size || v.bytes[..v.size] != w.bytes[..w.size] {
                    return false;
                }
            }
        }
        true
    }
}
