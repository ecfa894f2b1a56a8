use std::{
    cmp::Ordering,
    convert::TryFrom,
    fmt::{Display, Formatter, Result},
    ops::Add,
    result,
};

/// A register number in the debugger's numbering. One continuous numbering
/// covers the x86 set followed by the x86-64 set; the per-arch bounds used
/// when walking a whole register file are `DREG_EAX..=DREG_ORIG_EAX` and
/// `DREG_RAX..=DREG_ORIG_RAX`.
///
/// The inner u32 is deliberately NOT pub; arbitrary values can't be
/// constructed without going through `try_from`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct GdbRegister(u32);

// x86
pub const DREG_EAX: GdbRegister = GdbRegister(0);
pub const DREG_ECX: GdbRegister = GdbRegister(1);
pub const DREG_EDX: GdbRegister = GdbRegister(2);
pub const DREG_EBX: GdbRegister = GdbRegister(3);
pub const DREG_ESP: GdbRegister = GdbRegister(4);
pub const DREG_EBP: GdbRegister = GdbRegister(5);
pub const DREG_ESI: GdbRegister = GdbRegister(6);
pub const DREG_EDI: GdbRegister = GdbRegister(7);
pub const DREG_EIP: GdbRegister = GdbRegister(8);
pub const DREG_EFLAGS: GdbRegister = GdbRegister(9);
pub const DREG_CS: GdbRegister = GdbRegister(10);
pub const DREG_SS: GdbRegister = GdbRegister(11);
pub const DREG_DS: GdbRegister = GdbRegister(12);
pub const DREG_ES: GdbRegister = GdbRegister(13);
pub const DREG_FS: GdbRegister = GdbRegister(14);
pub const DREG_GS: GdbRegister = GdbRegister(15);
/// `DREG_ST0..DREG_FOP` is the FXSAVE block: 8 x87 stack registers followed
/// by 8 control/status words.
pub const DREG_ST0: GdbRegister = GdbRegister(16);
pub const DREG_FCTRL: GdbRegister = GdbRegister(24);
pub const DREG_FOP: GdbRegister = GdbRegister(31);
pub const DREG_XMM0: GdbRegister = GdbRegister(32);
pub const DREG_XMM7: GdbRegister = GdbRegister(39);
pub const DREG_MXCSR: GdbRegister = GdbRegister(40);
pub const DREG_ORIG_EAX: GdbRegister = GdbRegister(41);
pub const DREG_YMM0H: GdbRegister = GdbRegister(42);
pub const DREG_YMM7H: GdbRegister = GdbRegister(49);

// x86-64
pub const DREG_RAX: GdbRegister = GdbRegister(50);
pub const DREG_RBX: GdbRegister = GdbRegister(51);
pub const DREG_RCX: GdbRegister = GdbRegister(52);
pub const DREG_RDX: GdbRegister = GdbRegister(53);
pub const DREG_RSI: GdbRegister = GdbRegister(54);
pub const DREG_RDI: GdbRegister = GdbRegister(55);
pub const DREG_RBP: GdbRegister = GdbRegister(56);
pub const DREG_RSP: GdbRegister = GdbRegister(57);
pub const DREG_R8: GdbRegister = GdbRegister(58);
pub const DREG_R9: GdbRegister = GdbRegister(59);
pub const DREG_R10: GdbRegister = GdbRegister(60);
pub const DREG_R11: GdbRegister = GdbRegister(61);
pub const DREG_R12: GdbRegister = GdbRegister(62);
pub const DREG_R13: GdbRegister = GdbRegister(63);
pub const DREG_R14: GdbRegister = GdbRegister(64);
pub const DREG_R15: GdbRegister = GdbRegister(65);
pub const DREG_RIP: GdbRegister = GdbRegister(66);
pub const DREG_64_EFLAGS: GdbRegister = GdbRegister(67);
pub const DREG_64_CS: GdbRegister = GdbRegister(68);
pub const DREG_64_SS: GdbRegister = GdbRegister(69);
pub const DREG_64_DS: GdbRegister = GdbRegister(70);
pub const DREG_64_ES: GdbRegister = GdbRegister(71);
pub const DREG_64_FS: GdbRegister = GdbRegister(72);
pub const DREG_64_GS: GdbRegister = GdbRegister(73);
pub const DREG_64_ST0: GdbRegister = GdbRegister(74);
pub const DREG_64_FCTRL: GdbRegister = GdbRegister(82);
pub const DREG_64_FOP: GdbRegister = GdbRegister(89);
pub const DREG_64_XMM0: GdbRegister = GdbRegister(90);
pub const DREG_64_XMM15: GdbRegister = GdbRegister(105);
pub const DREG_64_MXCSR: GdbRegister = GdbRegister(106);
pub const DREG_ORIG_RAX: GdbRegister = GdbRegister(107);
pub const DREG_FS_BASE: GdbRegister = GdbRegister(108);
pub const DREG_GS_BASE: GdbRegister = GdbRegister(109);
pub const DREG_64_YMM0H: GdbRegister = GdbRegister(110);
pub const DREG_64_YMM15H: GdbRegister = GdbRegister(125);

const DREG_NUM_TOTAL: u32 = 126;

impl Display for GdbRegister {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.0)
    }
}

impl GdbRegister {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u32> for GdbRegister {
    type Error = ();

    fn try_from(regno: u32) -> result::Result<Self, Self::Error> {
        if regno < DREG_NUM_TOTAL {
            Ok(Self(regno))
        } else {
            Err(())
        }
    }
}

impl From<GdbRegister> for usize {
    fn from(r: GdbRegister) -> usize {
        r.as_usize()
    }
}

impl Add<u32> for GdbRegister {
    type Output = result::Result<GdbRegister, ()>;

    fn add(self, rhs: u32) -> Self::Output {
        GdbRegister::try_from(self.0 + rhs)
    }
}

impl PartialOrd<u32> for GdbRegister {
    fn partial_cmp(&self, other: &u32) -> Option<Ordering> {
        Some(self.0.cmp(other))
    }
}

impl PartialEq<u32> for GdbRegister {
    fn eq(&self, other: &u32) -> bool {
        self.0 == *other
    }
}
