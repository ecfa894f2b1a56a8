use crate::remote_ptr::{RemotePtr, Void};
use std::{
    fmt,
    fmt::{Debug, Display, Formatter},
    ops::{Add, Sub},
};

/// An address in a tracee's address space that points at executable code.
/// Kept distinct from `RemotePtr` so data and code addresses can't be
/// accidentally interchanged.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RemoteCodePtr {
    ptr: usize,
}

impl RemoteCodePtr {
    pub fn null() -> RemoteCodePtr {
        RemoteCodePtr { ptr: 0 }
    }

    pub fn new(val: usize) -> RemoteCodePtr {
        RemoteCodePtr { ptr: val }
    }

    pub fn as_usize(self) -> usize {
        self.ptr
    }

    pub fn is_null(self) -> bool {
        self.ptr == 0
    }

    pub fn to_data_ptr<T>(self) -> RemotePtr<T> {
        RemotePtr::new(self.ptr)
    }
}

impl From<RemotePtr<Void>> for RemoteCodePtr {
    fn from(p: RemotePtr<Void>) -> Self {
        RemoteCodePtr::new(p.as_usize())
    }
}

impl Display for RemoteCodePtr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.ptr)
    }
}

impl Debug for RemoteCodePtr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.ptr)
    }
}

impl Add<usize> for RemoteCodePtr {
    type Output = Self;

    fn add(self, delta: usize) -> Self::Output {
        Self::new(self.ptr + delta)
    }
}

impl Sub<usize> for RemoteCodePtr {
    type Output = Self;

    fn sub(self, delta: usize) -> Self::Output {
        Self::new(self.ptr - delta)
    }
}
