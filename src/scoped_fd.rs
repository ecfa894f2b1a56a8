use nix::{
    fcntl::{open, OFlag},
    sys::stat::Mode,
    unistd::close,
    NixPath,
};
use std::{cell::RefCell, os::unix::io::RawFd, rc::Rc};

pub type ScopedFdSharedPtr = Rc<RefCell<ScopedFd>>;

/// RAII wrapper for a raw file descriptor.
pub struct ScopedFd {
    fd: RawFd,
}

impl ScopedFd {
    pub fn new() -> Self {
        ScopedFd { fd: -1 }
    }

    pub fn from_raw(fd: RawFd) -> Self {
        ScopedFd { fd }
    }

    pub fn open_from_path<P: ?Sized + NixPath>(path: &P, oflag: OFlag) -> nix::Result<Self> {
        let rawfd = open(path, oflag, Mode::empty())?;
        Ok(ScopedFd { fd: rawfd })
    }

    pub fn close(&mut self) {
        if self.fd >= 0 {
            // Nothing sensible to do if close fails; the fd is gone either way.
            close(self.fd).unwrap_or(());
        }
        self.fd = -1;
    }

    pub fn is_open(&self) -> bool {
        self.fd >= 0
    }

    pub fn as_raw(&self) -> RawFd {
        self.fd
    }

    /// Give up ownership without closing.
    pub fn extract(&mut self) -> RawFd {
        let result = self.fd;
        self.fd = -1;
        result
    }
}

impl Default for ScopedFd {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScopedFd {
    fn drop(&mut self) {
        self.close()
    }
}
