use crate::{
    extra_registers::ExtraRegisters,
    kernel_abi::SupportedArch,
    registers::Registers,
    remote_ptr::{RemotePtr, Void},
    session::{address_space::AddressSpaceSharedPtr, SessionSharedWeakPtr},
    sig::Sig,
    taskish_uid::{TaskUid, ThreadGroupUid},
};
use libc::pid_t;
use std::{
    cell::RefCell,
    ffi::OsString,
    rc::{Rc, Weak},
};

pub type TaskSharedPtr = Rc<RefCell<Box<dyn Task>>>;
pub type TaskSharedWeakPtr = Weak<RefCell<Box<dyn Task>>>;

/// One thread of a replayed (or diverted) process tree. This is the
/// adapter's window onto the ptrace-level primitive: registers, memory,
/// identity and the owning address space / session.
pub trait Task {
    fn tuid(&self) -> TaskUid;

    fn tguid(&self) -> ThreadGroupUid;

    /// The tid this task had during recording; the identity the debugger
    /// sees.
    fn rec_tid(&self) -> pid_t;

    /// The recorded thread-group id (what the debugger calls the pid).
    fn tgid(&self) -> pid_t;

    /// The thread-group id of the underlying OS process implementing this
    /// task during replay. `/proc` paths must use this, not `tgid()`.
    fn real_tgid(&self) -> pid_t;

    fn name(&self) -> OsString;

    fn arch(&self) -> SupportedArch;

    /// True once the tracee has execed; address-space contents are
    /// meaningless before that.
    fn execed(&self) -> bool;

    /// Number of live tasks in this task's thread group.
    fn thread_group_size(&self) -> usize;

    /// The signal the task is currently stopped for, if any.
    fn stop_sig(&self) -> Option<Sig>;

    fn regs_ref(&self) -> &Registers;

    fn extra_regs_ref(&self) -> &ExtraRegisters;

    fn set_regs(&mut self, regs: &Registers);

    /// Read up to `buf.len()` bytes at `addr`. Returns the number of bytes
    /// actually read; `Err` when nothing at all was readable.
    fn read_bytes_fallible(&mut self, addr: RemotePtr<Void>, buf: &mut [u8]) -> Result<usize, ()>;

    fn write_bytes(&mut self, addr: RemotePtr<Void>, buf: &[u8]);

    fn vm(&self) -> AddressSpaceSharedPtr;

    fn session(&self) -> SessionSharedWeakPtr;
}
