use crate::{
    remote_code_ptr::RemoteCodePtr,
    remote_ptr::{RemotePtr, Void},
    trace_frame::FrameTime,
};
use std::{ffi::OsString, rc::Rc};

pub type AddressSpaceSharedPtr = Rc<dyn AddressSpace>;

/// The x86 soft-breakpoint instruction (int3).
pub const BREAKPOINT_INSN: u8 = 0xCC;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BreakpointType {
    /// Planted on behalf of the debugger client.
    User,
    /// Planted by the replayer for its own purposes.
    Internal,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WatchType {
    Exec,
    Write,
    ReadWrite,
}

#[derive(Copy, Clone, Debug)]
pub struct WatchConfig {
    pub addr: RemotePtr<Void>,
    pub num_bytes: usize,
    pub type_: WatchType,
}

impl WatchConfig {
    pub fn new(addr: RemotePtr<Void>, num_bytes: usize, type_: WatchType) -> WatchConfig {
        WatchConfig {
            addr,
            num_bytes,
            type_,
        }
    }
}

/// The trap table of one address space. Timeline-managed breakpoints land
/// here lazily before stepping; diversion sessions get debugger traps
/// mirrored in directly.
pub trait AddressSpace {
    fn exe_image(&self) -> OsString;

    /// The first event at which this address space ran tracee code, or 0 if
    /// it never has. Reverse execution must not go past it.
    fn first_run_event(&self) -> FrameTime;

    fn add_breakpoint(&self, addr: RemoteCodePtr, type_: BreakpointType) -> bool;

    fn remove_breakpoint(&self, addr: RemoteCodePtr, type_: BreakpointType);

    fn remove_all_breakpoints(&self);

    fn add_watchpoint(&self, addr: RemotePtr<Void>, num_bytes: usize, type_: WatchType) -> bool;

    fn remove_watchpoint(&self, addr: RemotePtr<Void>, num_bytes: usize, type_: WatchType);

    /// Rewrite `mem` (a copy of memory starting at `start`) so that any
    /// planted breakpoint instruction is replaced by the original byte. The
    /// client must see the program's code, not our traps.
    fn replace_breakpoints_with_original_values(&self, mem: &mut [u8], start: RemotePtr<Void>);
}
