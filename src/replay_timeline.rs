use crate::{
    breakpoint_condition::BreakpointCondition,
    extra_registers::ExtraRegisters,
    registers::Registers,
    remote_code_ptr::RemoteCodePtr,
    remote_ptr::{RemotePtr, Void},
    session::{address_space::WatchType, task::TaskSharedPtr, ReplayResult, RunCommand},
    session::SessionSharedPtr,
    ticks::Ticks,
    trace_frame::FrameTime,
};
use std::{
    cmp::Ordering,
    fmt,
    fmt::{Display, Formatter},
    rc::Rc,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunDirection {
    RunForward,
    RunBackward,
}

impl Default for RunDirection {
    fn default() -> Self {
        // Pick an arbitrary one
        RunDirection::RunForward
    }
}

/// An opaque handle to an exact execution point in the replay. Cheap to
/// clone and compare; carries enough task state that register queries can
/// be answered from the mark alone, without seeking the timeline.
///
/// Whether a mark holds a checkpoint (and thus consumes a forked process)
/// is the timeline's business, tracked against the mark's identity; the
/// handle itself is always lightweight.
#[derive(Clone, Debug)]
pub struct Mark {
    ptr: Rc<InternalMark>,
}

#[derive(Debug)]
struct InternalMark {
    time: FrameTime,
    ticks: Ticks,
    /// Different program states can share (time, ticks); the timeline
    /// allocates `seq` so that the triple orders marks by execution time.
    seq: u32,
    regs: Registers,
    extra_regs: ExtraRegisters,
}

impl Mark {
    pub fn new(
        time: FrameTime,
        ticks: Ticks,
        seq: u32,
        regs: Registers,
        extra_regs: ExtraRegisters,
    ) -> Mark {
        Mark {
            ptr: Rc::new(InternalMark {
                time,
                ticks,
                seq,
                regs,
                extra_regs,
            }),
        }
    }

    /// The values of the general-purpose registers at this mark.
    pub fn regs(&self) -> &Registers {
        &self.ptr.regs
    }

    pub fn extra_regs(&self) -> &ExtraRegisters {
        &self.ptr.extra_regs
    }

    pub fn time(&self) -> FrameTime {
        self.ptr.time
    }

    pub fn ticks(&self) -> Ticks {
        self.ptr.ticks
    }

    fn key(&self) -> (FrameTime, Ticks, u32) {
        (self.ptr.time, self.ptr.ticks, self.ptr.seq)
    }
}

impl PartialEq for Mark {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.ptr, &other.ptr) || self.key() == other.key()
    }
}

impl Eq for Mark {}

impl PartialOrd for Mark {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Mark {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Display for Mark {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{time:{},ticks:{},seq:{}}}",
            self.ptr.time, self.ptr.ticks, self.ptr.seq
        )
    }
}

/// A scrubbable, ordered view over the replay of one recording: stepping in
/// either direction, cheap marks, explicit checkpoints, and the logical
/// breakpoint/watchpoint set that is applied lazily to sessions before they
/// step. Implemented by the replay engine; the server drives it and owns it
/// exclusively.
pub trait ReplayTimeline {
    /// The canonical replay session positioned at the current point.
    fn current_session(&self) -> SessionSharedPtr;

    /// A cheap reference to the current point.
    fn mark(&mut self) -> Mark;

    /// Checkpoints can only be added at stable points (e.g. not mid-event).
    fn can_add_checkpoint(&self) -> bool;

    /// Take a checkpoint of the current point. The returned mark holds
    /// resources (typically a forked process tree) until released with
    /// `remove_explicit_checkpoint`.
    fn add_explicit_checkpoint(&mut self) -> Mark;

    fn remove_explicit_checkpoint(&mut self, mark: &Mark);

    fn seek_to_mark(&mut self, mark: &Mark);

    /// Seek to a point at or before the start of the frame for `event`.
    fn seek_to_before_event(&mut self, event: FrameTime);

    /// Advance or rewind the replay. Forward steps stop at latest when the
    /// frame for `stop_at_event` would be entered. `interrupt_check` is
    /// polled during long steps; returning true abandons the step early.
    fn replay_step(
        &mut self,
        command: RunCommand,
        direction: RunDirection,
        stop_at_event: FrameTime,
        interrupt_check: &mut dyn FnMut() -> bool,
    ) -> ReplayResult;

    /// If the exact predecessor of `from` for task `t` is already in the
    /// mark cache, return it without any replaying. Returns `None` rather
    /// than doing any expensive work.
    fn lazy_reverse_singlestep(&mut self, from: &Mark, t: &TaskSharedPtr) -> Option<Mark>;

    fn add_breakpoint(
        &mut self,
        t: &TaskSharedPtr,
        addr: RemoteCodePtr,
        condition: Option<BreakpointCondition>,
    ) -> bool;

    fn remove_breakpoint(&mut self, t: &TaskSharedPtr, addr: RemoteCodePtr);

    fn add_watchpoint(
        &mut self,
        t: &TaskSharedPtr,
        addr: RemotePtr<Void>,
        num_bytes: usize,
        type_: WatchType,
        condition: Option<BreakpointCondition>,
    ) -> bool;

    fn remove_watchpoint(
        &mut self,
        t: &TaskSharedPtr,
        addr: RemotePtr<Void>,
        num_bytes: usize,
        type_: WatchType,
    );

    fn remove_breakpoints_and_watchpoints(&mut self);

    /// Force the logical breakpoint/watchpoint set into the current
    /// session's address spaces now instead of lazily before the next step.
    fn apply_breakpoints_and_watchpoints(&mut self);

    /// Reverse execution will refuse to go to points before `event`.
    fn set_reverse_execution_barrier_event(&mut self, event: FrameTime);
}
