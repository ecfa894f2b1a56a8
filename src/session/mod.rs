use crate::{
    session::{
        address_space::{WatchConfig, WatchType},
        task::{TaskSharedPtr, TaskSharedWeakPtr},
    },
    sig::Sig,
    trace_frame::FrameTime,
};
use libc::pid_t;
use std::rc::{Rc, Weak};

pub mod address_space;
pub mod task;

use crate::taskish_uid::TaskUid;

pub type SessionSharedPtr = Rc<dyn Session>;
pub type SessionSharedWeakPtr = Weak<dyn Session>;

/// A snapshot of one or more tasks. Replay sessions deterministically
/// reproduce a trace and must never be mutated by the debugger; diversion
/// sessions are disposable sandboxes forked from a replay session in which
/// mutation is legal.
pub trait Session {
    /// All tasks, in a stable order.
    fn tasks(&self) -> Vec<TaskSharedPtr>;

    fn find_task_from_rec_tid(&self, rec_tid: pid_t) -> Option<TaskSharedPtr>;

    fn find_task_from_task_uid(&self, tuid: TaskUid) -> Option<TaskSharedPtr>;

    /// The task the session would resume next.
    fn current_task(&self) -> Option<TaskSharedPtr>;

    fn is_diversion(&self) -> bool {
        self.as_diversion().is_some()
    }

    fn as_replay(&self) -> Option<&dyn ReplaySession> {
        None
    }

    fn as_diversion(&self) -> Option<&dyn DiversionSession> {
        None
    }

    fn kill_all_tasks(&self);

    /// Stable id for log messages.
    fn unique_id(&self) -> usize;
}

pub trait ReplaySession: Session {
    /// The event number of the current trace frame (the one most recently
    /// reached). The frame about to be replayed is this plus one.
    fn current_frame_time(&self) -> FrameTime;

    /// Tracee state can't be validated (or debugged) before the initial
    /// exec; the replayer's own address space layout differs from the
    /// recorder's until then.
    fn done_initial_exec(&self) -> bool;

    /// Fork a diversion session off the current state. The replay session
    /// itself is not perturbed.
    fn clone_diversion(&self) -> SessionSharedPtr;
}

pub trait DiversionSession: Session {
    fn diversion_step(
        &self,
        t: &TaskSharedPtr,
        command: RunCommand,
        signal_to_deliver: Option<Sig>,
    ) -> DiversionResult;
}

/// Why a replay or diversion step returned. Multiple reasons can apply
/// simultaneously.
#[derive(Clone)]
pub struct BreakStatus {
    /// The triggering task. May differ from `session.current_task()` when
    /// replay switches tasks as a step ends. `Weak::new()` when no task is
    /// associated.
    pub task: TaskSharedWeakPtr,
    /// Watchpoints hit; any hit stops after the triggering instruction has
    /// completed.
    pub watchpoints_hit: Vec<WatchConfig>,
    /// Set when we stopped because this signal was delivered to `task`.
    pub signal: Option<Sig>,
    /// True when we stopped on a software breakpoint at `task`'s ip().
    pub breakpoint_hit: bool,
    /// True when we stopped because a singlestep completed in `task`.
    pub singlestep_complete: bool,
    /// True when we stopped because `task` is about to exit.
    pub task_exit: bool,
}

impl Default for BreakStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakStatus {
    pub fn new() -> BreakStatus {
        BreakStatus {
            task: Weak::new(),
            watchpoints_hit: Vec::new(),
            signal: None,
            breakpoint_hit: false,
            singlestep_complete: false,
            task_exit: false,
        }
    }

    pub fn task_unwrap(&self) -> TaskSharedPtr {
        self.task.upgrade().unwrap()
    }

    /// True when we stopped on a software breakpoint or a hardware
    /// execution watchpoint; the CPU stops before the instruction executes
    /// in both cases.
    pub fn hardware_or_software_breakpoint_hit(&self) -> bool {
        self.breakpoint_hit
            || self
                .watchpoints_hit
                .iter()
                .any(|w| w.type_ == WatchType::Exec)
    }

    pub fn any_break(&self) -> bool {
        !self.watchpoints_hit.is_empty()
            || self.signal.is_some()
            || self.breakpoint_hit
            || self.singlestep_complete
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunCommand {
    /// Continue until we hit a breakpoint or a new replay event.
    Continue,
    /// Execute a single instruction (unless at a breakpoint or a replay
    /// event).
    Singlestep,
}

impl Default for RunCommand {
    fn default() -> Self {
        // Arbitrary
        Self::Continue
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReplayStatus {
    /// Some progress was made; see `break_status` for why we stopped.
    ReplayContinue,
    /// The trace has ended and no task remains.
    ReplayExited,
}

#[derive(Clone, Default)]
pub struct ReplayResult {
    pub status: ReplayStatus,
    pub break_status: BreakStatus,
}

impl Default for ReplayStatus {
    fn default() -> Self {
        ReplayStatus::ReplayContinue
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DiversionStatus {
    /// The diversion is still alive.
    DiversionContinue,
    /// All tasks of the diversion died.
    DiversionExited,
}

#[derive(Clone)]
pub struct DiversionResult {
    pub status: DiversionStatus,
    pub break_status: BreakStatus,
}

impl Default for DiversionResult {
    fn default() -> Self {
        DiversionResult {
            status: DiversionStatus::DiversionContinue,
            break_status: Default::default(),
        }
    }
}
