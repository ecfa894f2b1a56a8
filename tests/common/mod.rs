//! An in-memory replay engine and a scripted client connection, enough to
//! drive the server end-to-end: a linear single-task trace where event `e`
//! executes the instruction at `IP_BASE + e`, with marks, checkpoints,
//! breakpoints and diversion forks behaving like the real engine's.

#![allow(dead_code)]

use retrace_gdbserver::{
    breakpoint_condition::BreakpointCondition,
    extra_registers::ExtraRegisters,
    gdb_connection::{
        GdbActionType, GdbAuxvPair, GdbConnection, GdbConnectionFeatures, GdbConnectionSharedPtr,
        GdbContAction, GdbRegisterValue, GdbRegisterValueData, GdbRequest, GdbRestartType,
        GdbThreadId, DREQ_CONT, DREQ_DETACH, DREQ_GET_AUXV, DREQ_GET_CURRENT_THREAD,
        DREQ_GET_IS_THREAD_ALIVE, DREQ_GET_MEM, DREQ_GET_REGS, DREQ_GET_STOP_REASON,
        DREQ_GET_THREAD_EXTRA_INFO, DREQ_GET_THREAD_LIST, DREQ_INTERRUPT, DREQ_READ_SIGINFO,
        DREQ_REMOVE_SW_BREAK, DREQ_RESTART, DREQ_SET_MEM, DREQ_SET_RD_WATCH, DREQ_SET_REG,
        DREQ_SET_SW_BREAK, DREQ_WRITE_SIGINFO,
    },
    gdb_register::{GdbRegister, DREG_RAX, DREG_RIP},
    kernel_abi::SupportedArch,
    registers::Registers,
    remote_code_ptr::RemoteCodePtr,
    remote_ptr::{RemotePtr, Void},
    replay_timeline::{Mark, ReplayTimeline, RunDirection},
    scoped_fd::ScopedFd,
    session::{
        address_space::{
            AddressSpace, AddressSpaceSharedPtr, BreakpointType, WatchConfig, WatchType,
        },
        task::{Task, TaskSharedPtr},
        BreakStatus, DiversionResult, DiversionSession, DiversionStatus, ReplayResult,
        ReplaySession, ReplayStatus, RunCommand, Session, SessionSharedPtr, SessionSharedWeakPtr,
    },
    sig::Sig,
    taskish_uid::{TaskUid, ThreadGroupUid},
    trace_frame::FrameTime,
};
use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, HashMap, VecDeque},
    ffi::OsString,
    rc::{Rc, Weak},
};

pub const IP_BASE: usize = 0x1000;
pub const REC_TID: libc::pid_t = 1000;

pub fn ip_of(event: FrameTime) -> usize {
    IP_BASE + event as usize
}

pub type SharedMem = Rc<RefCell<BTreeMap<usize, u8>>>;

fn regs_for(event: FrameTime) -> Registers {
    let mut regs = Registers::new(SupportedArch::X64);
    regs.write_register_u64(ip_of(event) as u64, DREG_RIP);
    regs.write_register_u64(event, DREG_RAX);
    regs
}

// ---------------------------------------------------------------------------
// Address space

pub struct FakeAddressSpace {
    mem: SharedMem,
    traps: RefCell<HashMap<usize, u8>>,
    watchpoints: RefCell<Vec<(usize, usize, WatchType)>>,
}

impl FakeAddressSpace {
    fn new(mem: SharedMem) -> FakeAddressSpace {
        FakeAddressSpace {
            mem,
            traps: RefCell::new(HashMap::new()),
            watchpoints: RefCell::new(Vec::new()),
        }
    }

    pub fn has_trap(&self, addr: usize) -> bool {
        self.traps.borrow().contains_key(&addr)
    }

    pub fn watchpoints(&self) -> Vec<(usize, usize, WatchType)> {
        self.watchpoints.borrow().clone()
    }
}

impl AddressSpace for FakeAddressSpace {
    fn exe_image(&self) -> OsString {
        OsString::from("/fake/bin/traced")
    }

    fn first_run_event(&self) -> FrameTime {
        1
    }

    fn add_breakpoint(&self, addr: RemoteCodePtr, _type_: BreakpointType) -> bool {
        let addr = addr.as_usize();
        let mut traps = self.traps.borrow_mut();
        if traps.contains_key(&addr) {
            return true;
        }
        let orig = self.mem.borrow().get(&addr).copied().unwrap_or(0);
        traps.insert(addr, orig);
        self.mem.borrow_mut().insert(addr, 0xCC);
        true
    }

    fn remove_breakpoint(&self, addr: RemoteCodePtr, _type_: BreakpointType) {
        let addr = addr.as_usize();
        if let Some(orig) = self.traps.borrow_mut().remove(&addr) {
            self.mem.borrow_mut().insert(addr, orig);
        }
    }

    fn remove_all_breakpoints(&self) {
        let mut traps = self.traps.borrow_mut();
        let mut mem = self.mem.borrow_mut();
        for (addr, orig) in traps.drain() {
            mem.insert(addr, orig);
        }
    }

    fn add_watchpoint(&self, addr: RemotePtr<Void>, num_bytes: usize, type_: WatchType) -> bool {
        self.watchpoints
            .borrow_mut()
            .push((addr.as_usize(), num_bytes, type_));
        true
    }

    fn remove_watchpoint(&self, addr: RemotePtr<Void>, num_bytes: usize, type_: WatchType) {
        self.watchpoints
            .borrow_mut()
            .retain(|&w| w != (addr.as_usize(), num_bytes, type_));
    }

    fn replace_breakpoints_with_original_values(&self, mem: &mut [u8], start: RemotePtr<Void>) {
        let start = start.as_usize();
        for (&addr, &orig) in self.traps.borrow().iter() {
            if addr >= start && addr < start + mem.len() {
                mem[addr - start] = orig;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Task

/// Back-pointer from a task to its owning session, filled in after the
/// session exists.
pub type SessionSlot = Rc<RefCell<Weak<dyn Session>>>;

fn new_session_slot() -> SessionSlot {
    Rc::new(RefCell::new(Weak::<FakeReplaySession>::new()))
}

pub struct FakeTask {
    serial: u32,
    regs: Registers,
    extra_regs: ExtraRegisters,
    mem: SharedMem,
    vm: Rc<FakeAddressSpace>,
    session: SessionSlot,
}

impl FakeTask {
    fn new(mem: SharedMem, vm: Rc<FakeAddressSpace>, serial: u32, session: SessionSlot) -> FakeTask {
        FakeTask {
            serial,
            regs: regs_for(0),
            extra_regs: ExtraRegisters::new(SupportedArch::X64),
            mem,
            vm,
            session,
        }
    }
}

impl Task for FakeTask {
    fn tuid(&self) -> TaskUid {
        TaskUid::new_with(REC_TID, self.serial)
    }
    fn tguid(&self) -> ThreadGroupUid {
        ThreadGroupUid::new_with(REC_TID, 1)
    }
    fn rec_tid(&self) -> libc::pid_t {
        REC_TID
    }
    fn tgid(&self) -> libc::pid_t {
        REC_TID
    }
    fn real_tgid(&self) -> libc::pid_t {
        std::process::id() as libc::pid_t
    }
    fn name(&self) -> OsString {
        OsString::from("traced")
    }
    fn arch(&self) -> SupportedArch {
        SupportedArch::X64
    }
    fn execed(&self) -> bool {
        true
    }
    fn thread_group_size(&self) -> usize {
        1
    }
    fn stop_sig(&self) -> Option<Sig> {
        None
    }
    fn regs_ref(&self) -> &Registers {
        &self.regs
    }
    fn extra_regs_ref(&self) -> &ExtraRegisters {
        &self.extra_regs
    }
    fn set_regs(&mut self, regs: &Registers) {
        self.regs = regs.clone();
    }
    fn read_bytes_fallible(&mut self, addr: RemotePtr<Void>, buf: &mut [u8]) -> Result<usize, ()> {
        let start = addr.as_usize();
        let mem = self.mem.borrow();
        let mut nread = 0;
        for (i, out) in buf.iter_mut().enumerate() {
            match mem.get(&(start + i)) {
                Some(&b) => {
                    *out = b;
                    nread += 1;
                }
                None => break,
            }
        }
        if nread == 0 && !buf.is_empty() {
            Err(())
        } else {
            Ok(nread)
        }
    }
    fn write_bytes(&mut self, addr: RemotePtr<Void>, buf: &[u8]) {
        let start = addr.as_usize();
        let mut mem = self.mem.borrow_mut();
        for (i, &b) in buf.iter().enumerate() {
            mem.insert(start + i, b);
        }
    }
    fn vm(&self) -> AddressSpaceSharedPtr {
        self.vm.clone()
    }
    fn session(&self) -> SessionSharedWeakPtr {
        self.session.borrow().clone()
    }
}

fn make_task(
    mem: &SharedMem,
    vm: &Rc<FakeAddressSpace>,
    serial: u32,
    session: &SessionSlot,
) -> TaskSharedPtr {
    Rc::new(RefCell::new(Box::new(FakeTask::new(
        mem.clone(),
        vm.clone(),
        serial,
        session.clone(),
    )) as Box<dyn Task>))
}

// ---------------------------------------------------------------------------
// Sessions

pub struct FakeReplaySession {
    task: RefCell<Option<TaskSharedPtr>>,
    frame_time: Cell<FrameTime>,
    pub vm: Rc<FakeAddressSpace>,
    pub mem: SharedMem,
    pub last_diversion: RefCell<Option<Rc<FakeDiversionSession>>>,
}

impl FakeReplaySession {
    pub fn frame_time(&self) -> FrameTime {
        self.frame_time.get()
    }

    pub fn task_ptr(&self) -> TaskSharedPtr {
        self.task()
    }

    fn task(&self) -> TaskSharedPtr {
        self.task.borrow().as_ref().unwrap().clone()
    }
}

impl Session for FakeReplaySession {
    fn tasks(&self) -> Vec<TaskSharedPtr> {
        vec![self.task()]
    }
    fn find_task_from_rec_tid(&self, rec_tid: libc::pid_t) -> Option<TaskSharedPtr> {
        if rec_tid == REC_TID {
            Some(self.task())
        } else {
            None
        }
    }
    fn find_task_from_task_uid(&self, tuid: TaskUid) -> Option<TaskSharedPtr> {
        if tuid.tid() == REC_TID {
            Some(self.task())
        } else {
            None
        }
    }
    fn current_task(&self) -> Option<TaskSharedPtr> {
        Some(self.task())
    }
    fn as_replay(&self) -> Option<&dyn ReplaySession> {
        Some(self)
    }
    fn kill_all_tasks(&self) {}
    fn unique_id(&self) -> usize {
        1
    }
}

impl ReplaySession for FakeReplaySession {
    fn current_frame_time(&self) -> FrameTime {
        self.frame_time.get()
    }

    fn done_initial_exec(&self) -> bool {
        true
    }

    fn clone_diversion(&self) -> SessionSharedPtr {
        // Deep-copy memory and trap state; the fork shares nothing mutable
        // with the canonical session.
        let mem: SharedMem = Rc::new(RefCell::new(self.mem.borrow().clone()));
        let vm = Rc::new(FakeAddressSpace::new(mem.clone()));
        *vm.traps.borrow_mut() = self.vm.traps.borrow().clone();
        *vm.watchpoints.borrow_mut() = self.vm.watchpoints.borrow().clone();
        let slot = new_session_slot();
        let task = make_task(&mem, &vm, 2, &slot);
        {
            let src = self.task();
            let regs = src.borrow().regs_ref().clone();
            task.borrow_mut().set_regs(&regs);
        }
        let diversion = Rc::new(FakeDiversionSession {
            task: RefCell::new(Some(task)),
            vm,
            mem,
            killed: Cell::new(false),
        });
        let as_dyn: Rc<dyn Session> = diversion.clone();
        *slot.borrow_mut() = Rc::downgrade(&as_dyn);
        *self.last_diversion.borrow_mut() = Some(diversion);
        as_dyn
    }
}

pub struct FakeDiversionSession {
    task: RefCell<Option<TaskSharedPtr>>,
    pub vm: Rc<FakeAddressSpace>,
    pub mem: SharedMem,
    pub killed: Cell<bool>,
}

impl Session for FakeDiversionSession {
    fn tasks(&self) -> Vec<TaskSharedPtr> {
        self.task.borrow().iter().cloned().collect()
    }
    fn find_task_from_rec_tid(&self, rec_tid: libc::pid_t) -> Option<TaskSharedPtr> {
        if rec_tid == REC_TID {
            self.task.borrow().clone()
        } else {
            None
        }
    }
    fn find_task_from_task_uid(&self, tuid: TaskUid) -> Option<TaskSharedPtr> {
        if tuid.tid() == REC_TID {
            self.task.borrow().clone()
        } else {
            None
        }
    }
    fn current_task(&self) -> Option<TaskSharedPtr> {
        self.task.borrow().clone()
    }
    fn as_diversion(&self) -> Option<&dyn DiversionSession> {
        Some(self)
    }
    fn kill_all_tasks(&self) {
        self.killed.set(true);
    }
    fn unique_id(&self) -> usize {
        2
    }
}

impl DiversionSession for FakeDiversionSession {
    fn diversion_step(
        &self,
        t: &TaskSharedPtr,
        _command: RunCommand,
        _signal_to_deliver: Option<Sig>,
    ) -> DiversionResult {
        // One instruction of progress, then a singlestep-complete stop.
        let mut regs = t.borrow().regs_ref().clone();
        let ip = regs.ip();
        regs.set_ip(ip + 1);
        t.borrow_mut().set_regs(&regs);
        let mut result = DiversionResult::default();
        result.status = DiversionStatus::DiversionContinue;
        result.break_status = BreakStatus {
            task: Rc::downgrade(t),
            singlestep_complete: true,
            ..BreakStatus::new()
        };
        result
    }
}

/// A session that is neither replay nor diversion, as seen by the
/// emergency-debug entry point.
pub struct FakeBareSession {
    task: RefCell<Option<TaskSharedPtr>>,
    pub vm: Rc<FakeAddressSpace>,
    pub mem: SharedMem,
}

impl Session for FakeBareSession {
    fn tasks(&self) -> Vec<TaskSharedPtr> {
        self.task.borrow().iter().cloned().collect()
    }
    fn find_task_from_rec_tid(&self, rec_tid: libc::pid_t) -> Option<TaskSharedPtr> {
        if rec_tid == REC_TID {
            self.task.borrow().clone()
        } else {
            None
        }
    }
    fn find_task_from_task_uid(&self, tuid: TaskUid) -> Option<TaskSharedPtr> {
        if tuid.tid() == REC_TID {
            self.task.borrow().clone()
        } else {
            None
        }
    }
    fn current_task(&self) -> Option<TaskSharedPtr> {
        self.task.borrow().clone()
    }
    fn kill_all_tasks(&self) {}
    fn unique_id(&self) -> usize {
        3
    }
}

/// A lone task in a bare session, for emergency-mode tests.
pub fn build_bare_task() -> (Rc<FakeBareSession>, TaskSharedPtr) {
    let mem: SharedMem = Rc::new(RefCell::new(BTreeMap::new()));
    {
        let mut m = mem.borrow_mut();
        for e in 0..=16u64 {
            m.insert(ip_of(e), 0x90);
        }
    }
    let vm = Rc::new(FakeAddressSpace::new(mem.clone()));
    let slot = new_session_slot();
    let task = make_task(&mem, &vm, 1, &slot);
    let session = Rc::new(FakeBareSession {
        task: RefCell::new(Some(task.clone())),
        vm,
        mem,
    });
    let as_dyn: Rc<dyn Session> = session.clone();
    *slot.borrow_mut() = Rc::downgrade(&as_dyn);
    (session, task)
}

// ---------------------------------------------------------------------------
// Timeline

struct FakeWatch {
    addr: usize,
    num_bytes: usize,
    type_: WatchType,
    condition: Option<BreakpointCondition>,
}

pub struct TimelineState {
    session: RefCell<Option<Rc<FakeReplaySession>>>,
    trace_len: FrameTime,
    barrier: Cell<FrameTime>,
    breakpoints: RefCell<HashMap<usize, Option<BreakpointCondition>>>,
    watchpoints: RefCell<Vec<FakeWatch>>,
    mark_cache: RefCell<HashMap<FrameTime, Mark>>,
    explicit_counts: RefCell<HashMap<FrameTime, u32>>,
    seeks: Cell<usize>,
    applied: Cell<bool>,
    /// Every watchpoint ever installed, surviving removal; lets tests check
    /// what the dispatcher asked for after the set is torn down.
    watch_log: RefCell<Vec<(usize, usize, WatchType)>>,
    /// The fake trace "writes" this address at this event, for watchpoint
    /// tests.
    watch_write: Cell<Option<(FrameTime, usize)>>,
}

impl TimelineState {
    pub fn seek_count(&self) -> usize {
        self.seeks.get()
    }

    pub fn position(&self) -> FrameTime {
        self.session().frame_time()
    }

    pub fn has_breakpoint(&self, addr: usize) -> bool {
        self.breakpoints.borrow().contains_key(&addr)
    }

    pub fn watch_types(&self) -> Vec<(usize, usize, WatchType)> {
        self.watchpoints
            .borrow()
            .iter()
            .map(|w| (w.addr, w.num_bytes, w.type_))
            .collect()
    }

    pub fn watch_history(&self) -> Vec<(usize, usize, WatchType)> {
        self.watch_log.borrow().clone()
    }

    pub fn outstanding_checkpoints(&self) -> u32 {
        self.explicit_counts.borrow().values().sum()
    }

    pub fn set_watch_write(&self, event: FrameTime, addr: usize) {
        self.watch_write.set(Some((event, addr)));
    }

    fn session(&self) -> Rc<FakeReplaySession> {
        self.session.borrow().as_ref().unwrap().clone()
    }

    fn set_position(&self, event: FrameTime) {
        let session = self.session();
        session.frame_time.set(event);
        let task = session.task();
        task.borrow_mut().set_regs(&regs_for(event));
    }

    fn mark_at(&self, event: FrameTime) -> Mark {
        if let Some(m) = self.mark_cache.borrow().get(&event) {
            return m.clone();
        }
        let m = Mark::new(
            event,
            event,
            0,
            regs_for(event),
            ExtraRegisters::new(SupportedArch::X64),
        );
        self.mark_cache.borrow_mut().insert(event, m.clone());
        m
    }

    fn bp_fires(&self, addr: usize) -> bool {
        let bps = self.breakpoints.borrow();
        match bps.get(&addr) {
            None => false,
            Some(None) => true,
            Some(Some(cond)) => {
                let task = self.session().task();
                let mut tb = task.borrow_mut();
                cond.evaluate(&mut **tb)
            }
        }
    }

    fn watch_fires(&self, event: FrameTime) -> Option<WatchConfig> {
        let (ev, addr) = self.watch_write.get()?;
        if ev != event {
            return None;
        }
        for w in self.watchpoints.borrow().iter() {
            if addr >= w.addr && addr < w.addr + w.num_bytes && w.type_ != WatchType::Exec {
                return Some(WatchConfig::new(
                    RemotePtr::new(w.addr),
                    w.num_bytes,
                    w.type_,
                ));
            }
        }
        None
    }

    fn break_status(&self) -> BreakStatus {
        BreakStatus {
            task: Rc::downgrade(&self.session().task()),
            ..BreakStatus::new()
        }
    }
}

pub struct FakeTimeline {
    pub state: Rc<TimelineState>,
}

impl ReplayTimeline for FakeTimeline {
    fn current_session(&self) -> SessionSharedPtr {
        self.state.session()
    }

    fn mark(&mut self) -> Mark {
        self.state.mark_at(self.state.position())
    }

    fn can_add_checkpoint(&self) -> bool {
        true
    }

    fn add_explicit_checkpoint(&mut self) -> Mark {
        let pos = self.state.position();
        *self
            .state
            .explicit_counts
            .borrow_mut()
            .entry(pos)
            .or_insert(0) += 1;
        self.state.mark_at(pos)
    }

    fn remove_explicit_checkpoint(&mut self, mark: &Mark) {
        let mut counts = self.state.explicit_counts.borrow_mut();
        let count = counts
            .get_mut(&mark.time())
            .expect("released a mark that holds no checkpoint");
        assert!(*count > 0);
        *count -= 1;
        if *count == 0 {
            counts.remove(&mark.time());
        }
    }

    fn seek_to_mark(&mut self, mark: &Mark) {
        self.state.seeks.set(self.state.seeks.get() + 1);
        self.state.set_position(mark.time());
    }

    fn seek_to_before_event(&mut self, event: FrameTime) {
        self.state.seeks.set(self.state.seeks.get() + 1);
        let target = std::cmp::min(event.saturating_sub(1), self.state.trace_len);
        self.state.set_position(target);
    }

    fn replay_step(
        &mut self,
        command: RunCommand,
        direction: RunDirection,
        stop_at_event: FrameTime,
        interrupt_check: &mut dyn FnMut() -> bool,
    ) -> ReplayResult {
        let state = &self.state;
        let mut result = ReplayResult::default();
        match direction {
            RunDirection::RunForward => {
                if state.position() == state.trace_len {
                    result.status = ReplayStatus::ReplayExited;
                    return result;
                }
                let bounded_start = state.position();
                loop {
                    if interrupt_check() {
                        result.break_status = state.break_status();
                        return result;
                    }
                    let next = state.position() + 1;
                    state.set_position(next);
                    if command == RunCommand::Singlestep {
                        // Instruction-level stepping leaves marks behind,
                        // which is what makes lazy reverse-singlestep work.
                        state.mark_at(next - 1);
                        state.mark_at(next);
                    }
                    let mut bs = state.break_status();
                    if next == state.trace_len {
                        bs.task_exit = true;
                        result.break_status = bs;
                        return result;
                    }
                    if state.bp_fires(ip_of(next)) {
                        bs.breakpoint_hit = true;
                        result.break_status = bs;
                        return result;
                    }
                    if let Some(w) = state.watch_fires(next) {
                        bs.watchpoints_hit.push(w);
                        result.break_status = bs;
                        return result;
                    }
                    if command == RunCommand::Singlestep {
                        bs.singlestep_complete = true;
                        result.break_status = bs;
                        return result;
                    }
                    if stop_at_event != 0 && bounded_start < stop_at_event && next >= stop_at_event
                    {
                        result.break_status = bs;
                        return result;
                    }
                }
            }
            RunDirection::RunBackward => {
                loop {
                    let pos = state.position();
                    if pos == 0 || pos <= state.barrier.get() {
                        let mut bs = state.break_status();
                        bs.task_exit = true;
                        result.break_status = bs;
                        return result;
                    }
                    if interrupt_check() {
                        result.break_status = state.break_status();
                        return result;
                    }
                    let next = pos - 1;
                    state.set_position(next);
                    let mut bs = state.break_status();
                    if command == RunCommand::Singlestep {
                        bs.singlestep_complete = true;
                        result.break_status = bs;
                        return result;
                    }
                    if state.bp_fires(ip_of(next)) {
                        bs.breakpoint_hit = true;
                        result.break_status = bs;
                        return result;
                    }
                    if next == 0 || next <= state.barrier.get() {
                        bs.task_exit = true;
                        result.break_status = bs;
                        return result;
                    }
                }
            }
        }
    }

    fn lazy_reverse_singlestep(&mut self, from: &Mark, _t: &TaskSharedPtr) -> Option<Mark> {
        if from.time() == 0 || from.time() <= self.state.barrier.get() {
            return None;
        }
        self.state
            .mark_cache
            .borrow()
            .get(&(from.time() - 1))
            .cloned()
    }

    fn add_breakpoint(
        &mut self,
        _t: &TaskSharedPtr,
        addr: RemoteCodePtr,
        condition: Option<BreakpointCondition>,
    ) -> bool {
        self.state
            .breakpoints
            .borrow_mut()
            .insert(addr.as_usize(), condition);
        self.state.applied.set(false);
        true
    }

    fn remove_breakpoint(&mut self, _t: &TaskSharedPtr, addr: RemoteCodePtr) {
        self.state.breakpoints.borrow_mut().remove(&addr.as_usize());
    }

    fn add_watchpoint(
        &mut self,
        _t: &TaskSharedPtr,
        addr: RemotePtr<Void>,
        num_bytes: usize,
        type_: WatchType,
        condition: Option<BreakpointCondition>,
    ) -> bool {
        self.state
            .watch_log
            .borrow_mut()
            .push((addr.as_usize(), num_bytes, type_));
        self.state.watchpoints.borrow_mut().push(FakeWatch {
            addr: addr.as_usize(),
            num_bytes,
            type_,
            condition,
        });
        true
    }

    fn remove_watchpoint(
        &mut self,
        _t: &TaskSharedPtr,
        addr: RemotePtr<Void>,
        num_bytes: usize,
        type_: WatchType,
    ) {
        self.state
            .watchpoints
            .borrow_mut()
            .retain(|w| !(w.addr == addr.as_usize() && w.num_bytes == num_bytes && w.type_ == type_));
    }

    fn remove_breakpoints_and_watchpoints(&mut self) {
        self.state.breakpoints.borrow_mut().clear();
        self.state.watchpoints.borrow_mut().clear();
        self.state.session().vm.remove_all_breakpoints();
    }

    fn apply_breakpoints_and_watchpoints(&mut self) {
        let session = self.state.session();
        for &addr in self.state.breakpoints.borrow().keys() {
            session.vm.add_breakpoint(RemoteCodePtr::new(addr), BreakpointType::User);
        }
        for w in self.state.watchpoints.borrow().iter() {
            session
                .vm
                .add_watchpoint(RemotePtr::new(w.addr), w.num_bytes, w.type_);
        }
        self.state.applied.set(true);
    }

    fn set_reverse_execution_barrier_event(&mut self, event: FrameTime) {
        self.state.barrier.set(event);
    }
}

// ---------------------------------------------------------------------------
// Scripted connection

/// Everything the server sent back, in order.
#[derive(Clone, Debug)]
pub enum Reply {
    Stop {
        thread: GdbThreadId,
        sig: Option<i32>,
        watch_addr: usize,
    },
    NoSuchThread,
    ExitCode(i32),
    RestartFailed,
    CurrentThread(GdbThreadId),
    Offsets,
    ThreadList(Vec<GdbThreadId>),
    IsThreadAlive(bool),
    ThreadExtraInfo(OsString),
    SelectThread(bool),
    Auxv(Vec<GdbAuxvPair>),
    Mem(Vec<u8>),
    SetMem(bool),
    Reg(GdbRegisterValue),
    Regs(Vec<GdbRegisterValue>),
    SetReg(bool),
    StopReason {
        thread: GdbThreadId,
        sig: Option<i32>,
    },
    Watchpoint(bool),
    ReadSiginfo(Vec<u8>),
    WriteSiginfo,
    Detach,
}

pub struct ScriptedConnection {
    requests: VecDeque<GdbRequest>,
    pub replies: Vec<Reply>,
    features: GdbConnectionFeatures,
    pub awaited: bool,
}

impl ScriptedConnection {
    pub fn new(requests: Vec<GdbRequest>, reverse_execution: bool) -> ScriptedConnection {
        ScriptedConnection {
            requests: requests.into(),
            replies: Vec::new(),
            features: GdbConnectionFeatures { reverse_execution },
            awaited: false,
        }
    }

    pub fn stops(&self) -> Vec<(Option<i32>, usize)> {
        self.replies
            .iter()
            .filter_map(|r| match r {
                Reply::Stop {
                    sig, watch_addr, ..
                } => Some((*sig, *watch_addr)),
                _ => None,
            })
            .collect()
    }

    pub fn mems(&self) -> Vec<Vec<u8>> {
        self.replies
            .iter()
            .filter_map(|r| match r {
                Reply::Mem(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }
}

impl GdbConnection for ScriptedConnection {
    fn await_debugger(&mut self, _listen_fd: &ScopedFd, _tgid: libc::pid_t) {
        self.awaited = true;
    }

    fn features(&self) -> GdbConnectionFeatures {
        self.features
    }

    fn get_request(&mut self) -> GdbRequest {
        self.requests
            .pop_front()
            .unwrap_or_else(|| GdbRequest::new(DREQ_DETACH))
    }

    fn sniff_packet(&mut self) -> bool {
        false
    }

    fn notify_stop(&mut self, thread: GdbThreadId, sig: Option<Sig>, watch_addr: RemotePtr<Void>) {
        self.replies.push(Reply::Stop {
            thread,
            sig: sig.map(|s| s.as_raw()),
            watch_addr: watch_addr.as_usize(),
        });
    }

    fn notify_no_such_thread(&mut self, _req: &GdbRequest) {
        self.replies.push(Reply::NoSuchThread);
    }

    fn notify_exit_code(&mut self, code: i32) {
        self.replies.push(Reply::ExitCode(code));
    }

    fn notify_restart_failed(&mut self) {
        self.replies.push(Reply::RestartFailed);
    }

    fn reply_get_current_thread(&mut self, thread: GdbThreadId) {
        self.replies.push(Reply::CurrentThread(thread));
    }

    fn reply_get_offsets(&mut self) {
        self.replies.push(Reply::Offsets);
    }

    fn reply_get_thread_list(&mut self, threads: &[GdbThreadId]) {
        self.replies.push(Reply::ThreadList(threads.to_vec()));
    }

    fn reply_get_is_thread_alive(&mut self, alive: bool) {
        self.replies.push(Reply::IsThreadAlive(alive));
    }

    fn reply_get_thread_extra_info(&mut self, info: &std::ffi::OsStr) {
        self.replies.push(Reply::ThreadExtraInfo(info.to_owned()));
    }

    fn reply_select_thread(&mut self, ok: bool) {
        self.replies.push(Reply::SelectThread(ok));
    }

    fn reply_get_auxv(&mut self, auxv: &[GdbAuxvPair]) {
        self.replies.push(Reply::Auxv(auxv.to_vec()));
    }

    fn reply_get_mem(&mut self, mem: &[u8]) {
        self.replies.push(Reply::Mem(mem.to_vec()));
    }

    fn reply_set_mem(&mut self, ok: bool) {
        self.replies.push(Reply::SetMem(ok));
    }

    fn reply_get_reg(&mut self, reg: &GdbRegisterValue) {
        self.replies.push(Reply::Reg(reg.clone()));
    }

    fn reply_get_regs(&mut self, file: &[GdbRegisterValue]) {
        self.replies.push(Reply::Regs(file.to_vec()));
    }

    fn reply_set_reg(&mut self, ok: bool) {
        self.replies.push(Reply::SetReg(ok));
    }

    fn reply_get_stop_reason(&mut self, which: GdbThreadId, sig: Option<Sig>) {
        self.replies.push(Reply::StopReason {
            thread: which,
            sig: sig.map(|s| s.as_raw()),
        });
    }

    fn reply_watchpoint_request(&mut self, ok: bool) {
        self.replies.push(Reply::Watchpoint(ok));
    }

    fn reply_read_siginfo(&mut self, si_bytes: &[u8]) {
        self.replies.push(Reply::ReadSiginfo(si_bytes.to_vec()));
    }

    fn reply_write_siginfo(&mut self) {
        self.replies.push(Reply::WriteSiginfo);
    }

    fn reply_detach(&mut self) {
        self.replies.push(Reply::Detach);
    }
}

// ---------------------------------------------------------------------------
// Fixture

pub struct Fixture {
    pub conn: Rc<RefCell<ScriptedConnection>>,
    pub timeline: Rc<TimelineState>,
    pub session: Rc<FakeReplaySession>,
    pub mem: SharedMem,
}

impl Fixture {
    pub fn connection_ptr(&self) -> GdbConnectionSharedPtr {
        self.conn.clone()
    }

    pub fn replies(&self) -> Vec<Reply> {
        self.conn.borrow().replies.clone()
    }
}

pub fn build_fixture(
    trace_len: FrameTime,
    requests: Vec<GdbRequest>,
    reverse_execution: bool,
) -> (retrace_gdbserver::gdb_server::GdbServer, Fixture) {
    build_fixture_with_target(trace_len, 3, requests, reverse_execution)
}

pub fn build_fixture_with_target(
    trace_len: FrameTime,
    target_event: FrameTime,
    requests: Vec<GdbRequest>,
    reverse_execution: bool,
) -> (retrace_gdbserver::gdb_server::GdbServer, Fixture) {
    use retrace_gdbserver::gdb_server::{GdbServer, Target};

    let mem: SharedMem = Rc::new(RefCell::new(BTreeMap::new()));
    // Seed some program text and data for memory reads.
    {
        let mut m = mem.borrow_mut();
        for e in 0..=trace_len {
            m.insert(ip_of(e), 0x90);
        }
        for (i, b) in [9u8, 9, 9, 9].iter().enumerate() {
            m.insert(DATA_ADDR + i, *b);
        }
    }
    let vm = Rc::new(FakeAddressSpace::new(mem.clone()));
    let slot = new_session_slot();
    let task = make_task(&mem, &vm, 1, &slot);
    let session = Rc::new(FakeReplaySession {
        task: RefCell::new(Some(task)),
        frame_time: Cell::new(0),
        vm,
        mem: mem.clone(),
        last_diversion: RefCell::new(None),
    });
    let as_dyn: Rc<dyn Session> = session.clone();
    *slot.borrow_mut() = Rc::downgrade(&as_dyn);

    let state = Rc::new(TimelineState {
        session: RefCell::new(Some(session.clone())),
        trace_len,
        barrier: Cell::new(0),
        breakpoints: RefCell::new(HashMap::new()),
        watchpoints: RefCell::new(Vec::new()),
        mark_cache: RefCell::new(HashMap::new()),
        explicit_counts: RefCell::new(HashMap::new()),
        seeks: Cell::new(0),
        applied: Cell::new(false),
        watch_log: RefCell::new(Vec::new()),
        watch_write: Cell::new(None),
    });

    let server = GdbServer::new(
        Box::new(FakeTimeline {
            state: state.clone(),
        }),
        &Target {
            pid: None,
            require_exec: false,
            event: target_event,
        },
    );

    let conn = Rc::new(RefCell::new(ScriptedConnection::new(
        requests,
        reverse_execution,
    )));

    (
        server,
        Fixture {
            conn,
            timeline: state,
            session,
            mem,
        },
    )
}

pub const DATA_ADDR: usize = 0x5000;

// ---------------------------------------------------------------------------
// Request builders

pub fn thread() -> GdbThreadId {
    GdbThreadId::new(REC_TID, REC_TID)
}

pub fn req_get_mem(addr: usize, len: usize) -> GdbRequest {
    let mut req = GdbRequest::new(DREQ_GET_MEM);
    req.mem_mut().addr = RemotePtr::new(addr);
    req.mem_mut().len = len;
    req
}

pub fn req_set_mem(addr: usize, data: &[u8]) -> GdbRequest {
    let mut req = GdbRequest::new(DREQ_SET_MEM);
    req.mem_mut().addr = RemotePtr::new(addr);
    req.mem_mut().len = data.len();
    req.mem_mut().data = data.to_vec();
    req
}

pub fn req_cont(direction: RunDirection, action: GdbActionType) -> GdbRequest {
    let mut req = GdbRequest::new(DREQ_CONT);
    req.cont_mut().run_direction = direction;
    req.cont_mut()
        .actions
        .push(GdbContAction::new(action, GdbThreadId::ANY, None));
    req
}

pub fn req_read_siginfo(len: usize) -> GdbRequest {
    let mut req = GdbRequest::new(DREQ_READ_SIGINFO);
    req.mem_mut().len = len;
    req
}

pub fn req_write_siginfo() -> GdbRequest {
    GdbRequest::new(DREQ_WRITE_SIGINFO)
}

pub fn req_set_sw_break(addr: usize, conditions: Vec<Vec<u8>>) -> GdbRequest {
    let mut req = GdbRequest::new(DREQ_SET_SW_BREAK);
    req.watch_mut().addr = RemotePtr::new(addr);
    req.watch_mut().kind = 1;
    req.watch_mut().conditions = conditions;
    req
}

pub fn req_remove_sw_break(addr: usize) -> GdbRequest {
    let mut req = GdbRequest::new(DREQ_REMOVE_SW_BREAK);
    req.watch_mut().addr = RemotePtr::new(addr);
    req.watch_mut().kind = 1;
    req
}

pub fn req_set_rd_watch(addr: usize, num_bytes: usize) -> GdbRequest {
    let mut req = GdbRequest::new(DREQ_SET_RD_WATCH);
    req.watch_mut().addr = RemotePtr::new(addr);
    req.watch_mut().kind = num_bytes;
    req
}

pub fn req_restart_checkpoint(index: u64) -> GdbRequest {
    let mut req = GdbRequest::new(DREQ_RESTART);
    req.restart_mut().type_ = GdbRestartType::RestartFromCheckpoint;
    req.restart_mut().param = index;
    req.restart_mut().param_str = format!("c{}", index);
    req
}

pub fn req_restart_event(event: FrameTime) -> GdbRequest {
    let mut req = GdbRequest::new(DREQ_RESTART);
    req.restart_mut().type_ = GdbRestartType::RestartFromEvent;
    req.restart_mut().param = event;
    req.restart_mut().param_str = format!("{}", event);
    req
}

pub fn req_set_reg(name: GdbRegister, value: u64) -> GdbRequest {
    let mut req = GdbRequest::new(DREQ_SET_REG);
    let reg = req.reg_mut();
    reg.name = name;
    reg.value = GdbRegisterValueData::Value8(value);
    reg.defined = true;
    reg.size = 8;
    req
}

pub fn req_get_regs() -> GdbRequest {
    GdbRequest::new(DREQ_GET_REGS)
}

pub fn req_get_auxv() -> GdbRequest {
    GdbRequest::new(DREQ_GET_AUXV)
}

pub fn req_detach() -> GdbRequest {
    GdbRequest::new(DREQ_DETACH)
}

pub fn req_interrupt() -> GdbRequest {
    GdbRequest::new(DREQ_INTERRUPT)
}

pub fn req_get_thread_list() -> GdbRequest {
    GdbRequest::new(DREQ_GET_THREAD_LIST)
}

pub fn req_get_current_thread() -> GdbRequest {
    GdbRequest::new(DREQ_GET_CURRENT_THREAD)
}

pub fn req_get_stop_reason() -> GdbRequest {
    GdbRequest::new(DREQ_GET_STOP_REASON)
}

pub fn req_is_thread_alive(tid: libc::pid_t) -> GdbRequest {
    let mut req = GdbRequest::new(DREQ_GET_IS_THREAD_ALIVE);
    req.target = GdbThreadId::new(REC_TID, tid);
    req
}

pub fn req_thread_extra_info(tid: libc::pid_t) -> GdbRequest {
    let mut req = GdbRequest::new(DREQ_GET_THREAD_EXTRA_INFO);
    req.target = GdbThreadId::new(REC_TID, tid);
    req
}

/// The value a get-regs reply carries for `name`, when defined.
pub fn regs_reply_value(reply: &Reply, name: GdbRegister) -> Option<u64> {
    match reply {
        Reply::Regs(file) => file
            .iter()
            .find(|r| r.name == name && r.defined)
            .map(|r| r.value8()),
        _ => None,
    }
}
