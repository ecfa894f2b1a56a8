//! The debug-adapter core: a state machine that mediates every request of a
//! remote debugger client into an effect on the replay timeline, and every
//! replay stop into a client notification.
//!
//! The client believes it is talking to a mutable live process; the replay
//! is immutable. Reconciling the two is the main job here: mutating
//! requests are only honored inside a diversion session forked off the
//! canonical replay, and everything else is answered from replay state.

use crate::{
    breakpoint_condition::BreakpointCondition,
    extra_registers::ExtraRegisters,
    gdb_connection::{
        GdbAuxvPair, GdbConnection, GdbConnectionSharedPtr, GdbRegisterValue,
        GdbRegisterValueData, GdbRequest, GdbRequestType, GdbRestartType, GdbThreadId,
        DREQ_CONT, DREQ_DETACH, DREQ_GET_AUXV, DREQ_GET_CURRENT_THREAD,
        DREQ_GET_IS_THREAD_ALIVE, DREQ_GET_MEM, DREQ_GET_OFFSETS, DREQ_GET_REG, DREQ_GET_REGS,
        DREQ_GET_STOP_REASON, DREQ_GET_THREAD_EXTRA_INFO, DREQ_GET_THREAD_LIST, DREQ_INTERRUPT,
        DREQ_NONE, DREQ_READ_SIGINFO, DREQ_REMOVE_HW_BREAK, DREQ_REMOVE_RDWR_WATCH,
        DREQ_REMOVE_RD_WATCH, DREQ_REMOVE_SW_BREAK, DREQ_REMOVE_WR_WATCH, DREQ_RESTART,
        DREQ_SET_CONTINUE_THREAD, DREQ_SET_HW_BREAK, DREQ_SET_MEM, DREQ_SET_QUERY_THREAD,
        DREQ_SET_RDWR_WATCH, DREQ_SET_RD_WATCH, DREQ_SET_REG, DREQ_SET_SW_BREAK,
        DREQ_SET_WR_WATCH, DREQ_WRITE_SIGINFO,
    },
    gdb_register::{GdbRegister, DREG_EAX, DREG_ORIG_EAX, DREG_ORIG_RAX, DREG_RAX},
    kernel_abi::{word_size, SupportedArch},
    log::{LogDebug, LogError, LogInfo, LogWarn},
    registers::Registers,
    remote_code_ptr::RemoteCodePtr,
    remote_ptr::{RemotePtr, Void},
    replay_timeline::{Mark, ReplayTimeline, RunDirection},
    scoped_fd::{ScopedFd, ScopedFdSharedPtr},
    session::{
        address_space::{BreakpointType, WatchType, BREAKPOINT_INSN},
        task::{Task, TaskSharedPtr},
        BreakStatus, ReplayStatus, RunCommand, SessionSharedPtr, SessionSharedWeakPtr,
    },
    sig,
    sig::Sig,
    taskish_uid::ThreadGroupUid,
    trace_frame::FrameTime,
    util::{open_socket, u8_slice, ProbePort},
};
use libc::pid_t;
use nix::unistd::{getpid, read, write};
use static_assertions::const_assert_eq;
use std::{
    cell::{Ref, RefMut},
    collections::BTreeMap,
    convert::TryInto,
    ffi::OsStr,
    io::{stderr, Write},
    mem,
    os::unix::ffi::OsStrExt,
    path::Path,
    rc::Rc,
};

const LOCALHOST_ADDR: &str = "127.0.0.1";

/// 32-bit writes to this address by the debugger are out-of-band commands
/// for the adapter, not tracee memory traffic. The value (two ASCII 'r's)
/// is baked into the bootstrap script, so it is wire ABI.
const DBG_COMMAND_MAGIC_ADDRESS: usize = 29298;

/// The high-order byte of the 32-bit command word selects the message;
/// not-understood messages fall through to the normal memory path.
const DBG_COMMAND_MSG_MASK: u32 = 0xFF00_0000;
/// Create a checkpoint of the current state whose index is given by the
/// command parameter. An existing checkpoint at that index is released
/// first.
const DBG_COMMAND_MSG_CREATE_CHECKPOINT: u32 = 0x0100_0000;
/// Delete the checkpoint whose index is given by the command parameter.
const DBG_COMMAND_MSG_DELETE_CHECKPOINT: u32 = 0x0200_0000;

const DBG_COMMAND_PARAMETER_MASK: u32 = 0x00FF_FFFF;

/// 64-bit reads from this address return the current trace frame's event
/// number as a signed little-endian word, or -1 outside a replay session.
const DBG_WHEN_MAGIC_ADDRESS: usize = DBG_COMMAND_MAGIC_ADDRESS + 4;

const_assert_eq!(DBG_WHEN_MAGIC_ADDRESS, 29302);

/// The execution position where the adapter first hands control to the
/// client.
#[derive(Default, Clone)]
pub struct Target {
    /// Process to debug, or `None` to just debug the first process.
    pub pid: Option<pid_t>,
    /// If true, wait for the target process to exec() before attaching.
    pub require_exec: bool,
    /// Wait until at least `event` has elapsed before attaching.
    pub event: FrameTime,
}

pub struct ConnectionFlags {
    /// `None` to let the server choose the port, a port number to listen on
    /// exactly that port.
    pub dbg_port: Option<u16>,
    pub dbg_host: String,
    /// If set, the connection parameters are written through this pipe once
    /// the listen socket is bound, and the pipe is closed.
    pub debugger_params_write_pipe: Option<ScopedFdSharedPtr>,
}

impl Default for ConnectionFlags {
    fn default() -> ConnectionFlags {
        ConnectionFlags {
            dbg_port: None,
            dbg_host: LOCALHOST_ADDR.into(),
            debugger_params_write_pipe: None,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq)]
enum ExplicitCheckpoint {
    Explicit,
    NotExplicit,
}

/// A restart point the adapter owns. `Explicit` checkpoints hold timeline
/// resources and must be released exactly once; marks held by the user
/// checkpoint table are never aliased here (each mark has one owner).
#[derive(Clone)]
struct Checkpoint {
    mark: Mark,
    is_explicit: ExplicitCheckpoint,
}

impl Checkpoint {
    fn new(timeline: &mut dyn ReplayTimeline, e: ExplicitCheckpoint) -> Checkpoint {
        let mark = if e == ExplicitCheckpoint::Explicit {
            timeline.add_explicit_checkpoint()
        } else {
            timeline.mark()
        };
        Checkpoint {
            mark,
            is_explicit: e,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq)]
pub enum ReportState {
    ReportNormal,
    /// After end-of-trace the thread list reads as empty even though task
    /// structures may linger.
    ReportThreadsDead,
}

#[derive(Copy, Clone, Eq, PartialEq)]
pub enum ContinueOrStop {
    ContinueDebugging,
    StopDebugging,
}

impl Default for ContinueOrStop {
    fn default() -> Self {
        // Purely arbitrary
        Self::ContinueDebugging
    }
}

pub struct GdbServer {
    target: Target,
    /// None until the client handshake; never changes afterwards.
    dbg: Option<GdbConnectionSharedPtr>,
    /// The thread group being debugged. Fixed once the connection is
    /// established; stops in any other group are never reported to the
    /// client.
    debuggee_tguid: ThreadGroupUid,
    /// True when the user has interrupted replaying to a target event.
    stop_replaying_to_target: bool,
    /// None only in emergency-debug mode.
    timeline: Option<Box<dyn ReplayTimeline>>,
    emergency_debug_session: Option<SessionSharedWeakPtr>,
    debugger_restart_checkpoint: Option<Checkpoint>,
    /// User checkpoints, indexed by the 24-bit id chosen client-side.
    /// Values are explicit marks; removal releases them.
    checkpoints: BTreeMap<u64, Mark>,
}

impl GdbServer {
    /// Create a server that will serve the replay driven by `timeline`.
    pub fn new(timeline: Box<dyn ReplayTimeline>, target: &Target) -> GdbServer {
        GdbServer {
            target: target.clone(),
            dbg: None,
            debuggee_tguid: Default::default(),
            stop_replaying_to_target: false,
            timeline: Some(timeline),
            emergency_debug_session: None,
            debugger_restart_checkpoint: None,
            checkpoints: BTreeMap::new(),
        }
    }

    fn new_from(dbg: GdbConnectionSharedPtr, t: &dyn Task) -> GdbServer {
        GdbServer {
            target: Default::default(),
            dbg: Some(dbg),
            debuggee_tguid: t.tguid(),
            stop_replaying_to_target: false,
            timeline: None,
            emergency_debug_session: Some(t.session()),
            debugger_restart_checkpoint: None,
            checkpoints: BTreeMap::new(),
        }
    }

    fn timeline_is_running(&self) -> bool {
        self.timeline.is_some()
    }

    fn timeline_unwrap(&self) -> &dyn ReplayTimeline {
        self.timeline.as_ref().unwrap().as_ref()
    }

    fn timeline_unwrap_mut(&mut self) -> &mut dyn ReplayTimeline {
        self.timeline.as_mut().unwrap().as_mut()
    }

    fn dbg_unwrap(&self) -> Ref<'_, dyn GdbConnection> {
        self.dbg.as_ref().unwrap().borrow()
    }

    fn dbg_unwrap_mut(&self) -> RefMut<'_, dyn GdbConnection> {
        self.dbg.as_ref().unwrap().borrow_mut()
    }

    fn current_session(&self) -> SessionSharedPtr {
        if let Some(timeline) = &self.timeline {
            timeline.current_session()
        } else {
            self.emergency_debug_session
                .as_ref()
                .unwrap()
                .upgrade()
                .unwrap()
        }
    }

    /// The default init script loaded into the client on launch; implements
    /// the checkpoint/when/restart commands on top of the magic addresses.
    pub fn init_script() -> &'static str {
        include_str!("debugger_script.gdb")
    }

    /// Called from a signal handler during `serve_replay`: interrupt the
    /// replay-to-target phase and start debugging wherever the replay
    /// happens to be.
    pub fn interrupt_replay_to_target(&mut self) {
        self.stop_replaying_to_target = true;
    }

    /// Return the register `which`, which may not have a defined value.
    pub fn get_reg(
        regs: &Registers,
        extra_regs: &ExtraRegisters,
        which: GdbRegister,
    ) -> GdbRegisterValue {
        let mut buf = [0u8; GdbRegisterValue::MAX_SIZE];
        match get_reg_bytes(regs, extra_regs, &mut buf, which) {
            Some(1) => GdbRegisterValue {
                name: which,
                value: GdbRegisterValueData::Value1(buf[0]),
                defined: true,
                size: 1,
            },
            Some(2) => GdbRegisterValue {
                name: which,
                value: GdbRegisterValueData::Value2(u16::from_le_bytes(
                    buf[0..2].try_into().unwrap(),
                )),
                defined: true,
                size: 2,
            },
            Some(4) => GdbRegisterValue {
                name: which,
                value: GdbRegisterValueData::Value4(u32::from_le_bytes(
                    buf[0..4].try_into().unwrap(),
                )),
                defined: true,
                size: 4,
            },
            Some(8) => GdbRegisterValue {
                name: which,
                value: GdbRegisterValueData::Value8(u64::from_le_bytes(
                    buf[0..8].try_into().unwrap(),
                )),
                defined: true,
                size: 8,
            },
            Some(siz) if siz <= GdbRegisterValue::MAX_SIZE => GdbRegisterValue {
                name: which,
                value: GdbRegisterValueData::ValueGeneric(buf),
                defined: true,
                size: siz,
            },
            Some(siz) => fatal!("Unexpected register size {}", siz),
            None => GdbRegisterValue {
                name: which,
                value: GdbRegisterValueData::ValueGeneric(Default::default()),
                defined: false,
                size: 0,
            },
        }
    }

    /// Actually run the server. Returns only when the debugger disconnects.
    pub fn serve_replay(&mut self, flags: &ConnectionFlags, dbg: GdbConnectionSharedPtr) {
        loop {
            let target_event = self.target.event;
            let result = self.timeline_unwrap_mut().replay_step(
                RunCommand::Continue,
                RunDirection::RunForward,
                target_event,
                &mut || false,
            );
            if result.status == ReplayStatus::ReplayExited {
                log!(LogInfo, "Debugger was not launched before end of trace");
                return;
            }
            if self.at_target() {
                break;
            }
        }

        let mut port: u16 = match flags.dbg_port {
            Some(port) => port,
            None => getpid().as_raw() as u16,
        };
        // Don't probe if the user specified a port. Explicit ports come
        // from scripts, which would break if some other port were picked;
        // fail with a clear error instead.
        let probe = match flags.dbg_port {
            Some(_) => ProbePort::DontProbe,
            None => ProbePort::ProbePort,
        };

        let listen_fd: ScopedFd;
        let t_tgid: pid_t;
        {
            let session = self.timeline_unwrap().current_session();
            // We MUST have a current task
            let t = session.current_task().unwrap();
            let exe_image;
            let first_run_event;
            {
                let tb = t.borrow();
                t_tgid = tb.tgid();
                exe_image = tb.vm().exe_image();
                first_run_event = tb.vm().first_run_event();
                self.debuggee_tguid = tb.tguid();
            }
            listen_fd = open_socket(&flags.dbg_host, &mut port, probe);

            if let Some(params_pipe) = &flags.debugger_params_write_pipe {
                write_debugger_params(params_pipe, &exe_image, &flags.dbg_host, port, t_tgid);
                params_pipe.borrow_mut().close();
            } else {
                eprintln!("Launch the debugger with");
                eprint!("  ");
                write_debugger_launch_command(&exe_image, &flags.dbg_host, port, &mut stderr());
            }

            if first_run_event > 0 {
                self.timeline_unwrap_mut()
                    .set_reverse_execution_barrier_event(first_run_event);
            }
        }

        log!(LogDebug, "initializing debugger connection");
        dbg.borrow_mut().await_debugger(&listen_fd, t_tgid);
        self.dbg = Some(dbg);

        self.activate_debugger();

        let mut last_direction = RunDirection::RunForward;
        while self.debug_one_step(&mut last_direction) == ContinueOrStop::ContinueDebugging {
            // The work happens in debug_one_step().
        }

        self.timeline_unwrap_mut()
            .remove_breakpoints_and_watchpoints();
        log!(LogDebug, "debugger server exiting ...");
    }

    /// Start a debugging connection for `t` and serve requests until the
    /// client detaches, without ever driving the timeline. For post-mortem
    /// inspection after hard failures.
    ///
    /// `dbg` should be constructed without reverse-execution support: it
    /// can't work here, and some clients fail when it is advertised unless
    /// async mode is turned off.
    pub fn emergency_debug(t: &TaskSharedPtr, dbg: GdbConnectionSharedPtr) {
        let (vm, tgid, rec_tid) = {
            let tb = t.borrow();
            (tb.vm(), tb.tgid(), tb.rec_tid())
        };
        // We don't know whether `t` overshot an internal breakpoint; cover
        // any such trap up.
        vm.remove_all_breakpoints();

        let mut port: u16 = rec_tid as u16;
        let listen_fd = open_socket(LOCALHOST_ADDR, &mut port, ProbePort::ProbePort);
        eprintln!("Launch the debugger with");
        eprint!("  ");
        write_debugger_launch_command(&vm.exe_image(), LOCALHOST_ADDR, port, &mut stderr());

        dbg.borrow_mut().await_debugger(&listen_fd, tgid);
        let mut server = {
            let tb = t.borrow();
            GdbServer::new_from(dbg, &**tb)
        };
        server.process_debugger_requests(ReportState::ReportNormal);
    }

    /// Write of 4 bytes at the command address: decode and run an adapter
    /// command. Anything else falls through to the normal memory path.
    fn maybe_process_magic_command(&mut self, req: &GdbRequest) -> bool {
        if !(req.mem().addr.as_usize() == DBG_COMMAND_MAGIC_ADDRESS && req.mem().len == 4) {
            return false;
        }
        let cmd = u32::from_le_bytes(req.mem().data[0..4].try_into().unwrap());
        let param = u64::from(cmd & DBG_COMMAND_PARAMETER_MASK);
        match cmd & DBG_COMMAND_MSG_MASK {
            DBG_COMMAND_MSG_CREATE_CHECKPOINT => {
                if self.timeline_is_running() && self.timeline_unwrap().can_add_checkpoint() {
                    // Creating at an existing index replaces it; release the
                    // old mark before the index is rebound.
                    if let Some(old) = self.checkpoints.remove(&param) {
                        self.timeline_unwrap_mut().remove_explicit_checkpoint(&old);
                    }
                    let mark = self.timeline_unwrap_mut().add_explicit_checkpoint();
                    self.checkpoints.insert(param, mark);
                }
            }
            DBG_COMMAND_MSG_DELETE_CHECKPOINT => {
                if let Some(old) = self.checkpoints.remove(&param) {
                    if self.timeline_is_running() {
                        self.timeline_unwrap_mut().remove_explicit_checkpoint(&old);
                    }
                }
            }
            _ => return false,
        }
        self.dbg_unwrap_mut().reply_set_mem(true);
        true
    }

    /// Read of 8 bytes at the when address: reply with the current event
    /// number, or -1 when the session isn't a replay.
    fn maybe_process_magic_read(&self, t: &TaskSharedPtr, req: &GdbRequest) -> bool {
        if !(req.mem().addr.as_usize() == DBG_WHEN_MAGIC_ADDRESS && req.mem().len == 8) {
            return false;
        }
        let when: i64 = match t.borrow().session().upgrade() {
            Some(session) => match session.as_replay() {
                Some(replay) => replay.current_frame_time() as i64,
                None => -1,
            },
            None => -1,
        };
        self.dbg_unwrap_mut().reply_get_mem(&when.to_le_bytes());
        true
    }

    fn dispatch_regs_request(&self, regs: &Registers, extra_regs: &ExtraRegisters) {
        let (first, end) = match regs.arch() {
            SupportedArch::X86 => (DREG_EAX, DREG_ORIG_EAX),
            SupportedArch::X64 => (DREG_RAX, DREG_ORIG_RAX),
        };
        let mut rs: Vec<GdbRegisterValue> = Vec::new();
        let mut r = first;
        loop {
            rs.push(GdbServer::get_reg(regs, extra_regs, r));
            if r == end {
                break;
            }
            r = match r + 1 {
                Ok(next) => next,
                Err(_) => break,
            };
        }
        self.dbg_unwrap_mut().reply_get_regs(&rs);
    }

    /// Process the single debugger request `req` against `session`,
    /// producing exactly one reply. Resume requests never reach here.
    fn dispatch_debugger_request(
        &mut self,
        session: &SessionSharedPtr,
        req: &GdbRequest,
        state: ReportState,
    ) {
        debug_assert!(!req.is_resume_request());
        // These requests don't require a target task.
        match req.type_ {
            DREQ_RESTART => {
                fatal!("Can't handle RESTART request from here");
            }
            DREQ_GET_CURRENT_THREAD => {
                let threadid = session
                    .current_task()
                    .map_or(GdbThreadId::ANY, |t| get_threadid(&**t.borrow()));
                self.dbg_unwrap_mut().reply_get_current_thread(threadid);
                return;
            }
            DREQ_GET_OFFSETS => {
                // Relocation offsets are not tracked; an empty reply makes
                // the client fall back to its own section handling.
                self.dbg_unwrap_mut().reply_get_offsets();
                return;
            }
            DREQ_GET_THREAD_LIST => {
                let mut tids: Vec<GdbThreadId> = Vec::new();
                if state != ReportState::ReportThreadsDead {
                    for t in session.tasks() {
                        tids.push(get_threadid(&**t.borrow()));
                    }
                }
                self.dbg_unwrap_mut().reply_get_thread_list(&tids);
                return;
            }
            DREQ_INTERRUPT => {
                // Tell the debugger we stopped and await further
                // instructions.
                let threadid = session
                    .current_task()
                    .map_or(GdbThreadId::ANY, |t| get_threadid(&**t.borrow()));
                self.dbg_unwrap_mut()
                    .notify_stop(threadid, None, RemotePtr::null());
                return;
            }
            _ => (),
        }

        let maybe_target: Option<TaskSharedPtr> = if req.target.tid > 0 {
            session.find_task_from_rec_tid(req.target.tid)
        } else {
            session.current_task()
        };

        // These requests query or manipulate which task is the target, so
        // it's OK if the task doesn't exist.
        match req.type_ {
            DREQ_GET_IS_THREAD_ALIVE => {
                self.dbg_unwrap_mut()
                    .reply_get_is_thread_alive(maybe_target.is_some());
                return;
            }
            DREQ_GET_THREAD_EXTRA_INFO => {
                let name = maybe_target.as_ref().unwrap().borrow().name();
                self.dbg_unwrap_mut().reply_get_thread_extra_info(&name);
                return;
            }
            DREQ_SET_CONTINUE_THREAD | DREQ_SET_QUERY_THREAD => {
                self.dbg_unwrap_mut()
                    .reply_select_thread(maybe_target.is_some());
                return;
            }
            _ => (),
        }

        // These requests require a valid target task. We don't trust the
        // debugger to only query tasks it was told about.
        let target = match maybe_target {
            Some(t) => t,
            None => {
                self.dbg_unwrap_mut().notify_no_such_thread(req);
                return;
            }
        };

        match req.type_ {
            DREQ_GET_AUXV => {
                let auxv = read_auxv(&**target.borrow());
                self.dbg_unwrap_mut().reply_get_auxv(&auxv);
            }
            DREQ_GET_MEM => {
                if self.maybe_process_magic_read(&target, req) {
                    return;
                }
                let mut mem: Vec<u8> = vec![0u8; req.mem().len];
                let nread = target.borrow_mut().read_bytes_fallible(req.mem().addr, &mut mem);
                mem.truncate(nread.unwrap_or(0));
                // The client must see the program's own bytes, not our
                // planted trap instructions.
                let vm = target.borrow().vm();
                vm.replace_breakpoints_with_original_values(&mut mem, req.mem().addr);
                self.dbg_unwrap_mut().reply_get_mem(&mem);
            }
            DREQ_SET_MEM => {
                // The client sends length-0 writes as fences at odd times
                // (e.g. before the magic checkpoint write).
                if req.mem().len == 0 {
                    self.dbg_unwrap_mut().reply_set_mem(true);
                    return;
                }
                if self.maybe_process_magic_command(req) {
                    return;
                }
                // Arbitrary writes to the canonical replay would cause
                // divergence; only a diversion may be written.
                if !session.is_diversion() {
                    log!(LogError, "Attempt to write memory outside diversion session");
                    self.dbg_unwrap_mut().reply_set_mem(false);
                    return;
                }
                log!(
                    LogDebug,
                    "Writing {} bytes to {}",
                    req.mem().len,
                    req.mem().addr
                );
                target.borrow_mut().write_bytes(req.mem().addr, &req.mem().data);
                self.dbg_unwrap_mut().reply_set_mem(true);
            }
            DREQ_GET_REG => {
                let reg;
                {
                    let tb = target.borrow();
                    reg = GdbServer::get_reg(tb.regs_ref(), tb.extra_regs_ref(), req.reg().name);
                }
                self.dbg_unwrap_mut().reply_get_reg(&reg);
            }
            DREQ_GET_REGS => {
                let regs;
                let extra_regs;
                {
                    let tb = target.borrow();
                    regs = tb.regs_ref().clone();
                    extra_regs = tb.extra_regs_ref().clone();
                }
                self.dispatch_regs_request(&regs, &extra_regs);
            }
            DREQ_SET_REG => {
                if !session.is_diversion() {
                    // The client sets the original-syscall register to -1
                    // during a restart. We might be restarting from a
                    // checkpoint inside a syscall, and must not tamper with
                    // replay state, so just acknowledge and ignore it.
                    let arch = target.borrow().arch();
                    if (arch == SupportedArch::X86 && req.reg().name == DREG_ORIG_EAX)
                        || (arch == SupportedArch::X64 && req.reg().name == DREG_ORIG_RAX)
                    {
                        self.dbg_unwrap_mut().reply_set_reg(true);
                        return;
                    }
                    log!(
                        LogError,
                        "Attempt to write register outside diversion session"
                    );
                    self.dbg_unwrap_mut().reply_set_reg(false);
                    return;
                }
                if req.reg().defined {
                    let mut regs = target.borrow().regs_ref().clone();
                    regs.write_register(&req.reg().value(), req.reg().name);
                    target.borrow_mut().set_regs(&regs);
                }
                self.dbg_unwrap_mut()
                    .reply_set_reg(true /* currently infallible */);
            }
            DREQ_GET_STOP_REASON => {
                let threadid;
                let maybe_sig;
                {
                    let tb = target.borrow();
                    threadid = get_threadid(&**tb);
                    maybe_sig = tb.stop_sig();
                }
                self.dbg_unwrap_mut().reply_get_stop_reason(threadid, maybe_sig);
            }
            DREQ_SET_SW_BREAK => {
                {
                    let tb = target.borrow();
                    ed_assert_eq!(
                        &**tb,
                        req.watch().kind,
                        mem::size_of_val(&BREAKPOINT_INSN),
                        "Debugger setting bad breakpoint insn"
                    );
                }
                let addr = RemoteCodePtr::from(req.watch().addr);
                let ok = if self.timeline_is_running() {
                    let replay_task = self
                        .timeline_unwrap()
                        .current_session()
                        .find_task_from_task_uid(target.borrow().tuid())
                        .unwrap();
                    let ok = self.timeline_unwrap_mut().add_breakpoint(
                        &replay_task,
                        addr,
                        breakpoint_condition(req),
                    );
                    // Mirror into the diversion's own trap table so the
                    // planted breakpoint is honored while it runs.
                    if ok && session.is_diversion() {
                        let diversion_ok =
                            target.borrow().vm().add_breakpoint(addr, BreakpointType::User);
                        let tb = target.borrow();
                        ed_assert!(&**tb, diversion_ok);
                    }
                    ok
                } else {
                    // Emergency session: no timeline to manage, plant the
                    // trap straight into the task.
                    target.borrow().vm().add_breakpoint(addr, BreakpointType::User)
                };
                self.dbg_unwrap_mut().reply_watchpoint_request(ok);
            }
            DREQ_SET_HW_BREAK | DREQ_SET_RD_WATCH | DREQ_SET_WR_WATCH | DREQ_SET_RDWR_WATCH => {
                let ok = if self.timeline_is_running() {
                    let replay_task = self
                        .timeline_unwrap()
                        .current_session()
                        .find_task_from_task_uid(target.borrow().tuid())
                        .unwrap();
                    let ok = self.timeline_unwrap_mut().add_watchpoint(
                        &replay_task,
                        req.watch().addr,
                        req.watch().kind,
                        watchpoint_type(req.type_),
                        breakpoint_condition(req),
                    );
                    if ok && session.is_diversion() {
                        let diversion_ok = target.borrow().vm().add_watchpoint(
                            req.watch().addr,
                            req.watch().kind,
                            watchpoint_type(req.type_),
                        );
                        let tb = target.borrow();
                        ed_assert!(&**tb, diversion_ok);
                    }
                    ok
                } else {
                    target.borrow().vm().add_watchpoint(
                        req.watch().addr,
                        req.watch().kind,
                        watchpoint_type(req.type_),
                    )
                };
                self.dbg_unwrap_mut().reply_watchpoint_request(ok);
            }
            DREQ_REMOVE_SW_BREAK => {
                let addr = RemoteCodePtr::from(req.watch().addr);
                if self.timeline_is_running() {
                    let replay_task = self
                        .timeline_unwrap()
                        .current_session()
                        .find_task_from_task_uid(target.borrow().tuid())
                        .unwrap();
                    self.timeline_unwrap_mut().remove_breakpoint(&replay_task, addr);
                    if session.is_diversion() {
                        target
                            .borrow()
                            .vm()
                            .remove_breakpoint(addr, BreakpointType::User);
                    }
                } else {
                    target
                        .borrow()
                        .vm()
                        .remove_breakpoint(addr, BreakpointType::User);
                }
                self.dbg_unwrap_mut().reply_watchpoint_request(true);
            }
            DREQ_REMOVE_HW_BREAK | DREQ_REMOVE_RD_WATCH | DREQ_REMOVE_WR_WATCH
            | DREQ_REMOVE_RDWR_WATCH => {
                if self.timeline_is_running() {
                    let replay_task = self
                        .timeline_unwrap()
                        .current_session()
                        .find_task_from_task_uid(target.borrow().tuid())
                        .unwrap();
                    self.timeline_unwrap_mut().remove_watchpoint(
                        &replay_task,
                        req.watch().addr,
                        req.watch().kind,
                        watchpoint_type(req.type_),
                    );
                    if session.is_diversion() {
                        target.borrow().vm().remove_watchpoint(
                            req.watch().addr,
                            req.watch().kind,
                            watchpoint_type(req.type_),
                        );
                    }
                } else {
                    target.borrow().vm().remove_watchpoint(
                        req.watch().addr,
                        req.watch().kind,
                        watchpoint_type(req.type_),
                    );
                }
                self.dbg_unwrap_mut().reply_watchpoint_request(true);
            }
            DREQ_READ_SIGINFO => {
                log!(LogWarn, "READ_SIGINFO request outside of diversion session");
                self.dbg_unwrap_mut().reply_read_siginfo(&[]);
            }
            DREQ_WRITE_SIGINFO => {
                log!(LogWarn, "WRITE_SIGINFO request outside of diversion session");
                self.dbg_unwrap_mut().reply_write_siginfo();
            }
            _ => fatal!("Unknown debugger request {:?}", req.type_),
        }
    }

    fn at_target(&self) -> bool {
        // Don't launch the debugger for the replayer's initial fork child.
        // No one ever wants that to happen.
        let session = self.timeline_unwrap().current_session();
        let replay = match session.as_replay() {
            Some(replay) => replay,
            None => return false,
        };
        if !replay.done_initial_exec() {
            return false;
        }
        let t = match session.current_task() {
            Some(t) => t,
            None => return false,
        };
        if !self.timeline_unwrap().can_add_checkpoint() {
            return false;
        }
        if self.stop_replaying_to_target {
            return true;
        }
        // Activation may create a checkpoint, which must retain the state
        // from *before* the next frame is replayed. So the decision is made
        // on the frame we're about to replay, without consuming it.
        //
        // NB: we'll happily attach to whichever task within the group
        // happens to be scheduled here; "attach to process" doesn't mean
        // "attach to thread-group leader".
        let tb = t.borrow();
        replay.current_frame_time() + 1 > self.target.event
            && (self.target.pid.is_none() || Some(tb.tgid()) == self.target.pid)
            && (!self.target.require_exec || tb.execed())
    }

    /// The trace has reached the event the user wants to debug from; set up
    /// the state the debugging loop needs.
    fn activate_debugger(&mut self) {
        let event_now;
        let tgid;
        {
            let session = self.timeline_unwrap().current_session();
            event_now = session.as_replay().unwrap().current_frame_time();
            // We MUST have a task
            let t = session.current_task().unwrap();
            tgid = t.borrow().tgid();
        }
        if self.target.event > 0 || self.target.pid.is_some() {
            if self.stop_replaying_to_target {
                eprint!(
                    "\n\
                     --------------------------------------------------\n\
                     ---> Interrupted; attached to NON-TARGET process {} at event {}.\n\
                     --------------------------------------------------\n",
                    tgid, event_now
                );
            } else {
                eprint!(
                    "\n\
                     --------------------------------------------------\n\
                     ---> Reached target process {} at event {}.\n\
                     --------------------------------------------------\n",
                    tgid, event_now
                );
            }
        }

        // Store the current tgid and event as the execution target for the
        // next replay session, so a restart can detect having reached this
        // point without replaying all the way here.
        self.target.pid = Some(tgid);
        self.target.require_exec = false;
        self.target.event = event_now;

        // Re-activation (restart-from-event) abandons the previous restart
        // point; its checkpoint must be released, not leaked.
        if let Some(old) = self.debugger_restart_checkpoint.take() {
            if old.is_explicit == ExplicitCheckpoint::Explicit {
                self.timeline_unwrap_mut()
                    .remove_explicit_checkpoint(&old.mark);
            }
        }

        let e = if self.timeline_unwrap().can_add_checkpoint() {
            ExplicitCheckpoint::Explicit
        } else {
            ExplicitCheckpoint::NotExplicit
        };
        let checkpoint = Checkpoint::new(self.timeline_unwrap_mut(), e);
        self.debugger_restart_checkpoint = Some(checkpoint);
    }

    fn restart_session(&mut self, req: &GdbRequest) {
        debug_assert_eq!(req.type_, DREQ_RESTART);
        debug_assert!(self.dbg.is_some());

        self.timeline_unwrap_mut()
            .remove_breakpoints_and_watchpoints();

        let mut maybe_mark_to_restore = None;
        if req.restart().type_ == GdbRestartType::RestartFromCheckpoint {
            match self.checkpoints.get(&req.restart().param) {
                None => {
                    println!("Checkpoint {} not found.", req.restart().param_str);
                    println!("Valid checkpoints:");
                    for &i in self.checkpoints.keys() {
                        println!(" {}", i);
                    }
                    println!();
                    self.dbg_unwrap_mut().notify_restart_failed();
                    return;
                }
                Some(mark) => {
                    maybe_mark_to_restore = Some(mark.clone());
                }
            }
        } else if req.restart().type_ == GdbRestartType::RestartFromPrevious {
            maybe_mark_to_restore = self
                .debugger_restart_checkpoint
                .as_ref()
                .map(|c| c.mark.clone());
        }

        if let Some(mark) = maybe_mark_to_restore {
            self.timeline_unwrap_mut().seek_to_mark(&mark);
            // Release the old restart point and re-anchor here. A fresh
            // explicit checkpoint is taken when possible; the user
            // checkpoint table keeps sole ownership of its own marks.
            if let Some(old) = self.debugger_restart_checkpoint.take() {
                if old.is_explicit == ExplicitCheckpoint::Explicit {
                    self.timeline_unwrap_mut()
                        .remove_explicit_checkpoint(&old.mark);
                }
            }
            let checkpoint = if self.timeline_unwrap().can_add_checkpoint() {
                Checkpoint::new(self.timeline_unwrap_mut(), ExplicitCheckpoint::Explicit)
            } else {
                Checkpoint {
                    mark,
                    is_explicit: ExplicitCheckpoint::NotExplicit,
                }
            };
            self.debugger_restart_checkpoint = Some(checkpoint);
            return;
        }

        self.stop_replaying_to_target = false;

        debug_assert_eq!(req.restart().type_, GdbRestartType::RestartFromEvent);
        // The target pid is deliberately kept: we keep targeting the same
        // process no matter what is running when we hit the event.
        self.target.event = req.restart().param;
        let target_event = self.target.event;
        self.timeline_unwrap_mut()
            .seek_to_before_event(target_event);
        loop {
            let result = self.timeline_unwrap_mut().replay_step(
                RunCommand::Continue,
                RunDirection::RunForward,
                target_event,
                &mut || false,
            );
            if result.status == ReplayStatus::ReplayExited {
                log!(LogInfo, "Event was not reached before end of trace");
                self.timeline_unwrap_mut()
                    .seek_to_before_event(target_event);
                break;
            }
            if is_last_thread_exit(&result.break_status)
                && Some(result.break_status.task_unwrap().borrow().tgid()) == self.target.pid
            {
                // Debuggee task is about to exit. Stop here.
                break;
            }
            if self.at_target() {
                break;
            }
        }
        self.activate_debugger();
    }

    /// Reply to debugger requests until the client asks to resume
    /// execution, restart, or detach; that request is returned.
    fn process_debugger_requests(&mut self, state: ReportState) -> GdbRequest {
        loop {
            let mut req = self.dbg_unwrap_mut().get_request();
            req.suppress_debugger_stop = false;
            self.try_lazy_reverse_singlesteps(&mut req);

            if req.type_ == DREQ_READ_SIGINFO && self.timeline_is_running() {
                // A dummy siginfo of the requested length makes the client
                // treat the read as successful. Without it the client
                // assumes failure, never sends WRITE_SIGINFO, and we can't
                // tell when its inferior-call dialog ends.
                let si_bytes = vec![0u8; req.mem().len];
                self.dbg_unwrap_mut().reply_read_siginfo(&si_bytes);

                // READ_SIGINFO usually begins an inferior call; run it in a
                // sandbox so its side effects never touch the replay.
                req = self.divert();
                if req.type_ == DREQ_NONE {
                    continue;
                }
                // Carry on to process the request the diversion rejected.
            }

            if req.is_resume_request() {
                return req;
            }

            if req.type_ == DREQ_RESTART {
                log!(LogDebug, "  request to restart at event {}", req.restart().param);
                return req;
            }
            if req.type_ == DREQ_DETACH {
                log!(LogDebug, "  debugger detached");
                self.dbg_unwrap_mut().reply_detach();
                return req;
            }

            let session = self.current_session();
            self.dispatch_debugger_request(&session, &req, state);
        }
    }

    /// If `req` is a reverse-singlestep, try to satisfy it straight from
    /// the timeline's mark cache: report the singlestep stop, then answer
    /// register reads from the stored mark, with no actual seeking. Repeat
    /// until a request arrives that isn't reverse-singlestep or
    /// get-registers, leaving it in `req`.
    ///
    /// Clients issue long runs of reverse-singlestep/get-registers pairs
    /// during reverse-next; this makes those runs cheap.
    fn try_lazy_reverse_singlesteps(&mut self, req: &mut GdbRequest) {
        if !self.timeline_is_running() {
            return;
        }

        let mut maybe_now: Option<Mark> = None;
        let mut need_seek = false;
        loop {
            let t = match self.timeline_unwrap().current_session().current_task() {
                Some(t) => t,
                None => break,
            };
            let wants_lazy = req.type_ == DREQ_CONT
                && req.cont().run_direction == RunDirection::RunBackward
                && req.cont().actions.len() == 1
                && req.cont().actions[0].type_ == crate::gdb_connection::GdbActionType::ActionStep
                && req.cont().actions[0].maybe_signal_to_deliver.is_none()
                && {
                    let tb = t.borrow();
                    matches_threadid(&**tb, req.cont().actions[0].target)
                }
                && !req.suppress_debugger_stop;
            if !wants_lazy {
                break;
            }

            if maybe_now.is_none() {
                maybe_now = Some(self.timeline_unwrap_mut().mark());
            }
            let previous = self
                .timeline_unwrap_mut()
                .lazy_reverse_singlestep(maybe_now.as_ref().unwrap(), &t);
            let previous = match previous {
                Some(previous) => previous,
                None => break,
            };

            maybe_now = Some(previous);
            need_seek = true;
            let mut break_status = BreakStatus::new();
            break_status.task = Rc::downgrade(&t);
            break_status.singlestep_complete = true;
            log!(LogDebug, "  using lazy reverse-singlestep");
            self.maybe_notify_stop(&break_status);

            loop {
                *req = self.dbg_unwrap_mut().get_request();
                req.suppress_debugger_stop = false;
                if req.type_ != DREQ_GET_REGS {
                    break;
                }
                log!(LogDebug, "  using lazy reverse-singlestep registers");
                let now = maybe_now.as_ref().unwrap().clone();
                self.dispatch_regs_request(now.regs(), now.extra_regs());
            }
        }

        if need_seek {
            let now = maybe_now.unwrap();
            self.timeline_unwrap_mut().seek_to_mark(&now);
        }
    }

    /// Process debugger requests in the diversion until the caller must
    /// act (a resume request with the diversion still referenced). Returns
    /// false when the diversion should end.
    fn diverter_process_debugger_requests(
        &mut self,
        diversion_session: &SessionSharedPtr,
        diversion_refcount: &mut usize,
        req: &mut GdbRequest,
    ) -> bool {
        loop {
            *req = self.dbg_unwrap_mut().get_request();

            if req.is_resume_request() {
                return *diversion_refcount > 0;
            }

            match req.type_ {
                DREQ_RESTART | DREQ_DETACH => {
                    *diversion_refcount = 0;
                    return false;
                }
                DREQ_READ_SIGINFO => {
                    log!(LogDebug, "Adding ref to diversion session");
                    *diversion_refcount += 1;
                    let si_bytes = vec![0u8; req.mem().len];
                    self.dbg_unwrap_mut().reply_read_siginfo(&si_bytes);
                    continue;
                }
                DREQ_WRITE_SIGINFO => {
                    log!(LogDebug, "Removing reference to diversion session ...");
                    debug_assert!(*diversion_refcount > 0);
                    *diversion_refcount -= 1;
                    if *diversion_refcount == 0 {
                        log!(LogDebug, "  ... dying at next continue request");
                    }
                    self.dbg_unwrap_mut().reply_write_siginfo();
                    continue;
                }
                _ => (),
            }

            self.dispatch_debugger_request(diversion_session, req, ReportState::ReportNormal);
        }
    }

    /// Fork a diversion off the current replay state and run the client's
    /// mutating dialog in it. The replay session isn't perturbed. Returns
    /// the first request the diversion didn't handle; the canonical session
    /// processes it next.
    fn divert(&mut self) -> GdbRequest {
        // Apply pending breakpoint/watchpoint state before forking so the
        // diversion inherits a consistent view of the trap tables.
        self.timeline_unwrap_mut().apply_breakpoints_and_watchpoints();

        let diversion_session: SessionSharedPtr = {
            let session = self.timeline_unwrap().current_session();
            log!(
                LogDebug,
                "Starting debugging diversion for session {}",
                session.unique_id()
            );
            session.as_replay().unwrap().clone_diversion()
        };
        let mut diversion_refcount: usize = 1;
        let mut req = GdbRequest::default();

        while self.diverter_process_debugger_requests(
            &diversion_session,
            &mut diversion_refcount,
            &mut req,
        ) {
            debug_assert!(req.is_resume_request());

            if req.cont().run_direction == RunDirection::RunBackward {
                // Reverse execution is unsupported in a diversion. Just
                // issue an immediate stop.
                let threadid = diversion_session
                    .current_task()
                    .map_or(GdbThreadId::ANY, |t| get_threadid(&**t.borrow()));
                self.dbg_unwrap_mut()
                    .notify_stop(threadid, Some(sig::SIGTRAP), RemotePtr::null());
                continue;
            }

            let t = match diversion_session.current_task() {
                Some(t) => t,
                None => {
                    diversion_refcount = 0;
                    req = GdbRequest::new(DREQ_NONE);
                    break;
                }
            };
            let mut maybe_signal_to_deliver = None;
            let command = {
                let tb = t.borrow();
                compute_run_command_from_actions(&**tb, &req, &mut maybe_signal_to_deliver)
            };
            let result = diversion_session.as_diversion().unwrap().diversion_step(
                &t,
                command,
                maybe_signal_to_deliver,
            );

            if result.status == crate::session::DiversionStatus::DiversionExited {
                diversion_refcount = 0;
                req = GdbRequest::new(DREQ_NONE);
                break;
            }
            debug_assert_eq!(result.status, crate::session::DiversionStatus::DiversionContinue);

            self.maybe_notify_stop(&result.break_status);
        }

        log!(LogDebug, "... ending debugging diversion");
        debug_assert_eq!(diversion_refcount, 0);

        diversion_session.kill_all_tasks();
        req
    }

    fn detach_or_restart(&mut self, req: &GdbRequest, s: &mut ContinueOrStop) -> bool {
        if req.type_ == DREQ_RESTART {
            self.restart_session(req);
            *s = ContinueOrStop::ContinueDebugging;
            true
        } else if req.type_ == DREQ_DETACH {
            *s = ContinueOrStop::StopDebugging;
            true
        } else {
            false
        }
    }

    fn handle_exited_state(&mut self) -> ContinueOrStop {
        // TODO forward the debuggee's real exit code once the replay engine
        // reports it through ReplayResult.
        self.dbg_unwrap_mut().notify_exit_code(0);
        let req = self.process_debugger_requests(ReportState::ReportThreadsDead);
        let mut s = ContinueOrStop::default();
        if self.detach_or_restart(&req, &mut s) {
            return s;
        }
        fatal!("Received continue request after end-of-trace.")
    }

    fn debug_one_step(&mut self, last_direction: &mut RunDirection) -> ContinueOrStop {
        let mut result;
        {
            let session = self.timeline_unwrap().current_session();
            let outside_debuggee = match session.current_task() {
                None => true,
                Some(t) => t.borrow().tguid() != self.debuggee_tguid,
            };
            if outside_debuggee {
                // No client interaction until the debuggee is scheduled
                // again; just keep the replay moving in the last direction.
                let stop_at = if *last_direction == RunDirection::RunForward {
                    self.target.event
                } else {
                    0
                };
                result = self.timeline_unwrap_mut().replay_step(
                    RunCommand::Continue,
                    *last_direction,
                    stop_at,
                    &mut || false,
                );
                if result.status == ReplayStatus::ReplayExited {
                    return self.handle_exited_state();
                }
                return ContinueOrStop::ContinueDebugging;
            }
        }

        let mut req = self.process_debugger_requests(ReportState::ReportNormal);
        loop {
            let mut s = ContinueOrStop::default();
            if self.detach_or_restart(&req, &mut s) {
                *last_direction = RunDirection::RunForward;
                return s;
            }
            debug_assert!(req.is_resume_request());

            let mut maybe_signal_to_deliver = None;
            let command = {
                let t = self
                    .timeline_unwrap()
                    .current_session()
                    .current_task()
                    .unwrap();
                let tb = t.borrow();
                compute_run_command_from_actions(&**tb, &req, &mut maybe_signal_to_deliver)
            };
            // The client's signal_to_deliver is ignored; we just have to
            // follow the replay.

            *last_direction = req.cont().run_direction;
            let stop_at = if *last_direction == RunDirection::RunForward {
                self.target.event
            } else {
                0
            };
            let dbg = self.dbg.as_ref().unwrap().clone();
            let mut interrupt_check = || dbg.borrow_mut().sniff_packet();
            result = self.timeline_unwrap_mut().replay_step(
                command,
                *last_direction,
                stop_at,
                &mut interrupt_check,
            );

            if result.status == ReplayStatus::ReplayExited {
                return self.handle_exited_state();
            }
            if req.cont().run_direction == RunDirection::RunBackward
                && result.break_status.task_exit
            {
                // We reached the start of the debuggee task group going
                // backwards; a stop must still be reported, so rewrite the
                // exit as a breakpoint hit or completed singlestep.
                result.break_status.task_exit = false;
                if command == RunCommand::Singlestep {
                    result.break_status.singlestep_complete = true;
                } else {
                    result.break_status.breakpoint_hit = true;
                }
            }
            if !req.suppress_debugger_stop {
                self.maybe_notify_stop(&result.break_status);
            }
            if req.cont().run_direction == RunDirection::RunForward
                && is_last_thread_exit(&result.break_status)
                && result.break_status.task_unwrap().borrow().tguid() == self.debuggee_tguid
            {
                // The last thread is about to exit; treat like termination.
                req = self.process_debugger_requests(ReportState::ReportNormal);
                if req.is_resume_request() && req.cont().run_direction == RunDirection::RunForward
                {
                    return self.handle_exited_state();
                }
                // Otherwise (detach, restart or reverse-exec) process the
                // request as normal.
                continue;
            }
            return ContinueOrStop::ContinueDebugging;
        }
    }

    /// If `break_status` describes a stop the client should hear about,
    /// notify it. Policy is layered: watchpoints, then breakpoints and
    /// singlesteps, then delivered signals, then debuggee termination.
    fn maybe_notify_stop(&mut self, break_status: &BreakStatus) {
        let mut do_stop = false;
        let mut maybe_sig: Option<Sig> = None;
        let mut watch_addr: RemotePtr<Void> = RemotePtr::null();
        if !break_status.watchpoints_hit.is_empty() {
            do_stop = true;
            maybe_sig = Some(sig::SIGTRAP);
            watch_addr = break_status.watchpoints_hit[0].addr;
            log!(LogDebug, "Stopping for watchpoint at {}", watch_addr);
        }
        if break_status.breakpoint_hit || break_status.singlestep_complete {
            do_stop = true;
            maybe_sig = Some(sig::SIGTRAP);
            if break_status.breakpoint_hit {
                log!(LogDebug, "Stopping for breakpoint");
            } else {
                log!(LogDebug, "Stopping for singlestep");
            }
        }
        if let Some(s) = break_status.signal {
            do_stop = true;
            maybe_sig = Some(s);
            log!(LogDebug, "Stopping for signal {}", s);
        }
        if is_last_thread_exit(break_status) && self.dbg_unwrap().features().reverse_execution {
            // The exit of the last task in a thread group is reported as a
            // synthetic SIGKILL when reverse execution is available; users
            // commonly want to run backwards from the end.
            do_stop = true;
            maybe_sig = Some(sig::SIGKILL);
            log!(LogDebug, "Stopping for synthetic SIGKILL");
        }
        if !do_stop {
            return;
        }
        if let Some(t) = break_status.task.upgrade() {
            let tb = t.borrow();
            // Only stops in the debuggee task group are the client's
            // business.
            if tb.tguid() == self.debuggee_tguid {
                let threadid = get_threadid(&**tb);
                drop(tb);
                self.dbg_unwrap_mut().notify_stop(threadid, maybe_sig, watch_addr);
            }
        }
    }
}

fn get_reg_bytes(
    regs: &Registers,
    extra_regs: &ExtraRegisters,
    buf: &mut [u8],
    regname: GdbRegister,
) -> Option<usize> {
    regs.read_register(buf, regname)
        .or_else(|| extra_regs.read_register(buf, regname))
}

fn get_threadid(t: &dyn Task) -> GdbThreadId {
    GdbThreadId::new(t.tgid(), t.rec_tid())
}

fn matches_threadid(t: &dyn Task, target: GdbThreadId) -> bool {
    (target.pid <= 0 || target.pid == t.tgid()) && (target.tid <= 0 || target.tid == t.rec_tid())
}

fn watchpoint_type(req: GdbRequestType) -> WatchType {
    match req {
        DREQ_SET_HW_BREAK | DREQ_REMOVE_HW_BREAK => WatchType::Exec,
        DREQ_SET_WR_WATCH | DREQ_REMOVE_WR_WATCH => WatchType::Write,
        // x86 can't express read-only watchpoints, so read watches widen to
        // read-write and the client sorts out which accesses it cares
        // about.
        DREQ_REMOVE_RDWR_WATCH | DREQ_SET_RDWR_WATCH | DREQ_REMOVE_RD_WATCH
        | DREQ_SET_RD_WATCH => WatchType::ReadWrite,
        _ => fatal!("Unknown dbg request {:?}", req),
    }
}

fn is_last_thread_exit(break_status: &BreakStatus) -> bool {
    break_status.task_exit
        && break_status
            .task
            .upgrade()
            .map_or(false, |t| t.borrow().thread_group_size() == 1)
}

fn breakpoint_condition(request: &GdbRequest) -> Option<BreakpointCondition> {
    if request.watch().conditions.is_empty() {
        return None;
    }
    Some(BreakpointCondition::new(&request.watch().conditions))
}

fn compute_run_command_from_actions(
    t: &dyn Task,
    req: &GdbRequest,
    maybe_signal_to_deliver: &mut Option<Sig>,
) -> RunCommand {
    for action in &req.cont().actions {
        if matches_threadid(t, action.target) {
            // Only `t` can run; neither replay nor diversion sessions
            // advance multiple threads, no matter what the client asked.
            *maybe_signal_to_deliver = action.maybe_signal_to_deliver;
            return if action.type_ == crate::gdb_connection::GdbActionType::ActionStep {
                RunCommand::Singlestep
            } else {
                RunCommand::Continue
            };
        }
    }
    // The client told us to run some thread that isn't `t`, without
    // resuming `t`. It does this even when its chosen thread is blocked in
    // a syscall and `t` must run first; let `t` run anyway.
    *maybe_signal_to_deliver = None;
    RunCommand::Continue
}

/// The auxv read is capped at 4096 entries; a real process never has more,
/// and extras would be silently dropped.
const AUXV_MAX_ENTRIES: usize = 4096;

fn read_auxv(t: &dyn Task) -> Vec<GdbAuxvPair> {
    let mut result = Vec::new();
    let filename = format!("/proc/{}/auxv", t.real_tgid());
    let fd = match ScopedFd::open_from_path(Path::new(&filename), nix::fcntl::OFlag::O_RDONLY) {
        Ok(fd) => fd,
        Err(_) => return result,
    };
    let word = word_size(t.arch());
    let entry_size = 2 * word;
    let mut buf = vec![0u8; AUXV_MAX_ENTRIES * entry_size];
    let nread = match read(fd.as_raw(), &mut buf) {
        Ok(nread) => nread,
        Err(_) => return result,
    };
    for chunk in buf[..nread - nread % entry_size].chunks_exact(entry_size) {
        result.push(GdbAuxvPair {
            key: word_from_le(&chunk[..word]),
            value: word_from_le(&chunk[word..]),
        });
    }
    result
}

fn word_from_le(bytes: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(word)
}

#[repr(C)]
struct DebuggerParams {
    exe_image: [u8; libc::PATH_MAX as usize],
    /// INET_ADDRSTRLEN
    host: [u8; 16],
    port: u16,
    tgid: pid_t,
}

impl Default for DebuggerParams {
    fn default() -> Self {
        unsafe { mem::zeroed() }
    }
}

fn write_debugger_params(
    pipe: &ScopedFdSharedPtr,
    exe_image: &OsStr,
    host: &str,
    port: u16,
    tgid: pid_t,
) {
    let mut params = DebuggerParams::default();
    let image_bytes = exe_image.as_bytes();
    assert!(image_bytes.len() < params.exe_image.len());
    params.exe_image[..image_bytes.len()].copy_from_slice(image_bytes);
    assert!(host.len() < params.host.len());
    params.host[..host.len()].copy_from_slice(host.as_bytes());
    params.port = port;
    params.tgid = tgid;
    let nwritten = write(pipe.borrow().as_raw(), u8_slice(&params)).unwrap();
    debug_assert_eq!(nwritten, mem::size_of_val(&params));
}

fn write_debugger_launch_command(
    exe_image: &OsStr,
    dbg_host: &str,
    port: u16,
    out: &mut dyn Write,
) {
    // The remote-reply timeout is disabled (-l): reaching a restart target
    // can take unbounded time, and a timed-out vRun wedges the session.
    // The sysroot is pinned so the client doesn't fetch binaries over the
    // remote file protocol, which is slow and resolves trace symlinks
    // badly.
    let mut cmd: Vec<u8> = Vec::new();
    write!(cmd, "gdb -l 10000 -ex 'set sysroot /' -ex 'target extended-remote {}:{}' ", dbg_host, port)
        .unwrap();
    cmd.extend_from_slice(exe_image.as_bytes());
    cmd.push(b'\n');
    out.write_all(&cmd).unwrap();
}
