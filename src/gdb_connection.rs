use crate::{
    gdb_register::GdbRegister,
    registers::MAX_REG_SIZE_BYTES,
    remote_ptr::{RemotePtr, Void},
    replay_timeline::RunDirection,
    scoped_fd::ScopedFd,
    sig::Sig,
    trace_frame::FrameTime,
};
use libc::pid_t;
use std::{cell::RefCell, ffi::OsStr, rc::Rc};

/// Represents a possibly-undefined register `name`. `size` indicates how
/// many bytes of `value` are valid, if any.
#[derive(Clone, Debug)]
pub struct GdbRegisterValue {
    pub name: GdbRegister,
    pub value: GdbRegisterValueData,
    pub defined: bool,
    pub size: usize,
}

#[derive(Clone, Debug)]
pub enum GdbRegisterValueData {
    ValueGeneric([u8; GdbRegisterValue::MAX_SIZE]),
    Value1(u8),
    Value2(u16),
    Value4(u32),
    Value8(u64),
}

impl GdbRegisterValue {
    pub const MAX_SIZE: usize = MAX_REG_SIZE_BYTES;

    pub fn value1(&self) -> u8 {
        match self.value {
            GdbRegisterValueData::Value1(v) => v,
            _ => panic!("Unexpected GdbRegisterValue: {:?}", self),
        }
    }

    pub fn value2(&self) -> u16 {
        match self.value {
            GdbRegisterValueData::Value2(v) => v,
            _ => panic!("Unexpected GdbRegisterValue: {:?}", self),
        }
    }

    pub fn value4(&self) -> u32 {
        match self.value {
            GdbRegisterValueData::Value4(v) => v,
            _ => panic!("Unexpected GdbRegisterValue: {:?}", self),
        }
    }

    pub fn value8(&self) -> u64 {
        match self.value {
            GdbRegisterValueData::Value8(v) => v,
            _ => panic!("Unexpected GdbRegisterValue: {:?}", self),
        }
    }

    /// The register contents as little-endian bytes, `size` of them.
    pub fn value(&self) -> Vec<u8> {
        match self.value {
            GdbRegisterValueData::ValueGeneric(v) => v[0..self.size].to_owned(),
            GdbRegisterValueData::Value1(v) => v.to_le_bytes().to_vec(),
            GdbRegisterValueData::Value2(v) => v.to_le_bytes().to_vec(),
            GdbRegisterValueData::Value4(v) => v.to_le_bytes().to_vec(),
            GdbRegisterValueData::Value8(v) => v.to_le_bytes().to_vec(),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GdbThreadId {
    pub pid: pid_t,
    pub tid: pid_t,
}

impl GdbThreadId {
    pub const ANY: GdbThreadId = GdbThreadId { pid: 0, tid: 0 };
    pub const ALL: GdbThreadId = GdbThreadId { pid: -1, tid: -1 };

    pub fn new(pid: pid_t, tid: pid_t) -> GdbThreadId {
        GdbThreadId { pid, tid }
    }
}

impl Default for GdbThreadId {
    fn default() -> Self {
        GdbThreadId::ANY
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GdbActionType {
    ActionContinue,
    ActionStep,
}

#[derive(Copy, Clone, Debug)]
pub struct GdbContAction {
    pub type_: GdbActionType,
    pub target: GdbThreadId,
    pub maybe_signal_to_deliver: Option<Sig>,
}

impl GdbContAction {
    pub fn new(
        type_: GdbActionType,
        target: GdbThreadId,
        maybe_signal_to_deliver: Option<Sig>,
    ) -> GdbContAction {
        GdbContAction {
            type_,
            target,
            maybe_signal_to_deliver,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GdbRestartType {
    RestartFromPrevious,
    RestartFromEvent,
    RestartFromCheckpoint,
}

#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum GdbRequestType {
    DREQ_NONE,
    // Queries that work without any target task.
    DREQ_GET_CURRENT_THREAD,
    DREQ_GET_OFFSETS,
    DREQ_GET_THREAD_LIST,
    DREQ_INTERRUPT,
    // Queries and mutations of which task is the target.
    DREQ_GET_IS_THREAD_ALIVE,
    DREQ_GET_THREAD_EXTRA_INFO,
    DREQ_SET_CONTINUE_THREAD,
    DREQ_SET_QUERY_THREAD,
    // Requests that need a resolved target task.
    DREQ_GET_AUXV,
    DREQ_GET_MEM,
    DREQ_SET_MEM,
    DREQ_GET_REG,
    DREQ_GET_REGS,
    DREQ_SET_REG,
    DREQ_GET_STOP_REASON,
    DREQ_SET_SW_BREAK,
    DREQ_SET_HW_BREAK,
    DREQ_SET_RD_WATCH,
    DREQ_SET_WR_WATCH,
    DREQ_SET_RDWR_WATCH,
    DREQ_REMOVE_SW_BREAK,
    DREQ_REMOVE_HW_BREAK,
    DREQ_REMOVE_RD_WATCH,
    DREQ_REMOVE_WR_WATCH,
    DREQ_REMOVE_RDWR_WATCH,
    DREQ_READ_SIGINFO,
    DREQ_WRITE_SIGINFO,
    // Control flow.
    DREQ_CONT,
    DREQ_RESTART,
    DREQ_DETACH,
}

pub use GdbRequestType::*;

#[derive(Clone, Debug, Default)]
pub struct GdbRequestMem {
    pub addr: RemotePtr<Void>,
    pub len: usize,
    /// Only for SET_MEM.
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct GdbRequestWatch {
    pub addr: RemotePtr<Void>,
    /// Width of the breakpoint instruction for software breakpoints; number
    /// of bytes watched for watchpoints.
    pub kind: usize,
    /// Bytecode programs; the watch triggers when any fails to evaluate or
    /// evaluates to a nonzero value. Empty means an unconditional trap.
    pub conditions: Vec<Vec<u8>>,
}

#[derive(Clone, Debug)]
pub struct GdbRequestRestart {
    pub param: FrameTime,
    pub param_str: String,
    pub type_: GdbRestartType,
}

impl Default for GdbRequestRestart {
    fn default() -> Self {
        GdbRequestRestart {
            param: 0,
            param_str: String::new(),
            type_: GdbRestartType::RestartFromPrevious,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct GdbRequestCont {
    pub run_direction: RunDirection,
    pub actions: Vec<GdbContAction>,
}

#[derive(Clone, Debug)]
pub enum GdbRequestValue {
    GdbRequestNone,
    GdbRequestMem(GdbRequestMem),
    GdbRequestWatch(GdbRequestWatch),
    GdbRequestRestart(GdbRequestRestart),
    GdbRequestRegisterValue(GdbRegisterValue),
    GdbRequestCont(GdbRequestCont),
}

/// A request from the debugger client, decoded off the wire by the
/// connection. The payload accessors panic on a type mismatch; dispatch
/// keys every access off `type_`.
#[derive(Clone, Debug)]
pub struct GdbRequest {
    pub type_: GdbRequestType,
    pub value: GdbRequestValue,
    pub target: GdbThreadId,
    pub suppress_debugger_stop: bool,
}

impl Default for GdbRequest {
    fn default() -> Self {
        GdbRequest::new(DREQ_NONE)
    }
}

impl GdbRequest {
    pub fn new(type_: GdbRequestType) -> GdbRequest {
        let value = match type_ {
            DREQ_GET_MEM | DREQ_SET_MEM | DREQ_READ_SIGINFO | DREQ_WRITE_SIGINFO => {
                GdbRequestValue::GdbRequestMem(Default::default())
            }
            DREQ_SET_SW_BREAK | DREQ_SET_HW_BREAK | DREQ_SET_RD_WATCH | DREQ_SET_WR_WATCH
            | DREQ_SET_RDWR_WATCH | DREQ_REMOVE_SW_BREAK | DREQ_REMOVE_HW_BREAK
            | DREQ_REMOVE_RD_WATCH | DREQ_REMOVE_WR_WATCH | DREQ_REMOVE_RDWR_WATCH => {
                GdbRequestValue::GdbRequestWatch(Default::default())
            }
            DREQ_GET_REG | DREQ_SET_REG => {
                GdbRequestValue::GdbRequestRegisterValue(GdbRegisterValue {
                    name: crate::gdb_register::DREG_EAX,
                    value: GdbRegisterValueData::ValueGeneric([0; GdbRegisterValue::MAX_SIZE]),
                    defined: false,
                    size: 0,
                })
            }
            DREQ_RESTART => GdbRequestValue::GdbRequestRestart(Default::default()),
            DREQ_CONT => GdbRequestValue::GdbRequestCont(Default::default()),
            _ => GdbRequestValue::GdbRequestNone,
        };
        GdbRequest {
            type_,
            value,
            target: GdbThreadId::ANY,
            suppress_debugger_stop: false,
        }
    }

    pub fn is_resume_request(&self) -> bool {
        self.type_ == DREQ_CONT
    }

    pub fn mem(&self) -> &GdbRequestMem {
        match &self.value {
            GdbRequestValue::GdbRequestMem(m) => m,
            _ => panic!("Unexpected payload for {:?}", self.type_),
        }
    }

    pub fn mem_mut(&mut self) -> &mut GdbRequestMem {
        match &mut self.value {
            GdbRequestValue::GdbRequestMem(m) => m,
            type_ => panic!("Unexpected payload {:?}", type_),
        }
    }

    pub fn watch(&self) -> &GdbRequestWatch {
        match &self.value {
            GdbRequestValue::GdbRequestWatch(w) => w,
            _ => panic!("Unexpected payload for {:?}", self.type_),
        }
    }

    pub fn watch_mut(&mut self) -> &mut GdbRequestWatch {
        match &mut self.value {
            GdbRequestValue::GdbRequestWatch(w) => w,
            type_ => panic!("Unexpected payload {:?}", type_),
        }
    }

    pub fn reg(&self) -> &GdbRegisterValue {
        match &self.value {
            GdbRequestValue::GdbRequestRegisterValue(r) => r,
            _ => panic!("Unexpected payload for {:?}", self.type_),
        }
    }

    pub fn reg_mut(&mut self) -> &mut GdbRegisterValue {
        match &mut self.value {
            GdbRequestValue::GdbRequestRegisterValue(r) => r,
            type_ => panic!("Unexpected payload {:?}", type_),
        }
    }

    pub fn restart(&self) -> &GdbRequestRestart {
        match &self.value {
            GdbRequestValue::GdbRequestRestart(r) => r,
            _ => panic!("Unexpected payload for {:?}", self.type_),
        }
    }

    pub fn restart_mut(&mut self) -> &mut GdbRequestRestart {
        match &mut self.value {
            GdbRequestValue::GdbRequestRestart(r) => r,
            type_ => panic!("Unexpected payload {:?}", type_),
        }
    }

    pub fn cont(&self) -> &GdbRequestCont {
        match &self.value {
            GdbRequestValue::GdbRequestCont(c) => c,
            _ => panic!("Unexpected payload for {:?}", self.type_),
        }
    }

    pub fn cont_mut(&mut self) -> &mut GdbRequestCont {
        match &mut self.value {
            GdbRequestValue::GdbRequestCont(c) => c,
            type_ => panic!("Unexpected payload {:?}", type_),
        }
    }
}

/// One entry of a tracee's ELF auxiliary vector.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct GdbAuxvPair {
    pub key: u64,
    pub value: u64,
}

#[derive(Copy, Clone, Debug)]
pub struct GdbConnectionFeatures {
    pub reverse_execution: bool,
}

impl Default for GdbConnectionFeatures {
    fn default() -> Self {
        Self {
            reverse_execution: true,
        }
    }
}

pub type GdbConnectionSharedPtr = Rc<RefCell<dyn GdbConnection>>;

/// The conversation with the debugger client. Wire-level packet framing and
/// serialization live behind this trait; the server only sees decoded
/// requests and pushes typed replies. Exactly one reply (or stop
/// notification) is owed per request taken from `get_request`.
pub trait GdbConnection {
    /// Block until a client connects on `listen_fd`. Debugging traffic is
    /// scoped to thread group `tgid`.
    fn await_debugger(&mut self, listen_fd: &ScopedFd, tgid: pid_t);

    fn features(&self) -> GdbConnectionFeatures;

    /// Block until the client's next request is available.
    fn get_request(&mut self) -> GdbRequest;

    /// Poll for buffered client data without blocking; used to interrupt
    /// long replay steps.
    fn sniff_packet(&mut self) -> bool;

    /// `sig` of `None` reports a stop with signal 0.
    fn notify_stop(&mut self, thread: GdbThreadId, sig: Option<Sig>, watch_addr: RemotePtr<Void>);
    fn notify_no_such_thread(&mut self, req: &GdbRequest);
    fn notify_exit_code(&mut self, code: i32);
    fn notify_restart_failed(&mut self);

    fn reply_get_current_thread(&mut self, thread: GdbThreadId);
    fn reply_get_offsets(&mut self);
    fn reply_get_thread_list(&mut self, threads: &[GdbThreadId]);
    fn reply_get_is_thread_alive(&mut self, alive: bool);
    fn reply_get_thread_extra_info(&mut self, info: &OsStr);
    fn reply_select_thread(&mut self, ok: bool);
    fn reply_get_auxv(&mut self, auxv: &[GdbAuxvPair]);
    fn reply_get_mem(&mut self, mem: &[u8]);
    fn reply_set_mem(&mut self, ok: bool);
    fn reply_get_reg(&mut self, reg: &GdbRegisterValue);
    fn reply_get_regs(&mut self, file: &[GdbRegisterValue]);
    fn reply_set_reg(&mut self, ok: bool);
    fn reply_get_stop_reason(&mut self, which: GdbThreadId, sig: Option<Sig>);
    fn reply_watchpoint_request(&mut self, ok: bool);
    fn reply_read_siginfo(&mut self, si_bytes: &[u8]);
    fn reply_write_siginfo(&mut self);
    fn reply_detach(&mut self);
}
