//! The GDB Remote Serial Protocol server of the retrace deterministic
//! record/replay debugger.
//!
//! This crate mediates a gdb client's requests into effects on a replay
//! timeline: it exposes task state (registers, memory, threads, stop
//! reasons), manages breakpoints and watchpoints, supports reverse
//! execution, and implements the retrace protocol extensions (checkpoints,
//! event-number queries, diversion sessions for side-effecting inferior
//! calls).
//!
//! The replay engine itself, the ptrace-level task primitive and the wire
//! serialization of the remote protocol live outside this crate; they are
//! reached through the traits in [`replay_timeline`], [`session`] and
//! [`gdb_connection`].

#[macro_use]
pub mod log;

pub mod breakpoint_condition;
pub mod extra_registers;
pub mod gdb_connection;
pub mod gdb_expression;
pub mod gdb_register;
pub mod gdb_server;
pub mod kernel_abi;
pub mod registers;
pub mod remote_code_ptr;
pub mod remote_ptr;
pub mod replay_timeline;
pub mod scoped_fd;
pub mod session;
pub mod sig;
pub mod taskish_uid;
pub mod ticks;
pub mod trace_frame;
pub mod util;
