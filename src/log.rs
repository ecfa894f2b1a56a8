use backtrace::Backtrace;
use lazy_static::lazy_static;
use nix::errno::{errno, Errno};
use std::{
    collections::HashMap,
    env,
    fs::{File, OpenOptions},
    io,
    io::{BufWriter, Result, Write},
    sync::{Mutex, MutexGuard},
};

#[derive(Copy, Clone, Eq, PartialEq, PartialOrd)]
pub enum LogLevel {
    LogFatal,
    LogError,
    LogWarn,
    LogInfo,
    LogDebug,
}

pub use LogLevel::*;

struct LogGlobals {
    level_map: HashMap<String, LogLevel>,
    default_level: LogLevel,
    /// Possibly buffered.
    log_file: Box<dyn Write + Send>,
}

lazy_static! {
    static ref LOG_GLOBALS: Mutex<LogGlobals> = {
        let mut f: Box<dyn Write + Send> = if let Ok(filename) = env::var("RETRACE_LOG_FILE") {
            Box::new(File::create(filename).unwrap())
        } else if let Ok(filename) = env::var("RETRACE_APPEND_LOG_FILE") {
            Box::new(
                OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(filename)
                    .unwrap(),
            )
        } else {
            Box::new(io::stderr())
        };

        if let Ok(buf_size) = env::var("RETRACE_LOG_BUFFER") {
            let log_buffer_size = buf_size.parse::<usize>().unwrap();
            f = Box::new(BufWriter::with_capacity(log_buffer_size, f));
        }

        let mut level_map = HashMap::new();
        let mut default_level = LogWarn;
        if let Ok(levels) = env::var("RETRACE_LOG") {
            for entry in levels.split(',') {
                let mut it = entry.splitn(2, ':');
                if let (Some(module), Some(level)) = (it.next(), it.next()) {
                    let level = parse_level(level);
                    if module == "all" {
                        default_level = level;
                    } else {
                        level_map.insert(module.to_owned(), level);
                    }
                }
            }
        }

        Mutex::new(LogGlobals {
            level_map,
            default_level,
            log_file: f,
        })
    };
}

fn parse_level(name: &str) -> LogLevel {
    match name {
        "fatal" => LogFatal,
        "error" => LogError,
        "warn" => LogWarn,
        "info" => LogInfo,
        _ => LogDebug,
    }
}

/// Given a module path, what is its log level? Levels are keyed by the last
/// path component, i.e. `RETRACE_LOG=gdb_server:debug` targets this crate's
/// `gdb_server` module.
fn get_log_level(module_path: &str, l: &MutexGuard<LogGlobals>) -> LogLevel {
    let name = module_path.rsplit("::").next().unwrap();
    match l.level_map.get(name) {
        Some(level) => *level,
        None => l.default_level,
    }
}

fn log_name(level: LogLevel) -> &'static str {
    match level {
        LogFatal => "FATAL",
        LogError => "ERROR",
        LogWarn => "WARN",
        LogInfo => "INFO",
        LogDebug => "DEBUG",
    }
}

/// A single log statement. Buffers writes and emits one newline-terminated
/// line to the log sink when dropped.
pub struct NewLineTerminatingOstream {
    enabled: bool,
    message: Vec<u8>,
    lock: MutexGuard<'static, LogGlobals>,
}

impl NewLineTerminatingOstream {
    fn new(
        level: LogLevel,
        filename: &str,
        line: u32,
        module_path: &str,
        always_enabled: bool,
    ) -> NewLineTerminatingOstream {
        let lock = LOG_GLOBALS.lock().unwrap();
        let enabled = always_enabled || level <= get_log_level(module_path, &lock);
        let mut this = NewLineTerminatingOstream {
            message: Vec::new(),
            enabled,
            lock,
        };
        if enabled {
            write_prefix(&mut this, level, filename, line, module_path);
        }
        this
    }
}

impl Drop for NewLineTerminatingOstream {
    fn drop(&mut self) {
        if self.enabled {
            self.write_all(b"\n").unwrap();
            self.flush().unwrap();
        }
    }
}

impl Write for NewLineTerminatingOstream {
    fn flush(&mut self) -> Result<()> {
        if !self.message.is_empty() && self.enabled {
            self.lock.log_file.write_all(&self.message)?;
            self.lock.log_file.flush()?;
        }
        self.message.clear();
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.enabled {
            self.message.extend_from_slice(buf);
        }
        // Pretend the bytes were written even when disabled; otherwise the
        // caller sees a WriteZero error.
        Ok(buf.len())
    }
}

pub fn write_prefix(
    stream: &mut dyn Write,
    level: LogLevel,
    filename: &str,
    line: u32,
    module_path: &str,
) {
    write!(stream, "[{} ", log_name(level)).unwrap();
    if level <= LogError {
        write!(stream, "{}:{} ", filename, line).unwrap();
    }
    write!(stream, "{}", module_path).unwrap();
    let err = errno();
    if level <= LogWarn && err != 0 {
        write!(stream, " errno: {}", Errno::from_i32(err)).unwrap();
    }
    write!(stream, "] ").unwrap();
}

pub fn log(
    log_level: LogLevel,
    filename: &str,
    line: u32,
    module_path: &str,
    always_enabled: bool,
) -> NewLineTerminatingOstream {
    NewLineTerminatingOstream::new(log_level, filename, line, module_path, always_enabled)
}

/// Write one line to the log sink (stderr unless RETRACE_LOG_FILE or
/// RETRACE_APPEND_LOG_FILE is set). Execution continues normally.
macro_rules! log {
    ($log_level:expr, $($args:tt)+) => {
        {
            use ::std::io::Write;
            let mut stream = crate::log::log(
                $log_level,
                file!(),
                line!(),
                module_path!(),
                false
            );
            write!(stream, $($args)+).unwrap()
        }
    };
}

/// Log at fatal level, dump a backtrace and abort. Reserved for adapter
/// invariant violations; client mistakes get a protocol-level reply instead.
macro_rules! fatal {
    ($($args:tt)+) => {
        {
            {
                use ::std::io::Write;
                use crate::log::LogFatal;
                let mut stream = crate::log::log(
                    LogFatal,
                    file!(),
                    line!(),
                    module_path!(),
                    true
                );
                write!(stream, $($args)+).unwrap();
            }
            crate::log::notifying_abort(::backtrace::Backtrace::new())
        }
    };
}

/// Task-attributed assertion. The task is named in the failure message so a
/// wedged debugging session can be tied back to the tracee that broke it.
macro_rules! ed_assert {
    ($task:expr, $cond:expr) => {
        {
            let t_: &dyn crate::session::task::Task = $task;
            if !$cond {
                fatal!(
                    "Assertion `{}' failed to hold (task {})",
                    stringify!($cond),
                    t_.rec_tid()
                );
            }
        }
    };
    ($task:expr, $cond:expr, $($args:tt)+) => {
        {
            let t_: &dyn crate::session::task::Task = $task;
            if !$cond {
                let msg_ = format!($($args)+);
                fatal!(
                    "Assertion `{}' failed to hold (task {}): {}",
                    stringify!($cond),
                    t_.rec_tid(),
                    msg_
                );
            }
        }
    };
}

macro_rules! ed_assert_eq {
    ($task:expr, $lhs:expr, $rhs:expr, $($args:tt)+) => {
        ed_assert!($task, $lhs == $rhs, $($args)+)
    };
}

/// Dump the backtrace and abort.
pub fn notifying_abort(bt: Backtrace) -> ! {
    dump_retrace_stack(bt);
    std::process::abort();
}

fn dump_retrace_stack(bt: Backtrace) {
    write!(io::stderr(), "=== Start retrace backtrace:\n").unwrap();
    write!(io::stderr(), "{:?}", bt).unwrap();
    write!(io::stderr(), "=== End retrace backtrace\n").unwrap();
}
