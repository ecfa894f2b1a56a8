use crate::{
    gdb_register::GdbRegister,
    registers::MAX_REG_SIZE_BYTES,
    remote_ptr::RemotePtr,
    session::task::Task,
};
use std::convert::TryFrom;

// Bytecodes from the GDB agent-expression language. See
// https://sourceware.org/gdb/current/onlinedocs/gdb/Bytecode-Descriptions.html
const OP_ADD: u8 = 0x02;
const OP_SUB: u8 = 0x03;
const OP_MUL: u8 = 0x04;
const OP_DIV_SIGNED: u8 = 0x05;
const OP_DIV_UNSIGNED: u8 = 0x06;
const OP_REM_SIGNED: u8 = 0x07;
const OP_REM_UNSIGNED: u8 = 0x08;
const OP_LSH: u8 = 0x09;
const OP_RSH_SIGNED: u8 = 0x0a;
const OP_RSH_UNSIGNED: u8 = 0x0b;
const OP_LOG_NOT: u8 = 0x0e;
const OP_BIT_AND: u8 = 0x0f;
const OP_BIT_OR: u8 = 0x10;
const OP_BIT_XOR: u8 = 0x11;
const OP_BIT_NOT: u8 = 0x12;
const OP_EQUAL: u8 = 0x13;
const OP_LESS_SIGNED: u8 = 0x14;
const OP_LESS_UNSIGNED: u8 = 0x15;
const OP_EXT: u8 = 0x16;
const OP_REF8: u8 = 0x17;
const OP_REF16: u8 = 0x18;
const OP_REF32: u8 = 0x19;
const OP_REF64: u8 = 0x1a;
const OP_IF_GOTO: u8 = 0x20;
const OP_GOTO: u8 = 0x21;
const OP_CONST8: u8 = 0x22;
const OP_CONST16: u8 = 0x23;
const OP_CONST32: u8 = 0x24;
const OP_CONST64: u8 = 0x25;
const OP_REG: u8 = 0x26;
const OP_END: u8 = 0x27;
const OP_DUP: u8 = 0x28;
const OP_POP: u8 = 0x29;
const OP_ZERO_EXT: u8 = 0x2a;
const OP_SWAP: u8 = 0x2b;
const OP_PICK: u8 = 0x32;
const OP_ROT: u8 = 0x33;

const MAX_STEPS: usize = 10_000;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct GdbExpressionValue {
    pub i: i64,
}

impl GdbExpressionValue {
    pub fn new(i: i64) -> GdbExpressionValue {
        GdbExpressionValue { i }
    }
}

type Value = GdbExpressionValue;

/// gdb has a simple bytecode language for writing expressions to be
/// evaluated in a remote target; conditional breakpoints arrive as such
/// programs. This evaluates them against a task. Evaluation is bounded and
/// fails closed: any malformed program, failed memory read or undefined
/// register reads as "could not evaluate".
pub struct GdbExpression {
    bytecode: Vec<u8>,
}

impl GdbExpression {
    pub fn new(data: &[u8]) -> GdbExpression {
        GdbExpression {
            bytecode: data.to_owned(),
        }
    }

    /// If evaluation succeeds, store the final result in `result` and
    /// return true. Otherwise return false.
    pub fn evaluate(&self, t: &mut dyn Task, result: &mut GdbExpressionValue) -> bool {
        let mut state = ExpressionState::new(&self.bytecode);
        let mut steps = 0usize;
        while !state.end {
            if steps >= MAX_STEPS || state.error {
                return false;
            }
            state.step(t);
            steps += 1;
        }
        if state.error {
            return false;
        }
        let v = state.pop();
        if state.error {
            return false;
        }
        *result = v;
        true
    }
}

struct ExpressionState<'a> {
    bytecode: &'a [u8],
    stack: Vec<Value>,
    pc: usize,
    error: bool,
    end: bool,
}

impl<'a> ExpressionState<'a> {
    fn new(bytecode: &[u8]) -> ExpressionState {
        ExpressionState {
            bytecode,
            stack: Vec::new(),
            pc: 0,
            error: false,
            end: false,
        }
    }

    fn set_error(&mut self) {
        self.error = true;
    }

    // Accessors set `error` and return a sentinel when the program
    // underflows or overruns; the driving loop checks `error` each step.

    fn pop(&mut self) -> Value {
        match self.stack.pop() {
            Some(v) => v,
            None => {
                self.set_error();
                Value::new(-1)
            }
        }
    }

    /// Pop the two operands of a binary op: b is top-of-stack, a below it.
    fn pop_a_b(&mut self) -> (i64, i64) {
        let b = self.pop().i;
        let a = self.pop().i;
        (a, b)
    }

    fn pop_a(&mut self) -> i64 {
        self.pop().i
    }

    fn push(&mut self, i: i64) {
        self.stack.push(Value::new(i));
    }

    /// Guard a divisor: zero is an evaluation error.
    fn nonzero(&mut self, v: i64) -> i64 {
        if v == 0 {
            self.set_error();
            return 1;
        }
        v
    }

    fn fetch_bytes(&mut self, n: usize) -> u64 {
        if self.pc + n > self.bytecode.len() {
            self.set_error();
            return 0;
        }
        // Operands are big-endian in the bytecode stream.
        let mut v: u64 = 0;
        for i in 0..n {
            v = (v << 8) | u64::from(self.bytecode[self.pc + i]);
        }
        self.pc += n;
        v
    }

    fn fetch_u8(&mut self) -> u8 {
        self.fetch_bytes(1) as u8
    }

    fn fetch_u16(&mut self) -> u16 {
        self.fetch_bytes(2) as u16
    }

    fn load(&mut self, t: &mut dyn Task, size: usize) {
        let addr = self.pop().i as usize;
        if self.error {
            // Don't do unnecessary tracee reads in an error state.
            return;
        }
        let mut buf = [0u8; 8];
        match t.read_bytes_fallible(RemotePtr::from(addr), &mut buf[..size]) {
            Ok(nread) if nread == size => {
                self.push(u64::from_le_bytes(buf) as i64);
            }
            _ => self.set_error(),
        }
    }

    fn pick(&mut self, offset: usize) {
        if offset >= self.stack.len() {
            self.set_error();
            return;
        }
        self.push(self.stack[self.stack.len() - 1 - offset].i);
    }

    fn fetch_reg(&mut self, t: &mut dyn Task) {
        let regno = self.fetch_u16();
        let reg = match GdbRegister::try_from(u32::from(regno)) {
            Ok(reg) => reg,
            Err(_) => {
                self.set_error();
                return;
            }
        };
        let mut buf = [0u8; MAX_REG_SIZE_BYTES];
        let maybe_size = t
            .regs_ref()
            .read_register(&mut buf, reg)
            .or_else(|| t.extra_regs_ref().read_register(&mut buf, reg));
        match maybe_size {
            Some(size) if size <= 8 => {
                let mut word = [0u8; 8];
                word[..size].copy_from_slice(&buf[..size]);
                self.push(u64::from_le_bytes(word) as i64);
            }
            _ => self.set_error(),
        }
    }

    fn step(&mut self, t: &mut dyn Task) {
        debug_assert!(!self.error);
        match self.fetch_u8() {
            OP_ADD => {
                let (a, b) = self.pop_a_b();
                self.push(a.wrapping_add(b))
            }
            OP_SUB => {
                let (a, b) = self.pop_a_b();
                self.push(a.wrapping_sub(b))
            }
            OP_MUL => {
                let (a, b) = self.pop_a_b();
                self.push(a.wrapping_mul(b))
            }
            OP_DIV_SIGNED => {
                let (a, b) = self.pop_a_b();
                let d = self.nonzero(b);
                if !self.error {
                    self.push(a.wrapping_div(d));
                }
            }
            OP_DIV_UNSIGNED => {
                let (a, b) = self.pop_a_b();
                let d = self.nonzero(b) as u64;
                if !self.error {
                    self.push((a as u64 / d) as i64);
                }
            }
            OP_REM_SIGNED => {
                let (a, b) = self.pop_a_b();
                let d = self.nonzero(b);
                if !self.error {
                    self.push(a.wrapping_rem(d));
                }
            }
            OP_REM_UNSIGNED => {
                let (a, b) = self.pop_a_b();
                let d = self.nonzero(b) as u64;
                if !self.error {
                    self.push((a as u64 % d) as i64);
                }
            }
            OP_LSH => {
                let (a, b) = self.pop_a_b();
                self.push(a.wrapping_shl(b as u32))
            }
            OP_RSH_SIGNED => {
                let (a, b) = self.pop_a_b();
                self.push(a.wrapping_shr(b as u32))
            }
            OP_RSH_UNSIGNED => {
                let (a, b) = self.pop_a_b();
                self.push((a as u64).wrapping_shr(b as u32) as i64)
            }
            OP_LOG_NOT => {
                let a = self.pop_a();
                self.push((a == 0) as i64)
            }
            OP_BIT_AND => {
                let (a, b) = self.pop_a_b();
                self.push(a & b)
            }
            OP_BIT_OR => {
                let (a, b) = self.pop_a_b();
                self.push(a | b)
            }
            OP_BIT_XOR => {
                let (a, b) = self.pop_a_b();
                self.push(a ^ b)
            }
            OP_BIT_NOT => {
                let a = self.pop_a();
                self.push(!a)
            }
            OP_EQUAL => {
                let (a, b) = self.pop_a_b();
                self.push((a == b) as i64)
            }
            OP_LESS_SIGNED => {
                let (a, b) = self.pop_a_b();
                self.push((a < b) as i64)
            }
            OP_LESS_UNSIGNED => {
                let (a, b) = self.pop_a_b();
                self.push(((a as u64) < (b as u64)) as i64)
            }
            OP_EXT => {
                let x = i64::from(self.fetch_u8());
                let n = self.nonzero(x);
                if !self.error && n < 64 {
                    let a = self.pop_a();
                    let n_mask = (1i64 << n) - 1;
                    let sign_bit = (a >> (n - 1)) & 1;
                    self.push((sign_bit * !n_mask) | (a & n_mask));
                }
            }
            OP_ZERO_EXT => {
                let n = self.fetch_u8();
                if n < 64 {
                    let a = self.pop_a();
                    let n_mask: i64 = (1i64 << i64::from(n)) - 1;
                    self.push(a & n_mask);
                }
            }
            OP_REF8 => self.load(t, 1),
            OP_REF16 => self.load(t, 2),
            OP_REF32 => self.load(t, 4),
            OP_REF64 => self.load(t, 8),
            OP_DUP => self.pick(0),
            OP_SWAP => {
                let (a, b) = self.pop_a_b();
                self.push(b);
                self.push(a);
            }
            OP_POP => {
                self.pop_a();
            }
            OP_PICK => {
                let offset = self.fetch_u8() as usize;
                self.pick(offset);
            }
            OP_ROT => {
                let c = self.pop_a();
                let b = self.pop_a();
                let a = self.pop_a();
                self.push(c);
                self.push(b);
                self.push(a);
            }
            OP_IF_GOTO => {
                let offset = self.fetch_u16();
                if self.pop_a() != 0 {
                    self.pc = offset as usize;
                }
            }
            OP_GOTO => {
                self.pc = self.fetch_u16() as usize;
            }
            OP_CONST8 => {
                let a = self.fetch_bytes(1) as i64;
                self.push(a);
            }
            OP_CONST16 => {
                let a = self.fetch_bytes(2) as i64;
                self.push(a);
            }
            OP_CONST32 => {
                let a = self.fetch_bytes(4) as i64;
                self.push(a);
            }
            OP_CONST64 => {
                let a = self.fetch_bytes(8) as i64;
                self.push(a);
            }
            OP_REG => self.fetch_reg(t),
            OP_END => {
                self.end = true;
            }
            _ => self.set_error(),
        }
    }
}
