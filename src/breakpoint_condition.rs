use crate::{
    gdb_expression::{GdbExpression, GdbExpressionValue},
    session::task::Task,
};

/// A conditional-trap predicate: an ordered sequence of agent-expression
/// programs attached to one breakpoint or watchpoint. The trap fires when
/// any program fails to evaluate or evaluates to a nonzero value; a
/// breakpoint with no condition object attached always fires.
pub struct BreakpointCondition {
    expressions: Vec<GdbExpression>,
}

impl BreakpointCondition {
    pub fn new(bytecodes: &[Vec<u8>]) -> BreakpointCondition {
        let mut expressions = Vec::new();
        for b in bytecodes {
            expressions.push(GdbExpression::new(b));
        }
        Self { expressions }
    }

    pub fn evaluate(&self, t: &mut dyn Task) -> bool {
        for e in &self.expressions {
            let mut v = GdbExpressionValue::default();
            // Break if evaluation fails or the result is nonzero.
            if !e.evaluate(t, &mut v) || v.i != 0 {
                return true;
            }
        }
        false
    }
}
