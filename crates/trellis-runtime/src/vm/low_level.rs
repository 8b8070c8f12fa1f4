//! Low-level machine
//!
//! Owns the program counter, return address and frame pointer, and executes
//! the machine opcodes: frames, calls, returns and jumps. Jump operands are
//! relative to the instruction that carries them.

use super::stack::{EvaluationStack, Register, StackValue};
use crate::error::RenderError;
use crate::program::{MachineOp, Opcode, Program};
use std::rc::Rc;
use tracing::trace;

pub struct LowLevelVM {
    pub(crate) stack: EvaluationStack,
    program: Rc<Program>,
    /// Heap offset of the instruction being executed
    current_op: usize,
}

impl LowLevelVM {
    pub fn new(stack: EvaluationStack, program: Rc<Program>) -> Self {
        Self {
            stack,
            program,
            current_op: 0,
        }
    }

    pub fn program(&self) -> &Rc<Program> {
        &self.program
    }

    pub fn pc(&self) -> isize {
        self.stack.pc
    }

    pub fn set_pc(&mut self, pc: isize) {
        self.stack.pc = pc;
    }

    pub fn current_op(&self) -> usize {
        self.current_op
    }

    /// Value of a machine register
    pub fn fetch_register(&self, register: Register) -> Result<isize, RenderError> {
        match register {
            Register::Pc => Ok(self.stack.pc),
            Register::Ra => Ok(self.stack.ra),
            Register::Fp => Ok(self.stack.fp),
            Register::Sp => Ok(self.stack.sp()),
            other => Err(RenderError::invariant(format!(
                "{:?} is not a machine register",
                other
            ))),
        }
    }

    pub fn load_register(&mut self, register: Register, value: isize) -> Result<(), RenderError> {
        match register {
            Register::Pc => self.stack.pc = value,
            Register::Ra => self.stack.ra = value,
            Register::Fp => self.stack.fp = value,
            Register::Sp => self.stack.set_sp(value),
            other => {
                return Err(RenderError::invariant(format!(
                    "{:?} is not a machine register",
                    other
                )))
            }
        }
        Ok(())
    }

    // ===== Frames =====

    /// Save `$ra` and `$fp`; `$fp` then points at the saved `$ra`
    pub fn push_frame(&mut self) {
        self.stack.push(StackValue::Int(self.stack.ra as i64));
        self.stack.push(StackValue::Int(self.stack.fp as i64));
        self.stack.fp = self.stack.sp() - 1;
    }

    /// Drop the frame and everything above it, restoring `$ra` and `$fp`
    pub fn pop_frame(&mut self) -> Result<(), RenderError> {
        let fp = self.stack.fp;
        assert!(fp >= 0, "pop_frame without a matching push_frame");
        let ra = self.stack.get_from(0, fp).as_int()?;
        let saved_fp = self.stack.get_from(1, fp).as_int()?;
        self.stack.set_sp(fp - 1);
        self.stack.ra = ra as isize;
        self.stack.fp = saved_fp as isize;
        Ok(())
    }

    // ===== Control flow =====

    /// Absolute address `offset` words from the current instruction
    pub fn target(&self, offset: i32) -> isize {
        self.current_op as isize + offset as isize
    }

    pub fn goto(&mut self, offset: i32) {
        self.stack.pc = self.target(offset);
    }

    pub fn call(&mut self, handle: usize) -> Result<(), RenderError> {
        let address = self.program.getaddr(handle)?;
        self.stack.ra = self.stack.pc;
        self.stack.pc = address as isize;
        Ok(())
    }

    pub fn return_to(&mut self, offset: i32) {
        self.stack.ra = self.target(offset);
    }

    pub fn return_(&mut self) {
        self.stack.pc = self.stack.ra;
    }

    /// Decode the instruction at `$pc` and advance past it; `None` once the
    /// machine has returned to address -1
    pub fn next_statement(&mut self) -> Result<Option<Opcode>, RenderError> {
        if self.stack.pc == -1 {
            return Ok(None);
        }
        let offset = usize::try_from(self.stack.pc)
            .map_err(|_| RenderError::invariant(format!("invalid $pc {}", self.stack.pc)))?;
        let heap = self.program.heap();
        let opcode = Opcode::decode(heap, offset)?;
        self.current_op = offset;
        self.stack.pc = (offset + Opcode::size(heap, offset)) as isize;
        Ok(Some(opcode))
    }

    pub fn evaluate_machine(&mut self, op: MachineOp, opcode: &Opcode) -> Result<(), RenderError> {
        trace!(pc = opcode.offset, ?op, "machine");
        match op {
            MachineOp::PushFrame => self.push_frame(),
            MachineOp::PopFrame => self.pop_frame()?,
            MachineOp::InvokeVirtual => {
                let handle = self.stack.pop().as_int()?;
                let handle = usize::try_from(handle)
                    .map_err(|_| RenderError::invariant(format!("invalid block handle {}", handle)))?;
                self.call(handle)?;
            }
            MachineOp::InvokeStatic => {
                let handle = usize::try_from(opcode.op1)
                    .map_err(|_| RenderError::invariant(format!("invalid handle {}", opcode.op1)))?;
                self.call(handle)?;
            }
            MachineOp::Jump => self.goto(opcode.op1),
            MachineOp::Return => self.return_(),
            MachineOp::ReturnTo => self.return_to(opcode.op1),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ProgramBuilder;
    use crate::symbol_table::ProgramSymbolTable;
    use proptest::prelude::*;

    fn machine() -> LowLevelVM {
        LowLevelVM::new(EvaluationStack::new(8), Rc::new(Program::default()))
    }

    #[test]
    fn test_frame_restores_registers() {
        let mut vm = machine();
        vm.stack.push(StackValue::Int(7));
        vm.stack.ra = 12;
        vm.push_frame();
        vm.stack.ra = 40;
        vm.stack.push(StackValue::Null);
        vm.pop_frame().unwrap();
        assert_eq!(vm.stack.ra, 12);
        assert_eq!(vm.stack.fp, -1);
        assert_eq!(vm.stack.sp(), 0);
    }

    #[test]
    #[should_panic(expected = "pop_frame without a matching push_frame")]
    fn test_unbalanced_pop_frame_panics() {
        machine().pop_frame().unwrap();
    }

    #[test]
    fn test_call_and_return() {
        let mut builder = ProgramBuilder::new();
        builder.template(ProgramSymbolTable::default(), |_| Ok(())).unwrap();
        let callee = builder.template(ProgramSymbolTable::default(), |_| Ok(())).unwrap();
        let program = Rc::new(builder.build());
        let mut vm = LowLevelVM::new(EvaluationStack::new(8), program.clone());
        vm.set_pc(0);
        let op = vm.next_statement().unwrap().unwrap();
        assert_eq!(op.offset, 0);
        vm.call(callee.handle).unwrap();
        assert_eq!(vm.stack.ra, 1);
        assert_eq!(vm.pc() as usize, program.getaddr(callee.handle).unwrap());
        vm.return_();
        assert_eq!(vm.pc(), 1);
    }

    #[test]
    fn test_halts_at_minus_one() {
        let mut vm = machine();
        vm.set_pc(-1);
        assert!(vm.next_statement().unwrap().is_none());
    }

    proptest! {
        #[test]
        fn prop_nested_frames_unwind_exactly(ras in prop::collection::vec(0isize..1000, 1..8), junk in 0usize..4) {
            let mut vm = machine();
            let mut saved = Vec::new();
            for ra in &ras {
                saved.push((vm.stack.ra, vm.stack.fp, vm.stack.sp()));
                vm.push_frame();
                vm.stack.ra = *ra;
                for _ in 0..junk {
                    vm.stack.push(StackValue::Null);
                }
            }
            while let Some((ra, fp, sp)) = saved.pop() {
                vm.pop_frame().unwrap();
                prop_assert_eq!((vm.stack.ra, vm.stack.fp, vm.stack.sp()), (ra, fp, sp));
            }
        }
    }
}
