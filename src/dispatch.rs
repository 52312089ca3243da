//! Decode-execute loop: `Ijvm::step` reads one opcode, dispatches it, and
//! advances the program counter past its immediates. See the opcode table
//! in the design notes for the full semantics each variant implements.

use std::io::{Read as _, Write as _};

use crate::bytes::{read_i16, read_u16};
use crate::error::Fault;
use crate::stack::Word;
use crate::Ijvm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Opcode {
    Nop,
    LdcW,
    Bipush,
    Dup,
    Pop,
    Swap,
    Iadd,
    Isub,
    Iand,
    Ior,
    Iinc,
    Iload,
    Istore,
    Ifeq,
    Iflt,
    IfIcmpeq,
    Goto,
    InvokeVirtual,
    Ireturn,
    Tailcall,
    Wide,
    Halt,
    ErrOp,
    In,
    Out,
    NewArray,
    IaLoad,
    IaStore,
    Gc,
}

impl Opcode {
    /// Decodes a raw opcode byte. Returns `None` for anything unrecognized,
    /// including the reserved `NETBIND`/`NETCONNECT`/`NETIN`/`NETOUT`/
    /// `NETCLOSE` range (0xE1-0xE5), whose bodies are out of scope.
    fn decode(byte: u8) -> Option<Self> {
        use Opcode::*;
        Some(match byte {
            0x00 => Nop,
            0x13 => LdcW,
            0x10 => Bipush,
            0x59 => Dup,
            0x57 => Pop,
            0x5F => Swap,
            0x60 => Iadd,
            0x64 => Isub,
            0x7E => Iand,
            0xB0 => Ior,
            0x84 => Iinc,
            0x15 => Iload,
            0x36 => Istore,
            0x99 => Ifeq,
            0x9B => Iflt,
            0x9F => IfIcmpeq,
            0xA7 => Goto,
            0xB6 => InvokeVirtual,
            0xAC => Ireturn,
            0xCB => Tailcall,
            0xC4 => Wide,
            0xFF => Halt,
            0xFE => ErrOp,
            0xFC => In,
            0xFD => Out,
            0xD1 => NewArray,
            0xD2 => IaLoad,
            0xD3 => IaStore,
            0xD4 => Gc,
            _ => return None,
        })
    }
}

/// `WIDE` is only legal in front of these three sub-opcodes.
const WIDE_ISTORE: u8 = 0x36;
const WIDE_ILOAD: u8 = 0x15;
const WIDE_IINC: u8 = 0x84;

impl Ijvm {
    fn fetch_u8(&mut self) -> Result<u8, Fault> {
        let pc = self.program_counter;
        if pc >= self.text.len() {
            return Err(Fault::ImmediateOutOfRange {
                pc,
                text_len: self.text.len(),
            });
        }
        self.program_counter += 1;
        Ok(self.text[pc])
    }

    fn fetch_i8(&mut self) -> Result<i8, Fault> {
        self.fetch_u8().map(|b| b as i8)
    }

    fn fetch_u16(&mut self) -> Result<u16, Fault> {
        let pc = self.program_counter;
        if pc + 1 >= self.text.len() {
            return Err(Fault::ImmediateOutOfRange {
                pc,
                text_len: self.text.len(),
            });
        }
        let v = read_u16(&self.text[pc..pc + 2]);
        self.program_counter += 2;
        Ok(v)
    }

    fn fetch_i16(&mut self) -> Result<i16, Fault> {
        let pc = self.program_counter;
        if pc + 1 >= self.text.len() {
            return Err(Fault::ImmediateOutOfRange {
                pc,
                text_len: self.text.len(),
            });
        }
        let v = read_i16(&self.text[pc..pc + 2]);
        self.program_counter += 2;
        Ok(v)
    }

    fn pop_checked(&mut self) -> Result<Word, Fault> {
        if self.stack.is_empty() {
            return Err(Fault::StackUnderflow);
        }
        Ok(self.stack.pop())
    }

    /// Pops the top two words as `(below, top)`, i.e. `(lhs, rhs)` for a
    /// binary op where the operand pushed first is the left-hand side.
    fn pop2_checked(&mut self) -> Result<(Word, Word), Fault> {
        if self.stack.top() < 1 {
            return Err(Fault::StackUnderflow);
        }
        let rhs = self.stack.pop();
        let lhs = self.stack.pop();
        Ok((lhs, rhs))
    }

    fn branch(&mut self, op_pc: usize, offset: i16) -> Result<(), Fault> {
        let target = op_pc as i64 + offset as i64;
        if target < 0 || target as usize > self.text.len() {
            return Err(Fault::BranchOutOfRange {
                target,
                text_len: self.text.len(),
            });
        }
        self.program_counter = target as usize;
        Ok(())
    }

    fn write_out(&mut self, bytes: &[u8]) {
        let _ = self.output.write_all(bytes);
    }

    fn raise_fault(&mut self, fault: Fault) {
        tracing::warn!(pc = self.program_counter, %fault, "run-time fault, halting");
        self.fault = Some(fault);
        self.halted = true;
    }

    /// Step (perform) one instruction. For `WIDE`, performs the entire
    /// wide ISTORE/ILOAD/IINC before returning.
    pub fn step(&mut self) {
        if self.finished() {
            if !self.logged_finish {
                tracing::debug!(pc = self.program_counter, "machine finished");
                self.logged_finish = true;
            }
            return;
        }

        let op_pc = self.program_counter;
        let opcode_byte = self.text[op_pc];
        self.program_counter += 1;

        let opcode = match Opcode::decode(opcode_byte) {
            Some(op) => op,
            None => {
                self.raise_fault(Fault::UnknownOpcode {
                    opcode: opcode_byte,
                    pc: op_pc,
                });
                return;
            }
        };

        tracing::trace!(pc = op_pc, opcode = ?opcode, "dispatch");
        if let Err(fault) = self.execute(opcode, op_pc) {
            self.raise_fault(fault);
        }
    }

    /// Runs `step` until `finished()`.
    pub fn run(&mut self) {
        while !self.finished() {
            self.step();
        }
    }

    fn execute(&mut self, opcode: Opcode, op_pc: usize) -> Result<(), Fault> {
        use Opcode::*;
        match opcode {
            Nop => {}
            Bipush => {
                let v = self.fetch_i8()? as Word;
                self.stack.push(v);
            }
            LdcW => {
                let idx = self.fetch_u16()?;
                let i = idx as usize;
                if i >= self.constant_pool.len() {
                    return Err(Fault::BadConstantIndex {
                        index: idx,
                        size: self.constant_pool.len(),
                    });
                }
                self.stack.push(self.constant_pool[i]);
            }
            Dup => {
                if self.stack.is_empty() {
                    return Err(Fault::StackUnderflow);
                }
                self.stack.push(self.stack.tos());
            }
            Pop => {
                self.pop_checked()?;
            }
            Swap => {
                if self.stack.top() < 1 {
                    return Err(Fault::StackUnderflow);
                }
                let top = self.stack.pop();
                let below = self.stack.pop();
                self.stack.push(top);
                self.stack.push(below);
            }
            Iadd => {
                let (lhs, rhs) = self.pop2_checked()?;
                self.stack.push(lhs.wrapping_add(rhs));
            }
            Isub => {
                let (lhs, rhs) = self.pop2_checked()?;
                self.stack.push(lhs.wrapping_sub(rhs));
            }
            Iand => {
                let (lhs, rhs) = self.pop2_checked()?;
                self.stack.push(lhs & rhs);
            }
            Ior => {
                let (lhs, rhs) = self.pop2_checked()?;
                self.stack.push(lhs | rhs);
            }
            Iinc => {
                let var = self.fetch_u8()?;
                let delta = self.fetch_i8()?;
                let idx = self.lv_pointer + var as usize;
                let cur = self.stack.index(idx);
                *self.stack.index_mut(idx) = cur.wrapping_add(delta as Word);
            }
            Iload => {
                let var = self.fetch_u8()?;
                let v = self.stack.index(self.lv_pointer + var as usize);
                self.stack.push(v);
            }
            Istore => {
                let var = self.fetch_u8()?;
                let v = self.pop_checked()?;
                *self.stack.index_mut(self.lv_pointer + var as usize) = v;
            }
            Ifeq => {
                let offset = self.fetch_i16()?;
                let v = self.pop_checked()?;
                if v == 0 {
                    self.branch(op_pc, offset)?;
                }
            }
            Iflt => {
                let offset = self.fetch_i16()?;
                let v = self.pop_checked()?;
                if v < 0 {
                    self.branch(op_pc, offset)?;
                }
            }
            IfIcmpeq => {
                let offset = self.fetch_i16()?;
                let (lhs, rhs) = self.pop2_checked()?;
                if lhs == rhs {
                    self.branch(op_pc, offset)?;
                }
            }
            Goto => {
                let offset = self.fetch_i16()?;
                self.branch(op_pc, offset)?;
            }
            InvokeVirtual => {
                let idx = self.fetch_u16()?;
                self.invoke_virtual(idx)?;
            }
            Ireturn => {
                self.ireturn()?;
            }
            Tailcall => {
                let idx = self.fetch_u16()?;
                self.tailcall(idx)?;
            }
            Wide => {
                let sub = self.fetch_u8()?;
                let index = self.fetch_u16()? as usize;
                match sub {
                    WIDE_ISTORE => {
                        let v = self.pop_checked()?;
                        *self.stack.index_mut(self.lv_pointer + index) = v;
                    }
                    WIDE_ILOAD => {
                        let v = self.stack.index(self.lv_pointer + index);
                        self.stack.push(v);
                    }
                    WIDE_IINC => {
                        let delta = self.fetch_i8()?;
                        let idx = self.lv_pointer + index;
                        let cur = self.stack.index(idx);
                        *self.stack.index_mut(idx) = cur.wrapping_add(delta as Word);
                    }
                    _ => return Err(Fault::IllegalWideSubOpcode { sub }),
                }
            }
            Halt => {
                tracing::debug!("HALT executed");
                self.halted = true;
            }
            ErrOp => {
                self.write_out(b"ERROR, halting the emulator.\n");
                self.halted = true;
            }
            In => {
                let mut byte = [0u8; 1];
                let n = self.input.read(&mut byte).unwrap_or(0);
                self.stack.push(if n == 0 { 0 } else { byte[0] as Word });
            }
            Out => {
                let v = self.pop_checked()?;
                self.write_out(&[(v & 0xFF) as u8]);
            }
            NewArray => {
                let count = self.pop_checked()?;
                let reference = self.heap.allocate(count)?;
                self.stack.push(reference);
            }
            IaLoad => {
                if self.stack.top() < 1 {
                    return Err(Fault::StackUnderflow);
                }
                let arrayref = self.stack.pop();
                let index = self.stack.pop();
                match self.heap.load(arrayref, index) {
                    Ok(v) => self.stack.push(v),
                    Err(fault) => {
                        self.write_out(b"ERROR: Array index out of bounds.\n");
                        return Err(fault);
                    }
                }
            }
            IaStore => {
                if self.stack.top() < 2 {
                    return Err(Fault::StackUnderflow);
                }
                let arrayref = self.stack.pop();
                let index = self.stack.pop();
                let value = self.stack.pop();
                if let Err(fault) = self.heap.store(arrayref, index, value) {
                    self.write_out(b"ERROR: Array index out of bounds.\n");
                    return Err(fault);
                }
            }
            Gc => {
                self.write_out(b"Garbage collection triggered.\n");
                let roots = self.collection_roots();
                let (kept, freed) = self.heap.collect(&roots);
                tracing::info!(kept, freed, "garbage collection complete");
            }
        }
        Ok(())
    }
}
