//! Method invocation, return, and tail-call discipline over the shared
//! operand/call stack. See the `Frame layout` data-model note for the
//! positional contract these three operations maintain.

use crate::bytes::read_u16;
use crate::error::Fault;
use crate::stack::Word;
use crate::Ijvm;

impl Ijvm {
    fn method_header(&self, idx: u16) -> Result<(usize, usize, usize), Fault> {
        let index = idx as usize;
        if index >= self.constant_pool.len() {
            return Err(Fault::BadConstantIndex {
                index: idx,
                size: self.constant_pool.len(),
            });
        }
        let method_addr = self.constant_pool[index];
        if method_addr < 0 || method_addr as usize + 3 >= self.text.len() {
            return Err(Fault::BadMethodAddress {
                addr: method_addr as u32,
                text_len: self.text.len(),
            });
        }
        let addr = method_addr as usize;
        let num_params = read_u16(&self.text[addr..addr + 2]) as usize;
        let num_locals = read_u16(&self.text[addr + 2..addr + 4]) as usize;
        Ok((addr, num_params, num_locals))
    }

    /// `INVOKEVIRTUAL idx`.
    pub(crate) fn invoke_virtual(&mut self, idx: u16) -> Result<(), Fault> {
        let (addr, num_params, num_locals) = self.method_header(idx)?;
        if self.stack.top() < num_params as isize - 1 {
            return Err(Fault::StackUnderflow);
        }
        let new_lv = (self.stack.top() - num_params as isize + 1) as usize;

        for _ in 0..num_locals {
            self.stack.push(0);
        }
        self.stack.push(self.program_counter as Word);
        self.stack.push(self.lv_pointer as Word);

        let link_target = new_lv + num_params + num_locals;
        *self.stack.index_mut(new_lv) = link_target as Word;

        self.lv_pointer = new_lv;
        self.program_counter = addr + 4;
        Ok(())
    }

    /// `IRETURN`.
    pub(crate) fn ireturn(&mut self) -> Result<(), Fault> {
        if self.stack.is_empty() || self.lv_pointer == 0 {
            return Err(Fault::NoCallerFrame);
        }
        let return_value = self.stack.pop();
        let lv = self.lv_pointer;
        let link_target = self.stack.index(lv) as usize;
        let saved_pc = self.stack.index(link_target) as usize;
        let saved_lv = self.stack.index(link_target + 1) as usize;

        self.stack.truncate_to(lv as isize - 1);
        self.lv_pointer = saved_lv;
        self.program_counter = saved_pc;
        self.stack.push(return_value);
        Ok(())
    }

    /// `TAILCALL idx` (opcode 0xCB). Replaces the current frame in place so
    /// that the eventual `IRETURN` returns straight to this frame's caller.
    pub(crate) fn tailcall(&mut self, idx: u16) -> Result<(), Fault> {
        if self.lv_pointer == 0 {
            return Err(Fault::NoCallerFrame);
        }
        let (addr, num_params, num_locals) = self.method_header(idx)?;
        if self.stack.top() < num_params as isize - 1 {
            return Err(Fault::StackUnderflow);
        }

        let mut args = Vec::with_capacity(num_params);
        for _ in 0..num_params {
            args.push(self.stack.pop());
        }
        args.reverse();

        let lv = self.lv_pointer;
        let link_target = self.stack.index(lv) as usize;
        let caller_pc = self.stack.index(link_target);
        let caller_lv = self.stack.index(link_target + 1);

        self.stack.truncate_to(lv as isize - 1);
        for arg in args {
            self.stack.push(arg);
        }
        for _ in 0..num_locals {
            self.stack.push(0);
        }
        self.stack.push(caller_pc);
        self.stack.push(caller_lv);

        let new_top = self.stack.top();
        let new_lv = (new_top - (num_params + num_locals + 2) as isize + 1) as usize;
        let link_target = new_lv + num_params + num_locals;
        *self.stack.index_mut(new_lv) = link_target as Word;

        self.lv_pointer = new_lv;
        self.program_counter = addr + 4;
        Ok(())
    }

    /// Walks the frame chain from the current `lv_pointer` down to the
    /// outermost frame, counting one hop per call plus one for the main
    /// frame. Used only for introspection (`get_call_stack_size`); tail
    /// calls must leave this unchanged across a chain of calls.
    pub fn get_call_stack_size(&self) -> usize {
        if self.stack.is_empty() {
            return 0;
        }
        let mut count = 1;
        let mut cur = self.lv_pointer;
        while cur != 0 {
            let link_target = self.stack.index(cur) as usize;
            cur = self.stack.index(link_target + 1) as usize;
            count += 1;
        }
        count
    }
}
