//! IJVM: a stack-based bytecode interpreter.
//!
//! Loads a binary image (magic, constant pool, text) and executes it one
//! instruction at a time. The public surface is deliberately small: load
//! a machine, `step`/`run` it, and read back its visible state. Everything
//! that can go wrong - a malformed image, a stack underflow, a bad branch
//! target - collapses to either a failed load (`None`) or `halted = true`;
//! see `error` for the typed reasons kept around for logging and tests.
//!
//! Out of scope (left to callers/collaborators): the command-line entry
//! point, and the `NETBIND`/`NETCONNECT`/`NETIN`/`NETOUT`/`NETCLOSE`
//! opcodes, whose bodies were never defined upstream - they decode as
//! unknown opcodes here, same as any other unrecognized byte.

use std::io::{Read, Write};
use std::path::Path;

mod bytes;
mod dispatch;
mod error;
mod frame;
mod heap;
mod loader;
mod stack;

pub use error::{Fault, LoadError};
pub use stack::Word;

use heap::Heap;
use stack::OperandStack;

/// A loaded, runnable IJVM image.
pub struct Ijvm {
    text: Vec<u8>,
    constant_pool: Vec<Word>,
    program_counter: usize,
    stack: OperandStack,
    lv_pointer: usize,
    halted: bool,
    fault: Option<Fault>,
    heap: Heap,
    input: Box<dyn Read>,
    output: Box<dyn Write>,
    logged_finish: bool,
}

/// Number of zero words pre-pushed onto the stack before execution starts.
/// Acts as scratch/base region below the first frame.
const BASE_REGION_WORDS: usize = 1024;

impl Ijvm {
    /// Loads the binary image at `binary_path`, wiring `input`/`output` as
    /// the streams used by `IN`/`OUT`/`ERR`/`GC`. Returns `None` if the
    /// image cannot be parsed - see `error::LoadError` for why, which is
    /// logged but not returned (the public contract is a single opaque
    /// failure, matching the reference implementation's `NULL` return).
    pub fn init(
        binary_path: impl AsRef<Path>,
        input: impl Read + 'static,
        output: impl Write + 'static,
    ) -> Option<Self> {
        let path = binary_path.as_ref();
        match Self::try_init(path, Box::new(input), Box::new(output)) {
            Ok(vm) => {
                tracing::debug!(path = %path.display(), "loaded IJVM image");
                Some(vm)
            }
            Err(error) => {
                tracing::debug!(path = %path.display(), %error, "failed to load IJVM image");
                None
            }
        }
    }

    fn try_init(
        path: &Path,
        input: Box<dyn Read>,
        output: Box<dyn Write>,
    ) -> Result<Self, LoadError> {
        let image = loader::load_from_path(path)?;
        let mut stack = OperandStack::new();
        for _ in 0..BASE_REGION_WORDS {
            stack.push(0);
        }
        Ok(Ijvm {
            text: image.text,
            constant_pool: image.constant_pool,
            program_counter: 0,
            stack,
            lv_pointer: 0,
            halted: false,
            fault: None,
            heap: Heap::new(),
            input,
            output,
            logged_finish: false,
        })
    }

    /// Like `init`, but wires stdin/stdout as the I/O streams.
    pub fn init_std(binary_path: impl AsRef<Path>) -> Option<Self> {
        Self::init(binary_path, std::io::stdin(), std::io::stdout())
    }

    /// Releases the machine. A no-op kept for API parity with callers
    /// coming from the C-shaped interface this was distilled from -
    /// `Drop` already releases the owned text, constant pool, stack, and
    /// heap when `self` goes out of scope.
    pub fn destroy(self) {}

    pub fn get_text(&self) -> &[u8] {
        &self.text
    }

    pub fn get_text_size(&self) -> usize {
        self.text.len()
    }

    pub fn get_constant(&self, i: usize) -> Word {
        self.constant_pool[i]
    }

    pub fn get_program_counter(&self) -> usize {
        self.program_counter
    }

    /// The word at the top of the current frame's operand stack.
    pub fn tos(&self) -> Word {
        self.stack.tos()
    }

    pub fn get_local_variable(&self, i: usize) -> Word {
        self.stack.index(self.lv_pointer + i)
    }

    /// The opcode at the current program counter, without advancing it.
    pub fn get_instruction(&self) -> u8 {
        self.text.get(self.program_counter).copied().unwrap_or(0)
    }

    /// True once the machine has halted (cleanly, on a fault, or via
    /// `HALT`/`ERR`) or the program counter has reached the end of text.
    pub fn finished(&self) -> bool {
        self.halted || self.program_counter >= self.text.len()
    }

    /// True iff `reference` was freed by the most recent `GC` and no
    /// `NEWARRAY` has run since.
    pub fn is_heap_freed(&self, reference: Word) -> bool {
        self.heap.is_freed(reference)
    }

    /// The run-time fault that halted the machine, if any. Not part of
    /// the IJVM facade proper; exposed for this crate's own tests and for
    /// callers that want more than `finished()` without a debugger.
    pub fn fault(&self) -> Option<Fault> {
        self.fault
    }

    /// Roots for `GC`: every stack slot in `[0, top]` except the slots
    /// holding saved PC/LV pairs, found by walking the frame chain.
    fn collection_roots(&self) -> Vec<Word> {
        if self.stack.is_empty() {
            return Vec::new();
        }
        let top = self.stack.top() as usize;
        let mut is_metadata = vec![false; top + 1];
        let mut cur = self.lv_pointer;
        while cur != 0 {
            let link_target = self.stack.index(cur) as usize;
            if link_target < is_metadata.len() {
                is_metadata[link_target] = true;
            }
            if link_target + 1 < is_metadata.len() {
                is_metadata[link_target + 1] = true;
            }
            cur = self.stack.index(link_target + 1) as usize;
        }
        (0..=top)
            .filter(|&i| !is_metadata[i])
            .map(|i| self.stack.index(i))
            .collect()
    }
}
