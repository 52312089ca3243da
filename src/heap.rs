//! A heap of integer arrays keyed by opaque, monotonically increasing
//! references, collected by a precise mark-and-sweep cycle (`GC`). See
//! `Ijvm::collection_roots` in `lib.rs` for how roots are gathered from the
//! operand/call stack.

use crate::error::Fault;
use crate::stack::Word;

/// First reference issued by a fresh heap. References before this value
/// never occur, so 0 is safe to use as "no reference" on the stack.
const FIRST_REFERENCE: Word = 100;

#[derive(Debug)]
pub struct HeapObject {
    pub reference: Word,
    pub data: Vec<Word>,
    marked: bool,
}

impl HeapObject {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug)]
pub struct Heap {
    objects: Vec<HeapObject>,
    next_ref: Word,
    /// References freed by the most recent collection. Cleared by the
    /// next allocation, per the freed-reference log contract.
    freed_refs: Vec<Word>,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            objects: Vec::new(),
            next_ref: FIRST_REFERENCE,
            freed_refs: Vec::new(),
        }
    }

    /// Allocates a new zero-filled array of `count` words and returns its
    /// reference. Resets the freed-reference log, per the spec.
    pub fn allocate(&mut self, count: i32) -> Result<Word, Fault> {
        if count < 0 {
            return Err(Fault::NegativeArrayCount(count));
        }
        let reference = self.next_ref;
        self.next_ref += 1;
        self.objects.push(HeapObject {
            reference,
            data: vec![0; count as usize],
            marked: false,
        });
        self.freed_refs.clear();
        Ok(reference)
    }

    fn index_of(&self, reference: Word) -> Option<usize> {
        self.objects.iter().position(|o| o.reference == reference)
    }

    pub fn get(&self, reference: Word) -> Option<&HeapObject> {
        self.index_of(reference).map(|i| &self.objects[i])
    }

    pub fn load(&self, reference: Word, index: i32) -> Result<Word, Fault> {
        let obj = self
            .get(reference)
            .ok_or(Fault::UnknownReference(reference))?;
        if index < 0 || index as usize >= obj.size() {
            return Err(Fault::ArrayIndexOutOfBounds {
                index,
                size: obj.size(),
            });
        }
        Ok(obj.data[index as usize])
    }

    pub fn store(&mut self, reference: Word, index: i32, value: Word) -> Result<(), Fault> {
        let idx = self.index_of(reference).ok_or(Fault::UnknownReference(reference))?;
        let size = self.objects[idx].size();
        if index < 0 || index as usize >= size {
            return Err(Fault::ArrayIndexOutOfBounds { index, size });
        }
        self.objects[idx].data[index as usize] = value;
        Ok(())
    }

    /// True iff `reference` was freed by the most recent collection and no
    /// allocation has happened since.
    pub fn is_freed(&self, reference: Word) -> bool {
        self.freed_refs.contains(&reference)
    }

    /// Runs one mark-and-sweep cycle. `roots` are the stack slots that are
    /// not frame metadata - see `Ijvm::collection_roots` for how those are
    /// identified by walking the frame chain.
    ///
    /// Returns `(kept, freed)` object counts for logging.
    pub fn collect(&mut self, roots: &[Word]) -> (usize, usize) {
        for obj in &mut self.objects {
            obj.marked = false;
        }

        let mut worklist: Vec<Word> = roots.to_vec();
        while let Some(candidate) = worklist.pop() {
            if let Some(idx) = self.index_of(candidate) {
                if !self.objects[idx].marked {
                    self.objects[idx].marked = true;
                    worklist.extend_from_slice(&self.objects[idx].data);
                }
            }
        }

        let mut freed = Vec::new();
        self.objects.retain_mut(|obj| {
            if obj.marked {
                obj.marked = false;
                true
            } else {
                freed.push(obj.reference);
                false
            }
        });

        let kept = self.objects.len();
        let freed_count = freed.len();
        self.freed_refs = freed;
        (kept, freed_count)
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_yields_increasing_references() {
        let mut h = Heap::new();
        let a = h.allocate(4).unwrap();
        let b = h.allocate(0).unwrap();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn negative_count_is_an_error() {
        let mut h = Heap::new();
        assert!(h.allocate(-1).is_err());
    }

    #[test]
    fn load_store_roundtrip() {
        let mut h = Heap::new();
        let r = h.allocate(3).unwrap();
        h.store(r, 1, 42).unwrap();
        assert_eq!(h.load(r, 1).unwrap(), 42);
    }

    #[test]
    fn out_of_bounds_access_errors() {
        let mut h = Heap::new();
        let r = h.allocate(2).unwrap();
        assert!(h.load(r, 2).is_err());
        assert!(h.load(r, -1).is_err());
    }

    #[test]
    fn collect_frees_unreachable_objects() {
        let mut h = Heap::new();
        let a = h.allocate(1).unwrap();
        let _b = h.allocate(1).unwrap();
        let (kept, freed) = h.collect(&[a]);
        assert_eq!(kept, 1);
        assert_eq!(freed, 1);
        assert!(h.is_freed(_b));
        assert!(!h.is_freed(a));
    }

    #[test]
    fn collect_follows_references_through_array_data() {
        let mut h = Heap::new();
        let a = h.allocate(1).unwrap();
        let b = h.allocate(1).unwrap();
        h.store(a, 0, b).unwrap();
        let (kept, freed) = h.collect(&[a]);
        assert_eq!(kept, 2);
        assert_eq!(freed, 0);
    }

    #[test]
    fn allocation_clears_freed_log() {
        let mut h = Heap::new();
        let a = h.allocate(1).unwrap();
        h.collect(&[]);
        assert!(h.is_freed(a));
        h.allocate(0).unwrap();
        assert!(!h.is_freed(a));
    }
}
