//! Memory manager (segment table)
//!
//! Segmentation with paging over a simulated address space. Every process
//! owns one segment; a segment is an ordered array of fixed-capacity pages
//! holding the process's instructions. Addresses are instruction indices,
//! translated as `page = pc / page_capacity`, `offset = pc % page_capacity`.
//!
//! The table enforces a byte ceiling. When a load would exceed it, a
//! second-chance scan runs first: pages with their `used` bit set get the bit
//! cleared (one more cycle of grace), pages found unused have their bytes
//! reclaimed, in table order, until the incoming segment's size is covered or
//! the scan is exhausted. Under-reclamation is accepted - the remaining-byte
//! counter is signed and may go negative.

use super::process::Instr;

/// Segment identifier, declared by the process's program header.
///
/// Unique among live segments; ids may be reused after a segment is freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentId(pub u32);

impl std::fmt::Display for SegmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "seg:{}", self.0)
    }
}

/// A fixed-capacity page of instructions plus its reference bit.
#[derive(Debug)]
pub struct Page {
    code: Vec<Instr>,
    /// The eviction vote: set on fetch, cleared by the second-chance scan.
    used: bool,
}

impl Page {
    pub fn is_used(&self) -> bool {
        self.used
    }

    /// Test hook: force the reference bit to a known value.
    #[cfg(test)]
    pub fn set_used(&mut self, used: bool) {
        self.used = used;
    }
}

/// One process's virtual address space.
#[derive(Debug)]
pub struct Segment {
    pub id: SegmentId,
    /// Declared size in bytes, the quantity accounted against the ceiling.
    pub size_bytes: i64,
    pages: Vec<Page>,
}

impl Segment {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> impl Iterator<Item = &Page> {
        self.pages.iter()
    }

    #[cfg(test)]
    pub fn pages_mut(&mut self) -> impl Iterator<Item = &mut Page> {
        self.pages.iter_mut()
    }
}

/// A request to load a process's code into a fresh segment.
#[derive(Debug)]
pub struct LoadRequest {
    pub seg_id: SegmentId,
    /// Declared segment size in bytes.
    pub size_bytes: i64,
    pub code: Vec<Instr>,
}

/// What a load did, for the event stream.
#[derive(Debug, Clone, Copy)]
pub struct LoadOutcome {
    pub pages: usize,
    /// Bytes reclaimed by the eviction scan (zero when none was needed).
    pub reclaimed: i64,
}

/// The segment table: owner of every live segment.
#[derive(Debug)]
pub struct SegmentTable {
    /// Scan order for eviction is registration order.
    segments: Vec<Segment>,
    capacity: i64,
    /// Signed on purpose: accepted under-reclamation can drive this negative.
    remaining: i64,
    page_capacity: usize,
    page_bytes: i64,
}

impl SegmentTable {
    pub fn new(capacity: i64, page_capacity: usize, page_bytes: i64) -> Self {
        debug_assert!(page_capacity > 0 && page_bytes > 0);
        Self {
            segments: Vec::new(),
            capacity,
            remaining: capacity,
            page_capacity,
            page_bytes,
        }
    }

    pub fn capacity(&self) -> i64 {
        self.capacity
    }

    /// Bytes left under the ceiling; negative after accepted
    /// under-reclamation.
    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn page_capacity(&self) -> usize {
        self.page_capacity
    }

    /// Page number for a program counter.
    pub fn page_number(&self, pc: usize) -> usize {
        pc / self.page_capacity
    }

    /// Offset within the page for a program counter.
    pub fn page_offset(&self, pc: usize) -> usize {
        pc % self.page_capacity
    }

    /// Create and register a segment holding the request's code.
    ///
    /// Runs the second-chance scan first if the ceiling would be exceeded.
    /// Registering an id that is already live is a bookkeeping bug and
    /// aborts.
    pub fn load(&mut self, req: LoadRequest) -> LoadOutcome {
        if self.find(req.seg_id).is_some() {
            panic!("segment table corrupt: {} is already live", req.seg_id);
        }

        let reclaimed = if req.size_bytes > self.remaining {
            self.evict(req.size_bytes)
        } else {
            0
        };

        let mut pages = Vec::with_capacity(req.code.len().div_ceil(self.page_capacity));
        for chunk in req.code.chunks(self.page_capacity) {
            pages.push(Page {
                code: chunk.to_vec(),
                used: false,
            });
        }

        self.remaining -= req.size_bytes;
        log::debug!(
            "loaded {} ({} pages, {} bytes, {} remaining)",
            req.seg_id,
            pages.len(),
            req.size_bytes,
            self.remaining
        );

        let outcome = LoadOutcome {
            pages: pages.len(),
            reclaimed,
        };
        self.segments.push(Segment {
            id: req.seg_id,
            size_bytes: req.size_bytes,
            pages,
        });
        outcome
    }

    /// Second-chance scan over all live pages in table order.
    ///
    /// Used pages get their bit cleared and survive; unused pages count
    /// toward the reclaimed total. Stops once `needed` bytes are covered or
    /// the scan is exhausted; reclaiming less than requested is accepted.
    fn evict(&mut self, needed: i64) -> i64 {
        let mut reclaimed = 0;
        'scan: for seg in &mut self.segments {
            for page in &mut seg.pages {
                if reclaimed >= needed {
                    break 'scan;
                }
                if page.used {
                    page.used = false;
                } else {
                    reclaimed += self.page_bytes;
                }
            }
        }

        self.remaining += reclaimed;
        if reclaimed < needed {
            log::warn!(
                "eviction reclaimed {reclaimed} of {needed} bytes; proceeding under-reclaimed"
            );
        }
        reclaimed
    }

    pub fn find(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.iter().find(|s| s.id == id)
    }

    #[cfg(test)]
    pub fn find_mut(&mut self, id: SegmentId) -> Option<&mut Segment> {
        self.segments.iter_mut().find(|s| s.id == id)
    }

    /// Remove and release a segment, returning its bytes to the pool.
    /// Freeing an unknown id is a bookkeeping bug and aborts.
    pub fn free(&mut self, id: SegmentId) {
        let pos = match self.segments.iter().position(|s| s.id == id) {
            Some(pos) => pos,
            None => panic!("segment table corrupt: freeing unregistered {id}"),
        };
        let seg = self.segments.remove(pos);
        self.remaining += seg.size_bytes;
        log::debug!("freed {id} ({} bytes back, {} remaining)", seg.size_bytes, self.remaining);
    }

    /// Translate a program counter and fetch the instruction there, marking
    /// the page referenced. An address outside the segment is a bookkeeping
    /// bug (the CPU loop bounds the pc by the code length) and aborts.
    pub fn fetch(&mut self, id: SegmentId, pc: usize) -> Instr {
        let page_number = pc / self.page_capacity;
        let page_offset = pc % self.page_capacity;
        let seg = match self.segments.iter_mut().find(|s| s.id == id) {
            Some(seg) => seg,
            None => panic!("segment table corrupt: fetch from unregistered {id}"),
        };
        let page = match seg.pages.get_mut(page_number) {
            Some(page) => page,
            None => panic!("segment table corrupt: pc {pc} past the pages of {id}"),
        };
        let instr = match page.code.get(page_offset) {
            Some(instr) => instr.clone(),
            None => panic!("segment table corrupt: pc {pc} past the code of {id}"),
        };
        page.used = true;
        instr
    }
}
