//! Text ID allocation.
//!
//! One allocator lives for one run. It is seeded from the highest stored
//! text ID and hands out strictly increasing IDs after it. There is no
//! coordination with other processes; the mirror has a single writer.

use sync_types::TextId;

/// Per-run generator of text blob IDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextIdAllocator {
    last: TextId,
    allocated: u64,
}

impl TextIdAllocator {
    /// Seed from the current maximum stored ID (`None` for an empty store).
    pub fn seeded(max_stored: Option<TextId>) -> Self {
        Self {
            last: max_stored.unwrap_or(TextId::new(0)),
            allocated: 0,
        }
    }

    /// Hand out the next ID.
    pub fn allocate(&mut self) -> TextId {
        self.last = self.last.next();
        self.allocated += 1;
        self.last
    }

    /// Number of IDs handed out so far.
    pub fn allocated(&self) -> u64 {
        self.allocated
    }
}
