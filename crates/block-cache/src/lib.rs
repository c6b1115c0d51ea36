//! Gap-aware cache over the append-only block sequence.
//!
//! Slots are dense: each index is either filled or a hole that is known to exist but has not
//! been fetched. Queries report the holes they hit as coalesced ranges so a caller fetches
//! each gap with exactly one request.

use std::{fmt, ops::Range};

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::*;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockCacheError {
    #[error("range {from}+{take} overflows")]
    RangeOverflow { from: usize, take: usize },

    /// The source answered a range fetch with the wrong number of blocks.
    #[error("fetch of {take} blocks at {from} returned {got}")]
    ShortFetch {
        from: usize,
        take: usize,
        got: usize,
    },

    #[error("block source: {0}")]
    Source(String),
}

/// A contiguous run of indices.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MissingRange {
    pub from: usize,
    pub take: usize,
}

impl MissingRange {
    pub fn end(&self) -> usize {
        self.from + self.take
    }

    pub fn as_range(&self) -> Range<usize> {
        self.from..self.end()
    }
}

/// Answer to [`BlockCache::get_blocks`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockQuery<T> {
    /// One entry per requested index, `None` for holes.
    pub results: Vec<Option<T>>,
    /// Maximal runs of holes inside the request, in index order.
    pub missing: Vec<MissingRange>,
}

impl<T> BlockQuery<T> {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Where missing blocks are fetched from.
#[async_trait]
pub trait BlockSource<T>: Send + Sync {
    async fn fetch(&self, from: usize, take: usize) -> Result<Vec<T>, BlockCacheError>;
}

/// Dense cache of blocks keyed by position.
///
/// Reads may run concurrently. Writers must be serialised by the caller.
pub struct BlockCache<T> {
    slots: RwLock<Vec<Option<T>>>,
}

impl<T> fmt::Debug for BlockCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.read();
        f.debug_struct("BlockCache")
            .field("length", &slots.len())
            .field("filled", &slots.iter().filter(|s| s.is_some()).count())
            .finish()
    }
}

impl<T> Default for BlockCache<T> {
    fn default() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
        }
    }
}

impl<T: Clone> BlockCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares that at least `known_length` blocks exist. Never shrinks the sequence.
    pub fn init(&self, known_length: usize) {
        let mut slots = self.slots.write();
        if slots.len() < known_length {
            slots.resize_with(known_length, || None);
        }
    }

    /// Stores `blocks` at `[from_index, from_index + blocks.len())`, growing as needed.
    pub fn add_blocks(&self, blocks: Vec<T>, from_index: usize) -> Result<(), BlockCacheError> {
        let end = from_index
            .checked_add(blocks.len())
            .ok_or(BlockCacheError::RangeOverflow {
                from: from_index,
                take: blocks.len(),
            })?;

        let mut slots = self.slots.write();
        if slots.len() < end {
            slots.resize_with(end, || None);
        }
        for (slot, block) in slots[from_index..end].iter_mut().zip(blocks) {
            *slot = Some(block);
        }
        Ok(())
    }

    /// Appends one block after the current end.
    pub fn push(&self, block: T) -> usize {
        let mut slots = self.slots.write();
        slots.push(Some(block));
        slots.len() - 1
    }

    /// Returns the slots in `[from, from + take)` and the holes among them.
    ///
    /// Indices at or past the current length count as holes.
    pub fn get_blocks(&self, from: usize, take: usize) -> Result<BlockQuery<T>, BlockCacheError> {
        let end = from
            .checked_add(take)
            .ok_or(BlockCacheError::RangeOverflow { from, take })?;

        let slots = self.slots.read();
        let mut results = Vec::with_capacity(take);
        let mut missing: Vec<MissingRange> = Vec::new();

        for idx in from..end {
            let slot = slots.get(idx).cloned().flatten();
            if slot.is_none() {
                match missing.last_mut() {
                    Some(run) if run.end() == idx => run.take += 1,
                    _ => missing.push(MissingRange { from: idx, take: 1 }),
                }
            }
            results.push(slot);
        }

        Ok(BlockQuery { results, missing })
    }

    /// Index of the last known block.
    pub fn latest_index(&self) -> Option<usize> {
        self.slots.read().len().checked_sub(1)
    }

    pub fn length(&self) -> usize {
        self.slots.read().len()
    }

    /// Answers `[from, from + take)`, fetching each missing run from `source` once.
    pub async fn get_or_fetch<S>(
        &self,
        source: &S,
        from: usize,
        take: usize,
    ) -> Result<Vec<T>, BlockCacheError>
    where
        S: BlockSource<T> + ?Sized,
    {
        let query = self.get_blocks(from, take)?;
        for range in &query.missing {
            let blocks = source.fetch(range.from, range.take).await?;
            if blocks.len() != range.take {
                return Err(BlockCacheError::ShortFetch {
                    from: range.from,
                    take: range.take,
                    got: blocks.len(),
                });
            }
            debug!(from = range.from, take = range.take, "filled block range");
            self.add_blocks(blocks, range.from)?;
        }

        let query = self.get_blocks(from, take)?;
        if let Some(range) = query.missing.first() {
            // another writer punched a hole between the fetch and the re-read
            return Err(BlockCacheError::ShortFetch {
                from: range.from,
                take: range.take,
                got: 0,
            });
        }
        Ok(query.results.into_iter().flatten().collect())
    }
}
