// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Priority summary bitmap for the O(1) ready-queue lookup.
//!
//! The actual ready queues (intrusive, per-priority, FIFO) own task
//! pointers and so live in `kern` where a `Task` type exists. This module
//! owns only the 256-bit "is priority P non-empty" summary: 8 words of 32
//! bits each, word 7 holding priorities 224..255, bit 31 of each word
//! holding the highest priority in that word. Finding the highest
//! non-empty priority is then a word scan from most to least significant
//! plus one leading-zeros count, independent of how many tasks exist.
//!
//! Numerically higher priority means more important — the opposite
//! convention from some round-robin bitmap schedulers, so take care
//! porting logic from elsewhere: this one always picks the *highest* set
//! bit, never the lowest.

use abi::priority;

const WORDS: usize = priority::LEVELS / 32;

/// The 256-bit ready-priority summary plus per-priority non-empty counts.
///
/// Counts (rather than a single bit) are kept per priority so that two
/// tasks at the same priority don't cause the bit to clear when only one
/// of them leaves the ready set.
pub struct PriorityBitmap {
    words: [u32; WORDS],
    counts: [u16; priority::LEVELS],
}

impl Default for PriorityBitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityBitmap {
    pub const fn new() -> Self {
        Self {
            words: [0; WORDS],
            counts: [0; priority::LEVELS],
        }
    }

    fn word_index(p: u8) -> usize {
        p as usize / 32
    }

    fn bit_index(p: u8) -> u32 {
        p as u32 % 32
    }

    /// Records that one more task became ready at priority `p`.
    pub fn mark_ready(&mut self, p: u8) {
        self.counts[p as usize] += 1;
        self.words[Self::word_index(p)] |= 1 << Self::bit_index(p);
    }

    /// Records that one task at priority `p` left the ready set. The
    /// summary bit only clears once the count for that priority reaches
    /// zero. Calling this when the count is already zero is a no-op
    /// (idempotent, matching the spec's dequeue-from-empty-queue
    /// requirement never corrupting state).
    pub fn mark_not_ready(&mut self, p: u8) {
        if self.counts[p as usize] == 0 {
            return;
        }
        self.counts[p as usize] -= 1;
        if self.counts[p as usize] == 0 {
            self.words[Self::word_index(p)] &= !(1 << Self::bit_index(p));
        }
    }

    /// True if at least one task is ready at priority `p`.
    pub fn is_ready(&self, p: u8) -> bool {
        self.counts[p as usize] != 0
    }

    /// The highest priority with at least one ready task, or `None` if the
    /// ready set is entirely empty. Scans words from most to least
    /// significant (priority 255 downward) so the result is always the
    /// single highest priority currently ready, in O(1) word operations
    /// per populated word rather than a linear scan of all 256 priorities.
    pub fn highest_ready(&self) -> Option<u8> {
        for word_idx in (0..WORDS).rev() {
            let word = self.words[word_idx];
            if word != 0 {
                let bit = 31 - word.leading_zeros();
                return Some((word_idx * 32) as u8 + bit as u8);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bitmap_has_no_highest_ready() {
        let bm = PriorityBitmap::new();
        assert_eq!(bm.highest_ready(), None);
    }

    #[test]
    fn single_mark_is_reported_as_highest() {
        let mut bm = PriorityBitmap::new();
        bm.mark_ready(priority::DEFAULT);
        assert_eq!(bm.highest_ready(), Some(priority::DEFAULT));
    }

    #[test]
    fn higher_numeric_priority_wins_over_lower() {
        let mut bm = PriorityBitmap::new();
        bm.mark_ready(10);
        bm.mark_ready(200);
        bm.mark_ready(priority::IDLE);
        assert_eq!(bm.highest_ready(), Some(200));
    }

    #[test]
    fn bit_stays_set_while_any_task_remains_at_that_priority() {
        let mut bm = PriorityBitmap::new();
        bm.mark_ready(50);
        bm.mark_ready(50);
        bm.mark_not_ready(50);
        assert!(bm.is_ready(50), "one task still ready at priority 50");
        bm.mark_not_ready(50);
        assert!(!bm.is_ready(50));
    }

    #[test]
    fn highest_ready_falls_back_once_the_top_priority_drains() {
        let mut bm = PriorityBitmap::new();
        bm.mark_ready(200);
        bm.mark_ready(100);
        bm.mark_not_ready(200);
        assert_eq!(bm.highest_ready(), Some(100));
    }

    #[test]
    fn dequeue_from_already_empty_priority_does_not_panic_or_corrupt() {
        let mut bm = PriorityBitmap::new();
        bm.mark_not_ready(77);
        assert!(!bm.is_ready(77));
        bm.mark_ready(77);
        assert!(bm.is_ready(77));
    }

    #[test]
    fn top_of_highest_word_is_reachable() {
        let mut bm = PriorityBitmap::new();
        bm.mark_ready(255);
        assert_eq!(bm.highest_ready(), Some(255));
    }

    #[test]
    fn bottom_priority_is_reachable_when_alone() {
        let mut bm = PriorityBitmap::new();
        bm.mark_ready(priority::IDLE);
        assert_eq!(bm.highest_ready(), Some(priority::IDLE));
    }
}
