//! Shuffle order
//!
//! A `ShuffleOrder` is a permutation over playlist indices that survives
//! insertions and removals through cloning. The facade owns the authoritative
//! order and ships boxed clones to the engine with every playlist command, so
//! both sides always agree on the playback order.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use riff_common::RepeatMode;

/// Permutation over playlist indices.
///
/// The invariant `order.len() == playlist.len()` is maintained by the
/// playlist store; implementations only have to keep their permutation
/// consistent under `clone_and_insert` / `clone_and_remove`.
pub trait ShuffleOrder: Send {
    /// Number of indices covered by the permutation.
    fn len(&self) -> usize;

    /// Index played after `index`. `None` means the order is exhausted.
    fn next_index(&self, index: usize, repeat_mode: RepeatMode) -> Option<usize>;

    /// Index played before `index`.
    fn previous_index(&self, index: usize, repeat_mode: RepeatMode) -> Option<usize>;

    /// First index in playback order.
    fn first_index(&self) -> Option<usize>;

    /// Last index in playback order.
    fn last_index(&self) -> Option<usize>;

    /// Copy of this order with `count` fresh indices inserted at
    /// `insertion_index` (playlist position).
    fn clone_and_insert(&self, insertion_index: usize, count: usize) -> Box<dyn ShuffleOrder>;

    /// Copy of this order with the playlist range `[from, to)` removed.
    fn clone_and_remove(&self, from: usize, to: usize) -> Box<dyn ShuffleOrder>;

    /// Plain copy.
    fn clone_box(&self) -> Box<dyn ShuffleOrder>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Full playback order of a shuffle order, first to last.
pub fn playback_order(order: &dyn ShuffleOrder) -> Vec<usize> {
    let mut result = Vec::with_capacity(order.len());
    let mut index = order.first_index();
    while let Some(i) = index {
        result.push(i);
        index = order.next_index(i, RepeatMode::Off);
    }
    result
}

/// Seeded random permutation.
#[derive(Debug, Clone)]
pub struct DefaultShuffleOrder {
    /// `shuffled[k]` is the playlist index played at order position `k`.
    shuffled: Vec<usize>,
    seed: u64,
}

impl DefaultShuffleOrder {
    /// Random order over `length` indices with a caller-provided seed.
    pub fn with_seed(length: usize, seed: u64) -> Self {
        let mut shuffled: Vec<usize> = (0..length).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        shuffled.shuffle(&mut rng);
        Self { shuffled, seed }
    }

    /// Random order over `length` indices.
    pub fn new(length: usize) -> Self {
        Self::with_seed(length, rand::thread_rng().gen())
    }

    fn position_of(&self, index: usize) -> Option<usize> {
        self.shuffled.iter().position(|&i| i == index)
    }

    fn step(&self, index: usize, repeat_mode: RepeatMode, forward: bool) -> Option<usize> {
        if self.shuffled.is_empty() {
            return None;
        }
        if repeat_mode == RepeatMode::One {
            return Some(index);
        }
        let position = self.position_of(index)?;
        let stepped = if forward {
            position + 1
        } else if position == 0 {
            self.shuffled.len()
        } else {
            position - 1
        };
        if stepped < self.shuffled.len() {
            Some(self.shuffled[stepped])
        } else if repeat_mode == RepeatMode::All {
            Some(if forward {
                self.shuffled[0]
            } else {
                self.shuffled[self.shuffled.len() - 1]
            })
        } else {
            None
        }
    }
}

impl ShuffleOrder for DefaultShuffleOrder {
    fn len(&self) -> usize {
        self.shuffled.len()
    }

    fn next_index(&self, index: usize, repeat_mode: RepeatMode) -> Option<usize> {
        self.step(index, repeat_mode, true)
    }

    fn previous_index(&self, index: usize, repeat_mode: RepeatMode) -> Option<usize> {
        self.step(index, repeat_mode, false)
    }

    fn first_index(&self) -> Option<usize> {
        self.shuffled.first().copied()
    }

    fn last_index(&self) -> Option<usize> {
        self.shuffled.last().copied()
    }

    fn clone_and_insert(&self, insertion_index: usize, count: usize) -> Box<dyn ShuffleOrder> {
        // Existing indices at or above the insertion point shift up; fresh
        // indices land at random order positions.
        let mut shuffled: Vec<usize> = self
            .shuffled
            .iter()
            .map(|&i| if i >= insertion_index { i + count } else { i })
            .collect();
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(shuffled.len() as u64 + 1));
        for n in 0..count {
            let order_position = rng.gen_range(0..=shuffled.len());
            shuffled.insert(order_position, insertion_index + n);
        }
        Box::new(Self {
            shuffled,
            seed: self.seed,
        })
    }

    fn clone_and_remove(&self, from: usize, to: usize) -> Box<dyn ShuffleOrder> {
        let removed = to - from;
        let shuffled = self
            .shuffled
            .iter()
            .filter(|&&i| i < from || i >= to)
            .map(|&i| if i >= to { i - removed } else { i })
            .collect();
        Box::new(Self {
            shuffled,
            seed: self.seed,
        })
    }

    fn clone_box(&self) -> Box<dyn ShuffleOrder> {
        Box::new(self.clone())
    }
}

/// Identity order: playback order equals playlist order.
#[derive(Debug, Clone)]
pub struct UnshuffledOrder {
    length: usize,
}

impl UnshuffledOrder {
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

impl ShuffleOrder for UnshuffledOrder {
    fn len(&self) -> usize {
        self.length
    }

    fn next_index(&self, index: usize, repeat_mode: RepeatMode) -> Option<usize> {
        if self.length == 0 {
            return None;
        }
        match repeat_mode {
            RepeatMode::One => Some(index),
            _ if index + 1 < self.length => Some(index + 1),
            RepeatMode::All => Some(0),
            RepeatMode::Off => None,
        }
    }

    fn previous_index(&self, index: usize, repeat_mode: RepeatMode) -> Option<usize> {
        if self.length == 0 {
            return None;
        }
        match repeat_mode {
            RepeatMode::One => Some(index),
            _ if index > 0 => Some(index - 1),
            RepeatMode::All => Some(self.length - 1),
            RepeatMode::Off => None,
        }
    }

    fn first_index(&self) -> Option<usize> {
        (self.length > 0).then_some(0)
    }

    fn last_index(&self) -> Option<usize> {
        self.length.checked_sub(1)
    }

    fn clone_and_insert(&self, _insertion_index: usize, count: usize) -> Box<dyn ShuffleOrder> {
        Box::new(Self {
            length: self.length + count,
        })
    }

    fn clone_and_remove(&self, from: usize, to: usize) -> Box<dyn ShuffleOrder> {
        Box::new(Self {
            length: self.length - (to - from),
        })
    }

    fn clone_box(&self) -> Box<dyn ShuffleOrder> {
        Box::new(self.clone())
    }
}
