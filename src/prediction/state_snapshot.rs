use crate::game_logic::WorldState;
use crate::prediction::interpolation::interpolate_world;
use std::collections::VecDeque;

/// An authoritative world as it was received, stamped with the local clock
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub time: f64,
    pub world: WorldState,
}

/// Ring buffer of recent authoritative states for time-shifted rendering
///
/// Remote bodies are drawn a little in the past so there are usually two
/// received states to blend between, even when STATE messages arrive
/// sparsely or late. Once full, the oldest snapshot is dropped.
#[derive(Clone, Debug)]
pub struct SnapshotBuffer {
    buffer: VecDeque<Snapshot>,
    max_size: usize,
}

impl SnapshotBuffer {
    /// Create a buffer holding at most `max_size` snapshots (at least one)
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            buffer: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    /// Record a world received at local time `time`
    pub fn push(&mut self, time: f64, world: WorldState) {
        self.buffer.push_back(Snapshot { time, world });

        // Maintain maximum buffer size
        while self.buffer.len() > self.max_size {
            self.buffer.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.buffer.back()
    }

    pub fn oldest(&self) -> Option<&Snapshot> {
        self.buffer.front()
    }

    /// The consecutive pair with `a.time <= target <= b.time`, if any
    pub fn bracket(&self, target: f64) -> Option<(&Snapshot, &Snapshot)> {
        self.buffer
            .iter()
            .zip(self.buffer.iter().skip(1))
            .find(|(a, b)| a.time <= target && target <= b.time)
    }

    /// The world as it looked at `target`.
    ///
    /// Blends the two snapshots bracketing `target`. Outside the buffered
    /// range this is the latest snapshot as-is, never an extrapolation.
    pub fn sample(&self, target: f64) -> Option<WorldState> {
        match self.bracket(target) {
            Some((a, b)) => Some(interpolate_world(a, b, target)),
            None => self.latest().map(|s| s.world.clone()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.buffer.iter()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
