//! Queue Manager
//!
//! Owns track ordering, the derived shuffle permutation, repeat mode,
//! and the bounded history used by "previous". Answers what plays after
//! the current track; the playback engine is the sole caller of
//! `advance` at transition boundaries.
//!
//! Shuffle order is always a bijection over the current index set, with
//! the currently playing index a valid member of both orders. Mutating
//! the underlying sequence regenerates the permutation and re-resolves
//! the current track by identity, not position.

use crate::error::{Error, Result};
use cadenza_common::{RepeatMode, Track};
use rand::seq::SliceRandom;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Derived play order while shuffle is enabled.
#[derive(Debug, Clone)]
struct ShuffleOrder {
    /// Permutation of queue indices
    order: Vec<usize>,
    /// Position of the current index within `order`
    pos: usize,
}

/// Result of removing a queue entry.
#[derive(Debug)]
pub struct RemoveOutcome {
    /// The entry that was removed
    pub removed: Arc<Track>,

    /// The removed entry was the one currently playing
    pub was_current: bool,

    /// What should play instead, when the current entry was removed
    /// (None = nothing left to play; the engine stops)
    pub replacement: Option<Arc<Track>>,
}

/// Track ordering, shuffle permutation, repeat mode, and history.
pub struct QueueManager {
    entries: Vec<Arc<Track>>,
    current: Option<usize>,
    shuffle: Option<ShuffleOrder>,
    /// Next shuffle cycle, generated lazily at a cycle boundary under
    /// RepeatAll so peek_next and advance agree on the same order
    pending_cycle: Option<Vec<usize>>,
    repeat: RepeatMode,
    history: VecDeque<usize>,
    history_depth: usize,
}

impl QueueManager {
    pub fn new(history_depth: usize) -> Self {
        Self {
            entries: Vec::new(),
            current: None,
            shuffle: None,
            pending_cycle: None,
            repeat: RepeatMode::Off,
            history: VecDeque::new(),
            history_depth: history_depth.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Arc<Track>] {
        &self.entries
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat
    }

    pub fn shuffle_enabled(&self) -> bool {
        self.shuffle.is_some()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// The track at the current index, or None on an empty queue.
    pub fn current(&self) -> Option<Arc<Track>> {
        self.current.and_then(|i| self.entries.get(i).cloned())
    }

    /// The track that would play after the current one, or None at end
    /// of queue.
    pub fn peek_next(&mut self) -> Option<Arc<Track>> {
        match self.repeat {
            RepeatMode::One => self.current(),
            _ => {
                let idx = self.next_index()?;
                self.entries.get(idx).cloned()
            }
        }
    }

    /// Commit `peek_next` as current: push the prior index onto history
    /// and return the new current track. None means end of queue (the
    /// current index stays where it is).
    pub fn advance(&mut self) -> Option<Arc<Track>> {
        let cur = self.current?;
        if self.repeat == RepeatMode::One {
            self.push_history(cur);
            trace!("advance: repeat-one stays at index {}", cur);
            return self.current();
        }

        let next = self.next_index()?;
        if let Some(sh) = &mut self.shuffle {
            if sh.pos + 1 < sh.order.len() {
                sh.pos += 1;
            } else if let Some(cycle) = self.pending_cycle.take() {
                // new cycle begins; the cached order already excludes the
                // just-played index from position 0
                sh.order = cycle;
                sh.pos = 0;
            }
            debug_assert_eq!(sh.order[sh.pos], next);
        }
        self.push_history(cur);
        self.current = Some(next);
        debug!("advance: index {} -> {}", cur, next);
        self.current()
    }

    /// Undo forward progress: pop history and return the restored track.
    /// With empty history, returns the current track (the engine
    /// restarts it from position 0 rather than wrapping backward).
    pub fn previous(&mut self) -> Option<Arc<Track>> {
        self.current?;
        if let Some(prev) = self.history.pop_back() {
            debug!("previous: restoring index {}", prev);
            self.current = Some(prev);
            if let Some(sh) = &mut self.shuffle {
                if let Some(p) = sh.order.iter().position(|&i| i == prev) {
                    sh.pos = p;
                }
            }
            self.pending_cycle = None;
        }
        self.current()
    }

    /// Pure state change; what "next" means is re-evaluated lazily.
    pub fn set_repeat(&mut self, mode: RepeatMode) {
        if self.repeat != mode {
            debug!("repeat mode: {} -> {}", self.repeat, mode);
            self.repeat = mode;
            self.pending_cycle = None;
        }
    }

    /// Toggling on generates a fresh permutation with the current index
    /// fixed at the front; toggling off preserves the current index
    /// unchanged.
    pub fn set_shuffle(&mut self, enabled: bool) {
        if enabled == self.shuffle.is_some() {
            return;
        }
        debug!("shuffle {}", if enabled { "on" } else { "off" });
        if enabled {
            self.shuffle = Some(ShuffleOrder {
                order: Vec::new(),
                pos: 0,
            });
            self.regenerate_shuffle();
        } else {
            self.shuffle = None;
            self.pending_cycle = None;
        }
    }

    /// Insert a track at `index` (clamped to the queue length).
    ///
    /// The first insertion into an empty queue makes the new entry
    /// current.
    pub fn insert(&mut self, index: usize, track: Arc<Track>) {
        let index = index.min(self.entries.len());
        self.entries.insert(index, track);
        self.remap_indices(|i| if i >= index { Some(i + 1) } else { Some(i) });
        if self.current.is_none() {
            self.current = Some(index);
        }
        self.regenerate_shuffle();
        trace!("insert at {}: queue len {}", index, self.entries.len());
    }

    /// Append a track at the end of the queue.
    pub fn push(&mut self, track: Arc<Track>) {
        self.insert(self.entries.len(), track);
    }

    /// Remove the entry at `index`.
    ///
    /// Removing the currently playing entry reports the replacement (what
    /// `peek_next` reported before removal) so the engine can force a
    /// transition or stop.
    pub fn remove(&mut self, index: usize) -> Result<RemoveOutcome> {
        if index >= self.entries.len() {
            return Err(Error::InvalidCommand(format!(
                "remove index {} out of range (len {})",
                index,
                self.entries.len()
            )));
        }
        let was_current = self.current == Some(index);

        // Pick the replacement before the removal disturbs the order.
        // Repeat-one would name the removed entry itself, so it falls
        // back to the sequential/shuffle successor.
        let replacement_idx = if was_current {
            match self.repeat {
                RepeatMode::One => {
                    let saved = self.repeat;
                    self.repeat = RepeatMode::Off;
                    let idx = self.next_index();
                    self.repeat = saved;
                    idx
                }
                _ => self.next_index(),
            }
        } else {
            None
        };

        let removed = self.entries.remove(index);
        self.remap_indices(|i| {
            use std::cmp::Ordering::*;
            match i.cmp(&index) {
                Less => Some(i),
                Equal => None,
                Greater => Some(i - 1),
            }
        });
        if was_current {
            self.current = replacement_idx.and_then(|r| {
                use std::cmp::Ordering::*;
                match r.cmp(&index) {
                    Less => Some(r),
                    Equal => None,
                    Greater => Some(r - 1),
                }
            });
        }
        self.regenerate_shuffle();
        debug!(
            "removed index {} (was_current: {}), queue len {}",
            index,
            was_current,
            self.entries.len()
        );
        Ok(RemoveOutcome {
            removed,
            was_current,
            replacement: if was_current { self.current() } else { None },
        })
    }

    /// Move the entry at `from` to position `to`, preserving the
    /// relative order of untouched entries.
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<()> {
        let len = self.entries.len();
        if from >= len || to >= len {
            return Err(Error::InvalidCommand(format!(
                "reorder {} -> {} out of range (len {})",
                from, to, len
            )));
        }
        if from == to {
            return Ok(());
        }
        let entry = self.entries.remove(from);
        self.entries.insert(to, entry);
        self.remap_indices(|i| {
            if i == from {
                Some(to)
            } else if from < to {
                if i > from && i <= to {
                    Some(i - 1)
                } else {
                    Some(i)
                }
            } else if i >= to && i < from {
                Some(i + 1)
            } else {
                Some(i)
            }
        });
        self.regenerate_shuffle();
        trace!("reordered {} -> {}", from, to);
        Ok(())
    }

    /// Re-resolve the current index by track identity. Used by the
    /// engine when the audio pipeline commits a track that queue edits
    /// may have moved.
    pub fn resync_current(&mut self, id: Uuid) {
        if self.current().map(|t| t.id) == Some(id) {
            return;
        }
        if let Some(idx) = self.entries.iter().position(|t| t.id == id) {
            self.current = Some(idx);
            self.regenerate_shuffle();
        }
    }

    /// Index of the first entry with the given track id.
    pub fn index_of(&self, id: Uuid) -> Option<usize> {
        self.entries.iter().position(|t| t.id == id)
    }

    /// Make sure a non-empty queue has a current index (used by play()
    /// after the current entry was removed with nothing to follow).
    pub fn ensure_current(&mut self) -> Result<Arc<Track>> {
        if self.entries.is_empty() {
            return Err(Error::QueueEmpty);
        }
        if self.current.is_none() {
            self.current = Some(0);
            self.regenerate_shuffle();
        }
        Ok(self.current().expect("current set above"))
    }

    /// Shuffle permutation, for diagnostics and invariant checks.
    pub fn shuffle_order(&self) -> Option<&[usize]> {
        self.shuffle.as_ref().map(|s| s.order.as_slice())
    }

    fn push_history(&mut self, index: usize) {
        if self.history.len() == self.history_depth {
            self.history.pop_front();
        }
        self.history.push_back(index);
    }

    /// The index that would play after current, honoring shuffle and
    /// repeat-all wrap. Repeat-one is dispatched by the callers.
    fn next_index(&mut self) -> Option<usize> {
        let cur = self.current?;
        let len = self.entries.len();
        match &self.shuffle {
            Some(sh) if sh.pos + 1 < sh.order.len() => Some(sh.order[sh.pos + 1]),
            Some(_) => {
                if self.repeat == RepeatMode::All && len > 0 {
                    if self.pending_cycle.is_none() {
                        self.pending_cycle = Some(Self::shuffled_cycle(len, cur));
                    }
                    self.pending_cycle.as_ref().and_then(|c| c.first().copied())
                } else {
                    None
                }
            }
            None => {
                if cur + 1 < len {
                    Some(cur + 1)
                } else if self.repeat == RepeatMode::All && len > 0 {
                    Some(0)
                } else {
                    None
                }
            }
        }
    }

    /// Fresh permutation for a wrapped repeat-all cycle, avoiding an
    /// immediate repeat of `just_played` at position 0.
    fn shuffled_cycle(len: usize, just_played: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(&mut rand::thread_rng());
        if len > 1 && order[0] == just_played {
            let last = len - 1;
            order.swap(0, last);
        }
        order
    }

    /// Rebuild the shuffle permutation after a queue mutation or a
    /// shuffle toggle, fixing the current index at the front.
    fn regenerate_shuffle(&mut self) {
        if self.shuffle.is_none() {
            return;
        }
        self.pending_cycle = None;
        let len = self.entries.len();
        let mut order: Vec<usize> = (0..len).collect();
        if let Some(cur) = self.current {
            order.retain(|&i| i != cur);
            order.shuffle(&mut rand::thread_rng());
            order.insert(0, cur);
        } else {
            order.shuffle(&mut rand::thread_rng());
        }
        self.shuffle = Some(ShuffleOrder { order, pos: 0 });
    }

    /// Apply an index mapping to the current index and history after a
    /// queue mutation; history entries for vanished indices are dropped.
    fn remap_indices(&mut self, map: impl Fn(usize) -> Option<usize>) {
        self.current = self.current.and_then(&map);
        let remapped: VecDeque<usize> = self.history.iter().filter_map(|&i| map(i)).collect();
        self.history = remapped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(name: &str) -> Arc<Track> {
        Arc::new(Track::new(format!("/music/{name}.flac"), 44100, 2))
    }

    fn queue_with(names: &[&str]) -> QueueManager {
        let mut q = QueueManager::new(8);
        for name in names {
            q.push(track(name));
        }
        q
    }

    fn assert_permutation(q: &QueueManager) {
        let order = q.shuffle_order().expect("shuffle enabled");
        let mut seen = vec![false; q.len()];
        assert_eq!(order.len(), q.len());
        for &i in order {
            assert!(i < q.len());
            assert!(!seen[i], "duplicate index {} in shuffle order", i);
            seen[i] = true;
        }
    }

    #[test]
    fn empty_queue_reports_empty() {
        let mut q = QueueManager::new(8);
        assert!(q.current().is_none());
        assert!(q.peek_next().is_none());
        assert!(q.advance().is_none());
        assert!(q.previous().is_none());
    }

    #[test]
    fn repeat_one_peeks_current_for_any_shuffle_state() {
        let mut q = queue_with(&["a", "b", "c"]);
        q.set_repeat(RepeatMode::One);
        let cur = q.current().unwrap();
        assert_eq!(q.peek_next().unwrap().id, cur.id);
        q.set_shuffle(true);
        assert_eq!(q.peek_next().unwrap().id, cur.id);
        assert_eq!(q.advance().unwrap().id, cur.id);
    }

    #[test]
    fn sequential_advance_and_repeat_all_wrap() {
        let mut q = queue_with(&["a", "b"]);
        assert_eq!(q.current_index(), Some(0));
        q.advance().unwrap();
        assert_eq!(q.current_index(), Some(1));
        assert!(q.peek_next().is_none(), "repeat off: no wrap");
        assert!(q.advance().is_none());
        assert_eq!(q.current_index(), Some(1));

        q.set_repeat(RepeatMode::All);
        assert_eq!(q.peek_next().unwrap().id, q.entries()[0].id);
        q.advance().unwrap();
        assert_eq!(q.current_index(), Some(0));
    }

    #[test]
    fn shuffle_cycle_visits_every_index_once() {
        let mut q = queue_with(&["a", "b", "c", "d", "e"]);
        q.set_shuffle(true);
        assert_permutation(&q);
        assert_eq!(q.shuffle_order().unwrap()[0], 0, "current fixed at front");

        let mut visited = vec![q.current_index().unwrap()];
        while q.peek_next().is_some() {
            q.advance().unwrap();
            visited.push(q.current_index().unwrap());
        }
        visited.sort_unstable();
        assert_eq!(visited, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn shuffle_repeat_all_reshuffles_without_immediate_repeat() {
        let mut q = queue_with(&["a", "b", "c", "d"]);
        q.set_shuffle(true);
        q.set_repeat(RepeatMode::All);
        // drain the first cycle
        for _ in 0..3 {
            q.advance().unwrap();
        }
        let last = q.current_index().unwrap();
        // peek and advance must agree at the cycle boundary
        let peeked = q.peek_next().unwrap();
        let advanced = q.advance().unwrap();
        assert_eq!(peeked.id, advanced.id);
        assert_ne!(q.current_index().unwrap(), last, "no immediate repeat");
        assert_permutation(&q);
    }

    #[test]
    fn previous_pops_history_then_restarts() {
        let mut q = queue_with(&["a", "b", "c"]);
        q.advance().unwrap();
        q.advance().unwrap();
        assert_eq!(q.current_index(), Some(2));
        assert_eq!(q.history_len(), 2);

        q.previous().unwrap();
        assert_eq!(q.current_index(), Some(1));
        assert_eq!(q.history_len(), 1);
        q.previous().unwrap();
        assert_eq!(q.current_index(), Some(0));
        assert_eq!(q.history_len(), 0);
        // empty history: stays at the first position
        q.previous().unwrap();
        assert_eq!(q.current_index(), Some(0));
    }

    #[test]
    fn history_is_bounded() {
        let mut q = queue_with(&["a", "b"]);
        q.set_repeat(RepeatMode::All);
        for _ in 0..50 {
            q.advance().unwrap();
        }
        assert_eq!(q.history_len(), 8);
    }

    #[test]
    fn mutations_keep_current_identity_and_permutation() {
        let mut q = queue_with(&["a", "b", "c", "d"]);
        q.advance().unwrap();
        let playing = q.current().unwrap();
        q.set_shuffle(true);

        q.insert(0, track("x"));
        assert_eq!(q.current().unwrap().id, playing.id);
        assert_permutation(&q);

        q.reorder(0, 4).unwrap();
        assert_eq!(q.current().unwrap().id, playing.id);
        assert_permutation(&q);

        let idx = q.index_of(playing.id).unwrap();
        let other = (idx + 1) % q.len();
        q.remove(other).unwrap();
        assert_eq!(q.current().unwrap().id, playing.id);
        assert_permutation(&q);
    }

    #[test]
    fn removing_current_reports_replacement() {
        let mut q = queue_with(&["a", "b", "c"]);
        let b = q.entries()[1].clone();
        let outcome = q.remove(0).unwrap();
        assert!(outcome.was_current);
        assert_eq!(outcome.replacement.unwrap().id, b.id);
        assert_eq!(q.current().unwrap().id, b.id);
    }

    #[test]
    fn removing_last_current_with_repeat_off_leaves_nothing() {
        let mut q = queue_with(&["a"]);
        let outcome = q.remove(0).unwrap();
        assert!(outcome.was_current);
        assert!(outcome.replacement.is_none());
        assert!(q.is_empty());
        assert!(q.current().is_none());
    }

    #[test]
    fn remove_drops_stale_history_entries() {
        let mut q = queue_with(&["a", "b", "c"]);
        q.advance().unwrap();
        q.advance().unwrap();
        assert_eq!(q.history_len(), 2);
        q.remove(0).unwrap();
        assert_eq!(q.history_len(), 1);
        // the surviving history entry still points at "b"
        let restored = q.previous().unwrap();
        assert_eq!(restored.path, std::path::PathBuf::from("/music/b.flac"));
    }

    #[test]
    fn reorder_rejects_out_of_range() {
        let mut q = queue_with(&["a", "b"]);
        assert!(q.reorder(0, 5).is_err());
        assert!(q.remove(7).is_err());
    }
}
