//! Bounded undo/redo stacks of whole-value snapshots.

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct History<T: Clone> {
    undo_stack: Vec<T>,
    redo_stack: Vec<T>,
    limit: usize,
}

impl<T: Clone> Default for History<T> {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl<T: Clone> History<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Records the state as it was before a mutation. Clears the redo stack.
    pub fn record(&mut self, before: T) {
        self.undo_stack.push(before);
        self.redo_stack.clear();
        if self.undo_stack.len() > self.limit {
            self.undo_stack.remove(0);
        }
    }

    /// Swaps `current` onto the redo stack and hands back the state to restore.
    pub fn undo(&mut self, current: T) -> Option<T> {
        let previous = self.undo_stack.pop()?;
        self.redo_stack.push(current);
        Some(previous)
    }

    pub fn redo(&mut self, current: T) -> Option<T> {
        let next = self.redo_stack.pop()?;
        self.undo_stack.push(current);
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undo_and_redo_swap_states() {
        let mut history = History::new(10);
        history.record(1);
        let current = 2;

        let restored = history.undo(current).unwrap();
        assert_eq!(restored, 1);
        assert!(history.can_redo());
        assert!(!history.can_undo());

        let again = history.redo(restored).unwrap();
        assert_eq!(again, 2);
        assert!(history.can_undo());
        assert!(!history.can_redo());
    }

    #[test]
    fn empty_stacks_are_noops() {
        let mut history: History<u8> = History::default();
        assert_eq!(history.undo(5), None);
        assert_eq!(history.redo(5), None);
    }

    #[test]
    fn recording_clears_redo() {
        let mut history = History::new(10);
        history.record("a");
        history.undo("b");
        assert!(history.can_redo());
        history.record("c");
        assert!(!history.can_redo());
    }

    #[test]
    fn oldest_entries_fall_off_past_the_limit() {
        let mut history = History::new(2);
        history.record(1);
        history.record(2);
        history.record(3);
        assert_eq!(history.undo_depth(), 2);
        assert_eq!(history.undo(4), Some(3));
        assert_eq!(history.undo(3), Some(2));
        assert_eq!(history.undo(2), None);
    }
}
