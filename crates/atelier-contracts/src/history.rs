/// Linear undo/redo history over immutable snapshots.
///
/// The sequence is never empty and `cursor` always points at a valid entry. Pushing after
/// an undo discards everything past the cursor; there is no branch to return to.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryStore<T> {
    entries: Vec<T>,
    cursor: usize,
}

impl<T> HistoryStore<T> {
    pub fn new(seed: T) -> Self {
        Self {
            entries: vec![seed],
            cursor: 0,
        }
    }

    pub fn push(&mut self, next: T) {
        self.entries.truncate(self.cursor + 1);
        self.entries.push(next);
        self.cursor = self.entries.len() - 1;
    }

    /// Hard discontinuity: the previous entries cannot be reached again.
    pub fn reset(&mut self, seed: T) {
        self.entries.clear();
        self.entries.push(seed);
        self.cursor = 0;
    }

    pub fn undo(&mut self) -> bool {
        if !self.can_undo() {
            return false;
        }
        self.cursor -= 1;
        true
    }

    pub fn redo(&mut self) -> bool {
        if !self.can_redo() {
            return false;
        }
        self.cursor += 1;
        true
    }

    pub fn current(&self) -> &T {
        &self.entries[self.cursor]
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn entries(&self) -> &[T] {
        &self.entries
    }
}

impl<T: Default> Default for HistoryStore<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::HistoryStore;

    #[test]
    fn new_history_has_single_current_entry() {
        let history = HistoryStore::new("seed");
        assert_eq!(*history.current(), "seed");
        assert_eq!(history.len(), 1);
        assert!(!history.can_undo());
        assert!(!history.can_redo());
    }

    #[test]
    fn push_after_undo_discards_redo_branch() {
        let mut history = HistoryStore::new("A");
        history.push("B");
        history.push("C");
        assert!(history.undo());
        assert_eq!(*history.current(), "B");

        history.push("D");
        assert_eq!(history.entries(), &["A", "B", "D"]);
        assert_eq!(*history.current(), "D");
        assert!(!history.redo());
        assert_eq!(*history.current(), "D");
    }

    #[test]
    fn undo_and_redo_stop_at_bounds() {
        let mut history = HistoryStore::new(0);
        history.push(1);
        assert!(history.undo());
        assert!(!history.undo());
        assert_eq!(*history.current(), 0);
        assert!(history.redo());
        assert!(!history.redo());
        assert_eq!(*history.current(), 1);
    }

    #[test]
    fn undo_redo_without_push_keeps_all_entries() {
        let mut history = HistoryStore::new(0);
        for value in 1..=4 {
            history.push(value);
        }
        while history.undo() {}
        assert_eq!(*history.current(), 0);
        while history.redo() {}
        assert_eq!(*history.current(), 4);
        assert_eq!(history.entries(), &[0, 1, 2, 3, 4]);
    }

    #[test]
    fn reset_yields_single_entry_without_undo_or_redo() {
        let mut history = HistoryStore::new("A");
        history.push("B");
        history.push("C");
        history.undo();
        history.reset("Z");
        assert_eq!(history.len(), 1);
        assert_eq!(*history.current(), "Z");
        assert!(!history.can_undo());
        assert!(!history.can_redo());
    }

    #[test]
    fn replayed_operations_match_a_reference_model() {
        // Scripted mix of pushes and cursor moves checked against a plain Vec + index model.
        let script = [
            'p', 'p', 'u', 'p', 'u', 'u', 'r', 'p', 'p', 'u', 'r', 'r', 'u', 'u', 'u', 'p',
        ];
        let mut history = HistoryStore::new(0);
        let mut model = vec![0];
        let mut index = 0usize;
        let mut next = 1;
        for step in script {
            match step {
                'p' => {
                    history.push(next);
                    model.truncate(index + 1);
                    model.push(next);
                    index = model.len() - 1;
                    next += 1;
                }
                'u' => {
                    let moved = history.undo();
                    assert_eq!(moved, index > 0);
                    index = index.saturating_sub(1);
                }
                _ => {
                    let moved = history.redo();
                    assert_eq!(moved, index + 1 < model.len());
                    if index + 1 < model.len() {
                        index += 1;
                    }
                }
            }
            assert_eq!(*history.current(), model[index]);
            assert_eq!(history.entries(), model.as_slice());
        }
    }
}
