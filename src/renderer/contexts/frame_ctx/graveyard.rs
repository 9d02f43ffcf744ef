use crate::renderer::contexts::frame_ctx::ledger::FrameLedger;

/// Holds objects that submitted work may still reference, each tagged with the last submission
/// serial at the time it was replaced
pub struct Graveyard<T> {
    entries: Vec<(u64, T)>,
}

impl<T> Default for Graveyard<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> Graveyard<T> {
    pub fn bury(&mut self, serial: u64, item: T) {
        self.entries.push((serial, item));
    }

    pub fn bury_all<I: IntoIterator<Item = T>>(&mut self, serial: u64, items: I) {
        self.entries.extend(items.into_iter().map(|item| (serial, item)));
    }

    /// Keep `items` until everything `ledger` has submitted so far is complete
    pub fn retire<I: IntoIterator<Item = T>>(&mut self, ledger: &FrameLedger, items: I) {
        self.bury_all(ledger.last_submitted(), items);
    }

    /// Drop every entry `ledger` knows to be complete
    pub fn release(&mut self, ledger: &FrameLedger) -> usize {
        self.collect(ledger.completed())
    }

    /// Drop every entry whose serial is complete. Returns how many were released.
    pub fn collect(&mut self, completed: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(serial, _)| *serial > completed);
        before - self.entries.len()
    }

    /// Drop everything. Only valid once the device is idle.
    pub fn flush(&mut self) -> usize {
        let released = self.entries.len();
        self.entries.clear();
        released
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_collect_releases_completed_only() {
        let mut graveyard = Graveyard::default();
        graveyard.bury(1, "a");
        graveyard.bury(2, "b");
        graveyard.bury(3, "c");
        assert_eq!(graveyard.collect(0), 0);
        assert_eq!(graveyard.collect(2), 2);
        assert_eq!(graveyard.len(), 1);
        assert_eq!(graveyard.collect(3), 1);
        assert!(graveyard.is_empty());
    }

    #[test]
    fn test_items_are_dropped_on_release() {
        let tracker = Rc::new(());
        let mut graveyard = Graveyard::default();
        graveyard.bury_all(5, [tracker.clone(), tracker.clone()]);
        assert_eq!(Rc::strong_count(&tracker), 3);
        graveyard.collect(4);
        assert_eq!(Rc::strong_count(&tracker), 3);
        graveyard.collect(5);
        assert_eq!(Rc::strong_count(&tracker), 1);
    }

    #[test]
    fn test_flush() {
        let mut graveyard = Graveyard::default();
        graveyard.bury_all(10, 0..4);
        assert_eq!(graveyard.flush(), 4);
        assert!(graveyard.is_empty());
    }

    #[test]
    fn test_serial_zero_is_released_immediately() {
        // Replaced before anything was submitted
        let mut graveyard = Graveyard::default();
        graveyard.bury(0, ());
        assert_eq!(graveyard.collect(0), 1);
    }
}
