use std::collections::HashMap;

/// Presentable image index → frame slot whose submission last used it
#[derive(Debug, Default, Clone)]
pub struct InFlightMap {
    owners: HashMap<usize, usize>,
}

impl InFlightMap {
    pub fn owner(&self, image_index: usize) -> Option<usize> {
        self.owners.get(&image_index).copied()
    }

    pub fn assign(&mut self, image_index: usize, slot: usize) {
        self.owners.insert(image_index, slot);
    }

    pub fn clear(&mut self) {
        self.owners.clear();
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// GPU-free bookkeeping of the frame loop. Every submission gets a serial, starting at 1.
/// A slot's serial is known complete once its fence was observed signaled, and fence
/// signals cover every earlier submission on the queue.
#[derive(Debug, Clone)]
pub struct FrameLedger {
    current: usize,
    slot_serials: Vec<u64>,
    last_submitted: u64,
    completed: u64,
    in_flight: InFlightMap,
}

impl FrameLedger {
    pub fn new(slot_count: usize) -> Self {
        Self {
            current: 0,
            slot_serials: vec![0; slot_count.max(1)],
            last_submitted: 0,
            completed: 0,
            in_flight: InFlightMap::default(),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slot_serials.len()
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// Slot that must be waited on before `image_index` can be re-recorded, if it is not `slot`
    pub fn conflicting_slot(&self, image_index: usize, slot: usize) -> Option<usize> {
        self.in_flight
            .owner(image_index)
            .filter(|owner| *owner != slot)
    }

    /// The fence of `slot` was observed signaled
    pub fn slot_completed(&mut self, slot: usize) {
        if let Some(serial) = self.slot_serials.get(slot) {
            self.completed = self.completed.max(*serial);
        }
    }

    /// `slot` submitted work rendering into `image_index`. Returns the submission's serial.
    pub fn submitted(&mut self, slot: usize, image_index: usize) -> u64 {
        self.last_submitted += 1;
        if let Some(serial) = self.slot_serials.get_mut(slot) {
            *serial = self.last_submitted;
        }
        self.in_flight.assign(image_index, slot);
        self.last_submitted
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slot_serials.len();
    }

    /// The device went idle: everything submitted so far is complete
    pub fn device_idle(&mut self) {
        self.completed = self.last_submitted;
    }

    /// Image indices are meaningless after the swapchain was replaced
    pub fn forget_images(&mut self) {
        self.in_flight.clear();
    }

    pub fn last_submitted(&self) -> u64 {
        self.last_submitted
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Submissions not yet known complete
    pub fn pending(&self) -> u64 {
        self.last_submitted - self.completed
    }

    pub fn in_flight(&self) -> &InFlightMap {
        &self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive the ledger like the scheduler does, assuming the GPU finishes a slot's work
    /// exactly when its fence is waited on
    fn run_frame(ledger: &mut FrameLedger, image_index: usize) {
        let slot = ledger.current();
        ledger.slot_completed(slot);
        if let Some(other) = ledger.conflicting_slot(image_index, slot) {
            ledger.slot_completed(other);
        }
        ledger.submitted(slot, image_index);
        ledger.advance();
    }

    #[test]
    fn test_slots_rotate() {
        let mut ledger = FrameLedger::new(2);
        assert_eq!(ledger.current(), 0);
        ledger.advance();
        assert_eq!(ledger.current(), 1);
        ledger.advance();
        assert_eq!(ledger.current(), 0);
    }

    #[test]
    fn test_zero_slots_is_one() {
        let mut ledger = FrameLedger::new(0);
        assert_eq!(ledger.slot_count(), 1);
        ledger.advance();
        assert_eq!(ledger.current(), 0);
    }

    #[test]
    fn test_pending_never_exceeds_slot_count() {
        for slots in 1..4 {
            let mut ledger = FrameLedger::new(slots);
            for frame in 0..50 {
                run_frame(&mut ledger, frame % 3);
                assert!(ledger.pending() <= slots as u64);
            }
        }
    }

    #[test]
    fn test_conflicting_slot() {
        let mut ledger = FrameLedger::new(2);
        // Slot 0 renders image 1
        ledger.submitted(0, 1);
        ledger.advance();
        assert_eq!(ledger.conflicting_slot(1, 1), Some(0));
        assert_eq!(ledger.conflicting_slot(1, 0), None);
        assert_eq!(ledger.conflicting_slot(2, 1), None);
    }

    #[test]
    fn test_completion_follows_waited_slot() {
        let mut ledger = FrameLedger::new(2);
        let first = ledger.submitted(0, 0);
        let second = ledger.submitted(1, 1);
        assert_eq!((first, second), (1, 2));
        assert_eq!(ledger.completed(), 0);
        ledger.slot_completed(0);
        assert_eq!(ledger.completed(), 1);
        ledger.slot_completed(1);
        assert_eq!(ledger.completed(), 2);
        // Waiting on an older slot never moves completion backwards
        ledger.slot_completed(0);
        assert_eq!(ledger.completed(), 2);
    }

    #[test]
    fn test_device_idle_completes_everything() {
        let mut ledger = FrameLedger::new(2);
        ledger.submitted(0, 0);
        ledger.submitted(1, 2);
        ledger.device_idle();
        assert_eq!(ledger.pending(), 0);
        assert_eq!(ledger.in_flight().len(), 2);
        ledger.forget_images();
        assert!(ledger.in_flight().is_empty());
    }
}
