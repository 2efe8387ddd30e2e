//! Buffer ring bookkeeping.
//!
//! Tracks every buffer the SDK allocated for this camera and whether a transfer
//! request is outstanding on it. The ring itself never calls the SDK; the
//! camera consults it before each buffer call so an invalid request fails
//! before it reaches the device.
//!
//! Slot lifecycle:
//!
//! ```text
//! insert ──▶ Allocated ──mark_queued──▶ Queued ──mark_ready──▶ Ready
//!               ▲  │                      │                     │
//!               │  └──remove (freed)      └────── flush ────────┤
//!               └─────────────── mark_consumed ◀────────────────┘
//! ```

use std::collections::BTreeMap;

use daq_core::error::{DaqError, DaqResult};

use crate::binding::EventHandle;

/// SDK limit on buffers per camera.
pub const MAX_BUFFERS: usize = 16;

/// Slot state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Allocated, no transfer outstanding.
    Allocated,
    /// A transfer request is outstanding.
    Queued,
    /// Transfer finished; frame not yet copied out.
    Ready,
}

/// One allocated buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSlot {
    /// Slot index, `< MAX_BUFFERS`.
    pub index: usize,
    /// Buffer size in bytes.
    pub size: u32,
    /// Completion event, if the SDK created one.
    pub event: Option<EventHandle>,
    /// Current state.
    pub state: SlotState,
}

/// Allocated buffers of one camera.
#[derive(Debug, Default)]
pub struct BufferRing {
    slots: BTreeMap<usize, BufferSlot>,
    high_water: usize,
}

impl BufferRing {
    /// Empty ring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocated slot count.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when nothing is allocated.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots that can still be allocated.
    pub fn free_capacity(&self) -> usize {
        MAX_BUFFERS - self.slots.len()
    }

    /// Allocated indices in ascending order.
    pub fn indices(&self) -> Vec<usize> {
        self.slots.keys().copied().collect()
    }

    /// Slot details.
    pub fn get(&self, index: usize) -> Option<&BufferSlot> {
        self.slots.get(&index)
    }

    /// State of a slot.
    pub fn state(&self, index: usize) -> Option<SlotState> {
        self.slots.get(&index).map(|s| s.state)
    }

    /// Slots with an outstanding transfer.
    pub fn queued_count(&self) -> usize {
        self.slots
            .values()
            .filter(|s| s.state == SlotState::Queued)
            .count()
    }

    /// Remove every slot regardless of state, lowest index first.
    pub fn take_all(&mut self) -> Vec<BufferSlot> {
        std::mem::take(&mut self.slots).into_values().collect()
    }

    /// Largest number of simultaneously queued slots seen so far.
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Register a buffer the SDK allocated.
    pub fn insert(&mut self, index: usize, size: u32, event: Option<EventHandle>) -> DaqResult<()> {
        if index >= MAX_BUFFERS {
            return Err(DaqError::Resource(format!(
                "Buffer index {} out of range [0, {})",
                index, MAX_BUFFERS
            )));
        }
        if self.slots.contains_key(&index) {
            return Err(DaqError::Resource(format!(
                "Buffer {} is already allocated",
                index
            )));
        }
        self.slots.insert(
            index,
            BufferSlot {
                index,
                size,
                event,
                state: SlotState::Allocated,
            },
        );
        Ok(())
    }

    fn slot_mut(&mut self, index: usize) -> DaqResult<&mut BufferSlot> {
        self.slots
            .get_mut(&index)
            .ok_or_else(|| DaqError::Resource(format!("Buffer {} is not allocated", index)))
    }

    /// Fail unless `index` is allocated and idle.
    pub fn check_queueable(&self, index: usize) -> DaqResult<&BufferSlot> {
        let slot = self
            .slots
            .get(&index)
            .ok_or_else(|| DaqError::Resource(format!("Buffer {} is not allocated", index)))?;
        match slot.state {
            SlotState::Allocated => Ok(slot),
            SlotState::Queued => Err(DaqError::Resource(format!(
                "Buffer {} already has a transfer queued",
                index
            ))),
            SlotState::Ready => Err(DaqError::Resource(format!(
                "Buffer {} holds a frame that has not been consumed",
                index
            ))),
        }
    }

    /// `Allocated → Queued`.
    pub fn mark_queued(&mut self, index: usize) -> DaqResult<()> {
        self.check_queueable(index)?;
        self.slot_mut(index)?.state = SlotState::Queued;
        self.high_water = self.high_water.max(self.queued_count());
        Ok(())
    }

    /// `Queued → Ready`.
    pub fn mark_ready(&mut self, index: usize) -> DaqResult<()> {
        let slot = self.slot_mut(index)?;
        match slot.state {
            SlotState::Queued => {
                slot.state = SlotState::Ready;
                Ok(())
            }
            SlotState::Ready => Ok(()),
            SlotState::Allocated => Err(DaqError::Resource(format!(
                "Buffer {} has no transfer queued",
                index
            ))),
        }
    }

    /// `Ready → Allocated` once the frame was copied out.
    pub fn mark_consumed(&mut self, index: usize) -> DaqResult<()> {
        let slot = self.slot_mut(index)?;
        if slot.state != SlotState::Ready {
            return Err(DaqError::Resource(format!(
                "Buffer {} has no finished frame to consume",
                index
            )));
        }
        slot.state = SlotState::Allocated;
        Ok(())
    }

    /// Return every queued or ready slot to `Allocated`. Returns how many changed.
    pub fn flush(&mut self) -> usize {
        let mut flushed = 0;
        for slot in self.slots.values_mut() {
            if slot.state != SlotState::Allocated {
                slot.state = SlotState::Allocated;
                flushed += 1;
            }
        }
        flushed
    }

    /// Fail unless `index` can be freed.
    pub fn check_removable(&self, index: usize) -> DaqResult<()> {
        match self.state(index) {
            None => Err(DaqError::Resource(format!(
                "Buffer {} is not allocated (double free?)",
                index
            ))),
            Some(SlotState::Queued) => Err(DaqError::Resource(format!(
                "Buffer {} cannot be freed while a transfer is queued",
                index
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Forget a freed buffer.
    pub fn remove(&mut self, index: usize) -> DaqResult<BufferSlot> {
        self.check_removable(index)?;
        self.slots
            .remove(&index)
            .ok_or_else(|| DaqError::Resource(format!("Buffer {} is not allocated", index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_with(n: usize) -> BufferRing {
        let mut ring = BufferRing::new();
        for i in 0..n {
            ring.insert(i, 1024, Some(EventHandle(i as u64))).unwrap();
        }
        ring
    }

    #[test]
    fn test_slot_cycle() {
        let mut ring = ring_with(2);
        ring.mark_queued(0).unwrap();
        assert_eq!(ring.state(0), Some(SlotState::Queued));
        ring.mark_ready(0).unwrap();
        ring.mark_consumed(0).unwrap();
        assert_eq!(ring.state(0), Some(SlotState::Allocated));
        ring.mark_queued(0).unwrap();
        assert_eq!(ring.queued_count(), 1);
    }

    #[test]
    fn test_double_queue_rejected() {
        let mut ring = ring_with(1);
        ring.mark_queued(0).unwrap();
        assert!(ring.mark_queued(0).unwrap_err().is_resource());
        ring.mark_ready(0).unwrap();
        assert!(ring.mark_queued(0).unwrap_err().is_resource());
    }

    #[test]
    fn test_insert_limits() {
        let mut ring = ring_with(MAX_BUFFERS);
        assert_eq!(ring.free_capacity(), 0);
        assert!(ring.insert(MAX_BUFFERS, 1024, None).unwrap_err().is_resource());

        let mut ring = ring_with(1);
        assert!(ring.insert(0, 1024, None).unwrap_err().is_resource());
    }

    #[test]
    fn test_free_rules() {
        let mut ring = ring_with(2);
        ring.mark_queued(1).unwrap();
        assert!(ring.remove(1).unwrap_err().is_resource());

        let freed = ring.remove(0).unwrap();
        assert_eq!(freed.event, Some(EventHandle(0)));
        assert!(ring.remove(0).unwrap_err().is_resource());
        assert_eq!(ring.indices(), vec![1]);
    }

    #[test]
    fn test_flush_and_high_water() {
        let mut ring = ring_with(4);
        for i in 0..3 {
            ring.mark_queued(i).unwrap();
        }
        ring.mark_ready(0).unwrap();
        assert_eq!(ring.high_water(), 3);

        assert_eq!(ring.flush(), 3);
        assert_eq!(ring.queued_count(), 0);
        assert!(ring.mark_consumed(0).unwrap_err().is_resource());
        assert!(ring.mark_ready(1).unwrap_err().is_resource());
        assert_eq!(ring.high_water(), 3);
    }

    #[test]
    fn test_take_all_empties_queued_slots() {
        let mut ring = ring_with(3);
        ring.mark_queued(1).unwrap();

        let taken: Vec<usize> = ring.take_all().iter().map(|s| s.index).collect();
        assert_eq!(taken, vec![0, 1, 2]);
        assert!(ring.is_empty());
        assert_eq!(ring.free_capacity(), MAX_BUFFERS);
        assert_eq!(ring.high_water(), 1);
    }
}
