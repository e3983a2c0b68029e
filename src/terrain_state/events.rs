//! Notifications published by the terrain to whoever drives it.
//!
//! Events are queued while the terrain is mutated and drained once per tick by
//! the owner. The navigation generator consumes regeneration requests inside
//! [`TerrainState::update`](super::TerrainState::update); everything else is left
//! for external consumers such as agent controllers.

use std::collections::VecDeque;

use cgmath::Point3;

use super::carving::CarvedRegion;
use super::chunks::{Axis, ShiftDirection};

#[derive(Clone, Debug, PartialEq)]
pub enum TerrainEvent {
    /// A carve or fill was applied around `origin`.
    TerrainCarved {
        origin: Point3<f32>,
        radius: f32,
        rate: f32,
        removal: bool,
    },
    /// Density inside these regions changed; the flow field is stale.
    VectorFieldShouldRegenerate { regions: Vec<CarvedRegion> },
    /// The chunk window slid one step.
    ChunksShifted { axis: Axis, direction: ShiftDirection },
}

/// FIFO of pending [`TerrainEvent`]s.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<TerrainEvent>,
}

impl EventQueue {
    pub fn publish(&mut self, event: TerrainEvent) {
        log::trace!("Publishing {:?}", event);
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Removes and returns every pending event in publication order.
    pub fn drain(&mut self) -> Vec<TerrainEvent> {
        self.events.drain(..).collect()
    }

    /// Removes and returns the events `matches` accepts, leaving the rest queued
    /// in order.
    pub fn take_where(
        &mut self,
        mut matches: impl FnMut(&TerrainEvent) -> bool,
    ) -> Vec<TerrainEvent> {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.events.len());
        for event in self.events.drain(..) {
            if matches(&event) {
                taken.push(event);
            } else {
                kept.push_back(event);
            }
        }
        self.events = kept;
        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn carved() -> TerrainEvent {
        TerrainEvent::TerrainCarved {
            origin: Point3::new(1.0, 2.0, 3.0),
            radius: 2.0,
            rate: 0.5,
            removal: true,
        }
    }

    #[test]
    fn drain_preserves_publication_order() {
        let mut queue = EventQueue::default();
        queue.publish(carved());
        queue.publish(TerrainEvent::ChunksShifted {
            axis: Axis::X,
            direction: ShiftDirection::Positive,
        });

        let events = queue.drain();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], carved());
        assert!(queue.is_empty());
    }

    #[test]
    fn take_where_leaves_other_events_queued() {
        let mut queue = EventQueue::default();
        queue.publish(carved());
        queue.publish(TerrainEvent::VectorFieldShouldRegenerate { regions: Vec::new() });
        queue.publish(carved());

        let taken = queue
            .take_where(|event| matches!(event, TerrainEvent::VectorFieldShouldRegenerate { .. }));

        assert_eq!(taken.len(), 1);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain(), vec![carved(), carved()]);
    }
}
