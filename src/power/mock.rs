// Mock Pins
// Records power pin levels instead of touching hardware

use crate::power::{PinDriver, PinId};
use crate::transport::TransportError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct PinState {
    levels: HashMap<PinId, bool>,
    history: Vec<(PinId, bool)>,
    broken: HashSet<PinId>,
}

/// Mock implementation of PinDriver
#[derive(Default)]
pub struct MockPins {
    state: Mutex<PinState>,
}

impl MockPins {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PinState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current level of a pin, `None` if never driven
    pub fn level(&self, pin: PinId) -> Option<bool> {
        self.lock().levels.get(&pin).copied()
    }

    /// Every level change in order
    pub fn history(&self) -> Vec<(PinId, bool)> {
        self.lock().history.clone()
    }

    /// Make every future write to a pin fail
    pub fn break_pin(&self, pin: PinId) {
        self.lock().broken.insert(pin);
    }
}

#[async_trait]
impl PinDriver for MockPins {
    async fn set_level(&self, pin: PinId, asserted: bool) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.broken.contains(&pin) {
            return Err(TransportError::PinUnavailable(pin));
        }
        state.levels.insert(pin, asserted);
        state.history.push((pin, asserted));
        Ok(())
    }
}
