// Power Sequencer
// Off -> PoweringOn -> On -> PoweringOff -> Off, optionally through an enable pin

use crate::transport::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Identifier of a GPIO on the host
pub type PinId = u32;

// ============================================================================
// PIN DRIVER TRAIT
// ============================================================================

/// Drives the receiver's power-enable pin
#[async_trait]
pub trait PinDriver: Send + Sync {
    /// Assert (power on) or deassert (power off) a pin
    async fn set_level(&self, pin: PinId, asserted: bool) -> Result<(), TransportError>;
}

// ============================================================================
// POWER STATE
// ============================================================================

/// Power state of one receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PowerState {
    #[default]
    Off,
    PoweringOn,
    On,
    PoweringOff,
}

impl PowerState {
    /// Check if transition to another state is valid
    pub fn can_transition_to(&self, target: &PowerState) -> bool {
        match (self, target) {
            (Self::Off, Self::PoweringOn) => true,
            (Self::PoweringOn, Self::On) => true,
            (Self::PoweringOn, Self::Off) => true, // Power-on timed out
            (Self::On, Self::PoweringOff) => true,
            (Self::PoweringOff, Self::Off) => true,
            _ => false,
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, Self::On)
    }
}

/// Errors from a power sequence
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PowerError {
    #[error("Receiver did not become ready within {0:?}")]
    Timeout(Duration),

    #[error("Power pin failure: {0}")]
    Pin(#[from] TransportError),

    #[error("Power sequencer retired")]
    Retired,
}

// ============================================================================
// POWER SEQUENCER
// ============================================================================

/// Timing for a power-on sequence
#[derive(Debug, Clone, Copy)]
pub struct PowerTiming {
    /// Upper bound on waiting for the device to answer
    pub timeout: Duration,
    /// Gap between readiness probes
    pub poll_interval: Duration,
}

/// Power state machine for one receiver.
///
/// Sequences are serialized by an async lock; the state itself can be read
/// at any time, including in the middle of a power-on. Once retired, a
/// pending power-on is abandoned and no new sequence starts.
#[derive(Debug)]
pub struct PowerSequencer {
    pin: Option<PinId>,
    leave_power_alone: bool,
    state: Mutex<PowerState>,
    sequence: tokio::sync::Mutex<()>,
    retired: watch::Sender<bool>,
}

impl PowerSequencer {
    pub fn new(pin: Option<PinId>, leave_power_alone: bool) -> Self {
        Self {
            pin,
            leave_power_alone,
            state: Mutex::new(PowerState::Off),
            sequence: tokio::sync::Mutex::new(()),
            retired: watch::Sender::new(false),
        }
    }

    pub fn pin(&self) -> Option<PinId> {
        self.pin
    }

    pub fn leave_power_alone(&self) -> bool {
        self.leave_power_alone
    }

    fn state_cell(&self) -> MutexGuard<'_, PowerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> PowerState {
        *self.state_cell()
    }

    pub fn is_retired(&self) -> bool {
        *self.retired.borrow()
    }

    /// The pin this sequencer drives, if it is allowed to drive one
    fn controlled_pin(&self) -> Option<PinId> {
        self.pin.filter(|_| !self.leave_power_alone)
    }

    fn transition(&self, target: PowerState) {
        let mut state = self.state_cell();
        if !state.can_transition_to(&target) {
            debug!(from = ?*state, to = ?target, "forcing power state");
        }
        *state = target;
    }

    /// Power the receiver up.
    ///
    /// With `leave_power_alone` the receiver is taken as already powered. With
    /// a pin, the pin is asserted and `ready` is polled until it reports true
    /// or `timing.timeout` passes; on timeout the pin is deasserted again and
    /// the state is back to Off. Without a pin the receiver is assumed to be
    /// externally powered.
    pub async fn power_on<F, Fut>(
        &self,
        pins: &dyn PinDriver,
        mut ready: F,
        timing: PowerTiming,
    ) -> Result<(), PowerError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = bool> + Send,
    {
        let _sequence = self.sequence.lock().await;

        if self.is_retired() {
            return Err(PowerError::Retired);
        }
        if self.state().is_on() {
            return Ok(());
        }

        let Some(pin) = self.controlled_pin() else {
            self.transition(PowerState::PoweringOn);
            self.transition(PowerState::On);
            return Ok(());
        };

        self.transition(PowerState::PoweringOn);
        if let Err(e) = pins.set_level(pin, true).await {
            self.transition(PowerState::Off);
            return Err(PowerError::Pin(e));
        }

        let wait_ready = async {
            loop {
                if ready().await {
                    return;
                }
                tokio::time::sleep(timing.poll_interval).await;
            }
        };

        let mut retired = self.retired.subscribe();
        let outcome = tokio::select! {
            biased;
            _ = async { let _ = retired.wait_for(|retired| *retired).await; } => {
                Err(PowerError::Retired)
            }
            waited = tokio::time::timeout(timing.timeout, wait_ready) => {
                waited.map_err(|_| PowerError::Timeout(timing.timeout))
            }
        };

        match outcome {
            Ok(()) => {
                self.transition(PowerState::On);
                Ok(())
            }
            Err(e) => {
                if let Err(pin_error) = pins.set_level(pin, false).await {
                    warn!(pin, error = %pin_error, "failed to release power pin after power on");
                }
                self.transition(PowerState::Off);
                Err(e)
            }
        }
    }

    /// Power the receiver down. Never fails; a pin error is only logged.
    pub async fn power_off(&self, pins: &dyn PinDriver) {
        let _sequence = self.sequence.lock().await;

        let was_on = self.state() != PowerState::Off;
        if was_on {
            self.transition(PowerState::PoweringOff);
        }

        if let Some(pin) = self.controlled_pin() {
            if let Err(e) = pins.set_level(pin, false).await {
                warn!(pin, error = %e, "failed to release power pin");
            }
        }

        if was_on {
            self.transition(PowerState::Off);
        }
    }

    /// Abandon any pending power-on, release the pin and refuse further sequences.
    ///
    /// Waits for a sequence already in flight to roll back before returning.
    pub async fn retire(&self, pins: &dyn PinDriver) {
        self.retired.send_replace(true);
        let _sequence = self.sequence.lock().await;

        if let Some(pin) = self.controlled_pin() {
            if let Err(e) = pins.set_level(pin, false).await {
                warn!(pin, error = %e, "failed to release power pin on retire");
            }
        }
        *self.state_cell() = PowerState::Off;
    }
}
