// Power module - ON AND OFF
// Power sequencing for receivers, with or without a dedicated enable pin

mod mock;
mod sequencer;

pub use mock::MockPins;
pub use sequencer::{PinDriver, PinId, PowerError, PowerSequencer, PowerState, PowerTiming};
