// Stream module - WHAT COMES IN
// Ring-buffered, loss-accounted reception of each receiver's byte stream

mod receiver;
mod ring;

pub use receiver::{ReceiveStats, Receiver, StreamBuffer};
pub use ring::{RingBuffer, RingError};
