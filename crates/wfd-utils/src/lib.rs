mod budget;
mod ring;

pub use budget::Budget;
pub use ring::{RingBuffer, RingError};
