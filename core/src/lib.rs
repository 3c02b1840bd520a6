// Core abstractions shared by the engine and the CLI:
// the error taxonomy and the block-device seam.

pub mod device;
pub mod error;
pub mod test_utils;

pub use device::{BlockDevice, FileDevice};
pub use error::RelicError;
