//! One slot's calibration chain: its in-memory state and the driver that
//! advances it block by block.

pub mod driver;
pub mod state;

pub use driver::SlotDriver;
pub use state::{LlikRow, SlotState};
