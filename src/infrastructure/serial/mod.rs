// Serial module - serialport-backed port driver
pub mod driver;

pub use driver::{SerialPortDriver, SerialPortHandle};
