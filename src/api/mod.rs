// API module - The device command surface offered to front-ends
pub mod server;
pub mod service;

pub use server::serve;
pub use service::{DeviceRequest, DeviceResponse, DeviceService, ErrorBody, RequestEnvelope};
