// Connection module - Registry, manager and reconnect state machine
pub mod manager;
pub mod port;
pub mod reconnect;
pub mod registry;
pub mod state;

pub use manager::ConnectionManager;
pub use port::{OpenedPort, PortDriver, PortEvent, PortHandle};
pub use reconnect::ReconnectPolicy;
pub use registry::{ConnectionRegistry, SharedHandle};
pub use state::{ConnectionState, ConnectionStatus};
