// Core module - Connection lifecycle, event fan-out and framing
pub mod connection;
pub mod events;
pub mod framing;
