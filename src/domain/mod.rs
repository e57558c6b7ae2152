// Domain module - Core types shared by every layer
pub mod config;
pub mod connection;
pub mod error;
