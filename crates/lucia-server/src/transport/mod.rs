//! Frame transports for the connection loop.

#[cfg(test)]
pub mod memory;
pub mod websocket;
