// Library root: exposes the server modules to the binary and integration
// tests.

pub mod app;
pub mod protocol;
pub mod ws_server;
