// Library root: re-exports all modules so integration tests and the binary
// share the same code.

pub mod config;
pub mod db;
pub mod protocol;
pub mod ws_server;
