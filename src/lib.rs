//! NovaGen orchestrator server: HTTP routes and progress WebSockets over
//! the `novagen-engine` core.

pub mod logging;
pub mod web;

pub use novagen_engine::Core;
