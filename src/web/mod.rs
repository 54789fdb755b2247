// HTTP and WebSocket surface of the orchestrator

pub mod request;
pub mod response_helpers;
pub mod routes;
pub mod websocket;
pub mod websocket_utils;
