//! Development server with live updates for kiln.
//!
//! Builds the project in memory, serves the latest successful output,
//! watches the source tree and pushes updates to connected pages over a
//! WebSocket.

pub mod controller;
pub mod server;
pub mod watcher;
pub mod websocket;

pub use controller::{plan_update, DevController, DevState, ServerState, SharedState};
pub use server::{lookup, router, DevServer, DevServerConfig, ServerError};
pub use watcher::{FileWatcher, WatchEvent};
pub use websocket::{hmr_client_script, HmrHub, HmrMessage, CLIENT_PATH, WS_PATH};
