//! Core of the drawing-companion backend: the in-memory session store, the
//! per-session turn orchestrator, the AI capability seam, and the real-time
//! connection registry. The HTTP/WebSocket surface lives in `canvas-api`.

pub mod analysis;
pub mod error;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod session;
