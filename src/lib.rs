// Matrix - local runtime for Matrix Hub tool servers
// Library exports

pub mod config;
pub mod errors;
pub mod matrix; // Facade used by the CLI
pub mod mcp; // Protocol bridge (SSE / WebSocket)
pub mod resolution; // Specifier resolution and cache
pub mod runtime; // Lock registry, supervisor, health, logs
pub mod tools; // Tool descriptors and argument inference

pub use errors::{MatrixError, Result};
pub use matrix::Matrix;
