//! # System Interaction Layer
//!
//! The boundary between lifecycle logic and the operating system.
//!
//! - **`executor`**: spawns external processes for script hooks, with `Ctrl+C`
//!   cancellation, the `cmd /C` fallback on Windows, and output capture.

pub mod executor;
