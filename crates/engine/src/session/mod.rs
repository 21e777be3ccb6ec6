mod runner;
mod state;

// Public API of the session subsystem.
pub use runner::{SessionHandle, SessionRunner};
pub use state::{EngineState, SessionCommand};
