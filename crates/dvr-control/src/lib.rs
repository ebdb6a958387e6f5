//! Control session for the background capture service.
//!
//! The presentation layer builds a [`SessionController`], calls
//! [`start`](SessionController::start) once, [`tick`](SessionController::tick)
//! every frame and [`request_mode_change`](SessionController::request_mode_change)
//! on user action, and renders [`SessionSnapshot`]s.  Nothing here spawns
//! threads or tasks.

pub mod address;
pub mod error;
pub mod mode;
pub mod poll;
pub mod registry;
pub mod session;
pub mod transport;
pub mod version;

pub use error::{ControlError, IpcError};
pub use mode::{ModeState, TargetMode};
pub use session::{SessionController, SessionOptions, SessionSnapshot, SessionStatus};
