//! Locally tracked output mode of the capture service.
//!
//! Transitions:
//!   Error -> (query) -> Off | Usb | Tcp | Rtsp | Unknown
//!   settled -> (request change) -> Switching -> target
//!
//! `Switching` and `Error` only ever come from the controller; the service
//! never reports them.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use std::time::Duration;

use dvr_proto::config::ConfirmationPolicy;
use dvr_proto::protocol::{mode_command, CMD_GET_MODE, MODE_OFF, MODE_RTSP, MODE_TCP, MODE_USB};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::IpcError;
use crate::transport::{Handle, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "raw", rename_all = "snake_case")]
pub enum ModeState {
    Off,
    Usb,
    Tcp,
    Rtsp,
    /// A change request is in flight.
    Switching,
    /// No usable session.
    Error,
    /// The service reported a code outside the known set.
    Unknown(u32),
}

/// The modes that may be sent to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    Off,
    Usb,
    Tcp,
    Rtsp,
}

/// Status light next to the mode label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    Busy,
    Fault,
    Idle,
    Active,
}

pub fn classify(raw: u32) -> ModeState {
    match raw {
        MODE_USB => ModeState::Usb,
        MODE_TCP => ModeState::Tcp,
        MODE_OFF => ModeState::Off,
        MODE_RTSP => ModeState::Rtsp,
        other => ModeState::Unknown(other),
    }
}

impl ModeState {
    pub fn label(&self) -> &'static str {
        match self {
            ModeState::Off => "OFF",
            ModeState::Usb => "USB",
            ModeState::Tcp => "TCP",
            ModeState::Rtsp => "RTSP",
            ModeState::Switching => "Switching",
            ModeState::Error => "Error",
            ModeState::Unknown(_) => "Unknown",
        }
    }

    pub fn indicator(&self) -> Indicator {
        match self {
            ModeState::Switching => Indicator::Busy,
            ModeState::Error => Indicator::Fault,
            ModeState::Off => Indicator::Idle,
            _ => Indicator::Active,
        }
    }

    /// True for states reached through a service answer rather than assigned
    /// locally.
    pub fn is_settled(&self) -> bool {
        !matches!(self, ModeState::Switching | ModeState::Error)
    }
}

impl fmt::Display for ModeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModeState::Unknown(raw) => write!(f, "Unknown ({raw})"),
            other => f.write_str(other.label()),
        }
    }
}

impl TargetMode {
    pub const ALL: [TargetMode; 4] = [
        TargetMode::Off,
        TargetMode::Usb,
        TargetMode::Tcp,
        TargetMode::Rtsp,
    ];

    pub fn raw(self) -> u32 {
        match self {
            TargetMode::Off => MODE_OFF,
            TargetMode::Usb => MODE_USB,
            TargetMode::Tcp => MODE_TCP,
            TargetMode::Rtsp => MODE_RTSP,
        }
    }

    pub fn command(self) -> u32 {
        mode_command(self.raw())
    }
}

impl From<TargetMode> for ModeState {
    fn from(target: TargetMode) -> Self {
        classify(target.raw())
    }
}

impl FromStr for TargetMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(TargetMode::Off),
            "usb" => Ok(TargetMode::Usb),
            "tcp" => Ok(TargetMode::Tcp),
            "rtsp" => Ok(TargetMode::Rtsp),
            other => Err(format!("unknown mode '{other}' (expected off, usb, tcp or rtsp)")),
        }
    }
}

// ── settle delay ─────────────────────────────────────────────────────────────

/// Waits out the settle delay after a mode-change dispatch.
pub trait Settle {
    fn settle(&self, delay: Duration);
}

/// Blocks the calling thread.
pub struct ThreadSettle;

impl Settle for ThreadSettle {
    fn settle(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

// ── state machine ────────────────────────────────────────────────────────────

/// Read-only view of the current mode that stays valid while a change is in
/// flight.
#[derive(Clone)]
pub struct ModeWatch(Rc<Cell<ModeState>>);

impl ModeWatch {
    pub fn get(&self) -> ModeState {
        self.0.get()
    }
}

pub struct ModeMachine {
    state: Rc<Cell<ModeState>>,
    settle: Box<dyn Settle>,
    settle_delay: Duration,
    confirmation: ConfirmationPolicy,
}

impl ModeMachine {
    pub fn new(
        settle: Box<dyn Settle>,
        settle_delay: Duration,
        confirmation: ConfirmationPolicy,
    ) -> Self {
        Self {
            state: Rc::new(Cell::new(ModeState::Error)),
            settle,
            settle_delay,
            confirmation,
        }
    }

    pub fn state(&self) -> ModeState {
        self.state.get()
    }

    pub fn watch(&self) -> ModeWatch {
        ModeWatch(Rc::clone(&self.state))
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    pub(crate) fn set(&self, state: ModeState) {
        let previous = self.state.replace(state);
        if previous != state {
            debug!("Mode {} -> {}", previous, state);
        }
    }

    /// Ask the service for its mode.  On failure the local state is left as
    /// it was.
    pub fn refresh<T: Transport>(&self, handle: &mut Handle<T>) -> Result<ModeState, IpcError> {
        let raw = handle.query_u32(CMD_GET_MODE)?;
        let mode = classify(raw);
        self.set(mode);
        Ok(mode)
    }

    /// Switch the service to `target`.
    ///
    /// The local state reads `Switching` before anything goes on the wire and
    /// ends at `target` once the settle delay has passed, whether or not the
    /// dispatch succeeded.  With [`ConfirmationPolicy::Readback`] the service
    /// is queried once more and its answer wins.
    pub fn request_change<T: Transport>(
        &self,
        handle: &mut Handle<T>,
        target: TargetMode,
    ) -> Result<(), IpcError> {
        self.set(ModeState::Switching);

        info!("Requesting mode {:?} (command {})", target, target.command());
        let dispatched = handle.dispatch(target.command(), &[]).map(|_| ());
        if let Err(e) = &dispatched {
            warn!("Mode change to {:?} failed: {}", target, e);
        }

        self.settle.settle(self.settle_delay);
        self.set(target.into());

        if self.confirmation == ConfirmationPolicy::Readback {
            self.reconcile(handle, target);
        }

        dispatched
    }

    fn reconcile<T: Transport>(&self, handle: &mut Handle<T>, target: TargetMode) {
        let expected = ModeState::from(target);
        match self.refresh(handle) {
            Ok(actual) if actual != expected => {
                warn!("Requested {} but service reports {}", expected, actual)
            }
            Ok(_) => debug!("Service confirmed {}", expected),
            Err(e) => {
                // keep the optimistic value; the next poll tries again
                warn!("Could not confirm mode {}: {}", expected, e);
            }
        }
    }
}
