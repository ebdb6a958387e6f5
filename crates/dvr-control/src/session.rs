//! Session controller: the one owner of the service handle.
//!
//! ```text
//!   start()  -> acquire handle -> version gate -> initial mode query
//!   tick()   -> every N frames: refresh address, re-query mode
//!   request_mode_change(target) -> refresh address -> Switching -> dispatch
//!                                  -> settle -> target
//!   shutdown() -> release handle
//! ```
//!
//! Every failure is folded into [`SessionSnapshot`]; the presentation layer
//! only reads snapshots.

use std::time::Duration;

use dvr_proto::config::{Config, ConfirmationPolicy};
use dvr_proto::protocol::{VERSION_MAX, VERSION_MIN};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::address::{AddressResolver, HostAddress};
use crate::error::ControlError;
use crate::mode::{classify, ModeMachine, ModeState, ModeWatch, Settle, TargetMode};
use crate::poll::PollScheduler;
use crate::transport::{Handle, ServiceLocator};
use crate::version;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub service_name: String,
    pub settle_delay: Duration,
    pub confirmation: ConfirmationPolicy,
    pub poll_interval: u32,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            service_name: config.service.name.clone(),
            settle_delay: config.session.settle_delay(),
            confirmation: config.session.confirmation,
            poll_interval: config.poll.interval_ticks,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// `start()` has not run yet.
    Idle,
    Connected,
    /// Service not registered, not running, or refused the connection.
    ServiceUnavailable,
    /// Handle acquired but the version read failed.
    HandshakeFailed,
    UnsupportedVersion,
    /// `shutdown()` released the handle.
    Closed,
}

/// Read model handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub connected: bool,
    pub status: SessionStatus,
    pub protocol_version: Option<u32>,
    pub version_supported: bool,
    pub supported_range: (u32, u32),
    pub mode: ModeState,
    pub address: String,
}

impl SessionSnapshot {
    /// Text for the error panel, if the session is not usable.
    pub fn error_message(&self) -> Option<String> {
        match self.status {
            SessionStatus::ServiceUnavailable => {
                Some("Failed to set up the capture service. Is it running?".to_string())
            }
            SessionStatus::HandshakeFailed => {
                Some("Could not read the config API version of the capture service".to_string())
            }
            SessionStatus::UnsupportedVersion => Some(format!(
                "Unknown config API v{}. Only config API {} is supported",
                self.protocol_version.unwrap_or_default(),
                version::supported_range_label()
            )),
            SessionStatus::Idle | SessionStatus::Connected | SessionStatus::Closed => None,
        }
    }
}

pub struct SessionController<L: ServiceLocator> {
    locator: L,
    options: SessionOptions,
    handle: Option<Handle<L::Transport>>,
    status: SessionStatus,
    protocol_version: Option<u32>,
    mode: ModeMachine,
    address: HostAddress,
    resolver: Box<dyn AddressResolver>,
    scheduler: PollScheduler,
}

impl<L: ServiceLocator> SessionController<L> {
    pub fn new(
        locator: L,
        options: SessionOptions,
        settle: Box<dyn Settle>,
        resolver: Box<dyn AddressResolver>,
    ) -> Self {
        let mode = ModeMachine::new(settle, options.settle_delay, options.confirmation);
        let scheduler = PollScheduler::new(options.poll_interval);
        Self {
            locator,
            options,
            handle: None,
            status: SessionStatus::Idle,
            protocol_version: None,
            mode,
            address: HostAddress::default(),
            resolver,
            scheduler,
        }
    }

    /// Acquire the handle, check the version and read the initial mode.
    /// Runs once; later calls just return the current snapshot.
    pub fn start(&mut self) -> SessionSnapshot {
        if self.status != SessionStatus::Idle {
            debug!("start() called again in state {:?}", self.status);
            return self.snapshot();
        }

        self.address.refresh(self.resolver.as_ref());

        let mut handle = match Handle::acquire(&self.locator, &self.options.service_name) {
            Ok(handle) => handle,
            Err(e) => {
                if !e.is_expected() {
                    warn!("No session: {}", e);
                }
                self.status = SessionStatus::ServiceUnavailable;
                self.mode.set(ModeState::Error);
                return self.snapshot();
            }
        };

        match version::get_version(&mut handle) {
            Ok(v) => {
                self.protocol_version = Some(v);
                if version::is_supported(v) {
                    info!("Config API v{}", v);
                    self.status = SessionStatus::Connected;
                } else {
                    warn!(
                        "{}",
                        ControlError::UnsupportedVersion {
                            version: v,
                            min: VERSION_MIN,
                            max: VERSION_MAX,
                        }
                    );
                    self.status = SessionStatus::UnsupportedVersion;
                }
            }
            Err(e) => {
                warn!("Version handshake failed: {}", e);
                self.status = SessionStatus::HandshakeFailed;
            }
        }

        if self.status == SessionStatus::Connected {
            if let Err(e) = self.mode.refresh(&mut handle) {
                warn!("Initial mode query failed: {}", e);
                // code 0 is what the service would never report; shown as unknown
                self.mode.set(classify(0));
            }
        } else {
            self.mode.set(ModeState::Error);
        }

        self.handle = Some(handle);
        self.snapshot()
    }

    /// Called once per frame.  Returns true when this frame triggered a
    /// refresh.
    pub fn tick(&mut self) -> bool {
        if !self.scheduler.tick() {
            return false;
        }
        self.refresh();
        true
    }

    fn refresh(&mut self) {
        self.address.refresh(self.resolver.as_ref());

        if self.status != SessionStatus::Connected {
            return;
        }
        if let Some(handle) = self.handle.as_mut() {
            if let Err(e) = self.mode.refresh(handle) {
                warn!("Mode poll skipped: {}", e);
            }
        }
    }

    /// Blocks for the settle delay.  Rejected without side effects on the
    /// mode when the session is not usable.
    pub fn request_mode_change(&mut self, target: TargetMode) -> Result<(), ControlError> {
        self.address.refresh(self.resolver.as_ref());

        let handle = match (self.status, self.handle.as_mut()) {
            (SessionStatus::Connected, Some(handle)) => handle,
            (SessionStatus::UnsupportedVersion, _) => {
                let version = self.protocol_version.unwrap_or_default();
                debug!("Ignoring {:?}: unsupported version {}", target, version);
                return Err(ControlError::UnsupportedVersion {
                    version,
                    min: VERSION_MIN,
                    max: VERSION_MAX,
                });
            }
            _ => {
                debug!("Ignoring {:?}: no session", target);
                return Err(ControlError::NotConnected);
            }
        };

        self.mode.request_change(handle, target)?;
        Ok(())
    }

    /// Release the handle.  Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.release();
            self.status = SessionStatus::Closed;
            self.mode.set(ModeState::Error);
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connected: self.is_connected(),
            status: self.status,
            protocol_version: self.protocol_version,
            version_supported: self.protocol_version.is_some_and(version::is_supported),
            supported_range: (VERSION_MIN, VERSION_MAX),
            mode: self.mode.state(),
            address: self.address.formatted(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_open())
    }

    pub fn mode(&self) -> ModeState {
        self.mode.state()
    }

    /// Live view of the mode, readable while a change request blocks.
    pub fn mode_watch(&self) -> ModeWatch {
        self.mode.watch()
    }

    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }
}
