//! Service registry: answers "is the capture service running?" before the
//! controller tries to open a connection to it.

use std::path::PathBuf;
use tracing::debug;

pub trait ServiceRegistry {
    fn is_running(&self, service: &str) -> bool;
}

impl<R: ServiceRegistry + ?Sized> ServiceRegistry for Box<R> {
    fn is_running(&self, service: &str) -> bool {
        (**self).is_running(service)
    }
}

/// The service writes its pid to a well-known file while it runs.
pub struct PidFileRegistry {
    path: PathBuf,
}

impl PidFileRegistry {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Pid recorded in the file, if the file exists and parses.
    pub fn registered_pid(&self) -> Option<u32> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        content.trim().parse().ok()
    }
}

impl ServiceRegistry for PidFileRegistry {
    fn is_running(&self, service: &str) -> bool {
        let Some(pid) = self.registered_pid() else {
            debug!("{} not registered ({})", service, self.path.display());
            return false;
        };
        let alive = process_alive(pid);
        debug!("{} registered with pid {} (alive: {})", service, pid, alive);
        alive
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    std::path::Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// For setups where the service does not publish a pid file.
pub struct AlwaysRunning;

impl ServiceRegistry for AlwaysRunning {
    fn is_running(&self, _service: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_pid_file_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PidFileRegistry::new(dir.path().join("sysdvr.pid"));
        assert_eq!(registry.registered_pid(), None);
        assert!(!registry.is_running("sysdvr"));
    }

    #[test]
    fn test_garbage_pid_file_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sysdvr.pid");
        std::fs::write(&path, "not-a-pid").unwrap();
        assert!(!PidFileRegistry::new(path).is_running("sysdvr"));
    }

    #[test]
    fn test_own_pid_is_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sysdvr.pid");
        std::fs::write(&path, format!("{}\n", std::process::id())).unwrap();

        let registry = PidFileRegistry::new(path);
        assert_eq!(registry.registered_pid(), Some(std::process::id()));
        assert!(registry.is_running("sysdvr"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_stale_pid_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sysdvr.pid");
        // above the default pid_max of 2^22
        std::fs::write(&path, "4194305").unwrap();
        assert!(!PidFileRegistry::new(path).is_running("sysdvr"));
    }
}
