// Process probe implementation
// reason: sysinfo for the hostname, signal 0 (nix) for cheap pid liveness on unix
use quarry_core::port::ProcessProbe;
use sysinfo::System;
use tracing::{debug, warn};

/// Probe backed by the local OS
pub struct SystemProcessProbe {
    hostname: String,
    pid: u32,
}

impl SystemProcessProbe {
    pub fn new() -> Self {
        let hostname = System::host_name().unwrap_or_else(|| {
            warn!("Could not determine hostname, using \"localhost\"");
            "localhost".to_string()
        });
        Self {
            hostname,
            pid: std::process::id(),
        }
    }
}

impl Default for SystemProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SystemProcessProbe {
    fn hostname(&self) -> String {
        self.hostname.clone()
    }

    fn current_pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&self, pid: u32) -> bool {
        let alive = pid_exists(pid);
        debug!(pid = pid, alive = alive, "Process liveness probed");
        alive
    }
}

#[cfg(unix)]
fn pid_exists(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        // Exists but belongs to another user
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn pid_exists(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_process(sysinfo::Pid::from_u32(pid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        let probe = SystemProcessProbe::new();
        assert_eq!(probe.current_pid(), std::process::id());
        assert!(probe.is_alive(probe.current_pid()));
        assert!(!probe.hostname().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_reaped_child_is_not_alive() {
        let mut child = std::process::Command::new("true")
            .spawn()
            .expect("spawn `true`");
        let pid = child.id();
        child.wait().unwrap();

        let probe = SystemProcessProbe::new();
        assert!(!probe.is_alive(pid));
    }
}
