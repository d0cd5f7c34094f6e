// OS process probe port: identity of this host and liveness of pids on it

/// Looks up the local host and process table
pub trait ProcessProbe: Send + Sync {
    fn hostname(&self) -> String;

    fn current_pid(&self) -> u32;

    /// Whether a process with `pid` exists on this host
    fn is_alive(&self, pid: u32) -> bool;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    /// Fixed hostname with an editable set of live pids
    #[derive(Clone)]
    pub struct StaticProbe {
        hostname: String,
        pid: u32,
        alive: Arc<Mutex<HashSet<u32>>>,
    }

    impl StaticProbe {
        pub fn new(hostname: impl Into<String>, pid: u32) -> Self {
            let mut alive = HashSet::new();
            alive.insert(pid);
            Self {
                hostname: hostname.into(),
                pid,
                alive: Arc::new(Mutex::new(alive)),
            }
        }

        pub fn spawn(&self, pid: u32) {
            self.alive.lock().unwrap().insert(pid);
        }

        pub fn kill(&self, pid: u32) {
            self.alive.lock().unwrap().remove(&pid);
        }
    }

    impl ProcessProbe for StaticProbe {
        fn hostname(&self) -> String {
            self.hostname.clone()
        }

        fn current_pid(&self) -> u32 {
            self.pid
        }

        fn is_alive(&self, pid: u32) -> bool {
            self.alive.lock().unwrap().contains(&pid)
        }
    }
}
