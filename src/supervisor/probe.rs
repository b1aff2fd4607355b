use sysinfo::{Pid, ProcessRefreshKind, System};

/// Zero-effect liveness probe on a recorded pid.
///
/// Asks the OS whether the process still exists without signaling it.
pub struct ProcessProbe {
    system: System,
}

impl ProcessProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Check whether the process with the given pid is still alive
    pub fn is_alive(&mut self, pid: u32) -> bool {
        let sys_pid = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new(),
        );
        self.system.process(sys_pid).is_some()
    }
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}
