use std::path::Path;
use sysinfo::System;
use tracing::{info, warn};

/// Kill every process whose executable lives under `base`, except this one.
/// Returns how many processes were signalled.
pub fn terminate_processes_under(base: &Path) -> usize {
    let base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let own_pid = std::process::id();

    let mut sys = System::new();
    sys.refresh_processes();

    let mut killed = 0;
    for (pid, process) in sys.processes() {
        if pid.as_u32() == own_pid {
            continue;
        }
        let Some(exe) = process.exe() else {
            continue;
        };
        if !exe.starts_with(&base) {
            continue;
        }

        if process.kill() {
            info!(pid = pid.as_u32(), exe = %exe.display(), "Terminated orphaned plugin process");
            killed += 1;
        } else {
            warn!(pid = pid.as_u32(), exe = %exe.display(), "Failed to terminate orphaned plugin process");
        }
    }
    killed
}
