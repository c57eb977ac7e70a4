use sysinfo::System;
use tracing::{info, warn};

use crate::bootstrap::{REGISTRY_PROGRAM, STORE_PROGRAM, UI_PROGRAM, WORKER_PROGRAM};

/// Terminate the cluster services launched on this machine, matched by
/// executable name. Best effort: a process that refuses the signal is
/// reported, not retried.
pub fn stop_local_services() -> usize {
    // Workers go first so they do not observe their store disappearing.
    let targets = [WORKER_PROGRAM, UI_PROGRAM, STORE_PROGRAM, REGISTRY_PROGRAM];
    let sys = System::new_all();
    let mut stopped = 0;

    for target in targets {
        for (pid, process) in sys.processes() {
            if process.name().to_string_lossy() != target {
                continue;
            }
            if process.kill() {
                info!("stopped {} (pid {})", target, pid);
                stopped += 1;
            } else {
                warn!("could not signal {} (pid {})", target, pid);
            }
        }
    }
    stopped
}
