use sysinfo::{Disks, System};

use crate::storage::registry::NodeCapacity;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Snapshot the node's available capacity for a heartbeat: free memory,
/// logical CPU count, and free disk space on the mount backing the working
/// directory.
pub fn collect_capacity() -> NodeCapacity {
    let mut sys = System::new_all();
    sys.refresh_memory();

    NodeCapacity {
        ram_mb: (sys.available_memory() / BYTES_PER_MB) as f32,
        cpu_cores: sys.cpus().len() as f32,
        disk_mb: available_disk_mb(),
    }
}

fn available_disk_mb() -> f32 {
    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(_) => return 0.0,
    };

    let disks = Disks::new_with_refreshed_list();

    // The disk whose mount point is the longest prefix of the working
    // directory is the one this agent writes to.
    disks
        .iter()
        .filter(|disk| cwd.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| (disk.available_space() / BYTES_PER_MB) as f32)
        .unwrap_or(0.0)
}
