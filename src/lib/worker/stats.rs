use sysinfo::System;

/// Host resources advertised to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostStats {
    pub total_cpus: u64,
    /// Total memory in MB.
    pub total_memory: u64,
    pub hostname: String,
}

pub fn get_stats(sysinfo: &System) -> HostStats {
    HostStats {
        total_cpus: sysinfo.cpus().len() as u64,
        total_memory: sysinfo.total_memory() / 1024 / 1024,
        hostname: System::host_name().unwrap_or_else(|| "Unknown".to_string()),
    }
}

pub fn host_stats() -> HostStats {
    get_stats(&System::new_all())
}
