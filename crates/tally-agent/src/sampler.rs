//! Host and process gauges.

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::warn;

/// Produces one set of gauge readings per call.
pub trait Sampler: Send {
    /// Takes a fresh reading of every gauge.
    fn sample(&mut self) -> Vec<(String, f64)>;
}

/// Reads process, memory, swap and CPU figures through `sysinfo`.
///
/// Gauges:
///
/// - `Alloc`, `Sys`, `ProcessCPU`: resident memory, virtual memory and CPU
///   share of this process
/// - `TotalMemory`, `FreeMemory`, `UsedMemory`, `TotalSwap`, `FreeSwap`
/// - `CPUutilization1` .. `CPUutilizationN` and `CPUcount`
/// - `RandomValue`: a uniform random number in `[0, 1)`
pub struct SystemSampler {
    system: System,
    pid: Option<Pid>,
}

impl std::fmt::Debug for SystemSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemSampler")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler {
    /// Creates a sampler for the current process.
    #[must_use]
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .inspect_err(|e| warn!(error = %e, "process gauges unavailable"))
            .ok();
        Self {
            system: System::new_all(),
            pid,
        }
    }
}

impl Sampler for SystemSampler {
    fn sample(&mut self) -> Vec<(String, f64)> {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();

        let mut gauges = Vec::with_capacity(16);

        if let Some(pid) = self.pid {
            self.system
                .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            if let Some(process) = self.system.process(pid) {
                gauges.push(("Alloc".to_string(), process.memory() as f64));
                gauges.push(("Sys".to_string(), process.virtual_memory() as f64));
                gauges.push(("ProcessCPU".to_string(), f64::from(process.cpu_usage())));
            }
        }

        gauges.push(("TotalMemory".to_string(), self.system.total_memory() as f64));
        gauges.push(("FreeMemory".to_string(), self.system.free_memory() as f64));
        gauges.push(("UsedMemory".to_string(), self.system.used_memory() as f64));
        gauges.push(("TotalSwap".to_string(), self.system.total_swap() as f64));
        gauges.push(("FreeSwap".to_string(), self.system.free_swap() as f64));

        let cpus = self.system.cpus();
        for (index, cpu) in cpus.iter().enumerate() {
            gauges.push((
                format!("CPUutilization{}", index + 1),
                f64::from(cpu.cpu_usage()),
            ));
        }
        gauges.push(("CPUcount".to_string(), cpus.len() as f64));

        gauges.push(("RandomValue".to_string(), rand::random::<f64>()));
        gauges
    }
}
