//! Resource accounting for toy runs

use std::time::{Duration, Instant};

use sysinfo::{Pid, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Wall-clock and resident-memory cost of a run
#[derive(Debug)]
pub struct RunMetrics {
    system: System,
    pid: Option<Pid>,
    started: Instant,
    start_memory: u64,
    iterations: u64,
}

/// Summary of a finished run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub iterations: u64,
    pub elapsed: Duration,
    /// Resident memory growth over the run, in bytes
    pub memory_delta: i64,
}

impl RunSummary {
    /// Memory growth per iteration in MB
    #[must_use]
    pub fn mb_per_iteration(&self) -> f64 {
        if self.iterations == 0 {
            0.0
        } else {
            self.memory_delta as f64 / BYTES_PER_MB / self.iterations as f64
        }
    }

    /// Wall-clock time per iteration in milliseconds
    #[must_use]
    pub fn ms_per_iteration(&self) -> f64 {
        if self.iterations == 0 {
            0.0
        } else {
            self.elapsed.as_secs_f64() * 1000.0 / self.iterations as f64
        }
    }
}

impl RunMetrics {
    /// Start timing and take the memory baseline
    #[must_use]
    pub fn start() -> Self {
        let mut system = System::new();
        let pid = sysinfo::get_current_pid().ok();
        let start_memory = resident_memory(&mut system, pid);
        Self {
            system,
            pid,
            started: Instant::now(),
            start_memory,
            iterations: 0,
        }
    }

    pub fn record_iteration(&mut self) {
        self.iterations += 1;
    }

    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Current resident memory of this process in bytes, 0 when unavailable
    pub fn current_memory(&mut self) -> u64 {
        resident_memory(&mut self.system, self.pid)
    }

    pub fn finish(mut self) -> RunSummary {
        let end_memory = self.current_memory();
        RunSummary {
            iterations: self.iterations,
            elapsed: self.started.elapsed(),
            memory_delta: end_memory as i64 - self.start_memory as i64,
        }
    }
}

fn resident_memory(system: &mut System, pid: Option<Pid>) -> u64 {
    let Some(pid) = pid else {
        return 0;
    };
    system.refresh_process(pid);
    system.process(pid).map_or(0, |p| p.memory())
}
