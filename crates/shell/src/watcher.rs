// SPDX-License-Identifier: MIT

//! Process resource sampling, grounded on `spec.md` §4.3: "A process watcher
//! samples `cpu_percent`, `rss`, `memory_percent` at a fixed interval for
//! every live process and keeps per-pid max and pipeline-level sums,
//! embedded into the annotation." `sysinfo` usage mirrors the pattern in
//! `ferri-core::jobs`.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, System};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Default sampling interval for the process watcher.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Peak resource usage observed for a single pid over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessStats {
    pub max_cpu_percent: f32,
    pub max_rss_bytes: u64,
    pub max_memory_percent: f32,
}

impl ProcessStats {
    fn observe(&mut self, cpu_percent: f32, rss_bytes: u64, memory_percent: f32) {
        self.max_cpu_percent = self.max_cpu_percent.max(cpu_percent);
        self.max_rss_bytes = self.max_rss_bytes.max(rss_bytes);
        self.max_memory_percent = self.max_memory_percent.max(memory_percent);
    }
}

/// Sum of every tracked pid's peak stats, the "pipeline-level sums" `spec.md`
/// asks for.
pub fn sum_stats<'a>(stats: impl Iterator<Item = &'a ProcessStats>) -> ProcessStats {
    stats.fold(ProcessStats::default(), |mut acc, s| {
        acc.max_cpu_percent += s.max_cpu_percent;
        acc.max_rss_bytes += s.max_rss_bytes;
        acc.max_memory_percent += s.max_memory_percent;
        acc
    })
}

struct WatcherState {
    stats: HashMap<u32, ProcessStats>,
}

/// A running sampler task; `stop` joins it and returns what it collected.
pub struct WatcherHandle {
    state: Arc<Mutex<WatcherState>>,
    stop: Arc<Notify>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    pub async fn stop(self) -> HashMap<u32, ProcessStats> {
        self.stop.notify_waiters();
        let _ = self.task.await;
        self.state.lock().stats.clone()
    }
}

/// Start sampling the given pids every `interval` until [`WatcherHandle::stop`]
/// is called. Pids that have already exited are silently skipped each tick
/// (`sysinfo::System::process` returns `None`).
pub fn spawn_watcher(pids: Vec<u32>, interval: Duration) -> WatcherHandle {
    let state = Arc::new(Mutex::new(WatcherState {
        stats: HashMap::new(),
    }));
    let stop = Arc::new(Notify::new());
    let state_task = state.clone();
    let stop_task = stop.clone();

    let task = tokio::spawn(async move {
        let mut system = System::new_all();
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    system.refresh_all();
                    let total_memory = system.total_memory().max(1) as f32;
                    let mut guard = state_task.lock();
                    for &pid in &pids {
                        if let Some(process) = system.process(Pid::from(pid as usize)) {
                            let rss = process.memory();
                            let memory_percent = rss as f32 / total_memory * 100.0;
                            guard
                                .stats
                                .entry(pid)
                                .or_default()
                                .observe(process.cpu_usage(), rss, memory_percent);
                        }
                    }
                }
                _ = stop_task.notified() => break,
            }
        }
    });

    WatcherHandle { state, stop, task }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_stats_adds_peaks_across_pids() {
        let a = ProcessStats {
            max_cpu_percent: 10.0,
            max_rss_bytes: 100,
            max_memory_percent: 1.0,
        };
        let b = ProcessStats {
            max_cpu_percent: 20.0,
            max_rss_bytes: 200,
            max_memory_percent: 2.0,
        };
        let total = sum_stats([a, b].iter());
        assert_eq!(total.max_cpu_percent, 30.0);
        assert_eq!(total.max_rss_bytes, 300);
        assert_eq!(total.max_memory_percent, 3.0);
    }

    #[tokio::test]
    async fn watcher_stops_cleanly_with_no_matching_pids() {
        let handle = spawn_watcher(vec![999_999_999], Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(25)).await;
        let stats = handle.stop().await;
        assert!(stats.is_empty());
    }
}
