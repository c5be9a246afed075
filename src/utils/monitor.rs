#[cfg(feature = "cli")]
use std::sync::Mutex;
use std::time::{Duration, Instant};
#[cfg(feature = "cli")]
use sysinfo::{Pid, ProcessesToUpdate, System};

#[derive(Debug, Clone)]
pub struct SystemStats {
    pub memory_usage_mb: f64,
    pub peak_memory_mb: f64,
    pub elapsed_time: Duration,
}

/// 量測目前程序的記憶體用量 (RSS)
///
/// 稽核時用來估算每個專案讀取所需的記憶體，
/// `enabled` 為 false 時只記錄耗時。
#[cfg(feature = "cli")]
pub struct SystemMonitor {
    system: Mutex<System>,
    pid: Option<Pid>,
    start_time: Instant,
    peak_memory: Mutex<f64>,
    enabled: bool,
}

#[cfg(feature = "cli")]
impl SystemMonitor {
    pub fn new(enabled: bool) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!("Unable to get current PID, memory usage disabled: {}", e);
                None
            }
        };

        Self {
            system: Mutex::new(System::new()),
            pid,
            start_time: Instant::now(),
            peak_memory: Mutex::new(0.0),
            enabled,
        }
    }

    /// 目前的記憶體用量 (MB)，無法取得時回傳 None
    pub fn memory_usage_mb(&self) -> Option<f64> {
        let pid = self.pid?;
        let mut system = self.system.lock().ok()?;
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let process = system.process(pid)?;
        let memory_mb = process.memory() as f64 / 1024.0 / 1024.0;

        if let Ok(mut peak) = self.peak_memory.lock() {
            if memory_mb > *peak {
                *peak = memory_mb;
            }
        }

        Some(memory_mb)
    }

    pub fn get_stats(&self) -> Option<SystemStats> {
        if !self.enabled {
            return None;
        }

        let memory_usage_mb = self.memory_usage_mb()?;
        let peak_memory_mb = *self.peak_memory.lock().ok()?;

        Some(SystemStats {
            memory_usage_mb,
            peak_memory_mb,
            elapsed_time: self.start_time.elapsed(),
        })
    }

    pub fn log_stats(&self, phase: &str) {
        if let Some(stats) = self.get_stats() {
            tracing::info!(
                "📊 {} - Memory: {:.1}MB, Peak: {:.1}MB, Time: {:?}",
                phase,
                stats.memory_usage_mb,
                stats.peak_memory_mb,
                stats.elapsed_time
            );
        }
    }

    pub fn log_final_stats(&self) {
        if let Some(stats) = self.get_stats() {
            tracing::info!(
                "📊 Final Stats - Total Time: {:?}, Peak Memory: {:.1}MB",
                stats.elapsed_time,
                stats.peak_memory_mb
            );
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(feature = "cli")]
impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

// 為非CLI環境提供空實現
#[cfg(not(feature = "cli"))]
pub struct SystemMonitor {
    start_time: Instant,
}

#[cfg(not(feature = "cli"))]
impl SystemMonitor {
    pub fn new(_enabled: bool) -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn memory_usage_mb(&self) -> Option<f64> {
        None
    }

    pub fn get_stats(&self) -> Option<SystemStats> {
        None
    }

    pub fn log_stats(&self, _phase: &str) {}

    pub fn log_final_stats(&self) {}

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn is_enabled(&self) -> bool {
        false
    }
}

#[cfg(not(feature = "cli"))]
impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;

    #[test]
    fn test_memory_usage_is_measured_even_when_stats_disabled() {
        let monitor = SystemMonitor::new(false);
        assert!(monitor.get_stats().is_none());
        let memory = monitor.memory_usage_mb().unwrap();
        assert!(memory > 0.0);
    }
}
