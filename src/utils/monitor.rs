use std::sync::Mutex;
use std::time::{Duration, Instant};
#[cfg(feature = "cli")]
use sysinfo::{Pid, RefreshKind, System};

/// 單一階段的耗時與處理筆數
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseStats {
    pub phase: String,
    pub elapsed: Duration,
    pub records: usize,
}

impl PhaseStats {
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.records as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(feature = "cli")]
struct ProcessSampler {
    system: System,
    pid: Pid,
    peak_memory_mb: u64,
}

#[cfg(feature = "cli")]
impl ProcessSampler {
    fn new() -> Option<Self> {
        let pid = sysinfo::get_current_pid().ok()?;
        let mut system = System::new_with_specifics(RefreshKind::everything());
        // 初始刷新
        system.refresh_all();
        Some(Self {
            system,
            pid,
            peak_memory_mb: 0,
        })
    }

    /// 回傳 (目前記憶體 MB, 峰值 MB, CPU%)
    fn sample(&mut self) -> Option<(u64, u64, f32)> {
        self.system.refresh_all();
        let process = self.system.process(self.pid)?;
        let memory_mb = process.memory() / 1024 / 1024;
        self.peak_memory_mb = self.peak_memory_mb.max(memory_mb);
        Some((memory_mb, self.peak_memory_mb, process.cpu_usage()))
    }
}

/// 執行監控：記錄每個階段的耗時與吞吐量，CLI 版本另外取樣行程記憶體
pub struct RunMonitor {
    enabled: bool,
    start_time: Instant,
    phases: Mutex<Vec<PhaseStats>>,
    #[cfg(feature = "cli")]
    sampler: Option<Mutex<ProcessSampler>>,
}

impl RunMonitor {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            start_time: Instant::now(),
            phases: Mutex::new(Vec::new()),
            #[cfg(feature = "cli")]
            sampler: if enabled {
                ProcessSampler::new().map(Mutex::new)
            } else {
                None
            },
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 記錄一個已完成的階段
    pub fn record_phase(&self, phase: &str, started: Instant, records: usize) {
        if !self.enabled {
            return;
        }

        let stats = PhaseStats {
            phase: phase.to_string(),
            elapsed: started.elapsed(),
            records,
        };
        tracing::info!(
            "⏱️ {} - {} records in {:?} ({:.0} records/s)",
            stats.phase,
            stats.records,
            stats.elapsed,
            stats.throughput()
        );
        self.log_memory(phase);

        if let Ok(mut phases) = self.phases.lock() {
            phases.push(stats);
        }
    }

    pub fn phases(&self) -> Vec<PhaseStats> {
        self.phases
            .lock()
            .map(|phases| phases.clone())
            .unwrap_or_default()
    }

    #[cfg(feature = "cli")]
    fn log_memory(&self, phase: &str) {
        let sample = self
            .sampler
            .as_ref()
            .and_then(|sampler| sampler.lock().ok())
            .and_then(|mut sampler| sampler.sample());
        if let Some((memory_mb, peak_mb, cpu)) = sample {
            tracing::info!(
                "📊 {} - CPU: {:.1}%, Memory: {}MB, Peak: {}MB",
                phase,
                cpu,
                memory_mb,
                peak_mb
            );
        }
    }

    #[cfg(not(feature = "cli"))]
    fn log_memory(&self, _phase: &str) {}

    pub fn log_final_stats(&self) {
        if !self.enabled {
            return;
        }
        let total: Duration = self.phases().iter().map(|p| p.elapsed).sum();
        tracing::info!(
            "📊 Final Stats - Total Time: {:?}, Phase Time: {:?}",
            self.start_time.elapsed(),
            total
        );
    }
}

impl Default for RunMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}
