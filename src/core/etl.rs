use crate::core::Pipeline;
use crate::utils::error::Result;
use crate::utils::monitor::RunMonitor;
use std::time::Instant;

/// 依序執行 extract → transform → load
pub struct EtlEngine<P: Pipeline> {
    pipeline: P,
    monitor: RunMonitor,
}

impl<P: Pipeline> EtlEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self::new_with_monitoring(pipeline, false)
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: RunMonitor::new(monitor_enabled),
        }
    }

    pub fn monitor(&self) -> &RunMonitor {
        &self.monitor
    }

    pub async fn run(&self) -> Result<String> {
        tracing::info!("🚀 Starting normalization run");

        // Extract
        let started = Instant::now();
        let batch = self.pipeline.extract().await?;
        let loaded = batch.records.len();
        tracing::info!("📥 Extracted {} records from {}", loaded, batch.source);
        self.monitor.record_phase("extract", started, loaded);

        // Transform
        let started = Instant::now();
        let artifacts = self.pipeline.transform(batch).await?;
        let summary = &artifacts.summary;
        tracing::info!(
            "🔄 Normalized {} records: {} with WARN, {} with ERROR, {} excluded",
            summary.total_records,
            summary.records_with_warn,
            summary.records_with_error,
            summary.excluded_records
        );
        if summary.error_findings + summary.warn_findings > 0 {
            tracing::warn!(
                "⚠️ {} ERROR and {} WARN findings, see the issues report",
                summary.error_findings,
                summary.warn_findings
            );
        }
        self.monitor
            .record_phase("transform", started, summary.total_records);

        // Load
        let started = Instant::now();
        let cleaned = artifacts.cleaned.len();
        let output_path = self.pipeline.load(artifacts).await?;
        tracing::info!("💾 Artifacts written to {}", output_path);
        self.monitor.record_phase("load", started, cleaned);

        self.monitor.log_final_stats();
        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::auditor::{RunAuditor, RunContext};
    use crate::domain::model::{RawBatch, RunArtifacts};
    use crate::utils::error::NormalizerError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPipeline {
        calls: AtomicUsize,
        fail_transform: bool,
    }

    #[async_trait]
    impl Pipeline for CountingPipeline {
        async fn extract(&self) -> Result<RawBatch> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RawBatch::default())
        }

        async fn transform(&self, batch: RawBatch) -> Result<RunArtifacts> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_transform {
                return Err(NormalizerError::ProcessingError {
                    message: "boom".to_string(),
                });
            }
            Ok(RunAuditor::new(RunContext::start("memory", false), batch.headers).finalize())
        }

        async fn load(&self, _artifacts: RunArtifacts) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("runs/x".to_string())
        }
    }

    #[tokio::test]
    async fn test_engine_runs_all_phases() {
        let engine = EtlEngine::new_with_monitoring(
            CountingPipeline {
                calls: AtomicUsize::new(0),
                fail_transform: false,
            },
            true,
        );

        assert_eq!(engine.run().await.unwrap(), "runs/x");
        assert_eq!(engine.pipeline.calls.load(Ordering::SeqCst), 3);
        assert_eq!(engine.monitor().phases().len(), 3);
    }

    #[tokio::test]
    async fn test_engine_stops_on_failure() {
        let engine = EtlEngine::new(CountingPipeline {
            calls: AtomicUsize::new(0),
            fail_transform: true,
        });

        assert!(engine.run().await.is_err());
        assert_eq!(engine.pipeline.calls.load(Ordering::SeqCst), 2);
    }
}
