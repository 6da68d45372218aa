use crate::core::auditor::{RunAuditor, RunContext};
use crate::core::normalizer::RecordNormalizer;
use crate::core::rules::{EvaluationContext, RuleEngine};
use crate::domain::model::{RawBatch, RawRecord, RecordOutcome, RunArtifacts};
use crate::utils::error::{NormalizerError, Result};
use std::sync::Arc;
use tokio::task::JoinSet;

/// 記錄層級的平行處理器。
///
/// 正規化與規則檢查沒有共享的可變狀態，因此可以切塊丟給 blocking worker；
/// 結果依原始順序重組後，再由單一的 [`RunAuditor`] 折疊。
#[derive(Clone)]
pub struct BatchProcessor {
    normalizer: Arc<RecordNormalizer>,
    engine: Arc<RuleEngine>,
    workers: usize,
}

impl BatchProcessor {
    pub fn new(normalizer: RecordNormalizer, engine: RuleEngine, workers: usize) -> Self {
        Self {
            normalizer: Arc::new(normalizer),
            engine: Arc::new(engine),
            workers: workers.max(1),
        }
    }

    pub fn process_record(
        normalizer: &RecordNormalizer,
        engine: &RuleEngine,
        ctx: &EvaluationContext,
        raw: &RawRecord,
    ) -> RecordOutcome {
        let record = normalizer.normalize(raw);
        let findings = engine.evaluate(&record, ctx);
        RecordOutcome { record, findings }
    }

    /// 處理整批記錄，回傳順序與輸入相同
    pub async fn process(
        &self,
        records: Vec<RawRecord>,
        ctx: EvaluationContext,
    ) -> Result<Vec<RecordOutcome>> {
        if self.workers == 1 || records.len() < self.workers * 2 {
            return Ok(records
                .iter()
                .map(|raw| Self::process_record(&self.normalizer, &self.engine, &ctx, raw))
                .collect());
        }

        let total = records.len();
        let chunk_size = total.div_ceil(self.workers);
        tracing::debug!(
            "⚙️ Processing {} records on {} workers ({} per chunk)",
            total,
            self.workers,
            chunk_size
        );

        let mut tasks = JoinSet::new();
        let mut remaining = records;
        let mut chunk_index = 0usize;
        while !remaining.is_empty() {
            let tail = remaining.split_off(chunk_size.min(remaining.len()));
            let chunk = std::mem::replace(&mut remaining, tail);
            let normalizer = Arc::clone(&self.normalizer);
            let engine = Arc::clone(&self.engine);
            let index = chunk_index;

            tasks.spawn_blocking(move || {
                let outcomes: Vec<RecordOutcome> = chunk
                    .iter()
                    .map(|raw| Self::process_record(&normalizer, &engine, &ctx, raw))
                    .collect();
                (index, outcomes)
            });
            chunk_index += 1;
        }

        let mut chunks = Vec::with_capacity(chunk_index);
        while let Some(joined) = tasks.join_next().await {
            let (index, outcomes) = joined.map_err(|e| NormalizerError::ProcessingError {
                message: format!("record worker failed: {}", e),
            })?;
            chunks.push((index, outcomes));
        }
        chunks.sort_by_key(|(index, _)| *index);

        let mut outcomes = Vec::with_capacity(total);
        for (_, chunk) in chunks {
            outcomes.extend(chunk);
        }
        Ok(outcomes)
    }

    /// 正規化 → 規則 → 稽核，產生本次執行的所有產出
    pub async fn run(&self, batch: RawBatch, run: RunContext) -> Result<RunArtifacts> {
        let ctx = EvaluationContext {
            reference_date: run.reference_date(),
        };
        let outcomes = self.process(batch.records, ctx).await?;

        let mut auditor = RunAuditor::new(run, batch.headers);
        for outcome in outcomes {
            auditor.observe(outcome);
        }
        Ok(auditor.finalize())
    }
}
