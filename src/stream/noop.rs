use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    interpretation::types::{Interpretation, InterpretationId, InterpretationRequest, LlmMetadata},
    stream::ports::{InterpretationStore, UsageOutcome, UsageRecorder},
};

/// Issues a fresh id without storing anything.
#[derive(Debug, Clone, Default)]
pub struct NoopInterpretationStore;

#[async_trait]
impl InterpretationStore for NoopInterpretationStore {
    async fn persist(
        &self,
        _request: &InterpretationRequest,
        _interpretation: &Interpretation,
        _metadata: &LlmMetadata,
    ) -> anyhow::Result<InterpretationId> {
        Ok(Uuid::new_v4().to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct NoopUsageRecorder;

#[async_trait]
impl UsageRecorder for NoopUsageRecorder {
    async fn record(&self, _request: &InterpretationRequest, _outcome: UsageOutcome) {}
}
