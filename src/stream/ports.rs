use async_trait::async_trait;

use crate::interpretation::{
    error::InterpretErrorKind,
    types::{Interpretation, InterpretationId, InterpretationRequest, LlmMetadata},
};

/// Persistence boundary: stores a final result and hands back its id.
#[async_trait]
pub trait InterpretationStore: Send + Sync {
    async fn persist(
        &self,
        request: &InterpretationRequest,
        interpretation: &Interpretation,
        metadata: &LlmMetadata,
    ) -> anyhow::Result<InterpretationId>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum UsageOutcome {
    Completed {
        interpretation_id: InterpretationId,
        metadata: LlmMetadata,
    },
    Failed {
        kind: Option<InterpretErrorKind>,
        code: String,
    },
}

/// Accounting boundary: told once per stream how it ended.
#[async_trait]
pub trait UsageRecorder: Send + Sync {
    async fn record(&self, request: &InterpretationRequest, outcome: UsageOutcome);
}
