use super::{BuiltinStages, ProcessStageExecutor, StageArgs, StageExecutor, StageName, StageOutcome};
use crate::errors::StageError;
use async_trait::async_trait;
use tracing::debug;

/// Sends each stage to its configured process, falling back to the built-in implementation.
#[derive(Debug, Clone)]
pub struct StageRouter {
    process: ProcessStageExecutor,
    builtin: BuiltinStages,
}

impl StageRouter {
    pub fn new(process: ProcessStageExecutor, builtin: BuiltinStages) -> Self {
        Self { process, builtin }
    }

    /// Where `stage` will run, for display.
    pub fn backend(&self, stage: StageName) -> &'static str {
        if self.process.handles(stage) {
            "process"
        } else {
            "builtin"
        }
    }

    pub fn builtin(&self) -> &BuiltinStages {
        &self.builtin
    }
}

#[async_trait]
impl StageExecutor for StageRouter {
    async fn dispatch(
        &self,
        stage: StageName,
        args: &StageArgs,
    ) -> Result<StageOutcome, StageError> {
        debug!(%stage, backend = self.backend(stage), "dispatching stage");
        if self.process.handles(stage) {
            self.process.dispatch(stage, args).await
        } else {
            self.builtin.dispatch(stage, args).await
        }
    }
}
