mod chunking;
mod config;
mod context;
mod normalize;
mod parsing;
mod services;
mod stages;
mod state;

pub use config::{IngestionConfig, IngestionTuning};
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, PipelineServices};

use std::sync::Arc;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{ingestion_task::IngestionTask, material::Material},
    },
};
use tracing::{debug, info, warn};

use self::{
    context::PipelineContext,
    stages::{chunk, embed, persist, prepare_content},
    state::ready,
};

#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    pipeline_config: IngestionConfig,
    services: Arc<dyn PipelineServices>,
}

impl IngestionPipeline {
    pub fn new(db: Arc<SurrealDbClient>, services: Arc<dyn PipelineServices>) -> Self {
        Self::with_config(db, IngestionConfig::default(), services)
    }

    pub fn with_config(
        db: Arc<SurrealDbClient>,
        pipeline_config: IngestionConfig,
        services: Arc<dyn PipelineServices>,
    ) -> Self {
        Self {
            db,
            pipeline_config,
            services,
        }
    }

    /// Claims and drives a single ingestion task to completion or failure, updating both the
    /// task and its Material accordingly. Validation errors never retry; anything else does
    /// until the task's attempt budget is exhausted, at which point it dead-letters.
    #[tracing::instrument(
        skip_all,
        fields(
            task_id = %task.id,
            attempt = task.attempts,
            material_id = %task.material_id,
            owner_id = %task.owner_id
        )
    )]
    pub async fn process_task(&self, task: IngestionTask) -> Result<(), AppError> {
        let material = Material::get_for_owner(&task.material_id, &task.owner_id, &self.db).await?;
        Material::mark_processing(&material.id, &self.db).await?;

        match self.drive_pipeline(&material).await {
            Ok(()) => {
                IngestionTask::mark_completed(&task.id, &self.db).await?;
                info!(task_id = %task.id, attempt = task.attempts, "ingestion task succeeded");
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                let retryable = !matches!(err, AppError::Validation(_));

                Material::mark_failed(&material.id, reason.clone(), &self.db).await?;
                let updated = IngestionTask::mark_failed(&task.id, &reason, retryable, &self.db).await?;

                if matches!(updated.status, common::storage::types::ingestion_task::IngestionTaskStatus::DeadLetter(_)) {
                    warn!(task_id = %task.id, attempt = updated.attempts, "ingestion task moved to dead letter queue");
                } else {
                    warn!(task_id = %task.id, attempt = updated.attempts, error = %reason, "ingestion task failed; scheduled retry");
                }

                Err(err)
            }
        }
    }

    #[tracing::instrument(skip_all, fields(material_id = %material.id))]
    async fn drive_pipeline(&self, material: &Material) -> Result<(), AppError> {
        let mut ctx = PipelineContext::new(material, self.db.as_ref(), &self.pipeline_config, self.services.as_ref());

        let machine = ready();

        let machine = prepare_content(machine, &mut ctx).await.map_err(|err| ctx.abort(err))?;
        let machine = chunk(machine, &mut ctx).await.map_err(|err| ctx.abort(err))?;
        let machine = embed(machine, &mut ctx).await.map_err(|err| ctx.abort(err))?;
        let _machine = persist(machine, &mut ctx).await.map_err(|err| ctx.abort(err))?;

        debug!(material_id = %material.id, "ingestion pipeline finished");

        Ok(())
    }
}
