use async_trait::async_trait;
use cadence_scheduler::{HandlerError, Job, JobHandler};
use tracing::info;

/// Stand-in consumer: logs each due job and its payload.
///
/// Real hosts subscribe handlers that interpret the payload (send a message,
/// call a webhook); the engine never looks inside it.
pub struct LogHandler;

#[async_trait]
impl JobHandler for LogHandler {
    async fn handle(&self, job: Job) -> Result<(), HandlerError> {
        let payload = serde_json::to_string(&job.payload).map_err(HandlerError::new)?;
        info!(
            job_id = %job.id,
            name = %job.name,
            group_id = job.group_id.as_deref().unwrap_or("-"),
            run = job.state.run_count + 1,
            %payload,
            "job due"
        );
        Ok(())
    }
}
