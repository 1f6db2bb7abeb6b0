use async_trait::async_trait;
use timeagent_core::{Argument, JobError};
use timeagent_scheduler::{Agent, ExecuteError, RunContext};
use tracing::info;

/// Argument key that makes [`DemoAgent`] fail.
pub const FAIL_ARGUMENT: &str = "fail";

/// Bundled job: greets, echoes its arguments and fails on request.
pub struct DemoAgent;

#[async_trait]
impl Agent for DemoAgent {
    async fn execute(
        &self,
        ctx: &mut RunContext,
        arguments: &[Argument],
    ) -> Result<(), ExecuteError> {
        info!(agent = %ctx.agent_name(), "demo agent executing");
        ctx.add_protocol(format!("hello from {}", ctx.agent_name()));
        ctx.update().await?;

        if let Some(fail) = arguments.iter().find(|a| a.key == FAIL_ARGUMENT) {
            return Err(JobError::new("DEMO_FAILURE", format!("asked to fail: {}", fail.value)).into());
        }

        ctx.add_protocol(format!("processed {} argument(s)", arguments.len()));
        ctx.update().await?;
        Ok(())
    }
}
