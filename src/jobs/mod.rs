//! Scheduler jobs and close-of-business convergence.
//!
//! Jobs run asynchronously on the backend; every wait here goes through the
//! poller with the job polling settings.

use std::sync::Arc;

use chrono::Days;
use tracing::{debug, info};

use crate::client::{BackendClient, Job};
use crate::poll::{self, PollSettings, Probe};
use crate::verify::Result;

/// Triggers jobs and waits for them to settle.
#[derive(Clone)]
pub struct JobRunner {
    client: Arc<dyn BackendClient>,
    settings: PollSettings,
}

impl JobRunner {
    pub fn new(client: Arc<dyn BackendClient>, settings: PollSettings) -> Self {
        Self { client, settings }
    }

    pub async fn execute(&self, job: &Job) -> Result<()> {
        self.client.execute_job(job).await?;
        info!(job = %job, "Job triggered");
        Ok(())
    }

    /// Trigger `job` and wait until the scheduler reports it finished.
    #[tracing::instrument(name = "jobs.execute_and_wait", skip(self), fields(job = %job))]
    pub async fn execute_and_wait(&self, job: &Job) -> Result<()> {
        self.execute(job).await?;
        self.wait_until_finished(job).await
    }

    pub async fn wait_until_finished(&self, job: &Job) -> Result<()> {
        let client = self.client.as_ref();
        let alias = format!("{job} to finish");
        poll::await_value(&alias, &self.settings, || job_finished(client, job)).await?;
        info!(job = %job, "Job finished");
        Ok(())
    }

    /// Wait until no catch-up is running and COB has processed every loan up
    /// to the day before the current business date.
    #[tracing::instrument(name = "jobs.await_catch_up", skip(self))]
    pub async fn await_catch_up(&self) -> Result<()> {
        let client = self.client.as_ref();
        poll::await_value("loan COB catch-up", &self.settings, || catch_up_done(client)).await?;
        info!("COB catch-up complete");
        Ok(())
    }
}

async fn job_finished(client: &dyn BackendClient, job: &Job) -> Result<Probe<()>> {
    debug!(job = %job, "Waiting for job to finish");
    if client.job_running(job).await? {
        Ok(Probe::observed(format!("{job} still running")))
    } else {
        Ok(Probe::Ready(()))
    }
}

async fn catch_up_done(client: &dyn BackendClient) -> Result<Probe<()>> {
    let status = client.cob_status().await?;
    if status.catch_up_running {
        return Ok(Probe::observed("catch-up still running"));
    }

    let business_date = client.business_date().await?;
    let target = business_date
        .checked_sub_days(Days::new(1))
        .unwrap_or(business_date);
    Ok(match status.cob_processed_date {
        Some(processed) if processed >= target => Probe::Ready(()),
        processed => Probe::observed(format!(
            "COB processed date {processed:?}, waiting for {target}"
        )),
    })
}
