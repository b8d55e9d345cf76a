//! Server background job coordination
//!
//! This module provides functionality for:
//! 1. Pausing the server's heavy background jobs for the length of a run
//! 2. Reporting the job queue while the pause is held
//! 3. Resuming the jobs on every exit path

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ingest::events::EventCode;
use crate::ingest::file_processor::FileProcessor;
use crate::ingest::server::ServerClient;

/// Jobs suspended while assets are being uploaded
pub const PAUSED_JOBS: &[&str] = &[
    "thumbnailGeneration",
    "metadataExtraction",
    "videoConversion",
    "faceDetection",
    "smartSearch",
];

const TICK: Duration = Duration::from_secs(5);
const RESUME_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Unpaused,
    Paused,
    Released,
}

/// Pause lease on the server's job queue
pub struct JobLease {
    client: Option<Arc<dyn ServerClient>>,
    state: Mutex<LeaseState>,
    paused: Mutex<Vec<String>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl JobLease {
    /// Pause the jobs with the admin client; without one the lease stays unpaused.
    pub async fn acquire(admin: Option<Arc<dyn ServerClient>>, processor: Arc<FileProcessor>) -> Self {
        let lease = Self {
            client: admin,
            state: Mutex::new(LeaseState::Unpaused),
            paused: Mutex::new(Vec::new()),
            ticker: Mutex::new(None),
        };

        let Some(client) = lease.client.clone() else {
            warn!("No admin API key, server jobs are not paused");
            return lease;
        };

        let mut paused = Vec::new();
        for job in PAUSED_JOBS {
            match client.pause_job(job).await {
                Ok(()) => paused.push(job.to_string()),
                Err(e) => warn!(job, error = %e, "Could not pause server job"),
            }
        }
        if paused.is_empty() {
            return lease;
        }
        info!(jobs = paused.len(), "Server jobs paused");
        *lease.paused.lock() = paused;
        *lease.state.lock() = LeaseState::Paused;
        *lease.ticker.lock() = Some(tokio::spawn(report_queue(client, processor)));
        lease
    }

    pub fn state(&self) -> LeaseState {
        *self.state.lock()
    }

    /// Resume the paused jobs; safe to call more than once.
    pub async fn release(&self) {
        if let Some(ticker) = self.ticker.lock().take() {
            ticker.abort();
        }
        {
            let mut state = self.state.lock();
            if *state != LeaseState::Paused {
                *state = LeaseState::Released;
                return;
            }
            *state = LeaseState::Released;
        }
        let Some(client) = self.client.clone() else {
            return;
        };
        let jobs = std::mem::take(&mut *self.paused.lock());
        resume_all(client, jobs).await;
    }
}

impl Drop for JobLease {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.lock().take() {
            ticker.abort();
        }
        if *self.state.lock() != LeaseState::Paused {
            return;
        }
        let (Some(client), Ok(handle)) = (self.client.clone(), tokio::runtime::Handle::try_current()) else {
            warn!("Server jobs left paused");
            return;
        };
        let jobs = std::mem::take(&mut *self.paused.lock());
        handle.spawn(resume_all(client, jobs));
    }
}

async fn resume_all(client: Arc<dyn ServerClient>, jobs: Vec<String>) {
    for job in jobs {
        match tokio::time::timeout(RESUME_TIMEOUT, client.resume_job(&job)).await {
            Ok(Ok(())) => debug!(job = %job, "Server job resumed"),
            Ok(Err(e)) => warn!(job = %job, error = %e, "Could not resume server job"),
            Err(_) => warn!(job = %job, "Timed out resuming server job"),
        }
    }
    info!("Server jobs resumed");
}

async fn report_queue(client: Arc<dyn ServerClient>, processor: Arc<FileProcessor>) {
    let mut interval = tokio::time::interval(TICK);
    interval.tick().await;
    loop {
        interval.tick().await;
        match client.get_jobs().await {
            Ok(jobs) => {
                let active: u64 = jobs.iter().map(|j| j.active).sum();
                let waiting: u64 = jobs.iter().map(|j| j.waiting).sum();
                processor.record_info(
                    EventCode::Info,
                    &[
                        ("jobs", "queue".to_string()),
                        ("active", active.to_string()),
                        ("waiting", waiting.to_string()),
                    ],
                );
            }
            Err(e) => debug!(error = %e, "Could not read server jobs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::file_processor::init_file_processor;
    use crate::ingest::server::fake::FakeServer;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_pause_and_release() {
        let server = Arc::new(FakeServer::new());
        let lease = JobLease::acquire(Some(server.clone()), init_file_processor(false)).await;
        assert_eq!(lease.state(), LeaseState::Paused);
        assert_eq!(server.paused_jobs().len(), PAUSED_JOBS.len());

        lease.release().await;
        lease.release().await;
        assert_eq!(lease.state(), LeaseState::Released);
        assert!(server.paused_jobs().is_empty());
        assert_eq!(server.resume_calls.load(Ordering::SeqCst), PAUSED_JOBS.len());
    }

    #[tokio::test]
    async fn test_without_admin() {
        let lease = JobLease::acquire(None, init_file_processor(false)).await;
        assert_eq!(lease.state(), LeaseState::Unpaused);
        lease.release().await;
        assert_eq!(lease.state(), LeaseState::Released);
    }

    #[tokio::test]
    async fn test_drop_resumes() {
        let server = Arc::new(FakeServer::new());
        {
            let _lease = JobLease::acquire(Some(server.clone()), init_file_processor(false)).await;
        }
        for _ in 0..50 {
            if server.paused_jobs().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(server.paused_jobs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_ticker() {
        let server = Arc::new(FakeServer::new());
        let processor = init_file_processor(false);
        let lease = JobLease::acquire(Some(server.clone()), processor.clone()).await;

        tokio::time::sleep(Duration::from_secs(11)).await;
        lease.release().await;
        let infos = processor.get_event_counts().get(&EventCode::Info).copied().unwrap_or(0);
        assert_eq!(infos, 2);
    }
}
