pub mod wrapped_generation;
pub mod wrapped_sweep;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::config::WorkerConfig;
use crate::services::wrapped::WrappedService;

/// Timeout for individual worker invocations (5 minutes).
pub(crate) const WORKER_TIMEOUT: Duration = Duration::from_secs(300);

/// Drain period before scheduler shutdown to let in-flight tasks complete.
#[cfg(test)]
const DRAIN_TIMEOUT: Duration = Duration::from_millis(10);
#[cfg(not(test))]
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// 所有 worker 的枚举，消除字符串匹配，编译期保证完整性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerName {
    WrappedGeneration,
    WrappedSweep,
}

impl WorkerName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WrappedGeneration => "wrapped_generation",
            Self::WrappedSweep => "wrapped_sweep",
        }
    }
}

/// When a job fires. Daily generation follows local wall-clock time in the
/// fixed zone, which a UTC cron expression cannot express across DST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSchedule {
    Cron(String),
    DailyAt { hour: u32, minute: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: WorkerName,
    pub schedule: JobSchedule,
    pub enabled: bool,
}

pub struct WorkerManager {
    service: WrappedService,
    shutdown_rx: broadcast::Receiver<()>,
    config: WorkerConfig,
}

impl WorkerManager {
    pub fn new(
        service: WrappedService,
        shutdown_rx: broadcast::Receiver<()>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            service,
            shutdown_rx,
            config: config.clone(),
        }
    }

    /// Single source of truth for all planned jobs and their schedules.
    pub fn planned_jobs(&self) -> Vec<JobSpec> {
        if !self.config.is_leader {
            return Vec::new();
        }

        vec![
            JobSpec {
                name: WorkerName::WrappedGeneration,
                schedule: JobSchedule::DailyAt {
                    hour: self.config.generation_hour,
                    minute: self.config.generation_minute,
                },
                enabled: true,
            },
            JobSpec {
                name: WorkerName::WrappedSweep,
                schedule: JobSchedule::Cron(self.config.sweep_cron.clone()),
                enabled: true,
            },
        ]
    }

    /// Start the workers and block until shutdown is signalled.
    pub async fn start(mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if !self.config.is_leader {
            tracing::info!("Worker leader disabled; skipping worker startup");
            return Ok(());
        }

        let mut scheduler = JobScheduler::new().await?;
        let daily = self.register_jobs(&scheduler).await;

        scheduler.start().await?;

        tracing::info!("Worker manager started");
        let _ = self.shutdown_rx.recv().await;

        tracing::info!(
            "Worker manager shutting down, draining for {}s",
            DRAIN_TIMEOUT.as_secs()
        );
        tokio::time::sleep(DRAIN_TIMEOUT).await;
        let _ = scheduler.shutdown().await;
        for handle in daily {
            handle.abort();
        }
        Ok(())
    }

    /// Register every enabled job. Cron jobs go to the scheduler; daily jobs
    /// run as their own task and are returned so shutdown can stop them.
    async fn register_jobs(&self, scheduler: &JobScheduler) -> Vec<JoinHandle<()>> {
        let mut daily = Vec::new();

        for spec in self.planned_jobs() {
            if !spec.enabled {
                tracing::info!(name = spec.name.as_str(), "Skipping disabled worker");
                continue;
            }

            let name_str = spec.name.as_str();
            match (spec.name, &spec.schedule) {
                (WorkerName::WrappedSweep, JobSchedule::Cron(cron)) => {
                    let service = self.service.clone();
                    add_job(scheduler, cron, name_str, move || {
                        let service = service.clone();
                        async move {
                            wrapped_sweep::run(&service).await;
                        }
                    })
                    .await;
                }
                (WorkerName::WrappedGeneration, JobSchedule::DailyAt { hour, minute }) => {
                    let service = self.service.clone();
                    let shutdown_rx = self.shutdown_rx.resubscribe();
                    let (hour, minute) = (*hour, *minute);
                    daily.push(tokio::spawn(async move {
                        if let Err(e) =
                            wrapped_generation::run_daily(service, hour, minute, shutdown_rx).await
                        {
                            tracing::error!(
                                worker = name_str,
                                error = %e,
                                "Daily wrapped generation stopped"
                            );
                        }
                    }));
                }
                (name, schedule) => {
                    tracing::error!(
                        worker = name.as_str(),
                        ?schedule,
                        "Unsupported schedule for worker"
                    );
                    continue;
                }
            }
            tracing::info!(name = name_str, schedule = ?spec.schedule, "Registered worker");
        }

        daily
    }
}

/// Add a job to the scheduler with an overlap guard and timeout wrapper.
async fn add_job<Fut, F>(scheduler: &JobScheduler, cron: &str, name: &'static str, mut run: F)
where
    F: FnMut() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(false));

    let job = Job::new_async(cron, move |_uuid, _lock| {
        let guard = running.clone();

        if guard
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!(
                worker = name,
                "Skipping worker invocation: previous run still in progress"
            );
            return Box::pin(async {});
        }

        let fut = run();
        Box::pin(async move {
            if tokio::time::timeout(WORKER_TIMEOUT, fut).await.is_err() {
                tracing::error!(
                    worker = name,
                    timeout_secs = WORKER_TIMEOUT.as_secs(),
                    "Worker timed out"
                );
            }
            guard.store(false, Ordering::SeqCst);
        })
    });

    match job {
        Ok(job) => {
            if let Err(err) = scheduler.add(job).await {
                tracing::error!(error=%err, cron, worker = name, "Failed to add worker job");
            }
        }
        Err(err) => tracing::error!(error=%err, cron, worker = name, "Failed to create worker job"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::broadcast;

    use super::*;
    use crate::artifacts::SledArtifactStore;
    use crate::clock::{Clock, SystemTimeSource};
    use crate::config::WrappedConfig;
    use crate::store::Store;

    fn service(tmp: &tempfile::TempDir) -> WrappedService {
        let store =
            Arc::new(Store::open(tmp.path().join("worker_test.sled").to_str().unwrap()).unwrap());
        let artifacts = Arc::new(SledArtifactStore::from_store(&store));
        WrappedService::new(
            store,
            artifacts,
            Clock::pacific(),
            Arc::new(SystemTimeSource),
            &WorkerConfig::default(),
            &WrappedConfig::default(),
        )
    }

    #[tokio::test]
    async fn leader_switch_controls_job_registration() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (tx, _) = broadcast::channel(2);

        let worker_cfg = WorkerConfig {
            is_leader: false,
            ..WorkerConfig::default()
        };

        let manager = WorkerManager::new(service(&tmp), tx.subscribe(), &worker_cfg);
        assert!(manager.planned_jobs().is_empty());
        manager
            .start()
            .await
            .expect("non-leader start should succeed");
    }

    #[tokio::test]
    async fn leader_plans_generation_and_sweep() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (tx, _) = broadcast::channel(2);

        let worker_cfg = WorkerConfig {
            generation_hour: 7,
            generation_minute: 15,
            sweep_cron: "0 */5 * * * *".to_string(),
            ..WorkerConfig::default()
        };

        let manager = WorkerManager::new(service(&tmp), tx.subscribe(), &worker_cfg);
        let jobs = manager.planned_jobs();
        assert_eq!(jobs.len(), 2);
        assert_eq!(
            jobs[0].schedule,
            JobSchedule::DailyAt { hour: 7, minute: 15 }
        );
        assert_eq!(jobs[1].schedule, JobSchedule::Cron("0 */5 * * * *".into()));
        assert!(jobs.iter().all(|j| j.enabled));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn leader_start_stops_on_shutdown() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (tx, _) = broadcast::channel(2);

        let manager = WorkerManager::new(service(&tmp), tx.subscribe(), &WorkerConfig::default());
        let handle = tokio::spawn(manager.start());
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("manager should stop")
            .expect("join");
        assert!(result.is_ok());
    }

    #[test]
    fn worker_names_are_distinct() {
        assert_ne!(
            WorkerName::WrappedGeneration.as_str(),
            WorkerName::WrappedSweep.as_str()
        );
    }
}
