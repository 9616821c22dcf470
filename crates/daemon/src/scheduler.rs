use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, Utc};
use log::{debug, error, info, warn};

use crate::config::{RecorderConfig, RecordingsDirProvider};
use crate::discovery::{discover_stores, StoreLocation};
use crate::error::{SchedulerError, StoreError};
use crate::job::{JobRecord, JobStatus};
use crate::output::output_path;
use crate::store::JobStore;
use crate::supervisor::{CaptureFactory, CaptureSession};

/// A tracked capture is identified by its store file and the job's id in it
pub type RegistryKey = (PathBuf, i64);

/// Captures the scheduler started and has not yet stopped.
///
/// Lives exactly as long as the scheduler; never persisted.
pub struct RecorderRegistry<C> {
    entries: HashMap<RegistryKey, C>,
}

impl<C> Default for RecorderRegistry<C> {
    fn default() -> Self {
        Self { entries: HashMap::new() }
    }
}

impl<C: CaptureSession> RecorderRegistry<C> {
    pub fn insert(&mut self, key: RegistryKey, session: C) {
        if self.entries.insert(key.clone(), session).is_some() {
            warn!("Replaced tracked capture for job {} in {}", key.1, key.0.display());
        }
    }

    pub fn take(&mut self, key: &RegistryKey) -> Option<C> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &RegistryKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Job ids tracked for one store
    pub fn ids_for(&self, store: &Path) -> Vec<i64> {
        self.entries
            .keys()
            .filter(|(path, _)| path == store)
            .map(|(_, id)| *id)
            .collect()
    }

    /// Keys whose store is not among `stores`
    pub fn keys_outside(&self, stores: &HashSet<&Path>) -> Vec<RegistryKey> {
        self.entries
            .keys()
            .filter(|(path, _)| !stores.contains(path.as_path()))
            .cloned()
            .collect()
    }

    /// Whether a tracked capture is already writing to `output`
    pub fn holds_output(&self, output: &Path) -> bool {
        self.entries.values().any(|session| session.output() == output)
    }

    pub fn drain(&mut self) -> Vec<(RegistryKey, C)> {
        self.entries.drain().collect()
    }
}

/// What one poll cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub stores_seen: usize,
    pub stores_skipped: usize,
    pub started: usize,
    pub start_failures: usize,
    pub completed: usize,
    pub failed: usize,
    pub orphaned: usize,
    pub stale_dropped: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.started + self.start_failures + self.completed + self.failed + self.orphaned + self.stale_dropped == 0
    }
}

/// Two-phase polling loop over every discovered profile store
pub struct Scheduler<F: CaptureFactory> {
    config: RecorderConfig,
    factory: F,
    registry: RecorderRegistry<F::Session>,
}

impl<F: CaptureFactory> Scheduler<F> {
    pub fn new(config: RecorderConfig, factory: F) -> Self {
        Self {
            config,
            factory,
            registry: RecorderRegistry::default(),
        }
    }

    pub fn registry(&self) -> &RecorderRegistry<F::Session> {
        &self.registry
    }

    /// Run one cycle at `now` (unix seconds). Never fails; problems are logged
    /// and confined to the job or store that caused them.
    pub async fn poll_once(&mut self, now: i64) -> CycleReport {
        let stores = discover_stores(&self.config.store_dir);
        let mut report = CycleReport {
            stores_seen: stores.len(),
            ..CycleReport::default()
        };
        let mut started_now = HashSet::new();

        // Phase A: start due jobs
        let mut readable = Vec::with_capacity(stores.len());
        for location in &stores {
            let store = match JobStore::open(&location.path) {
                Ok(store) => store,
                Err(e) => {
                    warn!("Skipping store for profile {} this cycle: {}", location.profile_id, e);
                    report.stores_skipped += 1;
                    continue;
                }
            };
            if let Err(e) = self.start_due(&store, now, &mut report, &mut started_now).await {
                warn!("Could not start due jobs for profile {}: {}", location.profile_id, e);
            }
            readable.push(location);
        }

        self.drop_vanished_stores(&stores, &mut report).await;

        // Phase B: reconcile, then stop expired jobs
        for location in readable {
            let store = match JobStore::open(&location.path) {
                Ok(store) => store,
                Err(e) => {
                    warn!("Store for profile {} became unreadable: {}", location.profile_id, e);
                    continue;
                }
            };
            if let Err(e) = self.reconcile(&store, &started_now, &mut report).await {
                warn!("Could not reconcile profile {}: {}", location.profile_id, e);
            }
            if let Err(e) = self.stop_expired(&store, now, &started_now, &mut report).await {
                warn!("Could not stop expired jobs for profile {}: {}", location.profile_id, e);
            }
        }

        report
    }

    async fn start_due(
        &mut self,
        store: &JobStore,
        now: i64,
        report: &mut CycleReport,
        started_now: &mut HashSet<RegistryKey>,
    ) -> Result<(), StoreError> {
        for job in store.list_due(now)? {
            let key = (store.path().to_path_buf(), job.id);
            if self.registry.contains(&key) {
                warn!("Job {} is pending but already tracked; leaving it", job.id);
                continue;
            }
            if self.start_job(store, &job, key.clone()).await {
                started_now.insert(key);
                report.started += 1;
            } else {
                report.start_failures += 1;
            }
        }
        Ok(())
    }

    /// Start one job. A job that cannot be started is failed, not retried.
    async fn start_job(&mut self, store: &JobStore, job: &JobRecord, key: RegistryKey) -> bool {
        let registry = &self.registry;
        let output = output_path(
            &self.config.recordings_dir(),
            job.display_name(),
            &Local::now(),
            &self.config.container,
            |path| registry.holds_output(path),
        );
        let mut session = self.factory.create(&job.channel_url, output);

        if let Err(e) = session.start().await {
            error!("Failed to start recording for job {} ({}): {}", job.id, job.channel_name, e);
            mark(store, job.id, JobStatus::Failed);
            return false;
        }

        match store.set_status(job.id, JobStatus::Recording) {
            Ok(()) => {
                info!(
                    "Recording job {} ({}) until {} -> {}",
                    job.id,
                    job.display_name(),
                    job.end_time,
                    session.output().display()
                );
                self.registry.insert(key, session);
                true
            }
            Err(e) => {
                // An untracked capture must not outlive this call
                error!("Could not mark job {} as recording: {}; stopping capture", job.id, e);
                session.stop().await;
                mark(store, job.id, JobStatus::Failed);
                false
            }
        }
    }

    /// Match tracked captures against the store's `recording` rows.
    async fn reconcile(
        &mut self,
        store: &JobStore,
        started_now: &HashSet<RegistryKey>,
        report: &mut CycleReport,
    ) -> Result<(), StoreError> {
        let active = store.list_active()?;
        let active_ids: HashSet<i64> = active.iter().map(|j| j.id).collect();

        for id in self.registry.ids_for(store.path()) {
            if active_ids.contains(&id) {
                continue;
            }
            let key = (store.path().to_path_buf(), id);
            if let Some(mut session) = self.registry.take(&key) {
                warn!("Job {} is no longer recording in {}; stopping its capture", id, store.path().display());
                session.stop().await;
                report.stale_dropped += 1;
            }
        }

        for job in active {
            let key = (store.path().to_path_buf(), job.id);
            if self.registry.contains(&key) || started_now.contains(&key) {
                continue;
            }
            self.fail_orphan(store, &job, report);
        }
        Ok(())
    }

    async fn stop_expired(
        &mut self,
        store: &JobStore,
        now: i64,
        started_now: &HashSet<RegistryKey>,
        report: &mut CycleReport,
    ) -> Result<(), StoreError> {
        for job in store.list_expired(now)? {
            let key = (store.path().to_path_buf(), job.id);
            if started_now.contains(&key) {
                debug!("Job {} started this cycle; stopping next cycle", job.id);
                continue;
            }
            match self.registry.take(&key) {
                Some(mut session) => {
                    let result = session.stop().await;
                    if result.success {
                        info!("Job {} ({}) completed: {}", job.id, job.display_name(), result.output.display());
                        mark(store, job.id, JobStatus::Completed);
                        report.completed += 1;
                    } else {
                        warn!("Job {} ({}) failed on stop", job.id, job.display_name());
                        mark(store, job.id, JobStatus::Failed);
                        report.failed += 1;
                    }
                }
                None => self.fail_orphan(store, &job, report),
            }
        }
        Ok(())
    }

    fn fail_orphan(&self, store: &JobStore, job: &JobRecord, report: &mut CycleReport) {
        let err = SchedulerError::OrphanedJob {
            store: store.path().to_path_buf(),
            id: job.id,
        };
        warn!("{}; marking failed", err);
        mark(store, job.id, JobStatus::Failed);
        report.orphaned += 1;
    }

    /// Profiles removed since the last cycle take their captures with them
    async fn drop_vanished_stores(&mut self, stores: &[StoreLocation], report: &mut CycleReport) {
        let present: HashSet<&Path> = stores.iter().map(|s| s.path.as_path()).collect();
        for key in self.registry.keys_outside(&present) {
            if let Some(mut session) = self.registry.take(&key) {
                warn!("Store {} disappeared; stopping capture for job {}", key.0.display(), key.1);
                session.stop().await;
                report.stale_dropped += 1;
            }
        }
    }

    /// Stop every tracked capture and record the outcome. Output files are kept.
    pub async fn shutdown(&mut self) -> usize {
        let entries = self.registry.drain();
        let count = entries.len();
        if count > 0 {
            info!("Stopping {} active recording(s) before exit", count);
        }
        for ((path, id), mut session) in entries {
            let result = session.stop().await;
            let status = if result.success { JobStatus::Completed } else { JobStatus::Failed };
            match JobStore::open(&path) {
                Ok(store) => mark(&store, id, status),
                Err(e) => warn!("Could not record final status of job {}: {}", id, e),
            }
        }
        count
    }

    /// Poll until interrupted, then drain.
    pub async fn run(&mut self) -> std::io::Result<()> {
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));
        let mut shutdown = ShutdownSignal::new()?;

        info!(
            "Scheduler running: stores in {}, polling every {}s",
            self.config.store_dir.display(),
            interval.as_secs()
        );

        loop {
            let report = self.poll_once(Utc::now().timestamp()).await;
            if report.is_idle() {
                debug!("Poll cycle: {:?}", report);
            } else {
                info!("Poll cycle: {:?}", report);
            }

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("Shutdown requested");
        self.shutdown().await;
        Ok(())
    }
}

fn mark(store: &JobStore, id: i64, status: JobStatus) {
    if let Err(e) = store.set_status(id, status) {
        error!("Failed to set job {} to {}: {}", id, status, e);
    }
}

/// Interrupt and terminate, registered up front so none are missed mid-cycle
struct ShutdownSignal {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    #[cfg(unix)]
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    fn new() -> std::io::Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn recv(&mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => info!("Received SIGINT"),
            _ = self.terminate.recv() => info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
