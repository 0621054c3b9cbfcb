//! Wiring of the monitoring core from a [`Config`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::info;

use crate::alerts::AlertDispatcher;
use crate::config::Config;
use crate::database::{DatabaseImpl, open_database};
use crate::engine::{Notifier, ResultPipeline};
use crate::ingress::ExternalIngress;
use crate::monitoring::Prober;
use crate::orchestrator::{CheckOrchestrator, ConfigPlanResolver, PlanResolver, RetentionCleanup, RetentionPolicy};
use crate::queue::{JobRunner, WorkerPool, WorkerSettings};

/// Shared components. Both binaries build one of these; the HTTP server only
/// needs the ingress, the service process drives the background loops.
pub struct Services {
    pub config: Config,
    pub database: Arc<DatabaseImpl>,
    pub pipeline: Arc<ResultPipeline>,
    pub notifier: Arc<Notifier>,
    pub plans: Arc<dyn PlanResolver>,
    pub ingress: Arc<ExternalIngress>,
}

impl Services {
    pub async fn build(config: Config) -> Result<Self> {
        let database = Arc::new(open_database(&config.database.path, config.database.pool_size).await?);
        info!(path = %config.database.path.display(), "database ready");

        let http = reqwest::Client::builder()
            .user_agent(concat!("uptrack/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build alert HTTP client")?;
        let dispatcher = Arc::new(AlertDispatcher::with_default_channels(database.clone(), http, &config.alerts));

        let pipeline = Arc::new(ResultPipeline::new(database.clone()));
        let notifier = Arc::new(Notifier::new(database.clone(), dispatcher));
        let plans: Arc<dyn PlanResolver> = Arc::new(ConfigPlanResolver::new(&config.plans));
        let ingress = Arc::new(ExternalIngress::new(database.clone(), pipeline.clone()));

        Ok(Self { config, database, pipeline, notifier, plans, ingress })
    }

    pub fn orchestrator(&self) -> CheckOrchestrator {
        CheckOrchestrator::new(self.database.clone(), self.plans.clone(), self.config.orchestrator.mode)
    }

    pub fn worker_pool(&self) -> Result<WorkerPool> {
        let prober = Prober::new(Duration::from_secs(self.config.probe.timeout_secs))?;
        let runner = JobRunner::new(
            self.database.clone(),
            Arc::new(prober),
            self.pipeline.clone(),
            self.notifier.clone(),
            self.plans.clone(),
        );
        Ok(WorkerPool::new(self.database.clone(), Arc::new(runner), WorkerSettings::from(&self.config.worker)))
    }

    pub fn retention(&self) -> RetentionCleanup {
        RetentionCleanup::new(self.database.clone(), RetentionPolicy::from(&self.config.retention))
    }

    /// Run workers, the sweep loop and retention until `shutdown` flips to true.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let pool = Arc::new(self.worker_pool()?);
        let mut handles = pool.spawn(shutdown.clone());

        let orchestrator = Arc::new(self.orchestrator());
        let sweep_interval = Duration::from_secs(self.config.orchestrator.sweep_interval_secs.max(1));
        handles.push(tokio::spawn(orchestrator.run(sweep_interval, shutdown.clone())));
        handles.push(self.retention().start_periodic_cleanup(shutdown));

        info!(mode = %self.config.orchestrator.mode, "monitoring core running");
        for handle in handles {
            handle.await.context("background task panicked")?;
        }
        info!("monitoring core stopped");
        Ok(())
    }
}
