use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use uptrack_service::alerts::AlertDispatcher;
use uptrack_service::config::PlansConfig;
use uptrack_service::database::models::{DomainStatus, SslState};
use uptrack_service::database::{AccountRepository, DomainRepository, JobRepository, open_database};
use uptrack_service::engine::{Notifier, ResultPipeline};
use uptrack_service::monitoring::{Probe, Verdict};
use uptrack_service::orchestrator::{CheckMode, CheckOrchestrator, ConfigPlanResolver, PlanResolver};
use uptrack_service::queue::{Job, JobRunner, WorkerPool, WorkerSettings};

/// Answers from a fixed table and remembers what it was asked.
#[derive(Default)]
struct ScriptedProbe {
    verdicts: HashMap<String, Verdict>,
    calls: Mutex<Vec<(String, bool)>>,
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn probe(&self, name: &str, check_certificate: bool) -> Verdict {
        self.calls.lock().unwrap().push((name.to_string(), check_certificate));
        self.verdicts.get(name).cloned().unwrap_or_else(|| Verdict::down("unscripted"))
    }
}

#[tokio::test]
async fn local_sweep_probes_every_domain_and_schedules_down_evaluation() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(open_database(&dir.path().join("cycle.db"), 4).await.unwrap());
    let now = Utc::now();
    let account = db.insert_account("acme", "pro", now).await.unwrap();
    let healthy = db.register_domain(account.id, "up.example.com", None, now).await.unwrap();
    let broken = db.register_domain(account.id, "down.example.com", Some("spring"), now).await.unwrap();

    let probe = Arc::new(ScriptedProbe {
        verdicts: HashMap::from([
            ("up.example.com".to_string(), Verdict::ok().with_ssl(SslState::Valid)),
            ("down.example.com".to_string(), Verdict::down("connection refused")),
        ]),
        ..Default::default()
    });
    let plans: Arc<dyn PlanResolver> = Arc::new(ConfigPlanResolver::new(&PlansConfig::default()));
    let pipeline = Arc::new(ResultPipeline::new(db.clone()));
    let notifier = Arc::new(Notifier::new(db.clone(), Arc::new(AlertDispatcher::new(db.clone()))));
    let runner = JobRunner::new(db.clone(), probe.clone(), pipeline, notifier, plans.clone());
    let pool = WorkerPool::new(
        db.clone(),
        Arc::new(runner),
        WorkerSettings {
            concurrency: 1,
            poll_interval: Duration::from_millis(10),
            max_attempts: 3,
            task_timeout: Duration::from_secs(30),
            visibility_timeout: Duration::from_secs(120),
        },
    );

    let report = CheckOrchestrator::new(db.clone(), plans, CheckMode::Local).sweep(now).await.unwrap();
    assert_eq!((report.batches, report.domains), (1, 2));

    while pool.run_once("w-0", Utc::now()).await.unwrap() {}

    let mut calls = probe.calls.lock().unwrap().clone();
    calls.sort();
    assert_eq!(
        calls,
        vec![("down.example.com".to_string(), true), ("up.example.com".to_string(), true)]
    );

    let up = db.get_domain(healthy.id).await.unwrap().unwrap();
    assert_eq!(up.status, DomainStatus::Ok);
    assert_eq!(up.ssl_valid, SslState::Valid);
    assert!(up.queued_at.is_none());

    let down = db.get_domain(broken.id).await.unwrap().unwrap();
    assert_eq!(down.status, DomainStatus::Down);
    assert_eq!(down.last_check_error.as_deref(), Some("connection refused"));
    assert!(db.open_incident(broken.id).await.unwrap().is_some());

    let pending = db.list_jobs().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(Job::from_payload(&pending[0].payload).unwrap(), Job::EvaluateDown { domain_id: broken.id });
    assert!(pending[0].available_at >= now + TimeDelta::minutes(3) - TimeDelta::seconds(1));
}

#[tokio::test]
async fn free_plan_skips_certificate_checks() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(open_database(&dir.path().join("cycle.db"), 2).await.unwrap());
    let now = Utc::now();
    let account = db.insert_account("hobby", "free", now).await.unwrap();
    let domain = db.register_domain(account.id, "blog.example.com", None, now).await.unwrap();

    let probe = Arc::new(ScriptedProbe {
        verdicts: HashMap::from([("blog.example.com".to_string(), Verdict::ok())]),
        ..Default::default()
    });
    let plans: Arc<dyn PlanResolver> = Arc::new(ConfigPlanResolver::new(&PlansConfig::default()));
    let pipeline = Arc::new(ResultPipeline::new(db.clone()));
    let notifier = Arc::new(Notifier::new(db.clone(), Arc::new(AlertDispatcher::new(db.clone()))));
    let runner = JobRunner::new(db.clone(), probe.clone(), pipeline, notifier, plans);
    let pool = WorkerPool::new(db.clone(), Arc::new(runner), WorkerSettings {
        concurrency: 1,
        poll_interval: Duration::from_millis(10),
        max_attempts: 3,
        task_timeout: Duration::from_secs(30),
        visibility_timeout: Duration::from_secs(120),
    });

    let job = Job::CheckDomain { domain_id: domain.id, batch_id: None }.at(now).unwrap();
    db.enqueue_jobs(&[job], now).await.unwrap();
    assert!(pool.run_once("w-0", Utc::now()).await.unwrap());

    assert_eq!(probe.calls.lock().unwrap().as_slice(), &[("blog.example.com".to_string(), false)]);
    assert_eq!(db.get_domain(domain.id).await.unwrap().unwrap().status, DomainStatus::Ok);
}

#[tokio::test]
async fn check_for_deleted_domain_completes_as_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(open_database(&dir.path().join("cycle.db"), 2).await.unwrap());
    let now = Utc::now();
    let account = db.insert_account("acme", "pro", now).await.unwrap();
    let domain = db.register_domain(account.id, "gone.example.com", None, now).await.unwrap();

    let probe = Arc::new(ScriptedProbe::default());
    let plans: Arc<dyn PlanResolver> = Arc::new(ConfigPlanResolver::new(&PlansConfig::default()));
    let pipeline = Arc::new(ResultPipeline::new(db.clone()));
    let notifier = Arc::new(Notifier::new(db.clone(), Arc::new(AlertDispatcher::new(db.clone()))));
    let runner = JobRunner::new(db.clone(), probe.clone(), pipeline, notifier, plans);
    let pool = WorkerPool::new(db.clone(), Arc::new(runner), WorkerSettings {
        concurrency: 1,
        poll_interval: Duration::from_millis(10),
        max_attempts: 3,
        task_timeout: Duration::from_secs(30),
        visibility_timeout: Duration::from_secs(120),
    });

    let job = Job::CheckDomain { domain_id: domain.id, batch_id: None }.at(now).unwrap();
    db.enqueue_jobs(&[job], now).await.unwrap();
    db.delete_domain(domain.id).await.unwrap();

    assert!(pool.run_once("w-0", Utc::now()).await.unwrap());

    assert!(probe.calls.lock().unwrap().is_empty());
    assert!(db.get_domain(domain.id).await.unwrap().is_none());
    assert!(db.list_jobs().await.unwrap().is_empty());
}
