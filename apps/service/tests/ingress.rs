use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use serde_json::json;
use uptrack_service::database::models::DomainStatus;
use uptrack_service::database::{AccountRepository, DomainRepository, open_database};
use uptrack_service::engine::ResultPipeline;
use uptrack_service::ingress::{ExternalIngress, IngressError, ResultPayload};
use uptrack_service::monitoring::{Verdict, VerdictStatus};

#[tokio::test]
async fn due_prefers_never_checked_domains() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(open_database(&dir.path().join("ingress.db"), 2).await.unwrap());
    let pipeline = Arc::new(ResultPipeline::new(db.clone()));
    let ingress = ExternalIngress::new(db.clone(), pipeline.clone());
    let now = Utc::now();
    let account = db.insert_account("fleet", "pro", now).await.unwrap();

    let mut ids = Vec::new();
    for name in ["n1.example.com", "n2.example.com", "n3.example.com", "c1.example.com", "c2.example.com"] {
        ids.push(db.register_domain(account.id, name, None, now).await.unwrap().id);
    }
    for id in &ids[3..] {
        pipeline.apply_at(*id, &Verdict::ok(), now - TimeDelta::hours(1)).await.unwrap();
    }

    let due = ingress.due(Some(2)).await.unwrap();
    assert_eq!(due.count, 2);
    assert_eq!(due.domains.iter().map(|d| d.id).collect::<Vec<_>>(), ids[..2].to_vec());

    let all = ingress.due(None).await.unwrap();
    assert_eq!(all.domains.last().map(|d| d.id), Some(ids[4]));
}

#[tokio::test]
async fn batch_with_repeated_id_applies_in_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(open_database(&dir.path().join("ingress.db"), 2).await.unwrap());
    let ingress = ExternalIngress::new(db.clone(), Arc::new(ResultPipeline::new(db.clone())));
    let now = Utc::now();
    let account = db.insert_account("fleet", "pro", now).await.unwrap();
    let domain = db.register_domain(account.id, "twice.example.com", None, now).await.unwrap();

    let report = ingress
        .push_batch(vec![
            json!({ "id": domain.id, "status": "ok", "ssl_valid": true }),
            json!({ "id": domain.id, "status": "down", "error": "502 from origin" }),
            json!({ "id": 77_777, "status": "ok" }),
            json!({ "id": domain.id, "status": "teapot" }),
        ])
        .await
        .unwrap();

    assert_eq!((report.processed, report.failed), (2, 2));
    assert_eq!(report.results[2].error.as_deref(), Some("domain not found"));
    assert_eq!(report.results[3].id, Some(domain.id));
    assert!(report.results[3].error.as_deref().unwrap_or_default().starts_with("invalid payload"));

    let stored = db.get_domain(domain.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DomainStatus::Down);
    assert_eq!(stored.history, vec![1, 0]);
    assert_eq!(stored.last_check_error.as_deref(), Some("502 from origin"));
}

#[tokio::test]
async fn single_push_rejects_unknown_domain_and_oversized_batches() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(open_database(&dir.path().join("ingress.db"), 2).await.unwrap());
    let ingress = ExternalIngress::new(db.clone(), Arc::new(ResultPipeline::new(db.clone())));

    let payload =
        ResultPayload { id: 5, status: VerdictStatus::Ok, ssl_valid: None, error: None, checked_at: None };
    assert!(matches!(ingress.push(&payload).await, Err(IngressError::UnknownDomain(5))));

    let oversized = (0..101).map(|i| json!({ "id": i, "status": "ok" })).collect();
    assert!(matches!(ingress.push_batch(oversized).await, Err(IngressError::BatchTooLarge(101))));
}
