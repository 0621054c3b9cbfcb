//! Pull and push routes for the external prober fleet.

use actix_web::{HttpResponse, get, post, web};
use serde::Deserialize;
use serde_json::Value;
use uptrack_service::ingress::{ExternalIngress, ResultPayload};

use crate::auth::Authorized;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct DueQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ResultsBody {
    pub results: Vec<Value>,
}

#[get("/domains/due")]
pub async fn due_domains(
    _auth: Authorized,
    ingress: web::Data<ExternalIngress>,
    query: web::Query<DueQuery>,
) -> Result<HttpResponse, AppError> {
    let due = ingress.due(query.limit).await?;
    Ok(HttpResponse::Ok().json(due))
}

#[post("/domains/result")]
pub async fn push_result(
    _auth: Authorized,
    ingress: web::Data<ExternalIngress>,
    payload: web::Json<ResultPayload>,
) -> Result<HttpResponse, AppError> {
    let response = ingress.push(&payload).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[post("/domains/results")]
pub async fn push_results(
    _auth: Authorized,
    ingress: web::Data<ExternalIngress>,
    body: web::Json<ResultsBody>,
) -> Result<HttpResponse, AppError> {
    let response = ingress.push_batch(body.into_inner().results).await?;
    Ok(HttpResponse::Ok().json(response))
}
