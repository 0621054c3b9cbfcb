use actix_web::{HttpRequest, error, web};
use std::sync::Arc;

use uptrack_service::ingress::ExternalIngress;

use crate::auth::ApiToken;
use crate::error::AppError;

pub mod domains;
pub mod health;

/// Mount every route together with the shared state they extract.
pub fn configure(ingress: Arc<ExternalIngress>, token: web::Data<ApiToken>) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(web::Data::from(ingress))
            .app_data(token)
            .app_data(web::JsonConfig::default().error_handler(|err, req| unprocessable(err, req)))
            .app_data(web::QueryConfig::default().error_handler(|err, req| unprocessable(err, req)))
            .service(health::health_route)
            .service(domains::due_domains)
            .service(domains::push_result)
            .service(domains::push_results);
    }
}

fn unprocessable(err: impl std::fmt::Display, _req: &HttpRequest) -> error::Error {
    AppError::Unprocessable(format!("Invalid request: {err}")).into()
}
