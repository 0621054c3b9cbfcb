//! Bearer token check for the prober fleet routes.

use std::future::{Ready, ready};

use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::{FromRequest, HttpRequest, web};
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// The configured token, kept only as a digest. `None` rejects every caller.
pub struct ApiToken {
    digest: Option<[u8; 32]>,
}

impl ApiToken {
    pub fn new(token: Option<&str>) -> Self {
        Self { digest: token.filter(|t| !t.is_empty()).map(digest) }
    }

    /// Digests have a fixed length, so the fold touches every byte whatever matches.
    pub fn verify(&self, presented: &str) -> bool {
        let Some(expected) = &self.digest else {
            return false;
        };
        let presented = digest(presented);
        expected.iter().zip(presented.iter()).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
    }
}

fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

/// Extractor that succeeds only for a valid `Authorization: Bearer` header.
pub struct Authorized;

impl FromRequest for Authorized {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(authorize(req))
    }
}

fn authorize(req: &HttpRequest) -> Result<Authorized, AppError> {
    let token = req.app_data::<web::Data<ApiToken>>().ok_or(AppError::Unauthorized)?;

    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    if token.verify(presented.trim()) { Ok(Authorized) } else { Err(AppError::Unauthorized) }
}
