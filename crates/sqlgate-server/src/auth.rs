//! Operator identity.
//!
//! Authentication happens upstream; the proxy forwards the authenticated
//! user in `X-Authenticated-User`. Requests without it never reach a handler.

use axum::{extract::Request, middleware::Next, response::Response};

use crate::error::AppError;

pub const USER_HEADER: &str = "x-authenticated-user";

/// The authenticated operator, inserted as a request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator(pub String);

impl Operator {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub async fn require_operator(mut req: Request, next: Next) -> Result<Response, AppError> {
    let user = req
        .headers()
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(AppError::Unauthenticated)?
        .to_string();

    req.extensions_mut().insert(Operator(user));
    Ok(next.run(req).await)
}
