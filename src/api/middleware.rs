//! Shared-secret query-parameter authentication.
//!
//! Only `GET /cron-run-logic` is authenticated, per the fabric's external
//! contract — it's the one endpoint an outside scheduler hits with no
//! session of its own. The other endpoints are assumed to sit behind
//! whatever the operator UI's own auth layer already provides.

use super::envelope::ApiError;

pub fn check_secret_key(provided: &str, expected: &str) -> Result<(), ApiError> {
    if provided.is_empty() || provided != expected {
        return Err(ApiError::Unauthorized("invalid or missing secretKey".to_string()));
    }
    Ok(())
}
