use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;
use mirror_common::error::MirrorError;

use crate::api::error::ApiError;

const MAX_KEY_LEN: usize = 32;

/// Project key taken from the `{key}` path segment, upper-cased.
pub struct ProjectKey(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ProjectKey {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError(MirrorError::Validation(e.body_text())))?;

        let key = raw.trim().to_ascii_uppercase();
        let valid = !key.is_empty()
            && key.len() <= MAX_KEY_LEN
            && key.starts_with(|c: char| c.is_ascii_alphabetic())
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

        if !valid {
            return Err(ApiError(MirrorError::Validation(format!(
                "invalid project key: {raw}"
            ))));
        }
        Ok(ProjectKey(key))
    }
}
