//! Errors from platform calls

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("{route} rejected with {status}: {body}")]
    BadRequest {
        route: String,
        status: u16,
        body: String,
    },

    #[error("{route} unauthorized (invalid or revoked token)")]
    Unauthorized { route: String },

    #[error("{route} forbidden: {body}")]
    Forbidden { route: String, body: String },

    #[error("{route} not found")]
    NotFound { route: String },

    #[error("{route} still rate limited after {attempts} attempts")]
    RateLimited { route: String, attempts: u32 },

    #[error("{route} failed with {status} after {attempts} attempts")]
    Server {
        route: String,
        status: u16,
        attempts: u32,
    },

    #[error("{route} request failed: {source}")]
    Transport {
        route: String,
        source: reqwest::Error,
    },

    #[error("{route} returned an unexpected body: {source}")]
    Decode {
        route: String,
        source: serde_json::Error,
    },

    #[error("Unsupported image format")]
    UnsupportedImage,
}

impl PlatformError {
    pub fn status(&self) -> Option<u16> {
        match self {
            PlatformError::BadRequest { status, .. } | PlatformError::Server { status, .. } => {
                Some(*status)
            }
            PlatformError::Unauthorized { .. } => Some(401),
            PlatformError::Forbidden { .. } => Some(403),
            PlatformError::NotFound { .. } => Some(404),
            PlatformError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound { .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, PlatformError::Unauthorized { .. })
    }

    /// The target relay endpoint is gone or its secret no longer works
    pub fn is_stale_endpoint(&self) -> bool {
        self.is_not_found() || self.is_unauthorized()
    }

    pub(crate) fn from_status(route: String, status: u16, body: String) -> Self {
        match status {
            401 => PlatformError::Unauthorized { route },
            403 => PlatformError::Forbidden { route, body },
            404 => PlatformError::NotFound { route },
            _ => PlatformError::BadRequest { route, status, body },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let route = || "GET /x".to_string();
        assert!(PlatformError::from_status(route(), 401, String::new()).is_unauthorized());
        assert!(PlatformError::from_status(route(), 404, String::new()).is_stale_endpoint());
        assert!(matches!(
            PlatformError::from_status(route(), 403, "no".into()),
            PlatformError::Forbidden { .. }
        ));
        let rejected = PlatformError::from_status(route(), 400, "bad".into());
        assert_eq!(rejected.status(), Some(400));
        assert!(!rejected.is_stale_endpoint());
    }
}
