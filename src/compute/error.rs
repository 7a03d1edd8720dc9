//! Typed failures surfaced by the resource client facade.

use thiserror::Error;

const IAM_GUIDANCE: &str = concat!(
    "grant the service identity Compute Admin (roles/compute.admin) and ",
    "Service Account User (roles/iam.serviceAccountUser); newly granted roles ",
    "can take a few minutes to propagate"
);

/// Errors raised by remote compute API calls.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteApiError {
    /// Credentials were missing or rejected (HTTP 401).
    #[error("authentication rejected: {message}")]
    Authentication {
        /// Provider or transport message.
        message: String,
    },
    /// Credentials were accepted but lack permission (HTTP 403).
    #[error("permission denied: {message}")]
    Authorization {
        /// Provider message.
        message: String,
    },
    /// The addressed resource does not exist (HTTP 404).
    #[error("resource not found: {message}")]
    NotFound {
        /// Provider message.
        message: String,
    },
    /// The resource already exists or conflicts with current state (HTTP 409).
    #[error("conflict: {message}")]
    Conflict {
        /// Provider message.
        message: String,
    },
    /// Retryable failure: server errors, throttling, or transport timeouts.
    #[error("transient provider failure ({}): {message}", code_label(.code))]
    Transient {
        /// HTTP status when one was received.
        code: Option<u16>,
        /// Provider or transport message.
        message: String,
    },
    /// Non-retryable failure that is not otherwise classified.
    #[error("provider request failed ({}): {message}", code_label(.code))]
    Permanent {
        /// HTTP status when one was received.
        code: Option<u16>,
        /// Provider or transport message.
        message: String,
    },
}

fn code_label(code: &Option<u16>) -> String {
    code.map_or_else(|| String::from("no status"), |value| format!("HTTP {value}"))
}

impl RemoteApiError {
    /// Classifies an HTTP status and message into the error taxonomy.
    #[must_use]
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        let text = message.into();
        match code {
            401 => Self::Authentication { message: text },
            403 => Self::Authorization { message: text },
            404 => Self::NotFound { message: text },
            409 => Self::Conflict { message: text },
            429 | 500..=599 => Self::Transient {
                code: Some(code),
                message: text,
            },
            _ => Self::Permanent {
                code: Some(code),
                message: text,
            },
        }
    }

    /// HTTP status associated with the failure, when known.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::Authentication { .. } => Some(401),
            Self::Authorization { .. } => Some(403),
            Self::NotFound { .. } => Some(404),
            Self::Conflict { .. } => Some(409),
            Self::Transient { code, .. } | Self::Permanent { code, .. } => *code,
        }
    }

    /// Returns `true` when re-issuing the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns `true` for credential or permission rejections.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::Authorization { .. }
        )
    }

    /// Operator guidance for authentication and authorisation failures.
    #[must_use]
    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::Authentication { .. } => Some(format!(
                "refresh the access token (gcloud auth print-access-token) or regenerate the service account key; {IAM_GUIDANCE}"
            )),
            Self::Authorization { .. } => Some(format!(
                "the identity is valid but lacks permissions: {IAM_GUIDANCE}"
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(401, "authentication")]
    #[case(403, "authorization")]
    #[case(404, "not-found")]
    #[case(409, "conflict")]
    #[case(429, "transient")]
    #[case(503, "transient")]
    #[case(400, "permanent")]
    fn from_status_classifies_codes(#[case] code: u16, #[case] expected: &str) {
        let err = RemoteApiError::from_status(code, "boom");
        let actual = match err {
            RemoteApiError::Authentication { .. } => "authentication",
            RemoteApiError::Authorization { .. } => "authorization",
            RemoteApiError::NotFound { .. } => "not-found",
            RemoteApiError::Conflict { .. } => "conflict",
            RemoteApiError::Transient { .. } => "transient",
            RemoteApiError::Permanent { .. } => "permanent",
        };
        assert_eq!(actual, expected);
        assert_eq!(err.code(), Some(code));
    }

    #[test]
    fn remediation_only_for_auth_failures() {
        let denied = RemoteApiError::from_status(403, "forbidden");
        assert!(denied.is_auth());
        assert!(
            denied
                .remediation()
                .is_some_and(|text| text.contains("roles/compute.admin"))
        );

        let transient = RemoteApiError::from_status(502, "bad gateway");
        assert!(transient.is_transient());
        assert!(transient.remediation().is_none());
    }

    #[test]
    fn transient_without_status_renders_label() {
        let err = RemoteApiError::Transient {
            code: None,
            message: String::from("timed out"),
        };
        assert_eq!(
            err.to_string(),
            "transient provider failure (no status): timed out"
        );
    }
}
