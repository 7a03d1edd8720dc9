//! Bearer token acquisition.

use std::ffi::OsString;
use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::remote::{CommandRunner, RemoteError};

/// OAuth access token sent as a bearer credential. Never printed.
#[derive(Clone, Eq, PartialEq)]
pub struct AccessToken(String);

impl fmt::Debug for AccessToken {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("AccessToken(<redacted>)")
    }
}

/// Errors raised while obtaining an access token.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TokenError {
    /// The token helper could not be started.
    #[error("could not run the token helper: {0}")]
    Command(#[from] RemoteError),
    /// The token helper exited non-zero.
    #[error("{program} exited with status {status_text}: {stderr}; run `gcloud auth login` or set STRATUS_ACCESS_TOKEN")]
    Rejected {
        /// Helper program.
        program: String,
        /// Human readable exit status.
        status_text: String,
        /// Captured stderr.
        stderr: String,
    },
    /// The token helper printed nothing.
    #[error("{program} returned an empty token; set STRATUS_ACCESS_TOKEN")]
    Empty {
        /// Helper program.
        program: String,
    },
}

impl AccessToken {
    /// Wraps a token value, trimming surrounding whitespace.
    #[must_use]
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_owned())
    }

    pub(super) fn secret(&self) -> &str {
        &self.0
    }

    /// Uses `configured` when set, otherwise asks
    /// `<gcloud_bin> auth print-access-token`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] when the helper cannot run, fails, or prints
    /// nothing.
    pub fn resolve<R: CommandRunner>(
        configured: Option<&str>,
        runner: &R,
        gcloud_bin: &str,
    ) -> Result<Self, TokenError> {
        if let Some(value) = configured.filter(|value| !value.trim().is_empty()) {
            debug!("using configured access token");
            return Ok(Self::new(value));
        }

        debug!(program = gcloud_bin, "requesting access token from gcloud");
        let args = [OsString::from("auth"), OsString::from("print-access-token")];
        let output = runner.run(gcloud_bin, &args)?;
        if !output.is_success() {
            return Err(TokenError::Rejected {
                program: gcloud_bin.to_owned(),
                status_text: output
                    .code
                    .map_or_else(|| String::from("unknown"), |code| code.to_string()),
                stderr: output.stderr.trim().to_owned(),
            });
        }

        let token = Self::new(&output.stdout);
        if token.0.is_empty() {
            return Err(TokenError::Empty {
                program: gcloud_bin.to_owned(),
            });
        }
        Ok(token)
    }
}
