use std::time::Duration;

use pool::farmer::Partial;
use pool::validation::{ValidatorError, WorkValidator};
use reqwest::StatusCode;

/// Validates partials against an external solver service.
///
/// The client is blocking. Create it outside of the async runtime and call it
/// from blocking tasks only.
pub struct SolverClient {
    client: reqwest::blocking::Client,
    url: String,
}

impl SolverClient {
    pub fn new(solver_url: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/validate", solver_url.trim_end_matches('/')),
        })
    }
}

impl WorkValidator for SolverClient {
    fn validate(&self, partial: &Partial) -> Result<bool, ValidatorError> {
        let res = self
            .client
            .post(&self.url)
            .json(partial)
            .send()
            .map_err(|e| ValidatorError::Unavailable(e.to_string()))?;

        match res.status() {
            StatusCode::OK => Ok(true),
            StatusCode::UNPROCESSABLE_ENTITY => {
                tracing::debug!(
                    "solver rejected partial from {}: {}",
                    partial.launcher_id,
                    res.text().unwrap_or_default()
                );
                Ok(false)
            }
            status => Err(ValidatorError::Protocol(format!(
                "unexpected status code {status}"
            ))),
        }
    }
}
