use serde::Serialize;

use crate::error::{DeployError, FailureKind};

/// Outcome of one deploy stage.
///
/// Expected remote failures never escape a stage as `Err`; they end up
/// here with `ok == false` and the category of the error in `failure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    pub ok: bool,
    pub message: String,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl StepResult {
    #[must_use]
    pub fn success(message: impl Into<String>, warnings: Vec<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            warnings,
            failure: None,
        }
    }

    #[must_use]
    pub fn failed(error: &DeployError, warnings: Vec<String>) -> Self {
        Self {
            ok: false,
            message: error.to_string(),
            warnings,
            failure: Some(error.kind()),
        }
    }

    #[must_use]
    pub fn from_result(result: Result<String, DeployError>, warnings: Vec<String>) -> Self {
        match result {
            Ok(message) => Self::success(message, warnings),
            Err(e) => Self::failed(&e, warnings),
        }
    }
}

/// Warnings collected while a stage runs. Every warning is also
/// logged as it is recorded.
#[derive(Debug, Default)]
pub struct Warnings(Vec<String>);

impl Warnings {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        tracing::warn!("{warning}");
        self.0.push(warning);
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}
