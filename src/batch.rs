use serde::Serialize;
use serde_with::{serde_as, DisplayFromStr};

use crate::error::{Error, Result};
use crate::farmer::LauncherId;

/// Outcome of a batch operation over many farmers.
///
/// Processing stops at the first failure. Items before it stay applied and are
/// listed in `completed`; items after it are listed in `skipped`.
#[serde_as]
#[derive(Debug, Serialize)]
pub struct BatchReport<T> {
    pub completed: Vec<(LauncherId, T)>,
    #[serde_as(as = "Option<(_, DisplayFromStr)>")]
    pub failed: Option<(LauncherId, Error)>,
    pub skipped: Vec<LauncherId>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            completed: Vec::new(),
            failed: None,
            skipped: Vec::new(),
        }
    }
}

impl<T> BatchReport<T> {
    pub(crate) fn run<I, X, F>(items: I, mut op: F) -> Self
    where
        I: IntoIterator<Item = (LauncherId, X)>,
        F: FnMut(X) -> Result<T>,
    {
        let mut report = Self::default();
        for (launcher_id, item) in items {
            if report.failed.is_some() {
                report.skipped.push(launcher_id);
                continue;
            }
            match op(item) {
                Ok(value) => report.completed.push((launcher_id, value)),
                Err(e) => report.failed = Some((launcher_id, e)),
            }
        }
        report
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_none()
    }

    /// Collapse into the completed items, or the first error.
    pub fn into_result(self) -> Result<Vec<(LauncherId, T)>> {
        match self.failed {
            Some((_, e)) => Err(e),
            None => Ok(self.completed),
        }
    }
}
