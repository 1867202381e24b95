//! Partial validation
//!
//! Verifying that a partial carries a valid proof of space for its challenge
//! is done by an external solver. The pool only checks that the partial is
//! well formed before handing it over.

use thiserror::Error;

use crate::farmer::{Partial, MAX_PLOT_SIZE, MIN_PLOT_SIZE, SIGNATURE_LEN};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidatorError {
    #[error("solver unavailable: {0}")]
    Unavailable(String),
    #[error("solver returned unexpected response: {0}")]
    Protocol(String),
}

#[mockall::automock]
pub trait WorkValidator {
    /// Returns `Ok(false)` if the solver judged the partial invalid.
    fn validate(&self, partial: &Partial) -> Result<bool, ValidatorError>;
}

/// Check the parts of a partial that don't need the solver.
pub fn check_partial_shape(partial: &Partial) -> Result<(), String> {
    if partial.signature.len() != SIGNATURE_LEN {
        return Err(format!(
            "signature length is invalid ({} != {SIGNATURE_LEN})",
            partial.signature.len()
        ));
    }
    if !(MIN_PLOT_SIZE..=MAX_PLOT_SIZE).contains(&partial.plot_size) {
        return Err(format!(
            "plot size k{} outside k{MIN_PLOT_SIZE}..=k{MAX_PLOT_SIZE}",
            partial.plot_size
        ));
    }
    if partial.difficulty == 0 {
        return Err("difficulty must be positive".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::check_partial_shape;
    use crate::farmer::{LauncherId, Partial};

    fn partial(signature_len: usize, plot_size: u8, difficulty: u64) -> Partial {
        Partial {
            challenge: [7; 32],
            launcher_id: LauncherId::new([1; 32]),
            signature: vec![0xAB; signature_len],
            timestamp: 1_700_000_000,
            difficulty,
            plot_size,
        }
    }

    #[rstest]
    #[case(96, 32, 1, true)]
    #[case(96, 25, 1, true)]
    #[case(96, 50, 1000, true)]
    #[case(95, 32, 1, false)]
    #[case(0, 32, 1, false)]
    #[case(96, 24, 1, false)]
    #[case(96, 51, 1, false)]
    #[case(96, 32, 0, false)]
    fn partial_shape(
        #[case] signature_len: usize,
        #[case] plot_size: u8,
        #[case] difficulty: u64,
        #[case] valid: bool,
    ) {
        let result = check_partial_shape(&partial(signature_len, plot_size, difficulty));
        assert_eq!(valid, result.is_ok(), "{result:?}");
    }
}
