use std::fmt;

/// Why a progress value was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    Missing,
    NotANumber,
    OutOfRange,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InvalidReason::Missing => "missing",
            InvalidReason::NotANumber => "not a number",
            InvalidReason::OutOfRange => "outside 0-100",
        };
        f.write_str(label)
    }
}

/// Errors reported by the progress evaluator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    /// A value the evaluator needs is outside its documented domain.
    #[error("invalid {field}: {reason}")]
    InvalidInput {
        field: &'static str,
        reason: InvalidReason,
    },

    /// Alert type string not in the enumeration.
    #[error("unknown alert type `{0}` (expected one of: data_entry_delay, problematic, critical, pre_demobilization, demobilization)")]
    UnknownAlertType(String),
}
