use thiserror::Error;

pub type Result<T> = std::result::Result<T, RiskError>;

/// Everything the scoring core can fail with.
///
/// `ModelNotTrained` and `UnknownCategory` are recoverable and are handled
/// inside the crate (rule-only scoring and the "unknown" encoding bucket);
/// they only escape when a caller asks for a model prediction directly.
#[derive(Error, Debug)]
pub enum RiskError {
    #[error("invalid student snapshot: {field} {reason}")]
    Schema { field: &'static str, reason: String },

    #[error("no trained model is available")]
    ModelNotTrained,

    #[error("insufficient training data: got {got} rows, need at least {required}")]
    InsufficientData { got: usize, required: usize },

    #[error("unknown {field} category `{value}`")]
    UnknownCategory { field: &'static str, value: String },

    #[error("training {model} failed: {reason}")]
    Training { model: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RiskError {
    pub(crate) fn missing(field: &'static str) -> Self {
        RiskError::Schema {
            field,
            reason: "is required".to_string(),
        }
    }

    pub(crate) fn out_of_range(field: &'static str, value: f64, range: &str) -> Self {
        RiskError::Schema {
            field,
            reason: format!("must be within {range}, got {value}"),
        }
    }

    pub fn is_schema(&self) -> bool {
        matches!(self, RiskError::Schema { .. })
    }
}
