use rust_decimal::Decimal;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Field-level validation failure raised before any write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Amount must be zero or more.
    NegativeAmount { field: &'static str },
    /// Amount must be strictly positive.
    NonPositiveAmount { field: &'static str },
    /// Amount has more than two fractional digits.
    ExcessPrecision { field: &'static str, value: Decimal },
    /// Amount does not fit the store's minor-unit integer.
    AmountOutOfRange { field: &'static str },
    /// Required text is empty after trimming.
    EmptyField { field: &'static str },
    /// Line items do not add up to the declared total.
    LineItemsMismatch { declared: Decimal, computed: Decimal },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NegativeAmount { field } => write!(f, "`{field}` must not be negative"),
            Self::NonPositiveAmount { field } => write!(f, "`{field}` must be greater than zero"),
            Self::ExcessPrecision { field, value } => {
                write!(f, "`{field}` value {value} has more than two decimal places")
            }
            Self::AmountOutOfRange { field } => write!(f, "`{field}` is out of range"),
            Self::EmptyField { field } => write!(f, "`{field}` must not be empty"),
            Self::LineItemsMismatch { declared, computed } => write!(
                f,
                "line items add up to {computed} but the declared total is {declared}"
            ),
        }
    }
}

impl Error for ValidationError {}

pub(crate) fn require_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField { field });
    }
    Ok(())
}
