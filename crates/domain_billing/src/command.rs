//! Uniform command results
//!
//! Every command returns a [`CommandResult`]: callers see either a success
//! with data or a failure with a human-readable reason, never a partial
//! outcome.

use serde::Serialize;

use crate::error::{BillingError, ErrorKind};

#[derive(Debug, Serialize)]
pub struct CommandResult<T> {
    pub succeeded: bool,
    pub message: String,
    pub data: Option<T>,
    pub error_kind: Option<ErrorKind>,
    #[serde(skip)]
    error: Option<BillingError>,
}

impl<T> CommandResult<T> {
    pub fn success(data: T, message: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            message: message.into(),
            data: Some(data),
            error_kind: None,
            error: None,
        }
    }

    pub fn failure(error: BillingError) -> Self {
        Self {
            succeeded: false,
            message: error.to_string(),
            data: None,
            error_kind: Some(error.kind()),
            error: Some(error),
        }
    }

    /// The error behind a failed result
    pub fn error(&self) -> Option<&BillingError> {
        self.error.as_ref()
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    /// Converts back into a `Result` for callers that compose commands
    pub fn into_result(self) -> Result<T, BillingError> {
        match (self.data, self.error) {
            (Some(data), None) => Ok(data),
            (_, Some(error)) => Err(error),
            (None, None) => Err(BillingError::InvariantViolation(format!(
                "command reported success without data: {}",
                self.message
            ))),
        }
    }
}

impl<T> From<Result<T, BillingError>> for CommandResult<T> {
    fn from(result: Result<T, BillingError>) -> Self {
        match result {
            Ok(data) => CommandResult::success(data, "OK"),
            Err(err) => CommandResult::failure(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_carries_kind_and_reason() {
        let result: CommandResult<()> = CommandResult::failure(BillingError::HasPayments("SFEE-1".into()));
        assert!(!result.succeeded);
        assert_eq!(result.error_kind, Some(ErrorKind::StateConflict));
        assert!(result.message.contains("SFEE-1"));
        assert!(matches!(result.error(), Some(BillingError::HasPayments(_))));
    }

    #[test]
    fn test_serialized_shape() {
        let result = CommandResult::success(42u32, "done");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["succeeded"], true);
        assert_eq!(json["data"], 42);
        assert!(json.get("error").is_none());
    }
}
