//! Tests for core_kernel error types

use core_kernel::error::CoreError;
use core_kernel::money::MoneyError;
use core_kernel::temporal::TemporalError;

#[test]
fn test_core_error_validation() {
    let error = CoreError::validation("Amount must be positive");

    match error {
        CoreError::Validation(msg) => assert_eq!(msg, "Amount must be positive"),
        _ => panic!("Expected Validation error"),
    }
}

#[test]
fn test_core_error_configuration() {
    let error = CoreError::configuration("Missing timezone");
    assert!(error.to_string().contains("Configuration error"));
}

#[test]
fn test_core_error_from_money_error() {
    let money_error = MoneyError::CurrencyMismatch("USD".to_string(), "KHR".to_string());
    let core_error: CoreError = money_error.into();

    assert!(matches!(core_error, CoreError::Money(_)));
}

#[test]
fn test_core_error_from_temporal_error() {
    let core_error: CoreError = TemporalError::Overflow("9999-12-31 + 1 days".into()).into();
    assert!(matches!(core_error, CoreError::Temporal(_)));
}
