//! Unit tests for the Identifiers module

use core_kernel::{
    ActorId, AdjustmentId, CarryoverId, EnrollmentId, FeeCategoryId, FeeTemplateId,
    InvoiceId, InvoiceLineId, PaymentId, StudentFeeId, StudentId, TermId,
};
use uuid::Uuid;

mod student_id_tests {
    use super::*;

    #[test]
    fn test_new_generates_unique_ids() {
        assert_ne!(StudentId::new(), StudentId::new());
    }

    #[test]
    fn test_new_v7_is_time_ordered() {
        let first = StudentId::new_v7();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = StudentId::new_v7();
        assert!(first < second);
    }

    #[test]
    fn test_display_and_parse_round_trip() {
        let original = StudentId::new();
        let display = original.to_string();
        assert!(display.starts_with("STU-"));
        let parsed: StudentId = display.parse().unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_parse_without_prefix() {
        let uuid = Uuid::new_v4();
        let parsed: StudentId = uuid.to_string().parse().unwrap();
        assert_eq!(*parsed.as_uuid(), uuid);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("STU-not-a-uuid".parse::<StudentId>().is_err());
    }

    #[test]
    fn test_serializes_as_bare_uuid() {
        let uuid = Uuid::new_v4();
        let id = StudentId::from_uuid(uuid);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", uuid));
    }
}

#[test]
fn test_prefixes() {
    assert_eq!(StudentId::prefix(), "STU");
    assert_eq!(EnrollmentId::prefix(), "ENR");
    assert_eq!(TermId::prefix(), "TRM");
    assert_eq!(ActorId::prefix(), "USR");
    assert_eq!(FeeCategoryId::prefix(), "FCAT");
    assert_eq!(FeeTemplateId::prefix(), "FTPL");
    assert_eq!(StudentFeeId::prefix(), "SFEE");
    assert_eq!(InvoiceId::prefix(), "INV");
    assert_eq!(InvoiceLineId::prefix(), "INVL");
    assert_eq!(PaymentId::prefix(), "PAY");
    assert_eq!(AdjustmentId::prefix(), "ADJ");
    assert_eq!(CarryoverId::prefix(), "CRY");
}

#[test]
fn test_uuid_conversions() {
    let uuid = Uuid::new_v4();
    let id: InvoiceId = uuid.into();
    let back: Uuid = id.into();
    assert_eq!(uuid, back);
}
