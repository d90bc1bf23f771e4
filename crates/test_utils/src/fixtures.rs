//! Pre-built Test Fixtures
//!
//! Ready-to-use ledger data. Amounts and dates are fixed so scenario tests
//! can assert exact balances.

use chrono::NaiveDate;
use fake::faker::name::en::Name;
use fake::Fake;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use core_kernel::{Currency, FeeCategoryId, Money, StudentId};
use domain_billing::{
    AdHocFee, ApplicabilityScope, EnrollmentStatus, FeeKind, LateFeeRule, NewFeeCategory,
    NewFeeTemplate, StudentProfile,
};

/// Fixture for Money test data
pub struct MoneyFixtures;

impl MoneyFixtures {
    pub fn usd(amount: Decimal) -> Money {
        Money::new(amount, Currency::USD)
    }

    pub fn khr(amount: Decimal) -> Money {
        Money::new(amount, Currency::KHR)
    }

    /// Term tuition used by most scenarios
    pub fn tuition() -> Money {
        Self::usd(dec!(500.00))
    }

    pub fn usd_zero() -> Money {
        Money::zero(Currency::USD)
    }
}

/// Fixture for calendar dates
pub struct TemporalFixtures;

impl TemporalFixtures {
    pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid fixture date")
    }

    /// First day of the spring term
    pub fn term_start() -> NaiveDate {
        Self::date(2026, 1, 5)
    }

    /// The date catalog templates become effective
    pub fn catalog_start() -> NaiveDate {
        Self::date(2025, 8, 1)
    }
}

/// Fixture for student profiles
pub struct ProfileFixtures;

impl ProfileFixtures {
    pub fn returning(student_id: StudentId) -> StudentProfile {
        StudentProfile {
            student_id,
            enrollment_status: EnrollmentStatus::Returning,
            level: Some("Grade 5".to_string()),
            has_enrolled_sibling: false,
        }
    }

    pub fn with_sibling(student_id: StudentId) -> StudentProfile {
        StudentProfile {
            has_enrolled_sibling: true,
            ..Self::returning(student_id)
        }
    }

    pub fn new_student(student_id: StudentId) -> StudentProfile {
        StudentProfile {
            enrollment_status: EnrollmentStatus::New,
            ..Self::returning(student_id)
        }
    }
}

/// Fixture for catalog requests
pub struct CatalogFixtures;

impl CatalogFixtures {
    pub fn category(name: &str) -> NewFeeCategory {
        NewFeeCategory {
            name: name.to_string(),
            description: None,
        }
    }

    /// Tuition for every student, due 30 days after enrolment, with a
    /// sibling discount
    pub fn tuition(category_id: FeeCategoryId, amount: Money, sibling_percent: Decimal) -> NewFeeTemplate {
        NewFeeTemplate {
            category_id,
            name: "Term Tuition".to_string(),
            kind: FeeKind::Tuition,
            base_amount: amount,
            scope: ApplicabilityScope::All,
            due_days_after_trigger: 30,
            late_fee: None,
            early_payment: None,
            sibling_discount_percent: sibling_percent,
            effective_date: TemporalFixtures::catalog_start(),
            expiry_date: None,
        }
    }

    /// Registration fee that charges $25 after a 7-day grace period
    pub fn registration(category_id: FeeCategoryId) -> NewFeeTemplate {
        NewFeeTemplate {
            name: "Registration".to_string(),
            kind: FeeKind::Registration,
            base_amount: MoneyFixtures::usd(dec!(100.00)),
            due_days_after_trigger: 14,
            late_fee: Some(LateFeeRule {
                grace_days: 7,
                amount: MoneyFixtures::usd(dec!(25.00)),
            }),
            sibling_discount_percent: Decimal::ZERO,
            ..Self::tuition(category_id, MoneyFixtures::tuition(), Decimal::ZERO)
        }
    }
}

/// Fixture for one-off fees
pub struct AdHocFixtures;

impl AdHocFixtures {
    pub fn materials(amount: Money, due_date: NaiveDate) -> AdHocFee {
        AdHocFee {
            name: "Lab Materials".to_string(),
            kind: FeeKind::Materials,
            amount,
            due_date,
            grace_days: 0,
            late_fee_amount: None,
        }
    }

    pub fn with_late_fee(amount: Money, due_date: NaiveDate, grace_days: u32, late_fee: Money) -> AdHocFee {
        AdHocFee {
            name: "Exam Fee".to_string(),
            kind: FeeKind::Exam,
            amount,
            due_date,
            grace_days,
            late_fee_amount: Some(late_fee),
        }
    }
}

/// Fixture for actor display names
pub struct StringFixtures;

impl StringFixtures {
    pub fn staff_name() -> String {
        Name().fake()
    }
}
