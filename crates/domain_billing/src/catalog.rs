//! Fee catalog
//!
//! Categories group fee templates; templates describe a fee's base amount,
//! who it applies to, and the discount and late-fee terms copied onto each
//! student fee created from it.
//!
//! Templates are versioned rather than edited. Amending a template creates a
//! new row that supersedes the old one and closes the old row's effective
//! window, so fees already assigned keep the terms they were created with.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use core_kernel::{
    ActorId, EffectivePeriod, EnrollmentId, FeeCategoryId, FeeTemplateId, Money, Rate, StudentId,
    TermId,
};

use crate::error::BillingError;

/// What a fee is charged for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeeKind {
    Tuition,
    Registration,
    Materials,
    Exam,
    Certificate,
    LateFee,
    Deposit,
    Other,
}

/// Which students a template applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicabilityScope {
    All,
    NewStudents,
    ReturningStudents,
    /// Only students enrolled at one of the listed levels
    SpecificLevels(Vec<String>),
}

impl ApplicabilityScope {
    /// Higher values win when several templates match
    pub fn specificity(&self) -> u8 {
        match self {
            ApplicabilityScope::All => 1,
            ApplicabilityScope::NewStudents | ApplicabilityScope::ReturningStudents => 2,
            ApplicabilityScope::SpecificLevels(_) => 3,
        }
    }

    pub fn matches(&self, profile: &StudentProfile) -> bool {
        match self {
            ApplicabilityScope::All => true,
            ApplicabilityScope::NewStudents => profile.enrollment_status == EnrollmentStatus::New,
            ApplicabilityScope::ReturningStudents => {
                profile.enrollment_status == EnrollmentStatus::Returning
            }
            ApplicabilityScope::SpecificLevels(levels) => profile
                .level
                .as_ref()
                .map_or(false, |level| levels.iter().any(|l| l.eq_ignore_ascii_case(level))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrollmentStatus {
    New,
    Returning,
}

/// The facts about a student that template resolution and discounts need
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub student_id: StudentId,
    pub enrollment_status: EnrollmentStatus,
    pub level: Option<String>,
    pub has_enrolled_sibling: bool,
}

/// The academic event that caused a fee to be created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerContext {
    /// Restricts resolution to templates of this kind
    pub kind: Option<FeeKind>,
    pub trigger_date: NaiveDate,
    pub enrollment_id: Option<EnrollmentId>,
    pub term_id: Option<TermId>,
}

/// A grouping of fee templates, e.g. "Tuition" or "Exam fees"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeCategory {
    pub id: FeeCategoryId,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewFeeCategory {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

impl FeeCategory {
    pub fn create(
        request: NewFeeCategory,
        created_by: ActorId,
        now: DateTime<Utc>,
    ) -> Result<Self, BillingError> {
        request.validate()?;
        Ok(Self {
            id: FeeCategoryId::new_v7(),
            name: request.name.trim().to_string(),
            description: request.description,
            is_active: true,
            created_by,
            created_at: now,
            version: 0,
        })
    }
}

/// Late-fee terms: charged once when a fee is still unpaid after the grace period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LateFeeRule {
    pub grace_days: u32,
    pub amount: Money,
}

/// Discount for fees assigned at least `window_days` before they fall due
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarlyPaymentRule {
    pub percent: Decimal,
    pub window_days: u32,
}

/// A catalog entry from which student fees are assigned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeTemplate {
    pub id: FeeTemplateId,
    pub category_id: FeeCategoryId,
    pub name: String,
    pub kind: FeeKind,
    pub base_amount: Money,
    pub scope: ApplicabilityScope,
    pub due_days_after_trigger: u32,
    pub late_fee: Option<LateFeeRule>,
    pub early_payment: Option<EarlyPaymentRule>,
    pub sibling_discount_percent: Decimal,
    pub effective: EffectivePeriod,
    pub status: TemplateStatus,
    /// Catalog revision, starting at 1
    pub template_version: u32,
    /// The template this revision replaced
    pub supersedes: Option<FeeTemplateId>,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
    /// Storage version for optimistic concurrency
    pub version: u64,
}

fn positive_money(amount: &Money) -> Result<(), ValidationError> {
    if amount.is_positive() {
        Ok(())
    } else {
        Err(ValidationError::new("amount_must_be_positive"))
    }
}

fn percentage(value: &Decimal) -> Result<(), ValidationError> {
    if *value >= Decimal::ZERO && *value <= Decimal::ONE_HUNDRED {
        Ok(())
    } else {
        Err(ValidationError::new("percent_out_of_range"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewFeeTemplate {
    pub category_id: FeeCategoryId,
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    pub kind: FeeKind,
    #[validate(custom(function = "positive_money"))]
    pub base_amount: Money,
    pub scope: ApplicabilityScope,
    #[validate(range(max = 3650))]
    pub due_days_after_trigger: u32,
    pub late_fee: Option<LateFeeRule>,
    pub early_payment: Option<EarlyPaymentRule>,
    #[validate(custom(function = "percentage"))]
    pub sibling_discount_percent: Decimal,
    pub effective_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
}

/// Amendment of an optional rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleChange<T> {
    /// Carry the current rule over
    Keep,
    /// Drop the rule from the next revision
    Clear,
    Set(T),
}

impl<T> Default for RuleChange<T> {
    fn default() -> Self {
        RuleChange::Keep
    }
}

impl<T> RuleChange<T> {
    pub fn resolve(self, current: Option<T>) -> Option<T> {
        match self {
            RuleChange::Keep => current,
            RuleChange::Clear => None,
            RuleChange::Set(rule) => Some(rule),
        }
    }
}

/// Changes carried into the next revision of a template; `None` keeps the
/// current value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateAmendment {
    pub name: Option<String>,
    pub base_amount: Option<Money>,
    pub scope: Option<ApplicabilityScope>,
    pub due_days_after_trigger: Option<u32>,
    #[serde(default)]
    pub late_fee: RuleChange<LateFeeRule>,
    #[serde(default)]
    pub early_payment: RuleChange<EarlyPaymentRule>,
    pub sibling_discount_percent: Option<Decimal>,
    pub expiry_date: Option<NaiveDate>,
}

impl FeeTemplate {
    pub fn create(
        request: NewFeeTemplate,
        created_by: ActorId,
        now: DateTime<Utc>,
    ) -> Result<Self, BillingError> {
        request.validate()?;
        let template = Self {
            id: FeeTemplateId::new_v7(),
            category_id: request.category_id,
            name: request.name.trim().to_string(),
            kind: request.kind,
            base_amount: request.base_amount,
            scope: request.scope,
            due_days_after_trigger: request.due_days_after_trigger,
            late_fee: request.late_fee,
            early_payment: request.early_payment,
            sibling_discount_percent: request.sibling_discount_percent,
            effective: EffectivePeriod::new(request.effective_date, request.expiry_date)?,
            status: TemplateStatus::Active,
            template_version: 1,
            supersedes: None,
            created_by,
            created_at: now,
            version: 0,
        };
        template.check_terms()?;
        Ok(template)
    }

    /// Builds the next revision and closes this one
    ///
    /// The new revision takes effect on `today` (or on this revision's start
    /// date when that is still in the future). This revision's window is
    /// closed on the same day, so exactly one revision is in effect at a time.
    pub fn amend(
        &mut self,
        changes: TemplateAmendment,
        amended_by: ActorId,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<FeeTemplate, BillingError> {
        if self.status == TemplateStatus::Inactive {
            return Err(BillingError::AlreadyFinal {
                entity: "FeeTemplate",
                id: self.id.to_string(),
                status: "Inactive".into(),
            });
        }
        if self.effective.is_expired_on(today) {
            return Err(BillingError::invalid(format!(
                "template {} expired on {}; amend its latest revision",
                self.id,
                self.effective.expiry.map(|d| d.to_string()).unwrap_or_default()
            )));
        }

        let starts = today.max(self.effective.effective);
        let expiry = changes.expiry_date.or(self.effective.expiry);
        let next = FeeTemplate {
            id: FeeTemplateId::new_v7(),
            category_id: self.category_id,
            name: changes.name.map(|n| n.trim().to_string()).unwrap_or_else(|| self.name.clone()),
            kind: self.kind,
            base_amount: changes.base_amount.unwrap_or(self.base_amount),
            scope: changes.scope.unwrap_or_else(|| self.scope.clone()),
            due_days_after_trigger: changes
                .due_days_after_trigger
                .unwrap_or(self.due_days_after_trigger),
            late_fee: changes.late_fee.resolve(self.late_fee),
            early_payment: changes.early_payment.resolve(self.early_payment),
            sibling_discount_percent: changes
                .sibling_discount_percent
                .unwrap_or(self.sibling_discount_percent),
            effective: EffectivePeriod::new(starts, expiry)?,
            status: TemplateStatus::Active,
            template_version: self.template_version + 1,
            supersedes: Some(self.id),
            created_by: amended_by,
            created_at: now,
            version: 0,
        };
        next.check_terms()?;

        self.effective.expire_on(starts);
        Ok(next)
    }

    pub fn deactivate(&mut self) -> Result<(), BillingError> {
        if self.status == TemplateStatus::Inactive {
            return Err(BillingError::AlreadyFinal {
                entity: "FeeTemplate",
                id: self.id.to_string(),
                status: "Inactive".into(),
            });
        }
        self.status = TemplateStatus::Inactive;
        Ok(())
    }

    pub fn is_available_on(&self, date: NaiveDate) -> bool {
        self.status == TemplateStatus::Active && self.effective.contains(date)
    }

    fn check_terms(&self) -> Result<(), BillingError> {
        if self.name.is_empty() {
            return Err(BillingError::invalid("template name is required"));
        }
        if !self.base_amount.is_positive() {
            return Err(BillingError::InvalidAmount(format!(
                "base amount must be positive, got {}",
                self.base_amount
            )));
        }
        Rate::from_percentage(self.sibling_discount_percent)?;
        if let Some(rule) = &self.early_payment {
            Rate::from_percentage(rule.percent)?;
        }
        if let Some(rule) = &self.late_fee {
            self.base_amount.ensure_same_currency(&rule.amount)?;
            if rule.amount.is_negative() {
                return Err(BillingError::InvalidAmount(format!(
                    "late fee must not be negative, got {}",
                    rule.amount
                )));
            }
        }
        Ok(())
    }
}

/// Picks the single most specific active template for a student
///
/// Candidates must be active, in effect on `today`, match the student's
/// profile and, when the trigger names one, the fee kind. Among them the
/// most specific scope wins; a tie at the top is reported, never broken
/// arbitrarily.
pub fn resolve_applicable_template<'a>(
    templates: &'a [FeeTemplate],
    profile: &StudentProfile,
    trigger: &TriggerContext,
    today: NaiveDate,
) -> Result<&'a FeeTemplate, BillingError> {
    let candidates: Vec<&FeeTemplate> = templates
        .iter()
        .filter(|t| t.is_available_on(today))
        .filter(|t| trigger.kind.map_or(true, |kind| t.kind == kind))
        .filter(|t| t.scope.matches(profile))
        .collect();

    let best = candidates
        .iter()
        .map(|t| t.scope.specificity())
        .max()
        .ok_or_else(|| {
            BillingError::not_found(
                "FeeTemplate",
                format!(
                    "no template applies to {} (kind {:?}) on {}",
                    profile.student_id, trigger.kind, today
                ),
            )
        })?;

    let mut top: Vec<&FeeTemplate> = candidates
        .into_iter()
        .filter(|t| t.scope.specificity() == best)
        .collect();

    if top.len() > 1 {
        let mut ids: Vec<String> = top.iter().map(|t| t.id.to_string()).collect();
        ids.sort();
        return Err(BillingError::AmbiguousTemplate { candidates: ids });
    }
    top.pop()
        .ok_or_else(|| BillingError::InvariantViolation("resolution lost its candidate".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::Currency;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn request(scope: ApplicabilityScope) -> NewFeeTemplate {
        NewFeeTemplate {
            category_id: FeeCategoryId::new(),
            name: "Term tuition".into(),
            kind: FeeKind::Tuition,
            base_amount: Money::new(dec!(500), Currency::USD),
            scope,
            due_days_after_trigger: 7,
            late_fee: Some(LateFeeRule {
                grace_days: 3,
                amount: Money::new(dec!(15), Currency::USD),
            }),
            early_payment: None,
            sibling_discount_percent: dec!(10),
            effective_date: d(2026, 1, 1),
            expiry_date: None,
        }
    }

    fn profile(status: EnrollmentStatus, level: Option<&str>) -> StudentProfile {
        StudentProfile {
            student_id: StudentId::new(),
            enrollment_status: status,
            level: level.map(String::from),
            has_enrolled_sibling: false,
        }
    }

    fn trigger() -> TriggerContext {
        TriggerContext {
            kind: Some(FeeKind::Tuition),
            trigger_date: d(2026, 2, 1),
            enrollment_id: None,
            term_id: None,
        }
    }

    #[test]
    fn test_create_rejects_non_positive_base_amount() {
        let mut req = request(ApplicabilityScope::All);
        req.base_amount = Money::zero(Currency::USD);
        assert!(FeeTemplate::create(req, ActorId::new(), Utc::now()).is_err());
    }

    #[test]
    fn test_create_rejects_percent_over_100() {
        let mut req = request(ApplicabilityScope::All);
        req.sibling_discount_percent = dec!(120);
        assert!(FeeTemplate::create(req, ActorId::new(), Utc::now()).is_err());
    }

    #[test]
    fn test_create_rejects_inverted_window() {
        let mut req = request(ApplicabilityScope::All);
        req.expiry_date = Some(d(2025, 6, 1));
        assert!(FeeTemplate::create(req, ActorId::new(), Utc::now()).is_err());
    }

    #[test]
    fn test_most_specific_scope_wins() {
        let all = FeeTemplate::create(request(ApplicabilityScope::All), ActorId::new(), Utc::now())
            .unwrap();
        let levels = FeeTemplate::create(
            request(ApplicabilityScope::SpecificLevels(vec!["Grade 5".into()])),
            ActorId::new(),
            Utc::now(),
        )
        .unwrap();
        let templates = vec![all.clone(), levels.clone()];

        let p = profile(EnrollmentStatus::Returning, Some("grade 5"));
        let chosen = resolve_applicable_template(&templates, &p, &trigger(), d(2026, 2, 1)).unwrap();
        assert_eq!(chosen.id, levels.id);

        let p = profile(EnrollmentStatus::Returning, Some("Grade 6"));
        let chosen = resolve_applicable_template(&templates, &p, &trigger(), d(2026, 2, 1)).unwrap();
        assert_eq!(chosen.id, all.id);
    }

    #[test]
    fn test_equal_specificity_is_ambiguous() {
        let a = FeeTemplate::create(request(ApplicabilityScope::NewStudents), ActorId::new(), Utc::now())
            .unwrap();
        let b = FeeTemplate::create(request(ApplicabilityScope::NewStudents), ActorId::new(), Utc::now())
            .unwrap();
        let p = profile(EnrollmentStatus::New, None);
        let err = resolve_applicable_template(&[a, b], &p, &trigger(), d(2026, 2, 1)).unwrap_err();
        assert!(matches!(err, BillingError::AmbiguousTemplate { ref candidates } if candidates.len() == 2));
    }

    #[test]
    fn test_kind_filter_and_window() {
        let t = FeeTemplate::create(request(ApplicabilityScope::All), ActorId::new(), Utc::now())
            .unwrap();
        let p = profile(EnrollmentStatus::New, None);
        let mut exam = trigger();
        exam.kind = Some(FeeKind::Exam);
        assert!(matches!(
            resolve_applicable_template(std::slice::from_ref(&t), &p, &exam, d(2026, 2, 1)),
            Err(BillingError::NotFound { .. })
        ));
        assert!(resolve_applicable_template(std::slice::from_ref(&t), &p, &trigger(), d(2025, 12, 31)).is_err());
    }

    #[test]
    fn test_amend_creates_next_revision_and_expires_old() {
        let mut old = FeeTemplate::create(request(ApplicabilityScope::All), ActorId::new(), Utc::now())
            .unwrap();
        let changes = TemplateAmendment {
            base_amount: Some(Money::new(dec!(550), Currency::USD)),
            ..Default::default()
        };
        let next = old.amend(changes, ActorId::new(), d(2026, 3, 1), Utc::now()).unwrap();

        assert_eq!(next.template_version, 2);
        assert_eq!(next.supersedes, Some(old.id));
        assert_eq!(next.base_amount.amount(), dec!(550));
        assert_eq!(next.effective.effective, d(2026, 3, 1));
        assert_eq!(old.effective.expiry, Some(d(2026, 3, 1)));
        assert!(old.is_available_on(d(2026, 2, 28)));
        assert!(!old.is_available_on(d(2026, 3, 1)));
        assert!(next.is_available_on(d(2026, 3, 1)));
        assert_eq!(next.late_fee, old.late_fee);
    }

    #[test]
    fn test_amend_can_drop_and_replace_rules() {
        let mut req = request(ApplicabilityScope::All);
        req.early_payment = Some(EarlyPaymentRule { percent: dec!(5), window_days: 10 });
        let mut old = FeeTemplate::create(req, ActorId::new(), Utc::now()).unwrap();

        let changes = TemplateAmendment {
            late_fee: RuleChange::Clear,
            early_payment: RuleChange::Set(EarlyPaymentRule { percent: dec!(3), window_days: 7 }),
            ..Default::default()
        };
        let next = old.amend(changes, ActorId::new(), d(2026, 3, 1), Utc::now()).unwrap();

        assert!(next.late_fee.is_none());
        assert_eq!(next.early_payment.map(|r| r.percent), Some(dec!(3)));
        assert!(old.late_fee.is_some());
    }

    #[test]
    fn test_deactivated_template_is_not_resolved() {
        let mut t = FeeTemplate::create(request(ApplicabilityScope::All), ActorId::new(), Utc::now())
            .unwrap();
        t.deactivate().unwrap();
        assert!(t.deactivate().is_err());
        let p = profile(EnrollmentStatus::New, None);
        assert!(resolve_applicable_template(&[t], &p, &trigger(), d(2026, 2, 1)).is_err());
    }
}
