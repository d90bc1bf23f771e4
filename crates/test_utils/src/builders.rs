//! Test Data Builders
//!
//! Builders for ledger requests plus [`LedgerHarness`], a fully wired
//! service over the in-memory store. Harness helpers panic on failure so
//! scenario tests can stay focused on the step under test.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use core_kernel::{
    Actor, FeeCategoryId, FeeTemplateId, FixedClock, InMemorySequenceGenerator, InvoiceId, Money, StudentFeeId,
    StudentId, StaticActorContext, TermId,
};
use domain_billing::{
    AdHocFee, ApplicabilityScope, AssignFeeRequest, CreateInvoiceRequest, FeeCategory, FeeKind, FeeSelection, FeeTemplate,
    InMemoryLedgerStore, Invoice, LedgerConfig, LedgerService, NewFeeTemplate, NewPayment, Payment,
    PaymentMethod, StudentFee, StudentProfile, ADJUST_PAYMENTS,
};

use crate::fixtures::{
    AdHocFixtures, CatalogFixtures, MoneyFixtures, ProfileFixtures, StringFixtures, TemporalFixtures,
};

/// Builder for cashier payment input
pub struct NewPaymentBuilder {
    request: NewPayment,
}

impl NewPaymentBuilder {
    pub fn new(student_id: StudentId, amount: Money) -> Self {
        Self {
            request: NewPayment {
                student_id,
                invoice_id: None,
                student_fee_id: None,
                amount,
                method: PaymentMethod::Cash,
                payment_date: TemporalFixtures::term_start(),
                paid_for: None,
            },
        }
    }

    pub fn for_invoice(mut self, invoice_id: InvoiceId) -> Self {
        self.request.invoice_id = Some(invoice_id);
        self
    }

    pub fn for_fee(mut self, fee_id: StudentFeeId) -> Self {
        self.request.student_fee_id = Some(fee_id);
        self
    }

    pub fn method(mut self, method: PaymentMethod) -> Self {
        self.request.method = method;
        self
    }

    pub fn paid_on(mut self, date: NaiveDate) -> Self {
        self.request.payment_date = date;
        self
    }

    pub fn paid_for(mut self, text: impl Into<String>) -> Self {
        self.request.paid_for = Some(text.into());
        self
    }

    pub fn build(self) -> NewPayment {
        self.request
    }
}

/// Builder for catalog templates, starting from the tuition fixture
pub struct NewFeeTemplateBuilder {
    request: NewFeeTemplate,
}

impl NewFeeTemplateBuilder {
    pub fn tuition(category_id: FeeCategoryId) -> Self {
        Self {
            request: CatalogFixtures::tuition(category_id, MoneyFixtures::tuition(), Decimal::ZERO),
        }
    }

    pub fn amount(mut self, amount: Money) -> Self {
        self.request.base_amount = amount;
        self
    }

    pub fn sibling_discount(mut self, percent: Decimal) -> Self {
        self.request.sibling_discount_percent = percent;
        self
    }

    pub fn with_scope(mut self, scope: ApplicabilityScope) -> Self {
        self.request.scope = scope;
        self
    }

    pub fn with_kind(mut self, kind: FeeKind) -> Self {
        self.request.kind = kind;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.request.name = name.into();
        self
    }

    pub fn effective(mut self, from: NaiveDate, to: Option<NaiveDate>) -> Self {
        self.request.effective_date = from;
        self.request.expiry_date = to;
        self
    }

    pub fn due_after(mut self, days: u32) -> Self {
        self.request.due_days_after_trigger = days;
        self
    }

    pub fn build(self) -> NewFeeTemplate {
        self.request
    }
}

/// Builds an assignment request for a student with sensible defaults
pub fn assign_request(student: StudentProfile, selection: FeeSelection) -> AssignFeeRequest {
    AssignFeeRequest {
        student,
        selection,
        enrollment_id: None,
        term_id: None,
        trigger_date: TemporalFixtures::term_start(),
        manual_discount: None,
    }
}

/// A ledger service over in-memory ports, with a cashier and a supervisor
pub struct LedgerHarness {
    pub service: Arc<LedgerService>,
    pub store: Arc<InMemoryLedgerStore>,
    pub clock: Arc<FixedClock>,
    pub sequences: Arc<InMemorySequenceGenerator>,
    /// Regular staff without elevated permissions
    pub cashier: StaticActorContext,
    /// Holds the payment adjustment permission
    pub supervisor: StaticActorContext,
}

impl Default for LedgerHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerHarness {
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        let store = Arc::new(InMemoryLedgerStore::new());
        let clock = Arc::new(FixedClock::at_date(TemporalFixtures::term_start()));
        let sequences = Arc::new(InMemorySequenceGenerator::new());
        let service = Arc::new(LedgerService::new(
            store.clone(),
            clock.clone(),
            sequences.clone(),
            config,
        ));
        Self {
            service,
            store,
            clock,
            sequences,
            cashier: StaticActorContext::new(Actor::new(StringFixtures::staff_name()).with_role("cashier")),
            supervisor: StaticActorContext::new(Actor::new(StringFixtures::staff_name()).with_role("supervisor"))
                .grant(ADJUST_PAYMENTS),
        }
    }

    pub async fn category(&self, name: &str) -> FeeCategory {
        self.service
            .create_category(CatalogFixtures::category(name), &self.cashier)
            .await
            .into_result()
            .expect("category created")
    }

    pub async fn template(&self, request: NewFeeTemplate) -> FeeTemplate {
        self.service
            .create_template(request, &self.cashier)
            .await
            .into_result()
            .expect("template created")
    }

    /// Creates a tuition template in a fresh category
    pub async fn tuition_template(&self, amount: Money, sibling_percent: Decimal) -> FeeTemplate {
        let category = self.category("Tuition").await;
        self.template(
            NewFeeTemplateBuilder::tuition(category.id)
                .amount(amount)
                .sibling_discount(sibling_percent)
                .build(),
        )
        .await
    }

    pub async fn assign_template(&self, student: StudentProfile, template_id: FeeTemplateId) -> StudentFee {
        self.service
            .assign_fee(assign_request(student, FeeSelection::Template(template_id)), &self.cashier)
            .await
            .into_result()
            .expect("fee assigned")
    }

    pub async fn assign_ad_hoc(&self, student_id: StudentId, fee: AdHocFee) -> StudentFee {
        let student = ProfileFixtures::returning(student_id);
        self.service
            .assign_fee(assign_request(student, FeeSelection::AdHoc(fee)), &self.cashier)
            .await
            .into_result()
            .expect("ad-hoc fee assigned")
    }

    /// Assigns an ad-hoc materials fee due on the first day of term
    pub async fn simple_fee(&self, student_id: StudentId, amount: Money) -> StudentFee {
        self.assign_ad_hoc(
            student_id,
            AdHocFixtures::materials(amount, TemporalFixtures::term_start()),
        )
        .await
    }

    pub async fn invoice(&self, student_id: StudentId, term_id: Option<TermId>, fee_ids: Vec<StudentFeeId>) -> Invoice {
        self.service
            .create_invoice(
                CreateInvoiceRequest {
                    student_id,
                    term_id,
                    fee_ids,
                },
                &self.cashier,
            )
            .await
            .into_result()
            .expect("invoice created")
    }

    pub async fn record(&self, request: NewPayment) -> Payment {
        self.service
            .record_payment(request, &self.cashier)
            .await
            .into_result()
            .expect("payment recorded")
    }

    /// Records and confirms a payment against an invoice
    pub async fn pay_invoice(&self, invoice: &Invoice, amount: Money) -> Payment {
        let payment = self
            .record(NewPaymentBuilder::new(invoice.student_id, amount).for_invoice(invoice.id).build())
            .await;
        self.service
            .confirm_payment(payment.id(), &self.cashier)
            .await
            .into_result()
            .expect("payment confirmed")
    }

    /// Records and confirms a payment against a single fee
    pub async fn pay_fee(&self, fee: &StudentFee, amount: Money) -> Payment {
        let payment = self
            .record(NewPaymentBuilder::new(fee.student_id, amount).for_fee(fee.id).build())
            .await;
        self.service
            .confirm_payment(payment.id(), &self.cashier)
            .await
            .into_result()
            .expect("payment confirmed")
    }
}
