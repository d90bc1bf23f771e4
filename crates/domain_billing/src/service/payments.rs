//! Payment commands
//!
//! Confirmation, void and adjustment each write the payment (or its
//! adjustment), the invoice and every touched fee in a single change set.
//!
//! A payment naming only a fee is bound to the live invoice billing that
//! fee, so the invoice sees the money too. Fee-only payments confirmed
//! before the fee was billed stay unbound; the invoice line already excludes
//! them, and later voids or adjustments post a correcting line instead.

use chrono::{DateTime, Datelike, Utc};
use tracing::{info, instrument};

use core_kernel::ports::format_reference;
use core_kernel::{ActorContext, Money, PaymentId};

use crate::command::CommandResult;
use crate::error::BillingError;
use crate::invoice::{Invoice, InvoiceStatus, LineItem};
use crate::payment::{
    distribute_to_fees, net_fee_allocations, net_invoice_allocation, withdraw_from_fees,
    FeeAllocation, NewPayment, Payment, PaymentAdjustment, PaymentStatus,
};
use crate::store::{committed, ChangeSet};
use crate::student_fee::StudentFee;

use super::{LedgerService, ADJUST_PAYMENTS};

/// The rows a payment's money can flow to, freshly loaded
struct AllocationTargets {
    invoice: Option<Invoice>,
    /// Targeted fee first, then the invoice's fee lines in line order
    fees: Vec<StudentFee>,
}

impl AllocationTargets {
    fn fee_mut(&mut self, allocation: &FeeAllocation) -> Result<&mut StudentFee, BillingError> {
        self.fees
            .iter_mut()
            .find(|f| f.id == allocation.student_fee_id)
            .ok_or_else(|| BillingError::not_found("StudentFee", allocation.student_fee_id))
    }

    /// Plans how `amount` of new money spreads over the fees
    ///
    /// An unbilled fee's payment must fit the fee. Payments against an
    /// invoice pay the named fee first, then spread across the other fees,
    /// and any remainder stays on the invoice alone.
    fn plan_fee_allocations(&self, payment: &Payment, amount: Money) -> Result<Vec<FeeAllocation>, BillingError> {
        if self.invoice.is_none() {
            let fee = self
                .fees
                .first()
                .ok_or_else(|| BillingError::MissingReference(format!("payment {} has no target", payment.reference())))?;
            if fee.status.is_terminal() {
                return Err(BillingError::AlreadyFinal {
                    entity: "StudentFee",
                    id: fee.id.to_string(),
                    status: fee.status.as_str().into(),
                });
            }
            let outstanding = fee.amount_outstanding()?;
            if amount.amount() > outstanding.amount() {
                return Err(BillingError::OverAllocation {
                    target: fee.id.to_string(),
                    requested: amount.to_string(),
                    outstanding: outstanding.to_string(),
                });
            }
            return Ok(vec![FeeAllocation {
                student_fee_id: fee.id,
                amount,
            }]);
        }
        let refs: Vec<&StudentFee> = self.fees.iter().collect();
        distribute_to_fees(amount, &refs)
    }

    fn stage(self, changes: &mut ChangeSet, touched: &[FeeAllocation]) {
        if let Some(invoice) = self.invoice {
            changes.update(invoice);
        }
        for fee in self.fees {
            if touched.iter().any(|a| a.student_fee_id == fee.id) {
                changes.update(fee);
            }
        }
    }
}

impl LedgerService {
    /// Records a pending payment; nothing is allocated until confirmation
    #[instrument(skip(self, request, actor), fields(student_id = %request.student_id, amount = %request.amount))]
    pub async fn record_payment(&self, request: NewPayment, actor: &dyn ActorContext) -> CommandResult<Payment> {
        let result = self.try_record_payment(request, actor).await;
        self.finish("record_payment", result, |p| {
            format!("Recorded {} for {}", p.reference(), p.amount())
        })
    }

    async fn try_record_payment(&self, mut request: NewPayment, actor: &dyn ActorContext) -> Result<Payment, BillingError> {
        if !request.amount.is_positive() {
            return Err(BillingError::InvalidAmount(format!(
                "payment amount must be positive, got {}",
                request.amount
            )));
        }
        if request.invoice_id.is_none() && request.student_fee_id.is_none() {
            return Err(BillingError::MissingReference(
                "a payment must target an invoice or a student fee".into(),
            ));
        }

        if let Some(invoice_id) = request.invoice_id {
            let invoice = self.load_invoice(invoice_id).await?;
            if invoice.status == InvoiceStatus::Cancelled {
                return Err(BillingError::InvoiceClosed {
                    invoice: invoice.invoice_number,
                    status: InvoiceStatus::Cancelled.as_str().into(),
                });
            }
            if invoice.student_id != request.student_id {
                return Err(BillingError::StudentMismatch {
                    entity: "Invoice",
                    id: invoice.invoice_number,
                    student: request.student_id.to_string(),
                });
            }
            request.amount.ensure_same_currency(&invoice.amount_total)?;
            if let Some(fee_id) = request.student_fee_id {
                if !invoice.bills_fee(fee_id) {
                    return Err(BillingError::invalid(format!(
                        "fee {} is not billed on invoice {}",
                        fee_id, invoice.invoice_number
                    )));
                }
            }
        }
        if let Some(fee_id) = request.student_fee_id {
            let fee = self.load_fee(fee_id).await?;
            if fee.student_id != request.student_id {
                return Err(BillingError::StudentMismatch {
                    entity: "StudentFee",
                    id: fee.id.to_string(),
                    student: request.student_id.to_string(),
                });
            }
            request.amount.ensure_same_currency(&fee.original_amount)?;
            if fee.status.is_terminal() {
                return Err(BillingError::AlreadyFinal {
                    entity: "StudentFee",
                    id: fee.id.to_string(),
                    status: fee.status.as_str().into(),
                });
            }
            if request.invoice_id.is_none() {
                request.invoice_id = self.billing_invoice(&fee).await?.map(|i| i.id);
            }
        }

        let year = self.today().year();
        let value = self.sequences.next_value(&self.config.payment_prefix, year).await?;
        let reference = format_reference(&self.config.payment_prefix, year, value);

        let payment = Payment::record(request, reference, actor.current_actor().id, self.now())?;
        let mut changes = ChangeSet::new();
        changes.insert(payment.clone());
        self.commit(changes).await?;
        Ok(committed(payment))
    }

    /// Locks a pending payment and allocates it to its invoice and fees
    #[instrument(skip(self, actor), fields(payment_id = %payment_id))]
    pub async fn confirm_payment(&self, payment_id: PaymentId, actor: &dyn ActorContext) -> CommandResult<Payment> {
        let result = self
            .with_retry("confirm_payment", move || self.try_confirm_payment(payment_id, actor))
            .await;
        self.finish("confirm_payment", result, |p| {
            format!("Confirmed {} for {}", p.reference(), p.amount())
        })
    }

    async fn try_confirm_payment(&self, payment_id: PaymentId, actor: &dyn ActorContext) -> Result<Payment, BillingError> {
        let mut payment = self.load_payment(payment_id).await?;
        if payment.status() != PaymentStatus::Pending {
            return Err(BillingError::AlreadyFinal {
                entity: "Payment",
                id: payment.reference().to_string(),
                status: payment.status().as_str().into(),
            });
        }

        self.bind_to_billing_invoice(&mut payment).await?;

        let now = self.now();
        let amount = payment.amount();
        let mut targets = self.load_targets(&payment).await?;

        let invoice_allocation = match targets.invoice.as_mut() {
            Some(invoice) => {
                invoice.allocate(amount, now)?;
                Some(amount)
            }
            None => None,
        };
        let allocations = targets.plan_fee_allocations(&payment, amount)?;
        for allocation in &allocations {
            targets.fee_mut(allocation)?.allocate(allocation.amount, now)?;
        }

        payment.confirm(actor.current_actor().id, invoice_allocation, allocations.clone(), now)?;

        let mut changes = ChangeSet::new();
        changes.update(payment.clone());
        targets.stage(&mut changes, &allocations);
        self.commit(changes).await?;
        Ok(committed(payment))
    }

    /// Voids a payment, reversing whatever a confirmed payment still contributes
    #[instrument(skip(self, reason, actor), fields(payment_id = %payment_id))]
    pub async fn void_payment(
        &self,
        payment_id: PaymentId,
        reason: &str,
        actor: &dyn ActorContext,
    ) -> CommandResult<Payment> {
        let result = self
            .with_retry("void_payment", move || self.try_void_payment(payment_id, reason, actor))
            .await;
        self.finish("void_payment", result, |p| format!("Voided {}", p.reference()))
    }

    async fn try_void_payment(
        &self,
        payment_id: PaymentId,
        reason: &str,
        actor: &dyn ActorContext,
    ) -> Result<Payment, BillingError> {
        let mut payment = self.load_payment(payment_id).await?;
        if payment.status() == PaymentStatus::Voided {
            return Err(BillingError::AlreadyFinal {
                entity: "Payment",
                id: payment.reference().to_string(),
                status: payment.status().as_str().into(),
            });
        }
        if reason.trim().is_empty() {
            return Err(BillingError::invalid("a void reason is required"));
        }

        let now = self.now();
        let today = self.today();
        let mut changes = ChangeSet::new();
        let (reversed_invoice, reversed_fees) = if payment.status() == PaymentStatus::Confirmed {
            let chain = self.store.list_adjustments(payment.id()).await?;
            let invoice_net = net_invoice_allocation(&payment, &chain)?;
            let fee_net = net_fee_allocations(&payment, &chain)?;
            let mut targets = self.load_targets(&payment).await?;

            if let (Some(invoice), Some(net)) = (targets.invoice.as_mut(), invoice_net) {
                if net.is_positive() {
                    invoice.deallocate(net, now)?;
                }
            }
            for allocation in fee_net.iter().filter(|a| a.amount.is_positive()) {
                targets.fee_mut(allocation)?.reverse_allocation(allocation.amount, today, now)?;
            }
            if targets.invoice.is_none() {
                for allocation in fee_net.iter().filter(|a| a.amount.is_positive()) {
                    let fee = targets.fee_mut(allocation)?;
                    if let Some(invoice) = self.correct_billing_invoice(&payment, fee, -allocation.amount, now).await? {
                        changes.update(invoice);
                    }
                }
            }
            targets.stage(&mut changes, &fee_net);
            (invoice_net.filter(|m| m.is_positive()), fee_net)
        } else {
            (None, Vec::new())
        };

        payment.void(reason, actor.current_actor().id, reversed_invoice, reversed_fees, now)?;
        changes.update(payment.clone());
        self.commit(changes).await?;
        Ok(committed(payment))
    }

    /// Corrects a confirmed payment's net amount with a linked adjustment
    ///
    /// The payment row keeps its original figures; the adjustment carries the
    /// delta and where it was applied.
    #[instrument(skip(self, new_amount, reason, actor), fields(payment_id = %payment_id, new_amount = %new_amount))]
    pub async fn create_adjustment(
        &self,
        payment_id: PaymentId,
        new_amount: Money,
        reason: &str,
        actor: &dyn ActorContext,
    ) -> CommandResult<PaymentAdjustment> {
        let result = if actor.has_permission(ADJUST_PAYMENTS) {
            self.with_retry("create_adjustment", move || {
                self.try_create_adjustment(payment_id, new_amount, reason, actor)
            })
            .await
        } else {
            Err(BillingError::PermissionDenied {
                permission: ADJUST_PAYMENTS.to_string(),
            })
        };
        self.finish("create_adjustment", result, |a| {
            format!("Adjustment #{} moves net to {} ({})", a.sequence, a.new_amount, a.delta)
        })
    }

    async fn try_create_adjustment(
        &self,
        payment_id: PaymentId,
        new_amount: Money,
        reason: &str,
        actor: &dyn ActorContext,
    ) -> Result<PaymentAdjustment, BillingError> {
        let payment = self.load_payment(payment_id).await?;
        let chain = self.store.list_adjustments(payment_id).await?;
        let now = self.now();
        let mut adjustment =
            PaymentAdjustment::next(&payment, &chain, new_amount, reason, actor.current_actor().id, now)?;

        let delta = adjustment.delta;
        let mut targets = self.load_targets(&payment).await?;
        let touched = if delta.is_positive() {
            if let Some(invoice) = targets.invoice.as_mut() {
                invoice.allocate(delta, now)?;
                adjustment.invoice_delta = Some(delta);
            }
            let allocations = targets.plan_fee_allocations(&payment, delta)?;
            for allocation in &allocations {
                targets.fee_mut(allocation)?.allocate(allocation.amount, now)?;
            }
            allocations
        } else {
            let back = delta.abs();
            if let Some(invoice) = targets.invoice.as_mut() {
                invoice.deallocate(back, now)?;
                adjustment.invoice_delta = Some(delta);
            }
            let held = net_fee_allocations(&payment, &chain)?;
            let withdrawals = withdraw_from_fees(back, &held)?;
            let today = self.today();
            for withdrawal in &withdrawals {
                targets.fee_mut(withdrawal)?.reverse_allocation(withdrawal.amount, today, now)?;
            }
            withdrawals
        };
        adjustment.fee_allocations = touched
            .iter()
            .map(|a| FeeAllocation {
                student_fee_id: a.student_fee_id,
                amount: if delta.is_negative() { -a.amount } else { a.amount },
            })
            .collect();

        let mut changes = ChangeSet::new();
        if targets.invoice.is_none() {
            if let Some(fee) = targets.fees.first() {
                if let Some(invoice) = self.correct_billing_invoice(&payment, fee, delta, now).await? {
                    changes.update(invoice);
                }
            }
        }
        changes.insert(adjustment.clone());
        // staged unchanged so a concurrent void of the same payment conflicts
        changes.update(payment);
        targets.stage(&mut changes, &touched);
        self.commit(changes).await?;

        info!(sequence = adjustment.sequence, delta = %delta, "Payment adjusted");
        Ok(committed(adjustment))
    }

    /// Appends a note to a payment in any state
    #[instrument(skip(self, text, actor), fields(payment_id = %payment_id))]
    pub async fn add_note(&self, payment_id: PaymentId, text: &str, actor: &dyn ActorContext) -> CommandResult<Payment> {
        let result = self
            .with_retry("add_note", move || self.try_add_note(payment_id, text, actor))
            .await;
        self.finish("add_note", result, |p| format!("Note added to {}", p.reference()))
    }

    async fn try_add_note(&self, payment_id: PaymentId, text: &str, actor: &dyn ActorContext) -> Result<Payment, BillingError> {
        let mut payment = self.load_payment(payment_id).await?;
        payment.add_note(text, actor.current_actor().id, self.now())?;
        let mut changes = ChangeSet::new();
        changes.update(payment.clone());
        self.commit(changes).await?;
        Ok(committed(payment))
    }

    /// Binds a pending fee-only payment to the invoice that now bills its fee
    async fn bind_to_billing_invoice(&self, payment: &mut Payment) -> Result<(), BillingError> {
        if payment.invoice_id().is_some() {
            return Ok(());
        }
        let Some(fee_id) = payment.student_fee_id() else {
            return Ok(());
        };
        let fee = self.load_fee(fee_id).await?;
        if let Some(invoice) = self.billing_invoice(&fee).await? {
            info!(reference = payment.reference(), invoice = %invoice.invoice_number, "Bound fee payment to invoice");
            payment.bind_invoice(invoice.id)?;
        }
        Ok(())
    }

    /// Mirrors `moved` on an unbound fee payment onto the invoice that later billed the fee
    ///
    /// That invoice's line was snapshotted net of the payment, so money taken
    /// back from the fee raises the invoice and money added lowers it.
    async fn correct_billing_invoice(
        &self,
        payment: &Payment,
        fee: &StudentFee,
        moved: Money,
        now: DateTime<Utc>,
    ) -> Result<Option<Invoice>, BillingError> {
        let Some(mut invoice) = self.billing_invoice(fee).await? else {
            return Ok(None);
        };
        let action = if moved.is_negative() { "Reversal" } else { "Correction" };
        let line = LineItem::adjustment(format!("{} of {}", action, payment.reference()), -moved);
        invoice.post_correction(line, now)?;
        Ok(Some(invoice))
    }

    async fn load_targets(&self, payment: &Payment) -> Result<AllocationTargets, BillingError> {
        let mut fees = Vec::new();
        if let Some(fee_id) = payment.student_fee_id() {
            fees.push(self.load_fee(fee_id).await?);
        }
        let invoice = match payment.invoice_id() {
            Some(invoice_id) => {
                let invoice = self.load_invoice(invoice_id).await?;
                for fee_id in invoice.fee_ids() {
                    if fees.iter().any(|f| f.id == fee_id) {
                        continue;
                    }
                    // fees can only be deleted while unbilled, so a miss here is skipped
                    if let Some(fee) = self.store.get_fee(fee_id).await? {
                        fees.push(fee);
                    }
                }
                Some(invoice)
            }
            None => None,
        };
        Ok(AllocationTargets { invoice, fees })
    }
}
