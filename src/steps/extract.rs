// Extract load: store the parsed extract and admit valid payments

use crate::entities::employee::{insert_absence_period, insert_benefit_year, insert_claim, insert_employee};
use crate::entities::payment::{insert_payment, payment_exists};
use crate::entities::pub_eft::insert_pub_eft;
use crate::entities::reduction::insert_reduction_payment;
use crate::error::Result;
use crate::extract::{validate_payment, ExtractBundle};
use crate::state_log::{latest_state, record_transition, EntityRef, Outcome, State};
use crate::step::{Step, StepContext};
use crate::writeback::record_terminal_state;
use tracing::{debug, info, warn};

pub struct ExtractLoadStep {
    bundle: ExtractBundle,
}

impl ExtractLoadStep {
    pub fn new(bundle: ExtractBundle) -> Self {
        ExtractLoadStep { bundle }
    }

    fn load_reference_rows(&self, ctx: &mut StepContext<'_>) -> Result<()> {
        let conn = ctx.conn;
        for employee in &self.bundle.employees {
            insert_employee(conn, employee)?;
        }
        for claim in &self.bundle.claims {
            insert_claim(conn, claim)?;
        }
        for period in &self.bundle.absence_periods {
            insert_absence_period(conn, period)?;
        }
        for year in &self.bundle.benefit_years {
            insert_benefit_year(conn, year)?;
        }
        for reduction in &self.bundle.reductions {
            insert_reduction_payment(conn, reduction)?;
        }
        Ok(())
    }

    fn load_bank_accounts(&self, ctx: &mut StepContext<'_>) -> Result<()> {
        for eft in &self.bundle.pub_efts {
            if !insert_pub_eft(ctx.conn, eft)? {
                continue;
            }
            let entity = EntityRef::pub_eft(eft.pub_eft_id);
            if self.bundle.approved_pub_eft_ids.contains(&eft.pub_eft_id) {
                record_transition(
                    ctx.conn,
                    entity,
                    State::EftPrenoteApproved,
                    Outcome::message("Approved before extract"),
                    Some(ctx.import_log_id),
                )?;
                ctx.increment("pub_eft_approved_count");
            } else {
                record_transition(
                    ctx.conn,
                    entity,
                    State::EftPendingPrenote,
                    Outcome::message("New bank account"),
                    Some(ctx.import_log_id),
                )?;
                ctx.increment("pub_eft_pending_prenote_count");
            }
        }

        for pub_eft_id in &self.bundle.rejected_pub_eft_ids {
            let entity = EntityRef::pub_eft(*pub_eft_id);
            match latest_state(ctx.conn, entity)? {
                Some(entry) if entry.end_state == State::EftPrenoteRejected => {}
                Some(_) => {
                    record_transition(
                        ctx.conn,
                        entity,
                        State::EftPrenoteRejected,
                        Outcome::message("Prenote returned by the bank"),
                        Some(ctx.import_log_id),
                    )?;
                    ctx.increment("pub_eft_rejected_count");
                }
                None => warn!(%pub_eft_id, "rejection for an unknown bank account ignored"),
            }
        }
        Ok(())
    }
}

impl Step for ExtractLoadStep {
    fn name(&self) -> &'static str {
        "extract_load"
    }

    fn declared_metrics(&self) -> &'static [&'static str] {
        &[
            "payment_ready_count",
            "payment_failed_validation_count",
            "pub_eft_pending_prenote_count",
            "pub_eft_approved_count",
            "pub_eft_rejected_count",
        ]
    }

    fn execute(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        self.load_reference_rows(ctx)?;
        self.load_bank_accounts(ctx)?;

        for payment in &self.bundle.payments {
            if payment_exists(ctx.conn, payment.payment_id)? {
                debug!(payment_id = %payment.payment_id, "payment already loaded, skipping");
                continue;
            }
            insert_payment(ctx.conn, payment)?;

            let issues = validate_payment(ctx.conn, payment)?;
            if issues.is_empty() {
                record_transition(
                    ctx.conn,
                    EntityRef::payment(payment.payment_id),
                    State::PaymentReadyForPostProcessing,
                    Outcome::message("Loaded from extract"),
                    Some(ctx.import_log_id),
                )?;
                ctx.increment("payment_ready_count");
            } else {
                debug!(payment_id = %payment.payment_id, issues = issues.len(), "payment failed validation");
                record_terminal_state(
                    ctx.conn,
                    payment.payment_id,
                    State::PaymentFailedAutomatedValidation,
                    Outcome::with_issues("Payment failed automated validation", issues),
                    Some(ctx.import_log_id),
                )?;
                ctx.increment("payment_failed_validation_count");
            }
        }

        info!(
            payments = self.bundle.payments.len(),
            ready = ctx.metrics.get("payment_ready_count"),
            failed = ctx.metrics.get("payment_failed_validation_count"),
            "extract loaded"
        );
        Ok(())
    }
}
