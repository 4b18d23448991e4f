// ACH file: pay validated ACH payments and send prenotes for new accounts.
//
// Order inside the step:
//   1. prenotes sent at least `prenote_wait_days` ago are approved
//   2. validated ACH payments are paid, held or failed by account status
//   3. accounts still pending get a zero-dollar prenote
//   4. the NACHA file is written only when it holds at least one entry
//
// A file written by a run that then rolls back is deleted again; otherwise the
// rerun would pay the same payments in a second file.
//
// Check payments stay validated; the external check writer picks them up.

use super::{discard_written, load_payment_context, record_file};
use crate::ach::{NachaEntry, NachaFile, NachaFileSettings};
use crate::config::{AchConfig, FolderLayout};
use crate::entities::employee::get_employee;
use crate::entities::pub_eft::get_pub_eft;
use crate::entities::{AccountLookup, Payment, PaymentMethod, PrenoteStatus, ReferenceFileType};
use crate::error::{PipelineError, Result};
use crate::file_exchange::{timestamped_name, FileTransfer};
use crate::state_log::{latest_in_state, record_transition, EntityRef, EntityType, Outcome, State};
use crate::step::{Step, StepContext};
use crate::writeback::record_terminal_state;
use chrono::{Datelike, Duration, NaiveDate, Utc, Weekday};
use std::path::PathBuf;
use tracing::{debug, info};

/// Batch that takes the prenotes when no payment batch exists
pub const PRENOTE_BATCH: &str = "Prenote";

pub struct AchFileStep {
    ach: AchConfig,
    prenote_wait_days: i64,
    folders: FolderLayout,
    transfer: Box<dyn FileTransfer>,
    lookup: Box<dyn AccountLookup>,
    written: Option<PathBuf>,
}

/// First weekday after `date`
pub fn next_business_day(date: NaiveDate) -> NaiveDate {
    let mut next = date + Duration::days(1);
    while matches!(next.weekday(), Weekday::Sat | Weekday::Sun) {
        next += Duration::days(1);
    }
    next
}

fn individual_id(payment: &Payment) -> Result<String> {
    payment
        .pub_individual_id
        .map(|id| id.to_string())
        .ok_or_else(|| PipelineError::invariant(format!("payment {} has no individual id", payment.payment_id)))
}

impl AchFileStep {
    pub fn new(
        ach: AchConfig,
        prenote_wait_days: i64,
        folders: FolderLayout,
        transfer: Box<dyn FileTransfer>,
        lookup: Box<dyn AccountLookup>,
    ) -> Self {
        AchFileStep {
            ach,
            prenote_wait_days,
            folders,
            transfer,
            lookup,
            written: None,
        }
    }

    fn approve_prenotes(&self, ctx: &mut StepContext<'_>) -> Result<()> {
        for entry in latest_in_state(ctx.conn, EntityType::PubEft, &[State::EftPrenoteSent])? {
            let sent_on = entry.created_at.date_naive();
            if sent_on + Duration::days(self.prenote_wait_days) > ctx.run_date {
                continue;
            }
            record_transition(
                ctx.conn,
                entry.entity,
                State::EftPrenoteApproved,
                Outcome::message(format!("No return within {} days of {sent_on}", self.prenote_wait_days)),
                Some(ctx.import_log_id),
            )?;
            ctx.increment("prenote_approved_count");
        }
        Ok(())
    }

    fn dispose_payments(&self, ctx: &mut StepContext<'_>, file: &mut NachaFile) -> Result<()> {
        for entry in latest_in_state(ctx.conn, EntityType::Payment, &[State::PaymentValidated])? {
            let (payment, _employee, claim) = load_payment_context(ctx.conn, entry.entity.entity_id)?;
            if payment.payment_method == PaymentMethod::Check {
                debug!(payment_id = %payment.payment_id, "check payment left for the check writer");
                continue;
            }

            let eft = match payment.pub_eft_id {
                Some(id) => get_pub_eft(ctx.conn, id)?,
                None => None,
            };
            let status = match &eft {
                Some(eft) if eft.is_valid_routing() => self.lookup.prenote_status(ctx.conn, eft.pub_eft_id)?,
                _ => None,
            };

            let (state, message) = match (status, eft) {
                (Some(PrenoteStatus::Approved), Some(eft)) => {
                    let name = format!("{} {}", payment.fineos_first_name, payment.fineos_last_name);
                    let ach_entry = NachaEntry::deposit(&eft, payment.amount, individual_id(&payment)?, name)?;
                    file.add_entry(claim.leave_type.label(), ach_entry);
                    ctx.increment("payment_ach_sent_count");
                    (State::PaymentAchSent, "Added to ACH file".to_string())
                }
                (Some(PrenoteStatus::Pending | PrenoteStatus::Sent), _) => {
                    ctx.increment("payment_pending_prenote_count");
                    (State::PaymentEftPendingPrenote, "Bank account prenote not yet approved".to_string())
                }
                _ => {
                    ctx.increment("payment_account_invalid_count");
                    (State::PaymentEftAccountInvalid, "Bank account rejected or missing".to_string())
                }
            };

            record_terminal_state(
                ctx.conn,
                payment.payment_id,
                state,
                Outcome::message(message),
                Some(ctx.import_log_id),
            )?;
        }
        Ok(())
    }

    fn send_prenotes(&self, ctx: &mut StepContext<'_>, file: &mut NachaFile) -> Result<()> {
        for entry in latest_in_state(ctx.conn, EntityType::PubEft, &[State::EftPendingPrenote])? {
            let pub_eft_id = entry.entity.entity_id;
            let eft = get_pub_eft(ctx.conn, pub_eft_id)?
                .ok_or_else(|| PipelineError::invariant(format!("bank account {pub_eft_id} has state but no row")))?;

            if !eft.is_valid_routing() {
                record_transition(
                    ctx.conn,
                    entry.entity,
                    State::EftPrenoteRejected,
                    Outcome::message(format!("Routing number '{}' cannot be sent", eft.routing_nbr)),
                    Some(ctx.import_log_id),
                )?;
                ctx.increment("prenote_rejected_count");
                continue;
            }

            let name = get_employee(ctx.conn, eft.employee_id)?
                .map(|e| format!("{} {}", e.first_name, e.last_name))
                .unwrap_or_default();
            let individual_id = pub_eft_id.simple().to_string()[..15].to_string();
            let prenote = NachaEntry::prenote(&eft, individual_id, name)?;

            match file.first_non_empty_batch() {
                Some(batch) => batch.add_entry(prenote),
                None => file.add_entry(PRENOTE_BATCH, prenote),
            }

            record_transition(
                ctx.conn,
                entry.entity,
                State::EftPrenoteSent,
                Outcome::message("Prenote added to ACH file"),
                Some(ctx.import_log_id),
            )?;
            ctx.increment("prenote_sent_count");
        }
        Ok(())
    }
}

impl Step for AchFileStep {
    fn name(&self) -> &'static str {
        "ach_file"
    }

    fn declared_metrics(&self) -> &'static [&'static str] {
        &[
            "prenote_approved_count",
            "prenote_sent_count",
            "prenote_rejected_count",
            "payment_ach_sent_count",
            "payment_pending_prenote_count",
            "payment_account_invalid_count",
            "ach_file_count",
        ]
    }

    fn execute(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        self.written = None;
        self.approve_prenotes(ctx)?;

        let created_at = ctx.run_date.and_time(Utc::now().time());
        let settings = NachaFileSettings::from_config(&self.ach, created_at, next_business_day(ctx.run_date));
        let mut file = NachaFile::new(settings);

        self.dispose_payments(ctx, &mut file)?;
        self.send_prenotes(ctx, &mut file)?;

        if file.entry_count() == 0 {
            info!("nothing to send in an ACH file");
            return Ok(());
        }

        file.finalize()?;
        let content = file.to_bytes()?;
        let path = self
            .folders
            .pub_outbound
            .join(timestamped_name("PUB-NACHA", created_at, "ach"));
        self.transfer.write_bytes(&path, &content)?;
        self.written = Some(path.clone());
        record_file(
            ctx.conn,
            ReferenceFileType::AchFile,
            &path,
            &content,
            State::AchFileSent,
            ctx.import_log_id,
        )?;
        ctx.increment("ach_file_count");

        let totals = file.totals();
        info!(
            file = %path.display(),
            batches = totals.batch_count,
            entries = file.entry_count(),
            credit_cents = totals.total_credit_cents,
            "ACH file written"
        );
        Ok(())
    }

    fn cleanup_on_failure(&mut self) -> Result<()> {
        discard_written(self.transfer.as_ref(), &mut self.written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::pub_eft::insert_pub_eft;
    use crate::entities::{BankAccountType, LedgerAccountLookup, PubEft};
    use crate::file_exchange::LocalFileTransfer;
    use crate::post_processing::test_support::*;
    use crate::state_log::latest_state;
    use crate::step::run_step;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct Harness {
        _root: TempDir,
        folders: FolderLayout,
        fixture: Fixture,
    }

    impl Harness {
        fn new() -> Self {
            let root = TempDir::new().unwrap();
            let folders = FolderLayout::new(root.path());
            Harness {
                _root: root,
                folders,
                fixture: Fixture::new(),
            }
        }

        fn step(&self) -> AchFileStep {
            AchFileStep::new(
                AchConfig::default(),
                5,
                self.folders.clone(),
                Box::new(LocalFileTransfer),
                Box::new(LedgerAccountLookup),
            )
        }

        fn account(&self, state: Option<State>) -> PubEft {
            let eft = PubEft {
                pub_eft_id: Uuid::new_v4(),
                employee_id: self.fixture.employee.employee_id,
                routing_nbr: "011000015".to_string(),
                account_nbr: "5551234".to_string(),
                account_type: BankAccountType::Checking,
            };
            insert_pub_eft(&self.fixture.conn, &eft).unwrap();
            if let Some(state) = state {
                record_transition(&self.fixture.conn, EntityRef::pub_eft(eft.pub_eft_id), state, Outcome::default(), None)
                    .unwrap();
            }
            eft
        }

        fn validated(&self, method: PaymentMethod, eft: Option<&PubEft>) -> Uuid {
            let mut c = self.fixture.stored_container(date(2021, 9, 19), date(2021, 9, 25), dec!(512.34));
            c.payment.payment_method = method;
            c.payment.pub_eft_id = eft.map(|e| e.pub_eft_id);
            self.fixture
                .conn
                .execute(
                    "UPDATE payments SET payment_method = ?1, pub_eft_id = ?2 WHERE payment_id = ?3",
                    rusqlite::params![
                        method.as_str(),
                        c.payment.pub_eft_id.map(|id| id.to_string()),
                        c.payment.payment_id.to_string()
                    ],
                )
                .unwrap();
            record_transition(
                &self.fixture.conn,
                EntityRef::payment(c.payment.payment_id),
                State::PaymentValidated,
                Outcome::default(),
                None,
            )
            .unwrap();
            c.payment.payment_id
        }

        fn state(&self, entity: EntityRef) -> State {
            latest_state(&self.fixture.conn, entity).unwrap().unwrap().end_state
        }
    }

    #[test]
    fn test_next_business_day_skips_weekend() {
        // 2021-09-24 was a Friday
        assert_eq!(next_business_day(date(2021, 9, 24)), date(2021, 9, 27));
        assert_eq!(next_business_day(date(2021, 9, 27)), date(2021, 9, 28));
    }

    #[test]
    fn test_payments_are_disposed_by_account_status() {
        let mut h = Harness::new();
        let approved = h.account(Some(State::EftPrenoteApproved));
        let pending = h.account(Some(State::EftPrenoteSent));
        let rejected = h.account(Some(State::EftPrenoteRejected));

        let paid = h.validated(PaymentMethod::Ach, Some(&approved));
        let held = h.validated(PaymentMethod::Ach, Some(&pending));
        let failed = h.validated(PaymentMethod::Ach, Some(&rejected));
        let check = h.validated(PaymentMethod::Check, None);

        let mut step = h.step();
        let report = run_step(&mut h.fixture.conn, &mut step, date(2021, 9, 27)).unwrap();

        assert_eq!(report.metrics.get("payment_ach_sent_count"), 1);
        assert_eq!(report.metrics.get("payment_pending_prenote_count"), 1);
        assert_eq!(report.metrics.get("payment_account_invalid_count"), 1);
        assert_eq!(report.metrics.get("ach_file_count"), 1);

        assert_eq!(h.state(EntityRef::payment(paid)), State::PaymentAchSent);
        assert_eq!(h.state(EntityRef::payment(held)), State::PaymentEftPendingPrenote);
        assert_eq!(h.state(EntityRef::payment(failed)), State::PaymentEftAccountInvalid);
        assert_eq!(h.state(EntityRef::payment(check)), State::PaymentValidated);

        let files = LocalFileTransfer.list_files(&h.folders.pub_outbound).unwrap();
        assert_eq!(files.len(), 1);
        let text = String::from_utf8(std::fs::read(&files[0]).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len() % 10, 0);
        assert!(lines.iter().all(|l| l.len() == 94));
        let entries: Vec<&&str> = lines.iter().filter(|l| l.starts_with('6')).collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(&entries[0][29..39], "0000051234");
        // Medical leave batch
        assert!(lines.iter().any(|l| l.starts_with('5') && l.contains("MEDICAL")));
    }

    #[test]
    fn test_prenotes_use_dedicated_batch_and_are_approved_after_wait() {
        let mut h = Harness::new();
        let new_account = h.account(Some(State::EftPendingPrenote));

        let mut step = h.step();
        let first = run_step(&mut h.fixture.conn, &mut step, date(2021, 9, 27)).unwrap();
        assert_eq!(first.metrics.get("prenote_sent_count"), 1);
        assert_eq!(h.state(EntityRef::pub_eft(new_account.pub_eft_id)), State::EftPrenoteSent);

        let text = String::from_utf8(
            std::fs::read(&LocalFileTransfer.list_files(&h.folders.pub_outbound).unwrap()[0]).unwrap(),
        )
        .unwrap();
        let entry = text.lines().find(|l| l.starts_with('6')).unwrap();
        assert_eq!(&entry[1..3], "23");
        assert_eq!(&entry[29..39], "0000000000");
        assert!(text.lines().any(|l| l.starts_with('5') && l.contains("PRENOTE")));

        // Sent "today" in wall-clock terms; far enough in the future counts as waited
        let today = Utc::now().date_naive();
        let too_soon = run_step(&mut h.fixture.conn, &mut step, today + Duration::days(4)).unwrap();
        assert_eq!(too_soon.metrics.get("prenote_approved_count"), 0);
        let later = run_step(&mut h.fixture.conn, &mut step, today + Duration::days(5)).unwrap();
        assert_eq!(later.metrics.get("prenote_approved_count"), 1);
        assert_eq!(h.state(EntityRef::pub_eft(new_account.pub_eft_id)), State::EftPrenoteApproved);
    }

    #[test]
    fn test_nothing_to_send_writes_no_file() {
        let mut h = Harness::new();
        h.validated(PaymentMethod::Check, None);
        let mut step = h.step();
        let report = run_step(&mut h.fixture.conn, &mut step, date(2021, 9, 27)).unwrap();
        assert!(report.metrics.all_zero());
        assert!(LocalFileTransfer.list_files(&h.folders.pub_outbound).unwrap().is_empty());
    }

    #[test]
    fn test_rolled_back_run_removes_its_file_and_rerun_pays_once() {
        let mut h = Harness::new();
        let approved = h.account(Some(State::EftPrenoteApproved));
        let paid = h.validated(PaymentMethod::Ach, Some(&approved));

        fail_inserts_into(&h.fixture.conn, "reference_files");
        let mut step = h.step();
        let err = run_step(&mut h.fixture.conn, &mut step, date(2021, 9, 27)).unwrap_err();
        assert!(matches!(err, PipelineError::Database(_)));
        assert_eq!(h.state(EntityRef::payment(paid)), State::PaymentValidated);
        assert!(LocalFileTransfer.list_files(&h.folders.pub_outbound).unwrap().is_empty());

        allow_inserts_into(&h.fixture.conn, "reference_files");
        let report = run_step(&mut h.fixture.conn, &mut step, date(2021, 9, 27)).unwrap();
        assert_eq!(report.metrics.get("payment_ach_sent_count"), 1);
        assert_eq!(h.state(EntityRef::payment(paid)), State::PaymentAchSent);

        let files = LocalFileTransfer.list_files(&h.folders.pub_outbound).unwrap();
        assert_eq!(files.len(), 1);
        let text = String::from_utf8(std::fs::read(&files[0]).unwrap()).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with('6')).count(), 1);
    }

    #[test]
    fn test_failed_commit_removes_the_written_file() {
        let mut h = Harness::new();
        let approved = h.account(Some(State::EftPrenoteApproved));
        let paid = h.validated(PaymentMethod::Ach, Some(&approved));

        fail_commit_after_insert_into(&h.fixture.conn, "reference_files");
        let mut step = h.step();
        assert!(run_step(&mut h.fixture.conn, &mut step, date(2021, 9, 27)).is_err());
        assert_eq!(h.state(EntityRef::payment(paid)), State::PaymentValidated);
        assert!(LocalFileTransfer.list_files(&h.folders.pub_outbound).unwrap().is_empty());
    }
}
