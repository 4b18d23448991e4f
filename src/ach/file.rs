// NACHA file tree: File → Batches → Entries
//
// finalize() is pure over the tree and idempotent: it drops empty batches,
// numbers batches and trace numbers, and recomputes every control total.
// Any mutation after finalize() marks the file dirty again.

use super::fields::{alphanumeric, blanks, number, numeric};
use super::records::{check_length, NachaEntry, ServiceClass};
use super::{NachaError, NachaResult, BLOCKING_FACTOR, RECORD_LENGTH};
use crate::config::AchConfig;
use chrono::{NaiveDate, NaiveDateTime};

const ENTRY_HASH_MODULUS: u64 = 10_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NachaFileSettings {
    pub destination_routing: String,
    pub destination_name: String,
    pub origin_id: String,
    pub origin_name: String,
    pub company_name: String,
    pub company_id: String,
    pub odfi_id: String,
    pub reference_code: String,
    pub entry_description: String,
    pub created_at: NaiveDateTime,
    pub effective_date: NaiveDate,
}

impl NachaFileSettings {
    pub fn from_config(config: &AchConfig, created_at: NaiveDateTime, effective_date: NaiveDate) -> Self {
        NachaFileSettings {
            destination_routing: config.destination_routing.clone(),
            destination_name: config.destination_name.clone(),
            origin_id: config.origin_id.clone(),
            origin_name: config.origin_name.clone(),
            company_name: config.company_name.clone(),
            company_id: config.company_id.clone(),
            odfi_id: config.odfi_id.clone(),
            reference_code: config.reference_code.clone(),
            entry_description: config.entry_description.clone(),
            created_at,
            effective_date,
        }
    }
}

// ============================================================================
// BATCH
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchTotals {
    pub batch_number: u32,
    /// Entries plus addenda records
    pub entry_addenda_count: u64,
    pub entry_hash: u64,
    pub total_debit_cents: u64,
    pub total_credit_cents: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NachaBatch {
    /// Goes into the company discretionary data field (e.g. "Family", "Prenote")
    name: String,
    entries: Vec<NachaEntry>,
    totals: BatchTotals,
}

impl NachaBatch {
    pub fn new(name: impl Into<String>) -> Self {
        NachaBatch {
            name: name.into(),
            entries: Vec::new(),
            totals: BatchTotals::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[NachaEntry] {
        &self.entries
    }

    /// Number of entry records (addenda not included)
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Only reachable through NachaFile::batch, which marks the file dirty
    pub fn add_entry(&mut self, entry: NachaEntry) {
        self.entries.push(entry);
    }

    pub fn totals(&self) -> &BatchTotals {
        &self.totals
    }

    pub fn service_class(&self) -> ServiceClass {
        let credits = self.entries.iter().filter(|e| e.is_credit()).count();
        match credits {
            c if c == self.entries.len() => ServiceClass::CreditsOnly,
            0 => ServiceClass::DebitsOnly,
            _ => ServiceClass::Mixed,
        }
    }

    fn recompute(&mut self, batch_number: u32) -> NachaResult<()> {
        let mut totals = BatchTotals {
            batch_number,
            ..BatchTotals::default()
        };
        for entry in &self.entries {
            totals.entry_addenda_count += entry.record_count() as u64;
            totals.entry_hash = (totals.entry_hash + entry.receiving_dfi_number()) % ENTRY_HASH_MODULUS;
            let cents = entry.amount_cents()?;
            if entry.is_credit() {
                totals.total_credit_cents += cents;
            } else {
                totals.total_debit_cents += cents;
            }
        }
        self.totals = totals;
        Ok(())
    }

    fn render_header(&self, settings: &NachaFileSettings) -> NachaResult<String> {
        let effective = settings.effective_date.format("%y%m%d").to_string();
        let record = format!(
            "5{}{}{}{}PPD{}{}{}{}1{}{}",
            self.service_class().code(),
            alphanumeric(&settings.company_name, 16),
            alphanumeric(&self.name, 20),
            alphanumeric(&settings.company_id, 10),
            alphanumeric(&settings.entry_description, 10),
            effective,
            effective,
            blanks(3),
            numeric("ODFI", &settings.odfi_id, 8)?,
            number("batch number", self.totals.batch_number as u64, 7)?,
        );
        check_length('5', record)
    }

    fn render_control(&self, settings: &NachaFileSettings) -> NachaResult<String> {
        let record = format!(
            "8{}{}{}{}{}{}{}{}{}{}",
            self.service_class().code(),
            number("entry/addenda count", self.totals.entry_addenda_count, 6)?,
            number("entry hash", self.totals.entry_hash, 10)?,
            number("total debit", self.totals.total_debit_cents, 12)?,
            number("total credit", self.totals.total_credit_cents, 12)?,
            alphanumeric(&settings.company_id, 10),
            blanks(19),
            blanks(6),
            numeric("ODFI", &settings.odfi_id, 8)?,
            number("batch number", self.totals.batch_number as u64, 7)?,
        );
        check_length('8', record)
    }
}

// ============================================================================
// FILE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTotals {
    pub batch_count: u64,
    pub block_count: u64,
    pub entry_addenda_count: u64,
    pub entry_hash: u64,
    pub total_debit_cents: u64,
    pub total_credit_cents: u64,
    /// Records before padding
    pub record_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NachaFile {
    settings: NachaFileSettings,
    batches: Vec<NachaBatch>,
    totals: FileTotals,
    finalized: bool,
}

impl NachaFile {
    pub fn new(settings: NachaFileSettings) -> Self {
        NachaFile {
            settings,
            batches: Vec::new(),
            totals: FileTotals::default(),
            finalized: false,
        }
    }

    pub fn settings(&self) -> &NachaFileSettings {
        &self.settings
    }

    pub fn batches(&self) -> &[NachaBatch] {
        &self.batches
    }

    pub fn totals(&self) -> &FileTotals {
        &self.totals
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Batch with the given name, created at the end of the file if missing
    pub fn batch(&mut self, name: &str) -> &mut NachaBatch {
        self.finalized = false;
        let index = match self.batches.iter().position(|b| b.name == name) {
            Some(index) => index,
            None => {
                self.batches.push(NachaBatch::new(name));
                self.batches.len() - 1
            }
        };
        &mut self.batches[index]
    }

    /// First batch that already holds entries, if any
    pub fn first_non_empty_batch(&mut self) -> Option<&mut NachaBatch> {
        self.finalized = false;
        self.batches.iter_mut().find(|b| !b.is_empty())
    }

    pub fn add_entry(&mut self, batch_name: &str, entry: NachaEntry) {
        self.batch(batch_name).add_entry(entry);
    }

    pub fn entry_count(&self) -> usize {
        self.batches.iter().map(|b| b.entry_count()).sum()
    }

    pub fn finalize(&mut self) -> NachaResult<()> {
        self.batches.retain(|b| !b.is_empty());

        let odfi = numeric("ODFI", &self.settings.odfi_id, 8)?;
        let mut trace_sequence: u64 = 0;
        let mut totals = FileTotals::default();

        for (index, batch) in self.batches.iter_mut().enumerate() {
            for entry in batch.entries.iter_mut() {
                trace_sequence += 1;
                entry.trace_number = Some(format!("{}{}", odfi, number("trace sequence", trace_sequence, 7)?));
            }
            batch.recompute(index as u32 + 1)?;

            totals.batch_count += 1;
            totals.entry_addenda_count += batch.totals.entry_addenda_count;
            totals.entry_hash = (totals.entry_hash + batch.totals.entry_hash) % ENTRY_HASH_MODULUS;
            totals.total_debit_cents += batch.totals.total_debit_cents;
            totals.total_credit_cents += batch.totals.total_credit_cents;
        }

        // file header + file control + (batch header + batch control) per batch + entries/addenda
        totals.record_count = 2 + 2 * totals.batch_count + totals.entry_addenda_count;
        totals.block_count = totals.record_count.div_ceil(BLOCKING_FACTOR as u64);

        self.totals = totals;
        self.finalized = true;
        Ok(())
    }

    pub fn to_lines(&self) -> NachaResult<Vec<String>> {
        if !self.finalized {
            return Err(NachaError::NotFinalized);
        }

        let mut lines = vec![self.render_header()?];
        for batch in &self.batches {
            lines.push(batch.render_header(&self.settings)?);
            for entry in &batch.entries {
                lines.extend(entry.render()?);
            }
            lines.push(batch.render_control(&self.settings)?);
        }
        lines.push(self.render_control()?);

        let padded = self.totals.block_count as usize * BLOCKING_FACTOR;
        while lines.len() < padded {
            lines.push("9".repeat(RECORD_LENGTH));
        }
        Ok(lines)
    }

    pub fn to_bytes(&self) -> NachaResult<Vec<u8>> {
        let mut content = self.to_lines()?.join("\n");
        content.push('\n');
        Ok(content.into_bytes())
    }

    fn render_header(&self) -> NachaResult<String> {
        let s = &self.settings;
        let record = format!(
            "101 {}{}{}{}A094101{}{}{}",
            numeric("immediate destination", &s.destination_routing, 9)?,
            alphanumeric(&s.origin_id, 10),
            s.created_at.format("%y%m%d"),
            s.created_at.format("%H%M"),
            alphanumeric(&s.destination_name, 23),
            alphanumeric(&s.origin_name, 23),
            alphanumeric(&s.reference_code, 8),
        );
        check_length('1', record)
    }

    fn render_control(&self) -> NachaResult<String> {
        let t = &self.totals;
        let record = format!(
            "9{}{}{}{}{}{}{}",
            number("batch count", t.batch_count, 6)?,
            number("block count", t.block_count, 6)?,
            number("entry/addenda count", t.entry_addenda_count, 8)?,
            number("entry hash", t.entry_hash, 10)?,
            number("total debit", t.total_debit_cents, 12)?,
            number("total credit", t.total_credit_cents, 12)?,
            blanks(39),
        );
        check_length('9', record)
    }
}
