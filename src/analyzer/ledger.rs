//! Instruction ledger: every emitted instruction and what became of it.

use crate::broker::{ExecutionReport, Instruction, InstructionKind};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InstructionStatus {
    Submitted,
    Filled {
        date: NaiveDate,
        size: Decimal,
        price: Decimal,
        commission: Decimal,
    },
    Rejected {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct InstructionRecord {
    pub id: u64,
    #[serde(flatten)]
    pub instruction: Instruction,
    pub outcome: InstructionStatus,
}

#[derive(Debug, Clone, Default)]
pub struct InstructionLedger {
    records: Vec<InstructionRecord>,
    index: HashMap<u64, usize>,
}

impl InstructionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&mut self, id: u64, instruction: Instruction) {
        self.index.insert(id, self.records.len());
        self.records.push(InstructionRecord {
            id,
            instruction,
            outcome: InstructionStatus::Submitted,
        });
    }

    /// Update a record from the host's execution report.
    pub fn apply(&mut self, report: &ExecutionReport) {
        let Some(record) = self.index.get(&report.id).and_then(|i| self.records.get_mut(*i)) else {
            warn!(id = report.id, "Execution report for unknown instruction");
            return;
        };

        record.outcome = match &report.result {
            Ok(fill) => InstructionStatus::Filled {
                date: fill.date,
                size: fill.size,
                price: fill.price,
                commission: fill.commission,
            },
            Err(e) => InstructionStatus::Rejected {
                error: e.to_string(),
            },
        };
    }

    pub fn records(&self) -> &[InstructionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn count_kind(&self, kind: InstructionKind) -> usize {
        self.records
            .iter()
            .filter(|r| r.instruction.kind == kind)
            .count()
    }

    pub fn filled_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, InstructionStatus::Filled { .. }))
            .count()
    }

    pub fn rejected_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, InstructionStatus::Rejected { .. }))
            .count()
    }

    /// Instructions decided on a given bar.
    pub fn on_date(&self, date: NaiveDate) -> impl Iterator<Item = &InstructionRecord> {
        self.records
            .iter()
            .filter(move |r| r.instruction.date == date)
    }
}
