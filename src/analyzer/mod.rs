//! Per-run analysis: pairing statistics, daily snapshots and the
//! instruction ledger.

mod ledger;
mod pairing;
mod snapshot;

pub use ledger::{InstructionLedger, InstructionRecord, InstructionStatus};
pub use pairing::{Bands, PairKey, PairRecord, PairingTracker};
pub use snapshot::{DailySnapshot, SnapshotRecorder};
