//! Fee and reserve arithmetic over the last known network parameters

use super::{LedgerState, Remote};
use crate::error::{RemoteError, Result};

/// Recommended drops per fee unit, with load and cushion applied.
pub(crate) fn fee_unit(ledger: &LedgerState, cushion: f64) -> f64 {
    let mut unit = ledger.fee_base as f64 / ledger.fee_ref.max(1) as f64;
    unit *= ledger.load_factor as f64 / ledger.load_base.max(1) as f64;
    unit * cushion
}

pub(crate) fn fee_for_units(ledger: &LedgerState, cushion: f64, units: u32) -> u64 {
    (units as f64 * fee_unit(ledger, cushion)).ceil() as u64
}

pub(crate) fn reserve_for(ledger: &LedgerState, owner_count: i64) -> Result<u64> {
    let owner_count = u64::try_from(owner_count)
        .map_err(|_| RemoteError::Config("Owner count must not be negative.".to_string()))?;
    let base = ledger.reserve_base.unwrap_or(0);
    let increment = ledger.reserve_inc.unwrap_or(0);
    Ok(base.saturating_add(increment.saturating_mul(owner_count)))
}

impl Remote {
    pub fn fee_tx_unit(&self) -> f64 {
        fee_unit(&self.ledger_state(), self.config().fee_cushion)
    }

    /// Fee in drops for a transaction costing `units` fee units.
    pub fn fee_tx(&self, units: u32) -> String {
        fee_for_units(&self.ledger_state(), self.config().fee_cushion, units).to_string()
    }

    /// Reserve in drops for an account owning `owner_count` objects.
    pub fn reserve(&self, owner_count: i64) -> Result<u64> {
        reserve_for(&self.ledger_state(), owner_count)
    }
}
