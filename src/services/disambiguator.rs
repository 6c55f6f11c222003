//! Payable amount disambiguation.
//!
//! Transfers to the master wallet carry no reference, so each active deposit
//! must be told a payable amount no other active deposit holds. The search is
//! pure: the caller supplies the snapshot and the store's unique index closes
//! the race between snapshot and insert.

use std::collections::HashSet;
use thiserror::Error;

use crate::config::DisambiguationSettings;
use crate::money::Amount;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisambiguationError {
    #[error("No free payable amount near {requested} after {attempts} attempts")]
    Exhausted { requested: Amount, attempts: u32 },
}

/// Returns `requested` if no active deposit holds it, otherwise the nearest
/// free amount, trying `-step, +step, -2*step, +2*step, ...`.
///
/// Every candidate counts against `max_attempts`, including non-positive ones,
/// which are never returned. The search stops once the offset exceeds
/// `max_deviation`.
pub fn disambiguate(
    requested: Amount,
    active: &HashSet<Amount>,
    settings: &DisambiguationSettings,
) -> Result<Amount, DisambiguationError> {
    if !active.contains(&requested) {
        return Ok(requested);
    }

    let step = settings.step.scaled();
    let max_deviation = settings.max_deviation.scaled();
    let mut attempts = 0u32;

    if step > 0 {
        let mut offset = step;
        while offset <= max_deviation {
            for candidate in [
                requested.scaled().checked_sub(offset),
                requested.scaled().checked_add(offset),
            ] {
                if attempts >= settings.max_attempts {
                    return Err(DisambiguationError::Exhausted { requested, attempts });
                }
                attempts += 1;

                let candidate = match candidate {
                    Some(units) if units > 0 => Amount::from_scaled(units),
                    _ => continue,
                };
                if !active.contains(&candidate) {
                    return Ok(candidate);
                }
            }
            offset = match offset.checked_add(step) {
                Some(next) => next,
                None => break,
            };
        }
    }

    Err(DisambiguationError::Exhausted { requested, attempts })
}
