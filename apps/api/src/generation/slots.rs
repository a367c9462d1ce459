//! Answer-slot load balancing for grammar items.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::items::model::OPTION_COUNT;

const DEFAULT_SLOT: u8 = 3;

/// Picks the 1-based slot the next item's answer should occupy.
///
/// The slot of the most recent item is avoided; among the remaining slots the
/// least used wins, with ties broken at random. Out-of-range history entries
/// are ignored.
pub fn choose_answer_slot<R: Rng + ?Sized>(history: &[u8], rng: &mut R) -> u8 {
    let valid: Vec<u8> = history
        .iter()
        .copied()
        .filter(|slot| (1..=OPTION_COUNT as u8).contains(slot))
        .collect();
    let recent = valid.last().copied();

    let mut usage = [0usize; OPTION_COUNT];
    for slot in &valid {
        usage[*slot as usize - 1] += 1;
    }

    let pool: Vec<u8> = (1..=OPTION_COUNT as u8)
        .filter(|slot| Some(*slot) != recent)
        .collect();
    let Some(min_usage) = pool.iter().map(|s| usage[*s as usize - 1]).min() else {
        return DEFAULT_SLOT;
    };
    let balanced: Vec<u8> = pool
        .into_iter()
        .filter(|s| usage[*s as usize - 1] == min_usage)
        .collect();
    balanced.choose(rng).copied().unwrap_or(DEFAULT_SLOT)
}
