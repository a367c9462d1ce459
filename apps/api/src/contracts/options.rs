//! Five-slot option layout.

use serde_json::Value;

use crate::contracts::fields::{CandidateFields, RawOption};
use crate::contracts::ContractError;
use crate::items::model::{ItemType, OptionStatus, OPTION_COUNT};
use crate::items::text::label_to_slot;

/// Places option entries into slots ①–⑤.
///
/// An entry goes to the slot its label names; unlabeled entries, and entries
/// whose slot is already filled, take the first free slot.
pub fn assign_slots(kind: ItemType, entries: &[Value]) -> Result<Vec<RawOption>, ContractError> {
    if entries.is_empty() {
        return Err(ContractError::OptionsMissing(kind));
    }
    let mut slots: [Option<RawOption>; OPTION_COUNT] = Default::default();
    for (index, entry) in entries.iter().enumerate() {
        let option = RawOption::from_value(entry)
            .ok_or_else(|| ContractError::option(kind, index, "missing text"))?;
        let labelled = option
            .label
            .as_ref()
            .and_then(label_to_slot)
            .filter(|slot| slots[*slot].is_none());
        let slot = labelled
            .or_else(|| slots.iter().position(Option::is_none))
            .ok_or(ContractError::DuplicateLabel)?;
        slots[slot] = Some(option);
    }
    slots
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or(ContractError::OptionCount(kind))
}

/// Folds candidate-level reason/tag maps and the answer field into each option.
pub fn attach_candidate_maps(options: &mut [RawOption], fields: &CandidateFields) {
    for (slot, option) in options.iter_mut().enumerate() {
        if option.reason.is_none() {
            option.reason = fields.reasons.get(&slot).cloned();
        }
        if option.tag.is_none() {
            option.tag = fields.tags.get(&slot).cloned();
        }
        if !fields.answer.is_empty() {
            option.is_answer = Some(fields.answer.contains(&slot));
        }
    }
}

/// Slots flagged as the answer, by answer field or by an explicit option flag.
pub fn flagged_answers(options: &[RawOption]) -> Vec<usize> {
    options
        .iter()
        .enumerate()
        .filter(|(_, o)| o.is_answer == Some(true))
        .map(|(slot, _)| slot)
        .collect()
}

pub fn slots_with_status(options: &[RawOption], status: OptionStatus) -> Vec<usize> {
    options
        .iter()
        .enumerate()
        .filter(|(_, o)| o.status == Some(status))
        .map(|(slot, _)| slot)
        .collect()
}
