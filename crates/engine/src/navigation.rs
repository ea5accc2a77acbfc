//! Step navigation rules.
//!
//! Pure functions deciding whether the user may advance, where "next" and "previous" lead,
//! and whether a direct jump is allowed. Locked steps (only present on resumed sessions) can
//! never be entered again.

use std::collections::BTreeSet;

use formflow_types::{FieldErrors, FormData, StepDefinition, has_meaningful_value};

/// Snapshot of the position-related parts of a transaction.
#[derive(Debug, Clone, Copy)]
pub struct NavigationContext<'a> {
    pub current_step: usize,
    pub step_count: usize,
    pub completed_steps: &'a BTreeSet<usize>,
    pub locked_steps: &'a BTreeSet<usize>,
    pub is_resumed: bool,
}

/// Returns true when every required field on the step holds a value and none has an error.
pub fn can_proceed(step: Option<&StepDefinition>, form_data: &FormData, field_errors: &FieldErrors) -> bool {
    let Some(step) = step else {
        return false;
    };
    step.fields.iter().all(|field| {
        if field_errors.contains_key(&field.id) {
            return false;
        }
        if field.is_read_only() || !field.is_required(form_data) {
            return true;
        }
        has_meaningful_value(&field.kind, form_data.get(&field.id).map(String::as_str))
    })
}

/// Index following `current`, or `None` on the last step.
pub fn next_index(current: usize, step_count: usize) -> Option<usize> {
    let candidate = current + 1;
    (candidate < step_count).then_some(candidate)
}

/// Index preceding `current`, or `None` when already at the start or when the previous step
/// is locked on a resumed session.
pub fn previous_index(current: usize, locked_steps: &BTreeSet<usize>, is_resumed: bool) -> Option<usize> {
    let candidate = current.checked_sub(1)?;
    if is_resumed && locked_steps.contains(&candidate) {
        return None;
    }
    Some(candidate)
}

/// Returns true when the user may jump straight to `target`.
///
/// Jumps never enter a locked step. Otherwise they may go backwards freely, and forwards
/// only onto steps already completed.
pub fn can_jump_to(target: usize, context: NavigationContext<'_>) -> bool {
    if target >= context.step_count {
        return false;
    }
    if context.locked_steps.contains(&target) {
        return false;
    }
    target <= context.current_step || context.completed_steps.contains(&target)
}

/// Returns true when a strategy reroute points at an existing step.
pub fn is_valid_reroute(target: usize, step_count: usize) -> bool {
    target < step_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use formflow_types::FieldDefinition;

    fn context<'a>(current: usize, completed: &'a BTreeSet<usize>, locked: &'a BTreeSet<usize>) -> NavigationContext<'a> {
        NavigationContext {
            current_step: current,
            step_count: 5,
            completed_steps: completed,
            locked_steps: locked,
            is_resumed: !locked.is_empty(),
        }
    }

    #[test]
    fn next_stops_at_last_step() {
        assert_eq!(next_index(0, 3), Some(1));
        assert_eq!(next_index(2, 3), None);
    }

    #[test]
    fn previous_respects_locks_only_when_resumed() {
        let locked: BTreeSet<usize> = [0, 1, 2].into_iter().collect();
        assert_eq!(previous_index(3, &locked, true), None);
        assert_eq!(previous_index(3, &locked, false), Some(2));
        assert_eq!(previous_index(0, &BTreeSet::new(), false), None);
    }

    #[test]
    fn jumps_are_backward_or_onto_completed_steps() {
        let completed: BTreeSet<usize> = [0, 1, 3].into_iter().collect();
        let unlocked = BTreeSet::new();

        assert!(can_jump_to(0, context(2, &completed, &unlocked)));
        assert!(can_jump_to(3, context(2, &completed, &unlocked)));
        assert!(!can_jump_to(4, context(2, &completed, &unlocked)));
        assert!(!can_jump_to(9, context(2, &completed, &unlocked)));
    }

    #[test]
    fn jumps_never_enter_locked_steps() {
        let completed: BTreeSet<usize> = [0, 1, 2].into_iter().collect();
        let locked = completed.clone();

        for target in 0..3 {
            assert!(!can_jump_to(target, context(3, &completed, &locked)));
        }
        assert!(can_jump_to(3, context(3, &completed, &locked)));
    }

    #[test]
    fn can_proceed_requires_mandatory_values_and_no_errors() {
        let step = StepDefinition::new("Owner")
            .with_field(FieldDefinition::text("owner_name", "Owner").mandatory())
            .with_field(FieldDefinition::text("nickname", "Nickname"));
        let mut form_data = FormData::new();
        let mut errors = FieldErrors::new();

        assert!(!can_proceed(Some(&step), &form_data, &errors));
        form_data.insert("owner_name".into(), "Ali".into());
        assert!(can_proceed(Some(&step), &form_data, &errors));
        errors.insert("nickname".into(), "too long".into());
        assert!(!can_proceed(Some(&step), &form_data, &errors));
        assert!(!can_proceed(None, &form_data, &FieldErrors::new()));
    }
}
