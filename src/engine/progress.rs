//! Progress projection: a display-ready view of one plan's execution.
//!
//! Pure function of (plan, state). The in-flight and failed steps are
//! resolved through step ids, never positions, so a projection stays correct
//! for rebuilt plans that elide already-satisfied steps.

use crate::domain::step::{ExecutionState, PlanOutcome, StepId, StepPlan, StepStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

/// One row of a progress display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayStep {
    pub id: StepId,
    pub label: String,
    pub status: DisplayStatus,
}

/// Project the execution state onto the plan's step list.
///
/// Completed and verified-skipped steps both display as completed; a
/// terminal success marks every step completed regardless of how it
/// settled.
pub fn project(plan: &StepPlan, state: &ExecutionState) -> Vec<DisplayStep> {
    let success = matches!(state.outcome, Some(PlanOutcome::Completed));
    let failed_at = match &state.outcome {
        Some(PlanOutcome::Failed { step, .. }) => plan.index_of(step),
        _ => None,
    };
    let current = state.current.as_ref().and_then(|id| plan.index_of(id));

    plan.steps
        .iter()
        .enumerate()
        .map(|(index, step)| {
            let status = if success {
                DisplayStatus::Completed
            } else if failed_at == Some(index) {
                DisplayStatus::Error
            } else if current == Some(index) {
                DisplayStatus::InProgress
            } else {
                match state.statuses.get(index) {
                    Some(StepStatus::Completed | StepStatus::Skipped) => DisplayStatus::Completed,
                    _ => DisplayStatus::Pending,
                }
            };
            DisplayStep {
                id: step.id.clone(),
                label: step.label.clone(),
                status,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::MarketId;
    use crate::domain::primitives::ChainId;
    use crate::domain::step::{Step, StepAction};
    use crate::error::FlowError;
    use alloy_primitives::Address;

    fn plan_with(ids: &[&str]) -> StepPlan {
        let steps = ids
            .iter()
            .map(|id| {
                Step::new(
                    *id,
                    format!("Step {id}"),
                    StepAction::RequestWithdraw {
                        pool: Address::repeat_byte(0xaa),
                    },
                )
            })
            .collect();
        StepPlan::new(
            MarketId::new("fusd-steth"),
            Address::repeat_byte(0x01),
            ChainId::new(1),
            steps,
        )
    }

    fn statuses(rows: &[DisplayStep]) -> Vec<DisplayStatus> {
        rows.iter().map(|r| r.status).collect()
    }

    #[test]
    fn test_fresh_state_is_all_pending() {
        let plan = plan_with(&["approve-pool", "deposit-pool"]);
        let state = ExecutionState::new(&plan);
        assert_eq!(
            statuses(&project(&plan, &state)),
            vec![DisplayStatus::Pending, DisplayStatus::Pending]
        );
    }

    #[test]
    fn test_current_step_resolved_by_id() {
        let plan = plan_with(&["approve-pool", "deposit-pool", "redeem"]);
        let mut state = ExecutionState::new(&plan);
        state.begin(0, &plan.steps[0].id);
        state.complete(0);
        state.begin(1, &plan.steps[1].id);

        assert_eq!(
            statuses(&project(&plan, &state)),
            vec![
                DisplayStatus::Completed,
                DisplayStatus::InProgress,
                DisplayStatus::Pending
            ]
        );
    }

    #[test]
    fn test_skipped_step_displays_completed() {
        let plan = plan_with(&["approve-pool", "deposit-pool"]);
        let mut state = ExecutionState::new(&plan);
        state.begin(0, &plan.steps[0].id);
        state.skip(0);
        state.begin(1, &plan.steps[1].id);

        assert_eq!(
            statuses(&project(&plan, &state)),
            vec![DisplayStatus::Completed, DisplayStatus::InProgress]
        );
    }

    #[test]
    fn test_success_marks_every_step_completed() {
        let plan = plan_with(&["approve-pool", "deposit-pool"]);
        let mut state = ExecutionState::new(&plan);
        state.begin(0, &plan.steps[0].id);
        state.skip(0);
        state.begin(1, &plan.steps[1].id);
        state.complete(1);
        state.finish();

        assert_eq!(
            statuses(&project(&plan, &state)),
            vec![DisplayStatus::Completed, DisplayStatus::Completed]
        );
    }

    #[test]
    fn test_failed_step_displays_error_and_later_steps_stay_pending() {
        let plan = plan_with(&["approve-pool", "deposit-pool", "redeem"]);
        let mut state = ExecutionState::new(&plan);
        state.begin(0, &plan.steps[0].id);
        state.complete(0);
        state.begin(1, &plan.steps[1].id);
        state.fail(
            1,
            &plan.steps[1].id,
            FlowError::PlanPrecondition("boom".to_string()),
        );

        assert_eq!(
            statuses(&project(&plan, &state)),
            vec![
                DisplayStatus::Completed,
                DisplayStatus::Error,
                DisplayStatus::Pending
            ]
        );
    }

    #[test]
    fn test_return_to_input_leaves_no_active_step() {
        let plan = plan_with(&["approve-pool", "deposit-pool"]);
        let mut state = ExecutionState::new(&plan);
        state.begin(0, &plan.steps[0].id);
        state.complete(0);
        state.begin(1, &plan.steps[1].id);
        state.return_to_input(1, crate::domain::step::ReturnCause::UserRejected);

        assert_eq!(
            statuses(&project(&plan, &state)),
            vec![DisplayStatus::Completed, DisplayStatus::Pending]
        );
    }

    #[test]
    fn test_projection_ignores_step_position_for_the_current_marker() {
        // A state whose current id sits late in the plan without the
        // earlier steps having run; only the id lookup places the marker.
        let plan = plan_with(&["approve-pool", "deposit-pool", "redeem"]);
        let mut state = ExecutionState::new(&plan);
        state.begin(2, &plan.steps[2].id);

        assert_eq!(
            statuses(&project(&plan, &state)),
            vec![
                DisplayStatus::Pending,
                DisplayStatus::Pending,
                DisplayStatus::InProgress
            ]
        );
    }
}
