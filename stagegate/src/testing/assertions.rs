//! Test assertions for stage and task outcomes.

use super::{Mark, StageEvent};
use crate::errors::{JobError, TaskConflict, TaskError};

/// Asserts that no handler of stage `i + 1` started before every handler of
/// stage `i` that appears in the log had ended.
pub fn assert_lockstep(events: &[StageEvent]) {
    for (pos, event) in events.iter().enumerate() {
        if event.mark != Mark::Start || event.stage_index == 0 {
            continue;
        }
        let previous = event.stage_index - 1;
        let late_end = events[pos..]
            .iter()
            .find(|later| later.stage_index == previous && later.mark == Mark::End);

        assert!(
            late_end.is_none(),
            "job {} started stage {} before {:?} finished stage {}",
            event.job,
            event.stage_index,
            late_end,
            previous
        );
    }
}

/// Asserts that a task failed because of the given slot conflict.
pub fn assert_task_conflict<T: std::fmt::Debug>(result: &Result<T, TaskError>, expected: &TaskConflict) {
    match result {
        Err(TaskError::Conflict(conflict)) => assert_eq!(
            conflict, expected,
            "Expected conflict {expected:?}, got {conflict:?}"
        ),
        other => panic!("Expected conflict {expected:?}, got {other:?}"),
    }
}

/// Asserts that a job failed because another job poisoned its barrier
/// transition, and returns the stage it had reached.
pub fn assert_collateral<T: std::fmt::Debug>(result: &Result<T, JobError>) -> Option<String> {
    match result {
        Err(JobError::Stage(err)) => err.stage_reached.clone(),
        other => panic!("Expected a collateral stage error, got {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{SharedError, StageError};

    fn event(stage_index: usize, job: usize, mark: Mark) -> StageEvent {
        StageEvent { stage_index, job, mark }
    }

    #[test]
    fn test_lockstep_accepts_ordered_log() {
        assert_lockstep(&[
            event(0, 1, Mark::Start),
            event(0, 2, Mark::Start),
            event(0, 2, Mark::End),
            event(0, 1, Mark::End),
            event(1, 1, Mark::Start),
            event(1, 1, Mark::End),
        ]);
    }

    #[test]
    #[should_panic(expected = "started stage 1")]
    fn test_lockstep_rejects_overlap() {
        assert_lockstep(&[
            event(0, 1, Mark::Start),
            event(0, 2, Mark::Start),
            event(0, 1, Mark::End),
            event(1, 1, Mark::Start),
            event(0, 2, Mark::End),
        ]);
    }

    #[test]
    fn test_conflict_and_collateral_helpers() {
        let rejected: Result<(), TaskError> = Err(TaskConflict::Replaced.into());
        assert_task_conflict(&rejected, &TaskConflict::Replaced);

        let cause = SharedError::new(anyhow::anyhow!("bad"));
        let failed: Result<(), JobError> = Err(StageError::collateral(cause).with_stage_reached("A").into());
        assert_eq!(assert_collateral(&failed).as_deref(), Some("A"));
    }
}
