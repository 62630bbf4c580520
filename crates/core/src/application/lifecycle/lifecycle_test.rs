//! Unit tests for mutation, retry and completion tickets

#[cfg(test)]
mod tests {
    use crate::application::test_support::*;
    use crate::config::SchedulerConfig;
    use crate::domain::{Job, JobMutation, JobState};
    use crate::error::AppError;
    use crate::port::{JobRepository, JobTicketRepository};

    fn no_auto_retry() -> SchedulerConfig {
        SchedulerConfig {
            retry_on_explicit_fail: false,
            ..Default::default()
        }
    }

    async fn pending(h: &Harness) -> Job {
        h.lifecycle
            .enqueue_and_insert(dicom_spec(), system(), None)
            .await
            .unwrap()
    }

    async fn job_in(h: &Harness, state: JobState) -> Job {
        let job = pending(h).await;
        let lc = &h.lifecycle;
        match state {
            JobState::Pending => job,
            JobState::Cancelled => lc.mutate(&job, JobMutation::to_state(state)).await.unwrap(),
            JobState::Running => lc
                .mutate(&job, JobMutation::to_state(JobState::Running))
                .await
                .unwrap(),
            JobState::Failed | JobState::Complete => {
                let running = lc
                    .mutate(&job, JobMutation::to_state(JobState::Running))
                    .await
                    .unwrap();
                lc.mutate(&running, JobMutation::to_state(state)).await.unwrap()
            }
        }
    }

    #[tokio::test]
    async fn test_mutate_transition_table() {
        for from in JobState::ALL {
            for to in JobState::ALL {
                let h = Harness::with_config(no_auto_retry());
                let job = job_in(&h, from).await;
                let legal = matches!(from, JobState::Pending | JobState::Running)
                    && from.can_transition_to(to);

                let result = h.lifecycle.mutate(&job, JobMutation::to_state(to)).await;
                if legal {
                    let saved = result.unwrap();
                    assert_eq!(saved.state, to, "{} -> {}", from, to);
                    let stored = h.lifecycle.get_job(&job.id).await.unwrap();
                    assert_eq!(stored.state, to);
                } else {
                    let err = result.unwrap_err();
                    assert!(err.is_state_illegal(), "{} -> {}: {:?}", from, to, err);
                    let stored = h.lifecycle.get_job(&job.id).await.unwrap();
                    assert_eq!(stored.state, from);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_start_materializes_request_and_profile_time() {
        let h = Harness::with_config(no_auto_retry());
        let running = job_in(&h, JobState::Running).await;

        let request = running.request.as_ref().unwrap();
        assert!(request.outputs[0].uri.contains(&running.id));
        assert_eq!(running.transitions[&JobState::Running], START);

        h.clock.advance(5_000);
        let done = h
            .lifecycle
            .mutate(&running, JobMutation::to_state(JobState::Complete))
            .await
            .unwrap();
        assert_eq!(done.profile.total_time_ms, Some(5_000));
        assert_eq!(done.modified, START + 5_000);
    }

    #[tokio::test]
    async fn test_stale_copy_loses_cas() {
        let h = Harness::with_config(no_auto_retry());
        let job = pending(&h).await;

        h.lifecycle
            .mutate(&job, JobMutation::to_state(JobState::Running))
            .await
            .unwrap();

        // `job` still says pending; the stored copy moved on
        let err = h
            .lifecycle
            .mutate(&job, JobMutation::to_state(JobState::Cancelled))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(err.is_retryable());

        let stored = h.lifecycle.get_job(&job.id).await.unwrap();
        assert_eq!(stored.state, JobState::Running);
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_modified_only() {
        let h = Harness::with_config(no_auto_retry());
        let running = job_in(&h, JobState::Running).await;

        h.clock.advance(60_000);
        let beat = h.lifecycle.heartbeat(&running.id).await.unwrap();

        assert_eq!(beat.state, JobState::Running);
        assert_eq!(beat.modified, START + 60_000);
        assert_eq!(beat.transitions, running.transitions);
        assert_eq!(beat.request, running.request);
    }

    #[tokio::test]
    async fn test_failure_reason_recorded() {
        let h = Harness::with_config(no_auto_retry());
        let running = job_in(&h, JobState::Running).await;

        let failed = h
            .lifecycle
            .mutate(&running, JobMutation::failed("gear exited 1"))
            .await
            .unwrap();
        assert_eq!(failed.failure_reason.as_deref(), Some("gear exited 1"));
    }

    #[tokio::test]
    async fn test_explicit_fail_spawns_retry() {
        let h = Harness::new();
        let running = job_in(&h, JobState::Running).await;

        let failed = h
            .lifecycle
            .mutate(&running, JobMutation::to_state(JobState::Failed))
            .await
            .unwrap();
        assert_eq!(failed.state, JobState::Failed);

        let retry = h
            .jobs
            .find_retry_of(&failed.id)
            .await
            .unwrap()
            .expect("retry spawned");
        assert_eq!(retry.state, JobState::Pending);
        assert_eq!(retry.attempt, 2);
        assert_eq!(retry.previous_job_id.as_deref(), Some(failed.id.as_str()));
        assert!(retry.intention_equals(&failed));

        // Request carried over with the new id in its endpoints
        let request = retry.request.as_ref().unwrap();
        assert!(request.outputs[0].uri.contains(&retry.id));
        assert!(!request.outputs[0].uri.contains(&failed.id));

        let source = h.lifecycle.get_job(&failed.id).await.unwrap();
        assert_eq!(source.retried, Some(retry.created));
    }

    #[tokio::test]
    async fn test_retry_race_exactly_one_wins() {
        let h = Harness::with_config(no_auto_retry());
        let failed = job_in(&h, JobState::Failed).await;

        let (a, b) = tokio::join!(
            h.lifecycle.retry(&failed, false, true),
            h.lifecycle.retry(&failed, false, true)
        );
        let wins = [&a, &b].iter().filter(|r| matches!(r, Ok(Some(_)))).count();
        let conflicts = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(AppError::Conflict(_))))
            .count();
        assert_eq!((wins, conflicts), (1, 1));

        let retries: Vec<Job> = h
            .jobs
            .all()
            .into_iter()
            .filter(|j| j.previous_job_id.as_deref() == Some(failed.id.as_str()))
            .collect();
        assert_eq!(retries.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_blocked_by_retried_marker() {
        let h = Harness::with_config(no_auto_retry());
        let failed = job_in(&h, JobState::Failed).await;

        // Another writer claimed the source but has not inserted its job yet
        let mut claimed = failed.clone();
        claimed.retried = Some(START);
        h.jobs.put(claimed);

        let err = h.lifecycle.retry(&failed, false, true).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(h.jobs.all().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_respawn_insert_leaves_source_retryable() {
        let h = Harness::with_config(no_auto_retry());
        let failed = job_in(&h, JobState::Failed).await;

        h.jobs
            .fail_next_insert(AppError::Database("disk I/O error".to_string()));
        let err = h.lifecycle.retry(&failed, false, true).await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));

        let source = h.lifecycle.get_job(&failed.id).await.unwrap();
        assert_eq!(source.retried, None);
        assert_eq!(source.state, JobState::Failed);
        assert!(h.jobs.find_retry_of(&failed.id).await.unwrap().is_none());

        // The next attempt goes through
        let new_id = h.lifecycle.retry(&source, false, true).await.unwrap().unwrap();
        let respawn = h.lifecycle.get_job(&new_id).await.unwrap();
        assert_eq!(respawn.previous_job_id.as_deref(), Some(failed.id.as_str()));
        assert!(h.lifecycle.get_job(&failed.id).await.unwrap().retried.is_some());
    }

    #[tokio::test]
    async fn test_retry_attempt_ceiling_and_force() {
        let h = Harness::with_config(no_auto_retry());
        let mut failed = job_in(&h, JobState::Failed).await;
        failed.attempt = 3;
        h.jobs.put(failed.clone());

        assert_eq!(h.lifecycle.retry(&failed, false, true).await.unwrap(), None);
        assert!(h.jobs.find_retry_of(&failed.id).await.unwrap().is_none());

        let forced = h.lifecycle.retry(&failed, true, true).await.unwrap().unwrap();
        let forced = h.lifecycle.get_job(&forced).await.unwrap();
        assert_eq!(forced.attempt, 4);
    }

    #[tokio::test]
    async fn test_retry_source_state_rules() {
        let h = Harness::with_config(no_auto_retry());

        let pending = job_in(&h, JobState::Pending).await;
        let err = h.lifecycle.retry(&pending, false, false).await.unwrap_err();
        assert!(err.is_state_illegal());

        let complete = job_in(&h, JobState::Complete).await;
        let err = h.lifecycle.retry(&complete, false, true).await.unwrap_err();
        assert!(err.is_state_illegal());
        assert!(h
            .lifecycle
            .retry(&complete, false, false)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_retry_without_request_is_precondition_failure() {
        let h = Harness::with_config(no_auto_retry());
        let cancelled = job_in(&h, JobState::Cancelled).await;

        let err = h.lifecycle.retry(&cancelled, false, false).await.unwrap_err();
        assert!(matches!(err, AppError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn test_ticketed_completion() {
        let h = Harness::with_config(no_auto_retry());
        let job = pending(&h).await;

        let err = h.lifecycle.prepare_complete(&job.id).await.unwrap_err();
        assert!(err.is_state_illegal());

        let running = h
            .lifecycle
            .mutate(&job, JobMutation::to_state(JobState::Running))
            .await
            .unwrap();
        let ticket = h.lifecycle.prepare_complete(&running.id).await.unwrap();
        assert_eq!(ticket.job_id, running.id);
        assert_eq!(h.tickets.find_by_job(&running.id).await.unwrap().len(), 1);

        let done = h.lifecycle.complete(&ticket.id, true, None).await.unwrap();
        assert_eq!(done.state, JobState::Complete);
        assert!(h.tickets.find(&ticket.id).await.unwrap().is_none());

        let err = h.lifecycle.complete(&ticket.id, true, None).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_ticketed_failure_keeps_reason() {
        let h = Harness::with_config(no_auto_retry());
        let running = job_in(&h, JobState::Running).await;
        let ticket = h.lifecycle.prepare_complete(&running.id).await.unwrap();

        let done = h
            .lifecycle
            .complete(&ticket.id, false, Some("upload failed".to_string()))
            .await
            .unwrap();
        assert_eq!(done.state, JobState::Failed);
        assert_eq!(done.failure_reason.as_deref(), Some("upload failed"));
    }
}
