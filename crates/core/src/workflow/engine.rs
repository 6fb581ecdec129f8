use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::request::{
    PendingFilter, ReassignmentRequest, RequestDraft, RequestId, RequestKind, RequestStatus,
};
use crate::identity::{is_blank, normalize_email, same_email};

use super::{DirectoryProvider, RequestStore, WorkflowError};

/// A manager-reassignment intent as submitted by a caller. Emails may arrive
/// in any casing; the engine normalizes before any rule runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub employee_email: String,
    pub employee_name: String,
    #[serde(default)]
    pub employee_job_title: Option<String>,
    #[serde(default)]
    pub employee_department: Option<String>,
    /// Empty means the employee currently has no manager.
    #[serde(default)]
    pub current_manager_email: String,
    #[serde(default)]
    pub current_manager_name: String,
    pub target_manager_email: String,
    pub target_manager_name: String,
    pub requestor_email: String,
    pub requestor_name: String,
}

impl SubmitRequest {
    pub(crate) fn normalized(mut self) -> Self {
        self.employee_email = normalize_email(&self.employee_email);
        self.current_manager_email = normalize_email(&self.current_manager_email);
        self.target_manager_email = normalize_email(&self.target_manager_email);
        self.requestor_email = normalize_email(&self.requestor_email);
        self
    }

    pub(crate) fn into_draft(self, kind: RequestKind) -> RequestDraft {
        RequestDraft {
            kind,
            employee_email: self.employee_email,
            employee_name: self.employee_name,
            employee_job_title: self.employee_job_title,
            employee_department: self.employee_department,
            current_manager_email: self.current_manager_email,
            current_manager_name: self.current_manager_name,
            target_manager_email: self.target_manager_email,
            target_manager_name: self.target_manager_name,
            requestor_email: self.requestor_email,
            requestor_name: self.requestor_name,
        }
    }
}

/// Which submission path a batch belongs to. `Self_` is the claim-for-myself
/// flow; `Other` hands a report to a third manager and always requires that
/// manager's consent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchMode {
    Self_,
    Other,
}

#[derive(Clone)]
pub struct WorkflowEngine {
    directory: Arc<dyn DirectoryProvider>,
    store: Arc<dyn RequestStore>,
}

impl WorkflowEngine {
    pub fn new(directory: Arc<dyn DirectoryProvider>, store: Arc<dyn RequestStore>) -> Self {
        Self { directory, store }
    }

    /// A manager claims an employee for themselves. With no current manager
    /// the claim bypasses approval and mutates the directory unforced, so a
    /// concurrent claim surfaces as a conflict rather than a silent
    /// overwrite. Otherwise the current manager must approve the release.
    pub async fn submit_self_assignment(
        &self,
        submission: SubmitRequest,
    ) -> Result<(), WorkflowError> {
        let submission = submission.normalized();

        if submission.current_manager_email == submission.target_manager_email {
            return Err(WorkflowError::TargetIsCurrentManager {
                employees: vec![submission.employee_email],
            });
        }
        self.ensure_no_pending(&submission.employee_email).await?;

        if is_blank(&submission.current_manager_email) {
            self.directory
                .assign_manager(
                    &submission.employee_email,
                    &submission.target_manager_email,
                    false,
                )
                .await?;
            return Ok(());
        }

        self.store.create(submission.into_draft(RequestKind::Approval)).await?;
        Ok(())
    }

    /// A requestor hands an employee to another manager. Never mutates the
    /// directory directly: even when the employee is unmanaged, or the
    /// requestor is the releasing manager, the receiving manager still has to
    /// accept the incoming report.
    pub async fn submit_assign_to_other(
        &self,
        submission: SubmitRequest,
    ) -> Result<(), WorkflowError> {
        let submission = submission.normalized();

        if submission.requestor_email == submission.target_manager_email {
            return Err(WorkflowError::RequestorIsTarget {
                employees: vec![submission.employee_email],
            });
        }
        if submission.current_manager_email == submission.target_manager_email {
            return Err(WorkflowError::TargetIsCurrentManager {
                employees: vec![submission.employee_email],
            });
        }
        self.ensure_no_pending(&submission.employee_email).await?;

        let kind = if is_blank(&submission.current_manager_email)
            || submission.requestor_email == submission.current_manager_email
        {
            RequestKind::Acceptance
        } else {
            RequestKind::Approval
        };
        self.store.create(submission.into_draft(kind)).await?;
        Ok(())
    }

    /// Batch submission. Validation is all-or-nothing: every static rule
    /// violation and every duplicate-pending conflict is collected and
    /// reported before anything executes. Execution is not atomic across the
    /// store and the directory; a mid-batch failure propagates after whatever
    /// already succeeded.
    pub async fn submit_batch(
        &self,
        submissions: Vec<SubmitRequest>,
        mode: BatchMode,
    ) -> Result<(), WorkflowError> {
        if submissions.is_empty() {
            return Err(WorkflowError::EmptyBatch);
        }
        let submissions: Vec<SubmitRequest> =
            submissions.into_iter().map(SubmitRequest::normalized).collect();

        if mode == BatchMode::Other {
            let offenders: Vec<String> = submissions
                .iter()
                .filter(|s| s.requestor_email == s.target_manager_email)
                .map(|s| s.employee_email.clone())
                .collect();
            if !offenders.is_empty() {
                return Err(WorkflowError::RequestorIsTarget { employees: offenders });
            }
        }
        let offenders: Vec<String> = submissions
            .iter()
            .filter(|s| s.current_manager_email == s.target_manager_email)
            .map(|s| s.employee_email.clone())
            .collect();
        if !offenders.is_empty() {
            return Err(WorkflowError::TargetIsCurrentManager { employees: offenders });
        }

        let mut conflicted = Vec::new();
        for submission in &submissions {
            let pending = self
                .store
                .count_pending(PendingFilter::for_employee(&submission.employee_email))
                .await?;
            if pending > 0 {
                conflicted.push(submission.employee_email.clone());
            }
        }
        if !conflicted.is_empty() {
            return Err(WorkflowError::PendingRequestExists { employees: conflicted });
        }

        match mode {
            BatchMode::Self_ => self.apply_self_batch(submissions).await,
            BatchMode::Other => self.apply_other_batch(submissions).await,
        }
    }

    /// Approve a pending request. Approval-stage requests re-validate against
    /// live state first: the approver must still be the manager of record,
    /// and there must not be competing pending requests for the same
    /// employee under the same manager. The directory is mutated exactly
    /// once per chain, at the terminal acceptance (or immediately when the
    /// requestor is also the receiving manager).
    pub async fn approve(
        &self,
        id: RequestId,
        comment: Option<&str>,
    ) -> Result<(), WorkflowError> {
        let request = self.load(id).await?;
        if request.status.is_terminal() {
            return Err(WorkflowError::AlreadyActedUpon(id));
        }
        let comment = comment.map(str::trim).filter(|c| !c.is_empty());

        match request.kind {
            RequestKind::Approval => {
                let current = self
                    .directory
                    .current_manager(&request.employee_email)
                    .await?
                    .map(|m| m.email)
                    .unwrap_or_default();
                if !same_email(&current, &request.current_manager_email) {
                    return Err(WorkflowError::ManagerChanged {
                        employee: request.employee_name.clone(),
                        manager: request.current_manager_email.clone(),
                    });
                }

                let competing = self
                    .store
                    .count_pending(PendingFilter::for_employee_and_manager(
                        &request.employee_email,
                        &request.current_manager_email,
                    ))
                    .await?;
                if competing > 1 {
                    return Err(WorkflowError::MultiplePendingRequests {
                        employee: request.employee_name.clone(),
                    });
                }

                if same_email(&request.requestor_email, &request.target_manager_email) {
                    // The requestor is the receiving manager; their consent is
                    // implicit, so the chain collapses to a single stage.
                    self.directory
                        .assign_manager(
                            &request.employee_email,
                            &request.target_manager_email,
                            true,
                        )
                        .await?;
                    self.store.set_status(id, RequestStatus::Approved, comment).await?;
                } else {
                    self.store.set_status(id, RequestStatus::Approved, comment).await?;
                    self.store.create(request.into_acceptance_draft()).await?;
                }
            }
            RequestKind::Acceptance => {
                self.directory
                    .assign_manager(&request.employee_email, &request.target_manager_email, true)
                    .await?;
                self.store.set_status(id, RequestStatus::Approved, comment).await?;
            }
        }
        Ok(())
    }

    /// Decline a pending request. A comment is mandatory; the directory is
    /// never touched.
    pub async fn decline(&self, id: RequestId, comment: &str) -> Result<(), WorkflowError> {
        let request = self.load(id).await?;
        if comment.trim().is_empty() {
            return Err(WorkflowError::CommentRequired);
        }
        if request.status.is_terminal() {
            return Err(WorkflowError::AlreadyActedUpon(id));
        }
        self.store.set_status(id, RequestStatus::Declined, Some(comment.trim())).await?;
        Ok(())
    }

    /// Withdraw a request before anyone acts on it.
    pub async fn cancel(&self, id: RequestId) -> Result<(), WorkflowError> {
        let request = self.load(id).await?;
        if request.status != RequestStatus::Pending {
            return Err(WorkflowError::AlreadyActedUpon(id));
        }
        self.store.set_status(id, RequestStatus::Cancelled, None).await?;
        Ok(())
    }

    /// Pending approval-stage requests this requestor opened.
    pub async fn initiated_by(
        &self,
        requestor_email: &str,
    ) -> Result<Vec<ReassignmentRequest>, WorkflowError> {
        let filter = PendingFilter {
            requestor_email: Some(normalize_email(requestor_email)),
            kind: Some(RequestKind::Approval),
            ..PendingFilter::default()
        };
        Ok(self.store.find_pending(filter).await?)
    }

    /// Pending approval-stage requests waiting on this manager's release.
    pub async fn pending_action_for(
        &self,
        manager_email: &str,
    ) -> Result<Vec<ReassignmentRequest>, WorkflowError> {
        let filter = PendingFilter {
            current_manager_email: Some(normalize_email(manager_email)),
            kind: Some(RequestKind::Approval),
            ..PendingFilter::default()
        };
        Ok(self.store.find_pending(filter).await?)
    }

    /// Pending acceptance-stage requests waiting on this manager to receive.
    pub async fn pending_acceptance_for(
        &self,
        target_manager_email: &str,
    ) -> Result<Vec<ReassignmentRequest>, WorkflowError> {
        let filter = PendingFilter {
            target_manager_email: Some(normalize_email(target_manager_email)),
            kind: Some(RequestKind::Acceptance),
            ..PendingFilter::default()
        };
        Ok(self.store.find_pending(filter).await?)
    }

    /// Close out pending requests the directory already reflects: when an
    /// employee's manager link equals the request's target, someone (or some
    /// other sync) already made the move, and the request only needs its
    /// status caught up. Returns how many requests were reconciled; a
    /// directory failure on one employee aborts the run.
    pub async fn reconcile_pending(&self) -> Result<usize, WorkflowError> {
        let pending = self.store.find_pending(PendingFilter::default()).await?;
        let mut reconciled = 0;
        for request in pending {
            let current = self
                .directory
                .current_manager(&request.employee_email)
                .await?
                .map(|m| m.email)
                .unwrap_or_default();
            if same_email(&current, &request.target_manager_email) {
                self.store.set_status(request.id, RequestStatus::Approved, None).await?;
                info!(
                    request_id = request.id.0,
                    employee = %request.employee_email,
                    target_manager = %request.target_manager_email,
                    "reconciled request already reflected in directory"
                );
                reconciled += 1;
            }
        }
        Ok(reconciled)
    }

    async fn load(&self, id: RequestId) -> Result<ReassignmentRequest, WorkflowError> {
        self.store.get(id).await?.ok_or(WorkflowError::RequestNotFound(id))
    }

    async fn ensure_no_pending(&self, employee_email: &str) -> Result<(), WorkflowError> {
        let pending =
            self.store.count_pending(PendingFilter::for_employee(employee_email)).await?;
        if pending > 0 {
            return Err(WorkflowError::PendingRequestExists {
                employees: vec![employee_email.to_string()],
            });
        }
        Ok(())
    }

    async fn apply_self_batch(
        &self,
        submissions: Vec<SubmitRequest>,
    ) -> Result<(), WorkflowError> {
        let (direct, needs_approval): (Vec<_>, Vec<_>) = submissions
            .into_iter()
            .partition(|s| is_blank(&s.current_manager_email));

        // One unforced directory call per distinct target manager.
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for submission in &direct {
            groups
                .entry(submission.target_manager_email.clone())
                .or_default()
                .push(submission.employee_email.clone());
        }
        for (target_manager, employees) in groups {
            self.directory.assign_manager_bulk(&employees, &target_manager, false).await?;
        }

        if !needs_approval.is_empty() {
            let drafts = needs_approval
                .into_iter()
                .map(|s| s.into_draft(RequestKind::Approval))
                .collect();
            self.store.create_batch(drafts).await?;
        }
        Ok(())
    }

    async fn apply_other_batch(
        &self,
        submissions: Vec<SubmitRequest>,
    ) -> Result<(), WorkflowError> {
        let (acceptance, approval): (Vec<_>, Vec<_>) = submissions.into_iter().partition(|s| {
            is_blank(&s.current_manager_email)
                || s.requestor_email == s.current_manager_email
        });

        if !acceptance.is_empty() {
            let drafts =
                acceptance.into_iter().map(|s| s.into_draft(RequestKind::Acceptance)).collect();
            self.store.create_batch(drafts).await?;
        }
        if !approval.is_empty() {
            let drafts =
                approval.into_iter().map(|s| s.into_draft(RequestKind::Approval)).collect();
            self.store.create_batch(drafts).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::domain::request::{PendingFilter, RequestId, RequestKind, RequestStatus};
    use crate::workflow::memory::{InMemoryDirectory, InMemoryRequestStore};
    use crate::workflow::{ErrorKind, RequestStore, WorkflowError};

    use super::{BatchMode, SubmitRequest, WorkflowEngine};

    fn submission(
        employee: &str,
        current_manager: &str,
        target_manager: &str,
        requestor: &str,
    ) -> SubmitRequest {
        SubmitRequest {
            employee_email: employee.to_string(),
            employee_name: employee.split('@').next().unwrap_or(employee).to_string(),
            employee_job_title: Some("Engineer".to_string()),
            employee_department: Some("R&D".to_string()),
            current_manager_email: current_manager.to_string(),
            current_manager_name: current_manager
                .split('@')
                .next()
                .unwrap_or(current_manager)
                .to_string(),
            target_manager_email: target_manager.to_string(),
            target_manager_name: target_manager
                .split('@')
                .next()
                .unwrap_or(target_manager)
                .to_string(),
            requestor_email: requestor.to_string(),
            requestor_name: requestor.split('@').next().unwrap_or(requestor).to_string(),
        }
    }

    fn engine() -> (WorkflowEngine, Arc<InMemoryDirectory>, Arc<InMemoryRequestStore>) {
        let directory = Arc::new(InMemoryDirectory::default());
        let store = Arc::new(InMemoryRequestStore::default());
        (WorkflowEngine::new(directory.clone(), store.clone()), directory, store)
    }

    async fn pending_count(store: &InMemoryRequestStore) -> u64 {
        store.count_pending(PendingFilter::default()).await.expect("count")
    }

    #[tokio::test]
    async fn self_assignment_to_current_manager_is_rejected() {
        let (engine, _, store) = engine();

        let error = engine
            .submit_self_assignment(submission("alice@co.com", "Bob@CO.com", "bob@co.com", "bob@co.com"))
            .await
            .expect_err("self-target must be rejected");

        assert_eq!(error.kind(), ErrorKind::InvalidRequest);
        assert!(matches!(error, WorkflowError::TargetIsCurrentManager { .. }));
        assert_eq!(pending_count(&store).await, 0);
    }

    #[tokio::test]
    async fn assign_to_other_with_matching_target_is_rejected_on_both_rules() {
        let (engine, _, store) = engine();

        let requestor_is_target = engine
            .submit_assign_to_other(submission("a@co.com", "b@co.com", "c@co.com", "C@co.com"))
            .await
            .expect_err("requestor == target must be rejected");
        assert!(matches!(requestor_is_target, WorkflowError::RequestorIsTarget { .. }));

        let target_is_manager = engine
            .submit_assign_to_other(submission("a@co.com", "b@co.com", "B@co.com", "d@co.com"))
            .await
            .expect_err("target == current manager must be rejected");
        assert!(matches!(target_is_manager, WorkflowError::TargetIsCurrentManager { .. }));

        assert_eq!(pending_count(&store).await, 0);
    }

    #[tokio::test]
    async fn duplicate_pending_request_blocks_further_submissions() {
        let (engine, _, store) = engine();

        engine
            .submit_self_assignment(submission("alice@co.com", "bob@co.com", "carol@co.com", "carol@co.com"))
            .await
            .expect("first submission");
        assert_eq!(pending_count(&store).await, 1);

        let error = engine
            .submit_self_assignment(submission("Alice@Co.com", "bob@co.com", "dave@co.com", "dave@co.com"))
            .await
            .expect_err("second submission must conflict");
        assert_eq!(error.kind(), ErrorKind::Conflict);
        assert!(matches!(error, WorkflowError::PendingRequestExists { .. }));
        assert_eq!(pending_count(&store).await, 1);

        let other = engine
            .submit_assign_to_other(submission("alice@co.com", "bob@co.com", "erin@co.com", "bob@co.com"))
            .await
            .expect_err("other path honors the same guard");
        assert!(matches!(other, WorkflowError::PendingRequestExists { .. }));
    }

    #[tokio::test]
    async fn unmanaged_employee_self_assignment_bypasses_approval() {
        let (engine, directory, store) = engine();

        engine
            .submit_self_assignment(submission("frank@co.com", "", "dave@co.com", "dave@co.com"))
            .await
            .expect("bypass should succeed");

        assert_eq!(directory.mutation_count(), 1);
        assert_eq!(directory.manager_of("frank@co.com").await.as_deref(), Some("dave@co.com"));
        assert_eq!(pending_count(&store).await, 0);
    }

    #[tokio::test]
    async fn bypass_conflicts_when_employee_was_claimed_concurrently() {
        let (engine, directory, store) = engine();
        directory.seed_manager("frank@co.com", "grace@co.com").await;

        let error = engine
            .submit_self_assignment(submission("frank@co.com", "", "dave@co.com", "dave@co.com"))
            .await
            .expect_err("unforced assign must observe the existing claim");

        assert_eq!(error.kind(), ErrorKind::Conflict);
        assert!(matches!(error, WorkflowError::AlreadyClaimed { .. }));
        assert_eq!(directory.manager_of("frank@co.com").await.as_deref(), Some("grace@co.com"));
        assert_eq!(pending_count(&store).await, 0);
    }

    #[tokio::test]
    async fn assign_to_other_without_manager_requires_acceptance() {
        let (engine, directory, store) = engine();

        engine
            .submit_assign_to_other(submission("frank@co.com", "", "dave@co.com", "henry@co.com"))
            .await
            .expect("submission should store an acceptance request");

        assert_eq!(directory.mutation_count(), 0);
        let pending = store.find_pending(PendingFilter::default()).await.expect("find");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, RequestKind::Acceptance);
    }

    #[tokio::test]
    async fn manager_giving_away_report_requires_target_acceptance() {
        let (engine, _, store) = engine();

        engine
            .submit_assign_to_other(submission("alice@co.com", "bob@co.com", "carol@co.com", "Bob@co.com"))
            .await
            .expect("submission should store an acceptance request");

        let pending = store.find_pending(PendingFilter::default()).await.expect("find");
        assert_eq!(pending[0].kind, RequestKind::Acceptance);
    }

    #[tokio::test]
    async fn third_party_assign_to_other_requires_current_manager_approval() {
        let (engine, _, store) = engine();

        engine
            .submit_assign_to_other(submission("alice@co.com", "bob@co.com", "carol@co.com", "ivan@co.com"))
            .await
            .expect("submission should store an approval request");

        let pending = store.find_pending(PendingFilter::default()).await.expect("find");
        assert_eq!(pending[0].kind, RequestKind::Approval);
    }

    #[tokio::test]
    async fn decline_requires_comment_and_never_touches_directory() {
        let (engine, directory, store) = engine();
        directory.seed_manager("alice@co.com", "bob@co.com").await;
        engine
            .submit_self_assignment(submission("alice@co.com", "bob@co.com", "carol@co.com", "carol@co.com"))
            .await
            .expect("submit");
        let id = store.last_id().await;

        let error = engine.decline(id, "   ").await.expect_err("blank comment rejected");
        assert_eq!(error.kind(), ErrorKind::InvalidRequest);

        engine.decline(id, "role changed").await.expect("decline");
        let declined = store.get(id).await.expect("get").expect("present");
        assert_eq!(declined.status, RequestStatus::Declined);
        assert_eq!(declined.comment.as_deref(), Some("role changed"));
        assert!(declined.review_date.is_some());
        assert_eq!(directory.mutation_count(), 0);
    }

    #[tokio::test]
    async fn decline_missing_request_is_not_found() {
        let (engine, _, _) = engine();
        let error = engine.decline(RequestId(404), "nope").await.expect_err("missing id");
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn cancel_only_from_pending() {
        let (engine, directory, store) = engine();
        directory.seed_manager("alice@co.com", "bob@co.com").await;
        engine
            .submit_self_assignment(submission("alice@co.com", "bob@co.com", "carol@co.com", "carol@co.com"))
            .await
            .expect("submit");
        let id = store.last_id().await;

        engine.cancel(id).await.expect("cancel pending");
        let cancelled = store.get(id).await.expect("get").expect("record is kept");
        assert_eq!(cancelled.status, RequestStatus::Cancelled);
        assert_eq!(pending_count(&store).await, 0, "cancelled items leave pending listings");

        let error = engine.cancel(id).await.expect_err("cancel is not idempotent");
        assert_eq!(error.kind(), ErrorKind::Conflict);
        assert!(matches!(error, WorkflowError::AlreadyActedUpon(_)));
    }

    #[tokio::test]
    async fn cancelled_requests_unblock_new_submissions() {
        let (engine, directory, store) = engine();
        directory.seed_manager("alice@co.com", "bob@co.com").await;
        engine
            .submit_self_assignment(submission("alice@co.com", "bob@co.com", "carol@co.com", "carol@co.com"))
            .await
            .expect("submit");
        engine.cancel(store.last_id().await).await.expect("cancel");

        engine
            .submit_self_assignment(submission("alice@co.com", "bob@co.com", "dave@co.com", "dave@co.com"))
            .await
            .expect("a cancelled request no longer counts as pending");
    }

    #[tokio::test]
    async fn approve_self_resolved_mutates_once_and_spawns_nothing() {
        let (engine, directory, store) = engine();
        directory.seed_manager("alice@co.com", "bob@co.com").await;
        // carol both asked for the transfer and is the receiving manager
        engine
            .submit_self_assignment(submission("alice@co.com", "bob@co.com", "carol@co.com", "carol@co.com"))
            .await
            .expect("submit");
        let id = store.last_id().await;

        engine.approve(id, None).await.expect("approve");

        assert_eq!(directory.mutation_count(), 1);
        assert_eq!(directory.manager_of("alice@co.com").await.as_deref(), Some("carol@co.com"));
        let approved = store.get(id).await.expect("get").expect("present");
        assert_eq!(approved.status, RequestStatus::Approved);
        assert_eq!(pending_count(&store).await, 0, "no acceptance stage spawned");
    }

    #[tokio::test]
    async fn approve_third_party_spawns_acceptance_without_mutation() {
        let (engine, directory, store) = engine();
        directory.seed_manager("alice@co.com", "bob@co.com").await;
        // alice asked to move herself under carol; bob approves the release
        engine
            .submit_self_assignment(submission("alice@co.com", "bob@co.com", "carol@co.com", "alice@co.com"))
            .await
            .expect("submit");
        let id = store.last_id().await;

        engine.approve(id, Some("good luck")).await.expect("approve");

        assert_eq!(directory.mutation_count(), 0);
        let original = store.get(id).await.expect("get").expect("present");
        assert_eq!(original.status, RequestStatus::Approved);

        let pending = store.find_pending(PendingFilter::default()).await.expect("find");
        assert_eq!(pending.len(), 1);
        let acceptance = &pending[0];
        assert_eq!(acceptance.kind, RequestKind::Acceptance);
        assert_eq!(acceptance.employee_email, "alice@co.com");
        assert_eq!(acceptance.target_manager_email, "carol@co.com");
        assert_eq!(acceptance.comment, None, "comment does not carry into the new stage");
        assert_eq!(acceptance.review_date, None);

        // carol accepts: exactly one forced mutation
        engine.approve(acceptance.id, None).await.expect("accept");
        assert_eq!(directory.mutation_count(), 1);
        assert_eq!(directory.manager_of("alice@co.com").await.as_deref(), Some("carol@co.com"));
        assert_eq!(pending_count(&store).await, 0);
    }

    #[tokio::test]
    async fn approve_fails_when_manager_of_record_changed() {
        let (engine, directory, store) = engine();
        directory.seed_manager("alice@co.com", "bob@co.com").await;
        engine
            .submit_self_assignment(submission("alice@co.com", "bob@co.com", "carol@co.com", "alice@co.com"))
            .await
            .expect("submit");
        let id = store.last_id().await;

        // org changed underneath the pending request
        directory.seed_manager("alice@co.com", "erin@co.com").await;

        let error = engine.approve(id, None).await.expect_err("stale approval");
        assert_eq!(error.kind(), ErrorKind::Conflict);
        assert!(matches!(error, WorkflowError::ManagerChanged { .. }));
        let untouched = store.get(id).await.expect("get").expect("present");
        assert_eq!(untouched.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn approve_fails_when_competing_pending_requests_exist() {
        let (engine, directory, store) = engine();
        directory.seed_manager("alice@co.com", "bob@co.com").await;
        engine
            .submit_self_assignment(submission("alice@co.com", "bob@co.com", "carol@co.com", "alice@co.com"))
            .await
            .expect("submit");
        let id = store.last_id().await;
        // A second pending request for the same employee+manager slipped in
        // behind the duplicate guard (the documented race window).
        store
            .insert_pending_raw(submission("alice@co.com", "bob@co.com", "dave@co.com", "alice@co.com"))
            .await;

        let error = engine.approve(id, None).await.expect_err("ambiguous approvals");
        assert_eq!(error.kind(), ErrorKind::Conflict);
        assert!(matches!(error, WorkflowError::MultiplePendingRequests { .. }));
    }

    #[tokio::test]
    async fn approve_is_not_repeatable() {
        let (engine, directory, store) = engine();
        directory.seed_manager("alice@co.com", "bob@co.com").await;
        engine
            .submit_self_assignment(submission("alice@co.com", "bob@co.com", "carol@co.com", "carol@co.com"))
            .await
            .expect("submit");
        let id = store.last_id().await;

        engine.approve(id, None).await.expect("first approval");
        let error = engine.approve(id, None).await.expect_err("second approval must fail");
        assert!(matches!(error, WorkflowError::AlreadyActedUpon(_)));
        assert_eq!(directory.mutation_count(), 1, "no double mutation");
    }

    #[tokio::test]
    async fn batch_rejects_everything_when_one_item_violates_a_static_rule() {
        let (engine, directory, store) = engine();

        let items = vec![
            submission("a@co.com", "m1@co.com", "t@co.com", "t@co.com"),
            submission("b@co.com", "m2@co.com", "t@co.com", "t@co.com"),
            submission("c@co.com", "t@co.com", "t@co.com", "t@co.com"), // target == manager
            submission("d@co.com", "m4@co.com", "t@co.com", "t@co.com"),
            submission("e@co.com", "m5@co.com", "t@co.com", "t@co.com"),
        ];
        let error = engine
            .submit_batch(items, BatchMode::Self_)
            .await
            .expect_err("whole batch must be rejected");

        match error {
            WorkflowError::TargetIsCurrentManager { employees } => {
                assert_eq!(employees, vec!["c@co.com".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(pending_count(&store).await, 0);
        assert_eq!(directory.mutation_count(), 0);
    }

    #[tokio::test]
    async fn batch_enumerates_every_duplicate_pending_conflict() {
        let (engine, _, store) = engine();
        store
            .insert_pending_raw(submission("a@co.com", "m@co.com", "x@co.com", "x@co.com"))
            .await;
        store
            .insert_pending_raw(submission("c@co.com", "m@co.com", "x@co.com", "x@co.com"))
            .await;

        let items = vec![
            submission("a@co.com", "m1@co.com", "t@co.com", "t@co.com"),
            submission("b@co.com", "m2@co.com", "t@co.com", "t@co.com"),
            submission("c@co.com", "m3@co.com", "t@co.com", "t@co.com"),
        ];
        let error = engine
            .submit_batch(items, BatchMode::Self_)
            .await
            .expect_err("conflicted batch must be rejected");

        match error {
            WorkflowError::PendingRequestExists { employees } => {
                assert_eq!(employees, vec!["a@co.com".to_string(), "c@co.com".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(pending_count(&store).await, 2, "nothing new was created");
    }

    #[tokio::test]
    async fn self_batch_splits_direct_mutations_from_approvals() {
        let (engine, directory, store) = engine();

        let items = vec![
            submission("a@co.com", "", "t@co.com", "t@co.com"),
            submission("b@co.com", "", "t@co.com", "t@co.com"),
            submission("c@co.com", "m@co.com", "t@co.com", "t@co.com"),
        ];
        engine.submit_batch(items, BatchMode::Self_).await.expect("batch");

        assert_eq!(directory.manager_of("a@co.com").await.as_deref(), Some("t@co.com"));
        assert_eq!(directory.manager_of("b@co.com").await.as_deref(), Some("t@co.com"));
        let pending = store.find_pending(PendingFilter::default()).await.expect("find");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].employee_email, "c@co.com");
        assert_eq!(pending[0].kind, RequestKind::Approval);
    }

    #[tokio::test]
    async fn other_batch_never_mutates_and_splits_kinds() {
        let (engine, directory, store) = engine();

        let items = vec![
            submission("a@co.com", "", "t@co.com", "r@co.com"),           // acceptance
            submission("b@co.com", "r@co.com", "t@co.com", "r@co.com"),   // acceptance (giving away)
            submission("c@co.com", "m@co.com", "t@co.com", "r@co.com"),   // approval
        ];
        engine.submit_batch(items, BatchMode::Other).await.expect("batch");

        assert_eq!(directory.mutation_count(), 0);
        let pending = store.find_pending(PendingFilter::default()).await.expect("find");
        let acceptances: Vec<_> =
            pending.iter().filter(|r| r.kind == RequestKind::Acceptance).collect();
        let approvals: Vec<_> =
            pending.iter().filter(|r| r.kind == RequestKind::Approval).collect();
        assert_eq!(acceptances.len(), 2);
        assert_eq!(approvals.len(), 1);
        assert_eq!(approvals[0].employee_email, "c@co.com");
    }

    #[tokio::test]
    async fn empty_batch_is_invalid() {
        let (engine, _, _) = engine();
        let error = engine.submit_batch(Vec::new(), BatchMode::Self_).await.expect_err("empty");
        assert_eq!(error.kind(), ErrorKind::InvalidRequest);
        assert!(matches!(error, WorkflowError::EmptyBatch));
    }

    #[tokio::test]
    async fn listings_are_scoped_by_role_and_kind() {
        let (engine, directory, store) = engine();
        directory.seed_manager("alice@co.com", "bob@co.com").await;
        engine
            .submit_self_assignment(submission("alice@co.com", "bob@co.com", "carol@co.com", "alice@co.com"))
            .await
            .expect("submit approval");
        engine
            .submit_assign_to_other(submission("frank@co.com", "", "dave@co.com", "henry@co.com"))
            .await
            .expect("submit acceptance");
        let _ = store;

        let initiated = engine.initiated_by("Alice@co.com").await.expect("initiated");
        assert_eq!(initiated.len(), 1);
        assert_eq!(initiated[0].employee_email, "alice@co.com");

        let action = engine.pending_action_for("BOB@co.com").await.expect("pending action");
        assert_eq!(action.len(), 1);
        assert_eq!(action[0].kind, RequestKind::Approval);

        let acceptance = engine.pending_acceptance_for("dave@co.com").await.expect("acceptance");
        assert_eq!(acceptance.len(), 1);
        assert_eq!(acceptance[0].kind, RequestKind::Acceptance);

        assert!(engine.pending_acceptance_for("bob@co.com").await.expect("none").is_empty());
    }

    #[tokio::test]
    async fn two_stage_chain_end_to_end() {
        let (engine, directory, store) = engine();
        directory.seed_manager("alice@co.com", "bob@co.com").await;

        engine
            .submit_self_assignment(submission("alice@co.com", "bob@co.com", "carol@co.com", "alice@co.com"))
            .await
            .expect("alice submits");
        let approval_id = store.last_id().await;

        engine.approve(approval_id, None).await.expect("bob releases alice");
        assert_eq!(directory.manager_of("alice@co.com").await.as_deref(), Some("bob@co.com"));

        let acceptance = engine.pending_acceptance_for("carol@co.com").await.expect("listing");
        assert_eq!(acceptance.len(), 1);

        engine.approve(acceptance[0].id, None).await.expect("carol accepts");
        assert_eq!(directory.manager_of("alice@co.com").await.as_deref(), Some("carol@co.com"));
        assert_eq!(directory.mutation_count(), 1);
        assert_eq!(pending_count(&store).await, 0);
    }

    #[tokio::test]
    async fn reconcile_approves_requests_the_directory_already_reflects() {
        let (engine, directory, store) = engine();
        directory.seed_manager("alice@co.com", "bob@co.com").await;
        engine
            .submit_self_assignment(submission("alice@co.com", "bob@co.com", "carol@co.com", "alice@co.com"))
            .await
            .expect("submit");
        let id = store.last_id().await;

        // nothing to reconcile yet
        assert_eq!(engine.reconcile_pending().await.expect("first run"), 0);

        // some other process already moved alice under carol
        directory.seed_manager("alice@co.com", "carol@co.com").await;
        assert_eq!(engine.reconcile_pending().await.expect("second run"), 1);

        let reconciled = store.get(id).await.expect("get").expect("present");
        assert_eq!(reconciled.status, RequestStatus::Approved);
        assert_eq!(pending_count(&store).await, 0);
    }
}
