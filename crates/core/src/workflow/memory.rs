//! In-memory fakes for the directory and the request store. Used by engine
//! and server tests; the real backends live in their own crates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::employee::ManagerRef;
use crate::domain::request::{
    PendingFilter, ReassignmentRequest, RequestDraft, RequestId, RequestKind, RequestStatus,
};
use crate::identity::normalize_email;

use super::engine::SubmitRequest;
use super::{DirectoryError, DirectoryProvider, RequestStore, StoreError};

/// Directory fake keyed by normalized employee email. Counts every manager
/// write so tests can assert exactly how many times the org graph changed.
#[derive(Default)]
pub struct InMemoryDirectory {
    managers: RwLock<HashMap<String, ManagerRef>>,
    mutations: AtomicUsize,
}

impl InMemoryDirectory {
    /// Seed a manager link without counting it as an engine-driven mutation.
    pub async fn seed_manager(&self, employee: &str, manager: &str) {
        let manager_ref = ManagerRef {
            id: format!("id-{}", normalize_email(manager)),
            display_name: manager.split('@').next().unwrap_or(manager).to_string(),
            email: normalize_email(manager),
        };
        self.managers.write().await.insert(normalize_email(employee), manager_ref);
    }

    pub async fn manager_of(&self, employee: &str) -> Option<String> {
        self.managers
            .read()
            .await
            .get(&normalize_email(employee))
            .map(|m| m.email.clone())
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    async fn write_manager(
        &self,
        employee: &str,
        manager: &str,
        force: bool,
    ) -> Result<(), DirectoryError> {
        let employee = normalize_email(employee);
        let mut managers = self.managers.write().await;
        if !force && managers.contains_key(&employee) {
            return Err(DirectoryError::AlreadyClaimed { employee });
        }
        let manager_ref = ManagerRef {
            id: format!("id-{}", normalize_email(manager)),
            display_name: manager.split('@').next().unwrap_or(manager).to_string(),
            email: normalize_email(manager),
        };
        managers.insert(employee, manager_ref);
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl DirectoryProvider for InMemoryDirectory {
    async fn current_manager(&self, employee: &str) -> Result<Option<ManagerRef>, DirectoryError> {
        Ok(self.managers.read().await.get(&normalize_email(employee)).cloned())
    }

    async fn assign_manager(
        &self,
        employee: &str,
        manager: &str,
        force: bool,
    ) -> Result<(), DirectoryError> {
        self.write_manager(employee, manager, force).await
    }

    async fn assign_manager_bulk(
        &self,
        employees: &[String],
        manager: &str,
        force: bool,
    ) -> Result<(), DirectoryError> {
        for employee in employees {
            self.write_manager(employee, manager, force).await?;
        }
        Ok(())
    }

    async fn clear_manager(&self, employee: &str) -> Result<(), DirectoryError> {
        self.managers.write().await.remove(&normalize_email(employee));
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRequestStore {
    requests: RwLock<HashMap<i64, ReassignmentRequest>>,
    next_id: AtomicI64,
}

impl InMemoryRequestStore {
    /// Highest id handed out so far. Test helper for grabbing the request a
    /// submission just created.
    pub async fn last_id(&self) -> RequestId {
        RequestId(self.next_id.load(Ordering::SeqCst))
    }

    /// Insert a pending record directly, bypassing engine validation.
    pub async fn insert_pending_raw(&self, submission: SubmitRequest) -> RequestId {
        let draft = submission.normalized().into_draft(RequestKind::Approval);
        match self.create(draft).await {
            Ok(id) => id,
            Err(_) => unreachable!("in-memory create is infallible"),
        }
    }

    fn materialize(&self, id: i64, draft: RequestDraft) -> ReassignmentRequest {
        let draft = draft.normalized();
        let now = Utc::now();
        ReassignmentRequest {
            id: RequestId(id),
            kind: draft.kind,
            employee_email: draft.employee_email,
            employee_name: draft.employee_name,
            employee_job_title: draft.employee_job_title,
            employee_department: draft.employee_department,
            current_manager_email: draft.current_manager_email,
            current_manager_name: draft.current_manager_name,
            target_manager_email: draft.target_manager_email,
            target_manager_name: draft.target_manager_name,
            requestor_email: draft.requestor_email,
            requestor_name: draft.requestor_name,
            status: RequestStatus::Pending,
            comment: None,
            review_date: None,
            created_at: now,
            modified_at: now,
        }
    }
}

fn matches_filter(request: &ReassignmentRequest, filter: &PendingFilter) -> bool {
    if request.status != RequestStatus::Pending {
        return false;
    }
    if let Some(employee) = &filter.employee_email {
        if &request.employee_email != employee {
            return false;
        }
    }
    if let Some(manager) = &filter.current_manager_email {
        if &request.current_manager_email != manager {
            return false;
        }
    }
    if let Some(target) = &filter.target_manager_email {
        if &request.target_manager_email != target {
            return false;
        }
    }
    if let Some(requestor) = &filter.requestor_email {
        if &request.requestor_email != requestor {
            return false;
        }
    }
    if let Some(kind) = filter.kind {
        if request.kind != kind {
            return false;
        }
    }
    true
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn create(&self, draft: RequestDraft) -> Result<RequestId, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let request = self.materialize(id, draft);
        self.requests.write().await.insert(id, request);
        Ok(RequestId(id))
    }

    async fn create_batch(&self, drafts: Vec<RequestDraft>) -> Result<(), StoreError> {
        let mut requests = self.requests.write().await;
        for draft in drafts {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            requests.insert(id, self.materialize(id, draft));
        }
        Ok(())
    }

    async fn get(&self, id: RequestId) -> Result<Option<ReassignmentRequest>, StoreError> {
        Ok(self.requests.read().await.get(&id.0).cloned())
    }

    async fn set_status(
        &self,
        id: RequestId,
        status: RequestStatus,
        comment: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut requests = self.requests.write().await;
        let request = requests
            .get_mut(&id.0)
            .ok_or_else(|| StoreError::Backend(format!("request {id} not found")))?;
        request.status = status;
        if let Some(comment) = comment {
            request.comment = Some(comment.to_string());
        }
        let now = Utc::now();
        request.review_date = Some(now);
        request.modified_at = now;
        Ok(())
    }

    async fn find_pending(
        &self,
        filter: PendingFilter,
    ) -> Result<Vec<ReassignmentRequest>, StoreError> {
        let requests = self.requests.read().await;
        let mut matched: Vec<ReassignmentRequest> = requests
            .values()
            .filter(|r| matches_filter(r, &filter))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            b.created_at.cmp(&a.created_at).then_with(|| b.id.0.cmp(&a.id.0))
        });
        Ok(matched)
    }

    async fn count_pending(&self, filter: PendingFilter) -> Result<u64, StoreError> {
        let requests = self.requests.read().await;
        Ok(requests.values().filter(|r| matches_filter(r, &filter)).count() as u64)
    }
}
