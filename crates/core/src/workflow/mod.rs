//! The approval workflow engine and the collaborator seams it drives.
//!
//! The engine owns no state of its own: every decision re-reads the request
//! store and the directory, which is what makes the duplicate-pending and
//! stale-manager checks best-effort race reducers rather than guarantees.

pub mod engine;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::employee::ManagerRef;
use crate::domain::request::{
    PendingFilter, ReassignmentRequest, RequestDraft, RequestId, RequestStatus,
};

pub use engine::{BatchMode, SubmitRequest, WorkflowEngine};

/// Read/mutate access to the directory's manager links.
#[async_trait]
pub trait DirectoryProvider: Send + Sync {
    async fn current_manager(&self, employee: &str) -> Result<Option<ManagerRef>, DirectoryError>;

    /// With `force` false the provider re-validates that no manager link
    /// exists and fails `AlreadyClaimed` when one does; `force` true
    /// overwrites unconditionally.
    async fn assign_manager(
        &self,
        employee: &str,
        manager: &str,
        force: bool,
    ) -> Result<(), DirectoryError>;

    async fn assign_manager_bulk(
        &self,
        employees: &[String],
        manager: &str,
        force: bool,
    ) -> Result<(), DirectoryError>;

    async fn clear_manager(&self, employee: &str) -> Result<(), DirectoryError>;
}

/// Persistence for reassignment requests.
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn create(&self, draft: RequestDraft) -> Result<RequestId, StoreError>;
    async fn create_batch(&self, drafts: Vec<RequestDraft>) -> Result<(), StoreError>;
    async fn get(&self, id: RequestId) -> Result<Option<ReassignmentRequest>, StoreError>;
    async fn set_status(
        &self,
        id: RequestId,
        status: RequestStatus,
        comment: Option<&str>,
    ) -> Result<(), StoreError>;
    async fn find_pending(
        &self,
        filter: PendingFilter,
    ) -> Result<Vec<ReassignmentRequest>, StoreError>;
    async fn count_pending(&self, filter: PendingFilter) -> Result<u64, StoreError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("{employee} has already been claimed by another manager")]
    AlreadyClaimed { employee: String },
    #[error("user `{0}` was not found in the directory")]
    UserNotFound(String),
    #[error("directory request failed: {0}")]
    Upstream(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("request store backend error: {0}")]
    Backend(String),
    #[error("request store decode error: {0}")]
    Decode(String),
}

/// Caller-facing failure classes; the HTTP layer maps these to status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    Conflict,
    NotFound,
    Upstream,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("employee(s) cannot be reassigned to the current manager: {}", .employees.join(", "))]
    TargetIsCurrentManager { employees: Vec<String> },
    #[error("employee(s) cannot be assigned to the requestor: {}", .employees.join(", "))]
    RequestorIsTarget { employees: Vec<String> },
    #[error("request list is empty")]
    EmptyBatch,
    #[error("a comment is required to decline a request")]
    CommentRequired,
    #[error("pending request(s) already exist for: {}", .employees.join(", "))]
    PendingRequestExists { employees: Vec<String> },
    #[error("request {0} does not exist")]
    RequestNotFound(RequestId),
    #[error("{manager} is no longer the manager of {employee}; decline this request instead")]
    ManagerChanged { employee: String, manager: String },
    #[error("more than one pending request exists for {employee}; decline the others so only one can be approved")]
    MultiplePendingRequests { employee: String },
    #[error("request {0} has already been acted upon")]
    AlreadyActedUpon(RequestId),
    #[error("{employee} has already been claimed by another manager")]
    AlreadyClaimed { employee: String },
    #[error("directory call failed: {0}")]
    Directory(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TargetIsCurrentManager { .. }
            | Self::RequestorIsTarget { .. }
            | Self::EmptyBatch
            | Self::CommentRequired => ErrorKind::InvalidRequest,
            Self::PendingRequestExists { .. }
            | Self::ManagerChanged { .. }
            | Self::MultiplePendingRequests { .. }
            | Self::AlreadyActedUpon(_)
            | Self::AlreadyClaimed { .. } => ErrorKind::Conflict,
            Self::RequestNotFound(_) => ErrorKind::NotFound,
            Self::Directory(_) | Self::Store(_) => ErrorKind::Upstream,
        }
    }
}

impl From<DirectoryError> for WorkflowError {
    fn from(error: DirectoryError) -> Self {
        match error {
            DirectoryError::AlreadyClaimed { employee } => Self::AlreadyClaimed { employee },
            other => Self::Directory(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DirectoryError, ErrorKind, StoreError, WorkflowError};
    use crate::domain::request::RequestId;

    #[test]
    fn error_kinds_partition_as_documented() {
        let invalid = WorkflowError::TargetIsCurrentManager {
            employees: vec!["a@co.com".to_string()],
        };
        assert_eq!(invalid.kind(), ErrorKind::InvalidRequest);
        assert_eq!(WorkflowError::CommentRequired.kind(), ErrorKind::InvalidRequest);
        assert_eq!(
            WorkflowError::PendingRequestExists { employees: vec![] }.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            WorkflowError::RequestNotFound(RequestId(7)).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            WorkflowError::Store(StoreError::Backend("down".to_string())).kind(),
            ErrorKind::Upstream
        );
    }

    #[test]
    fn already_claimed_maps_to_conflict_not_upstream() {
        let error: WorkflowError =
            DirectoryError::AlreadyClaimed { employee: "a@co.com".to_string() }.into();
        assert_eq!(error.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn batch_violation_message_enumerates_every_offender() {
        let error = WorkflowError::PendingRequestExists {
            employees: vec!["a@co.com".to_string(), "b@co.com".to_string()],
        };
        let message = error.to_string();
        assert!(message.contains("a@co.com"));
        assert!(message.contains("b@co.com"));
    }
}
