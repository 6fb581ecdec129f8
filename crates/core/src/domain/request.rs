use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::normalize_email;

/// Store-assigned integer identity. Zero means "not yet persisted".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub i64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// `Approval` waits on the employee's *current* manager releasing them;
/// `Acceptance` waits on the *target* manager agreeing to receive them.
/// Two stages of one workflow, tagged on a single shared record so pending
/// checks and listings stay uniform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Approval,
    Acceptance,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approval => "approval",
            Self::Acceptance => "acceptance",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "approval" => Some(Self::Approval),
            "acceptance" => Some(Self::Acceptance),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Declined,
    /// Explicit terminal state for cancellation. The system this replaces
    /// deleted the record instead; keeping it makes the history auditable
    /// while pending listings still exclude it.
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "declined" => Some(Self::Declined),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A manager-reassignment request as persisted in the request store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassignmentRequest {
    pub id: RequestId,
    pub kind: RequestKind,
    pub employee_email: String,
    pub employee_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_job_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_department: Option<String>,
    /// Empty when the employee had no manager at submission time.
    pub current_manager_email: String,
    pub current_manager_name: String,
    pub target_manager_email: String,
    pub target_manager_name: String,
    pub requestor_email: String,
    pub requestor_name: String,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl ReassignmentRequest {
    /// The follow-up acceptance record spawned when an approval-stage request
    /// is granted for a third-party target. Comment and review date do not
    /// carry over; the target manager starts with a clean slate.
    pub fn into_acceptance_draft(self) -> RequestDraft {
        RequestDraft {
            kind: RequestKind::Acceptance,
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

/// An unpersisted submission. The store assigns id, timestamps, and the
/// initial `Pending` status on insert.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDraft {
    pub kind: RequestKind,
    pub employee_email: String,
    pub employee_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_job_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_department: Option<String>,
    pub current_manager_email: String,
    pub current_manager_name: String,
    pub target_manager_email: String,
    pub target_manager_name: String,
    pub requestor_email: String,
    pub requestor_name: String,
}

impl RequestDraft {
    /// Lowercase every email field; all store queries and engine comparisons
    /// assume normalized identities.
    pub fn normalized(mut self) -> Self {
        self.employee_email = normalize_email(&self.employee_email);
        self.current_manager_email = normalize_email(&self.current_manager_email);
        self.target_manager_email = normalize_email(&self.target_manager_email);
        self.requestor_email = normalize_email(&self.requestor_email);
        self
    }
}

/// Field filter for pending-request queries. `None` fields are unconstrained.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingFilter {
    pub employee_email: Option<String>,
    pub current_manager_email: Option<String>,
    pub target_manager_email: Option<String>,
    pub requestor_email: Option<String>,
    pub kind: Option<RequestKind>,
}

impl PendingFilter {
    pub fn for_employee(employee_email: &str) -> Self {
        Self { employee_email: Some(normalize_email(employee_email)), ..Self::default() }
    }

    pub fn for_employee_and_manager(employee_email: &str, manager_email: &str) -> Self {
        Self {
            employee_email: Some(normalize_email(employee_email)),
            current_manager_email: Some(normalize_email(manager_email)),
            ..Self::default()
        }
    }
}
