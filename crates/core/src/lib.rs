pub mod config;
pub mod domain;
pub mod identity;
pub mod report;
pub mod workflow;

pub use domain::employee::{Employee, ManagerRef};
pub use domain::request::{
    PendingFilter, ReassignmentRequest, RequestDraft, RequestId, RequestKind, RequestStatus,
};
pub use report::{
    Mail, MailAttachment, MailError, MailSender, ReportError, unclaimed_report_mail,
};
pub use workflow::{
    BatchMode, DirectoryError, DirectoryProvider, ErrorKind, RequestStore, StoreError,
    SubmitRequest, WorkflowEngine, WorkflowError,
};
pub use workflow::memory::{InMemoryDirectory, InMemoryRequestStore};
