//! Unclaimed-employee reporting: a CSV roster of everyone without a manager,
//! packaged as an outbound mail. Delivery is behind the [`MailSender`] trait
//! so the server can swap the real transport for a no-op in tests or when
//! mail is disabled.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::employee::Employee;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport failed: {0}")]
    Transport(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailAttachment {
    pub file_name: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mail {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<MailAttachment>,
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, mail: Mail) -> Result<(), MailError>;
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to build report csv: {0}")]
    Csv(String),
}

/// Build the periodic unclaimed-employees mail: subject carries the run
/// date, the roster rides along as a CSV attachment. The phone column
/// prefers the business line and falls back to mobile.
pub fn unclaimed_report_mail(
    recipient: &str,
    employees: &[Employee],
    date: NaiveDate,
) -> Result<Mail, ReportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(["#", "Employee Name", "Email", "Job Title", "Department", "Phone"])
        .map_err(|e| ReportError::Csv(e.to_string()))?;
    for (index, employee) in employees.iter().enumerate() {
        let phone = employee
            .business_phone
            .as_deref()
            .or(employee.mobile_phone.as_deref())
            .unwrap_or_default();
        writer
            .write_record([
                &(index + 1).to_string(),
                &employee.display_name,
                &employee.email,
                employee.job_title.as_deref().unwrap_or_default(),
                employee.department.as_deref().unwrap_or_default(),
                phone,
            ])
            .map_err(|e| ReportError::Csv(e.to_string()))?;
    }
    let content = writer
        .into_inner()
        .map_err(|e| ReportError::Csv(e.to_string()))?;

    Ok(Mail {
        to: vec![recipient.to_string()],
        subject: format!("Unclaimed Employees for {}", date.format("%m-%d-%Y")),
        body: concat!(
            "Hello,\n\n",
            "Attached is the list of employees who currently have no assigned ",
            "manager. Kindly review and claim your direct reports.\n",
        )
        .to_string(),
        attachments: vec![MailAttachment {
            file_name: format!("unclaimed-employees-{}.csv", date.format("%Y-%m-%d")),
            content_type: "text/csv".to_string(),
            content,
        }],
    })
}
