use serde::{Deserialize, Serialize};

use crate::identity::normalize_email;

/// A directory user as the rest of the system sees one. The directory owns
/// these records; we only read them and mutate the manager link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,
    pub display_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager_id: Option<String>,
    /// One level of manager expansion, when the directory returned it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager: Option<Box<Employee>>,
}

impl Employee {
    /// Email lowercased for comparisons; the serialized form keeps whatever
    /// the directory sent.
    pub fn email_key(&self) -> String {
        normalize_email(&self.email)
    }

    pub fn manager_ref(&self) -> Option<ManagerRef> {
        self.manager.as_deref().map(ManagerRef::from)
    }
}

/// The single-field manager link view used by the workflow engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerRef {
    pub id: String,
    pub display_name: String,
    pub email: String,
}

impl From<&Employee> for ManagerRef {
    fn from(employee: &Employee) -> Self {
        Self {
            id: employee.id.clone(),
            display_name: employee.display_name.clone(),
            email: normalize_email(&employee.email),
        }
    }
}
