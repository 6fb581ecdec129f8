//! Wire DTOs for the directory graph API plus the pure transformations the
//! client applies to them. Everything here is transport-free and unit tested
//! against captured JSON shapes.

use std::collections::HashSet;

use serde::Deserialize;

use orgchart_core::Employee;

#[derive(Clone, Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// Collection envelope the graph API wraps list responses in.
#[derive(Clone, Debug, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserDto {
    pub id: String,
    pub given_name: Option<String>,
    pub surname: Option<String>,
    pub display_name: Option<String>,
    pub mail: Option<String>,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub business_phones: Vec<String>,
    pub mobile_phone: Option<String>,
    pub account_enabled: Option<bool>,
    pub user_principal_name: Option<String>,
    pub manager: Option<Box<UserDto>>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct GroupRefDto {
    #[serde(default)]
    pub id: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CheckMemberGroupsResponse {
    #[serde(default = "Vec::new")]
    pub value: Vec<String>,
}

impl UserDto {
    /// Accounts without a mailbox fall back to the principal name, which is
    /// itself an address in this directory.
    pub fn email(&self) -> String {
        self.mail
            .clone()
            .or_else(|| self.user_principal_name.clone())
            .unwrap_or_default()
    }

    pub fn into_employee(self) -> Employee {
        let email = self.email();
        let manager = self.manager.map(|m| Box::new(m.into_employee()));
        Employee {
            id: self.id,
            given_name: self.given_name,
            surname: self.surname,
            display_name: self.display_name.unwrap_or_default(),
            email,
            job_title: self.job_title,
            department: self.department,
            business_phone: self.business_phones.into_iter().next(),
            mobile_phone: self.mobile_phone,
            account_enabled: self.account_enabled,
            manager_id: manager.as_ref().map(|m| m.id.clone()),
            manager,
        }
    }
}

/// Walk the nested manager expansion into a flat chain, nearest manager
/// first. Each entry has its own manager link detached so the list does not
/// nest; `manager_id` survives for adjacency.
pub fn flatten_manager_chain(user: UserDto, include_user: bool) -> Vec<Employee> {
    let mut chain = Vec::new();
    let mut cursor = if include_user {
        Some(Box::new(user))
    } else {
        user.manager
    };
    while let Some(dto) = cursor {
        let next = dto.manager.clone();
        let mut employee = dto.into_employee();
        employee.manager = None;
        chain.push(employee);
        cursor = next;
    }
    chain
}

/// Org-chart assembly: managers above, reports below. Leaf users with no
/// reports get their siblings instead so the chart is never a bare chain.
pub fn assemble_org_chart(
    managers: Vec<Employee>,
    direct_reports: Vec<Employee>,
    siblings: Vec<Employee>,
) -> Vec<Employee> {
    let mut chart = managers;
    if direct_reports.is_empty() {
        chart.extend(siblings);
    } else {
        chart.extend(direct_reports);
    }
    chart
}

/// Users with no manager link, minus anyone who is a manager themselves
/// (members of the managers group).
pub fn filter_unclaimed(users: Vec<Employee>, manager_ids: &HashSet<String>) -> Vec<Employee> {
    users
        .into_iter()
        .filter(|u| u.manager_id.is_none() && u.manager.is_none())
        .filter(|u| !manager_ids.contains(&u.id))
        .collect()
}

/// Keeps only users that appear in the managers-group roster.
pub fn retain_members(users: Vec<Employee>, member_ids: &HashSet<String>) -> Vec<Employee> {
    users.into_iter().filter(|u| member_ids.contains(&u.id)).collect()
}

/// Case-insensitive prefix/substring match over display name and email.
pub fn matches_query(employee: &Employee, query: &str) -> bool {
    let query = query.trim().to_ascii_lowercase();
    if query.is_empty() {
        return false;
    }
    employee.display_name.to_ascii_lowercase().contains(&query)
        || employee.email.to_ascii_lowercase().contains(&query)
}
