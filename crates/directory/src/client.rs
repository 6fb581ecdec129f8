use std::collections::HashSet;
use std::time::{Duration, Instant};

use base64::Engine;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::debug;

use orgchart_core::config::{DirectoryConfig, MailConfig};
use orgchart_core::workflow::{DirectoryError, DirectoryProvider};
use orgchart_core::{Employee, Mail, MailError, MailSender, ManagerRef};

use crate::models::{
    assemble_org_chart, filter_unclaimed, flatten_manager_chain, matches_query, retain_members,
    CheckMemberGroupsResponse, GroupRefDto, ListResponse, TokenResponse, UserDto,
};

const USER_SELECT: &str = "id,givenName,surname,displayName,mail,jobTitle,department,\
                           businessPhones,mobilePhone,accountEnabled,userPrincipalName";
const MANAGER_EXPAND: &str =
    "manager($select=id,displayName,mail,userPrincipalName)";
const MANAGER_CHAIN_EXPAND: &str = "manager($levels=max;$select=id,givenName,surname,displayName,\
                                    mail,jobTitle,department,businessPhones,mobilePhone,\
                                    accountEnabled,userPrincipalName)";

/// Tokens are refreshed this long before their reported expiry.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Client for the directory graph API: user lookups, manager-link mutations,
/// group checks, and outbound mail. One OAuth2 client-credentials token is
/// cached per client instance.
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    managers_group_id: Option<String>,
    mail_sender: Option<String>,
    token: Mutex<Option<CachedToken>>,
}

fn upstream(e: reqwest::Error) -> DirectoryError {
    DirectoryError::Upstream(e.to_string())
}

impl GraphClient {
    pub fn new(directory: &DirectoryConfig, mail: &MailConfig) -> Result<Self, DirectoryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(directory.timeout_secs))
            .build()
            .map_err(upstream)?;

        Ok(Self {
            http,
            base_url: directory.base_url.trim_end_matches('/').to_string(),
            token_url: directory.token_url.clone(),
            client_id: directory.client_id.clone(),
            client_secret: directory.client_secret.clone(),
            managers_group_id: directory.managers_group_id.clone(),
            mail_sender: mail.sender.clone(),
            token: Mutex::new(None),
        })
    }

    pub fn managers_group_id(&self) -> Option<&str> {
        self.managers_group_id.as_deref()
    }

    async fn bearer(&self) -> Result<String, DirectoryError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        debug!("fetching directory access token");
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("scope", &format!("{}/.default", self.base_url)),
            ])
            .send()
            .await
            .map_err(upstream)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Upstream(format!(
                "token request failed with {status}: {body}"
            )));
        }

        let token: TokenResponse = response.json().await.map_err(upstream)?;
        let lifetime = Duration::from_secs(token.expires_in)
            .saturating_sub(TOKEN_REFRESH_MARGIN)
            .max(Duration::from_secs(30));
        let value = token.access_token;
        *cached = Some(CachedToken { value: value.clone(), expires_at: Instant::now() + lifetime });
        Ok(value)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        not_found_subject: Option<&str>,
    ) -> Result<T, DirectoryError> {
        let token = self.bearer().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(upstream)?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                if let Some(subject) = not_found_subject {
                    return Err(DirectoryError::UserNotFound(subject.to_string()));
                }
                let body = response.text().await.unwrap_or_default();
                Err(DirectoryError::Upstream(format!("directory returned 404: {body}")))
            }
            status if status.is_success() => response.json().await.map_err(upstream),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(DirectoryError::Upstream(format!(
                    "directory request to `{url}` failed with {status}: {body}"
                )))
            }
        }
    }

    async fn check_status(
        &self,
        response: reqwest::Response,
        subject: &str,
    ) -> Result<(), DirectoryError> {
        match response.status() {
            StatusCode::NOT_FOUND => Err(DirectoryError::UserNotFound(subject.to_string())),
            status if status.is_success() => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(DirectoryError::Upstream(format!(
                    "directory request for `{subject}` failed with {status}: {body}"
                )))
            }
        }
    }

    fn user_url(&self, user: &str) -> String {
        format!("{}/users/{user}", self.base_url)
    }

    pub async fn get_user(&self, user: &str) -> Result<Employee, DirectoryError> {
        let dto: UserDto = self
            .get_json(
                &self.user_url(user),
                &[("$select", USER_SELECT), ("$expand", MANAGER_EXPAND)],
                Some(user),
            )
            .await?;
        Ok(dto.into_employee())
    }

    /// Every enabled account, manager link expanded one level.
    pub async fn list_users(&self) -> Result<Vec<Employee>, DirectoryError> {
        let list: ListResponse<UserDto> = self
            .get_json(
                &format!("{}/users", self.base_url),
                &[
                    ("$filter", "accountEnabled eq true"),
                    ("$select", USER_SELECT),
                    ("$expand", MANAGER_EXPAND),
                ],
                None,
            )
            .await?;
        Ok(list.value.into_iter().map(UserDto::into_employee).collect())
    }

    pub async fn direct_reports(&self, user: &str) -> Result<Vec<Employee>, DirectoryError> {
        let parent = self.get_user(user).await?;
        let list: ListResponse<UserDto> = self
            .get_json(
                &format!("{}/directReports", self.user_url(user)),
                &[],
                Some(user),
            )
            .await?;

        Ok(list
            .value
            .into_iter()
            .map(|dto| {
                let mut employee = dto.into_employee();
                employee.manager_id = Some(parent.id.clone());
                employee
            })
            .collect())
    }

    /// The management chain above a user, nearest manager first.
    pub async fn manager_chain(
        &self,
        user: &str,
        include_user: bool,
    ) -> Result<Vec<Employee>, DirectoryError> {
        let dto: UserDto = self
            .get_json(
                &self.user_url(user),
                &[("$select", USER_SELECT), ("$expand", MANAGER_CHAIN_EXPAND)],
                Some(user),
            )
            .await?;
        Ok(flatten_manager_chain(dto, include_user))
    }

    /// Management chain plus direct reports; a user with no reports gets
    /// their siblings (their manager's other reports) instead.
    pub async fn org_chart(&self, user: &str) -> Result<Vec<Employee>, DirectoryError> {
        let managers = self.manager_chain(user, true).await?;
        let direct_reports = self.direct_reports(user).await?;

        let mut siblings = Vec::new();
        if direct_reports.is_empty() && managers.len() > 1 {
            let user_id = managers[0].id.clone();
            siblings = self
                .direct_reports(&managers[1].id)
                .await?
                .into_iter()
                .filter(|e| e.id != user_id)
                .collect();
        }

        Ok(assemble_org_chart(managers, direct_reports, siblings))
    }

    /// Enabled accounts with no manager link, excluding members of the
    /// managers group when one is configured.
    pub async fn users_without_managers(&self) -> Result<Vec<Employee>, DirectoryError> {
        let users = self.list_users().await?;
        let manager_ids = self.managers_group_member_ids().await?;
        Ok(filter_unclaimed(users, &manager_ids))
    }

    /// Member ids of the managers group; empty when no group is configured.
    async fn managers_group_member_ids(&self) -> Result<HashSet<String>, DirectoryError> {
        let Some(group_id) = &self.managers_group_id else {
            return Ok(HashSet::new());
        };
        let members: ListResponse<GroupRefDto> = self
            .get_json(
                &format!("{}/groups/{group_id}/members", self.base_url),
                &[("$select", "id")],
                None,
            )
            .await?;
        Ok(members.value.into_iter().map(|g| g.id).collect())
    }

    pub async fn users_with_managers(&self) -> Result<Vec<Employee>, DirectoryError> {
        Ok(self
            .list_users()
            .await?
            .into_iter()
            .filter(|e| e.manager.is_some())
            .map(|mut e| {
                // keep the adjacency, drop the nested record
                e.manager = None;
                e
            })
            .collect())
    }

    pub async fn search_users(&self, query: &str) -> Result<Vec<Employee>, DirectoryError> {
        Ok(self
            .list_users()
            .await?
            .into_iter()
            .filter(|e| matches_query(e, query))
            .collect())
    }

    /// Like `search_users`, scoped to the managers-group roster. Falls back
    /// to the unscoped search when no managers group is configured.
    pub async fn search_managers(&self, query: &str) -> Result<Vec<Employee>, DirectoryError> {
        let matches = self.search_users(query).await?;
        if self.managers_group_id.is_none() {
            return Ok(matches);
        }
        let roster = self.managers_group_member_ids().await?;
        Ok(retain_members(matches, &roster))
    }

    pub async fn exists_in_group(
        &self,
        user: &str,
        group_id: &str,
    ) -> Result<bool, DirectoryError> {
        let token = self.bearer().await?;
        let response = self
            .http
            .post(format!("{}/checkMemberGroups", self.user_url(user)))
            .bearer_auth(token)
            .json(&json!({ "groupIds": [group_id] }))
            .send()
            .await
            .map_err(upstream)?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(DirectoryError::UserNotFound(user.to_string())),
            status if status.is_success() => {
                let groups: CheckMemberGroupsResponse =
                    response.json().await.map_err(upstream)?;
                Ok(groups.value.iter().any(|g| g == group_id))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(DirectoryError::Upstream(format!(
                    "group check for `{user}` failed with {status}: {body}"
                )))
            }
        }
    }
}

#[async_trait::async_trait]
impl DirectoryProvider for GraphClient {
    async fn current_manager(&self, employee: &str) -> Result<Option<ManagerRef>, DirectoryError> {
        let user = self.get_user(employee).await?;
        Ok(user.manager_ref())
    }

    async fn assign_manager(
        &self,
        employee: &str,
        manager: &str,
        force: bool,
    ) -> Result<(), DirectoryError> {
        if !force {
            let user = self.get_user(employee).await?;
            if user.manager.is_some() || user.manager_id.is_some() {
                return Err(DirectoryError::AlreadyClaimed { employee: employee.to_string() });
            }
        }

        let token = self.bearer().await?;
        let response = self
            .http
            .put(format!("{}/manager/$ref", self.user_url(employee)))
            .bearer_auth(token)
            .json(&json!({ "@odata.id": self.user_url(manager) }))
            .send()
            .await
            .map_err(upstream)?;
        self.check_status(response, employee).await
    }

    async fn assign_manager_bulk(
        &self,
        employees: &[String],
        manager: &str,
        force: bool,
    ) -> Result<(), DirectoryError> {
        for employee in employees {
            self.assign_manager(employee, manager, force).await?;
        }
        Ok(())
    }

    async fn clear_manager(&self, employee: &str) -> Result<(), DirectoryError> {
        let token = self.bearer().await?;
        let response = self
            .http
            .delete(format!("{}/manager/$ref", self.user_url(employee)))
            .bearer_auth(token)
            .send()
            .await
            .map_err(upstream)?;
        self.check_status(response, employee).await
    }
}

#[async_trait::async_trait]
impl MailSender for GraphClient {
    /// Delivery goes through the directory API's send-mail endpoint; there
    /// is no separate SMTP leg.
    async fn send(&self, mail: Mail) -> Result<(), MailError> {
        let sender = self
            .mail_sender
            .as_deref()
            .ok_or_else(|| MailError::Transport("mail.sender is not configured".to_string()))?;

        let token = self
            .bearer()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        let recipients: Vec<_> = mail
            .to
            .iter()
            .map(|address| json!({ "emailAddress": { "address": address } }))
            .collect();
        let attachments: Vec<_> = mail
            .attachments
            .iter()
            .map(|a| {
                json!({
                    "@odata.type": "#microsoft.graph.fileAttachment",
                    "name": a.file_name,
                    "contentType": a.content_type,
                    "contentBytes": base64::engine::general_purpose::STANDARD.encode(&a.content),
                })
            })
            .collect();

        let response = self
            .http
            .post(format!("{}/sendMail", self.user_url(sender)))
            .bearer_auth(token)
            .json(&json!({
                "message": {
                    "subject": mail.subject,
                    "body": { "contentType": "Text", "content": mail.body },
                    "toRecipients": recipients,
                    "attachments": attachments,
                },
                "saveToSentItems": false,
            }))
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Transport(format!(
                "send-mail failed with {status}: {body}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use orgchart_core::config::{DirectoryConfig, MailConfig};

    use super::GraphClient;

    fn client() -> GraphClient {
        let directory = DirectoryConfig {
            base_url: "https://graph.test/v1.0/".to_string(),
            token_url: "https://login.test/token".to_string(),
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string().into(),
            managers_group_id: Some("g-1".to_string()),
            timeout_secs: 5,
        };
        let mail = MailConfig {
            enabled: true,
            sender: Some("noreply@co.com".to_string()),
            managers_group_mail: Some("managers@co.com".to_string()),
        };
        GraphClient::new(&directory, &mail).expect("client")
    }

    #[test]
    fn user_urls_strip_the_trailing_slash() {
        let client = client();
        assert_eq!(client.user_url("alice@co.com"), "https://graph.test/v1.0/users/alice@co.com");
        assert_eq!(client.managers_group_id(), Some("g-1"));
    }
}
