use chrono::{DateTime, Utc};
use sqlx::Row;

use orgchart_core::domain::request::{
    PendingFilter, ReassignmentRequest, RequestDraft, RequestId, RequestKind, RequestStatus,
};
use orgchart_core::workflow::{RequestStore, StoreError};

use crate::DbPool;

pub struct SqlRequestStore {
    pool: DbPool,
}

impl SqlRequestStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn decode(e: sqlx::Error) -> StoreError {
    StoreError::Decode(e.to_string())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Decode(format!("bad timestamp `{raw}`: {e}")))
}

fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<ReassignmentRequest, StoreError> {
    let id: i64 = row.try_get("id").map_err(decode)?;
    let kind_str: String = row.try_get("kind").map_err(decode)?;
    let status_str: String = row.try_get("status").map_err(decode)?;
    let review_date_str: Option<String> = row.try_get("review_date").map_err(decode)?;
    let created_at_str: String = row.try_get("created_at").map_err(decode)?;
    let modified_at_str: String = row.try_get("modified_at").map_err(decode)?;

    let kind = RequestKind::parse(&kind_str)
        .ok_or_else(|| StoreError::Decode(format!("unknown request kind `{kind_str}`")))?;
    let status = RequestStatus::parse(&status_str)
        .ok_or_else(|| StoreError::Decode(format!("unknown request status `{status_str}`")))?;
    let review_date = review_date_str.as_deref().map(parse_timestamp).transpose()?;

    Ok(ReassignmentRequest {
        id: RequestId(id),
        kind,
        employee_email: row.try_get("employee_email").map_err(decode)?,
        employee_name: row.try_get("employee_name").map_err(decode)?,
        employee_job_title: row.try_get("employee_job_title").map_err(decode)?,
        employee_department: row.try_get("employee_department").map_err(decode)?,
        current_manager_email: row.try_get("current_manager_email").map_err(decode)?,
        current_manager_name: row.try_get("current_manager_name").map_err(decode)?,
        target_manager_email: row.try_get("target_manager_email").map_err(decode)?,
        target_manager_name: row.try_get("target_manager_name").map_err(decode)?,
        requestor_email: row.try_get("requestor_email").map_err(decode)?,
        requestor_name: row.try_get("requestor_name").map_err(decode)?,
        status,
        comment: row.try_get("comment").map_err(decode)?,
        review_date,
        created_at: parse_timestamp(&created_at_str)?,
        modified_at: parse_timestamp(&modified_at_str)?,
    })
}

const PENDING_QUERY: &str = "SELECT id, kind, employee_email, employee_name, employee_job_title,
        employee_department, current_manager_email, current_manager_name,
        target_manager_email, target_manager_name, requestor_email, requestor_name,
        status, comment, review_date, created_at, modified_at
 FROM reassignment_request
 WHERE status = 'pending'
   AND (?1 IS NULL OR employee_email = ?1)
   AND (?2 IS NULL OR current_manager_email = ?2)
   AND (?3 IS NULL OR target_manager_email = ?3)
   AND (?4 IS NULL OR requestor_email = ?4)
   AND (?5 IS NULL OR kind = ?5)
 ORDER BY created_at DESC, id DESC";

const PENDING_COUNT_QUERY: &str = "SELECT COUNT(*) AS pending
 FROM reassignment_request
 WHERE status = 'pending'
   AND (?1 IS NULL OR employee_email = ?1)
   AND (?2 IS NULL OR current_manager_email = ?2)
   AND (?3 IS NULL OR target_manager_email = ?3)
   AND (?4 IS NULL OR requestor_email = ?4)
   AND (?5 IS NULL OR kind = ?5)";

async fn insert_draft<'e, E>(executor: E, draft: &RequestDraft) -> Result<i64, StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let now = Utc::now().to_rfc3339();
    let result = sqlx::query(
        "INSERT INTO reassignment_request (kind, employee_email, employee_name,
             employee_job_title, employee_department, current_manager_email,
             current_manager_name, target_manager_email, target_manager_name,
             requestor_email, requestor_name, status, created_at, modified_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)",
    )
    .bind(draft.kind.as_str())
    .bind(&draft.employee_email)
    .bind(&draft.employee_name)
    .bind(&draft.employee_job_title)
    .bind(&draft.employee_department)
    .bind(&draft.current_manager_email)
    .bind(&draft.current_manager_name)
    .bind(&draft.target_manager_email)
    .bind(&draft.target_manager_name)
    .bind(&draft.requestor_email)
    .bind(&draft.requestor_name)
    .bind(&now)
    .bind(&now)
    .execute(executor)
    .await
    .map_err(backend)?;

    Ok(result.last_insert_rowid())
}

#[async_trait::async_trait]
impl RequestStore for SqlRequestStore {
    async fn create(&self, draft: RequestDraft) -> Result<RequestId, StoreError> {
        let draft = draft.normalized();
        let id = insert_draft(&self.pool, &draft).await?;
        Ok(RequestId(id))
    }

    async fn create_batch(&self, drafts: Vec<RequestDraft>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for draft in drafts {
            let draft = draft.normalized();
            insert_draft(&mut *tx, &draft).await?;
        }
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn get(&self, id: RequestId) -> Result<Option<ReassignmentRequest>, StoreError> {
        let row = sqlx::query(
            "SELECT id, kind, employee_email, employee_name, employee_job_title,
                    employee_department, current_manager_email, current_manager_name,
                    target_manager_email, target_manager_name, requestor_email,
                    requestor_name, status, comment, review_date, created_at, modified_at
             FROM reassignment_request WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(ref r) => Ok(Some(row_to_request(r)?)),
            None => Ok(None),
        }
    }

    async fn set_status(
        &self,
        id: RequestId,
        status: RequestStatus,
        comment: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE reassignment_request
             SET status = ?, comment = COALESCE(?, comment), review_date = ?, modified_at = ?
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(comment)
        .bind(&now)
        .bind(&now)
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(format!("request {id} does not exist")));
        }
        Ok(())
    }

    async fn find_pending(
        &self,
        filter: PendingFilter,
    ) -> Result<Vec<ReassignmentRequest>, StoreError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(PENDING_QUERY)
            .bind(&filter.employee_email)
            .bind(&filter.current_manager_email)
            .bind(&filter.target_manager_email)
            .bind(&filter.requestor_email)
            .bind(filter.kind.map(|k| k.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        rows.iter().map(row_to_request).collect::<Result<Vec<_>, _>>()
    }

    async fn count_pending(&self, filter: PendingFilter) -> Result<u64, StoreError> {
        let row = sqlx::query(PENDING_COUNT_QUERY)
            .bind(&filter.employee_email)
            .bind(&filter.current_manager_email)
            .bind(&filter.target_manager_email)
            .bind(&filter.requestor_email)
            .bind(filter.kind.map(|k| k.as_str()))
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;

        let count: i64 = row.try_get("pending").map_err(decode)?;
        Ok(count as u64)
    }
}
