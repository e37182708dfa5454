use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{ConfigurationFilter, Repository, SecretFilter};
use crate::errors::{AppError, Result};
use crate::models::configuration::{Configuration, ConfigurationType};
use crate::models::group::SecretGroup;
use crate::models::notification::NotificationRegistration;
use crate::models::pagination::Window;
use crate::models::secret::{SecretMetadata, SecretRecord, SecretType};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct SecretDocument {
    document: Json<SecretRecord>,
}

#[derive(sqlx::FromRow)]
struct ConfigurationDocument {
    document: Json<Configuration>,
}

#[derive(sqlx::FromRow)]
struct GroupRow {
    id: String,
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<GroupRow> for SecretGroup {
    fn from(row: GroupRow) -> Self {
        SecretGroup {
            id: row.id,
            name: row.name,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Map a foreign-key violation to a Conflict with `msg`, passing anything
/// else on.
fn reference_conflict(err: AppError, msg: impl FnOnce() -> String) -> AppError {
    match &err {
        AppError::Database(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
            AppError::conflict(msg())
        }
        _ => err,
    }
}

/// Map a unique-index violation to a Conflict with `msg`.
fn unique_conflict(err: sqlx::Error, msg: impl FnOnce() -> String) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::conflict(msg()),
        _ => AppError::Database(err),
    }
}

fn i64_of(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    fn push_secret_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &SecretFilter) {
        qb.push(" WHERE TRUE");
        if !filter.groups.is_empty() {
            qb.push(" AND group_id = ANY(")
                .push_bind(filter.groups.clone())
                .push(")");
        }
        if !filter.secret_types.is_empty() {
            let types: Vec<String> = filter
                .secret_types
                .iter()
                .map(|t| t.as_str().to_string())
                .collect();
            qb.push(" AND secret_type = ANY(").push_bind(types).push(")");
        }
        if !filter.match_all_labels.is_empty() {
            qb.push(" AND labels @> ")
                .push_bind(filter.match_all_labels.clone());
        }
        if let Some(term) = &filter.search {
            let pattern = format!("%{}%", escape_like(term));
            qb.push(" AND (name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR EXISTS (SELECT 1 FROM unnest(labels) l WHERE l ILIKE ")
                .push_bind(pattern)
                .push("))");
        }
    }

    fn push_lock_filter(qb: &mut QueryBuilder<'_, Postgres>, search: Option<&str>) {
        qb.push(" WHERE locks_total > 0");
        if let Some(term) = search {
            qb.push(" AND EXISTS (SELECT 1 FROM unnest(lock_names) n WHERE n ILIKE ")
                .push_bind(format!("%{}%", escape_like(term)))
                .push(")");
        }
    }

    async fn count(&self, mut qb: QueryBuilder<'_, Postgres>) -> Result<u64> {
        let total: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(total.max(0) as u64)
    }
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn name_conflict(record: &SecretRecord) -> impl FnOnce() -> String + '_ {
    move || {
        format!(
            "a {} secret named '{}' already exists in group {}",
            record.secret_type(),
            record.metadata.name,
            record.metadata.secret_group_id
        )
    }
}

fn lock_names(record: &SecretRecord) -> Vec<String> {
    record.all_locks().map(|(_, l)| l.name.clone()).collect()
}

#[async_trait]
impl Repository for PgStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn list_groups(&self) -> Result<Vec<SecretGroup>> {
        let rows = sqlx::query_as::<_, GroupRow>(
            "SELECT id, name, description, created_at, updated_at FROM secret_groups ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SecretGroup::from).collect())
    }

    async fn get_group(&self, id: &str) -> Result<Option<SecretGroup>> {
        let row = sqlx::query_as::<_, GroupRow>(
            "SELECT id, name, description, created_at, updated_at FROM secret_groups WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(SecretGroup::from))
    }

    async fn insert_group(&self, group: &SecretGroup) -> Result<()> {
        sqlx::query(
            "INSERT INTO secret_groups (id, name, description, created_at, updated_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&group.id)
        .bind(&group.name)
        .bind(&group.description)
        .bind(group.created_at)
        .bind(group.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            unique_conflict(e, || {
                format!("a secret group named '{}' already exists", group.name)
            })
        })?;
        Ok(())
    }

    async fn update_group(&self, group: &SecretGroup) -> Result<()> {
        let result = sqlx::query(
            "UPDATE secret_groups SET name = $2, description = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(&group.id)
        .bind(&group.name)
        .bind(&group.description)
        .bind(group.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            unique_conflict(e, || {
                format!("a secret group named '{}' already exists", group.name)
            })
        })?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("secret group {}", group.id)));
        }
        Ok(())
    }

    async fn delete_group(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM secret_groups WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                reference_conflict(AppError::Database(e), || {
                    format!("secret group '{id}' still contains secrets")
                })
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_secret(&self, record: &SecretRecord) -> Result<()> {
        let meta = &record.metadata;
        sqlx::query(
            r#"INSERT INTO secrets (id, group_id, secret_type, name, labels, lock_names, locks_total, state,
                                    configuration, created_at, updated_at, expiration_date, next_rotation_date,
                                    revision, document)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"#,
        )
        .bind(meta.id)
        .bind(&meta.secret_group_id)
        .bind(meta.secret_type().as_str())
        .bind(&meta.name)
        .bind(&meta.labels)
        .bind(lock_names(record))
        .bind(record.locks_total() as i32)
        .bind(meta.state.as_str())
        .bind(meta.kind.configuration_ref())
        .bind(meta.created_at)
        .bind(meta.updated_at)
        .bind(meta.expiration_date)
        .bind(record.rotation.next_rotation_date())
        .bind(i64_of(record.revision))
        .bind(Json(record))
        .execute(&self.pool)
        .await
        .map_err(|e| unique_conflict(e, name_conflict(record)))
        .map_err(|e| {
            reference_conflict(e, || {
                format!("secret group '{}' no longer exists", meta.secret_group_id)
            })
        })?;
        Ok(())
    }

    async fn get_secret(&self, id: Uuid) -> Result<Option<SecretRecord>> {
        let row = sqlx::query_as::<_, SecretDocument>("SELECT document FROM secrets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.document.0))
    }

    async fn find_secret(
        &self,
        group: &str,
        secret_type: SecretType,
        name: &str,
    ) -> Result<Option<SecretRecord>> {
        let row = sqlx::query_as::<_, SecretDocument>(
            "SELECT document FROM secrets WHERE group_id = $1 AND secret_type = $2 AND name = $3",
        )
        .bind(group)
        .bind(secret_type.as_str())
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.document.0))
    }

    async fn update_secret(&self, record: &SecretRecord, expected_revision: u64) -> Result<()> {
        let meta = &record.metadata;
        let result = sqlx::query(
            r#"UPDATE secrets
               SET group_id = $3, name = $4, labels = $5, lock_names = $6, locks_total = $7, state = $8,
                   updated_at = $9, expiration_date = $10, next_rotation_date = $11, revision = $12,
                   document = $13
               WHERE id = $1 AND revision = $2"#,
        )
        .bind(meta.id)
        .bind(i64_of(expected_revision))
        .bind(&meta.secret_group_id)
        .bind(&meta.name)
        .bind(&meta.labels)
        .bind(lock_names(record))
        .bind(record.locks_total() as i32)
        .bind(meta.state.as_str())
        .bind(meta.updated_at)
        .bind(meta.expiration_date)
        .bind(record.rotation.next_rotation_date())
        .bind(i64_of(record.revision))
        .bind(Json(record))
        .execute(&self.pool)
        .await
        .map_err(|e| unique_conflict(e, name_conflict(record)))?;

        if result.rows_affected() == 0 {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM secrets WHERE id = $1)")
                    .bind(meta.id)
                    .fetch_one(&self.pool)
                    .await?;
            return Err(if exists {
                AppError::conflict(format!("secret {} was modified concurrently", meta.id))
            } else {
                AppError::not_found(format!("secret {}", meta.id))
            });
        }
        Ok(())
    }

    async fn delete_secret(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM secrets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_secrets(
        &self,
        filter: &SecretFilter,
        window: Window,
    ) -> Result<(Vec<SecretMetadata>, u64)> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM secrets");
        Self::push_secret_filter(&mut count, filter);
        let total = self.count(count).await?;

        let mut qb = QueryBuilder::new("SELECT document FROM secrets");
        Self::push_secret_filter(&mut qb, filter);
        qb.push(format!(
            " ORDER BY {} {} NULLS LAST, id ASC",
            filter.sort.key.column(),
            if filter.sort.descending { "DESC" } else { "ASC" }
        ));
        qb.push(" LIMIT ")
            .push_bind(i64_of(window.limit))
            .push(" OFFSET ")
            .push_bind(i64_of(window.offset));

        let rows: Vec<SecretDocument> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok((rows.into_iter().map(|r| r.document.0.metadata).collect(), total))
    }

    async fn list_locked_secrets(
        &self,
        search: Option<&str>,
        window: Window,
    ) -> Result<(Vec<SecretRecord>, u64)> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM secrets");
        Self::push_lock_filter(&mut count, search);
        let total = self.count(count).await?;

        let mut qb = QueryBuilder::new("SELECT document FROM secrets");
        Self::push_lock_filter(&mut qb, search);
        qb.push(" ORDER BY created_at ASC, id ASC LIMIT ")
            .push_bind(i64_of(window.limit))
            .push(" OFFSET ")
            .push_bind(i64_of(window.offset));

        let rows: Vec<SecretDocument> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok((rows.into_iter().map(|r| r.document.0).collect(), total))
    }

    async fn count_secrets_in_group(&self, group: &str) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM secrets WHERE group_id = $1")
            .bind(group)
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }

    async fn count_secrets_using_configuration(&self, name: &str) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM secrets WHERE configuration = $1")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }

    async fn secrets_due_for_rotation(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM secrets WHERE next_rotation_date <= $1 ORDER BY next_rotation_date ASC",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn expired_secrets(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"SELECT id FROM secrets
               WHERE expiration_date <= $1 AND state NOT IN ('deactivated', 'destroyed')
               ORDER BY expiration_date ASC"#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn insert_configuration(&self, config: &Configuration) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO configurations (name, config_type, reference, created_at, updated_at, document)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(&config.name)
        .bind(config.config_type().as_str())
        .bind(config.spec.references())
        .bind(config.created_at)
        .bind(config.updated_at)
        .bind(Json(config))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            unique_conflict(e, || {
                format!("a configuration named '{}' already exists", config.name)
            })
        })?;
        Ok(())
    }

    async fn get_configuration(&self, name: &str) -> Result<Option<Configuration>> {
        let row = sqlx::query_as::<_, ConfigurationDocument>(
            "SELECT document FROM configurations WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.document.0))
    }

    async fn update_configuration(&self, config: &Configuration) -> Result<()> {
        let result = sqlx::query(
            "UPDATE configurations SET reference = $2, updated_at = $3, document = $4 WHERE name = $1",
        )
        .bind(&config.name)
        .bind(config.spec.references())
        .bind(config.updated_at)
        .bind(Json(config))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("configuration '{}'", config.name)));
        }
        Ok(())
    }

    async fn delete_configuration(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM configurations WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_configurations(
        &self,
        filter: &ConfigurationFilter,
        window: Window,
    ) -> Result<(Vec<Configuration>, u64)> {
        let types: Vec<String> = filter
            .config_types
            .iter()
            .map(|t| t.as_str().to_string())
            .collect();
        let pattern = filter
            .search
            .as_deref()
            .map(|s| format!("%{}%", escape_like(s)));

        let total: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM configurations
               WHERE (cardinality($1::text[]) = 0 OR config_type = ANY($1))
                 AND ($2::text IS NULL OR name ILIKE $2)"#,
        )
        .bind(&types)
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, ConfigurationDocument>(
            r#"SELECT document FROM configurations
               WHERE (cardinality($1::text[]) = 0 OR config_type = ANY($1))
                 AND ($2::text IS NULL OR name ILIKE $2)
               ORDER BY created_at ASC, name ASC
               LIMIT $3 OFFSET $4"#,
        )
        .bind(&types)
        .bind(&pattern)
        .bind(i64_of(window.limit))
        .bind(i64_of(window.offset))
        .fetch_all(&self.pool)
        .await?;

        Ok((
            rows.into_iter().map(|r| r.document.0).collect(),
            total.max(0) as u64,
        ))
    }

    async fn count_configurations(&self, types: &[ConfigurationType]) -> Result<u64> {
        let types: Vec<String> = types.iter().map(|t| t.as_str().to_string()).collect();
        let n: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM configurations WHERE config_type = ANY($1)")
                .bind(&types)
                .fetch_one(&self.pool)
                .await?;
        Ok(n.max(0) as u64)
    }

    async fn configurations_referencing(&self, name: &str) -> Result<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT name FROM configurations WHERE reference = $1 ORDER BY name",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn get_registration(&self) -> Result<Option<NotificationRegistration>> {
        let row: Option<Json<NotificationRegistration>> =
            sqlx::query_scalar("SELECT document FROM notification_registration WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|j| j.0))
    }

    async fn insert_registration(&self, registration: &NotificationRegistration) -> Result<()> {
        sqlx::query(
            "INSERT INTO notification_registration (id, document, created_at) VALUES (1, $1, $2)",
        )
        .bind(Json(registration))
        .bind(registration.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            unique_conflict(e, || "a notification registration already exists".to_string())
        })?;
        Ok(())
    }

    async fn delete_registration(&self) -> Result<bool> {
        let result = sqlx::query("DELETE FROM notification_registration WHERE id = 1")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
