use chrono::Utc;
use diesel::result::DatabaseErrorKind;
use serde::Deserialize;

use super::{get_connection, DbResult};
use crate::controller::BaseError;
use crate::utils::ID_GENERATOR;
use crate::{db_execute, db_object};

/// `last_status` value for a credential whose most recent call succeeded.
pub const STATUS_ACTIVE: &str = "active";
/// `last_status` value set when sustained failure disables a credential.
pub const STATUS_AUTO_DISABLED: &str = "auto_disabled";

db_object! {
    #[derive(Queryable, Selectable, Identifiable, Debug)]
    #[diesel(table_name = upstream_credential)]
    pub struct UpstreamCredential {
        pub id: i64,
        pub secret: String,
        pub is_enabled: bool,
        pub usage_count: i64,
        pub error_count: i64,
        pub total_tokens: i64,
        pub last_status: String,
        pub last_used_at: Option<i64>,
        pub deleted_at: Option<i64>,
        pub created_at: i64,
        pub updated_at: i64,
    }

    #[derive(Insertable, Debug)]
    #[diesel(table_name = upstream_credential)]
    pub struct NewUpstreamCredential {
        pub id: i64,
        pub secret: String,
        pub is_enabled: bool,
        pub usage_count: i64,
        pub error_count: i64,
        pub total_tokens: i64,
        pub last_status: String,
        pub last_used_at: Option<i64>,
        pub deleted_at: Option<i64>,
        pub created_at: i64,
        pub updated_at: i64,
    }

    #[derive(AsChangeset, Deserialize, Debug, Default)]
    #[diesel(table_name = upstream_credential)]
    pub struct UpdateUpstreamCredentialData {
        pub secret: Option<String>,
        pub is_enabled: Option<bool>,
    }
}

impl UpstreamCredential {
    /// Registers a new upstream credential. Duplicate secrets are rejected.
    pub fn create(secret: &str) -> DbResult<UpstreamCredential> {
        let now = Utc::now().timestamp_millis();
        let new_credential = NewUpstreamCredential {
            id: ID_GENERATOR.generate_id(),
            secret: secret.to_string(),
            is_enabled: true,
            usage_count: 0,
            error_count: 0,
            total_tokens: 0,
            last_status: STATUS_ACTIVE.to_string(),
            last_used_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };

        let conn = &mut get_connection();
        db_execute!(conn, {
            let inserted = diesel::insert_into(upstream_credential::table)
                .values(NewUpstreamCredentialDb::to_db(&new_credential))
                .returning(UpstreamCredentialDb::as_returning())
                .get_result::<UpstreamCredentialDb>(conn)
                .map_err(|e| match e {
                    diesel::result::Error::DatabaseError(
                        DatabaseErrorKind::UniqueViolation,
                        _,
                    ) => BaseError::DatabaseDup(Some(
                        "A credential with this secret already exists".to_string(),
                    )),
                    _ => BaseError::DatabaseFatal(Some(format!(
                        "Failed to create upstream credential: {}",
                        e
                    ))),
                })?;
            Ok(inserted.from_db())
        })
    }

    /// Manual enable/disable or secret rotation from the admin API. Re-enabling
    /// an auto-disabled credential also resets its status label.
    pub fn update(id_value: i64, data: &UpdateUpstreamCredentialData) -> DbResult<UpstreamCredential> {
        let conn = &mut get_connection();
        let current_time = Utc::now().timestamp_millis();
        let reset_status = data.is_enabled == Some(true);

        db_execute!(conn, {
            let updated = diesel::update(upstream_credential::table.find(id_value))
                .set((
                    UpdateUpstreamCredentialDataDb::to_db(data),
                    upstream_credential::dsl::updated_at.eq(current_time),
                ))
                .returning(UpstreamCredentialDb::as_returning())
                .get_result::<UpstreamCredentialDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to update upstream credential {}: {}",
                        id_value, e
                    )))
                })?;

            if reset_status && updated.last_status == STATUS_AUTO_DISABLED {
                let reset = diesel::update(upstream_credential::table.find(id_value))
                    .set(upstream_credential::dsl::last_status.eq(STATUS_ACTIVE))
                    .returning(UpstreamCredentialDb::as_returning())
                    .get_result::<UpstreamCredentialDb>(conn)
                    .map_err(|e| {
                        BaseError::DatabaseFatal(Some(format!(
                            "Failed to reset credential status {}: {}",
                            id_value, e
                        )))
                    })?;
                return Ok(reset.from_db());
            }

            Ok(updated.from_db())
        })
    }

    pub fn delete(id_value: i64) -> DbResult<usize> {
        let conn = &mut get_connection();
        let current_time = Utc::now().timestamp_millis();

        db_execute!(conn, {
            diesel::update(upstream_credential::table.find(id_value))
                .set((
                    upstream_credential::dsl::deleted_at.eq(Some(current_time)),
                    upstream_credential::dsl::is_enabled.eq(false),
                    upstream_credential::dsl::updated_at.eq(current_time),
                ))
                .execute(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to delete upstream credential {}: {}",
                        id_value, e
                    )))
                })
        })
    }

    pub fn list_all() -> DbResult<Vec<UpstreamCredential>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let rows = upstream_credential::table
                .filter(upstream_credential::dsl::deleted_at.is_null())
                .order(upstream_credential::dsl::created_at.desc())
                .select(UpstreamCredentialDb::as_select())
                .load::<UpstreamCredentialDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to list upstream credentials: {}",
                        e
                    )))
                })?;
            Ok(rows.into_iter().map(|row| row.from_db()).collect())
        })
    }

    /// Pool candidates: enabled, not deleted, in stable id order.
    pub fn list_enabled() -> DbResult<Vec<UpstreamCredential>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let rows = upstream_credential::table
                .filter(
                    upstream_credential::dsl::deleted_at
                        .is_null()
                        .and(upstream_credential::dsl::is_enabled.eq(true)),
                )
                .order(upstream_credential::dsl::id.asc())
                .select(UpstreamCredentialDb::as_select())
                .load::<UpstreamCredentialDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to list enabled upstream credentials: {}",
                        e
                    )))
                })?;
            Ok(rows.into_iter().map(|row| row.from_db()).collect())
        })
    }

    /// Settle bookkeeping for a successful call.
    pub fn record_success(id_value: i64, tokens: i64) -> DbResult<usize> {
        let conn = &mut get_connection();
        let current_time = Utc::now().timestamp_millis();

        db_execute!(conn, {
            diesel::update(upstream_credential::table.find(id_value))
                .set((
                    upstream_credential::dsl::usage_count
                        .eq(upstream_credential::dsl::usage_count + 1),
                    upstream_credential::dsl::total_tokens
                        .eq(upstream_credential::dsl::total_tokens + tokens),
                    upstream_credential::dsl::last_status.eq(STATUS_ACTIVE),
                    upstream_credential::dsl::last_used_at.eq(Some(current_time)),
                    upstream_credential::dsl::updated_at.eq(current_time),
                ))
                .execute(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to record success for credential {}: {}",
                        id_value, e
                    )))
                })
        })
    }

    /// Settle bookkeeping for a retryable failure; `status` is the observed
    /// transport/HTTP status label.
    pub fn record_failure(id_value: i64, status: &str) -> DbResult<usize> {
        let conn = &mut get_connection();
        let current_time = Utc::now().timestamp_millis();

        db_execute!(conn, {
            diesel::update(upstream_credential::table.find(id_value))
                .set((
                    upstream_credential::dsl::error_count
                        .eq(upstream_credential::dsl::error_count + 1),
                    upstream_credential::dsl::last_status.eq(status),
                    upstream_credential::dsl::last_used_at.eq(Some(current_time)),
                    upstream_credential::dsl::updated_at.eq(current_time),
                ))
                .execute(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to record failure for credential {}: {}",
                        id_value, e
                    )))
                })
        })
    }

    /// Disables a credential the upstream rejected outright.
    pub fn auto_disable(id_value: i64) -> DbResult<usize> {
        let conn = &mut get_connection();
        let current_time = Utc::now().timestamp_millis();

        db_execute!(conn, {
            diesel::update(upstream_credential::table.find(id_value))
                .set((
                    upstream_credential::dsl::is_enabled.eq(false),
                    upstream_credential::dsl::error_count
                        .eq(upstream_credential::dsl::error_count + 1),
                    upstream_credential::dsl::last_status.eq(STATUS_AUTO_DISABLED),
                    upstream_credential::dsl::last_used_at.eq(Some(current_time)),
                    upstream_credential::dsl::updated_at.eq(current_time),
                ))
                .execute(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to auto-disable credential {}: {}",
                        id_value, e
                    )))
                })
        })
    }
}
