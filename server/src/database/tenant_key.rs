use chrono::Utc;
use rand::{distr::Alphanumeric, rng, Rng};
use serde::Deserialize;

use super::account::Account;
use super::{get_connection, DbResult};
use crate::controller::BaseError;
use crate::utils::ID_GENERATOR;
use crate::{db_execute, db_object};

pub const TENANT_KEY_PREFIX: &str = "psg-";

db_object! {
    #[derive(Queryable, Selectable, Identifiable, Debug)]
    #[diesel(table_name = tenant_key)]
    pub struct TenantKey {
        pub id: i64,
        pub api_key: String,
        pub name: Option<String>,
        pub account_id: i64,
        pub preset_id: Option<i64>,
        pub apply_regex: bool,
        pub is_enabled: bool,
        pub deleted_at: Option<i64>,
        pub created_at: i64,
        pub updated_at: i64,
    }

    #[derive(Insertable, Debug)]
    #[diesel(table_name = tenant_key)]
    pub struct NewTenantKey {
        pub id: i64,
        pub api_key: String,
        pub name: Option<String>,
        pub account_id: i64,
        pub preset_id: Option<i64>,
        pub apply_regex: bool,
        pub is_enabled: bool,
        pub deleted_at: Option<i64>,
        pub created_at: i64,
        pub updated_at: i64,
    }

    // Option<Option<T>> lets a nullable column be explicitly set to NULL.
    #[derive(AsChangeset, Deserialize, Debug, Default)]
    #[diesel(table_name = tenant_key)]
    pub struct UpdateTenantKeyData {
        pub name: Option<Option<String>>,
        pub preset_id: Option<Option<i64>>,
        pub apply_regex: Option<bool>,
        pub is_enabled: Option<bool>,
    }
}

impl TenantKey {
    /// Issues a new tenant key with a server-generated secret.
    pub fn create(
        account_id: i64,
        name: Option<&str>,
        preset_id: Option<i64>,
        apply_regex: bool,
    ) -> DbResult<TenantKey> {
        let now = Utc::now().timestamp_millis();

        let random_part: String = rng()
            .sample_iter(&Alphanumeric)
            .take(48)
            .map(char::from)
            .collect();
        let api_key_value = format!("{}{}", TENANT_KEY_PREFIX, random_part);

        let new_key = NewTenantKey {
            id: ID_GENERATOR.generate_id(),
            api_key: api_key_value,
            name: name.map(|s| s.to_string()),
            account_id,
            preset_id,
            apply_regex,
            is_enabled: true,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };

        let conn = &mut get_connection();
        db_execute!(conn, {
            let inserted = diesel::insert_into(tenant_key::table)
                .values(NewTenantKeyDb::to_db(&new_key))
                .returning(TenantKeyDb::as_returning())
                .get_result::<TenantKeyDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to create tenant key: {}", e)))
                })?;
            Ok(inserted.from_db())
        })
    }

    pub fn update(id_value: i64, data: &UpdateTenantKeyData) -> DbResult<TenantKey> {
        let conn = &mut get_connection();
        let current_time = Utc::now().timestamp_millis();

        db_execute!(conn, {
            let updated = diesel::update(tenant_key::table.find(id_value))
                .set((
                    UpdateTenantKeyDataDb::to_db(data),
                    tenant_key::dsl::updated_at.eq(current_time),
                ))
                .returning(TenantKeyDb::as_returning())
                .get_result::<TenantKeyDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to update tenant key {}: {}",
                        id_value, e
                    )))
                })?;
            Ok(updated.from_db())
        })
    }

    /// Soft-deletes a tenant key by ID.
    pub fn delete(id_value: i64) -> DbResult<usize> {
        let conn = &mut get_connection();
        let current_time = Utc::now().timestamp_millis();

        db_execute!(conn, {
            diesel::update(tenant_key::table.find(id_value))
                .set((
                    tenant_key::dsl::deleted_at.eq(Some(current_time)),
                    tenant_key::dsl::is_enabled.eq(false),
                    tenant_key::dsl::updated_at.eq(current_time),
                ))
                .execute(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to delete tenant key {}: {}",
                        id_value, e
                    )))
                })
        })
    }

    pub fn list_all() -> DbResult<Vec<TenantKey>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let rows = tenant_key::table
                .filter(tenant_key::dsl::deleted_at.is_null())
                .order(tenant_key::dsl::created_at.desc())
                .select(TenantKeyDb::as_select())
                .load::<TenantKeyDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to list tenant keys: {}", e)))
                })?;
            Ok(rows.into_iter().map(|row| row.from_db()).collect())
        })
    }

    /// Clears the preset binding on every key that references the given preset.
    pub fn unbind_preset(preset_id_value: i64) -> DbResult<usize> {
        let conn = &mut get_connection();
        let current_time = Utc::now().timestamp_millis();

        db_execute!(conn, {
            diesel::update(tenant_key::table.filter(tenant_key::dsl::preset_id.eq(preset_id_value)))
                .set((
                    tenant_key::dsl::preset_id.eq(None::<i64>),
                    tenant_key::dsl::updated_at.eq(current_time),
                ))
                .execute(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to unbind preset {} from tenant keys: {}",
                        preset_id_value, e
                    )))
                })
        })
    }

    /// Looks up an enabled, non-deleted tenant key by its secret string.
    pub fn find_active(key_value: &str) -> DbResult<Option<TenantKey>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let found = tenant_key::table
                .filter(
                    tenant_key::dsl::api_key
                        .eq(key_value)
                        .and(tenant_key::dsl::deleted_at.is_null())
                        .and(tenant_key::dsl::is_enabled.eq(true)),
                )
                .select(TenantKeyDb::as_select())
                .first::<TenantKeyDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Error fetching tenant key by value: {}",
                        e
                    )))
                })?;
            Ok(found.map(|row| row.from_db()))
        })
    }

    /// The store's `authenticate` operation: key string to (key, owning account).
    pub fn find_active_with_account(key_value: &str) -> DbResult<Option<(TenantKey, Account)>> {
        let key = match Self::find_active(key_value)? {
            Some(key) => key,
            None => return Ok(None),
        };
        let account = Account::get_by_id(key.account_id)?;
        Ok(Some((key, account)))
    }
}
