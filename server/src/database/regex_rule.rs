use chrono::Utc;
use serde::Deserialize;

use super::{get_connection, DbResult};
use crate::controller::BaseError;
use crate::schema::enum_def::RegexPhase;
use crate::utils::ID_GENERATOR;
use crate::{db_execute, db_object};

db_object! {
    #[derive(Queryable, Selectable, Identifiable, Debug)]
    #[diesel(table_name = regex_rule)]
    pub struct RegexRule {
        pub id: i64,
        pub name: String,
        pub pattern: String,
        pub replacement: String,
        pub phase: RegexPhase,
        pub account_id: i64,
        pub preset_id: Option<i64>,
        pub is_enabled: bool,
        pub sort_order: i32,
        pub deleted_at: Option<i64>,
        pub created_at: i64,
        pub updated_at: i64,
    }

    #[derive(Insertable, Debug)]
    #[diesel(table_name = regex_rule)]
    pub struct NewRegexRule {
        pub id: i64,
        pub name: String,
        pub pattern: String,
        pub replacement: String,
        pub phase: RegexPhase,
        pub account_id: i64,
        pub preset_id: Option<i64>,
        pub is_enabled: bool,
        pub sort_order: i32,
        pub deleted_at: Option<i64>,
        pub created_at: i64,
        pub updated_at: i64,
    }

    #[derive(AsChangeset, Deserialize, Debug, Default)]
    #[diesel(table_name = regex_rule)]
    pub struct UpdateRegexRuleData {
        pub name: Option<String>,
        pub pattern: Option<String>,
        pub replacement: Option<String>,
        pub phase: Option<RegexPhase>,
        pub is_enabled: Option<bool>,
        pub sort_order: Option<i32>,
    }
}

#[derive(Deserialize, Debug)]
pub struct NewRegexRulePayload {
    pub name: String,
    pub pattern: String,
    pub replacement: String,
    pub phase: RegexPhase,
    pub account_id: i64,
    // None makes the rule account-level; Some scopes it to one preset.
    pub preset_id: Option<i64>,
    #[serde(default)]
    pub sort_order: i32,
}

impl RegexRule {
    pub fn create(payload: &NewRegexRulePayload) -> DbResult<RegexRule> {
        let now = Utc::now().timestamp_millis();
        let new_rule = NewRegexRule {
            id: ID_GENERATOR.generate_id(),
            name: payload.name.clone(),
            pattern: payload.pattern.clone(),
            replacement: payload.replacement.clone(),
            phase: payload.phase,
            account_id: payload.account_id,
            preset_id: payload.preset_id,
            is_enabled: true,
            sort_order: payload.sort_order,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };

        let conn = &mut get_connection();
        db_execute!(conn, {
            let inserted = diesel::insert_into(regex_rule::table)
                .values(NewRegexRuleDb::to_db(&new_rule))
                .returning(RegexRuleDb::as_returning())
                .get_result::<RegexRuleDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to create regex rule: {}", e)))
                })?;
            Ok(inserted.from_db())
        })
    }

    pub fn update(id_value: i64, data: &UpdateRegexRuleData) -> DbResult<RegexRule> {
        let conn = &mut get_connection();
        let current_time = Utc::now().timestamp_millis();

        db_execute!(conn, {
            let updated = diesel::update(regex_rule::table.find(id_value))
                .set((
                    UpdateRegexRuleDataDb::to_db(data),
                    regex_rule::dsl::updated_at.eq(current_time),
                ))
                .returning(RegexRuleDb::as_returning())
                .get_result::<RegexRuleDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to update regex rule {}: {}",
                        id_value, e
                    )))
                })?;
            Ok(updated.from_db())
        })
    }

    pub fn delete(id_value: i64) -> DbResult<usize> {
        let conn = &mut get_connection();
        let current_time = Utc::now().timestamp_millis();

        db_execute!(conn, {
            diesel::update(regex_rule::table.find(id_value))
                .set((
                    regex_rule::dsl::deleted_at.eq(Some(current_time)),
                    regex_rule::dsl::is_enabled.eq(false),
                    regex_rule::dsl::updated_at.eq(current_time),
                ))
                .execute(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to delete regex rule {}: {}",
                        id_value, e
                    )))
                })
        })
    }

    pub fn list_all() -> DbResult<Vec<RegexRule>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let rows = regex_rule::table
                .filter(regex_rule::dsl::deleted_at.is_null())
                .order((regex_rule::dsl::sort_order.asc(), regex_rule::dsl::id.asc()))
                .select(RegexRuleDb::as_select())
                .load::<RegexRuleDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to list regex rules: {}", e)))
                })?;
            Ok(rows.into_iter().map(|row| row.from_db()).collect())
        })
    }

    /// The store's `list_account_regex`: enabled account-level rules in
    /// execution order.
    pub fn list_for_account(account_id_value: i64) -> DbResult<Vec<RegexRule>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let rows = regex_rule::table
                .filter(
                    regex_rule::dsl::account_id
                        .eq(account_id_value)
                        .and(regex_rule::dsl::preset_id.is_null())
                        .and(regex_rule::dsl::deleted_at.is_null())
                        .and(regex_rule::dsl::is_enabled.eq(true)),
                )
                .order((regex_rule::dsl::sort_order.asc(), regex_rule::dsl::id.asc()))
                .select(RegexRuleDb::as_select())
                .load::<RegexRuleDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to list regex rules for account {}: {}",
                        account_id_value, e
                    )))
                })?;
            Ok(rows.into_iter().map(|row| row.from_db()).collect())
        })
    }

    /// Enabled rules attached to one preset, in execution order.
    pub fn list_for_preset(preset_id_value: i64) -> DbResult<Vec<RegexRule>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let rows = regex_rule::table
                .filter(
                    regex_rule::dsl::preset_id
                        .eq(preset_id_value)
                        .and(regex_rule::dsl::deleted_at.is_null())
                        .and(regex_rule::dsl::is_enabled.eq(true)),
                )
                .order((regex_rule::dsl::sort_order.asc(), regex_rule::dsl::id.asc()))
                .select(RegexRuleDb::as_select())
                .load::<RegexRuleDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to list regex rules for preset {}: {}",
                        preset_id_value, e
                    )))
                })?;
            Ok(rows.into_iter().map(|row| row.from_db()).collect())
        })
    }
}
