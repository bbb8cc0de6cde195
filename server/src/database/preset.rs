use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::tenant_key::TenantKey;
use super::{get_connection, DbResult};
use crate::controller::BaseError;
use crate::schema::enum_def::{MessageRole, PresetItemType};
use crate::utils::ID_GENERATOR;
use crate::{db_execute, db_object};

db_object! {
    #[derive(Queryable, Selectable, Identifiable, Debug)]
    #[diesel(table_name = preset)]
    pub struct Preset {
        pub id: i64,
        pub name: String,
        pub account_id: i64,
        pub is_enabled: bool,
        pub sort_order: i32,
        pub deleted_at: Option<i64>,
        pub created_at: i64,
        pub updated_at: i64,
    }

    #[derive(Insertable, Debug)]
    #[diesel(table_name = preset)]
    pub struct NewPreset {
        pub id: i64,
        pub name: String,
        pub account_id: i64,
        pub is_enabled: bool,
        pub sort_order: i32,
        pub deleted_at: Option<i64>,
        pub created_at: i64,
        pub updated_at: i64,
    }

    #[derive(AsChangeset, Deserialize, Debug, Default)]
    #[diesel(table_name = preset)]
    pub struct UpdatePresetData {
        pub name: Option<String>,
        pub is_enabled: Option<bool>,
        pub sort_order: Option<i32>,
    }

    #[derive(Queryable, Selectable, Identifiable, Insertable, Debug)]
    #[diesel(table_name = preset_item)]
    pub struct PresetItem {
        pub id: i64,
        pub preset_id: i64,
        pub role: MessageRole,
        pub item_type: PresetItemType,
        pub content: String,
        pub is_enabled: bool,
        pub sort_order: i32,
        pub created_at: i64,
    }
}

/// Item payload accepted by the admin API when creating or replacing a
/// preset's contents.
#[derive(Deserialize, Debug, Clone)]
pub struct PresetItemPayload {
    pub role: MessageRole,
    #[serde(rename = "type")]
    pub item_type: PresetItemType,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub sort_order: i32,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct PresetDetail {
    pub preset: Preset,
    pub items: Vec<PresetItem>,
}

impl Preset {
    pub fn create(
        name: &str,
        account_id: i64,
        sort_order: i32,
        items: &[PresetItemPayload],
    ) -> DbResult<PresetDetail> {
        let now = Utc::now().timestamp_millis();
        let new_preset = NewPreset {
            id: ID_GENERATOR.generate_id(),
            name: name.to_string(),
            account_id,
            is_enabled: true,
            sort_order,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };

        let conn = &mut get_connection();
        let created: Preset = db_execute!(conn, {
            let inserted = diesel::insert_into(preset::table)
                .values(NewPresetDb::to_db(&new_preset))
                .returning(PresetDb::as_returning())
                .get_result::<PresetDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to create preset: {}", e)))
                })?;
            Ok::<_, BaseError>(inserted.from_db())
        })?;

        let stored_items = Self::replace_items(created.id, items)?;
        Ok(PresetDetail {
            preset: created,
            items: stored_items,
        })
    }

    pub fn update(
        id_value: i64,
        data: &UpdatePresetData,
        items: Option<&[PresetItemPayload]>,
    ) -> DbResult<PresetDetail> {
        let conn = &mut get_connection();
        let current_time = Utc::now().timestamp_millis();

        let updated: Preset = db_execute!(conn, {
            let updated = diesel::update(preset::table.find(id_value))
                .set((
                    UpdatePresetDataDb::to_db(data),
                    preset::dsl::updated_at.eq(current_time),
                ))
                .returning(PresetDb::as_returning())
                .get_result::<PresetDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to update preset {}: {}",
                        id_value, e
                    )))
                })?;
            Ok::<_, BaseError>(updated.from_db())
        })?;

        let stored_items = match items {
            Some(payloads) => Self::replace_items(id_value, payloads)?,
            None => Self::list_items(id_value)?,
        };
        Ok(PresetDetail {
            preset: updated,
            items: stored_items,
        })
    }

    /// Soft-deletes a preset and clears the binding on any tenant key that
    /// still references it.
    pub fn delete(id_value: i64) -> DbResult<usize> {
        let conn = &mut get_connection();
        let current_time = Utc::now().timestamp_millis();

        let affected = db_execute!(conn, {
            diesel::update(preset::table.find(id_value))
                .set((
                    preset::dsl::deleted_at.eq(Some(current_time)),
                    preset::dsl::is_enabled.eq(false),
                    preset::dsl::updated_at.eq(current_time),
                ))
                .execute(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to delete preset {}: {}",
                        id_value, e
                    )))
                })
        })?;

        TenantKey::unbind_preset(id_value)?;
        Ok(affected)
    }

    pub fn list_all() -> DbResult<Vec<Preset>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let rows = preset::table
                .filter(preset::dsl::deleted_at.is_null())
                .order((preset::dsl::sort_order.asc(), preset::dsl::id.asc()))
                .select(PresetDb::as_select())
                .load::<PresetDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to list presets: {}", e)))
                })?;
            Ok(rows.into_iter().map(|row| row.from_db()).collect())
        })
    }

    /// The store's `get_preset` operation: the preset and its ordered items.
    pub fn get_with_items(id_value: i64) -> DbResult<Option<PresetDetail>> {
        let conn = &mut get_connection();
        let found: Option<Preset> = db_execute!(conn, {
            let found = preset::table
                .filter(
                    preset::dsl::id
                        .eq(id_value)
                        .and(preset::dsl::deleted_at.is_null()),
                )
                .select(PresetDb::as_select())
                .first::<PresetDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Error fetching preset {}: {}",
                        id_value, e
                    )))
                })?;
            Ok::<_, BaseError>(found.map(|row| row.from_db()))
        })?;

        match found {
            Some(preset_row) => {
                let items = Self::list_items(preset_row.id)?;
                Ok(Some(PresetDetail {
                    preset: preset_row,
                    items,
                }))
            }
            None => Ok(None),
        }
    }

    /// Items in expansion order: sort_order ascending, insertion order breaking ties.
    pub fn list_items(preset_id_value: i64) -> DbResult<Vec<PresetItem>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let rows = preset_item::table
                .filter(preset_item::dsl::preset_id.eq(preset_id_value))
                .order((
                    preset_item::dsl::sort_order.asc(),
                    preset_item::dsl::id.asc(),
                ))
                .select(PresetItemDb::as_select())
                .load::<PresetItemDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to list items of preset {}: {}",
                        preset_id_value, e
                    )))
                })?;
            Ok(rows.into_iter().map(|row| row.from_db()).collect())
        })
    }

    fn replace_items(preset_id_value: i64, payloads: &[PresetItemPayload]) -> DbResult<Vec<PresetItem>> {
        let now = Utc::now().timestamp_millis();
        let records: Vec<PresetItem> = payloads
            .iter()
            .map(|payload| PresetItem {
                id: ID_GENERATOR.generate_id(),
                preset_id: preset_id_value,
                role: payload.role,
                item_type: payload.item_type,
                content: payload.content.clone(),
                is_enabled: payload.is_enabled,
                sort_order: payload.sort_order,
                created_at: now,
            })
            .collect();

        let conn = &mut get_connection();
        db_execute!(conn, {
            diesel::delete(
                preset_item::table.filter(preset_item::dsl::preset_id.eq(preset_id_value)),
            )
            .execute(conn)
            .map_err(|e| {
                BaseError::DatabaseFatal(Some(format!(
                    "Failed to clear items of preset {}: {}",
                    preset_id_value, e
                )))
            })?;

            let db_records: Vec<PresetItemDb> =
                records.iter().map(PresetItemDb::to_db).collect();
            diesel::insert_into(preset_item::table)
                .values(&db_records)
                .execute(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to insert items of preset {}: {}",
                        preset_id_value, e
                    )))
                })?;
            Ok(records)
        })
    }
}
