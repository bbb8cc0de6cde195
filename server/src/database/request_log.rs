use serde::Deserialize;

use super::{get_connection, DbResult, ListResult};
use crate::controller::BaseError;
use crate::schema::enum_def::LogStatus;
use crate::{db_execute, db_object};

db_object! {
    #[derive(Insertable, Queryable, Selectable, Identifiable, Debug)]
    #[diesel(table_name = request_log)]
    pub struct RequestLog {
        pub id: i64,
        pub tenant_key_id: Option<i64>,
        pub model_name: String,
        pub status_code: Option<i32>,
        pub status: LogStatus,
        pub latency: f64,
        pub ttft: f64,
        pub is_stream: bool,
        pub input_tokens: Option<i32>,
        pub output_tokens: Option<i32>,
        pub tokens_estimated: bool,
        pub created_at: i64,
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct RequestLogQueryPayload {
    pub tenant_key_id: Option<i64>,
    pub status: Option<LogStatus>,
    pub start_time: Option<i64>, // created_at >= start_time
    pub end_time: Option<i64>,   // created_at <= end_time
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub search: Option<String>,
}

impl RequestLog {
    /// The store's `append_log` operation. One row per completed request.
    pub fn insert(new_log: &RequestLog) -> DbResult<RequestLog> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let inserted = diesel::insert_into(request_log::table)
                .values(RequestLogDb::to_db(new_log))
                .returning(RequestLogDb::as_returning())
                .get_result::<RequestLogDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to insert request log: {}", e)))
                })?;
            Ok(inserted.from_db())
        })
    }

    /// Lists request logs with filtering and pagination.
    pub fn list(payload: RequestLogQueryPayload) -> DbResult<ListResult<RequestLog>> {
        let conn = &mut get_connection();
        let page_size = payload.page_size.unwrap_or(20);
        let page = payload.page.unwrap_or(1);
        let offset = (page - 1) * page_size;

        db_execute!(conn, {
            let mut query = request_log::table.into_boxed();
            let mut count_query = request_log::table.into_boxed();

            if let Some(val) = payload.tenant_key_id {
                query = query.filter(request_log::dsl::tenant_key_id.eq(val));
                count_query = count_query.filter(request_log::dsl::tenant_key_id.eq(val));
            }
            if let Some(val) = payload.status {
                query = query.filter(request_log::dsl::status.eq(val));
                count_query = count_query.filter(request_log::dsl::status.eq(val));
            }
            if let Some(search_term) = payload.search.as_ref() {
                if !search_term.is_empty() {
                    let pattern = format!("%{}%", search_term);
                    let search_filter = request_log::dsl::model_name.like(pattern);
                    query = query.filter(search_filter.clone());
                    count_query = count_query.filter(search_filter);
                }
            }
            if let Some(st_time) = payload.start_time {
                query = query.filter(request_log::dsl::created_at.ge(st_time));
                count_query = count_query.filter(request_log::dsl::created_at.ge(st_time));
            }
            if let Some(et_time) = payload.end_time {
                query = query.filter(request_log::dsl::created_at.le(et_time));
                count_query = count_query.filter(request_log::dsl::created_at.le(et_time));
            }

            let total = count_query
                .select(diesel::dsl::count_star())
                .first::<i64>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to count request logs: {}", e)))
                })?;

            let results_db = query
                .order(request_log::dsl::created_at.desc())
                .limit(page_size)
                .offset(offset)
                .select(RequestLogDb::as_select())
                .load::<RequestLogDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to list request logs: {}", e)))
                })?;

            let list = results_db.into_iter().map(|row| row.from_db()).collect();

            Ok(ListResult {
                total,
                page,
                page_size,
                list,
            })
        })
    }
}
