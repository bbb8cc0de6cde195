use chrono::Utc;

use super::{get_connection, DbResult};
use crate::controller::BaseError;
use crate::utils::ID_GENERATOR;
use crate::{db_execute, db_object};

db_object! {
    #[derive(Queryable, Selectable, Identifiable, Insertable, Debug)]
    #[diesel(table_name = account)]
    pub struct Account {
        pub id: i64,
        pub name: String,
        pub created_at: i64,
    }
}

impl Account {
    pub fn create(name: &str) -> DbResult<Account> {
        let record = Account {
            id: ID_GENERATOR.generate_id(),
            name: name.to_string(),
            created_at: Utc::now().timestamp_millis(),
        };

        let conn = &mut get_connection();
        db_execute!(conn, {
            let inserted = diesel::insert_into(account::table)
                .values(AccountDb::to_db(&record))
                .returning(AccountDb::as_returning())
                .get_result::<AccountDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to create account: {}", e)))
                })?;
            Ok(inserted.from_db())
        })
    }

    pub fn get_by_id(id_value: i64) -> DbResult<Account> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let found = account::table
                .find(id_value)
                .select(AccountDb::as_select())
                .first::<AccountDb>(conn)
                .map_err(|e| match e {
                    diesel::result::Error::NotFound => BaseError::NotFound(Some(format!(
                        "Account with id {} not found",
                        id_value
                    ))),
                    _ => BaseError::DatabaseFatal(Some(format!(
                        "Error fetching account {}: {}",
                        id_value, e
                    ))),
                })?;
            Ok(found.from_db())
        })
    }

    pub fn list_all() -> DbResult<Vec<Account>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let rows = account::table
                .order(account::dsl::created_at.desc())
                .select(AccountDb::as_select())
                .load::<AccountDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to list accounts: {}", e)))
                })?;
            Ok(rows.into_iter().map(|row| row.from_db()).collect())
        })
    }
}
