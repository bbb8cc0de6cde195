use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, DbEnum, Default)]
#[PgType = "message_role_enum"]
#[DbValueStyle = "SCREAMING_SNAKE_CASE"]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    #[default]
    User,
    Assistant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, DbEnum, Default)]
#[PgType = "preset_item_type_enum"]
#[DbValueStyle = "SCREAMING_SNAKE_CASE"]
#[serde(rename_all = "snake_case")]
pub enum PresetItemType {
    #[default]
    Normal,
    UserInput,
    History,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, DbEnum, Default)]
#[PgType = "regex_phase_enum"]
#[DbValueStyle = "SCREAMING_SNAKE_CASE"]
#[serde(rename_all = "snake_case")]
pub enum RegexPhase {
    #[default]
    Pre,
    Post,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, DbEnum, Default)]
#[PgType = "log_status_enum"]
#[DbValueStyle = "SCREAMING_SNAKE_CASE"]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    #[default]
    Ok,
    Error,
}
