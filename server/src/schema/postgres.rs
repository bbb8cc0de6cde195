diesel::table! {
    account (id) {
        id -> Int8,
        name -> Text,
        created_at -> Int8,
    }
}

diesel::table! {
    preset (id) {
        id -> Int8,
        name -> Text,
        account_id -> Int8,
        is_enabled -> Bool,
        sort_order -> Int4,
        deleted_at -> Nullable<Int8>,
        created_at -> Int8,
        updated_at -> Int8,
    }
}

diesel::table! {
    use crate::schema::enum_def::{MessageRoleMapping, PresetItemTypeMapping};
    use diesel::sql_types::{Bool, Int4, Int8, Text};

    preset_item (id) {
        id -> Int8,
        preset_id -> Int8,
        role -> MessageRoleMapping,
        item_type -> PresetItemTypeMapping,
        content -> Text,
        is_enabled -> Bool,
        sort_order -> Int4,
        created_at -> Int8,
    }
}

diesel::table! {
    tenant_key (id) {
        id -> Int8,
        api_key -> Text,
        name -> Nullable<Text>,
        account_id -> Int8,
        preset_id -> Nullable<Int8>,
        apply_regex -> Bool,
        is_enabled -> Bool,
        deleted_at -> Nullable<Int8>,
        created_at -> Int8,
        updated_at -> Int8,
    }
}

diesel::table! {
    upstream_credential (id) {
        id -> Int8,
        secret -> Text,
        is_enabled -> Bool,
        usage_count -> Int8,
        error_count -> Int8,
        total_tokens -> Int8,
        last_status -> Text,
        last_used_at -> Nullable<Int8>,
        deleted_at -> Nullable<Int8>,
        created_at -> Int8,
        updated_at -> Int8,
    }
}

diesel::table! {
    use crate::schema::enum_def::RegexPhaseMapping;
    use diesel::sql_types::{Bool, Int4, Int8, Nullable, Text};

    regex_rule (id) {
        id -> Int8,
        name -> Text,
        pattern -> Text,
        replacement -> Text,
        phase -> RegexPhaseMapping,
        account_id -> Int8,
        preset_id -> Nullable<Int8>,
        is_enabled -> Bool,
        sort_order -> Int4,
        deleted_at -> Nullable<Int8>,
        created_at -> Int8,
        updated_at -> Int8,
    }
}

diesel::table! {
    use crate::schema::enum_def::LogStatusMapping;
    use diesel::sql_types::{Bool, Float8, Int4, Int8, Nullable, Text};

    request_log (id) {
        id -> Int8,
        tenant_key_id -> Nullable<Int8>,
        model_name -> Text,
        status_code -> Nullable<Int4>,
        status -> LogStatusMapping,
        latency -> Float8,
        ttft -> Float8,
        is_stream -> Bool,
        input_tokens -> Nullable<Int4>,
        output_tokens -> Nullable<Int4>,
        tokens_estimated -> Bool,
        created_at -> Int8,
    }
}

diesel::joinable!(tenant_key -> account (account_id));
diesel::joinable!(preset_item -> preset (preset_id));

diesel::allow_tables_to_appear_in_same_query!(account, tenant_key, preset, preset_item, regex_rule,);
