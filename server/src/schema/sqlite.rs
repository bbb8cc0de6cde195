diesel::table! {
    account (id) {
        id -> BigInt,
        name -> Text,
        created_at -> BigInt,
    }
}

diesel::table! {
    preset (id) {
        id -> BigInt,
        name -> Text,
        account_id -> BigInt,
        is_enabled -> Bool,
        sort_order -> Integer,
        deleted_at -> Nullable<BigInt>,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::table! {
    use crate::schema::enum_def::{MessageRoleMapping, PresetItemTypeMapping};
    use diesel::sql_types::{BigInt, Bool, Integer, Text};

    preset_item (id) {
        id -> BigInt,
        preset_id -> BigInt,
        role -> MessageRoleMapping,
        item_type -> PresetItemTypeMapping,
        content -> Text,
        is_enabled -> Bool,
        sort_order -> Integer,
        created_at -> BigInt,
    }
}

diesel::table! {
    tenant_key (id) {
        id -> BigInt,
        api_key -> Text,
        name -> Nullable<Text>,
        account_id -> BigInt,
        preset_id -> Nullable<BigInt>,
        apply_regex -> Bool,
        is_enabled -> Bool,
        deleted_at -> Nullable<BigInt>,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::table! {
    upstream_credential (id) {
        id -> BigInt,
        secret -> Text,
        is_enabled -> Bool,
        usage_count -> BigInt,
        error_count -> BigInt,
        total_tokens -> BigInt,
        last_status -> Text,
        last_used_at -> Nullable<BigInt>,
        deleted_at -> Nullable<BigInt>,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::table! {
    use crate::schema::enum_def::RegexPhaseMapping;
    use diesel::sql_types::{BigInt, Bool, Integer, Nullable, Text};

    regex_rule (id) {
        id -> BigInt,
        name -> Text,
        pattern -> Text,
        replacement -> Text,
        phase -> RegexPhaseMapping,
        account_id -> BigInt,
        preset_id -> Nullable<BigInt>,
        is_enabled -> Bool,
        sort_order -> Integer,
        deleted_at -> Nullable<BigInt>,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::table! {
    use crate::schema::enum_def::LogStatusMapping;
    use diesel::sql_types::{BigInt, Bool, Double, Integer, Nullable, Text};

    request_log (id) {
        id -> BigInt,
        tenant_key_id -> Nullable<BigInt>,
        model_name -> Text,
        status_code -> Nullable<Integer>,
        status -> LogStatusMapping,
        latency -> Double,
        ttft -> Double,
        is_stream -> Bool,
        input_tokens -> Nullable<Integer>,
        output_tokens -> Nullable<Integer>,
        tokens_estimated -> Bool,
        created_at -> BigInt,
    }
}

diesel::joinable!(tenant_key -> account (account_id));
diesel::joinable!(preset_item -> preset (preset_id));

diesel::allow_tables_to_appear_in_same_query!(account, tenant_key, preset, preset_item, regex_rule,);
