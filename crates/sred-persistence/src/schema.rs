//! Esquema Diesel para el layout lógico de §6: contexto por instancia más
//! tres logs append-only (eventos, historial de estado, snapshots).

diesel::table! {
    state_contexts (id) {
        id -> Text,
        current_state_id -> Text,
        created_at -> Timestamptz,
        last_updated_at -> Timestamptz,
        local_state -> Jsonb,
        global_state -> Jsonb,
        metadata -> Jsonb,
    }
}

diesel::table! {
    event_history (auto_id) {
        auto_id -> BigInt,
        context_id -> Text,
        event_id -> Text,
        event_type -> Text,
        event_name -> Text,
        event_data -> Jsonb,
        timestamp -> Timestamptz,
    }
}

diesel::table! {
    state_history (auto_id) {
        auto_id -> BigInt,
        context_id -> Text,
        from_state_id -> Nullable<Text>,
        to_state_id -> Text,
        event_id -> Nullable<Text>,
        timestamp -> Timestamptz,
        reason -> Nullable<Text>,
    }
}

diesel::table! {
    state_snapshots (snapshot_id) {
        snapshot_id -> Text,
        context_id -> Text,
        timestamp -> Timestamptz,
        description -> Nullable<Text>,
        local_state -> Jsonb,
        global_state -> Jsonb,
        snapshot_metadata -> Jsonb,
        current_state_id -> Text,
        context_created_at -> Timestamptz,
    }
}

diesel::joinable!(event_history -> state_contexts (context_id));
diesel::joinable!(state_history -> state_contexts (context_id));
diesel::joinable!(state_snapshots -> state_contexts (context_id));

diesel::allow_tables_to_appear_in_same_query!(state_contexts, event_history, state_history, state_snapshots,);
