//! Fingerprints de dominio construidos sobre el hashing canónico: identidad
//! de contenido para `StateContext`/`StateSnapshot`, usada por la capa de
//! persistencia para deduplicar snapshots idénticos (§4.5/§4.6).

use serde_json::json;

use crate::model::StateContext;

use super::hash_value;

/// Huella estable de un contexto: depende del estado actual y de ambos
/// mapas de estado, no de `recentEvents`/`metadata` (que incluyen
/// timestamps y por lo tanto nunca coincidirían entre ejecuciones
/// idénticas en distintos instantes).
pub fn fingerprint_context(context: &StateContext) -> String {
    let shape = json!({
        "currentStateId": context.current_state_id,
        "localState": context.local_state,
        "globalState": context.global_state,
    });
    hash_value(&shape)
}
