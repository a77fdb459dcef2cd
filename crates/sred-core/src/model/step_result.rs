use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Resultado de ejecutar el handler de un estado (o la ausencia de él).
/// `data` se fusiona en `localState` sobre éxito; `error` acompaña a los
/// fallos y dirige la rama `Failure` de las transiciones.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StepResult {
    pub success: bool,
    pub data: HashMap<String, Value>,
    pub error: Option<String>,
}

impl StepResult {
    pub fn success(data: HashMap<String, Value>) -> Self {
        Self { success: true, data, error: None }
    }

    pub fn success_empty() -> Self {
        Self { success: true, data: HashMap::new(), error: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self { success: false, data: HashMap::new(), error: Some(error.into()) }
    }
}
