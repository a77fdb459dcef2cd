use serde::{Deserialize, Serialize};

/// Prioridad de un evento. El orden de la enumeración es también el orden
/// natural (`Lowest < Low < Normal < High < Highest`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Lowest,
    Low,
    Normal,
    High,
    Highest,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}
