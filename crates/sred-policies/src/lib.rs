//! sred-policies: el punto de enchufe advisory para selección de transición.
//!
//! El núcleo de orquestación ya decide de forma determinista (máxima
//! prioridad, empate por orden de declaración); una política aquí es
//! estrictamente *advisory*: puede reordenar o acotar los candidatos antes
//! de esa decisión, pero el orquestador cae al comportamiento declarado si
//! no hay política configurada o si la política no opina (lista vacía). No
//! reimplementa un motor de inferencia: es la interfaz que uno conectaría.

use sred_core::hashing::{hash_str, to_canonical_json};
use sred_core::model::{Event, StateContext};
use sred_core::workflow::TransitionDefinition;
use serde::{Deserialize, Serialize};

/// Una transición candidata, ya resuelta contra `(currentState, event.type)`
/// por el llamador, junto con la prioridad declarada en el flujo.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CandidateTransition {
    pub to_state_id: String,
    pub declared_priority: i32,
    pub declaration_order: usize,
}

impl CandidateTransition {
    pub fn from_declared(transitions: &[TransitionDefinition]) -> Vec<Self> {
        transitions
            .iter()
            .enumerate()
            .map(|(order, t)| Self { to_state_id: t.to.clone(), declared_priority: t.priority, declaration_order: order })
            .collect()
    }
}

/// Entrada de una política: todo lo que puede necesitar para opinar sin
/// acoplarse al executor.
pub struct PolicyInput<'a> {
    pub current_state_id: &'a str,
    pub event: &'a Event,
    pub context: &'a StateContext,
    pub candidates: &'a [CandidateTransition],
}

/// Decisión tomada por una política, con el mismo espíritu de auditabilidad
/// que el resto del sistema: id estable, hash de parámetros, racional
/// explícito.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PolicyDecision {
    pub policy_id: String,
    pub params_hash: String,
    pub ranked: Vec<CandidateTransition>,
    pub rationale: String,
}

/// Contrato de una política de selección de transición. `rank` nunca falla:
/// una política que no puede opinar devuelve `None`, y el orquestador cae al
/// comportamiento declarado (máxima prioridad, empate por orden de
/// declaración).
pub trait TransitionSelectionPolicy: Send + Sync {
    fn id(&self) -> &'static str;
    fn rank(&self, input: &PolicyInput) -> Option<PolicyDecision>;
}

/// Selección declarada por defecto: ordena por prioridad descendente y deja
/// los empates en el orden de declaración original. No es advisory en el
/// sentido estricto -- existe para que el orquestador tenga un fallback
/// concreto sin tener que ramificar sobre "política ausente" en cada sitio
/// de llamada.
pub struct DeclaredPriorityPolicy;

impl DeclaredPriorityPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DeclaredPriorityPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl TransitionSelectionPolicy for DeclaredPriorityPolicy {
    fn id(&self) -> &'static str {
        "declared_priority"
    }

    fn rank(&self, input: &PolicyInput) -> Option<PolicyDecision> {
        let mut ranked = input.candidates.to_vec();
        ranked.sort_by(|a, b| b.declared_priority.cmp(&a.declared_priority).then(a.declaration_order.cmp(&b.declaration_order)));

        let params_hash = hash_str(&to_canonical_json(&serde_json::json!({ "policy": self.id() })));
        Some(PolicyDecision {
            policy_id: self.id().into(),
            params_hash,
            ranked,
            rationale: "max priority, ties by declaration order".into(),
        })
    }
}

/// Resuelve la transición ganadora según una política opcional, cayendo al
/// fallback declarado si la política está ausente o no opina.
pub fn select_transition(
    input: &PolicyInput,
    policy: Option<&dyn TransitionSelectionPolicy>,
) -> Option<CandidateTransition> {
    let decision = policy
        .and_then(|p| p.rank(input))
        .or_else(|| DeclaredPriorityPolicy::new().rank(input));
    decision.and_then(|d| d.ranked.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn event() -> Event {
        Event::new("order", "submit", HashMap::new())
    }

    fn candidates() -> Vec<CandidateTransition> {
        vec![
            CandidateTransition { to_state_id: "low".into(), declared_priority: 1, declaration_order: 0 },
            CandidateTransition { to_state_id: "high".into(), declared_priority: 10, declaration_order: 1 },
            CandidateTransition { to_state_id: "tied".into(), declared_priority: 10, declaration_order: 2 },
        ]
    }

    #[test]
    fn declared_priority_policy_picks_max_priority_then_declaration_order() {
        let event = event();
        let context = StateContext::new("inst-1".to_string(), "start");
        let candidates = candidates();
        let input = PolicyInput { current_state_id: "start", event: &event, context: &context, candidates: &candidates };

        let decision = DeclaredPriorityPolicy::new().rank(&input).unwrap();
        assert_eq!(decision.ranked[0].to_state_id, "high");
        assert_eq!(decision.ranked[1].to_state_id, "tied");
    }

    #[test]
    fn select_transition_falls_back_to_declared_priority_without_a_policy() {
        let event = event();
        let context = StateContext::new("inst-1".to_string(), "start");
        let candidates = candidates();
        let input = PolicyInput { current_state_id: "start", event: &event, context: &context, candidates: &candidates };

        let winner = select_transition(&input, None).unwrap();
        assert_eq!(winner.to_state_id, "high");
    }

    struct AlwaysPrefersTied;
    impl TransitionSelectionPolicy for AlwaysPrefersTied {
        fn id(&self) -> &'static str {
            "always_tied"
        }
        fn rank(&self, input: &PolicyInput) -> Option<PolicyDecision> {
            let ranked = input.candidates.iter().filter(|c| c.to_state_id == "tied").cloned().collect::<Vec<_>>();
            if ranked.is_empty() {
                return None;
            }
            Some(PolicyDecision { policy_id: self.id().into(), params_hash: String::new(), ranked, rationale: "forced".into() })
        }
    }

    #[test]
    fn a_configured_policy_overrides_the_declared_fallback() {
        let event = event();
        let context = StateContext::new("inst-1".to_string(), "start");
        let candidates = candidates();
        let input = PolicyInput { current_state_id: "start", event: &event, context: &context, candidates: &candidates };

        let winner = select_transition(&input, Some(&AlwaysPrefersTied)).unwrap();
        assert_eq!(winner.to_state_id, "tied");
    }

    #[test]
    fn candidate_transitions_preserve_declaration_order_from_the_flow() {
        use sred_core::workflow::{Condition, TransitionDefinition};
        let declared = vec![
            TransitionDefinition::new("start", "a", Condition::Success, 5),
            TransitionDefinition::new("start", "b", Condition::Success, 5),
        ];
        let candidates = CandidateTransition::from_declared(&declared);
        assert_eq!(candidates[0].declaration_order, 0);
        assert_eq!(candidates[1].declaration_order, 1);
    }
}
