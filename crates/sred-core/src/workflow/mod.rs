//! Modelo de workflow: estados, transiciones y configuración de flujo, más el
//! builder que produce una `WorkflowFlow` validada.
//!
//! Colapsa los grafos de interfaces cíclicas (estado ↔ transición ↔ contexto)
//! de fuentes orientadas a objetos en tablas planas indexadas por id: los
//! estados y transiciones sólo se referencian entre sí por id, nunca por
//! referencia propietaria, lo que mantiene el workflow serializable.

mod builder;
mod dto;
mod flow;
mod state;
mod transition;

pub use builder::WorkflowBuilder;
pub use dto::{
    builder_from_definition, BranchConfigDto, ConditionDto, FlowConfigDto, FunctionBindingDto,
    ParallelConfigDto, PredicateRegistry, StateDto, TimeoutActionDto, TransitionDto, WorkflowDefinitionDto,
};
pub use flow::{FlowConfig, WorkflowFlow};
pub use state::{
    BranchConfiguration, ErrorStrategy, ExecutionMode, ParallelConfiguration, StateDefinition,
    StateType, TimeoutAction, WaitStrategy,
};
pub use transition::{Condition, DecisionContext, TransitionDefinition};
