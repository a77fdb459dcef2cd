//! Identificadores neutrales. Se modelan como alias de `String` (en vez de
//! newtypes envolventes) para que los objetos producidos por parsers
//! externos (DSL/XML/YAML/JSON) se puedan deserializar directamente sin una
//! capa de conversión adicional.

/// Identificador de una definición de workflow dentro de un proceso.
pub type WorkflowId = String;
/// Identificador de una instancia en ejecución.
pub type InstanceId = String;
/// Identificador de estado, único dentro de un workflow.
pub type StateId = String;
/// Identificador de evento, único a nivel de proceso.
pub type EventId = String;
