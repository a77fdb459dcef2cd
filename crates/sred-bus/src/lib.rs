//! sred-bus: entrega de eventos desacoplada del executor (§4.5) y el
//! scheduler temporal que vence entradas diferidas/periódicas (§4.6).

mod bus;
mod error;
mod filter;
mod scheduler;

pub use bus::{BusStats, EventBus, Listener, DEFAULT_DELIVERY_TIMEOUT};
pub use error::EventBusError;
pub use filter::{EventFilter, PredicateFilter, PriorityFloorFilter, TypeSetFilter};
pub use scheduler::TemporalScheduler;
