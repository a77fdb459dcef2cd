//! Envoltorios temporales sobre `Event`. Consumidos por el event bus y el
//! scheduler (ver `sred-bus`); el core sólo define la forma del dato.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Event;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TemporalEvent {
    /// Procesado inline, en el hilo/tarea del llamador.
    Synchronous(Event),
    /// Publicado en un worker de fondo; el llamador recibe éxito inmediato.
    Asynchronous(Event),
    /// Publicado al bus quien lo recibe una vez alcanzado `scheduled_time`.
    Deferred { event: Event, scheduled_time: DateTime<Utc> },
    /// Republicado cada `period` hasta `end` (si existe), a partir de `start`.
    Periodic {
        event: Event,
        period: chrono::Duration,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        /// Última vez que este periódico fue publicado; `None` si aún no se
        /// ha disparado nunca.
        last_run: Option<DateTime<Utc>>,
    },
}

impl TemporalEvent {
    pub fn inner(&self) -> &Event {
        match self {
            TemporalEvent::Synchronous(e)
            | TemporalEvent::Asynchronous(e)
            | TemporalEvent::Deferred { event: e, .. }
            | TemporalEvent::Periodic { event: e, .. } => e,
        }
    }
}
