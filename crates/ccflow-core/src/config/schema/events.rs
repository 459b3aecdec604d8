use super::{ConfigSchemaError, Validate};
use crate::ops::event::EventSettings;
use serde::{Deserialize, Serialize};

///
/// Defaults
///

mod defaults {
    pub const fn listener_buffer() -> usize {
        100
    }

    pub const fn stream_capacity() -> usize {
        256
    }

    pub const fn tx_queue_capacity() -> usize {
        100
    }

    pub const fn tx_status_cache() -> usize {
        1024
    }
}

pub const MAX_EVENT_BUFFER: usize = 65_536;

///
/// EventsConfig
///

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EventsConfig {
    #[serde(default = "defaults::listener_buffer")]
    pub listener_buffer: usize,

    #[serde(default = "defaults::stream_capacity")]
    pub stream_capacity: usize,

    #[serde(default = "defaults::tx_queue_capacity")]
    pub tx_queue_capacity: usize,

    #[serde(default = "defaults::tx_status_cache")]
    pub tx_status_cache: usize,
}

impl EventsConfig {
    #[must_use]
    pub const fn settings(&self) -> EventSettings {
        EventSettings {
            listener_buffer: self.listener_buffer,
            stream_capacity: self.stream_capacity,
            tx_status_cache: self.tx_status_cache,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            listener_buffer: defaults::listener_buffer(),
            stream_capacity: defaults::stream_capacity(),
            tx_queue_capacity: defaults::tx_queue_capacity(),
            tx_status_cache: defaults::tx_status_cache(),
        }
    }
}

impl Validate for EventsConfig {
    fn validate(&self) -> Result<(), ConfigSchemaError> {
        for (field, value) in [
            ("listener_buffer", self.listener_buffer),
            ("stream_capacity", self.stream_capacity),
            ("tx_queue_capacity", self.tx_queue_capacity),
            ("tx_status_cache", self.tx_status_cache),
        ] {
            if value == 0 || value > MAX_EVENT_BUFFER {
                return Err(ConfigSchemaError::ValidationError(format!(
                    "events.{field} must be between 1 and {MAX_EVENT_BUFFER}"
                )));
            }
        }

        Ok(())
    }
}
