use derive_more::Display;
use serde::{Deserialize, Serialize};

///
/// Level
///

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Display, Serialize, Deserialize)]
pub enum Level {
    Debug, // least severe
    Info,
    Ok,
    Warn,
    Error, // most severe
}

///
/// Topic
///

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[remain::sorted]
pub enum Topic {
    Config,
    Dispatch,
    Event,
    Execute,
    Lifecycle,
    Package,
    Policy,
}

#[macro_export]
macro_rules! log {
    // =========================================
    // (1) With topic (normal + trailing comma)
    // =========================================
    ($topic:expr, $level:ident, $fmt:expr $(, $arg:expr)* $(,)?) => {{
        $crate::log!(@inner Some($topic), $crate::log::Level::$level, $fmt $(, $arg)*);
    }};

    // =========================================
    // (2) No topic (normal + trailing comma)
    // =========================================
    ($level:ident, $fmt:expr $(, $arg:expr)* $(,)?) => {{
        $crate::log!(@inner None, $crate::log::Level::$level, $fmt $(, $arg)*);
    }};

    // =========================================
    // INTERNAL
    // =========================================
    (@inner $topic:expr, $level:expr, $fmt:expr $(, $arg:expr)*) => {{
        let topic_opt: Option<$crate::log::Topic> = $topic;
        let message = format!($fmt $(, $arg)*);

        $crate::log::__emit(topic_opt, $level, &message);
    }};
}

///
/// Helpers
///

#[doc(hidden)]
pub fn __emit(topic: Option<Topic>, level: Level, message: &str) {
    let topic = topic.map_or_else(String::new, |t| t.to_string());

    match level {
        Level::Debug => tracing::debug!(topic = %topic, "{message}"),
        Level::Info => tracing::info!(topic = %topic, "{message}"),
        Level::Ok => tracing::info!(topic = %topic, ok = true, "{message}"),
        Level::Warn => tracing::warn!(topic = %topic, "{message}"),
        Level::Error => tracing::error!(topic = %topic, "{message}"),
    }
}
