use std::fmt;
use std::str::FromStr;

use tokio::sync::mpsc;
use tracing::{Level, debug, error, info};
use tracing_subscriber::FmtSubscriber;

/// Severity of a leveled entry. Ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Log,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Log => "log",
            LogLevel::Error => "error",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            LogLevel::Debug => "Debug",
            LogLevel::Log => "Log  ",
            LogLevel::Error => "Error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "log" | "info" => Ok(LogLevel::Log),
            "error" => Ok(LogLevel::Error),
            other => Err(format!(
                "unknown verbosity `{}` (expected debug, log or error)",
                other
            )),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message on the shared agent channel.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Untyped error, printed regardless of verbosity.
    Error(String),
    Entry { level: LogLevel, message: String },
}

impl AgentEvent {
    pub fn is_visible_at(&self, min_level: LogLevel) -> bool {
        match self {
            AgentEvent::Error(_) => true,
            AgentEvent::Entry { level, .. } => *level >= min_level,
        }
    }
}

/// Cloneable producer side of the agent channel.
///
/// Sends never fail from the caller's point of view: once the event loop is
/// gone there is nobody left to read the output.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl EventSender {
    pub fn send(&self, event: AgentEvent) {
        let _ = self.tx.send(event);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(AgentEvent::Error(message.into()));
    }

    pub fn entry(&self, level: LogLevel, message: impl Into<String>) {
        self.send(AgentEvent::Entry {
            level,
            message: message.into(),
        });
    }

    pub fn log(&self, message: impl Into<String>) {
        self.entry(LogLevel::Log, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.entry(LogLevel::Debug, message);
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<AgentEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

pub fn init_tracing() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Prints one event if it passes the verbosity filter.
pub fn render(event: &AgentEvent, min_level: LogLevel) {
    if !event.is_visible_at(min_level) {
        return;
    }
    match event {
        AgentEvent::Error(message) => error!("{}: {}", LogLevel::Error.prefix(), message),
        AgentEvent::Entry { level, message } => match level {
            LogLevel::Debug => debug!("{}: {}", level.prefix(), message),
            LogLevel::Log => info!("{}: {}", level.prefix(), message),
            LogLevel::Error => error!("{}: {}", level.prefix(), message),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_filter_keeps_plain_errors() {
        let plain = AgentEvent::Error("boom".into());
        let debug = AgentEvent::Entry {
            level: LogLevel::Debug,
            message: "noise".into(),
        };
        let log = AgentEvent::Entry {
            level: LogLevel::Log,
            message: "hello".into(),
        };

        assert!(plain.is_visible_at(LogLevel::Error));
        assert!(!debug.is_visible_at(LogLevel::Log));
        assert!(log.is_visible_at(LogLevel::Log));
        assert!(!log.is_visible_at(LogLevel::Error));
        assert!(debug.is_visible_at(LogLevel::Debug));
    }

    #[test]
    fn parses_verbosity_names() {
        assert_eq!("DEBUG".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert_eq!("log".parse::<LogLevel>(), Ok(LogLevel::Log));
        assert_eq!("info".parse::<LogLevel>(), Ok(LogLevel::Log));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[tokio::test]
    async fn sender_delivers_in_order() {
        let (events, mut rx) = event_channel();
        events.log("one");
        events.error("two");

        assert_eq!(
            rx.recv().await,
            Some(AgentEvent::Entry {
                level: LogLevel::Log,
                message: "one".into()
            })
        );
        assert_eq!(rx.recv().await, Some(AgentEvent::Error("two".into())));
    }
}
