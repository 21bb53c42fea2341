//! Tracing setup and the user activity log.
//!
//! Two sinks share one subscriber:
//!   - the console, filtered by `RUST_LOG` (default `info`)
//!   - the activity log file, which only receives events with target
//!     [`ACTIVITY_TARGET`], one line per user action

use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing::{info, Event, Subscriber};
use tracing_subscriber::filter::{filter_fn, EnvFilter};
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::Layer;

use crate::types::{Message, User};

/// Tracing target routed to the activity log file.
pub const ACTIVITY_TARGET: &str = "activity";

const ACTIVITY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to open activity log {path}: {source}")]
    ActivityLog {
        path: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Init(#[from] TryInitError),
}

/// Install the global subscriber. Call once, early in `main`.
pub fn init(activity_log: &Path) -> Result<(), LoggingError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(activity_log)
        .map_err(|source| LoggingError::ActivityLog {
            path: activity_log.display().to_string(),
            source,
        })?;

    let console = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );

    let activity = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .event_format(ActivityFormat)
        .with_filter(filter_fn(|meta| meta.target() == ACTIVITY_TARGET));

    tracing_subscriber::registry()
        .with(console)
        .with(activity)
        .try_init()?;

    Ok(())
}

/// `2025-01-31 18:04:12 | <message>`
struct ActivityFormat;

impl<S, N> FormatEvent<S, N> for ActivityFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(
            writer,
            "{} | ",
            chrono::Local::now().format(ACTIVITY_TIME_FORMAT)
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

// ---------------------------------------------------------------------------
// Activity entries
// ---------------------------------------------------------------------------

/// One user action, as written to the activity log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEntry {
    pub user_name: String,
    pub user_id: String,
    pub action: String,
    /// `(content, message_id)` of the message the action targeted.
    pub target: Option<(String, String)>,
}

impl ActivityEntry {
    pub fn new(user: &User, action: impl Into<String>, target: Option<&Message>) -> Self {
        Self {
            user_name: user.username.clone(),
            user_id: user.id.clone(),
            action: action.into(),
            target: target.map(|m| (m.content.clone(), m.id.clone())),
        }
    }
}

impl fmt::Display for ActivityEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "User: {} ({}) | Action: {} | Target Message: ",
            self.user_name, self.user_id, self.action
        )?;
        match &self.target {
            Some((content, id)) => write!(f, "{content:?} ({id})"),
            None => f.write_str("N/A"),
        }
    }
}

/// Record a user action in the activity log.
pub fn log_activity(entry: &ActivityEntry) {
    info!(target: ACTIVITY_TARGET, "{entry}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user() -> User {
        serde_json::from_value(json!({
            "id": "80351110224678912",
            "username": "nelly",
            "discriminator": "0",
            "avatar": null,
            "global_name": "Nelly"
        }))
        .expect("valid user JSON")
    }

    fn message(content: &str) -> Message {
        serde_json::from_value(json!({
            "id": "1100000000000000001",
            "channel_id": "1000",
            "author": {
                "id": "1",
                "username": "pepa",
                "discriminator": "0",
                "avatar": null
            },
            "content": content,
            "timestamp": "2025-01-31T18:04:12.000000+00:00"
        }))
        .expect("valid message JSON")
    }

    #[test]
    fn entry_with_target_quotes_content() {
        let msg = message("ban user xX_Destroyer_Xx pls");
        let entry = ActivityEntry::new(&user(), "De-idiotize", Some(&msg));
        assert_eq!(
            entry.to_string(),
            "User: nelly (80351110224678912) | Action: De-idiotize | \
             Target Message: \"ban user xX_Destroyer_Xx pls\" (1100000000000000001)"
        );
    }

    #[test]
    fn entry_escapes_newlines_in_content() {
        let msg = message("line one\nline two");
        let line = ActivityEntry::new(&user(), "De-idiotize", Some(&msg)).to_string();
        assert!(line.contains(r#""line one\nline two""#));
        assert!(!line.contains('\n'), "activity lines must stay single-line");
    }

    #[test]
    fn entry_without_target_says_not_applicable() {
        let entry = ActivityEntry::new(&user(), "/restart", None);
        assert_eq!(
            entry.to_string(),
            "User: nelly (80351110224678912) | Action: /restart | Target Message: N/A"
        );
    }
}
