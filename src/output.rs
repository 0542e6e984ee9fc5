use crate::watcher::event::NormalizedEvent;

/// How `dirmon watch` prints events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventFormat {
    /// `<kind> <path> (flags 0x...)`, one event per line.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Render a single event as one output line (without the trailing newline).
///
/// Returns `None` when the event cannot be rendered, e.g. a non-UTF-8 path in JSON.
pub fn format_event(event: &NormalizedEvent, format: EventFormat) -> Option<String> {
    match format {
        EventFormat::Compact => Some(format!(
            "{:<8} {} (flags {:#x})",
            event.kind.as_str(),
            event.path.display(),
            event.raw_flags
        )),
        EventFormat::Json => match serde_json::to_string(event) {
            Ok(line) => Some(line),
            Err(err) => {
                tracing::warn!(
                    path = %event.path.display(),
                    error = %err,
                    "cannot serialize event"
                );
                None
            }
        },
    }
}
