//! An optional, append-only graph-event sink (§4.6): the core emits `(node,
//! attrs)` and `(src, dst, attrs)` events as it loads releases and resolves
//! role manifests; a failure to write one is logged and swallowed, never
//! propagated, since the recording is diagnostic, not load-bearing.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

pub type Attrs = BTreeMap<String, String>;

/// Receives graph events. Implementations must not panic on write failure --
/// `record_node`/`record_edge` have no `Result` return precisely so a caller
/// doesn't have to decide what to do with a recording failure each time.
pub trait GraphSink: Send + Sync {
    fn record_node(&self, id: &str, attrs: &Attrs);
    fn record_edge(&self, src: &str, dst: &str, attrs: &Attrs);
}

/// Discards every event. The default when no `--graph-out` path is given.
pub struct NullGraphSink;

impl GraphSink for NullGraphSink {
    fn record_node(&self, _id: &str, _attrs: &Attrs) {}
    fn record_edge(&self, _src: &str, _dst: &str, _attrs: &Attrs) {}
}

#[derive(serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Event<'a> {
    Node { id: &'a str, attrs: &'a Attrs },
    Edge { src: &'a str, dst: &'a str, attrs: &'a Attrs },
}

/// Appends one JSON object per line to a file, flushing after each write so
/// a crash mid-run leaves a truncated-but-parseable log rather than a
/// corrupted last line.
pub struct JsonlGraphSink {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl JsonlGraphSink {
    pub fn create(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    fn append(&self, event: &Event<'_>) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(source) => {
                warn!(%source, path = %self.path.display(), "failed to serialize graph event, dropping it");
                return;
            }
        };
        let mut file = self.file.lock().expect("graph recorder lock poisoned");
        if let Err(source) = writeln!(file, "{line}").and_then(|_| file.flush()) {
            warn!(%source, path = %self.path.display(), "failed to append graph event, dropping it");
        }
    }
}

impl GraphSink for JsonlGraphSink {
    fn record_node(&self, id: &str, attrs: &Attrs) {
        self.append(&Event::Node { id, attrs });
    }

    fn record_edge(&self, src: &str, dst: &str, attrs: &Attrs) {
        self.append(&Event::Edge { src, dst, attrs });
    }
}

pub fn read_events(path: &Path) -> std::io::Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents.lines().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_json_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.jsonl");
        let sink = JsonlGraphSink::create(&path).unwrap();

        let mut attrs = Attrs::new();
        attrs.insert("fingerprint".to_string(), "abc123".to_string());
        sink.record_node("consul", &attrs);
        sink.record_edge("consul", "go-1.4", &Attrs::new());

        let lines = read_events(&path).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"kind\":\"node\""));
        assert!(lines[1].contains("\"kind\":\"edge\""));
    }

    #[test]
    fn null_sink_accepts_events_without_writing_anything() {
        let sink = NullGraphSink;
        sink.record_node("x", &Attrs::new());
        sink.record_edge("x", "y", &Attrs::new());
    }
}
