//! Tracing setup for warden binaries.
//!
//! Logs always go to stderr, in both text and JSON form. Stdout belongs to
//! command results: the CLI prints tool output and `--json` documents there,
//! and a log line on the same stream would corrupt them for the next
//! program in a pipe.

use tracing::{Level, Subscriber};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Install the global subscriber. `RUST_LOG` wins over `level`; only the
/// first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    build_subscriber(filter, json, std::io::stderr).try_init().ok();
}

/// Subscriber writing text or JSON lines to `writer`.
pub fn build_subscriber<W>(
    filter: EnvFilter,
    json: bool,
    writer: W,
) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let output = fmt::layer().with_target(false).with_writer(writer);
    let output: Box<dyn Layer<Registry> + Send + Sync> = if json {
        output.json().boxed()
    } else {
        output.boxed()
    };
    tracing_subscriber::registry().with(output).with(filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing(false, Level::WARN);
        init_tracing(true, Level::DEBUG);
    }

    #[test]
    fn test_json_lines_go_to_the_given_writer() {
        let capture = Capture::default();
        let sink = capture.clone();
        let subscriber = build_subscriber(EnvFilter::new("info"), true, move || sink.clone());

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(event = "tool.dispatched", tool_id = "echo", "dispatched");
            tracing::debug!("filtered out");
        });

        let text = capture.text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        let line: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(line["fields"]["event"], "tool.dispatched");
    }

    #[test]
    fn test_text_lines_go_to_the_given_writer() {
        let capture = Capture::default();
        let sink = capture.clone();
        let subscriber = build_subscriber(EnvFilter::new("warn"), false, move || sink.clone());

        tracing::subscriber::with_default(subscriber, || tracing::warn!("restart refused"));

        assert!(capture.text().contains("restart refused"));
    }
}
