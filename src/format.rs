//! Textual views of a trace
//!
//! The raw view pairs every line with its virtual-clock timestamp; the
//! narrated view reads like someone watching the console, marking each
//! pause with a `(N sec)` line.

use crate::interpreter::Trace;

/// One `[timestamp] text` line per event.
pub fn raw_view(trace: &Trace) -> String {
    trace
        .events
        .iter()
        .map(|event| format!("[{}] {}", event.at, event.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The texts in order, with a `(N sec)` line wherever the clock moved
/// between one event and the next.
pub fn narrated_view(trace: &Trace) -> String {
    let mut lines = Vec::new();
    let mut previous = None;
    for event in &trace.events {
        if let Some(at) = previous {
            if event.at > at {
                lines.push(gap(event.at - at));
            }
        }
        lines.push(event.text.clone());
        previous = Some(event.at);
    }
    lines.join("\n")
}

fn gap(millis: u64) -> String {
    format!("({} sec)", millis as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::TraceEvent;

    fn trace(events: &[(u64, &str)]) -> Trace {
        Trace {
            events: events
                .iter()
                .map(|&(at, text)| TraceEvent {
                    at,
                    text: text.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_raw_view_tags_every_line_with_its_timestamp() {
        let trace = trace(&[(0, "A"), (1000, "B"), (1000, "(done)")]);
        assert_eq!(raw_view(&trace), "[0] A\n[1000] B\n[1000] (done)");
    }

    #[test]
    fn test_narrated_view_marks_each_pause() {
        let trace = trace(&[(0, "A"), (1000, "B"), (1000, "(done)")]);
        assert_eq!(narrated_view(&trace), "A\n(1 sec)\nB\n(done)");
    }

    #[test]
    fn test_fractional_pauses_read_in_seconds() {
        let trace = trace(&[(0, "A"), (1500, "B")]);
        assert_eq!(narrated_view(&trace), "A\n(1.5 sec)\nB");
    }

    #[test]
    fn test_a_pause_before_the_first_line_is_not_narrated() {
        let trace = trace(&[(2000, "A")]);
        assert_eq!(narrated_view(&trace), "A");
    }

    #[test]
    fn test_empty_traces_render_as_nothing() {
        let trace = trace(&[]);
        assert_eq!(raw_view(&trace), "");
        assert_eq!(narrated_view(&trace), "");
    }
}
