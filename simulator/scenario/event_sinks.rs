// Driver Event Sinks

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use hc_sim::{Event, EventCategory, EventSink, SignalKind, SimTick};

use super::config::LoggingConfig;

// ============================================================================
// Watch Filter
// ============================================================================

/// Forwards the events a scenario asked to see.
pub struct WatchSink {
    all: bool,
    nodes: HashSet<String>,
    signals: Vec<SignalKind>,
    special: HashSet<String>,
    next: Box<dyn EventSink>,
}

impl WatchSink {
    pub fn new(logging: &LoggingConfig, next: Box<dyn EventSink>) -> Self {
        let signals = logging
            .signals
            .iter()
            .filter_map(|name| {
                let kind = SignalKind::from_name(name);
                if kind.is_none() {
                    log::warn!("ignoring unknown signal watch {:?}", name);
                }
                kind
            })
            .collect();

        Self {
            all: logging.all,
            nodes: logging.nodes.iter().cloned().collect(),
            signals,
            special: logging.special.iter().cloned().collect(),
            next,
        }
    }

    fn watches(&self, origin: &str, event: &Event) -> bool {
        if self.all || self.nodes.contains(origin) {
            return true;
        }
        match event.category() {
            EventCategory::Regular => false,
            EventCategory::Signal(kind) => self.signals.contains(&kind),
            EventCategory::Special(name) => self.special.contains(name),
        }
    }
}

impl EventSink for WatchSink {
    fn log(&mut self, tick: SimTick, origin: &str, event: Event) {
        if self.watches(origin, &event) {
            self.next.log(tick, origin, event);
        }
    }
}

// ============================================================================
// Transcript Comparison
// ============================================================================

/// Running result of a line-by-line transcript comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptReport {
    pub expected: usize,
    pub compared: usize,
    pub matched: usize,
    pub first_mismatch: Option<(usize, String, String)>,
}

impl TranscriptReport {
    /// Every expected line was produced, in order, and nothing else.
    pub fn success(&self) -> bool {
        self.matched == self.expected && self.compared == self.expected
    }

    fn total(&self) -> usize {
        self.expected.max(self.compared)
    }
}

impl fmt::Display for TranscriptReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success() {
            write!(f, "SUCCESS {}/{}", self.matched, self.total())
        } else {
            write!(f, "FAIL {}/{}", self.matched, self.total())
        }
    }
}

/// Compares every rendered line with a reference transcript, then passes the
/// event on.
pub struct TranscriptSink {
    expected: Vec<String>,
    report: Rc<RefCell<TranscriptReport>>,
    next: Box<dyn EventSink>,
}

impl TranscriptSink {
    pub fn new(reference: &str, next: Box<dyn EventSink>) -> Self {
        let expected: Vec<String> = reference
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        let report = TranscriptReport {
            expected: expected.len(),
            ..Default::default()
        };
        Self {
            expected,
            report: Rc::new(RefCell::new(report)),
            next,
        }
    }

    /// Handle that stays readable after the sink moved into the network.
    pub fn report(&self) -> Rc<RefCell<TranscriptReport>> {
        self.report.clone()
    }
}

impl EventSink for TranscriptSink {
    fn log(&mut self, tick: SimTick, origin: &str, event: Event) {
        let line = event.line(tick, origin);
        {
            let mut report = self.report.borrow_mut();
            let index = report.compared;
            report.compared += 1;
            match self.expected.get(index) {
                Some(expected) if *expected == line => report.matched += 1,
                other => {
                    if report.first_mismatch.is_none() {
                        let expected = other.cloned().unwrap_or_default();
                        report.first_mismatch = Some((index + 1, expected, line));
                    }
                }
            }
        }
        self.next.log(tick, origin, event);
    }
}

// ============================================================================
// Recording
// ============================================================================

/// Keeps the rendered lines so the driver can write a reference transcript.
pub struct RecordingSink {
    lines: Rc<RefCell<Vec<String>>>,
    next: Box<dyn EventSink>,
}

impl RecordingSink {
    pub fn new(next: Box<dyn EventSink>) -> Self {
        Self {
            lines: Rc::new(RefCell::new(Vec::new())),
            next,
        }
    }

    pub fn lines(&self) -> Rc<RefCell<Vec<String>>> {
        self.lines.clone()
    }
}

impl EventSink for RecordingSink {
    fn log(&mut self, tick: SimTick, origin: &str, event: Event) {
        self.lines.borrow_mut().push(event.line(tick, origin));
        self.next.log(tick, origin, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hc_sim::{CollectorSink, NoOpSink};

    struct Shared(Rc<RefCell<CollectorSink>>);

    impl EventSink for Shared {
        fn log(&mut self, tick: SimTick, origin: &str, event: Event) {
            self.0.borrow_mut().log(tick, origin, event);
        }
    }

    #[test]
    fn test_watch_filters() {
        let logging = LoggingConfig {
            all: false,
            nodes: vec!["a".to_string()],
            signals: vec!["NEW_BLOCK".to_string(), "NOT_A_SIGNAL".to_string()],
            special: vec!["BLOCK_HEIGHT".to_string()],
        };
        let collected = Rc::new(RefCell::new(CollectorSink::new()));
        let mut sink = WatchSink::new(&logging, Box::new(Shared(collected.clone())));

        sink.log(1, "a", Event::PoolSize { size: 1 });
        sink.log(2, "b", Event::PoolSize { size: 1 });
        sink.log(3, "b", Event::ChainHeight { height: 2 });
        sink.log(
            4,
            "b",
            Event::SignalReceived {
                target: "c".to_string(),
                kind: SignalKind::NewBlock,
                hash: "h".to_string(),
                payload: None,
            },
        );
        sink.log(
            5,
            "b",
            Event::SignalReceived {
                target: "c".to_string(),
                kind: SignalKind::Ack,
                hash: "h".to_string(),
                payload: None,
            },
        );

        let ticks: Vec<SimTick> = collected.borrow().entries.iter().map(|(t, _, _)| *t).collect();
        assert_eq!(ticks, vec![1, 3, 4]);
    }

    #[test]
    fn test_transcript_success() {
        let reference = "1: a transaction pool: 1\n2: a blockchain height: 1\n";
        let mut sink = TranscriptSink::new(reference, Box::new(NoOpSink));
        let report = sink.report();

        sink.log(1, "a", Event::PoolSize { size: 1 });
        sink.log(2, "a", Event::ChainHeight { height: 1 });
        assert!(report.borrow().success());
        assert_eq!(report.borrow().to_string(), "SUCCESS 2/2");
    }

    #[test]
    fn test_transcript_failure() {
        let reference = "1: a transaction pool: 1\n2: a blockchain height: 1\n";
        let mut sink = TranscriptSink::new(reference, Box::new(NoOpSink));
        let report = sink.report();

        sink.log(1, "a", Event::PoolSize { size: 1 });
        sink.log(2, "a", Event::ChainHeight { height: 7 });
        sink.log(3, "a", Event::ChainHeight { height: 8 });

        let report = report.borrow();
        assert!(!report.success());
        assert_eq!(report.to_string(), "FAIL 1/3");
        assert_eq!(report.first_mismatch.as_ref().map(|m| m.0), Some(2));
    }

    #[test]
    fn test_recording() {
        let mut sink = RecordingSink::new(Box::new(NoOpSink));
        let lines = sink.lines();
        sink.log(9, "x", Event::PoolSize { size: 4 });
        assert_eq!(lines.borrow().as_slice(), ["9: x transaction pool: 4".to_string()]);
    }
}
