//! Test-only tracing subscriber recording every event's fields as strings,
//! so tests assert on captured records rather than on console output.

use std::sync::{Arc, Mutex};

use tracing::span;

/// One recorded event: its target plus every field rendered to a string.
///
/// `%`/`?` sigils and plain strings all end up as their `Display`/`Debug`
/// rendering, which is what tests compare against.
#[derive(Clone, Debug)]
pub struct CapturedRecord {
    pub target: String,
    pub fields: Vec<(String, String)>,
}

impl CapturedRecord {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find_map(|(field, value)| (field == name).then_some(value.as_str()))
    }
}

#[derive(Clone, Debug)]
pub struct CaptureSubscriber {
    records: Arc<Mutex<Vec<CapturedRecord>>>,
}

#[derive(Clone, Debug)]
pub struct CaptureHandle {
    records: Arc<Mutex<Vec<CapturedRecord>>>,
}

struct CaptureVisitor {
    fields: Vec<(String, String)>,
}

/// Installs a capturing subscriber as the thread default.
///
/// Keep the returned guard alive for the duration of the test.
pub fn init_capture() -> (CaptureHandle, tracing::subscriber::DefaultGuard) {
    let subscriber = CaptureSubscriber::new();
    let handle = subscriber.handle();
    let default_guard = tracing::subscriber::set_default(subscriber);
    (handle, default_guard)
}

impl CaptureSubscriber {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn handle(&self) -> CaptureHandle {
        CaptureHandle {
            records: Arc::clone(&self.records),
        }
    }
}

impl Default for CaptureSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl tracing::Subscriber for CaptureSubscriber {
    fn enabled(&self, _metadata: &tracing::Metadata<'_>) -> bool {
        true
    }

    fn new_span(&self, _span: &span::Attributes<'_>) -> span::Id {
        span::Id::from_u64(1)
    }

    fn record(&self, _span: &span::Id, _values: &span::Record<'_>) {}

    fn record_follows_from(&self, _span: &span::Id, _follows: &span::Id) {}

    fn event(&self, event: &tracing::Event<'_>) {
        let mut visitor = CaptureVisitor { fields: Vec::new() };
        event.record(&mut visitor);
        self.records
            .lock()
            .expect("captured records lock")
            .push(CapturedRecord {
                target: event.metadata().target().to_owned(),
                fields: visitor.fields,
            });
    }

    fn enter(&self, _span: &span::Id) {}

    fn exit(&self, _span: &span::Id) {}
}

impl CaptureHandle {
    pub fn records(&self) -> Vec<CapturedRecord> {
        self.records.lock().expect("captured records lock").clone()
    }

    /// Returns the values recorded under `field`, in emission order.
    pub fn field_values(&self, field: &str) -> Vec<String> {
        self.records()
            .iter()
            .filter_map(|record| record.field(field).map(str::to_owned))
            .collect()
    }

    /// Panics unless exactly one event recorded `field` with `expected`.
    #[track_caller]
    pub fn assert_field(&self, field: &str, expected: &str) {
        let values = self.field_values(field);
        let matching = values.iter().filter(|value| value.as_str() == expected).count();
        assert!(
            matching == 1,
            "expected exactly one `{field}` record equal to `{expected}`, got {matching} among {values:?}"
        );
    }
}

impl tracing::field::Visit for CaptureVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.fields.push((field.name().to_owned(), format!("{value:?}")));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.fields.push((field.name().to_owned(), value.to_owned()));
    }
}
