//! Minimal run-time metrics sink.
//!
//! No exporter is bundled; the host process registers a raw callback that
//! receives name/value pairs for every counter increment, gauge update and
//! histogram sample.

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use once_cell::sync::OnceCell;
use std::ffi::CString;
use std::os::raw::c_char;
use std::sync::Arc;

/// Signature for external collectors.  `name` is NUL-terminated and only
/// valid for the duration of the call.
pub type StatsCallback = unsafe extern "C" fn(name: *const c_char, value: f64);

static CALLBACK: OnceCell<StatsCallback> = OnceCell::new();

/// Register a callback from C/other languages.  The first registration wins;
/// the recorder is installed on the first call.
///
/// # Safety
/// `cb` must stay callable for the life of the process and must tolerate
/// calls from any thread.
#[no_mangle]
pub unsafe extern "C" fn mctree_register_stats_callback(cb: StatsCallback) {
    let _ = CALLBACK.set(cb);
    init();
}

/// Forwarding recorder. Uses the callback **if** it was registered.
struct FfiRecorder;

/// One registered metric: its name, pre-rendered for C.
struct FfiMetric {
    name: CString,
}

impl FfiMetric {
    fn new(key: &Key) -> Arc<Self> {
        // Metric names are literals in this crate; an interior NUL cannot occur.
        let name = CString::new(key.name()).unwrap_or_default();
        Arc::new(Self { name })
    }

    #[inline]
    fn emit(&self, value: f64) {
        if let Some(cb) = CALLBACK.get() {
            unsafe { cb(self.name.as_ptr(), value) };
        }
    }
}

impl Recorder for FfiRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(FfiMetric::new(key))
    }
    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(FfiMetric::new(key))
    }
    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(FfiMetric::new(key))
    }
}

impl metrics::CounterFn for FfiMetric {
    fn increment(&self, value: u64) {
        self.emit(value as f64);
    }
    fn absolute(&self, value: u64) {
        self.emit(value as f64);
    }
}

impl metrics::GaugeFn for FfiMetric {
    fn set(&self, value: f64) {
        self.emit(value);
    }
    fn increment(&self, value: f64) {
        self.emit(value);
    }
    fn decrement(&self, value: f64) {
        self.emit(-value);
    }
}

impl metrics::HistogramFn for FfiMetric {
    fn record(&self, value: f64) {
        self.emit(value);
    }
}

/// Install exactly **once**.  Loses silently if the host already installed
/// its own global recorder.
pub fn init() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        if metrics::set_global_recorder(FfiRecorder).is_err() {
            log::warn!("[TELEMETRY] a global metrics recorder is already installed");
        }
    });
}
