// host.rs — Host-side values crossing into and out of an environment.
//
// Confined values never leave an environment directly. Results are exported
// as `HostValue` snapshots, and endowments are imported as fresh objects
// into the one evaluation that receives them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Largest integer a number represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

type HostFn = dyn Fn(&[HostValue]) -> Result<HostValue, String> + Send + Sync;

/// A function supplied by the host, or an opaque marker for a confined
/// function that was exported.
#[derive(Clone)]
pub struct HostFunction {
    name: Arc<str>,
    body: Option<Arc<HostFn>>,
}

impl HostFunction {
    /// Wrap a host closure. An `Err` return surfaces in confined code as a
    /// thrown `Error` carrying that message.
    pub fn new<F>(name: impl Into<Arc<str>>, body: F) -> Self
    where
        F: Fn(&[HostValue]) -> Result<HostValue, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Some(Arc::new(body)),
        }
    }

    /// A non-callable marker standing in for a confined function.
    pub(crate) fn opaque(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            body: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_callable(&self) -> bool {
        self.body.is_some()
    }

    pub(crate) fn invoke(&self, args: &[HostValue]) -> Result<HostValue, String> {
        match &self.body {
            Some(body) => body(args),
            None => Err(format!("{} is not callable from this side", self.name)),
        }
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name)
            .field("callable", &self.body.is_some())
            .finish()
    }
}

impl PartialEq for HostFunction {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && match (&self.body, &other.body) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            }
    }
}

/// Plain host data exchanged with a confined environment.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<HostValue>),
    Object(BTreeMap<String, HostValue>),
    Function(HostFunction),
}

impl HostValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&HostValue> {
        match self {
            HostValue::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// JSON rendering. Integral numbers render as integers, non-finite
    /// numbers and `undefined` become `null`, functions become their
    /// `"[function name]"` description.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            HostValue::Undefined | HostValue::Null => Json::Null,
            HostValue::Bool(b) => Json::Bool(*b),
            HostValue::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => {
                Json::from(*n as i64)
            }
            HostValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            HostValue::String(s) => Json::String(s.clone()),
            HostValue::Array(items) => Json::Array(items.iter().map(HostValue::to_json).collect()),
            HostValue::Object(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            HostValue::Function(f) => Json::String(format!("[function {}]", f.name())),
        }
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        HostValue::Number(n)
    }
}

impl From<i64> for HostValue {
    fn from(n: i64) -> Self {
        HostValue::Number(n as f64)
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::String(s)
    }
}

impl From<HostFunction> for HostValue {
    fn from(f: HostFunction) -> Self {
        HostValue::Function(f)
    }
}

impl From<serde_json::Value> for HostValue {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => HostValue::Null,
            Json::Bool(b) => HostValue::Bool(b),
            Json::Number(n) => HostValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => HostValue::String(s),
            Json::Array(items) => HostValue::Array(items.into_iter().map(HostValue::from).collect()),
            Json::Object(map) => {
                HostValue::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// Named values merged into lookup scope for exactly one evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Endowments(BTreeMap<String, HostValue>);

impl Endowments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<HostValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<HostValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HostValue)> {
        self.0.iter()
    }
}

impl From<BTreeMap<String, HostValue>> for Endowments {
    fn from(map: BTreeMap<String, HostValue>) -> Self {
        Self(map)
    }
}

/// Severity of a line written through the restricted `console`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLevel {
    Log,
    Info,
    Warn,
    Error,
}

/// Destination for the restricted diagnostic-output binding.
pub trait OutputSink: Send + Sync {
    fn emit(&self, level: OutputLevel, line: &str);
}

/// Default sink: forwards confined output to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingOutput;

impl OutputSink for TracingOutput {
    fn emit(&self, level: OutputLevel, line: &str) {
        match level {
            OutputLevel::Log | OutputLevel::Info => {
                tracing::info!(target: "warden::console", "{}", line)
            }
            OutputLevel::Warn => tracing::warn!(target: "warden::console", "{}", line),
            OutputLevel::Error => tracing::error!(target: "warden::console", "{}", line),
        }
    }
}

/// Sink that keeps every line in memory.
#[derive(Debug, Default)]
pub struct BufferedOutput {
    lines: Mutex<Vec<(OutputLevel, String)>>,
}

impl BufferedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far.
    pub fn lines(&self) -> Vec<(OutputLevel, String)> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl OutputSink for BufferedOutput {
    fn emit(&self, level: OutputLevel, line: &str) {
        let mut lines = match self.lines.lock() {
            Ok(lines) => lines,
            Err(poisoned) => poisoned.into_inner(),
        };
        lines.push((level, line.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_conversion_handles_nested_data() {
        let value = HostValue::from(serde_json::json!({"a": [1, "two", null], "b": true}));
        let a = value.get("a").unwrap();
        assert_eq!(
            a,
            &HostValue::Array(vec![
                HostValue::Number(1.0),
                HostValue::String("two".into()),
                HostValue::Null
            ])
        );
        assert_eq!(value.get("b").and_then(HostValue::as_bool), Some(true));
    }

    #[test]
    fn non_finite_numbers_render_as_null() {
        assert_eq!(HostValue::Number(f64::NAN).to_json(), serde_json::Value::Null);
        assert_eq!(HostValue::Number(2.5).to_json(), serde_json::json!(2.5));
        assert_eq!(HostValue::Number(42.0).to_json(), serde_json::json!(42));
    }

    #[test]
    fn opaque_functions_refuse_calls() {
        let f = HostFunction::opaque("inner");
        assert!(!f.is_callable());
        assert!(f.invoke(&[]).is_err());
    }

    #[test]
    fn host_functions_compare_by_identity() {
        let f = HostFunction::new("f", |_| Ok(HostValue::Null));
        let g = HostFunction::new("f", |_| Ok(HostValue::Null));
        assert_eq!(f, f.clone());
        assert_ne!(f, g);
    }

    #[test]
    fn buffered_output_records_lines() {
        let sink = BufferedOutput::new();
        sink.emit(OutputLevel::Warn, "careful");
        assert_eq!(sink.lines(), vec![(OutputLevel::Warn, "careful".to_string())]);
    }
}
