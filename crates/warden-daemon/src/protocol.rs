// protocol.rs — The two-facet session protocol.
//
// Each connection exchanges newline-delimited JSON. A request names the
// facet it addresses:
//
//   {"id": 1, "facet": "private", "method": "shutdown"}
//
// and gets back exactly one response line carrying either `result` or
// `error`. The public facet has no methods. The private facet's only method
// is `shutdown`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facet {
    Public,
    Private,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub facet: Facet,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// `None` only when the request line could not be parsed at all.
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: u64, result: serde_json::Value) -> Self {
        Self {
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Option<u64>, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(message.into()),
        }
    }
}

/// Cloneable trigger for the accept loop's shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub(crate) fn new(tx: watch::Sender<bool>) -> Self {
        Self { tx: Arc::new(tx) }
    }

    pub fn request(&self) {
        // No receivers left means the loop has already stopped.
        let _ = self.tx.send(true);
    }

    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Handle one request against the facet it names.
pub fn dispatch(request: &Request, shutdown: &ShutdownHandle) -> Response {
    match (request.facet, request.method.as_str()) {
        (Facet::Private, "shutdown") => {
            warn!("received shutdown request");
            shutdown.request();
            Response::ok(request.id, serde_json::Value::Null)
        }
        (facet, method) => Response::err(
            Some(request.id),
            format!(
                "{} facet has no method '{}'",
                match facet {
                    Facet::Public => "public",
                    Facet::Private => "private",
                },
                method
            ),
        ),
    }
}

/// Parse one request line and dispatch it.
pub fn handle_line(line: &str, shutdown: &ShutdownHandle) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => dispatch(&request, shutdown),
        Err(e) => Response::err(None, format!("malformed request: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> ShutdownHandle {
        let (tx, _rx) = watch::channel(false);
        ShutdownHandle::new(tx)
    }

    #[test]
    fn public_facet_has_no_methods() {
        let shutdown = handle();
        let resp = handle_line(r#"{"id":1,"facet":"public","method":"shutdown"}"#, &shutdown);
        assert_eq!(resp.id, Some(1));
        assert!(resp.error.unwrap().contains("public facet"));
        assert!(!shutdown.is_requested());
    }

    #[test]
    fn private_shutdown_signals_the_loop() {
        let shutdown = handle();
        let resp = handle_line(r#"{"id":7,"facet":"private","method":"shutdown"}"#, &shutdown);
        assert_eq!(resp, Response::ok(7, serde_json::Value::Null));
        assert!(shutdown.is_requested());
    }

    #[test]
    fn unknown_private_method_is_an_error() {
        let shutdown = handle();
        let resp = handle_line(r#"{"id":2,"facet":"private","method":"reboot"}"#, &shutdown);
        assert!(resp.error.is_some());
        assert!(!shutdown.is_requested());
    }

    #[test]
    fn malformed_lines_get_an_anonymous_error() {
        let resp = handle_line("not json", &handle());
        assert_eq!(resp.id, None);
        assert!(resp.error.unwrap().starts_with("malformed request"));
    }

    #[test]
    fn responses_omit_the_unused_field() {
        let json = serde_json::to_string(&Response::ok(3, serde_json::Value::Null)).unwrap();
        assert_eq!(json, r#"{"id":3,"result":null}"#);
    }
}
