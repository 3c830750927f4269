// marshal.rs — Convert raw confined failures into boundary errors.
//
// The raw value may be anything confined code chose to throw, including an
// object whose `name` or `message` getter throws, or whose `toString` does.
// Reading it therefore goes through the interpreter, and any failure while
// reading collapses to `BoundaryError::opaque()`. Nothing raised during
// marshalling propagates.

use tracing::warn;

use crate::error::{BoundaryError, ErrorKind};
use crate::interp::{Completion, Interpreter};
use crate::value::Value;

/// Produce the sanitized form of a thrown value.
pub(crate) fn marshal(interp: &mut Interpreter<'_>, raw: Value) -> BoundaryError {
    let read = match raw {
        Value::Object(_) => read_error_fields(interp, &raw),
        primitive => interp
            .to_string(&primitive)
            .map(|message| BoundaryError::new(ErrorKind::Error, message, "")),
    };
    match read {
        Ok(error) => error,
        Err(_) => {
            warn!("thrown value could not be read; reporting opaque error");
            BoundaryError::opaque()
        }
    }
}

fn read_error_fields(interp: &mut Interpreter<'_>, raw: &Value) -> Completion<BoundaryError> {
    let name = interp.get(raw, "name")?;
    let name = interp.to_string(&name)?;
    let message = text_or_empty(interp, raw, "message")?;
    let trace = text_or_empty(interp, raw, "stack")?;
    Ok(BoundaryError::new(ErrorKind::from_name(&name), message, trace))
}

fn text_or_empty(interp: &mut Interpreter<'_>, raw: &Value, key: &str) -> Completion<String> {
    match interp.get(raw, key)? {
        Value::Undefined => Ok(String::new()),
        value => interp.to_string(&value),
    }
}
