// natives.rs — Built-in functions of the intrinsic graph.
//
// Every built-in is a `Builtin` variant dispatched by `call()`. Tamed
// replacements (`TamedDateNow`, `TamedRandom`) are separate variants so a
// shim swaps a function object rather than patching behavior in place.

use std::sync::Arc;

use regex::RegexBuilder;

use crate::error::ErrorKind;
use crate::host::OutputLevel;
use crate::interp::{Completion, Interpreter, Thrown, MAX_ARRAY_LENGTH};
use crate::marshal::marshal;
use crate::value::{Callable, Object, ObjectId, ObjectKind, PatternSlot, Property, Value};

/// Legacy pattern state exposes `$1` through `$9`.
pub(crate) const LEGACY_GROUPS: u8 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    ObjectCtor,
    ObjectKeys,
    ObjectFreeze,
    ObjectIsFrozen,
    ObjectDefineProperty,
    ObjectGetPrototypeOf,
    ObjectHasOwnProperty,
    ObjectToString,
    ObjectToLocaleString,
    ArrayCtor,
    ArrayIsArray,
    ArrayPush,
    ArrayJoin,
    ArrayMap,
    ArrayToString,
    MathAbs,
    MathFloor,
    MathCeil,
    MathMax,
    MathMin,
    MathSqrt,
    MathRandom,
    TamedRandom,
    DateNow,
    TamedDateNow,
    IntlDateTimeFormat,
    IntlResolvedOptions,
    IntlNumberFormat,
    IntlFormatNumber,
    RegExpCtor,
    RegExpTest,
    RegExpExec,
    RegExpToString,
    RegExpLastMatch,
    RegExpInput,
    RegExpGroup(u8),
    ErrorCtor(ErrorKind),
    ErrorToString,
    ErrorCaptureStackTrace,
    FunctionToString,
    FunctionCtor,
    IsNaN,
    StringCtor,
    NumberCtor,
    Harden,
    ConfineEvaluate,
    ConfineEvaluateExpression,
    Console(OutputLevel),
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::ObjectCtor => "Object",
            Builtin::ObjectKeys => "keys",
            Builtin::ObjectFreeze => "freeze",
            Builtin::ObjectIsFrozen => "isFrozen",
            Builtin::ObjectDefineProperty => "defineProperty",
            Builtin::ObjectGetPrototypeOf => "getPrototypeOf",
            Builtin::ObjectHasOwnProperty => "hasOwnProperty",
            Builtin::ObjectToString | Builtin::ArrayToString => "toString",
            Builtin::ObjectToLocaleString => "toLocaleString",
            Builtin::ArrayCtor => "Array",
            Builtin::ArrayIsArray => "isArray",
            Builtin::ArrayPush => "push",
            Builtin::ArrayJoin => "join",
            Builtin::ArrayMap => "map",
            Builtin::MathAbs => "abs",
            Builtin::MathFloor => "floor",
            Builtin::MathCeil => "ceil",
            Builtin::MathMax => "max",
            Builtin::MathMin => "min",
            Builtin::MathSqrt => "sqrt",
            Builtin::MathRandom | Builtin::TamedRandom => "random",
            Builtin::DateNow | Builtin::TamedDateNow => "now",
            Builtin::IntlDateTimeFormat => "DateTimeFormat",
            Builtin::IntlResolvedOptions => "resolvedOptions",
            Builtin::IntlNumberFormat => "NumberFormat",
            Builtin::IntlFormatNumber => "format",
            Builtin::RegExpCtor => "RegExp",
            Builtin::RegExpTest => "test",
            Builtin::RegExpExec => "exec",
            Builtin::RegExpToString | Builtin::ErrorToString | Builtin::FunctionToString => {
                "toString"
            }
            Builtin::RegExpLastMatch => "lastMatch",
            Builtin::RegExpInput => "input",
            Builtin::RegExpGroup(_) => "group",
            Builtin::ErrorCtor(kind) => kind.name(),
            Builtin::ErrorCaptureStackTrace => "captureStackTrace",
            Builtin::FunctionCtor => "Function",
            Builtin::IsNaN => "isNaN",
            Builtin::StringCtor => "String",
            Builtin::NumberCtor => "Number",
            Builtin::Harden => "harden",
            Builtin::ConfineEvaluate => "evaluate",
            Builtin::ConfineEvaluateExpression => "evaluateExpression",
            Builtin::Console(OutputLevel::Log) => "log",
            Builtin::Console(OutputLevel::Info) => "info",
            Builtin::Console(OutputLevel::Warn) => "warn",
            Builtin::Console(OutputLevel::Error) => "error",
        }
    }

    /// Whether `new` may be applied.
    pub fn is_constructor(self) -> bool {
        matches!(
            self,
            Builtin::ObjectCtor
                | Builtin::ArrayCtor
                | Builtin::ErrorCtor(_)
                | Builtin::RegExpCtor
                | Builtin::IntlDateTimeFormat
                | Builtin::IntlNumberFormat
                | Builtin::FunctionCtor
        )
    }
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

/// Dispatch one built-in call.
pub(crate) fn call(
    interp: &mut Interpreter<'_>,
    builtin: Builtin,
    this: Value,
    args: &[Value],
    _constructing: bool,
) -> Completion<Value> {
    match builtin {
        Builtin::ObjectCtor => match arg(args, 0) {
            object @ Value::Object(_) => Ok(object),
            _ => Ok(Value::Object(interp.alloc_object())),
        },
        Builtin::ObjectKeys => {
            let keys = match arg(args, 0) {
                Value::Object(id) => interp.own_keys(id),
                Value::Undefined | Value::Null => {
                    return Err(interp.type_error("Cannot convert undefined or null to object"))
                }
                _ => Vec::new(),
            };
            let keys = keys.iter().map(|k| Value::str(k)).collect();
            Ok(interp.alloc_array(keys))
        }
        Builtin::ObjectFreeze => {
            let target = arg(args, 0);
            if let Some(object) = target.as_object().and_then(|id| interp.heap.object_mut(id)) {
                object.frozen = true;
            }
            Ok(target)
        }
        Builtin::ObjectIsFrozen => Ok(Value::Bool(match arg(args, 0) {
            Value::Object(id) => interp.heap.is_frozen(id),
            _ => true,
        })),
        Builtin::ObjectDefineProperty => define_property(interp, args),
        Builtin::ObjectGetPrototypeOf => match arg(args, 0) {
            Value::Object(id) => Ok(interp
                .heap
                .object(id)
                .proto
                .map(Value::Object)
                .unwrap_or(Value::Null)),
            Value::Undefined | Value::Null => {
                Err(interp.type_error("Cannot convert undefined or null to object"))
            }
            _ => Ok(Value::Null),
        },
        Builtin::ObjectHasOwnProperty => {
            let key = interp.to_property_key(&arg(args, 0))?;
            Ok(Value::Bool(match this {
                Value::Object(id) => interp.has_own(id, &key),
                _ => false,
            }))
        }
        Builtin::ObjectToString => Ok(Value::str(&object_tag(interp, &this))),
        Builtin::ObjectToLocaleString => Ok(Value::str(&interp.to_string(&this)?)),

        Builtin::ArrayCtor => {
            if let [Value::Number(n)] = args {
                if *n < 0.0 || n.fract() != 0.0 || *n > MAX_ARRAY_LENGTH as f64 {
                    return Err(interp.range_error("Invalid array length"));
                }
                return Ok(interp.alloc_array(vec![Value::Undefined; *n as usize]));
            }
            Ok(interp.alloc_array(args.to_vec()))
        }
        Builtin::ArrayIsArray => Ok(Value::Bool(match arg(args, 0) {
            Value::Object(id) => matches!(interp.heap.object(id).kind, ObjectKind::Array(_)),
            _ => false,
        })),
        Builtin::ArrayPush => array_push(interp, this, args),
        Builtin::ArrayJoin => {
            let separator = match arg(args, 0) {
                Value::Undefined => ",".to_string(),
                other => interp.to_string(&other)?,
            };
            array_join(interp, &this, &separator).map(|s| Value::str(&s))
        }
        Builtin::ArrayMap => array_map(interp, this, args),
        Builtin::ArrayToString => {
            let is_array = this
                .as_object()
                .is_some_and(|id| matches!(interp.heap.object(id).kind, ObjectKind::Array(_)));
            if is_array {
                array_join(interp, &this, ",").map(|s| Value::str(&s))
            } else {
                Ok(Value::str(&object_tag(interp, &this)))
            }
        }

        Builtin::MathAbs => unary_math(interp, args, f64::abs),
        Builtin::MathFloor => unary_math(interp, args, f64::floor),
        Builtin::MathCeil => unary_math(interp, args, f64::ceil),
        Builtin::MathSqrt => unary_math(interp, args, f64::sqrt),
        Builtin::MathMax => fold_math(interp, args, f64::NEG_INFINITY, f64::max),
        Builtin::MathMin => fold_math(interp, args, f64::INFINITY, f64::min),
        Builtin::MathRandom => Ok(Value::Number(rand::random::<f64>())),
        Builtin::DateNow => Ok(Value::Number(
            chrono::Utc::now().timestamp_millis() as f64,
        )),
        Builtin::TamedRandom | Builtin::TamedDateNow => Ok(Value::Number(f64::NAN)),

        Builtin::IntlDateTimeFormat => {
            let formatter = interp.alloc_object();
            let method = function_object(interp, Builtin::IntlResolvedOptions);
            put(interp, formatter, "resolvedOptions", method);
            Ok(Value::Object(formatter))
        }
        Builtin::IntlResolvedOptions => {
            let options = interp.alloc_object();
            put(interp, options, "locale", Value::str(&host_locale()));
            put(interp, options, "timeZone", Value::str(&host_time_zone()));
            Ok(Value::Object(options))
        }
        Builtin::IntlNumberFormat => {
            let formatter = interp.alloc_object();
            let method = function_object(interp, Builtin::IntlFormatNumber);
            put(interp, formatter, "format", method);
            Ok(Value::Object(formatter))
        }
        Builtin::IntlFormatNumber => {
            let n = interp.to_number(&arg(args, 0))?;
            Ok(Value::str(&group_digits(n)))
        }

        Builtin::RegExpCtor => regexp_new(interp, args),
        Builtin::RegExpTest => {
            let input = interp.to_string(&arg(args, 0))?;
            Ok(Value::Bool(regexp_match(interp, &this, &input)?.is_some()))
        }
        Builtin::RegExpExec => {
            let input = interp.to_string(&arg(args, 0))?;
            let Some((index, groups)) = regexp_match(interp, &this, &input)? else {
                return Ok(Value::Null);
            };
            let items = groups
                .into_iter()
                .map(|g| g.map(|s| Value::str(&s)).unwrap_or(Value::Undefined))
                .collect();
            let result = interp.alloc_array(items);
            if let Some(id) = result.as_object() {
                put(interp, id, "index", Value::Number(index as f64));
                put(interp, id, "input", Value::str(&input));
            }
            Ok(result)
        }
        Builtin::RegExpToString => {
            let slot = pattern_slot(interp, &this)?;
            Ok(Value::str(&format!("/{}/{}", slot.source, slot.flags)))
        }
        Builtin::RegExpLastMatch => Ok(Value::str(&interp.pattern.last_match)),
        Builtin::RegExpInput => Ok(Value::str(&interp.pattern.input)),
        Builtin::RegExpGroup(n) => {
            let group = interp
                .pattern
                .groups
                .get(usize::from(n).saturating_sub(1))
                .cloned()
                .unwrap_or_default();
            Ok(Value::str(&group))
        }

        Builtin::ErrorCtor(kind) => {
            let message = match arg(args, 0) {
                Value::Undefined => None,
                other => Some(interp.to_string(&other)?),
            };
            Ok(Value::Object(interp.make_error(kind, message)))
        }
        Builtin::ErrorToString => error_to_string(interp, &this).map(|s| Value::str(&s)),
        Builtin::ErrorCaptureStackTrace => {
            let target = arg(args, 0);
            if !matches!(target, Value::Object(_)) {
                return Err(interp.type_error("captureStackTrace requires an object"));
            }
            if interp.context().capture_stacks {
                let header = error_to_string(interp, &target)?;
                let trace = interp.stack_trace(&header, "");
                interp.set(&target, "stack", Value::str(&trace))?;
            }
            Ok(Value::Undefined)
        }

        Builtin::FunctionToString => {
            let Some(callable) = this.as_object().and_then(|id| interp.heap.object(id).callable())
            else {
                return Err(interp.type_error("Function.prototype.toString requires a function"));
            };
            let text = match callable {
                Callable::Closure { def, name, .. } => {
                    format!("function {}({}) {{ ... }}", name, def.params.join(", "))
                }
                other => format!("function {}() {{ [native code] }}", other.name()),
            };
            Ok(Value::str(&text))
        }
        Builtin::FunctionCtor => function_new(interp, args),

        Builtin::IsNaN => Ok(Value::Bool(interp.to_number(&arg(args, 0))?.is_nan())),
        Builtin::StringCtor => match args.first() {
            None => Ok(Value::str("")),
            Some(value) => Ok(Value::str(&interp.to_string(value)?)),
        },
        Builtin::NumberCtor => match args.first() {
            None => Ok(Value::Number(0.0)),
            Some(value) => Ok(Value::Number(interp.to_number(value)?)),
        },

        Builtin::Harden => {
            let target = arg(args, 0);
            interp.harden(&target);
            Ok(target)
        }
        Builtin::ConfineEvaluate => confine(interp, args, false),
        Builtin::ConfineEvaluateExpression => confine(interp, args, true),
        Builtin::Console(level) => {
            let mut parts = Vec::with_capacity(args.len());
            for value in args {
                parts.push(interp.to_string(value)?);
            }
            interp.context().output.emit(level, &parts.join(" "));
            Ok(Value::Undefined)
        }
    }
}

/// A fresh built-in function object.
pub(crate) fn function_object(interp: &mut Interpreter<'_>, builtin: Builtin) -> Value {
    let proto = interp.intrinsics().function_prototype;
    Value::Object(interp.heap.alloc(Object::new(
        Some(proto),
        ObjectKind::Function(Callable::Builtin(builtin)),
    )))
}

fn put(interp: &mut Interpreter<'_>, target: ObjectId, key: &str, value: Value) {
    if let Some(object) = interp.heap.object_mut(target) {
        object.properties.insert(key.to_string(), Property::Data(value));
    }
}

fn object_tag(interp: &Interpreter<'_>, value: &Value) -> String {
    let tag = match value {
        Value::Undefined => "Undefined",
        Value::Null => "Null",
        Value::Bool(_) => "Boolean",
        Value::Number(_) => "Number",
        Value::String(_) => "String",
        Value::Object(id) => match interp.heap.object(*id).kind {
            ObjectKind::Array(_) => "Array",
            ObjectKind::Function(_) => "Function",
            ObjectKind::Error => "Error",
            ObjectKind::RegExp(_) => "RegExp",
            ObjectKind::Ordinary => "Object",
        },
    };
    format!("[object {}]", tag)
}

fn define_property(interp: &mut Interpreter<'_>, args: &[Value]) -> Completion<Value> {
    let target = arg(args, 0);
    if !matches!(target, Value::Object(_)) {
        return Err(interp.type_error("Object.defineProperty called on non-object"));
    }
    let key = interp.to_property_key(&arg(args, 1))?;
    let descriptor = arg(args, 2);
    if !matches!(descriptor, Value::Object(_)) {
        return Err(interp.type_error("Property description must be an object"));
    }
    let getter = interp.get(&descriptor, "get")?;
    let property = match getter {
        Value::Undefined => Property::Data(interp.get(&descriptor, "value")?),
        Value::Object(id) if interp.is_callable(&getter) => Property::Accessor { get: Some(id) },
        _ => return Err(interp.type_error("Getter must be a function")),
    };
    interp.define(&target, &key, property)?;
    Ok(target)
}

fn array_push(interp: &mut Interpreter<'_>, this: Value, args: &[Value]) -> Completion<Value> {
    let Some(id) = this.as_object() else {
        return Err(interp.type_error("Array.prototype.push called on non-object"));
    };
    if interp.heap.is_frozen(id) {
        return Err(interp.type_error("Cannot add property, object is not extensible"));
    }
    let length = match interp.heap.object_mut(id).map(|o| &mut o.kind) {
        Some(ObjectKind::Array(items)) => {
            if items.len() + args.len() > MAX_ARRAY_LENGTH {
                None
            } else {
                items.extend_from_slice(args);
                Some(items.len())
            }
        }
        _ => return Err(interp.type_error("Array.prototype.push called on non-array")),
    };
    match length {
        Some(length) => Ok(Value::Number(length as f64)),
        None => Err(interp.range_error("Invalid array length")),
    }
}

fn array_items(interp: &Interpreter<'_>, value: &Value) -> Option<Vec<Value>> {
    match &interp.heap.object(value.as_object()?).kind {
        ObjectKind::Array(items) => Some(items.clone()),
        _ => None,
    }
}

fn array_join(interp: &mut Interpreter<'_>, this: &Value, separator: &str) -> Completion<String> {
    let Some(items) = array_items(interp, this) else {
        return Err(interp.type_error("Array.prototype.join called on non-array"));
    };
    let Some(id) = this.as_object() else {
        return Ok(String::new());
    };
    if !interp.begin_join(id) {
        return Ok(String::new());
    }
    let mut parts = Vec::with_capacity(items.len());
    let mut result = Ok(());
    for item in &items {
        if item.is_nullish() {
            parts.push(String::new());
            continue;
        }
        match interp.to_string(item) {
            Ok(text) => parts.push(text),
            Err(thrown) => {
                result = Err(thrown);
                break;
            }
        }
    }
    interp.end_join();
    result.map(|_| parts.join(separator))
}

fn array_map(interp: &mut Interpreter<'_>, this: Value, args: &[Value]) -> Completion<Value> {
    let Some(items) = array_items(interp, &this) else {
        return Err(interp.type_error("Array.prototype.map called on non-array"));
    };
    let callback = arg(args, 0);
    if !interp.is_callable(&callback) {
        return Err(interp.type_error("map callback is not a function"));
    }
    let mut mapped = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let value = interp.call(
            &callback,
            Value::Undefined,
            vec![item, Value::Number(index as f64), this.clone()],
        )?;
        mapped.push(value);
    }
    Ok(interp.alloc_array(mapped))
}

fn unary_math(interp: &mut Interpreter<'_>, args: &[Value], f: fn(f64) -> f64) -> Completion<Value> {
    let n = interp.to_number(&arg(args, 0))?;
    Ok(Value::Number(f(n)))
}

fn fold_math(
    interp: &mut Interpreter<'_>,
    args: &[Value],
    start: f64,
    f: fn(f64, f64) -> f64,
) -> Completion<Value> {
    let mut acc = start;
    for value in args {
        let n = interp.to_number(value)?;
        // f64::max/min ignore NaN; the language propagates it.
        if n.is_nan() {
            return Ok(Value::Number(f64::NAN));
        }
        acc = f(acc, n);
    }
    Ok(Value::Number(acc))
}

fn error_to_string(interp: &mut Interpreter<'_>, this: &Value) -> Completion<String> {
    if !matches!(this, Value::Object(_)) {
        return Err(interp.type_error("Error.prototype.toString called on non-object"));
    }
    let name = match interp.get(this, "name")? {
        Value::Undefined => "Error".to_string(),
        other => interp.to_string(&other)?,
    };
    let message = match interp.get(this, "message")? {
        Value::Undefined => String::new(),
        other => interp.to_string(&other)?,
    };
    Ok(match (name.is_empty(), message.is_empty()) {
        (true, _) => message,
        (false, true) => name,
        (false, false) => format!("{}: {}", name, message),
    })
}

fn pattern_slot(interp: &mut Interpreter<'_>, this: &Value) -> Completion<Arc<PatternSlot>> {
    let slot = this
        .as_object()
        .and_then(|id| match &interp.heap.object(id).kind {
            ObjectKind::RegExp(slot) => Some(slot.clone()),
            _ => None,
        });
    match slot {
        Some(slot) => Ok(slot),
        None => Err(interp.type_error("receiver is not a RegExp")),
    }
}

fn regexp_new(interp: &mut Interpreter<'_>, args: &[Value]) -> Completion<Value> {
    let source = match arg(args, 0) {
        Value::Undefined => "(?:)".to_string(),
        pattern @ Value::Object(_) => match pattern_slot(interp, &pattern) {
            Ok(slot) => slot.source.clone(),
            Err(_) => interp.to_string(&pattern)?,
        },
        other => interp.to_string(&other)?,
    };
    let flags = match arg(args, 1) {
        Value::Undefined => String::new(),
        other => interp.to_string(&other)?,
    };
    let mut seen = String::new();
    for flag in flags.chars() {
        if !"gimsuy".contains(flag) || seen.contains(flag) {
            return Err(interp.error(
                ErrorKind::SyntaxError,
                format!("Invalid flags supplied to RegExp constructor '{}'", flags),
            ));
        }
        seen.push(flag);
    }
    let regex = RegexBuilder::new(&source)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .build();
    let regex = match regex {
        Ok(regex) => regex,
        Err(err) => {
            return Err(interp.error(
                ErrorKind::SyntaxError,
                format!("Invalid regular expression: /{}/: {}", source, err),
            ))
        }
    };
    let proto = interp.intrinsics().regexp_prototype;
    let slot = PatternSlot {
        source,
        flags,
        regex,
    };
    Ok(Value::Object(interp.heap.alloc(Object::new(
        Some(proto),
        ObjectKind::RegExp(Arc::new(slot)),
    ))))
}

type MatchGroups = Vec<Option<String>>;

/// Run a pattern, updating legacy match state on success.
fn regexp_match(
    interp: &mut Interpreter<'_>,
    this: &Value,
    input: &str,
) -> Completion<Option<(usize, MatchGroups)>> {
    let slot = pattern_slot(interp, this)?;
    let Some(captures) = slot.regex.captures(input) else {
        return Ok(None);
    };
    let index = captures.get(0).map(|m| input[..m.start()].chars().count()).unwrap_or(0);
    let groups: MatchGroups = captures
        .iter()
        .map(|m| m.map(|m| m.as_str().to_string()))
        .collect();

    interp.pattern.input = input.to_string();
    interp.pattern.last_match = groups.first().cloned().flatten().unwrap_or_default();
    interp.pattern.groups = groups
        .iter()
        .skip(1)
        .take(usize::from(LEGACY_GROUPS))
        .map(|g| g.clone().unwrap_or_default())
        .collect();
    Ok(Some((index, groups)))
}

/// `Function(a, b, body)`: compile a closure that sees only the global object.
fn function_new(interp: &mut Interpreter<'_>, args: &[Value]) -> Completion<Value> {
    let mut texts = Vec::with_capacity(args.len());
    for value in args {
        texts.push(interp.to_string(value)?);
    }
    let body = texts.pop().unwrap_or_default();
    let source = format!("(function anonymous({}) {{\n{}\n}})", texts.join(", "), body);
    let root = interp.heap.alloc_scope(None);
    interp.evaluate_source(&source, root, true)
}

/// Nested confinement: evaluate in a fresh root scope of this environment.
/// Thrown primitives pass through unchanged. Thrown objects are marshalled
/// and rethrown as fresh error values carrying the inner trace.
fn confine(interp: &mut Interpreter<'_>, args: &[Value], expression: bool) -> Completion<Value> {
    let code = interp.to_string(&arg(args, 0))?;
    let root = interp.scope_from_object(&arg(args, 1));
    match interp.evaluate_source(&code, root, expression) {
        Ok(value) => Ok(value),
        Err(Thrown(thrown)) if thrown.as_object().is_none() => Err(Thrown(thrown)),
        Err(Thrown(thrown)) => {
            let boundary = marshal(interp, thrown);
            let fresh = interp.make_error(boundary.kind, Some(boundary.message));
            if interp.context().capture_stacks {
                if let Some(object) = interp.heap.object_mut(fresh) {
                    object
                        .properties
                        .insert("stack".to_string(), Property::Data(Value::str(&boundary.trace)));
                }
            }
            Err(Thrown(Value::Object(fresh)))
        }
    }
}

/// Locale tag derived from the host environment (`en_US.UTF-8` → `en-US`).
fn host_locale() -> String {
    let raw = ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.is_empty())
        .unwrap_or_default();
    let tag = raw.split(['.', '@']).next().unwrap_or_default();
    if tag.is_empty() || tag == "C" || tag == "POSIX" {
        return "en-US".to_string();
    }
    tag.replace('_', "-")
}

fn host_time_zone() -> String {
    if let Ok(tz) = std::env::var("TZ") {
        if !tz.is_empty() {
            return tz.trim_start_matches(':').to_string();
        }
    }
    chrono::Local::now().offset().to_string()
}

/// Decimal rendering with thousands separators and at most three fraction
/// digits.
fn group_digits(n: f64) -> String {
    if !n.is_finite() {
        return crate::value::number_to_string(n);
    }
    let rounded = (n.abs() * 1000.0).round() / 1000.0;
    let text = format!("{:.3}", rounded);
    let (int_part, frac_part) = text.split_once('.').unwrap_or((&text, ""));
    let mut grouped = String::new();
    for (i, digit) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    let frac = frac_part.trim_end_matches('0');
    let sign = if n < 0.0 && rounded != 0.0 { "-" } else { "" };
    if frac.is_empty() {
        format!("{}{}", sign, grouped)
    } else {
        format!("{}{}.{}", sign, grouped, frac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digit_grouping() {
        assert_eq!(group_digits(1234567.891), "1,234,567.891");
        assert_eq!(group_digits(-1000.0), "-1,000");
        assert_eq!(group_digits(12.5), "12.5");
        assert_eq!(group_digits(0.0001), "0");
        assert_eq!(group_digits(f64::NAN), "NaN");
    }

    #[test]
    fn constructors_are_marked() {
        assert!(Builtin::ErrorCtor(ErrorKind::TypeError).is_constructor());
        assert!(Builtin::FunctionCtor.is_constructor());
        assert!(!Builtin::ArrayPush.is_constructor());
        assert!(!Builtin::Harden.is_constructor());
    }

    #[test]
    fn names_follow_the_binding() {
        assert_eq!(Builtin::ErrorCtor(ErrorKind::UriError).name(), "URIError");
        assert_eq!(Builtin::TamedDateNow.name(), Builtin::DateNow.name());
        assert_eq!(Builtin::Console(OutputLevel::Warn).name(), "warn");
    }
}
