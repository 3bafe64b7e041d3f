//! Key-prefix classification of request values.
//!
//! The only place in the crate that inspects raw key strings. Everything
//! downstream matches on [`PayloadKind`] and [`TypedValue`].

use super::traits::Validator;
use super::value::{FormulaPayload, ImagePayload, Payload, QrPayload, RawValue};
use super::EngineError;

const IMG_PREFIX: &str = "IMG|";
const MATH_PREFIX: &str = "MATH|";
const QR_PREFIX: &str = "QR|";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Plain,
    Image,
    Formula,
    Qr,
}

/// Value after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue<'a> {
    /// Unprefixed value, recursed into by the normalizer.
    Plain(&'a RawValue),
    Payload(Payload),
    /// A prefixed key bound to a list of payloads of the same kind.
    PayloadSequence(Vec<Payload>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classified<'a> {
    pub kind: PayloadKind,
    /// Template variable name, the key without its prefix.
    pub name: &'a str,
    pub value: TypedValue<'a>,
}

/// Split a key into its payload kind and bare variable name.
pub fn split_key(key: &str) -> (PayloadKind, &str) {
    [
        (IMG_PREFIX, PayloadKind::Image),
        (MATH_PREFIX, PayloadKind::Formula),
        (QR_PREFIX, PayloadKind::Qr),
    ]
    .into_iter()
    .find_map(|(prefix, kind)| key.strip_prefix(prefix).map(|name| (kind, name)))
    .unwrap_or((PayloadKind::Plain, key))
}

/// Classify `value` bound to `key`. `path` is the full key path used in errors.
pub fn classify<'a>(
    path: &str,
    key: &'a str,
    value: &'a RawValue,
) -> Result<Classified<'a>, EngineError> {
    let (kind, name) = split_key(key);
    let typed = match kind {
        PayloadKind::Plain => TypedValue::Plain(value),
        _ if name.is_empty() => {
            return Err(shape_error(path, "variable name after prefix is empty"));
        }
        _ => match value {
            RawValue::Sequence(items) => TypedValue::PayloadSequence(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| parse_payload(&format!("{path}[{i}]"), kind, item))
                    .collect::<Result<_, _>>()?,
            ),
            _ => TypedValue::Payload(parse_payload(path, kind, value)?),
        },
    };

    Ok(Classified {
        kind,
        name,
        value: typed,
    })
}

fn parse_payload(path: &str, kind: PayloadKind, value: &RawValue) -> Result<Payload, EngineError> {
    if value.as_mapping().is_none() {
        return Err(shape_error(
            path,
            &format!("expected an object, got {}", value.type_name()),
        ));
    }

    let json = serde_json::Value::from(value);
    let payload = match kind {
        PayloadKind::Image => Payload::Image(deserialize::<ImagePayload>(path, json)?),
        PayloadKind::Formula => Payload::Formula(deserialize::<FormulaPayload>(path, json)?),
        PayloadKind::Qr => Payload::Qr(deserialize::<QrPayload>(path, json)?),
        PayloadKind::Plain => return Err(shape_error(path, "plain values carry no payload")),
    };

    let validated = match &payload {
        Payload::Image(p) => p.validate(),
        Payload::Formula(p) => p.validate(),
        Payload::Qr(p) => p.validate(),
    };
    validated.map_err(|reason| shape_error(path, &reason))?;

    Ok(payload)
}

fn deserialize<T: serde::de::DeserializeOwned>(
    path: &str,
    json: serde_json::Value,
) -> Result<T, EngineError> {
    serde_json::from_value(json).map_err(|e| shape_error(path, &e.to_string()))
}

fn shape_error(path: &str, reason: &str) -> EngineError {
    EngineError::UnknownPayloadShape {
        key: path.to_string(),
        reason: reason.to_string(),
    }
}

fn validate_dimension(label: &str, value: Option<f64>) -> Result<(), String> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => {
            Err(format!("{label} must be a positive length in millimeters"))
        }
        _ => Ok(()),
    }
}

/// A dimension of zero means "not given".
pub(crate) fn effective_dimension(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v > 0.0)
}

impl Validator for ImagePayload {
    fn validate(&self) -> Result<(), String> {
        if self.source.trim().is_empty() {
            return Err("image source must not be empty".to_string());
        }
        validate_dimension("width", self.width)?;
        validate_dimension("height", self.height)
    }
}

impl Validator for FormulaPayload {
    fn validate(&self) -> Result<(), String> {
        if self.formula.trim().is_empty() {
            return Err("formula must not be empty".to_string());
        }
        Ok(())
    }
}

impl Validator for QrPayload {
    fn validate(&self) -> Result<(), String> {
        if self.data.is_empty() {
            return Err("QR data must not be empty".to_string());
        }
        validate_dimension("width", self.width)?;
        validate_dimension("height", self.height)
    }
}
