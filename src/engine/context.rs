//! Render context: what template substitution sees plus the object arena.

use std::collections::BTreeMap;

use minijinja::Value;

use super::value::{EmbeddedObject, PlacementToken, ResolvedValue, Scalar};
use super::EngineError;

/// Substitution mapping and the embedded objects it refers to.
///
/// Objects appear in the mapping only as opaque placement markers; the
/// renderer swaps the markers for package content after substitution.
#[derive(Debug, Default)]
pub struct RenderContext {
    variables: BTreeMap<String, Value>,
    objects: BTreeMap<PlacementToken, EmbeddedObject>,
}

impl RenderContext {
    /// Assemble the context from a normalized mapping.
    pub fn build(resolved: ResolvedValue) -> Result<Self, EngineError> {
        let mut context = RenderContext::default();
        let ResolvedValue::Mapping(entries) = resolved else {
            return Err(EngineError::StructuralMismatch(
                "render context root must be a mapping".to_string(),
            ));
        };
        for (name, value) in entries {
            let value = context.convert(value)?;
            context.variables.insert(name, value);
        }
        Ok(context)
    }

    fn convert(&mut self, value: ResolvedValue) -> Result<Value, EngineError> {
        Ok(match value {
            ResolvedValue::Scalar(scalar) => scalar_value(scalar),
            ResolvedValue::Sequence(items) => Value::from(
                items
                    .into_iter()
                    .map(|item| self.convert(item))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            ResolvedValue::Mapping(entries) => {
                let mut map = BTreeMap::new();
                for (name, item) in entries {
                    map.insert(name, self.convert(item)?);
                }
                Value::from(map)
            }
            ResolvedValue::Object(object) => {
                let token = object.token;
                if self.objects.insert(token, object).is_some() {
                    return Err(EngineError::RenderAssembly(format!(
                        "placement token {token} assigned twice"
                    )));
                }
                Value::from_safe_string(token.marker())
            }
        })
    }

    pub fn variables(&self) -> &BTreeMap<String, Value> {
        &self.variables
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn objects(&self) -> &BTreeMap<PlacementToken, EmbeddedObject> {
        &self.objects
    }

    pub fn object(&self, token: PlacementToken) -> Option<&EmbeddedObject> {
        self.objects.get(&token)
    }
}

fn scalar_value(scalar: Scalar) -> Value {
    match scalar {
        Scalar::Null => Value::from(()),
        Scalar::Bool(b) => Value::from(b),
        Scalar::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                Value::from(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Scalar::Text(text) => Value::from(without_marker_delimiters(text)),
    }
}

/// Drop the characters reserved for placement markers so text can never
/// be taken for an embedded object.
fn without_marker_delimiters(text: String) -> String {
    if text.contains([PlacementToken::OPEN, PlacementToken::CLOSE]) {
        text.replace([PlacementToken::OPEN, PlacementToken::CLOSE], "")
    } else {
        text
    }
}
