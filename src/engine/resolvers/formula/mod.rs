//! Formula resolver: LaTeX math to an inline OMML equation.

pub mod latex;
pub mod omml;
pub mod tree;

use log::{debug, warn};

use crate::engine::value::{ContentFormat, EmbeddedObject, FormulaPayload, ObjectKind, PlacementToken};
use crate::engine::ResolveError;

pub use tree::MathNode;

pub fn resolve(payload: &FormulaPayload, token: PlacementToken) -> Result<EmbeddedObject, ResolveError> {
    let tree = latex::parse(&payload.formula)?;
    if tree.is_empty() {
        warn!(
            "Formula for token {} produced no content, embedding an empty equation: {:?}",
            token, payload.formula
        );
    }

    let content = omml::to_omml(&tree);
    debug!("Formula {} converted to {} bytes of OMML", token, content.len());

    Ok(EmbeddedObject {
        kind: ObjectKind::Formula,
        format: ContentFormat::Omml,
        content: content.into_bytes(),
        extent: None,
        token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(formula: &str) -> FormulaPayload {
        FormulaPayload {
            formula: formula.to_string(),
        }
    }

    #[test]
    fn test_resolve_produces_omath_fragment() {
        let object = resolve(&payload(r"\frac{1}{2}"), PlacementToken(7)).unwrap();
        let xml = String::from_utf8(object.content).unwrap();
        assert_eq!(object.kind, ObjectKind::Formula);
        assert_eq!(object.extent, None);
        assert!(xml.starts_with("<m:oMath"));
        assert!(xml.contains("<m:f>"));
    }

    #[test]
    fn test_resolve_reports_syntax_errors() {
        let err = resolve(&payload(r"\frac{1"), PlacementToken(0)).unwrap_err();
        assert!(matches!(err, ResolveError::FormulaSyntax { .. }));
    }

    #[test]
    fn test_layout_only_formula_degrades_to_empty_equation() {
        let object = resolve(&payload(r"\displaystyle"), PlacementToken(0)).unwrap();
        let tree = omml::from_omml(std::str::from_utf8(&object.content).unwrap()).unwrap();
        assert!(tree.is_empty());
    }
}
