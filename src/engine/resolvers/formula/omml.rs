//! Presentation tree to OMML and back.
//!
//! Every compound node maps onto exactly one OMML element with a fixed list of
//! argument slots, listed in [`STRUCTURES`]. The writer and the reader both go
//! through that table.

use std::collections::HashMap;

use quick_xml::escape::escape;

use super::tree::{classify_atom, AtomKind, LimitPlacement, MathNode};
use crate::engine::xml::{parse_tree, XmlElement, XmlError};

pub const MATH_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/math";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureKind {
    Frac,
    Sqrt,
    Root,
    Sub,
    Sup,
    SubSup,
    LargeOp,
    Fenced,
    Accent,
}

pub struct Structure {
    pub kind: StructureKind,
    pub element: &'static str,
    pub props: &'static str,
    /// Argument slots in document order.
    pub slots: &'static [&'static str],
}

pub const STRUCTURES: &[Structure] = &[
    Structure {
        kind: StructureKind::Frac,
        element: "m:f",
        props: "m:fPr",
        slots: &["m:num", "m:den"],
    },
    Structure {
        kind: StructureKind::Sqrt,
        element: "m:rad",
        props: "m:radPr",
        slots: &["m:deg", "m:e"],
    },
    Structure {
        kind: StructureKind::Root,
        element: "m:rad",
        props: "m:radPr",
        slots: &["m:deg", "m:e"],
    },
    Structure {
        kind: StructureKind::Sub,
        element: "m:sSub",
        props: "m:sSubPr",
        slots: &["m:e", "m:sub"],
    },
    Structure {
        kind: StructureKind::Sup,
        element: "m:sSup",
        props: "m:sSupPr",
        slots: &["m:e", "m:sup"],
    },
    Structure {
        kind: StructureKind::SubSup,
        element: "m:sSubSup",
        props: "m:sSubSupPr",
        slots: &["m:e", "m:sub", "m:sup"],
    },
    Structure {
        kind: StructureKind::LargeOp,
        element: "m:nary",
        props: "m:naryPr",
        slots: &["m:sub", "m:sup", "m:e"],
    },
    Structure {
        kind: StructureKind::Fenced,
        element: "m:d",
        props: "m:dPr",
        slots: &["m:e"],
    },
    Structure {
        kind: StructureKind::Accent,
        element: "m:acc",
        props: "m:accPr",
        slots: &["m:e"],
    },
];

fn structure_of(kind: StructureKind) -> &'static Structure {
    // The table has one entry per kind.
    STRUCTURES
        .iter()
        .find(|s| s.kind == kind)
        .unwrap_or(&STRUCTURES[0])
}

/// Property values keyed by local name, e.g. `chr` -> `∑`.
type Props = Vec<(&'static str, String)>;

/// Split a compound node into its structure, properties and slot contents.
fn decompose(node: &MathNode) -> Option<(StructureKind, Props, Vec<Option<&MathNode>>)> {
    let parts = match node {
        MathNode::Frac { num, den } => (StructureKind::Frac, vec![], vec![Some(&**num), Some(&**den)]),
        MathNode::Sqrt(base) => (
            StructureKind::Sqrt,
            vec![("degHide", "1".to_string())],
            vec![None, Some(&**base)],
        ),
        MathNode::Root { degree, base } => (
            StructureKind::Root,
            vec![],
            vec![Some(&**degree), Some(&**base)],
        ),
        MathNode::Sub { base, sub } => (StructureKind::Sub, vec![], vec![Some(&**base), Some(&**sub)]),
        MathNode::Sup { base, sup } => (StructureKind::Sup, vec![], vec![Some(&**base), Some(&**sup)]),
        MathNode::SubSup { base, sub, sup } => (
            StructureKind::SubSup,
            vec![],
            vec![Some(&**base), Some(&**sub), Some(&**sup)],
        ),
        MathNode::LargeOp {
            op,
            limits,
            lower,
            upper,
            body,
        } => {
            let mut props = vec![
                ("chr", op.clone()),
                ("limLoc", limits.as_omml().to_string()),
            ];
            if lower.is_none() {
                props.push(("subHide", "1".to_string()));
            }
            if upper.is_none() {
                props.push(("supHide", "1".to_string()));
            }
            (
                StructureKind::LargeOp,
                props,
                vec![lower.as_deref(), upper.as_deref(), Some(&**body)],
            )
        }
        MathNode::Fenced { open, close, body } => (
            StructureKind::Fenced,
            vec![("begChr", open.clone()), ("endChr", close.clone())],
            vec![Some(&**body)],
        ),
        MathNode::Accent { mark, body } => (
            StructureKind::Accent,
            vec![("chr", mark.clone())],
            vec![Some(&**body)],
        ),
        MathNode::Atom { .. } | MathNode::Row(_) | MathNode::Matrix(_) => return None,
    };
    Some(parts)
}

/// Rebuild a compound node from its structure, properties and slot contents.
fn compose(kind: StructureKind, props: &HashMap<String, String>, mut slots: Vec<MathNode>) -> MathNode {
    let mut take = |idx: usize| Box::new(std::mem::replace(&mut slots[idx], MathNode::empty()));
    let prop = |name: &str| props.get(name).cloned().unwrap_or_default();
    let hidden = |name: &str| props.get(name).is_some_and(|v| v == "1" || v == "on" || v == "true");

    match kind {
        StructureKind::Frac => MathNode::Frac {
            num: take(0),
            den: take(1),
        },
        StructureKind::Sqrt => MathNode::Sqrt(take(1)),
        StructureKind::Root => MathNode::Root {
            degree: take(0),
            base: take(1),
        },
        StructureKind::Sub => MathNode::Sub {
            base: take(0),
            sub: take(1),
        },
        StructureKind::Sup => MathNode::Sup {
            base: take(0),
            sup: take(1),
        },
        StructureKind::SubSup => MathNode::SubSup {
            base: take(0),
            sub: take(1),
            sup: take(2),
        },
        StructureKind::LargeOp => {
            let lower = take(0);
            let upper = take(1);
            MathNode::LargeOp {
                op: prop("chr"),
                limits: LimitPlacement::from_omml(&prop("limLoc")),
                lower: (!hidden("subHide")).then_some(lower),
                upper: (!hidden("supHide")).then_some(upper),
                body: take(2),
            }
        }
        StructureKind::Fenced => MathNode::Fenced {
            // OMML defaults to parentheses when the characters are absent.
            open: props.get("begChr").cloned().unwrap_or_else(|| "(".to_string()),
            close: props.get("endChr").cloned().unwrap_or_else(|| ")".to_string()),
            body: take(0),
        },
        StructureKind::Accent => MathNode::Accent {
            mark: props.get("chr").cloned().unwrap_or_else(|| "\u{0302}".to_string()),
            body: take(0),
        },
    }
}

/// Serialize a tree into a standalone `<m:oMath>` fragment.
pub fn to_omml(node: &MathNode) -> String {
    let mut out = format!(r#"<m:oMath xmlns:m="{MATH_NS}">"#);
    write_node(node, &mut out);
    out.push_str("</m:oMath>");
    out
}

fn write_node(node: &MathNode, out: &mut String) {
    match node {
        MathNode::Atom { kind, text } => write_run(*kind, text, out),
        MathNode::Row(items) => items.iter().for_each(|item| write_node(item, out)),
        MathNode::Matrix(rows) => {
            out.push_str("<m:m>");
            for row in rows {
                out.push_str("<m:mr>");
                for cell in row {
                    write_slot("m:e", Some(cell), out);
                }
                out.push_str("</m:mr>");
            }
            out.push_str("</m:m>");
        }
        compound => {
            if let Some((kind, props, slots)) = decompose(compound) {
                let shape = structure_of(kind);
                out.push_str(&format!("<{}>", shape.element));
                if !props.is_empty() {
                    out.push_str(&format!("<{}>", shape.props));
                    for (name, value) in &props {
                        out.push_str(&format!(r#"<m:{name} m:val="{}"/>"#, escape(value.as_str())));
                    }
                    out.push_str(&format!("</{}>", shape.props));
                }
                for (slot, content) in shape.slots.iter().zip(slots) {
                    write_slot(slot, content, out);
                }
                out.push_str(&format!("</{}>", shape.element));
            }
        }
    }
}

fn write_slot(slot: &str, content: Option<&MathNode>, out: &mut String) {
    match content {
        Some(node) if !node.is_empty() => {
            out.push_str(&format!("<{slot}>"));
            write_node(node, out);
            out.push_str(&format!("</{slot}>"));
        }
        _ => out.push_str(&format!("<{slot}/>")),
    }
}

fn write_run(kind: AtomKind, text: &str, out: &mut String) {
    out.push_str("<m:r>");
    match kind {
        AtomKind::Upright => out.push_str(r#"<m:rPr><m:sty m:val="p"/></m:rPr>"#),
        AtomKind::Text => out.push_str("<m:rPr><m:nor/></m:rPr>"),
        _ => {}
    }
    out.push_str(r#"<m:t xml:space="preserve">"#);
    out.push_str(&escape(text));
    out.push_str("</m:t></m:r>");
}

/// Decode an `<m:oMath>` fragment back into a normalized presentation tree.
pub fn from_omml(xml: &str) -> Result<MathNode, XmlError> {
    let root = parse_tree(xml)?;
    if root.name != "m:oMath" {
        return Err(XmlError::Malformed(format!("expected m:oMath, found {}", root.name)));
    }
    Ok(read_children(&root)?.normalize())
}

fn read_children(element: &XmlElement) -> Result<MathNode, XmlError> {
    let mut items = Vec::new();
    for child in element.elements() {
        if child.name.ends_with("Pr") {
            continue;
        }
        items.push(read_element(child)?);
    }
    Ok(MathNode::Row(items))
}

fn read_element(element: &XmlElement) -> Result<MathNode, XmlError> {
    match element.name.as_str() {
        "m:r" => Ok(read_run(element)),
        "m:m" => {
            let rows = element
                .elements()
                .filter(|el| el.name == "m:mr")
                .map(|row| {
                    row.elements()
                        .filter(|el| el.name == "m:e")
                        .map(read_children)
                        .collect::<Result<Vec<_>, _>>()
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(MathNode::Matrix(rows))
        }
        name => {
            let props = element
                .elements()
                .find(|el| el.name.ends_with("Pr"))
                .map(read_props)
                .unwrap_or_default();

            let candidates: Vec<&Structure> =
                STRUCTURES.iter().filter(|s| s.element == name).collect();
            let shape = match candidates.as_slice() {
                [] => return Err(XmlError::Malformed(format!("unsupported math element {name}"))),
                [only] => *only,
                _ => {
                    // m:rad: square root when the degree is hidden or empty.
                    let degree_hidden = props.get("degHide").is_some_and(|v| v == "1" || v == "on")
                        || element.child("m:deg").map_or(true, |deg| deg.children.is_empty());
                    let kind = if degree_hidden {
                        StructureKind::Sqrt
                    } else {
                        StructureKind::Root
                    };
                    structure_of(kind)
                }
            };

            let slots = shape
                .slots
                .iter()
                .map(|slot| match element.child(slot) {
                    Some(el) => read_children(el),
                    None => Ok(MathNode::empty()),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(compose(shape.kind, &props, slots))
        }
    }
}

fn read_props(element: &XmlElement) -> HashMap<String, String> {
    element
        .elements()
        .map(|prop| {
            let local = prop.name.strip_prefix("m:").unwrap_or(&prop.name).to_string();
            let value = prop.attr("m:val").unwrap_or("1").to_string();
            (local, value)
        })
        .collect()
}

fn read_run(element: &XmlElement) -> MathNode {
    let text = element
        .elements()
        .filter(|el| el.name == "m:t")
        .map(XmlElement::text)
        .collect::<String>();

    let kind = match element.child("m:rPr") {
        Some(rpr) if rpr.child("m:nor").is_some() => AtomKind::Text,
        Some(rpr) if rpr.child("m:sty").and_then(|sty| sty.attr("m:val")) == Some("p") => {
            AtomKind::Upright
        }
        _ => classify_atom(&text),
    };
    MathNode::atom(kind, text)
}

#[cfg(test)]
mod tests {
    use super::super::latex::parse;
    use super::*;

    fn round_trip(latex: &str) {
        let tree = parse(latex).unwrap();
        let omml = to_omml(&tree);
        let back = from_omml(&omml).unwrap();
        assert_eq!(back, tree, "round trip of {latex} via {omml}");
    }

    #[test]
    fn test_round_trip_structures() {
        for latex in [
            "x + 1",
            r"\frac{a + b}{c}",
            r"\sqrt{x^2 + y^2}",
            r"\sqrt[3]{8}",
            r"x_i^2",
            r"\sum_{i=1}^{n} i^2",
            r"\int_0^1 f(x) \, dx",
            r"\prod x",
            r"\left[ \frac{1}{2} \right.",
            r"\hat{x} + \vec{v}",
            r"\begin{bmatrix} 1 & 0 \\ 0 & 1 \end{bmatrix}",
            r"\sin \theta + \text{otherwise}",
            r"\lim_{x \to 0} \frac{\sin x}{x}",
            r"a < b \& c",
        ] {
            round_trip(latex);
        }
    }

    #[test]
    fn test_fragment_declares_math_namespace() {
        let omml = to_omml(&parse("x").unwrap());
        assert!(omml.starts_with(
            r#"<m:oMath xmlns:m="http://schemas.openxmlformats.org/officeDocument/2006/math">"#
        ));
    }

    #[test]
    fn test_fraction_slots_in_order() {
        let omml = to_omml(&parse(r"\frac{1}{2}").unwrap());
        let num = omml.find("<m:num>").unwrap();
        let den = omml.find("<m:den>").unwrap();
        assert!(num < den);
        assert!(omml.contains("<m:f>"));
    }

    #[test]
    fn test_upright_and_text_runs_are_styled() {
        let omml = to_omml(&parse(r"\sin \text{a}").unwrap());
        assert!(omml.contains(r#"<m:rPr><m:sty m:val="p"/></m:rPr><m:t xml:space="preserve">sin</m:t>"#));
        assert!(omml.contains("<m:rPr><m:nor/></m:rPr>"));
    }

    #[test]
    fn test_escapes_markup_characters() {
        let omml = to_omml(&parse("a < b").unwrap());
        assert!(omml.contains("&lt;"));
        assert!(crate::engine::xml::check_well_formed(&omml).is_ok());
    }

    #[test]
    fn test_sqrt_hides_degree() {
        let omml = to_omml(&parse(r"\sqrt{x}").unwrap());
        assert!(omml.contains(r#"<m:degHide m:val="1"/>"#));
        assert!(omml.contains("<m:deg/>"));
    }

    #[test]
    fn test_empty_tree_is_empty_equation() {
        let omml = to_omml(&MathNode::empty());
        assert!(omml.ends_with("></m:oMath>"));
        assert!(from_omml(&omml).unwrap().is_empty());
    }
}
