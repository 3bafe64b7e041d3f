//! Presentation tree shared by the LaTeX parser and the OMML reader/writer.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomKind {
    Ident,
    Number,
    Operator,
    /// Upright function or operator name such as `sin` or `lim`.
    Upright,
    /// Literal text, rendered without math styling.
    Text,
}

/// Classify a bare atom by its content.
///
/// Used by both the parser and the OMML reader so that plain runs come back
/// with the kind they were emitted with.
pub fn classify_atom(text: &str) -> AtomKind {
    if text.is_empty() {
        return AtomKind::Operator;
    }
    if text.chars().all(|c| c.is_ascii_digit() || c == '.')
        && text.chars().any(|c| c.is_ascii_digit())
    {
        AtomKind::Number
    } else if text.chars().all(char::is_alphabetic) {
        AtomKind::Ident
    } else {
        AtomKind::Operator
    }
}

/// Placement of n-ary operator limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitPlacement {
    /// Limits above and below, as for sums.
    UnderOver,
    /// Limits as scripts, as for integrals.
    SubSup,
}

impl LimitPlacement {
    pub fn as_omml(self) -> &'static str {
        match self {
            LimitPlacement::UnderOver => "undOvr",
            LimitPlacement::SubSup => "subSup",
        }
    }

    pub fn from_omml(value: &str) -> Self {
        match value {
            "subSup" => LimitPlacement::SubSup,
            _ => LimitPlacement::UnderOver,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MathNode {
    Atom {
        kind: AtomKind,
        text: String,
    },
    Row(Vec<MathNode>),
    Frac {
        num: Box<MathNode>,
        den: Box<MathNode>,
    },
    Sqrt(Box<MathNode>),
    Root {
        degree: Box<MathNode>,
        base: Box<MathNode>,
    },
    Sub {
        base: Box<MathNode>,
        sub: Box<MathNode>,
    },
    Sup {
        base: Box<MathNode>,
        sup: Box<MathNode>,
    },
    SubSup {
        base: Box<MathNode>,
        sub: Box<MathNode>,
        sup: Box<MathNode>,
    },
    LargeOp {
        op: String,
        limits: LimitPlacement,
        lower: Option<Box<MathNode>>,
        upper: Option<Box<MathNode>>,
        body: Box<MathNode>,
    },
    Fenced {
        open: String,
        close: String,
        body: Box<MathNode>,
    },
    Accent {
        mark: String,
        body: Box<MathNode>,
    },
    Matrix(Vec<Vec<MathNode>>),
}

impl MathNode {
    pub fn atom(kind: AtomKind, text: impl Into<String>) -> Self {
        MathNode::Atom {
            kind,
            text: text.into(),
        }
    }

    pub fn empty() -> Self {
        MathNode::Row(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, MathNode::Row(items) if items.iter().all(MathNode::is_empty))
    }

    /// Canonical form: nested rows flattened, single-element rows unwrapped.
    pub fn normalize(self) -> Self {
        let bx = |node: Box<MathNode>| Box::new(node.normalize());
        match self {
            MathNode::Row(items) => {
                let mut flat = Vec::with_capacity(items.len());
                for item in items {
                    match item.normalize() {
                        MathNode::Row(inner) => flat.extend(inner),
                        other => flat.push(other),
                    }
                }
                if flat.len() == 1 {
                    flat.remove(0)
                } else {
                    MathNode::Row(flat)
                }
            }
            MathNode::Frac { num, den } => MathNode::Frac {
                num: bx(num),
                den: bx(den),
            },
            MathNode::Sqrt(base) => MathNode::Sqrt(bx(base)),
            MathNode::Root { degree, base } => MathNode::Root {
                degree: bx(degree),
                base: bx(base),
            },
            MathNode::Sub { base, sub } => MathNode::Sub {
                base: bx(base),
                sub: bx(sub),
            },
            MathNode::Sup { base, sup } => MathNode::Sup {
                base: bx(base),
                sup: bx(sup),
            },
            MathNode::SubSup { base, sub, sup } => MathNode::SubSup {
                base: bx(base),
                sub: bx(sub),
                sup: bx(sup),
            },
            MathNode::LargeOp {
                op,
                limits,
                lower,
                upper,
                body,
            } => MathNode::LargeOp {
                op,
                limits,
                lower: lower.map(bx).filter(|n| !n.is_empty()),
                upper: upper.map(bx).filter(|n| !n.is_empty()),
                body: bx(body),
            },
            MathNode::Fenced { open, close, body } => MathNode::Fenced {
                open,
                close,
                body: bx(body),
            },
            MathNode::Accent { mark, body } => MathNode::Accent {
                mark,
                body: bx(body),
            },
            MathNode::Matrix(rows) => MathNode::Matrix(
                rows.into_iter()
                    .map(|row| row.into_iter().map(MathNode::normalize).collect())
                    .collect(),
            ),
            atom @ MathNode::Atom { .. } => atom,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_atom() {
        assert_eq!(classify_atom("x"), AtomKind::Ident);
        assert_eq!(classify_atom("α"), AtomKind::Ident);
        assert_eq!(classify_atom("3.14"), AtomKind::Number);
        assert_eq!(classify_atom("+"), AtomKind::Operator);
        assert_eq!(classify_atom("."), AtomKind::Operator);
        assert_eq!(classify_atom("∞"), AtomKind::Operator);
    }

    #[test]
    fn test_normalize_flattens_rows() {
        let x = MathNode::atom(AtomKind::Ident, "x");
        let nested = MathNode::Row(vec![MathNode::Row(vec![x.clone()]), MathNode::empty()]);
        assert_eq!(nested.normalize(), x);
    }

    #[test]
    fn test_normalize_drops_empty_limits() {
        let op = MathNode::LargeOp {
            op: "∑".into(),
            limits: LimitPlacement::UnderOver,
            lower: Some(Box::new(MathNode::empty())),
            upper: None,
            body: Box::new(MathNode::empty()),
        };
        match op.normalize() {
            MathNode::LargeOp { lower, .. } => assert!(lower.is_none()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
