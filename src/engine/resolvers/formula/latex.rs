//! LaTeX math parser producing a [`MathNode`] tree.
//!
//! Covers the notation found in typical report templates: scripts, fractions,
//! radicals, n-ary operators, `\left..\right` groups, accents, matrix
//! environments and the common symbol set.

use super::tree::{classify_atom, AtomKind, LimitPlacement, MathNode};
use crate::engine::ResolveError;

const GREEK: &[(&str, &str)] = &[
    ("alpha", "α"),
    ("beta", "β"),
    ("gamma", "γ"),
    ("delta", "δ"),
    ("epsilon", "ϵ"),
    ("varepsilon", "ε"),
    ("zeta", "ζ"),
    ("eta", "η"),
    ("theta", "θ"),
    ("vartheta", "ϑ"),
    ("iota", "ι"),
    ("kappa", "κ"),
    ("lambda", "λ"),
    ("mu", "μ"),
    ("nu", "ν"),
    ("xi", "ξ"),
    ("pi", "π"),
    ("varpi", "ϖ"),
    ("rho", "ρ"),
    ("varrho", "ϱ"),
    ("sigma", "σ"),
    ("varsigma", "ς"),
    ("tau", "τ"),
    ("upsilon", "υ"),
    ("phi", "ϕ"),
    ("varphi", "φ"),
    ("chi", "χ"),
    ("psi", "ψ"),
    ("omega", "ω"),
    ("Gamma", "Γ"),
    ("Delta", "Δ"),
    ("Theta", "Θ"),
    ("Lambda", "Λ"),
    ("Xi", "Ξ"),
    ("Pi", "Π"),
    ("Sigma", "Σ"),
    ("Upsilon", "Υ"),
    ("Phi", "Φ"),
    ("Psi", "Ψ"),
    ("Omega", "Ω"),
];

const SYMBOLS: &[(&str, &str)] = &[
    ("times", "×"),
    ("cdot", "⋅"),
    ("pm", "±"),
    ("mp", "∓"),
    ("div", "÷"),
    ("ast", "∗"),
    ("star", "⋆"),
    ("circ", "∘"),
    ("bullet", "∙"),
    ("leq", "≤"),
    ("le", "≤"),
    ("geq", "≥"),
    ("ge", "≥"),
    ("neq", "≠"),
    ("ne", "≠"),
    ("ll", "≪"),
    ("gg", "≫"),
    ("approx", "≈"),
    ("equiv", "≡"),
    ("sim", "∼"),
    ("simeq", "≃"),
    ("cong", "≅"),
    ("propto", "∝"),
    ("infty", "∞"),
    ("partial", "∂"),
    ("nabla", "∇"),
    ("to", "→"),
    ("rightarrow", "→"),
    ("leftarrow", "←"),
    ("gets", "←"),
    ("leftrightarrow", "↔"),
    ("Rightarrow", "⇒"),
    ("Leftarrow", "⇐"),
    ("Leftrightarrow", "⇔"),
    ("implies", "⟹"),
    ("iff", "⟺"),
    ("mapsto", "↦"),
    ("in", "∈"),
    ("notin", "∉"),
    ("ni", "∋"),
    ("subset", "⊂"),
    ("supset", "⊃"),
    ("subseteq", "⊆"),
    ("supseteq", "⊇"),
    ("cup", "∪"),
    ("cap", "∩"),
    ("setminus", "∖"),
    ("emptyset", "∅"),
    ("forall", "∀"),
    ("exists", "∃"),
    ("neg", "¬"),
    ("land", "∧"),
    ("wedge", "∧"),
    ("lor", "∨"),
    ("vee", "∨"),
    ("oplus", "⊕"),
    ("otimes", "⊗"),
    ("perp", "⊥"),
    ("parallel", "∥"),
    ("mid", "∣"),
    ("angle", "∠"),
    ("degree", "°"),
    ("prime", "′"),
    ("cdots", "⋯"),
    ("ldots", "…"),
    ("dots", "…"),
    ("vdots", "⋮"),
    ("ddots", "⋱"),
    ("hbar", "ℏ"),
    ("ell", "ℓ"),
    ("langle", "⟨"),
    ("rangle", "⟩"),
    ("lfloor", "⌊"),
    ("rfloor", "⌋"),
    ("lceil", "⌈"),
    ("rceil", "⌉"),
    ("vert", "|"),
    ("lvert", "|"),
    ("rvert", "|"),
    ("Vert", "‖"),
    ("|", "‖"),
    ("{", "{"),
    ("}", "}"),
    ("%", "%"),
    ("$", "$"),
    ("&", "&"),
    ("#", "#"),
    ("_", "_"),
];

const FUNCTIONS: &[&str] = &[
    "sin", "cos", "tan", "cot", "sec", "csc", "arcsin", "arccos", "arctan", "sinh", "cosh",
    "tanh", "coth", "log", "ln", "lg", "exp", "lim", "limsup", "liminf", "max", "min", "sup",
    "inf", "det", "dim", "ker", "deg", "gcd", "arg", "hom", "Pr",
];

const LARGE_OPS: &[(&str, &str, LimitPlacement)] = &[
    ("sum", "∑", LimitPlacement::UnderOver),
    ("prod", "∏", LimitPlacement::UnderOver),
    ("coprod", "∐", LimitPlacement::UnderOver),
    ("bigcup", "⋃", LimitPlacement::UnderOver),
    ("bigcap", "⋂", LimitPlacement::UnderOver),
    ("bigoplus", "⨁", LimitPlacement::UnderOver),
    ("bigotimes", "⨂", LimitPlacement::UnderOver),
    ("int", "∫", LimitPlacement::SubSup),
    ("iint", "∬", LimitPlacement::SubSup),
    ("iiint", "∭", LimitPlacement::SubSup),
    ("oint", "∮", LimitPlacement::SubSup),
];

const ACCENTS: &[(&str, &str)] = &[
    ("hat", "\u{0302}"),
    ("widehat", "\u{0302}"),
    ("tilde", "\u{0303}"),
    ("widetilde", "\u{0303}"),
    ("bar", "\u{0305}"),
    ("overline", "\u{0305}"),
    ("vec", "\u{20D7}"),
    ("dot", "\u{0307}"),
    ("ddot", "\u{0308}"),
    ("check", "\u{030C}"),
    ("acute", "\u{0301}"),
    ("grave", "\u{0300}"),
    ("breve", "\u{0306}"),
];

const SPACES: &[(&str, &str)] = &[
    (",", "\u{2009}"),
    (":", "\u{2005}"),
    (">", "\u{2005}"),
    (";", "\u{2004}"),
    (" ", " "),
    ("quad", "\u{2003}"),
    ("qquad", "\u{2003}\u{2003}"),
];

/// Commands that only affect LaTeX layout and have no OMML counterpart.
const IGNORED: &[&str] = &[
    "!",
    "limits",
    "nolimits",
    "displaystyle",
    "textstyle",
    "scriptstyle",
    "big",
    "Big",
    "bigg",
    "Bigg",
];

const STYLED: &[&str] = &[
    "mathbf",
    "mathit",
    "mathsf",
    "mathtt",
    "mathcal",
    "mathbb",
    "mathfrak",
    "boldsymbol",
    "bm",
];

fn lookup(table: &[(&str, &'static str)], name: &str) -> Option<&'static str> {
    table.iter().find(|(key, _)| *key == name).map(|(_, value)| *value)
}

/// Parse LaTeX math into a normalized presentation tree.
pub fn parse(input: &str) -> Result<MathNode, ResolveError> {
    let mut parser = Parser {
        src: input,
        pos: 0,
        depth: 0,
    };
    let items = parser.parse_row(Stop::End)?;
    Ok(MathNode::Row(items).normalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Char(char),
    Command(&'a str),
}

/// What ends the row currently being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    End,
    Group,
    Optional,
    Right,
    Cell,
}

/// Deepest nesting of groups, arguments and environments accepted.
const MAX_DEPTH: usize = 256;

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, offset: usize, message: impl Into<String>) -> ResolveError {
        ResolveError::FormulaSyntax {
            offset,
            message: message.into(),
        }
    }

    fn skip_ws(&mut self) {
        let rest = &self.src[self.pos..];
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    fn peek(&self) -> Option<(Token<'a>, usize)> {
        let rest = &self.src[self.pos..];
        let c = rest.chars().next()?;
        if c != '\\' {
            return Some((Token::Char(c), c.len_utf8()));
        }
        let after = &rest[1..];
        let letters = after.bytes().take_while(u8::is_ascii_alphabetic).count();
        if letters > 0 {
            return Some((Token::Command(&after[..letters]), 1 + letters));
        }
        match after.chars().next() {
            Some(n) => Some((Token::Command(&after[..n.len_utf8()]), 1 + n.len_utf8())),
            None => Some((Token::Command(""), 1)),
        }
    }

    fn next_token(&mut self) -> Option<Token<'a>> {
        let (token, len) = self.peek()?;
        self.pos += len;
        Some(token)
    }

    fn at_terminator(&mut self) -> bool {
        self.skip_ws();
        matches!(
            self.peek(),
            None | Some((Token::Char('}' | ']' | '&'), _))
                | Some((Token::Command("\\" | "right" | "end"), _))
        )
    }

    /// Run `parse` one nesting level deeper.
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ResolveError>,
    ) -> Result<T, ResolveError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error(self.pos, format!("nesting deeper than {MAX_DEPTH} levels")));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn parse_row(&mut self, stop: Stop) -> Result<Vec<MathNode>, ResolveError> {
        self.nested(|parser| parser.parse_row_items(stop))
    }

    fn parse_row_items(&mut self, stop: Stop) -> Result<Vec<MathNode>, ResolveError> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            let at = self.pos;
            let Some((token, len)) = self.peek() else {
                return match stop {
                    Stop::End => Ok(items),
                    Stop::Group => Err(self.error(at, "unbalanced braces: missing '}'")),
                    Stop::Optional => Err(self.error(at, "missing ']'")),
                    Stop::Right => Err(self.error(at, "\\left without matching \\right")),
                    Stop::Cell => Err(self.error(at, "unterminated environment")),
                };
            };

            match (token, stop) {
                (Token::Char('}'), Stop::Group)
                | (Token::Char(']'), Stop::Optional)
                | (Token::Command("right"), Stop::Right)
                | (Token::Char('&'), Stop::Cell)
                | (Token::Command("\\" | "end"), Stop::Cell) => return Ok(items),
                (Token::Char('}'), _) => {
                    return Err(self.error(at, "unbalanced braces: unexpected '}'"));
                }
                (Token::Command("right"), _) => {
                    return Err(self.error(at, "\\right without matching \\left"));
                }
                (Token::Command("end"), _) => {
                    return Err(self.error(at, "\\end without matching \\begin"));
                }
                (Token::Char('&'), _) => {
                    return Err(self.error(at, "'&' outside of an environment"));
                }
                (Token::Command("\\"), _) => {
                    // Line break outside an environment.
                    self.pos += len;
                    continue;
                }
                _ => {}
            }

            if let Some(node) = self.parse_scripted()? {
                items.push(node);
            }
        }
    }

    /// A primary with any trailing `_`/`^` scripts attached.
    fn parse_scripted(&mut self) -> Result<Option<MathNode>, ResolveError> {
        self.skip_ws();
        let base = match self.peek() {
            Some((Token::Char('_' | '^'), _)) => MathNode::empty(),
            _ => match self.parse_primary()? {
                Some(node) => node,
                None => return Ok(None),
            },
        };

        let mut sub = None;
        let mut sup = None;
        loop {
            self.skip_ws();
            let at = self.pos;
            match self.peek() {
                Some((Token::Char('_'), len)) => {
                    self.pos += len;
                    if sub.is_some() {
                        return Err(self.error(at, "double subscript"));
                    }
                    sub = Some(self.parse_argument("_")?);
                }
                Some((Token::Char('^'), len)) => {
                    self.pos += len;
                    if sup.is_some() {
                        return Err(self.error(at, "double superscript"));
                    }
                    sup = Some(self.parse_argument("^")?);
                }
                _ => break,
            }
        }

        let node = match (base, sub, sup) {
            (MathNode::LargeOp { op, limits, .. }, lower, upper) => {
                let body = if self.at_terminator() {
                    MathNode::empty()
                } else {
                    self.parse_scripted()?.unwrap_or_else(MathNode::empty)
                };
                MathNode::LargeOp {
                    op,
                    limits,
                    lower: lower.map(Box::new),
                    upper: upper.map(Box::new),
                    body: Box::new(body),
                }
            }
            (base, None, None) => base,
            (base, Some(sub), None) => MathNode::Sub {
                base: Box::new(base),
                sub: Box::new(sub),
            },
            (base, None, Some(sup)) => MathNode::Sup {
                base: Box::new(base),
                sup: Box::new(sup),
            },
            (base, Some(sub), Some(sup)) => MathNode::SubSup {
                base: Box::new(base),
                sub: Box::new(sub),
                sup: Box::new(sup),
            },
        };
        Ok(Some(node))
    }

    /// A required argument: a braced group or a single token.
    fn parse_argument(&mut self, owner: &str) -> Result<MathNode, ResolveError> {
        self.nested(|parser| parser.parse_argument_node(owner))
    }

    fn parse_argument_node(&mut self, owner: &str) -> Result<MathNode, ResolveError> {
        self.skip_ws();
        let at = self.pos;
        let missing = || format!("missing argument for {owner}");
        match self.peek() {
            Some((Token::Char('{'), _)) => self.parse_group(),
            Some((Token::Char('}' | ']' | '&' | '^' | '_'), _)) | None => {
                Err(self.error(at, missing()))
            }
            Some((Token::Command("\\" | "right" | "end"), _)) => Err(self.error(at, missing())),
            Some((Token::Char(c), len)) => {
                self.pos += len;
                Ok(MathNode::atom(classify_atom(&c.to_string()), c.to_string()))
            }
            Some((Token::Command(_), _)) => match self.parse_primary()? {
                Some(node) => Ok(node),
                None => Err(self.error(at, missing())),
            },
        }
    }

    fn parse_group(&mut self) -> Result<MathNode, ResolveError> {
        // Opening brace.
        self.pos += 1;
        let items = self.parse_row(Stop::Group)?;
        self.pos += 1;
        Ok(MathNode::Row(items))
    }

    fn parse_primary(&mut self) -> Result<Option<MathNode>, ResolveError> {
        self.skip_ws();
        let at = self.pos;
        let Some(token) = self.next_token() else {
            return Ok(None);
        };

        let node = match token {
            Token::Char('{') => {
                self.pos = at;
                self.parse_group()?
            }
            Token::Char(c) if c.is_ascii_digit() => {
                self.pos = at;
                self.parse_number()
            }
            Token::Char(c) if c.is_alphabetic() => MathNode::atom(AtomKind::Ident, c),
            Token::Char('-') => MathNode::atom(AtomKind::Operator, "−"),
            Token::Char('*') => MathNode::atom(AtomKind::Operator, "∗"),
            Token::Char('\'') => MathNode::atom(AtomKind::Operator, "′"),
            Token::Char('~') => MathNode::atom(AtomKind::Text, "\u{00A0}"),
            Token::Char('$') => return Ok(None),
            Token::Char('#') => return Err(self.error(at, "unexpected '#'")),
            Token::Char(c) => MathNode::atom(AtomKind::Operator, c),
            Token::Command(name) => return self.parse_command(name, at),
        };
        Ok(Some(node))
    }

    fn parse_number(&mut self) -> MathNode {
        let bytes = self.src.as_bytes();
        let start = self.pos;
        let mut end = start;
        while end < bytes.len() {
            let digit = bytes[end].is_ascii_digit();
            let decimal_point = bytes[end] == b'.'
                && end + 1 < bytes.len()
                && bytes[end + 1].is_ascii_digit();
            if !(digit || decimal_point) {
                break;
            }
            end += 1;
        }
        self.pos = end;
        MathNode::atom(AtomKind::Number, &self.src[start..end])
    }

    fn parse_command(&mut self, name: &'a str, at: usize) -> Result<Option<MathNode>, ResolveError> {
        let node = match name {
            "frac" | "dfrac" | "tfrac" | "cfrac" => {
                let num = self.parse_argument("\\frac")?;
                let den = self.parse_argument("\\frac")?;
                MathNode::Frac {
                    num: Box::new(num),
                    den: Box::new(den),
                }
            }
            "sqrt" => {
                self.skip_ws();
                if let Some((Token::Char('['), len)) = self.peek() {
                    self.pos += len;
                    let degree = self.parse_row(Stop::Optional)?;
                    self.pos += 1;
                    let base = self.parse_argument("\\sqrt")?;
                    MathNode::Root {
                        degree: Box::new(MathNode::Row(degree)),
                        base: Box::new(base),
                    }
                } else {
                    MathNode::Sqrt(Box::new(self.parse_argument("\\sqrt")?))
                }
            }
            "left" => {
                let open = self.parse_delimiter("\\left")?;
                let body = self.parse_row(Stop::Right)?;
                // Consume `\right`.
                self.next_token();
                let close = self.parse_delimiter("\\right")?;
                MathNode::Fenced {
                    open,
                    close,
                    body: Box::new(MathNode::Row(body)),
                }
            }
            "begin" => self.parse_environment(at)?,
            "text" | "textrm" | "textit" | "textbf" | "mbox" => {
                MathNode::atom(AtomKind::Text, self.parse_raw_group(name)?)
            }
            "mathrm" | "operatorname" => {
                MathNode::atom(AtomKind::Upright, self.parse_raw_group(name)?)
            }
            _ if STYLED.contains(&name) => self.parse_argument(name)?,
            _ if IGNORED.contains(&name) => return Ok(None),
            _ if FUNCTIONS.contains(&name) => MathNode::atom(AtomKind::Upright, name),
            _ => {
                if let Some((_, op, limits)) = LARGE_OPS.iter().find(|(key, _, _)| *key == name) {
                    MathNode::LargeOp {
                        op: op.to_string(),
                        limits: *limits,
                        lower: None,
                        upper: None,
                        body: Box::new(MathNode::empty()),
                    }
                } else if let Some(mark) = lookup(ACCENTS, name) {
                    let body = self.parse_argument(name)?;
                    MathNode::Accent {
                        mark: mark.to_string(),
                        body: Box::new(body),
                    }
                } else if let Some(space) = lookup(SPACES, name) {
                    MathNode::atom(AtomKind::Text, space)
                } else if let Some(symbol) = lookup(GREEK, name).or_else(|| lookup(SYMBOLS, name)) {
                    MathNode::atom(classify_atom(symbol), symbol)
                } else {
                    return Err(self.error(at, format!("unknown control sequence \\{name}")));
                }
            }
        };
        Ok(Some(node))
    }

    fn parse_delimiter(&mut self, owner: &str) -> Result<String, ResolveError> {
        self.skip_ws();
        let at = self.pos;
        let delimiter = match self.next_token() {
            Some(Token::Char('.')) => Some(""),
            Some(Token::Char('<')) => Some("⟨"),
            Some(Token::Char('>')) => Some("⟩"),
            Some(Token::Char(c @ ('(' | ')' | '[' | ']' | '|' | '/'))) => {
                return Ok(c.to_string());
            }
            Some(Token::Command(name)) => lookup(SYMBOLS, name).filter(|_| {
                matches!(
                    name,
                    "{" | "}"
                        | "|"
                        | "langle"
                        | "rangle"
                        | "lfloor"
                        | "rfloor"
                        | "lceil"
                        | "rceil"
                        | "vert"
                        | "lvert"
                        | "rvert"
                        | "Vert"
                )
            }),
            _ => None,
        };
        delimiter
            .map(str::to_string)
            .ok_or_else(|| self.error(at, format!("missing delimiter after {owner}")))
    }

    /// Verbatim text of a braced group, as taken by `\text`.
    fn parse_raw_group(&mut self, owner: &str) -> Result<String, ResolveError> {
        self.skip_ws();
        let at = self.pos;
        if !self.src[self.pos..].starts_with('{') {
            return Err(self.error(at, format!("missing argument for \\{owner}")));
        }

        let mut depth = 0usize;
        let mut text = String::new();
        let mut chars = self.src[self.pos..].char_indices();
        while let Some((idx, c)) = chars.next() {
            match c {
                '{' => {
                    depth += 1;
                    if depth == 1 {
                        continue;
                    }
                }
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        self.pos += idx + 1;
                        return Ok(text);
                    }
                }
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        text.push(escaped);
                    }
                    continue;
                }
                _ => {}
            }
            text.push(c);
        }
        Err(self.error(at, "unbalanced braces: missing '}'"))
    }

    fn parse_environment_name(&mut self) -> Result<&'a str, ResolveError> {
        self.skip_ws();
        let at = self.pos;
        let rest = &self.src[self.pos..];
        let name = rest
            .strip_prefix('{')
            .and_then(|inner| inner.split_once('}'))
            .map(|(name, _)| name);
        match name {
            Some(name) if !name.trim().is_empty() => {
                self.pos += name.len() + 2;
                Ok(name.trim())
            }
            _ => Err(self.error(at, "missing environment name")),
        }
    }

    fn parse_environment(&mut self, at: usize) -> Result<MathNode, ResolveError> {
        let env = self.parse_environment_name()?;
        let (open, close) = match env {
            "matrix" | "smallmatrix" | "array" | "aligned" | "align" | "align*" | "gathered" => {
                ("", "")
            }
            "pmatrix" => ("(", ")"),
            "bmatrix" => ("[", "]"),
            "Bmatrix" => ("{", "}"),
            "vmatrix" => ("|", "|"),
            "Vmatrix" => ("‖", "‖"),
            "cases" => ("{", ""),
            other => return Err(self.error(at, format!("unknown environment '{other}'"))),
        };
        if env == "array" {
            // Column spec carries no content.
            self.parse_raw_group("begin{array}")?;
        }

        let mut rows = Vec::new();
        let mut row = Vec::new();
        loop {
            let cell = self.parse_row(Stop::Cell)?;
            row.push(MathNode::Row(cell));
            match self.next_token() {
                Some(Token::Char('&')) => {}
                Some(Token::Command("\\")) => rows.push(std::mem::take(&mut row)),
                _ => {
                    let end_at = self.pos;
                    let closing = self.parse_environment_name()?;
                    if closing != env {
                        return Err(self.error(
                            end_at,
                            format!("environment '{env}' closed by \\end{{{closing}}}"),
                        ));
                    }
                    // A trailing `\\` leaves one empty cell behind.
                    let trailing_break = row.len() == 1 && row[0].is_empty() && !rows.is_empty();
                    if !trailing_break {
                        rows.push(row);
                    }
                    break;
                }
            }
        }

        let matrix = MathNode::Matrix(rows);
        if open.is_empty() && close.is_empty() {
            Ok(matrix)
        } else {
            Ok(MathNode::Fenced {
                open: open.to_string(),
                close: close.to_string(),
                body: Box::new(matrix),
            })
        }
    }
}
