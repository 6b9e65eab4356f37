//! Tokeniser for upstream command expressions.
//!
//! Commands reference construction variables as `$NAME`, `${NAME}`,
//! `$TARGET.windows`, `${SOURCES[1:]}` and occasionally call helpers such as
//! `${TEMPFILE("...")}`. Parsing them into [`Segment`]s lets the exporter
//! reason about calls as data instead of evaluating them.

/// One lexical piece of a command expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Plain text.
    Literal(&'a str),
    /// The `$$` escape, rendering a single `$`.
    Dollar,
    /// A `$(` or `$)` signature marker, dropped when rendering commands.
    SignatureMark,
    /// A variable reference.
    Var(VarRef<'a>),
    /// A function call inside `${...}`.
    Call(Call<'a>),
    /// Any other braced expression.
    Expr(&'a str),
}

/// Reference to a construction variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarRef<'a> {
    /// Variable name.
    pub name: &'a str,
    /// Optional list slice, e.g. `[1:]`.
    pub slice: Option<Slice>,
    /// Attribute chain, e.g. `["windows"]` for `$TARGET.windows`.
    pub attrs: Vec<&'a str>,
}

/// Python-style list slice or index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    /// Inclusive start.
    pub start: Option<isize>,
    /// Exclusive end.
    pub end: Option<isize>,
    /// `true` for a single index such as `[0]`.
    pub index: bool,
}

impl Slice {
    /// Apply the slice to `items`.
    #[must_use]
    pub fn apply<'s, T>(&self, items: &'s [T]) -> &'s [T] {
        let len = isize::try_from(items.len()).unwrap_or(isize::MAX);
        let clamp = |pos: isize| -> usize {
            let absolute = if pos < 0 { len + pos } else { pos };
            usize::try_from(absolute.clamp(0, len)).unwrap_or_default()
        };
        let start = clamp(self.start.unwrap_or(0));
        let end = if self.index {
            start.saturating_add(1)
        } else {
            self.end.map_or(items.len(), clamp)
        };
        items.get(start..end.min(items.len())).unwrap_or_default()
    }
}

/// Function call appearing as `${name(args)}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call<'a> {
    /// Function name.
    pub name: &'a str,
    /// Raw argument text between the parentheses.
    pub args: &'a str,
}

impl Call<'_> {
    /// Return the first argument when it is a quoted string literal.
    #[must_use]
    pub fn string_literal(&self) -> Option<String> {
        let trimmed = self.args.trim_start();
        let mut chars = trimmed.chars();
        let quote = chars.next().filter(|c| matches!(c, '"' | '\''))?;
        let mut value = String::new();
        let mut escaped = false;
        for ch in chars {
            if escaped {
                value.push(ch);
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == quote {
                return Some(value);
            } else {
                value.push(ch);
            }
        }
        None
    }
}

fn span(text: &str, start: usize, end: usize) -> &str {
    text.get(start..end).unwrap_or_default()
}

const fn is_ident_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

const fn is_ident_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

/// Split `text` into segments.
///
/// Malformed constructs such as an unterminated `${` are kept as literal
/// text so that later checks can report them with the original command.
#[must_use]
pub fn parse_command(text: &str) -> Vec<Segment<'_>> {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut pos = 0;
    while let Some(&byte) = bytes.get(pos) {
        if byte != b'$' {
            pos += 1;
            continue;
        }
        let next = bytes.get(pos + 1).copied();
        let (segment, consumed) = match next {
            Some(b'$') => (Some(Segment::Dollar), 2),
            Some(b'(' | b')') => (Some(Segment::SignatureMark), 2),
            Some(b'{') => match find_closing_brace(text, pos + 2) {
                Some(close) => (Some(parse_braced(span(text, pos + 2, close))), close + 1 - pos),
                None => (None, text.len() - pos),
            },
            Some(first) if is_ident_start(first) => {
                let mut end = pos + 1;
                while bytes
                    .get(end)
                    .is_some_and(|&b| is_ident_char(b) || b == b'.')
                {
                    end += 1;
                }
                let chain = span(text, pos + 1, end).trim_end_matches('.');
                let consumed = chain.len() + 1;
                (Some(Segment::Var(parse_chain_unbraced(chain))), consumed)
            }
            _ => (None, 1),
        };
        match segment {
            Some(found) => {
                if literal_start < pos {
                    segments.push(Segment::Literal(span(text, literal_start, pos)));
                }
                segments.push(found);
                pos += consumed;
                literal_start = pos;
            }
            None => pos += consumed,
        }
    }
    if literal_start < text.len() {
        segments.push(Segment::Literal(span(text, literal_start, text.len())));
    }
    segments
}

fn find_closing_brace(text: &str, body_start: usize) -> Option<usize> {
    let body = text.get(body_start..)?;
    let mut depth = 1_usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (offset, ch) in body.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, ch) {
            (Some(_), '\\') => escaped = true,
            (Some(open), c) if c == open => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '{') => depth += 1,
            (None, '}') => {
                depth -= 1;
                if depth == 0 {
                    return Some(body_start + offset);
                }
            }
            (None, _) => {}
        }
    }
    None
}

fn parse_braced(body: &str) -> Segment<'_> {
    let trimmed = body.trim();
    let bytes = trimmed.as_bytes();
    let ident_len = bytes.iter().take_while(|&&b| is_ident_char(b)).count();
    let starts_ident = bytes.first().is_some_and(|&b| is_ident_start(b));
    if !starts_ident {
        return Segment::Expr(trimmed);
    }
    let name = span(trimmed, 0, ident_len);
    let rest = span(trimmed, ident_len, trimmed.len());
    if let Some(args) = rest.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        return Segment::Call(Call { name, args });
    }
    parse_suffixes(name, rest).map_or(Segment::Expr(trimmed), Segment::Var)
}

fn parse_chain_unbraced(chain: &str) -> VarRef<'_> {
    let mut parts = chain.split('.');
    let name = parts.next().unwrap_or_default();
    VarRef {
        name,
        slice: None,
        attrs: parts.filter(|part| !part.is_empty()).collect(),
    }
}

fn parse_suffixes<'a>(name: &'a str, rest: &'a str) -> Option<VarRef<'a>> {
    let mut remainder = rest;
    let mut slice = None;
    if let Some(after_open) = remainder.strip_prefix('[') {
        let close = after_open.find(']')?;
        slice = Some(parse_slice(span(after_open, 0, close))?);
        remainder = span(after_open, close + 1, after_open.len());
    }
    let mut attrs = Vec::new();
    for part in remainder.split('.').skip(1) {
        if part.is_empty() || !part.bytes().all(is_ident_char) {
            return None;
        }
        attrs.push(part);
    }
    if !remainder.is_empty() && !remainder.starts_with('.') {
        return None;
    }
    Some(VarRef { name, slice, attrs })
}

fn parse_slice(body: &str) -> Option<Slice> {
    let parse_bound = |text: &str| -> Option<Option<isize>> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            Some(None)
        } else {
            trimmed.parse().ok().map(Some)
        }
    };
    match body.split_once(':') {
        Some((start, end)) => Some(Slice {
            start: parse_bound(start)?,
            end: parse_bound(end)?,
            index: false,
        }),
        None => Some(Slice {
            start: Some(body.trim().parse().ok()?),
            end: None,
            index: true,
        }),
    }
}
