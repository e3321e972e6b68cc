//! Scheduler command templates
//!
//! Commands and paths handed to enhancers are templates that the workflow
//! engine formats just before running the job: `{input}`, `{output.data}`,
//! `{params[0]}`, `{threads!s}` are fields, `{{` and `}}` are literal braces.
//! Enhancers must keep their output a valid template, so any brace they emit
//! themselves goes through [`escape_braces`].

use crate::error::{BoostError, BoostResult};

/// One piece of a parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text with brace escapes already resolved
    Literal(String),
    /// Field as written between the braces, e.g. `input.data` or `threads:d`
    Field(String),
}

/// A parsed scheduler template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> BoostResult<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut field = String::new();
                    let mut closed = false;
                    for f in chars.by_ref() {
                        match f {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => {
                                return Err(BoostError::template(source, "nested '{' in field"));
                            }
                            _ => field.push(f),
                        }
                    }
                    if !closed {
                        return Err(BoostError::template(source, "unclosed field"));
                    }
                    if field.trim().is_empty() {
                        return Err(BoostError::template(source, "empty field"));
                    }
                    check_field(&field).map_err(|reason| BoostError::template(source, reason))?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(field));
                }
                '}' => return Err(BoostError::template(source, "single '}' outside a field")),
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Unique fields in order of first appearance
    pub fn fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Field(name) = segment {
                if !fields.contains(&name.as_str()) {
                    fields.push(name);
                }
            }
        }
        fields
    }

    /// Whether the template contains no fields at all
    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)))
    }

    /// Plain text of a template without fields
    pub fn literal_text(&self) -> Option<String> {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => Some(text.as_str()),
                Segment::Field(_) => None,
            })
            .collect()
    }

    /// Template text with some fields replaced
    ///
    /// `replace` returns replacement template text for a field, or `None` to
    /// keep the field as it was.
    pub fn map_fields<F>(&self, mut replace: F) -> String
    where
        F: FnMut(&str) -> Option<String>,
    {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => escape_braces(text),
                Segment::Field(name) => replace(name).unwrap_or_else(|| format!("{{{name}}}")),
            })
            .collect()
    }
}

/// Field syntax: `name`, then any `.attr` or `[index]`, then `!conv`, then `:spec`
fn check_field(field: &str) -> Result<(), String> {
    let (head, _spec) = field.split_once(':').unwrap_or((field, ""));
    let head = match head.split_once('!') {
        Some((head, "r" | "s" | "a")) => head,
        Some((_, conv)) => return Err(format!("unknown conversion !{conv}")),
        None => head,
    };

    let is_name = |s: &str| !s.is_empty() && s.chars().all(|c| c == '_' || c.is_alphanumeric());
    let name_end = head.find(['.', '[']).unwrap_or(head.len());
    if !is_name(&head[..name_end]) {
        return Err(format!("{field:?} is not a field name"));
    }

    let mut rest = &head[name_end..];
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after.find(['.', '[']).unwrap_or(after.len());
            if !is_name(&after[..end]) {
                return Err(format!("bad attribute in field {field:?}"));
            }
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('[') {
            match after.find(']') {
                Some(end) if end > 0 => rest = &after[end + 1..],
                _ => return Err(format!("bad index in field {field:?}")),
            }
        } else {
            return Err(format!("unexpected text in field {field:?}"));
        }
    }
    Ok(())
}

/// Escape literal text so it survives template formatting unchanged
pub fn escape_braces(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}

/// Check that `text` parses as a template
pub fn validate(text: &str) -> BoostResult<()> {
    Template::parse(text).map(|_| ())
}
