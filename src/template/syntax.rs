//! Source rewrite for the `{% cache %}` block tag.
//!
//! `{% cache key[, timeout] %} body {% endcache %}` becomes a call block on
//! [`CACHE_FUNCTION`], whose `caller()` renders the body on demand:
//!
//! ```jinja
//! {% call __fragment_cache(key, timeout) %} body {% endcall %}
//! ```
//!
//! Arguments are copied verbatim so line numbers in engine errors still point at
//! the original source. Comments, expressions and `{% raw %}` regions are skipped.

use std::borrow::Cow;

use thiserror::Error;

/// Name of the global the rewritten call blocks invoke.
pub const CACHE_FUNCTION: &str = "__fragment_cache";

const OPEN_TAG: &str = "cache";
const CLOSE_TAG: &str = "endcache";

/// Malformed `cache`/`endcache` usage, reported when a template is compiled.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} (line {line})")]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    fn at(source: &str, offset: usize, message: impl Into<String>) -> Self {
        Self {
            line: line_of(source, offset),
            message: message.into(),
        }
    }
}

/// A `{% ... %}` statement located in the source.
struct Tag<'s> {
    /// Offset just past the closing `%}`.
    end: usize,
    left: &'s str,
    right: &'s str,
    lead: &'s str,
    keyword: &'s str,
    rest: &'s str,
}

impl<'s> Tag<'s> {
    /// Parse the tag opening at `start`. `None` if it is never closed.
    fn parse(source: &'s str, start: usize) -> Option<Self> {
        let mut inner_start = start + 2;
        let left = match source.as_bytes().get(inner_start) {
            Some(b'-' | b'+') => {
                inner_start += 1;
                &source[inner_start - 1..inner_start]
            }
            _ => "",
        };

        let close = find_outside_strings(source, inner_start, "%}")?;
        let mut inner_end = close;
        let right = match source.as_bytes().get(close.wrapping_sub(1)) {
            Some(b'-' | b'+') if close > inner_start => {
                inner_end -= 1;
                &source[inner_end..close]
            }
            _ => "",
        };

        let body = &source[inner_start..inner_end];
        let trimmed = body.trim_start();
        let lead = &body[..body.len() - trimmed.len()];
        let keyword_len = trimmed
            .find(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
            .unwrap_or(trimmed.len());

        Some(Self {
            end: close + 2,
            left,
            right,
            lead,
            keyword: &trimmed[..keyword_len],
            rest: &trimmed[keyword_len..],
        })
    }
}

/// Rewrite every fragment cache block in `source` into a call block.
///
/// Returns the source unchanged (borrowed) when it has no cache tags.
pub fn rewrite_cache_tags(source: &str) -> Result<Cow<'_, str>, SyntaxError> {
    if !source.contains(OPEN_TAG) {
        return Ok(Cow::Borrowed(source));
    }

    let bytes = source.as_bytes();
    let mut out = String::with_capacity(source.len() + 64);
    let mut open_blocks: Vec<usize> = Vec::new();
    let mut copied = 0;
    let mut pos = 0;

    while let Some(offset) = source[pos..].find('{') {
        let start = pos + offset;
        match bytes.get(start + 1) {
            Some(b'#') => {
                pos = source[start + 2..]
                    .find("#}")
                    .map_or(source.len(), |end| start + 2 + end + 2);
            }
            Some(b'{') => {
                pos = find_outside_strings(source, start + 2, "}}")
                    .map_or(source.len(), |end| end + 2);
            }
            Some(b'%') => {
                let Some(tag) = Tag::parse(source, start) else {
                    let tail = source[start + 2..].trim_start_matches(['-', '+']).trim_start();
                    if tail.starts_with(CLOSE_TAG) || tail.starts_with(OPEN_TAG) {
                        return Err(SyntaxError::at(source, start, "unterminated cache tag"));
                    }
                    pos = source.len();
                    continue;
                };

                match tag.keyword {
                    "raw" => pos = skip_raw_block(source, tag.end),
                    OPEN_TAG => {
                        let call = cache_call(source, start, &tag)?;
                        out.push_str(&source[copied..start]);
                        out.push_str(&call);
                        open_blocks.push(start);
                        copied = tag.end;
                        pos = tag.end;
                    }
                    CLOSE_TAG => {
                        if !tag.rest.trim().is_empty() {
                            return Err(SyntaxError::at(
                                source,
                                start,
                                "endcache tag takes no arguments",
                            ));
                        }
                        if open_blocks.pop().is_none() {
                            return Err(SyntaxError::at(
                                source,
                                start,
                                "endcache tag without a matching cache tag",
                            ));
                        }
                        out.push_str(&source[copied..start]);
                        out.push_str("{%");
                        out.push_str(tag.left);
                        out.push_str(tag.lead);
                        out.push_str("endcall");
                        out.push_str(tag.rest);
                        out.push_str(tag.right);
                        out.push_str("%}");
                        copied = tag.end;
                        pos = tag.end;
                    }
                    _ => pos = tag.end,
                }
            }
            _ => pos = start + 1,
        }
    }

    if let Some(opened_at) = open_blocks.pop() {
        return Err(SyntaxError::at(
            source,
            opened_at,
            "cache tag is missing its endcache",
        ));
    }

    if copied == 0 {
        return Ok(Cow::Borrowed(source));
    }
    out.push_str(&source[copied..]);
    Ok(Cow::Owned(out))
}

fn cache_call(source: &str, start: usize, tag: &Tag<'_>) -> Result<String, SyntaxError> {
    let args = split_top_level(tag.rest);
    if args.iter().all(|arg| arg.trim().is_empty()) && args.len() == 1 {
        return Err(SyntaxError::at(
            source,
            start,
            "cache tag requires a key expression",
        ));
    }
    if args.len() > 2 {
        return Err(SyntaxError::at(
            source,
            start,
            "cache tag accepts a key and an optional timeout",
        ));
    }
    if args.iter().any(|arg| arg.trim().is_empty()) {
        return Err(SyntaxError::at(
            source,
            start,
            "empty expression in cache tag",
        ));
    }

    let mut call = String::with_capacity(tag.rest.len() + 48);
    call.push_str("{%");
    call.push_str(tag.left);
    call.push_str(tag.lead);
    call.push_str("call ");
    call.push_str(CACHE_FUNCTION);
    call.push('(');
    call.push_str(tag.rest);
    if args.len() == 1 {
        call.push_str(", none");
    }
    call.push_str(") ");
    call.push_str(tag.right);
    call.push_str("%}");
    Ok(call)
}

/// Split `args` on commas that are not nested in brackets or strings.
fn split_top_level(args: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut segment_start = 0;

    for (index, ch) in args.char_indices() {
        if let Some(open) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == open {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&args[segment_start..index]);
                segment_start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&args[segment_start..]);
    parts
}

/// Offset of the first `needle` at or after `from` that is not inside a string literal.
fn find_outside_strings(source: &str, from: usize, needle: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (index, ch) in source[from..].char_indices() {
        let at = from + index;
        if let Some(open) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == open {
                quote = None;
            }
            continue;
        }
        if ch == '"' || ch == '\'' {
            quote = Some(ch);
        } else if source[at..].starts_with(needle) {
            return Some(at);
        }
    }
    None
}

fn skip_raw_block(source: &str, from: usize) -> usize {
    let mut pos = from;
    while let Some(offset) = source[pos..].find("{%") {
        let start = pos + offset;
        match Tag::parse(source, start) {
            Some(tag) if tag.keyword == "endraw" => return tag.end,
            Some(tag) => pos = tag.end,
            None => return source.len(),
        }
    }
    source.len()
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset].matches('\n').count() + 1
}
