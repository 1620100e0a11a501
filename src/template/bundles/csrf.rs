//! `csrf_token()` renders the hidden form field for the request's token.
//!
//! The request context carries the token as a [`CsrfToken`] under
//! `csrf_token`. That value shadows the global, so it is callable itself;
//! the global only answers when no token reached the context.

use std::fmt;
use std::sync::Arc;

use minijinja::value::{Object, ObjectRepr, from_args};
use minijinja::{Error, ErrorKind, State, Value};

use crate::template::bundle::Bundle;

/// Token value meaning the request deliberately carries no CSRF token.
pub const CSRF_NOT_PROVIDED: &str = "NOTPROVIDED";

const CONTEXT_KEY: &str = "csrf_token";

/// Renders as the bare token; calling it renders the hidden input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken(String);

impl CsrfToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn not_provided() -> Self {
        Self(CSRF_NOT_PROVIDED.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::from_object(self)
    }
}

impl Object for CsrfToken {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn call(self: &Arc<Self>, _state: &State<'_, '_>, args: &[Value]) -> Result<Value, Error> {
        let () = from_args(args)?;
        hidden_field(Some(self.as_str()))
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn csrf_token(state: &State) -> Result<Value, Error> {
    let token = state
        .lookup(CONTEXT_KEY)
        .filter(|value| !value.is_undefined() && !value.is_none())
        .map(|value| value.to_string());
    hidden_field(token.as_deref())
}

fn hidden_field(token: Option<&str>) -> Result<Value, Error> {
    let Some(token) = token.filter(|token| !token.is_empty()) else {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "csrf_token() was used in a template, but a CSRF token was not present in the \
             context; register the CSRF context processor and render with a RequestContext",
        ));
    };

    if token == CSRF_NOT_PROVIDED {
        return Ok(Value::from_safe_string(String::new()));
    }
    if !is_token_safe(token) {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "csrf token contains characters that cannot be rendered",
        ));
    }

    Ok(Value::from_safe_string(format!(
        r#"<div style="display: none;"><input type="hidden" name="csrfmiddlewaretoken" value="{token}" /></div>"#
    )))
}

pub(crate) fn is_token_safe(token: &str) -> bool {
    token
        .bytes()
        .all(|byte| byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_')
}

pub(super) fn bundle() -> Bundle {
    let mut bundle = Bundle::new();
    bundle.function("csrf_token", csrf_token);
    bundle
}

#[cfg(test)]
mod tests {
    use minijinja::{Environment, context};

    use super::*;

    fn env() -> Environment<'static> {
        let mut env = Environment::new();
        for (name, value) in bundle().globals() {
            env.add_global(name.clone(), value.clone());
        }
        env
    }

    fn token(raw: &str) -> Value {
        CsrfToken::new(raw).into_value()
    }

    #[test]
    fn token_renders_hidden_input() {
        let out = env()
            .render_str("{{ csrf_token() }}", context! { csrf_token => token("abc123") })
            .expect("render");
        assert_eq!(
            out,
            r#"<div style="display: none;"><input type="hidden" name="csrfmiddlewaretoken" value="abc123" /></div>"#
        );
    }

    #[test]
    fn bare_token_prints_its_value() {
        let out = env()
            .render_str("{{ csrf_token }}", context! { csrf_token => token("abc123") })
            .expect("render");
        assert_eq!(out, "abc123");
    }

    #[test]
    fn markup_is_not_escaped_in_html_templates() {
        let mut env = env();
        env.add_template("form.html", "{{ csrf_token() }}")
            .expect("template");
        let out = env
            .get_template("form.html")
            .and_then(|tmpl| tmpl.render(context! { csrf_token => token("abc") }))
            .expect("render");
        assert!(out.starts_with("<div"));
    }

    #[test]
    fn not_provided_renders_nothing() {
        let out = env()
            .render_str(
                "[{{ csrf_token() }}]",
                context! { csrf_token => CsrfToken::not_provided().into_value() },
            )
            .expect("render");
        assert_eq!(out, "[]");
    }

    #[test]
    fn missing_token_is_an_error() {
        let err = env()
            .render_str("{{ csrf_token() }}", ())
            .expect_err("missing token");
        assert!(err.to_string().contains("context processor"));
    }

    #[test]
    fn unsafe_tokens_are_refused() {
        assert!(
            env()
                .render_str("{{ csrf_token() }}", context! { csrf_token => token("\"><script>") })
                .is_err()
        );
    }
}
