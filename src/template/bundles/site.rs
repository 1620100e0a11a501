//! `url()` and `setting()` globals.

use std::collections::BTreeMap;
use std::sync::Arc;

use minijinja::value::Rest;
use minijinja::{Error, ErrorKind, Value};

use crate::template::bundle::Bundle;

/// Named route patterns in axum path syntax (`/articles/{id}`, `/files/{*path}`).
#[derive(Debug, Clone, Default)]
pub struct UrlMap {
    routes: BTreeMap<String, String>,
}

impl UrlMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, pattern: impl Into<String>) -> &mut Self {
        self.routes.insert(name.into(), pattern.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.routes.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Fill the placeholders of route `name` with `args`, left to right.
    pub fn reverse(&self, name: &str, args: &[Value]) -> Result<String, Error> {
        let pattern = self.get(name).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("no route named `{name}`"),
            )
        })?;

        let expected = placeholder_count(pattern);
        if args.len() != expected {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                format!(
                    "route `{name}` takes {expected} argument(s), {} given",
                    args.len()
                ),
            ));
        }

        let mut path = String::with_capacity(pattern.len());
        let mut args = args.iter();
        let mut rest = pattern;
        while let Some((before, after)) = rest.split_once('{') {
            let Some((_, tail)) = after.split_once('}') else {
                break;
            };
            path.push_str(before);
            if let Some(arg) = args.next() {
                path.push_str(&arg.to_string());
            }
            rest = tail;
        }
        path.push_str(rest);
        Ok(path)
    }
}

fn placeholder_count(pattern: &str) -> usize {
    let mut count = 0;
    let mut rest = pattern;
    while let Some((_, after)) = rest.split_once('{') {
        let Some((_, tail)) = after.split_once('}') else {
            break;
        };
        count += 1;
        rest = tail;
    }
    count
}

pub(super) fn bundle(settings: &BTreeMap<String, serde_json::Value>, urls: &UrlMap) -> Bundle {
    let urls = Arc::new(urls.clone());
    let settings = Value::from_serialize(settings);

    let mut bundle = Bundle::new();
    bundle
        .function(
            "url",
            move |name: String, args: Rest<Value>| -> Result<String, Error> {
                urls.reverse(&name, &args.0)
            },
        )
        .function(
            "setting",
            move |name: String, default: Option<Value>| -> Result<Value, Error> {
                let value = settings.get_attr(&name)?;
                if value.is_undefined() {
                    Ok(default.unwrap_or_else(|| Value::from(())))
                } else {
                    Ok(value)
                }
            },
        );
    bundle
}

#[cfg(test)]
mod tests {
    use minijinja::Environment;

    use super::*;

    fn env() -> Environment<'static> {
        let mut urls = UrlMap::new();
        urls.insert("home", "/")
            .insert("article", "/articles/{year}/{slug}")
            .insert("file", "/files/{*path}");
        let mut settings = BTreeMap::new();
        settings.insert("site_name".to_string(), serde_json::json!("Example"));
        settings.insert("debug".to_string(), serde_json::json!(false));

        let mut env = Environment::new();
        for (name, value) in bundle(&settings, &urls).globals() {
            env.add_global(name.clone(), value.clone());
        }
        env
    }

    fn render(env: &Environment<'static>, source: &str) -> Result<String, Error> {
        env.render_str(source, ())
    }

    #[test]
    fn url_substitutes_placeholders_in_order() {
        let env = env();
        assert_eq!(render(&env, "{{ url('home') }}").expect("render"), "/");
        assert_eq!(
            render(&env, "{{ url('article', 2024, 'hello') }}").expect("render"),
            "/articles/2024/hello"
        );
        assert_eq!(
            render(&env, "{{ url('file', 'a/b.txt') }}").expect("render"),
            "/files/a/b.txt"
        );
    }

    #[test]
    fn url_rejects_unknown_routes_and_bad_arity() {
        let env = env();
        let err = render(&env, "{{ url('missing') }}").expect_err("unknown route");
        assert!(err.to_string().contains("no route named `missing`"));
        let err = render(&env, "{{ url('article', 2024) }}").expect_err("too few");
        assert!(err.to_string().contains("takes 2 argument(s), 1 given"));
        assert!(render(&env, "{{ url('home', 1) }}").is_err());
    }

    #[test]
    fn setting_reads_configured_values_with_default() {
        let env = env();
        assert_eq!(render(&env, "{{ setting('site_name') }}").expect("render"), "Example");
        assert_eq!(render(&env, "{{ setting('debug') }}").expect("render"), "false");
        assert_eq!(
            render(&env, "{{ setting('missing', 'fallback') }}").expect("render"),
            "fallback"
        );
        assert_eq!(render(&env, "{{ setting('missing') is none }}").expect("render"), "true");
    }
}
