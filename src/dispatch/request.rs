//! Request view over an [`Environ`].

use crate::http::Environ;

/// What views see of a request.
#[derive(Debug, Clone)]
pub struct Request {
    /// Upper-cased method.
    pub method: String,
    pub path: String,
    pub query: String,
    /// Main content type, lower-cased; empty when absent.
    pub content_type: String,
    /// Parameters following the content type, keys lower-cased.
    pub content_params: Vec<(String, String)>,
    /// Declared body length; 0 when absent or unparseable.
    pub content_length: usize,
    pub environ: Environ,
}

impl Request {
    pub fn from_environ(environ: &Environ) -> Self {
        let (content_type, content_params) =
            parse_content_type(environ.get("CONTENT_TYPE").as_deref().unwrap_or(""));
        let content_length = environ
            .get("CONTENT_LENGTH")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);

        Self {
            method: environ.method.to_ascii_uppercase(),
            path: environ.path.clone(),
            query: environ.query.clone(),
            content_type,
            content_params,
            content_length,
            environ: environ.clone(),
        }
    }

    /// Value of a content-type parameter such as `charset`.
    pub fn content_param(&self, name: &str) -> Option<&str> {
        self.content_params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Split `text/html; charset="utf-8"` into the main type and its parameters.
fn parse_content_type(value: &str) -> (String, Vec<(String, String)>) {
    let mut parts = value.split(';');
    let main = parts.next().unwrap_or("").trim().to_ascii_lowercase();
    let params = parts
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some((key, value.to_string()))
        })
        .collect();
    (main, params)
}
