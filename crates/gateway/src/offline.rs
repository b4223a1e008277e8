//! The page served to a navigation that can't be answered at all.

use crate::error::{ErrorKind, Result};
use crate::message::Response;
use exn::ResultExt;
use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode};
use upon::{Engine, Template};

const TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Offline</title>
</head>
<body>
<h1>You are offline</h1>
<p><code>{{ path|html }}</code> has not been saved for offline use yet.</p>
<p>Reconnect and reload the page.</p>
<!-- {{ generation|html }} -->
</body>
</html>
"#;

/// Pre-compiled offline placeholder.
pub(crate) struct OfflinePage {
    engine: Engine<'static>,
    template: Template<'static>,
}

impl OfflinePage {
    pub fn new() -> Result<Self> {
        let mut engine = Engine::new();
        addons::configure(&mut engine);
        let template = engine.compile(TEMPLATE).or_raise(|| ErrorKind::Template)?;
        Ok(Self { engine, template })
    }

    /// `503` placeholder for `path`. Falls back to a plain-text body if
    /// rendering fails.
    pub fn render(&self, path: &str, generation: &str) -> Response {
        let rendered = self
            .template
            .render(&self.engine, upon::value! { path: path, generation: generation })
            .to_string();
        let html = match rendered {
            Ok(html) => html,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to render offline page");
                return Response::synthetic(StatusCode::SERVICE_UNAVAILABLE);
            },
        };
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        Response::new(StatusCode::SERVICE_UNAVAILABLE, headers, html)
    }
}

mod addons {
    use std::fmt::Write;
    use upon::{Engine, Value, fmt as upon_fmt};

    /// Escapes the characters that are significant in HTML text and
    /// attributes.
    fn html_formatter(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
        match value {
            Value::String(s) => {
                for c in s.chars() {
                    match c {
                        '&' => f.write_str("&amp;")?,
                        '<' => f.write_str("&lt;")?,
                        '>' => f.write_str("&gt;")?,
                        '"' => f.write_str("&quot;")?,
                        '\'' => f.write_str("&#39;")?,
                        c => f.write_char(c)?,
                    }
                }
            },
            v => upon_fmt::default(f, v)?,
        };
        Ok(())
    }

    pub(crate) fn configure(engine: &mut Engine<'_>) {
        engine.add_formatter("html", html_formatter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let page = OfflinePage::new().unwrap();
        let response = page.render("/app/stats.html", "contador-cache-v2");
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers[CONTENT_TYPE], "text/html; charset=utf-8");
        let body = std::str::from_utf8(&response.body).unwrap();
        assert!(body.contains("<code>/app/stats.html</code>"));
        assert!(body.contains("contador-cache-v2"));
    }

    #[test]
    fn test_path_is_escaped() {
        let page = OfflinePage::new().unwrap();
        let response = page.render("/app/<script>\"x\"&", "v1");
        let body = std::str::from_utf8(&response.body).unwrap();
        assert!(body.contains("/app/&lt;script&gt;&quot;x&quot;&amp;"));
        assert!(!body.contains("<script>"));
    }
}
