//! Synthesized responses for when neither network nor cache can answer.

use http::StatusCode;
use salma_net::Response;

/// User-facing notice shown on the offline page.
pub const OFFLINE_NOTICE: &str = "أنت غير متصل بالإنترنت";

/// Label of the reload control on the offline page.
pub const RETRY_LABEL: &str = "إعادة المحاولة";

const PLACEHOLDER_TEXT: &str = "غير متاح";

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
pub const SVG_CONTENT_TYPE: &str = "image/svg+xml";

/// Self-contained offline page for failed navigations.
pub fn offline_page(app_name: &str) -> Response {
    let html = format!(
        r#"<!DOCTYPE html>
<html lang="ar" dir="rtl">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{app_name}</title>
<style>
  body {{ margin: 0; min-height: 100vh; display: flex; align-items: center; justify-content: center;
         font-family: system-ui, sans-serif; background: #f5f3ff; color: #3b0764; text-align: center; }}
  .card {{ padding: 2rem; border-radius: 1rem; background: #fff; box-shadow: 0 4px 24px rgba(0,0,0,.08); }}
  h1 {{ font-size: 1.5rem; margin: 0 0 .5rem; }}
  p {{ margin: 0 0 1.5rem; color: #6b7280; }}
  button {{ border: 0; border-radius: .5rem; padding: .75rem 1.5rem; background: #7c3aed; color: #fff;
           font-size: 1rem; cursor: pointer; }}
</style>
</head>
<body>
<div class="card">
  <h1>{notice}</h1>
  <p>تحقق من الاتصال ثم أعد المحاولة. بياناتك المحفوظة ما زالت على جهازك.</p>
  <button type="button" onclick="location.reload()">{retry}</button>
</div>
</body>
</html>
"#,
        app_name = escape_html(app_name),
        notice = OFFLINE_NOTICE,
        retry = RETRY_LABEL,
    );

    Response::synthesized(StatusCode::OK, HTML_CONTENT_TYPE, html)
}

/// Placeholder for images that could not be fetched.
pub fn placeholder_image() -> Response {
    let svg = format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200" viewBox="0 0 200 200"><rect width="200" height="200" fill="#e5e7eb"/><text x="100" y="100" font-family="sans-serif" font-size="16" fill="#6b7280" text-anchor="middle" dominant-baseline="middle">{PLACEHOLDER_TEXT}</text></svg>"##
    );

    Response::synthesized(StatusCode::OK, SVG_CONTENT_TYPE, svg)
}

/// Empty 408 response for non-image static assets.
pub fn asset_unavailable() -> Response {
    Response::empty(StatusCode::REQUEST_TIMEOUT)
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
