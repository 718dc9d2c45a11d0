//! The Web built-in: GET/POST with a hard timeout and HTML-to-text extraction.

use std::time::Duration;

use async_trait::async_trait;
use deskflow_core::models::{ToolDefinition, ToolResult};
use reqwest::Client;

use crate::Tool;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_OUTPUT_CHARS: usize = 50_000;

/// Performs HTTP GET/POST requests and renders `text/html` bodies down to
/// plain text. JSON and other bodies pass through verbatim (truncated).
pub struct WebTool {
    client: Client,
}

impl Default for WebTool {
    fn default() -> Self {
        Self::new()
    }
}

impl WebTool {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client with static config never fails to build");
        Self { client }
    }
}

#[async_trait]
impl Tool for WebTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "web".to_string(),
            description: "Fetch a URL via GET or POST and return its text content.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "The URL to request"},
                    "method": {"type": "string", "enum": ["GET", "POST"], "description": "Defaults to GET"},
                    "body": {"type": "string", "description": "Request body for POST"},
                },
                "required": ["url"],
            }),
            required_params: vec!["url".to_string()],
        }
    }

    async fn execute(&self, tool_call_id: &str, args: serde_json::Value) -> ToolResult {
        let url = match args.get("url").and_then(|v| v.as_str()) {
            Some(url) => url,
            None => return ToolResult::err(tool_call_id, "web", "missing required parameter 'url'"),
        };
        let method = args.get("method").and_then(|v| v.as_str()).unwrap_or("GET").to_ascii_uppercase();
        let body = args.get("body").and_then(|v| v.as_str()).map(|s| s.to_string());

        let request = match method.as_str() {
            "POST" => {
                let mut req = self.client.post(url);
                if let Some(body) = body {
                    req = req.body(body);
                }
                req
            }
            _ => self.client.get(url),
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return ToolResult::err(tool_call_id, "web", format!("request failed: {err}")),
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let text = match response.text().await {
            Ok(text) => text,
            Err(err) => return ToolResult::err(tool_call_id, "web", format!("failed to read response body: {err}")),
        };

        let rendered = if content_type.contains("text/html") {
            html_to_text(&text)
        } else {
            text
        };
        let truncated = truncate_chars(&rendered, MAX_OUTPUT_CHARS);

        if status.is_success() {
            ToolResult::ok(tool_call_id, "web", truncated)
        } else {
            ToolResult::err(tool_call_id, "web", format!("HTTP {status}: {truncated}"))
        }
    }
}

/// Converts an HTML document to plain text: strips `<script>`/`<style>`
/// blocks entirely, turns block-level closing tags and `<br>` into
/// newlines, removes the remaining markup, and decodes the common named
/// entities.
fn html_to_text(html: &str) -> String {
    let without_scripts = strip_tag_blocks(html, "script");
    let without_styles = strip_tag_blocks(&without_scripts, "style");

    let mut out = String::with_capacity(without_styles.len());
    let bytes = without_styles.as_bytes();

    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'<' {
            let rest = &without_styles[i..];
            let tag_end = rest.find('>').map(|end| i + end + 1);
            let tag = tag_end.map(|end| &without_styles[i..end]).unwrap_or("");
            let lower = tag.to_ascii_lowercase();

            if is_block_close_or_br(&lower) {
                out.push('\n');
            }

            match tag_end {
                Some(end) => i = end,
                None => break,
            }
        } else {
            let ch = without_styles[i..].chars().next().unwrap();
            out.push(ch);
            i += ch.len_utf8();
        }
    }

    let decoded = decode_entities(&out);
    collapse_blank_lines(&decoded)
}

fn is_block_close_or_br(lower_tag: &str) -> bool {
    const BLOCK_CLOSERS: &[&str] = &[
        "</p>", "</div>", "</section>", "</article>", "</header>", "</footer>", "</li>", "</ul>", "</ol>",
        "</tr>", "</table>", "</h1>", "</h2>", "</h3>", "</h4>", "</h5>", "</h6>", "</blockquote>", "</pre>",
    ];
    BLOCK_CLOSERS.contains(&lower_tag) || lower_tag.starts_with("<br")
}

/// Removes `<tag>...</tag>` blocks (case-insensitive), including their content.
fn strip_tag_blocks(html: &str, tag: &str) -> String {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let lower = html.to_ascii_lowercase();

    let mut out = String::with_capacity(html.len());
    let mut pos = 0usize;
    loop {
        match lower[pos..].find(&open) {
            Some(rel_start) => {
                let start = pos + rel_start;
                out.push_str(&html[pos..start]);
                match lower[start..].find(&close) {
                    Some(rel_end) => pos = start + rel_end + close.len(),
                    None => return out,
                }
            }
            None => {
                out.push_str(&html[pos..]);
                return out;
            }
        }
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(trimmed);
        out.push('\n');
    }
    out.trim().to_string()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_and_decodes_entities_and_converts_br() {
        let html = "<html><script>x</script><p>Hello &amp; World<br>line2</p></html>";
        let text = html_to_text(html);
        assert!(text.contains("Hello & World"));
        assert!(text.contains("line2"));
        assert!(!text.contains('x'));
    }

    #[test]
    fn strips_style_blocks() {
        let html = "<style>.a{color:red}</style><p>content</p>";
        let text = html_to_text(html);
        assert!(!text.contains("color"));
        assert!(text.contains("content"));
    }

    #[test]
    fn truncates_to_char_budget() {
        let long = "a".repeat(100);
        assert_eq!(truncate_chars(&long, 10).chars().count(), 10);
    }

    #[test]
    fn block_close_produces_newline_between_paragraphs() {
        let html = "<p>first</p><p>second</p>";
        let text = html_to_text(html);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines.iter().any(|l| *l == "first"));
        assert!(lines.iter().any(|l| *l == "second"));
    }
}
