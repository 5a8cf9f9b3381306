//! Issue capture and formatting (spec §4.7). Ports
//! `runner/formatter.py::IssueFormatter`: builds [`Issue`] records from step
//! failures, renders a human-readable failure report with request/response
//! detail always shown, and looks up a suggestion string from the
//! responding status code or the error message's own wording.

use serde_json::Value;

use crate::http::HttpExchange;
use crate::model::{Issue, Severity};

const BODY_DISPLAY_LIMIT: usize = 500;

/// Accumulates [`Issue`]s raised over a journey run and renders the
/// human-readable failure report the CLI prints alongside the machine-
/// readable [`crate::model::JourneyResult`].
#[derive(Default)]
pub struct IssueFormatter {
    issues: Vec<Issue>,
}

impl IssueFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.issues.clear();
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_issue(
        &mut self,
        journey: impl Into<String>,
        path: Option<String>,
        step: Option<String>,
        error: impl Into<String>,
        severity: Severity,
        exchange: Option<&HttpExchange>,
        logs: Vec<String>,
    ) -> Issue {
        let error = error.into();
        let suggestion = get_error_suggestion(&error, exchange.map(|e| e.status));
        let issue = Issue {
            journey: journey.into(),
            path,
            step,
            error,
            severity,
            request: exchange.map(request_summary),
            response: exchange.map(response_summary),
            logs,
            suggestion,
            timestamp: chrono::Utc::now(),
        };
        self.issues.push(issue.clone());
        issue
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// Renders a step failure with its request/response detail always
    /// shown — the original's comment calls this out explicitly ("Always
    /// shows request and response information when a step fails,
    /// regardless of debug mode setting").
    pub fn format_step_failure(&self, step_name: &str, error: &str, exchange: Option<&HttpExchange>) -> String {
        let mut lines = vec![String::new(), format!("Step '{step_name}' failed: {error}"), String::new()];

        if let Some(exchange) = exchange {
            lines.push("Request:".to_string());
            lines.push(format!("  {} {}", exchange.method, exchange.url));
            if let Some(content_type) = exchange
                .request_headers
                .get("content-type")
                .or_else(|| exchange.request_headers.get("Content-Type"))
            {
                lines.push(format!("  Content-Type: {content_type}"));
            }
            if let Some(body) = &exchange.request_body {
                lines.push(format!("  {}", format_body_for_display(body)));
            }
            lines.push(String::new());

            lines.push(format!("Response ({}):", exchange.status));
            if let Some(body) = &exchange.response_body {
                lines.push(format!("  {}", format_body_for_display(body)));
            }
            lines.push(String::new());
        }

        let suggestion = get_error_suggestion(error, exchange.map(|e| e.status));
        if !suggestion.is_empty() {
            lines.push(format!("Suggestion: {suggestion}"));
            lines.push(String::new());
        }

        lines.join("\n")
    }
}

pub(crate) fn request_summary(exchange: &HttpExchange) -> Value {
    serde_json::json!({
        "method": exchange.method,
        "url": exchange.url,
        "headers": exchange.request_headers,
        "body": exchange.request_body,
    })
}

pub(crate) fn response_summary(exchange: &HttpExchange) -> Value {
    serde_json::json!({
        "status_code": exchange.status,
        "headers": exchange.response_headers,
        "body": exchange.response_body,
    })
}

/// Pretty-prints a body for display, truncating past [`BODY_DISPLAY_LIMIT`]
/// characters. Ports `format_body_for_display`.
pub fn format_body_for_display(body: &Value) -> String {
    match body {
        Value::Null => "(empty)".to_string(),
        Value::String(s) => {
            if let Ok(parsed) = serde_json::from_str::<Value>(s) {
                truncate(&serde_json::to_string_pretty(&parsed).unwrap_or_else(|_| s.clone()))
            } else {
                truncate(s)
            }
        }
        other => truncate(&serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string())),
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() > BODY_DISPLAY_LIMIT {
        let truncated: String = s.chars().take(BODY_DISPLAY_LIMIT).collect();
        format!("{truncated}... [truncated]")
    } else {
        s.to_string()
    }
}

/// Looks up a suggestion by response status code first, then by keyword in
/// the error message. Ports `get_error_suggestion`.
pub fn get_error_suggestion(error: &str, status_code: Option<u16>) -> String {
    if let Some(status) = status_code {
        let suggestion = match status {
            400 => Some("Check request body format and required fields"),
            401 => Some("Check authentication token or credentials"),
            403 => Some("Check user permissions for this action"),
            404 => Some("Check endpoint path and resource ID"),
            405 => Some("Check HTTP method (GET/POST/PUT/DELETE)"),
            409 => Some("Check for duplicate entries or state conflicts"),
            422 => Some("Check request body validation rules"),
            429 => Some("Rate limit exceeded - add delays between requests"),
            500 => Some("Check backend logs for exception details"),
            502 => Some("Check if upstream services are running"),
            503 => Some("Service unavailable - check if service is healthy"),
            504 => Some("Gateway timeout - check service performance"),
            _ => None,
        };
        if let Some(suggestion) = suggestion {
            return suggestion.to_string();
        }
    }

    // Keyword fallback once no status code matched, priority-ordered and
    // checked with plain substring matching. Extends the six patterns
    // `core/models.py::Issue._generate_suggestion` keys on (timeout,
    // connection refused/reset, 401/403/404/422/500 as strings) with the
    // additional failure classes named alongside it: name resolution,
    // validation, schema, unique constraint, foreign key.
    let error_lower = error.to_lowercase();
    let keyword_suggestions: &[(&str, &str)] = &[
        ("connection refused", "Is the service running? Check with `docker ps` or service status"),
        ("connection reset", "Connection closed - check service stability"),
        ("name resolution", "DNS lookup failed - check the hostname and network configuration"),
        ("timeout", "Service may be slow - try increasing timeout"),
        ("not found", "Resource may not exist - check if it was created first"),
        ("unique constraint", "A record with this value already exists - check for duplicate inserts"),
        ("foreign key", "Referenced record is missing - check creation order of dependent resources"),
        ("schema", "Response shape does not match the expected schema"),
        ("validation", "Check input data matches expected format"),
    ];
    for (pattern, suggestion) in keyword_suggestions {
        if error_lower.contains(pattern) {
            return suggestion.to_string();
        }
    }

    String::new()
}
