//! ============================================================================
//! HTML Pages - What the Browser Sees
//! ============================================================================
//! Plain inline markup; every interpolated value goes through `escape`.
//! ============================================================================

use crate::actions::{DownstreamAction, FlowReport, OutcomeStatus};
use crate::types::RelayError;

const STYLE: &str = r#"
        body {
            font-family: 'SF Mono', 'Monaco', monospace;
            background: #0a0a0a;
            color: #00ff00;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
            margin: 0;
        }
        .container {
            text-align: center;
            border: 1px solid #00ff00;
            padding: 40px;
            max-width: 640px;
        }
        .error { color: #ff3355; border-color: #ff3355; }
        a.btn {
            color: #0a0a0a;
            background: #00ff00;
            padding: 12px 24px;
            text-decoration: none;
            display: inline-block;
            margin-top: 20px;
        }
        pre { text-align: left; white-space: pre-wrap; word-break: break-all; }
        ul { text-align: left; }
        h1 { margin: 0 0 20px 0; }
"#;

/// Escape text for inclusion in HTML element content or attribute values
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, class: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{title}</title>
    <style>{style}</style>
</head>
<body>
    <div class="container {class}">
{body}
    </div>
</body>
</html>
"#,
        title = escape(title),
        style = STYLE,
        class = class,
        body = body
    )
}

/// Landing page with the login link, plus the no-login link when the
/// operator's own token is configured
pub fn home(login_path: &str, direct_path: Option<&str>, actions: &[DownstreamAction]) -> String {
    let items: String = actions
        .iter()
        .map(|a| format!("            <li>{}</li>\n", escape(&describe(a))))
        .collect();
    let direct = direct_path
        .map(|path| {
            format!(
                "\n        <a class=\"btn\" href=\"{}\">Run on the configured account</a>",
                escape(path)
            )
        })
        .unwrap_or_default();
    let body = format!(
        r#"        <h1>X ACCOUNT RELAY</h1>
        <p>Sign in with X to let this app perform:</p>
        <ul>
{items}        </ul>
        <a class="btn" href="{login}">Login with X</a>{direct}"#,
        items = items,
        login = escape(login_path),
        direct = direct
    );
    layout("X Account Relay", "", &body)
}

fn describe(action: &DownstreamAction) -> String {
    match action {
        DownstreamAction::UpdateProfile { field, value } => {
            format!("Set your profile {} to \"{}\"", field.as_str(), value)
        }
        DownstreamAction::UpdateAvatar { .. } => "Replace your profile image".to_string(),
        DownstreamAction::PostTweet {
            text,
            image_url: Some(_),
        } => format!("Post \"{}\" with an image", text),
        DownstreamAction::PostTweet { text, .. } => format!("Post \"{}\"", text),
    }
}

/// Result page for a completed callback
pub fn report(report: &FlowReport) -> String {
    let items: String = report
        .outcomes
        .iter()
        .map(|o| match &o.status {
            OutcomeStatus::Done(summary) => format!(
                "            <li>&#x2713; {}: {}</li>\n",
                escape(o.action),
                escape(summary)
            ),
            OutcomeStatus::Failed(err) => format!(
                "            <li>&#x2717; {}: {}</li>\n",
                escape(o.action),
                escape(&err.to_string())
            ),
        })
        .collect();

    let all_ok = report.succeeded() == report.outcomes.len();
    let headline = if all_ok {
        "&#x2713; DONE"
    } else if report.succeeded() > 0 {
        "PARTIALLY DONE"
    } else {
        "NOTHING CHANGED"
    };
    let class = if report.succeeded() > 0 { "" } else { "error" };

    let body = format!(
        r#"        <h1>{headline}</h1>
        <p>Signed in as @{username} ({name})</p>
        <ul>
{items}        </ul>
        <p><a href="https://x.com/{username}" target="_blank">View profile</a></p>"#,
        headline = headline,
        username = escape(&report.user.username),
        name = escape(&report.user.name),
        items = items
    );
    layout("X Account Relay", class, &body)
}

/// Failure page carrying the provider or upstream detail
pub fn failure(err: &RelayError) -> String {
    let detail = match err {
        RelayError::ProviderDenied { error, description } => {
            format!("{}\n{}", error, description)
        }
        RelayError::TokenExchange { body, .. } | RelayError::Upstream { body, .. } => {
            format!("{}\n\n{}", err, pretty_body(body))
        }
        RelayError::MissingCredentials(what) => format!(
            "{}\n\nSet the missing environment variables and restart the relay.",
            what
        ),
        other => other.to_string(),
    };

    let body = format!(
        r#"        <h1>&#x2717; {title}</h1>
        <pre>{detail}</pre>
        <a class="btn" href="/">Back</a>"#,
        title = escape(err.title()),
        detail = escape(&detail)
    );
    layout(err.title(), "error", &body)
}

/// Re-indent JSON bodies, leave anything else as it came
fn pretty_body(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or_else(|| body.to_string())
}

pub fn not_found(path: &str) -> String {
    let body = format!(
        "        <h1>404</h1>\n        <p>Nothing at {}</p>\n        <a class=\"btn\" href=\"/\">Back</a>",
        escape(path)
    );
    layout("Not found", "error", &body)
}

pub fn method_not_allowed() -> String {
    layout("Method not allowed", "error", "        <h1>405</h1>")
}
