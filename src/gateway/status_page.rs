//! HTML status page for the monitoring listener, rendered with Tera.

use serde::Serialize;
use tera::{Context, Tera};

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::Remote;
use crate::discovery::registry::{RegistryStats, SourceStatus};

const STATUS_TEMPLATE: &str = "status.html";

const STATUS_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{{ gateway }} - services</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 2rem; color: #333; }
        h1 { font-weight: 300; }
        .cards { display: flex; flex-wrap: wrap; gap: 1rem; }
        .card { border: 1px solid #ddd; border-radius: 6px; padding: 1rem; min-width: 16rem; }
        .card h3 { margin: 0 0 0.5rem 0; }
        .up { color: #2e7d32; }
        .down { color: #c62828; }
        table { border-collapse: collapse; margin-bottom: 2rem; }
        td, th { padding: 0.25rem 1rem; text-align: left; }
    </style>
</head>
<body>
    <h1>{{ gateway }}</h1>
    <p>{{ stats.services }} services, {{ stats.instances }} instances{% if built_at %}, directory built {{ built_at }}{% endif %}</p>
    <table>
        <tr><th>Discovery client</th><th>State</th><th>Required</th></tr>
        {% for source in sources %}
        <tr><td>{{ source.name }}</td><td>{{ source.state }}</td><td>{{ source.required }}</td></tr>
        {% endfor %}
    </table>
    {% if remotes | length == 0 %}
    <p>No remotes discovered.</p>
    {% else %}
    <div class="cards">
        {% for remote in remotes %}
        <div class="card">
            <h3>{{ remote.app }}</h3>
            <div>{{ remote.url }}</div>
            <div class="{% if remote.up %}up{% else %}down{% endif %}">{{ remote.status }}</div>
        </div>
        {% endfor %}
    </div>
    {% endif %}
</body>
</html>"#;

/// Flattened remote as shown on the page and in `/list`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RemoteView {
    pub app: String,
    pub url: String,
    pub status: String,
    pub up: bool,
}

impl From<&Remote> for RemoteView {
    fn from(remote: &Remote) -> Self {
        Self {
            app: remote.app().to_string(),
            url: remote.to_string(),
            status: remote.status().to_string(),
            up: remote.is_up(),
        }
    }
}

pub struct StatusPage {
    tera: Tera,
}

impl StatusPage {
    pub fn new() -> GatewayResult<Self> {
        let mut tera = Tera::default();
        tera.set_escape_fn(escape_markup);
        tera.add_raw_template(STATUS_TEMPLATE, STATUS_HTML)
            .map_err(|e| GatewayError::internal(format!("invalid status page template: {}", e)))?;
        Ok(Self { tera })
    }

    pub fn render(
        &self,
        gateway: &str,
        remotes: &[Remote],
        stats: &RegistryStats,
        sources: &[SourceStatus],
    ) -> GatewayResult<String> {
        let views: Vec<RemoteView> = remotes.iter().map(RemoteView::from).collect();

        let mut context = Context::new();
        context.insert("gateway", gateway);
        context.insert("remotes", &views);
        context.insert("stats", stats);
        context.insert(
            "built_at",
            &stats.built_at.map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        );
        context.insert("sources", sources);

        self.tera
            .render(STATUS_TEMPLATE, &context)
            .map_err(|e| GatewayError::internal(format!("failed to render status page: {}", e)))
    }
}

/// HTML escaping that leaves `/` alone so URLs render verbatim in the source
fn escape_markup(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}
