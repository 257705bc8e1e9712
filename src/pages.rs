//! minimal html pages. the dashboard loads the query api once and then
//! listens on the websocket feed.

use axum::response::{Html, IntoResponse, Redirect, Response};

use crate::session::{CurrentUser, SessionUser};

const STYLE: &str = "font-family: system-ui; padding: 2rem; background: #1a1a2e; color: #eee;";

fn layout(title: &str, body: &str) -> Html<String> {
    Html(format!(
        r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>{title}</title></head>
<body style="{STYLE}">
{body}
</body>
</html>"#
    ))
}

pub async fn index() -> Html<String> {
    layout(
        "sensor hub",
        r#"<h1>Sensor Hub</h1>
<p><a href="/signin">Sign in</a> or <a href="/signup">create an account</a>.</p>"#,
    )
}

pub async fn signin() -> Html<String> {
    layout(
        "sign in",
        r#"<h1>Sign in</h1>
<form method="post" action="/login">
  <input name="username" placeholder="username" required>
  <input name="password" type="password" placeholder="password" required>
  <button type="submit">Sign in</button>
</form>"#,
    )
}

pub async fn signup() -> Html<String> {
    layout(
        "sign up",
        r#"<h1>Create an account</h1>
<form method="post" action="/signup" enctype="multipart/form-data">
  <input name="firstname" placeholder="first name">
  <input name="lastname" placeholder="last name">
  <input name="username" placeholder="username" required>
  <input name="email" type="email" placeholder="email">
  <input name="password" type="password" placeholder="password" required>
  <input name="profilePhoto" type="file" accept="image/*">
  <button type="submit">Sign up</button>
</form>"#,
    )
}

pub async fn dashboard(current: CurrentUser) -> Response {
    match current.user {
        Some(user) => render_dashboard(&user).into_response(),
        None => Redirect::to("/signin").into_response(),
    }
}

fn render_dashboard(user: &SessionUser) -> Html<String> {
    let picture = user
        .profile_picture
        .as_deref()
        .map(|src| format!(r#"<img src="{}" alt="" width="64">"#, html_escape(src)))
        .unwrap_or_default();

    let body = format!(
        r#"<h1>{picture} Welcome, {first} {last}</h1>
<p><a href="/logout">Log out</a></p>
<table>
  <thead><tr><th>time</th><th>temperature</th><th>humidity</th><th>air quality</th><th>gps</th><th>led</th></tr></thead>
  <tbody id="readings"></tbody>
</table>
<script>
const rows = document.getElementById("readings");
const cell = (v) => v === undefined ? "" : (typeof v === "object" ? JSON.stringify(v) : String(v));
function add(r) {{
  const tr = document.createElement("tr");
  for (const v of [r.timestamp, r.temperature, r.humidity, r.airQuality, r.gps, r.led]) {{
    const td = document.createElement("td");
    td.textContent = cell(v);
    tr.appendChild(td);
  }}
  rows.prepend(tr);
}}
fetch("/api/sensor_data").then((res) => res.json()).then((data) => data.forEach(add));
const ws = new WebSocket((location.protocol === "https:" ? "wss://" : "ws://") + location.host + "/ws");
ws.onmessage = (msg) => {{
  const evt = JSON.parse(msg.data);
  if (evt.event === "sensorData") add(evt.data);
}};
</script>"#,
        first = html_escape(&user.first_name),
        last = html_escape(&user.last_name),
    );

    layout("dashboard", &body)
}

/// escape html special characters to prevent xss
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dashboard_escapes_user_fields() {
        let user = SessionUser {
            username: "eve".into(),
            first_name: "<script>".into(),
            last_name: "\"x\"".into(),
            profile_picture: Some("/uploads/a.png".into()),
        };
        let Html(html) = render_dashboard(&user);
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("&quot;x&quot;"));
        assert!(html.contains(r#"src="/uploads/a.png""#));
    }
}
