//! Server-rendered HTML: login, dashboard, settings and error pages.
//!
//! Every interpolated value goes through [`html_escape`].

use crate::route_table::RouteEntry;
use crate::util::html_escape;

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; margin: 0; background: #f5f5f5; color: #222; }
.header { background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); color: #fff; padding: 16px 24px; display: flex; justify-content: space-between; align-items: center; }
.header h1 { margin: 0; font-size: 22px; }
.container { max-width: 1100px; margin: 0 auto; padding: 20px; }
.card { background: #fff; padding: 20px; border-radius: 10px; box-shadow: 0 2px 5px rgba(0,0,0,.1); margin-bottom: 20px; }
.grid { display: grid; grid-template-columns: repeat(auto-fill, minmax(260px, 1fr)); gap: 20px; }
.btn, button { display: inline-block; padding: 9px 18px; background: #667eea; color: #fff; border: none; border-radius: 5px; text-decoration: none; cursor: pointer; font-size: 14px; }
.btn-secondary { background: #6c757d; }
.btn-danger { background: #dc3545; }
input { width: 100%; padding: 10px; margin: 6px 0; border: 1px solid #ddd; border-radius: 5px; box-sizing: border-box; }
.error { color: #c00; }
.success { color: #080; }
.icon { width: 32px; height: 32px; vertical-align: middle; margin-right: 8px; }
pre.term { background: #111; color: #ddd; height: 320px; overflow-y: auto; padding: 10px; white-space: pre-wrap; margin: 0 0 8px; }
code { background: #eee; padding: 1px 4px; border-radius: 3px; }
"#;

fn layout(title: &str, header_links: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Portgate - {title}</title>
<style>{STYLE}</style>
</head>
<body>
<div class="header"><h1>{title}</h1><div>{header_links}</div></div>
<div class="container">
{body}
</div>
</body>
</html>"#,
        title = html_escape(title),
    )
}

pub fn login_page(failed: bool) -> String {
    let error = if failed {
        r#"<p class="error">Invalid credentials</p>"#
    } else {
        ""
    };
    layout(
        "Login",
        "",
        &format!(
            r#"<div class="card" style="max-width:320px;margin:60px auto">
<form method="POST" action="/login">
<input type="text" name="username" placeholder="Username" autocomplete="username" required>
<input type="password" name="password" placeholder="Password" autocomplete="current-password" required>
<button type="submit" style="width:100%">Login</button>
{error}
</form>
</div>"#
        ),
    )
}

fn app_card(app: &RouteEntry) -> String {
    let icon = app
        .icon
        .as_deref()
        .map(|src| format!(r#"<img class="icon" src="{}" alt="">"#, html_escape(src)))
        .unwrap_or_default();
    format!(
        r#"<div class="card"><h3>{icon}{name}</h3><p>Port: {port}</p><a class="btn" href="{path}/">Open</a></div>"#,
        name = html_escape(&app.name),
        port = app.target_port,
        path = html_escape(app.path_prefix.trim_end_matches('/')),
    )
}

/// Dashboard: app cards plus the terminal and tunnel panels.
pub fn dashboard_page(apps: &[RouteEntry], hostname: &str) -> String {
    let cards = if apps.is_empty() {
        r#"<p>No apps registered yet. Add one in <a href="/settings">Settings</a>.</p>"#.to_string()
    } else {
        apps.iter().map(app_card).collect::<String>()
    };
    let body = format!(
        r#"<h2>Apps on {hostname}</h2>
<div class="grid">{cards}</div>
<h2>Terminal</h2>
<div class="card">
<pre class="term" id="term"></pre>
<form id="termForm"><input id="termInput" placeholder="Type a command and press Enter" autocomplete="off"></form>
<button id="termStart">Start terminal</button>
</div>
<h2>VNC tunnel</h2>
<div class="card">
<form id="vncForm">
<input name="host" placeholder="Host" value="{hostname}">
<input name="port" type="number" placeholder="Port" value="5900" min="1" max="65535">
<button type="submit">Connect</button>
</form>
<p id="vncStatus">Not connected</p>
</div>
<script>
const ws = new WebSocket((location.protocol === 'https:' ? 'wss://' : 'ws://') + location.host + '/api/ws');
const term = document.getElementById('term');
const vncStatus = document.getElementById('vncStatus');
let vncBytes = 0;
function decode(msg) {{
  if (msg.encoding === 'base64') {{
    return new TextDecoder().decode(Uint8Array.from(atob(msg.data), c => c.charCodeAt(0)));
  }}
  return msg.data;
}}
ws.onmessage = (ev) => {{
  const msg = JSON.parse(ev.data);
  switch (msg.type) {{
    case 'terminal-output': term.textContent += decode(msg); term.scrollTop = term.scrollHeight; break;
    case 'terminal-error': term.textContent += '\n[' + msg.message + ']\n'; break;
    case 'vnc-connected': vncStatus.textContent = 'Connected'; break;
    case 'vnc-data': vncBytes += atob(msg.data).length; vncStatus.textContent = 'Connected, ' + vncBytes + ' bytes received'; break;
    case 'vnc-error': vncStatus.textContent = 'Error: ' + msg.message; break;
    case 'vnc-disconnected': vncStatus.textContent = 'Disconnected'; break;
    case 'error': console.warn(msg.code, msg.message); break;
  }}
}};
document.getElementById('termStart').onclick = () => ws.send(JSON.stringify({{type: 'start-terminal'}}));
document.getElementById('termForm').onsubmit = (e) => {{
  e.preventDefault();
  const input = document.getElementById('termInput');
  ws.send(JSON.stringify({{type: 'terminal-input', data: input.value + '\n'}}));
  input.value = '';
}};
document.getElementById('vncForm').onsubmit = (e) => {{
  e.preventDefault();
  const data = Object.fromEntries(new FormData(e.target));
  ws.send(JSON.stringify({{type: 'vnc-connect', host: data.host, port: parseInt(data.port, 10)}}));
}};
</script>"#,
        hostname = html_escape(hostname),
    );
    layout(
        "Dashboard",
        r#"<a class="btn btn-secondary" href="/settings">Settings</a> <a class="btn btn-secondary" href="/logout">Logout</a>"#,
        &body,
    )
}

fn app_row(app: &RouteEntry) -> String {
    format!(
        r#"<div class="card"><strong>{name}</strong><br><small>{host}:{port} at <code>{path}</code></small>
<div style="margin-top:8px"><button class="btn-secondary edit-app" data-path="{path}" data-name="{name}" data-port="{port}" data-host="{host}">Edit</button>
<button class="btn-danger delete-app" data-path="{path}">Delete</button></div></div>"#,
        name = html_escape(&app.name),
        host = html_escape(&app.target_host),
        port = app.target_port,
        path = html_escape(&app.path_prefix),
    )
}

/// Settings: hostname, apps, startup toggle, credentials.
pub fn settings_page(apps: &[RouteEntry], hostname: &str, run_on_startup: bool) -> String {
    let rows = apps.iter().map(app_row).collect::<String>();
    let checked = if run_on_startup { "checked" } else { "" };
    let body = format!(
        r#"<div class="card">
<h2>Hostname</h2>
<p>Default backend host for new apps.</p>
<form id="hostnameForm" data-endpoint="/api/change-hostname"><input name="hostname" value="{hostname}" required><button type="submit">Update hostname</button></form>
<p id="hostnameFormMessage"></p>
</div>
<div class="card">
<h2>Apps</h2>
<form id="addAppForm" data-endpoint="/api/apps" data-reload="1">
<input name="name" placeholder="App name" required>
<input name="host" placeholder="Host (default {hostname})">
<input name="port" type="number" placeholder="Port" min="1" max="65535" required>
<input name="path" placeholder="Path (e.g. /myapp)" pattern="^/[A-Za-z0-9_/-]*$" required>
<input name="icon" type="hidden">
<input id="iconFile" type="file" accept=".png,.jpg,.jpeg,.gif,.svg,.webp,.ico">
<button type="submit">Add app</button>
</form>
<p id="addAppFormMessage"></p>
{rows}
</div>
<div class="card">
<h2>Run on startup</h2>
<label><input type="checkbox" id="startupToggle" style="width:auto" {checked}> Enable the service at boot</label>
<p id="startupMessage"></p>
</div>
<div class="card">
<h2>Change password</h2>
<form id="passwordForm" data-endpoint="/api/change-password">
<input type="password" name="currentPassword" placeholder="Current password" required>
<input type="password" name="newPassword" placeholder="New password" required>
<button type="submit">Update password</button>
</form>
<p id="passwordFormMessage"></p>
</div>
<div class="card">
<h2>Change username</h2>
<form id="usernameForm" data-endpoint="/api/change-username">
<input name="newUsername" placeholder="New username" required>
<input type="password" name="password" placeholder="Current password" required>
<button type="submit">Update username</button>
</form>
<p id="usernameFormMessage"></p>
</div>
<script>
function show(id, result) {{
  const el = document.getElementById(id);
  el.className = result.success ? 'success' : 'error';
  el.textContent = result.success ? (result.message || 'Saved') : result.error;
  if (result.warning) el.textContent += ' (' + result.warning + ')';
}}
async function call(method, url, data) {{
  const resp = await fetch(url, {{method, headers: {{'Content-Type': 'application/json'}}, body: data ? JSON.stringify(data) : undefined}});
  return resp.json();
}}
document.querySelectorAll('form[data-endpoint]').forEach(form => {{
  form.onsubmit = async (e) => {{
    e.preventDefault();
    const data = Object.fromEntries(new FormData(form));
    for (const k of Object.keys(data)) if (data[k] === '') delete data[k];
    const result = await call('POST', form.dataset.endpoint, data);
    show(form.id + 'Message', result);
    if (result.success && form.dataset.reload) setTimeout(() => location.reload(), 800);
  }};
}});
document.getElementById('iconFile').onchange = async (e) => {{
  const body = new FormData();
  body.append('icon', e.target.files[0]);
  const result = await (await fetch('/api/upload-icon', {{method: 'POST', body}})).json();
  if (result.success) document.querySelector('#addAppForm [name=icon]').value = result.path;
  else show('addAppFormMessage', result);
}};
document.querySelectorAll('.edit-app').forEach(btn => btn.onclick = async () => {{
  const d = btn.dataset;
  const name = prompt('Name:', d.name); if (!name) return;
  const host = prompt('Host:', d.host); if (!host) return;
  const port = prompt('Port:', d.port); if (!port) return;
  const path = prompt('Path:', d.path); if (!path) return;
  const result = await call('PUT', '/api/apps/' + encodeURIComponent(d.path), {{name, host, port, path}});
  alert(result.success ? result.message : 'Error: ' + result.error);
  if (result.success) location.reload();
}});
document.querySelectorAll('.delete-app').forEach(btn => btn.onclick = async () => {{
  if (!confirm('Delete this app?')) return;
  const result = await call('DELETE', '/api/apps/' + encodeURIComponent(btn.dataset.path));
  alert(result.success ? result.message : 'Error: ' + result.error);
  if (result.success) location.reload();
}});
document.getElementById('startupToggle').onchange = async (e) => {{
  const result = await call('POST', '/api/startup', {{enabled: e.target.checked}});
  show('startupMessage', result);
  if (!result.success) e.target.checked = !e.target.checked;
}};
</script>"#,
        hostname = html_escape(hostname),
    );
    layout(
        "Settings",
        r#"<a class="btn btn-secondary" href="/">Back to dashboard</a>"#,
        &body,
    )
}

/// 502 page for a backend that could not be reached.
///
/// Only the failing route's target is shown.
pub fn unreachable_page(host: &str, port: u16, path: &str, error: &str) -> String {
    let body = format!(
        r#"<div class="card">
<h2>The application is not responding</h2>
<p>Target: <code>{host}:{port}</code></p>
<p>Path: <code>{path}</code></p>
<p>Error: <code>{error}</code></p>
<h3>Things to check</h3>
<ul>
<li>The service is not running: start it and reload this page.</li>
<li>The app is registered on the wrong port: compare it with the port the service listens on.</li>
<li>The host is unreachable: check the hostname and that the machine is on the network.</li>
</ul>
<a class="btn" href="/">Back to dashboard</a>
</div>"#,
        host = html_escape(host),
        path = html_escape(path),
        error = html_escape(error),
    );
    layout("Bad Gateway", "", &body)
}

pub fn not_found_page(path: &str) -> String {
    layout(
        "Not Found",
        r#"<a class="btn btn-secondary" href="/">Dashboard</a>"#,
        &format!(
            r#"<div class="card"><p>No app is registered for <code>{}</code>.</p></div>"#,
            html_escape(path)
        ),
    )
}
