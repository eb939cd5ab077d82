mod ws;

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::models::{PollKey, Sport};
use crate::relay::Relay;

#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
    /// Sport assumed when a request does not name one
    pub default_sport: Sport,
    /// Outbound queue length per WebSocket connection
    pub viewer_buffer: usize,
}

/// Build the Axum router: viewer page, WebSocket endpoint and JSON API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .route("/api/match/:match_id", get(match_handler))
        .route("/api/test", get(test_default_handler))
        .route("/api/test/:sport", get(test_handler))
        .route("/api/stats", get(stats_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

type ApiError = (StatusCode, Json<Value>);

/// Serve the viewer page, injecting the default sport.
async fn index_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let html = VIEWER_HTML.replace(
        r#"<body>"#,
        &format!(r#"<body data-sport="{}">"#, state.default_sport),
    );
    Html(html)
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| ws::handle_socket(socket, state))
}

#[derive(Debug, Deserialize)]
struct MatchQuery {
    sport: Option<String>,
}

fn parse_sport(raw: Option<&str>, default: Sport) -> Result<Sport, ApiError> {
    match raw {
        None => Ok(default),
        Some(s) => s
            .parse()
            .map_err(|e: crate::error::UnknownSport| {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))
            }),
    }
}

/// GET /api/match/:match_id?sport=cricket
async fn match_handler(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<String>,
    Query(query): Query<MatchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let sport = parse_sport(query.sport.as_deref(), state.default_sport)?;
    state
        .relay
        .cache()
        .get(&PollKey::new(match_id.as_str(), sport))
        .map(Json)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "Match not found" })),
            )
        })
}

/// GET /api/test
async fn test_default_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let sport = state.default_sport;
    probe(&state, sport).await
}

/// GET /api/test/:sport
async fn test_handler(
    State(state): State<Arc<AppState>>,
    Path(sport): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let sport = parse_sport(Some(&sport), state.default_sport)?;
    probe(&state, sport).await
}

async fn probe(state: &AppState, sport: Sport) -> Result<Json<Value>, ApiError> {
    let timeout = state.relay.settings().fetch_timeout;
    let result = match tokio::time::timeout(timeout, state.relay.source().probe(sport)).await {
        Ok(result) => result,
        Err(_) => Err(crate::error::SourceError::Timeout(timeout)),
    };

    match result {
        Ok(probe) => Ok(Json(json!({
            "status": "success",
            "sport": probe.sport,
            "events_count": probe.events_count,
            "has_data": probe.has_data,
            "sample_keys": probe.sample_keys,
        }))),
        Err(e) => {
            warn!("Source probe for {} failed: {}", sport, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "error",
                    "sport": sport,
                    "message": format!("Failed to fetch data from {} {} API: {}", state.relay.source().name(), sport, e),
                })),
            ))
        }
    }
}

/// GET /api/stats
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.relay.stats())
}

/// Embedded single-file viewer (HTML + CSS + JS)
const VIEWER_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Matchcast Live Viewer</title>
<style>
  :root {
    --bg: #0f1117;
    --card: #1a1d27;
    --border: #2a2d3a;
    --accent: #6c63ff;
    --green: #00c896;
    --red: #ff4f6a;
    --text: #e0e0e0;
    --muted: #8888aa;
  }
  * { box-sizing: border-box; margin: 0; padding: 0; }
  body { background: var(--bg); color: var(--text); font-family: 'Segoe UI', system-ui, sans-serif; }
  header { display: flex; align-items: center; gap: 1rem; padding: 1rem 2rem; border-bottom: 1px solid var(--border); }
  header h1 { font-size: 1.4rem; font-weight: 700; }
  .status-dot { width: 10px; height: 10px; border-radius: 50%; background: var(--red); display: inline-block; }
  .status-dot.up { background: var(--green); animation: pulse 1.5s infinite; }
  @keyframes pulse { 0%,100% { opacity: 1; } 50% { opacity: .3; } }
  main { padding: 1.5rem 2rem; display: grid; gap: 1.5rem; }
  form { display: flex; gap: .6rem; flex-wrap: wrap; }
  input, select, button { background: var(--card); color: var(--text); border: 1px solid var(--border); border-radius: 6px; padding: .45rem .8rem; font-size: .9rem; }
  button { cursor: pointer; }
  button:hover { border-color: var(--accent); color: var(--accent); }
  .panel { background: var(--card); border: 1px solid var(--border); border-radius: 10px; overflow: hidden; }
  .panel-header { padding: .9rem 1.2rem; border-bottom: 1px solid var(--border); font-weight: 600; display: flex; justify-content: space-between; align-items: center; }
  .panel-header small { color: var(--muted); font-weight: 400; }
  table { width: 100%; border-collapse: collapse; }
  th { padding: .7rem 1rem; text-align: left; font-size: .75rem; text-transform: uppercase; color: var(--muted); border-bottom: 1px solid var(--border); }
  td { padding: .65rem 1rem; font-size: .88rem; border-bottom: 1px solid #1e2130; }
  tr:last-child td { border-bottom: none; }
  .empty { color: var(--muted); text-align: center; padding: 2rem; font-size: .9rem; }
  .info { color: #ff9800; padding: 1rem 1.2rem; font-size: .9rem; }
  ul.innings { list-style: none; padding: .6rem 1.2rem; color: var(--muted); font-size: .85rem; }
  #log { max-height: 160px; overflow-y: auto; padding: .6rem 1.2rem; font-family: monospace; font-size: .78rem; color: var(--muted); }
</style>
</head>
<body>
<header>
  <span class="status-dot" id="dot"></span>
  <h1>Matchcast</h1>
  <span style="margin-left:auto;color:var(--muted);font-size:.8rem;" id="last-updated"></span>
</header>

<main>
  <form id="sub-form">
    <input id="match-id" placeholder="match id" value="match-1" required>
    <select id="sport">
      <option value="football">Football</option>
      <option value="cricket">Cricket</option>
    </select>
    <button type="submit">Subscribe</button>
    <button type="button" id="unsub">Unsubscribe</button>
  </form>

  <div id="matches"></div>

  <div class="panel">
    <div class="panel-header">Connection Log</div>
    <div id="log"></div>
  </div>
</main>

<script>
// Keyed by "<match id>:<sport>"; one panel per poll key
const matches = {};
let socket;

const esc = v => String(v ?? '').replace(/[&<>"']/g, c =>
  ({ '&': '&amp;', '<': '&lt;', '>': '&gt;', '"': '&quot;', "'": '&#39;' }[c]));
const keyOf = (id, sport) => `${id}:${sport}`;

function log(line) {
  const el = document.getElementById('log');
  el.insertAdjacentHTML('afterbegin', `<div>${new Date().toLocaleTimeString()} ${esc(line)}</div>`);
}

function send(event, data) {
  if (socket && socket.readyState === WebSocket.OPEN) socket.send(JSON.stringify({ event, data }));
}

function connect() {
  const proto = location.protocol === 'https:' ? 'wss' : 'ws';
  socket = new WebSocket(`${proto}://${location.host}/ws`);
  socket.onopen = () => {
    document.getElementById('dot').className = 'status-dot up';
    log('connected');
    Object.values(matches).forEach(m => send('match:subscribe', { match_id: m.id, sport: m.sport }));
  };
  socket.onclose = () => {
    document.getElementById('dot').className = 'status-dot';
    log('disconnected, retrying in 3s');
    setTimeout(connect, 3000);
  };
  socket.onmessage = ev => {
    const msg = JSON.parse(ev.data);
    if (msg.event === 'match:update') { matches[keyOf(msg.data.id, msg.data.sport)] = msg.data; render(); }
    else if (msg.event === 'error') log('error: ' + msg.data.message);
  };
}

function scoreRows(m) {
  const raw = m.raw;
  return raw.teams.map(team => {
    const line = raw.by_team[team] || {};
    if (raw.sport === 'cricket') {
      const rr = m.stats.run_rate[team];
      return `<tr><td>${esc(team)}</td><td>${esc(line.runs)}/${esc(line.wickets)}</td><td>${esc(line.overs)}</td><td>${rr != null ? rr.toFixed(2) : '–'}</td></tr>`;
    }
    return `<tr><td>${esc(team)}</td><td>${esc(line.score)}</td><td>${esc(line.possession)}</td><td>${m.stats.leader === team ? 'leading' : ''}</td></tr>`;
  }).join('');
}

function render() {
  const root = document.getElementById('matches');
  root.innerHTML = Object.values(matches).map(m => {
    if (m.info) {
      return `<div class="panel"><div class="panel-header">${esc(m.id)} <small>${esc(m.sport)}</small></div><div class="info">${esc(m.info)}</div></div>`;
    }
    const heads = m.sport === 'cricket'
      ? '<th>Team</th><th>Score</th><th>Overs</th><th>Run Rate</th>'
      : '<th>Team</th><th>Score</th><th>Possession</th><th></th>';
    const innings = m.sport === 'cricket' && m.stats.innings.length
      ? `<ul class="innings">${m.stats.innings.map(i => `<li>${esc(i)}</li>`).join('')}</ul>` : '';
    return `<div class="panel">
      <div class="panel-header">${esc(m.raw.teams.join(' vs '))} <small>${esc(m.raw.status)} · ${esc(m.id)} · ${esc(m.sport)}</small></div>
      <table><thead><tr>${heads}</tr></thead><tbody>${scoreRows(m)}</tbody></table>${innings}
    </div>`;
  }).join('') || '<div class="empty">Subscribe to a match to see live updates</div>';
  document.getElementById('last-updated').textContent = 'Updated ' + new Date().toLocaleTimeString();
}

document.getElementById('sport').value = document.body.dataset.sport || 'football';
document.getElementById('sub-form').addEventListener('submit', e => {
  e.preventDefault();
  const match_id = document.getElementById('match-id').value.trim();
  const sport = document.getElementById('sport').value;
  const key = keyOf(match_id, sport);
  matches[key] = matches[key] || { id: match_id, sport, info: 'Waiting for data...' };
  render();
  send('match:subscribe', { match_id, sport });
});
document.getElementById('unsub').addEventListener('click', () => {
  const match_id = document.getElementById('match-id').value.trim();
  send('match:unsubscribe', { match_id });
  // The server topic is per match id, so every sport panel for it goes
  Object.keys(matches).filter(k => matches[k].id === match_id).forEach(k => delete matches[k]);
  render();
});

render();
connect();
</script>
</body>
</html>"#;
