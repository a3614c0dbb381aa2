use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One JSON line on stdin. `params` defaults to `null` so bare requests
/// like `{"id":"1","method":"health"}` parse.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Daemon state: the selected workspace directory and the open report-card
/// database inside it. Both are `None` until `workspace.select` succeeds;
/// handlers that need the store refuse with `no_workspace` before then.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
