use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::auth::Role;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The authenticated caller for the life of this connection, resolved at
/// `session.login` and consulted by the gate on every request.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub id: String,
    pub username: String,
    pub full_name: String,
    pub role: Role,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub session: Option<SessionUser>,
}
