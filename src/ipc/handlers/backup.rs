use serde_json::json;
use std::path::PathBuf;

use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::gate::{authorize, Capability};
use crate::ipc::types::{AppState, Request};

fn path_param(req: &Request, key: &str) -> Result<PathBuf, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let out_path = match path_param(req, "outPath") {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match backup::export_workspace_bundle(&workspace, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format,
                "dbSha256": summary.db_sha256,
                "outPath": out_path.to_string_lossy(),
            }),
        ),
        Err(e) => err(&req.id, "backup_export_failed", format!("{e:?}"), None),
    }
}

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let in_path = match path_param(req, "inPath") {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    // Release the live connection before swapping the file underneath it.
    state.db = None;
    let import_result = backup::import_workspace_bundle(&in_path, &workspace);
    let reopen = db::open_db(&workspace);
    match (import_result, reopen) {
        (Ok(summary), Ok(conn)) => {
            state.db = Some(conn);
            // Accounts in the restored database may differ; force a fresh
            // sign-in.
            state.session = None;
            ok(
                &req.id,
                json!({ "bundleFormat": summary.bundle_format_detected }),
            )
        }
        (Err(e), Ok(conn)) => {
            // Import failed but the original database is intact.
            state.db = Some(conn);
            err(&req.id, "backup_import_failed", format!("{e:?}"), None)
        }
        (_, Err(e)) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !matches!(req.method.as_str(), "backup.export" | "backup.import") {
        return None;
    }
    if let Err(resp) = authorize(state, req, Capability::Admin) {
        return Some(resp);
    }
    match req.method.as_str() {
        "backup.export" => Some(handle_export(state, req)),
        _ => Some(handle_import(state, req)),
    }
}
