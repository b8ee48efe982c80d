use crate::auth::Role;

use super::error::err;
use super::types::{AppState, Request, SessionUser};

/// What a method requires of the caller. One check, parameterized by
/// capability, instead of role comparisons scattered through handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Authenticated,
    Admin,
}

pub fn authorize<'a>(
    state: &'a AppState,
    req: &Request,
    cap: Capability,
) -> Result<&'a SessionUser, serde_json::Value> {
    let Some(user) = state.session.as_ref() else {
        return Err(err(&req.id, "unauthenticated", "sign in first", None));
    };
    if cap == Capability::Admin && user.role != Role::Admin {
        return Err(err(
            &req.id,
            "forbidden",
            "this operation requires the ADMIN role",
            None,
        ));
    }
    Ok(user)
}
