use sha2::{Digest, Sha256};

/// Rounds of hash stretching applied on top of the salted digest.
const STRETCH_ROUNDS: u32 = 4096;

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }

    pub fn parse(raw: &str) -> Option<Role> {
        match raw {
            "USER" => Some(Role::User),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Salted, iterated SHA-256. The salt is stored alongside the hash, so
/// verification re-derives with the stored salt and compares.
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    let mut digest = hasher.finalize();
    for _ in 1..STRETCH_ROUNDS {
        let mut round = Sha256::new();
        round.update(digest);
        digest = round.finalize();
    }
    hex_digest(&digest)
}

pub fn verify_password(password: &str, salt: &str, stored_hash: &str) -> bool {
    hash_password(password, salt) == stored_hash
}

pub fn new_salt() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
