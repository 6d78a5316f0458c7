// 🔐 Identity Gateway - Registration, login, sessions
//
// The game core only ever asks one question of this module: "which player is
// behind this session token?" (`IdentityGateway`). Everything else here serves
// the HTTP server.
//
// Passwords: bcrypt (`$2b$<cost>$...`).
// Session tokens: random UUIDs; only their SHA-256 digest is stored.

use crate::db::load_player_by_owner;
use crate::error::IdentityError;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// bcrypt work factor for new passwords
#[cfg(not(test))]
pub const PASSWORD_HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
pub const PASSWORD_HASH_COST: u32 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// PASSWORDS
// ============================================================================

pub fn hash_password(password: &str) -> Result<String, IdentityError> {
    Ok(bcrypt::hash(password, PASSWORD_HASH_COST)?)
}

/// False for a wrong password and for a malformed stored hash
pub fn verify_password(password: &str, stored: &str) -> bool {
    bcrypt::verify(password, stored).unwrap_or(false)
}

fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

// ============================================================================
// USERS
// ============================================================================

pub fn register_user(
    conn: &Connection,
    username: &str,
    email: &str,
    password: &str,
) -> Result<User, IdentityError> {
    let username = username.trim();
    let email = email.trim();
    if username.is_empty() || email.is_empty() || password.is_empty() {
        return Err(IdentityError::InvalidInput(
            "username, email and password are required".to_string(),
        ));
    }
    if !email.contains('@') {
        return Err(IdentityError::InvalidInput(format!("invalid email: {}", email)));
    }

    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        username: username.to_string(),
        email: email.to_lowercase(),
        created_at: Utc::now(),
    };

    let password_hash = hash_password(password)?;
    let result = conn.execute(
        "INSERT INTO users (id, username, email, password_hash, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            user.id,
            user.username,
            user.email,
            password_hash,
            user.created_at.to_rfc3339(),
        ],
    );

    match result {
        Ok(_) => {
            info!(user = %user.id, username = %user.username, "user registered");
            Ok(user)
        }
        Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
            Err(IdentityError::AlreadyRegistered)
        }
        Err(e) => Err(e.into()),
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<(User, String)> {
    let created_at: String = row.get(3)?;
    let user = User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|_| rusqlite::Error::InvalidQuery)?
            .with_timezone(&Utc),
    };
    Ok((user, row.get(4)?))
}

pub fn find_user(conn: &Connection, user_id: &str) -> Result<Option<User>, IdentityError> {
    let found = conn
        .query_row(
            "SELECT id, username, email, created_at, password_hash FROM users WHERE id = ?1",
            [user_id],
            row_to_user,
        )
        .optional()?;

    Ok(found.map(|(user, _)| user))
}

/// Check credentials; unknown user and wrong password look the same
pub fn authenticate(conn: &Connection, username: &str, password: &str) -> Result<User, IdentityError> {
    let found = conn
        .query_row(
            "SELECT id, username, email, created_at, password_hash FROM users WHERE username = ?1",
            [username.trim()],
            row_to_user,
        )
        .optional()?;

    match found {
        Some((user, stored)) if verify_password(password, &stored) => Ok(user),
        _ => Err(IdentityError::InvalidCredentials),
    }
}

// ============================================================================
// SESSIONS
// ============================================================================

/// Create a session; returns the opaque token for the cookie
pub fn create_session(
    conn: &Connection,
    user_id: &str,
    max_age: Duration,
    now: DateTime<Utc>,
) -> Result<String, IdentityError> {
    let token = uuid::Uuid::new_v4().simple().to_string();

    conn.execute(
        "INSERT INTO sessions (token_hash, user_id, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            hash_token(&token),
            user_id,
            now.to_rfc3339(),
            (now + max_age).to_rfc3339(),
        ],
    )?;

    debug!(user = %user_id, "session created");
    Ok(token)
}

/// User behind a live session; expired sessions are deleted
pub fn resolve_session(
    conn: &Connection,
    token: &str,
    now: DateTime<Utc>,
) -> Result<Option<String>, IdentityError> {
    let token_hash = hash_token(token);
    let found: Option<(String, String)> = conn
        .query_row(
            "SELECT user_id, expires_at FROM sessions WHERE token_hash = ?1",
            [&token_hash],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((user_id, expires_at)) = found else {
        return Ok(None);
    };
    let expired = DateTime::parse_from_rfc3339(&expires_at)
        .map(|at| at.with_timezone(&Utc) <= now)
        .unwrap_or(true);

    if expired {
        conn.execute("DELETE FROM sessions WHERE token_hash = ?1", [&token_hash])?;
        debug!(user = %user_id, "expired session removed");
        return Ok(None);
    }

    Ok(Some(user_id))
}

/// Returns true if a session was removed
pub fn destroy_session(conn: &Connection, token: &str) -> Result<bool, IdentityError> {
    let removed = conn.execute(
        "DELETE FROM sessions WHERE token_hash = ?1",
        [hash_token(token)],
    )?;
    Ok(removed > 0)
}

// ============================================================================
// GATEWAY
// ============================================================================

/// What the game core needs from authentication
pub trait IdentityGateway {
    /// Player id behind a session token, if the session is live
    fn authenticated_player(&self, token: &str) -> Result<Option<String>, IdentityError>;
}

/// Gateway over the SQLite session store
pub struct SqliteGateway<'c> {
    conn: &'c Connection,
    now: DateTime<Utc>,
}

impl<'c> SqliteGateway<'c> {
    pub fn new(conn: &'c Connection, now: DateTime<Utc>) -> Self {
        SqliteGateway { conn, now }
    }

    /// User behind the token, if any
    pub fn authenticated_user(&self, token: &str) -> Result<Option<String>, IdentityError> {
        resolve_session(self.conn, token, self.now)
    }
}

impl IdentityGateway for SqliteGateway<'_> {
    fn authenticated_player(&self, token: &str) -> Result<Option<String>, IdentityError> {
        let Some(user_id) = self.authenticated_user(token)? else {
            return Ok(None);
        };
        let player = load_player_by_owner(self.conn, &user_id)
            .map_err(|e| IdentityError::InvalidInput(format!("corrupt player save: {}", e)))?;
        Ok(player.map(|p| p.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{save_player, setup_database};
    use crate::ledger::Ledger;
    use crate::player::{Player, SocialClass};
    use chrono::TimeZone;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_password_hash_roundtrip() {
        let stored = hash_password("medici").unwrap();

        assert!(stored.starts_with("$2b$04$"));
        assert!(verify_password("medici", &stored));
        assert!(!verify_password("pazzi", &stored));
        assert!(!verify_password("medici", "garbage"));
        // Same password, different salt
        assert_ne!(stored, hash_password("medici").unwrap());
    }

    #[test]
    fn test_register_and_authenticate() {
        let conn = test_db();

        let user = register_user(&conn, "lorenzo", "Lorenzo@Medici.it", "magnifico").unwrap();
        assert_eq!(user.email, "lorenzo@medici.it");

        let logged_in = authenticate(&conn, "lorenzo", "magnifico").unwrap();
        assert_eq!(logged_in.id, user.id);

        assert!(matches!(
            authenticate(&conn, "lorenzo", "wrong"),
            Err(IdentityError::InvalidCredentials)
        ));
        assert!(matches!(
            authenticate(&conn, "giuliano", "magnifico"),
            Err(IdentityError::InvalidCredentials)
        ));
        assert_eq!(find_user(&conn, &user.id).unwrap(), Some(user));
    }

    #[test]
    fn test_register_rejects_duplicates_and_bad_input() {
        let conn = test_db();
        register_user(&conn, "lorenzo", "l@medici.it", "pw").unwrap();

        assert!(matches!(
            register_user(&conn, "lorenzo", "other@medici.it", "pw"),
            Err(IdentityError::AlreadyRegistered)
        ));
        assert!(matches!(
            register_user(&conn, "giuliano", "l@medici.it", "pw"),
            Err(IdentityError::AlreadyRegistered)
        ));
        assert!(matches!(
            register_user(&conn, "", "x@y.it", "pw"),
            Err(IdentityError::InvalidInput(_))
        ));
        assert!(matches!(
            register_user(&conn, "piero", "not-an-email", "pw"),
            Err(IdentityError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_session_lifecycle() {
        let conn = test_db();
        let user = register_user(&conn, "lorenzo", "l@medici.it", "pw").unwrap();

        let token = create_session(&conn, &user.id, Duration::hours(24), noon()).unwrap();

        assert_eq!(
            resolve_session(&conn, &token, noon() + Duration::hours(1)).unwrap(),
            Some(user.id.clone())
        );
        assert_eq!(resolve_session(&conn, "forged", noon()).unwrap(), None);

        assert!(destroy_session(&conn, &token).unwrap());
        assert!(!destroy_session(&conn, &token).unwrap());
        assert_eq!(resolve_session(&conn, &token, noon()).unwrap(), None);
    }

    #[test]
    fn test_expired_session_is_removed() {
        let conn = test_db();
        let user = register_user(&conn, "lorenzo", "l@medici.it", "pw").unwrap();
        let token = create_session(&conn, &user.id, Duration::hours(24), noon()).unwrap();

        let later = noon() + Duration::hours(25);
        assert_eq!(resolve_session(&conn, &token, later).unwrap(), None);

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_gateway_resolves_player() {
        let conn = test_db();
        let user = register_user(&conn, "lorenzo", "l@medici.it", "pw").unwrap();
        let player = Player::new("Lorenzo", SocialClass::Nobility, Ledger::default());
        save_player(&conn, &player, Some(&user.id)).unwrap();
        let token = create_session(&conn, &user.id, Duration::hours(24), noon()).unwrap();

        let gateway = SqliteGateway::new(&conn, noon());

        assert_eq!(gateway.authenticated_player(&token).unwrap(), Some(player.id));
        assert_eq!(gateway.authenticated_player("nope").unwrap(), None);
    }
}
