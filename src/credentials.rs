//! Opaque credential storage (spec §4.1, §3 "Credential records", §6
//! "Persisted state").
//!
//! The core treats credentials as an external collaborator
//! (`CredentialStore`); `InMemoryCredentialStore` is the reference
//! implementation used by tests and the standalone binary, keyed the same
//! way the original's `database.py` tables are (`admins`, `users`,
//! `mounts`), but without the SQLite layer — persistence is explicitly out
//! of the core's scope per spec §1.

use std::collections::HashMap;

use hmac::Hmac;
use parking_lot::RwLock;
use pbkdf2::pbkdf2;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::dialect::Dialect;
use crate::error::AuthError;

const PBKDF2_ROUNDS: u32 = 10_000;
const SALT_BYTES: usize = 16;

/// Hash a plaintext password into the `"<salt>$<hex-digest>"` format.
pub fn hash_password(password: &str) -> String {
    let mut salt_bytes = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = hex::encode(salt_bytes);
    hash_password_with_salt(password, &salt)
}

fn hash_password_with_salt(password: &str, salt: &str) -> String {
    format!("{salt}${}", pbkdf2_hex(password, salt))
}

fn pbkdf2_hex(password: &str, salt: &str) -> String {
    let mut out = [0u8; 32];
    pbkdf2::<Hmac<Sha256>>(password.as_bytes(), salt.as_bytes(), PBKDF2_ROUNDS, &mut out);
    hex::encode(out)
}

/// Verify a plaintext password against a stored hash, accepting the legacy
/// plaintext form (no `$`) for records created before PBKDF2 was adopted.
pub fn verify_password(stored: &str, candidate: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, expected_hex)) => {
            let candidate_hex = pbkdf2_hex(candidate, salt);
            candidate_hex.as_bytes().ct_eq(expected_hex.as_bytes()).into()
        }
        None => stored.as_bytes().ct_eq(candidate.as_bytes()).into(),
    }
}

#[derive(Debug, Clone)]
pub struct AdminRecord {
    pub name: String,
    pub hash: String,
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub name: String,
    pub hash: String,
}

#[derive(Debug, Clone)]
pub struct MountCredRecord {
    pub name: String,
    pub secret: String,
    pub owner_user: Option<String>,
}

/// Opaque lookup of user and mount secrets; admin verify (spec §4.1).
pub trait CredentialStore: Send + Sync {
    fn verify_admin(&self, name: &str, password: &str) -> bool;

    fn verify_mount_producer(
        &self,
        mount: &str,
        dialect: Dialect,
        supplied_password: &str,
        supplied_user: Option<&str>,
        supplied_user_password: Option<&str>,
    ) -> Result<(), AuthError>;

    fn verify_consumer(&self, mount: &str, user: &str, password: &str) -> Result<(), AuthError>;

    fn verify_consumer_digest(&self, mount: &str, digest_params: &crate::digest::DigestParams, method: &str) -> Result<(), AuthError>;

    fn list_mounts(&self) -> Vec<MountCredRecord>;
    fn list_users(&self) -> Vec<UserRecord>;

    fn add_user(&self, name: &str, password: &str);
    fn update_user_password(&self, name: &str, password: &str) -> bool;
    fn delete_user(&self, name: &str) -> bool;

    fn add_mount(&self, name: &str, secret: &str, owner_user: Option<&str>);
    fn update_mount_secret(&self, name: &str, secret: &str) -> bool;
    fn delete_mount(&self, name: &str) -> bool;
}

#[derive(Default)]
struct Tables {
    admins: HashMap<String, AdminRecord>,
    users: HashMap<String, UserRecord>,
    mounts: HashMap<String, MountCredRecord>,
}

/// Reference `CredentialStore`: everything lives in memory behind one lock,
/// read-mostly (spec §5 "Credential store is read-mostly with its own
/// lock").
pub struct InMemoryCredentialStore {
    tables: RwLock<Tables>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        InMemoryCredentialStore {
            tables: RwLock::new(Tables::default()),
        }
    }

    pub fn with_admin(self, name: &str, password: &str) -> Self {
        self.tables.write().admins.insert(
            name.to_string(),
            AdminRecord {
                name: name.to_string(),
                hash: hash_password(password),
            },
        );
        self
    }
}

impl Default for InMemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn verify_admin(&self, name: &str, password: &str) -> bool {
        self.tables
            .read()
            .admins
            .get(name)
            .map(|a| verify_password(&a.hash, password))
            .unwrap_or(false)
    }

    fn verify_mount_producer(
        &self,
        mount: &str,
        dialect: Dialect,
        supplied_password: &str,
        supplied_user: Option<&str>,
        supplied_user_password: Option<&str>,
    ) -> Result<(), AuthError> {
        let tables = self.tables.read();
        let mount_cred = tables.mounts.get(mount).ok_or(AuthError::NoSuchMount)?;

        match dialect {
            Dialect::V20 => {
                let user_name = supplied_user.ok_or(AuthError::NoSuchUser)?;
                let user = tables.users.get(user_name).ok_or(AuthError::NoSuchUser)?;
                let user_password = supplied_user_password.unwrap_or("");
                if !verify_password(&user.hash, user_password) {
                    return Err(AuthError::BadUserPassword);
                }
                // NTRIP 2.0 checks only username/password and mount
                // ownership; the mount's own secret is not consulted.
                match &mount_cred.owner_user {
                    Some(owner) if owner != user_name => Err(AuthError::NotAuthorized),
                    _ => Ok(()),
                }
            }
            Dialect::V10Native | Dialect::V10Http | Dialect::V08 | Dialect::Rtsp => {
                if verify_password_plain(&mount_cred.secret, supplied_password) {
                    Ok(())
                } else {
                    Err(AuthError::BadMountPassword)
                }
            }
        }
    }

    fn verify_consumer(&self, mount: &str, user: &str, password: &str) -> Result<(), AuthError> {
        let tables = self.tables.read();
        if !tables.mounts.contains_key(mount) {
            return Err(AuthError::NoSuchMount);
        }
        let user_record = tables.users.get(user).ok_or(AuthError::NoSuchUser)?;
        if verify_password(&user_record.hash, password) {
            Ok(())
        } else {
            Err(AuthError::BadUserPassword)
        }
    }

    // Mirrors `NTRIPHandler._verify_digest_auth` in the original: HA1 is
    // computed over whatever `get_user_password` returns, which is the
    // stored (salted PBKDF2) hash string, not a recovered plaintext.
    fn verify_consumer_digest(&self, mount: &str, digest_params: &crate::digest::DigestParams, method: &str) -> Result<(), AuthError> {
        let tables = self.tables.read();
        if !tables.mounts.contains_key(mount) {
            return Err(AuthError::NoSuchMount);
        }
        let user_record = tables.users.get(&digest_params.username).ok_or(AuthError::NoSuchUser)?;
        if crate::digest::validate_response(digest_params, method, &user_record.hash) {
            Ok(())
        } else {
            Err(AuthError::BadUserPassword)
        }
    }

    fn list_mounts(&self) -> Vec<MountCredRecord> {
        self.tables.read().mounts.values().cloned().collect()
    }

    fn list_users(&self) -> Vec<UserRecord> {
        self.tables.read().users.values().cloned().collect()
    }

    fn add_user(&self, name: &str, password: &str) {
        self.tables.write().users.insert(
            name.to_string(),
            UserRecord {
                name: name.to_string(),
                hash: hash_password(password),
            },
        );
    }

    fn update_user_password(&self, name: &str, password: &str) -> bool {
        let mut tables = self.tables.write();
        match tables.users.get_mut(name) {
            Some(u) => {
                u.hash = hash_password(password);
                true
            }
            None => false,
        }
    }

    fn delete_user(&self, name: &str) -> bool {
        self.tables.write().users.remove(name).is_some()
    }

    fn add_mount(&self, name: &str, secret: &str, owner_user: Option<&str>) {
        self.tables.write().mounts.insert(
            name.to_string(),
            MountCredRecord {
                name: name.to_string(),
                secret: secret.to_string(),
                owner_user: owner_user.map(str::to_string),
            },
        );
    }

    fn update_mount_secret(&self, name: &str, secret: &str) -> bool {
        let mut tables = self.tables.write();
        match tables.mounts.get_mut(name) {
            Some(m) => {
                m.secret = secret.to_string();
                true
            }
            None => false,
        }
    }

    fn delete_mount(&self, name: &str) -> bool {
        self.tables.write().mounts.remove(name).is_some()
    }
}

/// Mount secrets are shared tokens, not login passwords: compared directly,
/// but still constant-time to avoid timing side channels.
fn verify_password_plain(stored: &str, candidate: &str) -> bool {
    stored.as_bytes().ct_eq(candidate.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pbkdf2_round_trip() {
        let hash = hash_password("hunter2");
        assert!(verify_password(&hash, "hunter2"));
        assert!(!verify_password(&hash, "wrong"));
    }

    #[test]
    fn legacy_plaintext_form_accepted() {
        assert!(verify_password("hunter2", "hunter2"));
        assert!(!verify_password("hunter2", "other"));
    }

    #[test]
    fn v10_upload_ignores_user_fields() {
        let store = InMemoryCredentialStore::new();
        store.add_mount("BASE1", "pw1", None);
        assert!(store
            .verify_mount_producer("BASE1", Dialect::V10Native, "pw1", None, None)
            .is_ok());
        assert_eq!(
            store.verify_mount_producer("BASE1", Dialect::V10Native, "wrong", None, None),
            Err(AuthError::BadMountPassword)
        );
    }

    #[test]
    fn v20_checks_user_and_ownership() {
        let store = InMemoryCredentialStore::new();
        store.add_user("u1", "pw1");
        store.add_mount("BASE1", "mountpw", Some("u1"));
        assert!(store
            .verify_mount_producer("BASE1", Dialect::V20, "mountpw", Some("u1"), Some("pw1"))
            .is_ok());
        assert_eq!(
            store.verify_mount_producer("BASE1", Dialect::V20, "mountpw", Some("other"), Some("pw1")),
            Err(AuthError::NoSuchUser)
        );

        store.add_user("u2", "pw2");
        assert_eq!(
            store.verify_mount_producer("BASE1", Dialect::V20, "mountpw", Some("u2"), Some("pw2")),
            Err(AuthError::NotAuthorized)
        );
    }

    fn md5_hex(parts: &[&str]) -> String {
        use digest::Digest;
        let mut hasher = md5::Md5::new();
        hasher.update(parts.join(":").as_bytes());
        hex::encode(hasher.finalize())
    }

    #[test]
    fn digest_consumer_auth_checks_response_against_stored_hash() {
        let store = InMemoryCredentialStore::new();
        store.add_user("u1", "pw1");
        store.add_mount("BASE1", "mountpw", None);
        let stored_hash = store.list_users().into_iter().next().unwrap().hash;

        let nonce = "testnonce";
        let ha1 = md5_hex(&["u1", "NTRIP", &stored_hash]);
        let ha2 = md5_hex(&["GET", "/BASE1"]);
        let response = md5_hex(&[&ha1, nonce, &ha2]);

        let params = crate::digest::DigestParams {
            username: "u1".to_string(),
            realm: "NTRIP".to_string(),
            nonce: nonce.to_string(),
            uri: "/BASE1".to_string(),
            response,
            qop: None,
            nc: None,
            cnonce: None,
        };

        assert!(store.verify_consumer_digest("BASE1", &params, "GET").is_ok());

        let mut bad_params = params.clone();
        bad_params.response = "0".repeat(32);
        assert_eq!(
            store.verify_consumer_digest("BASE1", &bad_params, "GET"),
            Err(AuthError::BadUserPassword)
        );
    }

    #[test]
    fn consumer_auth_ignores_mount_ownership() {
        let store = InMemoryCredentialStore::new();
        store.add_user("u1", "pw1");
        store.add_mount("BASE1", "mountpw", Some("someone_else"));
        assert!(store.verify_consumer("BASE1", "u1", "pw1").is_ok());
    }
}
