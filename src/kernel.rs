//! Security kernel - users, credentials and the login gate
//!
//! Passwords are numeric PINs raised to 65537 modulo a small RSA-style
//! modulus generated once per database. The modulus is the product of a
//! 16-bit and a 17-bit prime, so it is trivially factorable: this keeps
//! clear-text PINs out of the database and nothing more.

use crate::storage::schema::{CREATE_SYSTEM_TABLE, CREATE_USER_TABLE};
use crate::storage::Connection;
use crate::{Error, Result};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ROOT_USER: &str = "root";

/// Root's PIN on a fresh database. Change it right away.
pub const DEFAULT_ROOT_PASSWORD: u32 = 1234;

/// Smallest PIN accepted by [`Credentials::encrypt`]
pub const MIN_PASSWORD: u32 = 1000;

const PUBLIC_EXPONENT: u64 = 65537;
const P_BITS: u32 = 16;
const Q_BITS: u32 = 17;
const MILLER_RABIN_ROUNDS: usize = 20;

/// The public modulus `n = p * q`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicModulus(u64);

impl PublicModulus {
    pub fn new(n: u64) -> Result<Self> {
        if n < 2 {
            return Err(Error::Config(format!("public modulus too small: {}", n)));
        }
        Ok(Self(n))
    }

    /// Parse the stored lower-case hex form
    pub fn from_hex(hex: &str) -> Result<Self> {
        let n = u64::from_str_radix(hex.trim(), 16)
            .map_err(|e| Error::Config(format!("unreadable public key {:?}: {}", hex, e)))?;
        Self::new(n)
    }

    pub fn to_hex(&self) -> String {
        format!("{:x}", self.0)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PublicModulus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// `base^exp mod modulus` without overflow
fn mod_pow(base: u64, mut exp: u64, modulus: u64) -> u64 {
    if modulus == 1 {
        return 0;
    }
    let m = u128::from(modulus);
    let mut result: u128 = 1;
    let mut b = u128::from(base) % m;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result * b % m;
        }
        b = b * b % m;
        exp >>= 1;
    }
    result as u64
}

/// Probabilistic primality test
fn is_probable_prime(n: u64, rng: &mut impl Rng) -> bool {
    if n < 2 {
        return false;
    }
    for p in [2u64, 3, 5, 7, 11, 13] {
        if n % p == 0 {
            return n == p;
        }
    }

    let mut d = n - 1;
    let mut r = 0;
    while d % 2 == 0 {
        d /= 2;
        r += 1;
    }

    'witness: for _ in 0..MILLER_RABIN_ROUNDS {
        let a = rng.gen_range(2..n - 1);
        let mut x = mod_pow(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..r {
            x = mod_pow(x, 2, n);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// A random probable prime of exactly `bits` bits
fn probable_prime(bits: u32, rng: &mut impl Rng) -> u64 {
    let low = 1u64 << (bits - 1);
    let high = 1u64 << bits;
    loop {
        let candidate = rng.gen_range(low..high) | 1;
        if is_probable_prime(candidate, rng) {
            return candidate;
        }
    }
}

/// A username with an encrypted password.
///
/// `password` is ciphertext in lower-case hex; the clear PIN is never kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, email: Option<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email,
            password: password.into(),
        }
    }

    /// Encrypt a PIN under `modulus`
    pub fn encrypt(
        modulus: PublicModulus,
        username: impl Into<String>,
        email: Option<String>,
        password: u32,
    ) -> Result<Self> {
        if password < MIN_PASSWORD {
            return Err(Error::Argument(format!("password must be at least {}", MIN_PASSWORD)));
        }
        if u64::from(password) >= modulus.value() {
            return Err(Error::Argument(format!("password must be below the public key {}", modulus)));
        }
        let cipher = mod_pow(u64::from(password), PUBLIC_EXPONENT, modulus.value());
        Ok(Self::new(username, email, format!("{:x}", cipher)))
    }

    pub fn is_root(&self) -> bool {
        self.username == ROOT_USER
    }
}

/// Create the `_system` and `_user` tables, generate the modulus and the
/// root user if missing, and return the modulus.
///
/// Must run inside an active transaction on `conn`.
pub(crate) fn init(conn: &Connection) -> Result<PublicModulus> {
    conn.exec(CREATE_SYSTEM_TABLE)?;
    conn.exec(CREATE_USER_TABLE)?;

    let stored = conn.query_text("SELECT value FROM _system WHERE property = ?1", ["public_key"])?;
    let modulus = match stored {
        Some(hex) => PublicModulus::from_hex(&hex)?,
        None => {
            let mut rng = rand::thread_rng();
            let p = probable_prime(P_BITS, &mut rng);
            let q = probable_prime(Q_BITS, &mut rng);
            let modulus = PublicModulus::new(p * q)?;
            for (property, value) in [
                ("p_prime", format!("{:x}", p)),
                ("q_prime", format!("{:x}", q)),
                ("public_key", modulus.to_hex()),
            ] {
                conn.exec_with(
                    "INSERT INTO _system (property, value) VALUES (?1, ?2)",
                    [property, value.as_str()],
                )?;
            }
            tracing::info!("generated public key {}", modulus);
            modulus
        }
    };

    let root = conn.query_i64("SELECT COUNT(*) FROM _user WHERE username = ?1", [ROOT_USER])?;
    if root.unwrap_or(0) == 0 {
        let creds = Credentials::encrypt(modulus, ROOT_USER, None, DEFAULT_ROOT_PASSWORD)?;
        conn.exec_with(
            "INSERT INTO _user (username, password) VALUES (?1, ?2)",
            [ROOT_USER, creds.password.as_str()],
        )?;
        tracing::info!("created {} user with the default password", ROOT_USER);
    }

    Ok(modulus)
}

/// Credential checks and user administration for one database file
pub struct Kernel {
    path: PathBuf,
    busy_timeout: Duration,
    modulus: PublicModulus,
    /// username -> ciphertext of the last validated password
    cache: Mutex<HashMap<String, String>>,
}

impl Kernel {
    pub(crate) fn new(path: PathBuf, busy_timeout: Duration, modulus: PublicModulus) -> Self {
        Self {
            path,
            busy_timeout,
            modulus,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn public_modulus(&self) -> PublicModulus {
        self.modulus
    }

    pub fn database_file_name(&self) -> &Path {
        &self.path
    }

    /// Forget every cached credential
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Run `f` on a dedicated connection, released on every path
    fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = Connection::open(&self.path, self.busy_timeout)?;
        let result = f(&conn);
        conn.release();
        result
    }

    /// Check credentials. Only engine failures are errors; a mismatch is `false`.
    pub fn validate(&self, credentials: Option<&Credentials>) -> Result<bool> {
        let Some(c) = credentials else {
            return Ok(false);
        };

        if let Some(cached) = self.cache.lock().get(&c.username) {
            return Ok(*cached == c.password);
        }

        let found = self.with_connection(|conn| {
            conn.query_i64(
                "SELECT COUNT(*) FROM _user WHERE username = ?1 AND password = ?2",
                [c.username.as_str(), c.password.as_str()],
            )
        })?;

        if found.unwrap_or(0) > 0 {
            Ok(self.remember(c))
        } else {
            tracing::debug!("rejected credentials for {}", c.username);
            Ok(false)
        }
    }

    /// Cache credentials read back from `_user`, unless a password change
    /// cached a newer ciphertext since the read. Returns whether `c` still
    /// matches the cache.
    fn remember(&self, c: &Credentials) -> bool {
        match self.cache.lock().entry(c.username.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(c.password.clone());
                true
            }
            Entry::Occupied(slot) => *slot.get() == c.password,
        }
    }

    /// Check that the credentials belong to root and are valid
    pub fn validate_root(&self, credentials: Option<&Credentials>) -> Result<bool> {
        match credentials {
            Some(c) if c.is_root() => self.validate(Some(c)),
            _ => Ok(false),
        }
    }

    fn require(&self, credentials: &Credentials) -> Result<()> {
        if self.validate(Some(credentials))? {
            Ok(())
        } else {
            Err(Error::Unauthorized(format!("wrong password for {}", credentials.username)))
        }
    }

    fn require_root(&self, credentials: &Credentials) -> Result<()> {
        if self.validate_root(Some(credentials))? {
            Ok(())
        } else {
            Err(Error::Unauthorized(format!("{} is not an authorized root", credentials.username)))
        }
    }

    /// Hand out a dedicated connection to valid credentials
    pub fn login(&self, credentials: &Credentials) -> Result<Connection> {
        self.require(credentials)?;
        tracing::info!("{} logged in", credentials.username);
        Connection::open(&self.path, self.busy_timeout)
    }

    /// Add a user. Root only; duplicate usernames fail in the engine.
    pub fn add_user(&self, root: &Credentials, user: &Credentials) -> Result<()> {
        self.require_root(root)?;
        self.with_connection(|conn| {
            conn.exec_with(
                "INSERT INTO _user (username, email, password) VALUES (?1, ?2, ?3)",
                rusqlite::params![user.username, user.email, user.password],
            )
        })?;
        self.cache.lock().insert(user.username.clone(), user.password.clone());
        tracing::info!("added user {}", user.username);
        Ok(())
    }

    /// Change one's own password
    pub fn change_password(&self, old: &Credentials, new: &Credentials) -> Result<()> {
        self.require(old)?;
        if old.username != new.username {
            return Err(Error::Argument(format!(
                "{} cannot change the password of {}",
                old.username, new.username
            )));
        }

        let changed = self.set_password(new)?;
        if changed == 0 {
            return Err(Error::Config(format!("password of {} was not changed", new.username)));
        }
        self.cache.lock().insert(new.username.clone(), new.password.clone());
        tracing::info!("{} changed password", new.username);
        Ok(())
    }

    /// Reset another user's password. Root only.
    pub fn change_password_for_user(&self, root: &Credentials, user: &Credentials) -> Result<()> {
        self.require_root(root)?;
        if root.username == user.username {
            tracing::warn!("{} should use change_password for its own password", root.username);
        }

        let changed = self.set_password(user)?;
        if changed == 0 {
            return Err(Error::Argument(format!("no such user: {}", user.username)));
        }
        self.cache.lock().insert(user.username.clone(), user.password.clone());
        tracing::info!("password of {} reset by {}", user.username, root.username);
        Ok(())
    }

    fn set_password(&self, user: &Credentials) -> Result<usize> {
        self.with_connection(|conn| {
            conn.exec_with(
                "UPDATE _user SET password = ?1 WHERE username = ?2",
                [user.password.as_str(), user.username.as_str()],
            )
        })
    }

    /// Usernames in creation order
    pub fn list_users(&self, credentials: &Credentials) -> Result<Vec<String>> {
        self.require(credentials)?;
        self.with_connection(|conn| {
            let mut stmt = conn.raw().prepare("SELECT username FROM _user ORDER BY rowid")?;
            let users = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(users)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn kernel() -> (TempDir, Kernel) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.db");
        let conn = Connection::open(&path, Duration::ZERO).unwrap();
        conn.exec("BEGIN IMMEDIATE TRANSACTION").unwrap();
        let modulus = init(&conn).unwrap();
        conn.exec("COMMIT").unwrap();
        conn.release();
        (dir, Kernel::new(path, Duration::ZERO, modulus))
    }

    fn root(k: &Kernel) -> Credentials {
        Credentials::encrypt(k.public_modulus(), ROOT_USER, None, DEFAULT_ROOT_PASSWORD).unwrap()
    }

    #[test]
    fn test_mod_pow() {
        assert_eq!(mod_pow(4, 13, 497), 445);
        assert_eq!(mod_pow(2, 10, 1_000_000), 1024);
        assert_eq!(mod_pow(7, 0, 13), 1);
    }

    #[test]
    fn test_primes() {
        let mut rng = rand::thread_rng();
        assert!(is_probable_prime(65537, &mut rng));
        assert!(is_probable_prime(131071, &mut rng));
        assert!(!is_probable_prime(65535, &mut rng));
        assert!(!is_probable_prime(561, &mut rng)); // Carmichael

        let p = probable_prime(16, &mut rng);
        assert!((1 << 15..1 << 16).contains(&p));
        let q = probable_prime(17, &mut rng);
        assert!((1 << 16..1 << 17).contains(&q));
    }

    #[test]
    fn test_encrypt() {
        let modulus = PublicModulus::new(3233).unwrap();
        let c = Credentials::encrypt(modulus, "ada", None, 1234).unwrap();
        assert_eq!(c.password, format!("{:x}", mod_pow(1234, 65537, 3233)));
        assert_eq!(c, Credentials::encrypt(modulus, "ada", None, 1234).unwrap());
        assert!(matches!(
            Credentials::encrypt(modulus, "ada", None, 999),
            Err(Error::Argument(_))
        ));
        // PINs at or above the modulus would wrap onto smaller ones
        assert!(matches!(
            Credentials::encrypt(modulus, "ada", None, 3233),
            Err(Error::Argument(_))
        ));
        assert!(matches!(
            Credentials::encrypt(modulus, "ada", None, 3233 + 1234),
            Err(Error::Argument(_))
        ));
        assert_eq!(PublicModulus::from_hex(&modulus.to_hex()).unwrap(), modulus);
        assert!(matches!(PublicModulus::from_hex("zz"), Err(Error::Config(_))));
    }

    #[test]
    fn test_root_is_created_once() {
        let (dir, k) = kernel();
        assert!(k.validate_root(Some(&root(&k))).unwrap());

        // a second init keeps the modulus and the single root
        let conn = Connection::open(&dir.path().join("kernel.db"), Duration::ZERO).unwrap();
        conn.exec("BEGIN IMMEDIATE TRANSACTION").unwrap();
        assert_eq!(init(&conn).unwrap(), k.public_modulus());
        assert_eq!(
            conn.query_i64("SELECT COUNT(*) FROM _user", []).unwrap(),
            Some(1)
        );
        conn.exec("COMMIT").unwrap();
        conn.release();
    }

    #[test]
    fn test_validate() {
        let (_dir, k) = kernel();
        let wrong = Credentials::encrypt(k.public_modulus(), ROOT_USER, None, 4321).unwrap();
        assert!(!k.validate(None).unwrap());
        assert!(!k.validate(Some(&wrong)).unwrap());
        assert!(k.validate(Some(&root(&k))).unwrap());
        // cached now, and a wrong password still fails
        assert!(!k.validate(Some(&wrong)).unwrap());
        k.clear_cache();
        assert!(k.validate(Some(&root(&k))).unwrap());
    }

    #[test]
    fn test_stale_read_does_not_overwrite_newer_password() {
        let (_dir, k) = kernel();
        let m = k.public_modulus();
        let stale = root(&k);
        let fresh = Credentials::encrypt(m, ROOT_USER, None, 4321).unwrap();

        // a password change cached `fresh` while `stale` was being read back
        k.cache.lock().insert(ROOT_USER.to_string(), fresh.password.clone());
        assert!(!k.remember(&stale));
        assert!(k.remember(&fresh));
        assert_eq!(k.cache.lock().get(ROOT_USER), Some(&fresh.password));

        k.clear_cache();
        assert!(k.remember(&stale));
    }

    #[test]
    fn test_login() {
        let (_dir, k) = kernel();
        let conn = k.login(&root(&k)).unwrap();
        conn.release();

        let stranger = Credentials::encrypt(k.public_modulus(), "mallory", None, 5555).unwrap();
        assert!(matches!(k.login(&stranger), Err(Error::Unauthorized(_))));
    }

    #[test]
    fn test_user_admin() {
        let (_dir, k) = kernel();
        let m = k.public_modulus();
        let root = root(&k);
        let ada = Credentials::encrypt(m, "ada", Some("ada@example.com".into()), 1815).unwrap();

        k.add_user(&root, &ada).unwrap();
        assert!(matches!(k.add_user(&root, &ada), Err(Error::Engine { .. })));
        assert!(matches!(k.add_user(&ada, &ada), Err(Error::Unauthorized(_))));
        assert_eq!(k.list_users(&ada).unwrap(), vec!["root", "ada"]);

        let ada2 = Credentials::encrypt(m, "ada", None, 1852).unwrap();
        k.change_password(&ada, &ada2).unwrap();
        k.clear_cache();
        assert!(!k.validate(Some(&ada)).unwrap());
        assert!(k.validate(Some(&ada2)).unwrap());

        let other = Credentials::encrypt(m, "root", None, 9999).unwrap();
        assert!(matches!(k.change_password(&ada2, &other), Err(Error::Argument(_))));

        let ada3 = Credentials::encrypt(m, "ada", None, 2000).unwrap();
        k.change_password_for_user(&root, &ada3).unwrap();
        assert!(k.validate(Some(&ada3)).unwrap());

        let ghost = Credentials::encrypt(m, "ghost", None, 2000).unwrap();
        assert!(matches!(
            k.change_password_for_user(&root, &ghost),
            Err(Error::Argument(_))
        ));
        assert!(matches!(
            k.change_password_for_user(&ada3, &ghost),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_credentials_serde() {
        let c = Credentials::new("ada", None, "1f");
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, r#"{"username":"ada","password":"1f"}"#);
        let back: Credentials = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
