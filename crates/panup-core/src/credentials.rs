//! Bearer credentials and the failover pool.
//!
//! A credential is the cookie string a browser session sends to the drive
//! service. The pool holds every configured credential, exactly one of
//! which is current. Failed credentials stay failed for the life of the
//! process.

use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{PanupError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Position in the configured list.
    pub index: usize,
    pub token: String,
    pub cookies: BTreeMap<String, String>,
}

impl Credential {
    pub fn new(index: usize, token: &str) -> Self {
        Self {
            index,
            token: token.to_string(),
            cookies: parse_cookie(token),
        }
    }

    /// `Cookie` header value, keys in sorted order.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Parse `k=v; k2="v;2"` into a map. Semicolons inside double quotes do not
/// split; parts without `=` or with an empty key are dropped.
pub fn parse_cookie(raw: &str) -> BTreeMap<String, String> {
    let mut cookies = BTreeMap::new();
    for part in split_outside_quotes(raw) {
        let part = part.trim();
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        cookies.insert(key.to_string(), value.trim().to_string());
    }
    cookies
}

fn split_outside_quotes(raw: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in raw.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                parts.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < raw.len() {
        parts.push(&raw[start..]);
    }
    parts
}

#[derive(Debug)]
struct PoolState {
    current: usize,
    failed: Vec<bool>,
}

/// Ordered set of credentials with one current entry.
#[derive(Debug)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
    state: Mutex<PoolState>,
}

impl CredentialPool {
    /// Build a pool starting at a random credential.
    pub fn new(tokens: &[String]) -> Result<Self> {
        if tokens.is_empty() {
            return Err(PanupError::NoCredentials);
        }
        let start = rand::thread_rng().gen_range(0..tokens.len());
        Self::with_initial(tokens, start)
    }

    /// Build a pool starting at `initial` (taken modulo the pool size).
    pub fn with_initial(tokens: &[String], initial: usize) -> Result<Self> {
        if tokens.is_empty() {
            return Err(PanupError::NoCredentials);
        }
        let credentials: Vec<Credential> = tokens
            .iter()
            .enumerate()
            .map(|(i, t)| Credential::new(i, t))
            .collect();
        let failed = vec![false; credentials.len()];
        Ok(Self {
            state: Mutex::new(PoolState {
                current: initial % credentials.len(),
                failed,
            }),
            credentials,
        })
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        // A poisoned pool still holds a consistent index and flag vector.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn current(&self) -> Credential {
        let state = self.lock();
        self.credentials[state.current].clone()
    }

    /// Number of credentials not yet marked failed.
    pub fn available(&self) -> usize {
        self.lock().failed.iter().filter(|f| !**f).count()
    }

    /// Mark the current credential failed and advance to the next unfailed one
    /// in ring order.
    pub fn failover(&self) -> Result<Credential> {
        let mut state = self.lock();
        let failed_index = state.current;
        state.failed[failed_index] = true;

        let n = self.credentials.len();
        let next = (1..=n)
            .map(|step| (failed_index + step) % n)
            .find(|i| !state.failed[*i]);
        match next {
            Some(i) => {
                state.current = i;
                tracing::warn!(from = failed_index, to = i, "switched access token");
                Ok(self.credentials[i].clone())
            }
            None => {
                tracing::error!(count = n, "all access tokens have failed");
                Err(PanupError::AllCredentialsExhausted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("__puus=t{i}; __pus=p{i}")).collect()
    }

    #[test]
    fn parse_cookie_basic() {
        let c = parse_cookie(" b = 2 ;a=1;; novalue; =x; quoted=\"x;y\" ");
        assert_eq!(c.len(), 3);
        assert_eq!(c["a"], "1");
        assert_eq!(c["b"], "2");
        assert_eq!(c["quoted"], "\"x;y\"");
    }

    #[test]
    fn cookie_header_is_sorted() {
        let cred = Credential::new(0, "z=26; a=1");
        assert_eq!(cred.cookie_header(), "a=1; z=26");
    }

    #[test]
    fn empty_pool_is_rejected() {
        assert!(matches!(
            CredentialPool::new(&[]),
            Err(PanupError::NoCredentials)
        ));
    }

    #[test]
    fn random_start_is_in_range() {
        for _ in 0..20 {
            let pool = CredentialPool::new(&tokens(3)).unwrap();
            assert!(pool.current().index < 3);
        }
    }

    #[test]
    fn failover_follows_ring_order() {
        let pool = CredentialPool::with_initial(&tokens(3), 1).unwrap();
        assert_eq!(pool.current().index, 1);
        assert_eq!(pool.failover().unwrap().index, 2);
        assert_eq!(pool.current().index, 2);
        assert_eq!(pool.failover().unwrap().index, 0);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn failover_exhausts() {
        let pool = CredentialPool::with_initial(&tokens(2), 0).unwrap();
        pool.failover().unwrap();
        assert!(matches!(
            pool.failover(),
            Err(PanupError::AllCredentialsExhausted)
        ));
        // failed credentials are never handed out again
        assert!(pool.failover().is_err());
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn single_credential_exhausts_immediately() {
        let pool = CredentialPool::with_initial(&tokens(1), 5).unwrap();
        assert_eq!(pool.current().index, 0);
        assert!(pool.failover().is_err());
    }
}
