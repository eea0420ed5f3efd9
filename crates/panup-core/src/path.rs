//! Remote tree paths.
//!
//! A [`VirtualPath`] is always absolute and normalized: backslashes become
//! slashes, repeated separators collapse, `.` segments vanish and there is
//! no trailing slash except for the root `/`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier the remote service reserves for the root directory.
pub const ROOT_ID: &str = "0";

/// Normalized slash-delimited path of a remote tree node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct VirtualPath(String);

impl VirtualPath {
    pub fn new(raw: &str) -> Self {
        Self(normalize(raw))
    }

    pub fn root() -> Self {
        Self("/".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Parent directory, `None` for the root.
    pub fn parent(&self) -> Option<VirtualPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) | None => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
        }
    }

    /// Last component, `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rsplit('/').next()
    }

    /// Components from the root down, excluding the root itself.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    pub fn join(&self, name: &str) -> VirtualPath {
        if self.is_root() {
            Self::new(&format!("/{name}"))
        } else {
            Self::new(&format!("{}/{name}", self.0))
        }
    }

    /// The reserved root identifier if this path is the root.
    pub fn root_id(&self) -> Option<&'static str> {
        self.is_root().then_some(ROOT_ID)
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VirtualPath {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl From<VirtualPath> for String {
    fn from(p: VirtualPath) -> Self {
        p.0
    }
}

/// Normalize a raw path string into its canonical absolute form.
///
/// `""`, `"."` and `"/"` all normalize to `"/"`.
pub fn normalize(raw: &str) -> String {
    let replaced = raw.replace('\\', "/");
    let parts: Vec<&str> = replaced
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect();
    if parts.is_empty() {
        return "/".to_string();
    }
    format!("/{}", parts.join("/"))
}

/// Whether a raw destination names a directory rather than a file
/// (trailing separator, or nothing but the root).
pub fn names_directory(raw: &str) -> bool {
    raw.ends_with('/') || raw.ends_with('\\') || VirtualPath::new(raw).is_root()
}
