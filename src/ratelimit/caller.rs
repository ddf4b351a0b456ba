//! Caller key derivation.

use std::fmt;

use super::permission::Permission;

/// What kind of subject a caller key identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallerScope {
    /// An authenticated session
    User,
    /// An API key
    ApiKey,
    /// An anonymous client address
    Ip,
}

impl CallerScope {
    fn tag(&self) -> &'static str {
        match self {
            CallerScope::User => "user",
            CallerScope::ApiKey => "apikey",
            CallerScope::Ip => "ip",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "user" => Some(CallerScope::User),
            "apikey" => Some(CallerScope::ApiKey),
            "ip" => Some(CallerScope::Ip),
            _ => None,
        }
    }
}

/// A key that uniquely identifies a rate limit subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerKey {
    /// The subject kind
    pub scope: CallerScope,
    /// User id, API key id or client address
    pub id: String,
}

impl CallerKey {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            scope: CallerScope::User,
            id: id.into(),
        }
    }

    pub fn api_key(id: impl Into<String>) -> Self {
        Self {
            scope: CallerScope::ApiKey,
            id: id.into(),
        }
    }

    pub fn ip(address: impl Into<String>) -> Self {
        Self {
            scope: CallerScope::Ip,
            id: address.into(),
        }
    }

    /// Pick the key by precedence: user, then API key, then address.
    ///
    /// Blank identifiers are treated as absent.
    pub fn derive(user_id: Option<&str>, api_key_id: Option<&str>, address: &str) -> Self {
        fn present(id: Option<&str>) -> Option<&str> {
            id.map(str::trim).filter(|id| !id.is_empty())
        }

        if let Some(id) = present(user_id) {
            Self::user(id)
        } else if let Some(id) = present(api_key_id) {
            Self::api_key(id)
        } else {
            Self::ip(address.trim())
        }
    }

    /// Parse a store key of the form `scope:id` or `prefix:scope:id`.
    pub fn from_store_key(key: &str) -> Option<Self> {
        let split = |key: &str| -> Option<Self> {
            let (tag, id) = key.split_once(':')?;
            let scope = CallerScope::from_tag(tag)?;
            (!id.is_empty()).then(|| Self {
                scope,
                id: id.to_string(),
            })
        };

        split(key).or_else(|| key.split_once(':').and_then(|(_, rest)| split(rest)))
    }

    /// Store key, namespaced under `prefix` when one is given.
    pub fn to_store_key(&self, prefix: Option<&str>) -> String {
        match prefix {
            Some(prefix) => format!("{}:{}:{}", prefix, self.scope.tag(), self.id),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for CallerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope.tag(), self.id)
    }
}

/// Everything the limiter needs to know about who is calling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub key: CallerKey,
    pub permissions: Vec<Permission>,
    pub authenticated: bool,
}

impl Caller {
    /// A session caller; sessions hold every permission.
    pub fn session(user_id: impl Into<String>) -> Self {
        Self {
            key: CallerKey::user(user_id),
            permissions: vec![Permission::Wildcard],
            authenticated: true,
        }
    }

    /// An API-key caller with its stored permissions.
    pub fn api_key(key_id: impl Into<String>, permissions: Vec<Permission>) -> Self {
        Self {
            key: CallerKey::api_key(key_id),
            permissions,
            authenticated: true,
        }
    }

    /// The caller a store key was counted for.
    ///
    /// Sessions always hold the wildcard permission, so `permissions` only
    /// applies to API keys.
    pub fn from_key(key: CallerKey, permissions: Vec<Permission>) -> Self {
        match key.scope {
            CallerScope::User => Self::session(key.id),
            CallerScope::ApiKey => Self::api_key(key.id, permissions),
            CallerScope::Ip => Self::anonymous(key.id),
        }
    }

    /// An unauthenticated caller identified by address.
    pub fn anonymous(address: impl Into<String>) -> Self {
        Self {
            key: CallerKey::ip(address),
            permissions: Vec::new(),
            authenticated: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_precedence() {
        assert_eq!(
            CallerKey::derive(Some("u1"), Some("k1"), "10.0.0.1").to_string(),
            "user:u1"
        );
        assert_eq!(
            CallerKey::derive(None, Some("k1"), "10.0.0.1").to_string(),
            "apikey:k1"
        );
        assert_eq!(
            CallerKey::derive(None, None, "10.0.0.1").to_string(),
            "ip:10.0.0.1"
        );
    }

    #[test]
    fn test_blank_ids_are_ignored() {
        let key = CallerKey::derive(Some("  "), Some(""), "::1");
        assert_eq!(key, CallerKey::ip("::1"));
    }

    #[test]
    fn test_store_key_prefix() {
        let key = CallerKey::user("42");
        assert_eq!(key.to_store_key(None), "user:42");
        assert_eq!(key.to_store_key(Some("auth-login")), "auth-login:user:42");
    }

    #[test]
    fn test_session_holds_wildcard() {
        let caller = Caller::session("u1");
        assert!(caller.authenticated);
        assert_eq!(caller.permissions, vec![Permission::Wildcard]);
    }

    #[test]
    fn test_parse_store_key() {
        assert_eq!(CallerKey::from_store_key("user:42"), Some(CallerKey::user("42")));
        assert_eq!(
            CallerKey::from_store_key("auth-login:ip:::1"),
            Some(CallerKey::ip("::1"))
        );
        assert_eq!(
            CallerKey::from_store_key("upload:apikey:k1"),
            Some(CallerKey::api_key("k1"))
        );
        assert_eq!(CallerKey::from_store_key("session:42"), None);
        assert_eq!(CallerKey::from_store_key("user:"), None);
    }

    #[test]
    fn test_caller_from_key_keeps_session_wildcard() {
        let caller = Caller::from_key(CallerKey::user("u1"), vec![Permission::FilesRead]);
        assert_eq!(caller, Caller::session("u1"));

        let caller = Caller::from_key(CallerKey::api_key("k1"), vec![Permission::FilesRead]);
        assert_eq!(caller.permissions, vec![Permission::FilesRead]);

        assert!(!Caller::from_key(CallerKey::ip("10.0.0.1"), Vec::new()).authenticated);
    }
}
