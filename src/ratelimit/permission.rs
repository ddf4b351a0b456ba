//! Permission tags and the named tiers they map onto.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A permission a caller may hold.
///
/// Session (JWT) callers always hold [`Permission::Wildcard`]. API-key
/// callers carry whatever list was stored with the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "*")]
    Wildcard,
    #[serde(rename = "files:read")]
    FilesRead,
    #[serde(rename = "files:write")]
    FilesWrite,
    #[serde(rename = "files:delete")]
    FilesDelete,
    #[serde(rename = "buckets:read")]
    BucketsRead,
    #[serde(rename = "buckets:write")]
    BucketsWrite,
    #[serde(rename = "buckets:delete")]
    BucketsDelete,
    #[serde(rename = "projects:read")]
    ProjectsRead,
    #[serde(rename = "projects:write")]
    ProjectsWrite,
    #[serde(rename = "transforms:create")]
    TransformsCreate,
    #[serde(rename = "webhooks:manage")]
    WebhooksManage,
    #[serde(rename = "tokens:manage")]
    TokensManage,
    #[serde(rename = "audit:read")]
    AuditRead,
    #[serde(rename = "admin")]
    Admin,
}

impl Permission {
    /// All known permissions.
    pub const ALL: [Permission; 14] = [
        Permission::Wildcard,
        Permission::FilesRead,
        Permission::FilesWrite,
        Permission::FilesDelete,
        Permission::BucketsRead,
        Permission::BucketsWrite,
        Permission::BucketsDelete,
        Permission::ProjectsRead,
        Permission::ProjectsWrite,
        Permission::TransformsCreate,
        Permission::WebhooksManage,
        Permission::TokensManage,
        Permission::AuditRead,
        Permission::Admin,
    ];

    /// The tag as stored alongside API keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Wildcard => "*",
            Permission::FilesRead => "files:read",
            Permission::FilesWrite => "files:write",
            Permission::FilesDelete => "files:delete",
            Permission::BucketsRead => "buckets:read",
            Permission::BucketsWrite => "buckets:write",
            Permission::BucketsDelete => "buckets:delete",
            Permission::ProjectsRead => "projects:read",
            Permission::ProjectsWrite => "projects:write",
            Permission::TransformsCreate => "transforms:create",
            Permission::WebhooksManage => "webhooks:manage",
            Permission::TokensManage => "tokens:manage",
            Permission::AuditRead => "audit:read",
            Permission::Admin => "admin",
        }
    }

    /// Parse a list of stored tags, dropping any tag this build does not know.
    pub fn parse_tags<'a, I>(tags: I) -> Vec<Permission>
    where
        I: IntoIterator<Item = &'a str>,
    {
        tags.into_iter().filter_map(|tag| tag.parse().ok()).collect()
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a tag is not a known permission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPermission(pub String);

impl fmt::Display for UnknownPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown permission tag `{}`", self.0)
    }
}

impl std::error::Error for UnknownPermission {}

impl FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == tag)
            .ok_or_else(|| UnknownPermission(tag.to_string()))
    }
}

/// A named, reusable limit shared by several permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Read,
    Standard,
    Write,
    Expensive,
    Delete,
    Admin,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Read => "read",
            Tier::Standard => "standard",
            Tier::Write => "write",
            Tier::Expensive => "expensive",
            Tier::Delete => "delete",
            Tier::Admin => "admin",
        };
        f.write_str(name)
    }
}
