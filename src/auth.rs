use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Standard,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "standard" => Ok(Role::Standard),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Authenticated caller, as established by an [`Authenticator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub owner: String,
    pub role: Role,
}

impl Identity {
    pub fn new(owner: impl Into<String>, role: Role) -> Self {
        Self {
            owner: owner.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owners see their own jobs; admins see every job.
    pub fn can_access(&self, job_owner: &str) -> bool {
        self.owner == job_owner || self.is_admin()
    }
}

/// Turns request credentials into an identity.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Option<Identity>;
}

/// Fixed bearer-token table loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: HashMap<String, Identity>,
}

impl StaticTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }

    /// Parse `token:owner:role` entries.
    pub fn parse(entries: &[String]) -> Result<Self, String> {
        let mut tokens = Self::new();
        for entry in entries {
            let parts: Vec<&str> = entry.split(':').collect();
            let [token, owner, role] = parts.as_slice() else {
                return Err(format!(
                    "invalid token entry '{entry}', expected token:owner:role"
                ));
            };
            if token.is_empty() || owner.is_empty() {
                return Err(format!("invalid token entry '{entry}', empty field"));
            }
            tokens = tokens.with_token(*token, Identity::new(*owner, role.parse()?));
        }
        Ok(tokens)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for StaticTokens {
    fn authenticate(&self, token: &str) -> Option<Identity> {
        self.tokens.get(token).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_and_admin_access() {
        let alice = Identity::new("alice", Role::Standard);
        let root = Identity::new("root", Role::Admin);
        assert!(alice.can_access("alice"));
        assert!(!alice.can_access("bob"));
        assert!(root.can_access("bob"));
    }

    #[test]
    fn parse_token_entries() {
        let tokens = StaticTokens::parse(&[
            "t1:alice:standard".to_string(),
            "t2:root:admin".to_string(),
        ])
        .unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(
            tokens.authenticate("t2"),
            Some(Identity::new("root", Role::Admin))
        );
        assert_eq!(tokens.authenticate("nope"), None);
    }

    #[test]
    fn parse_rejects_bad_entries() {
        assert!(StaticTokens::parse(&["t1:alice".to_string()]).is_err());
        assert!(StaticTokens::parse(&["t1:alice:superuser".to_string()]).is_err());
        assert!(StaticTokens::parse(&[":alice:admin".to_string()]).is_err());
    }
}
