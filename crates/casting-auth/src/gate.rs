//! Permission checks.

use std::fmt;

use crate::claims::Claims;
use crate::{Error, Result};

/// The permission an operation requires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RequiredPermission(Option<String>);

impl RequiredPermission {
    /// Any authenticated caller is allowed.
    pub fn none() -> Self {
        Self(None)
    }

    /// Require `permission`. An empty string means no requirement.
    pub fn new(permission: impl Into<String>) -> Self {
        let permission = permission.into();
        if permission.is_empty() {
            Self(None)
        } else {
            Self(Some(permission))
        }
    }

    /// The required permission, if any.
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl From<&str> for RequiredPermission {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RequiredPermission {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for RequiredPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str().unwrap_or("<none>"))
    }
}

/// Check that `claims` grants `required`. Exact string match only.
pub fn check(claims: &Claims, required: &RequiredPermission) -> Result<()> {
    match required.as_str() {
        None => Ok(()),
        Some(permission) if claims.has_permission(permission) => Ok(()),
        Some(permission) => Err(Error::InsufficientPermission(permission.to_string())),
    }
}
