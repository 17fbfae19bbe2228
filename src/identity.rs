//! Identity Provider: who the local operator is.

use thiserror::Error;

use crate::git::Signature;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("git config `{0}` is not set")]
    NotConfigured(&'static str),

    #[error("failed to read git config: {0}")]
    Config(#[from] git2::Error),
}

pub trait IdentityProvider: Send + Sync {
    fn user_name(&self) -> Result<String, IdentityError>;
    fn user_email(&self) -> Result<String, IdentityError>;

    fn signature(&self) -> Result<Signature, IdentityError> {
        Ok(Signature {
            name: self.user_name()?,
            email: self.user_email()?,
        })
    }
}

/// Reads `user.name` and `user.email` from the operator's git configuration
/// (global, XDG and system files, as git itself does).
#[derive(Debug, Default, Clone, Copy)]
pub struct GitConfigIdentity;

impl GitConfigIdentity {
    fn get(&self, key: &'static str) -> Result<String, IdentityError> {
        let cfg = git2::Config::open_default()?;
        match cfg.get_string(key) {
            Ok(v) if !v.trim().is_empty() => Ok(v),
            Ok(_) => Err(IdentityError::NotConfigured(key)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => {
                Err(IdentityError::NotConfigured(key))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl IdentityProvider for GitConfigIdentity {
    fn user_name(&self) -> Result<String, IdentityError> {
        self.get("user.name")
    }

    fn user_email(&self) -> Result<String, IdentityError> {
        self.get("user.email")
    }
}

/// Fixed identity, for tests and for callers that already know the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIdentity {
    pub name: String,
    pub email: String,
}

impl StaticIdentity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        StaticIdentity {
            name: name.into(),
            email: email.into(),
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn user_name(&self) -> Result<String, IdentityError> {
        Ok(self.name.clone())
    }

    fn user_email(&self) -> Result<String, IdentityError> {
        Ok(self.email.clone())
    }
}
