use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

use crate::engine::EngineError;
use crate::limits::MAX_USER_ID_LEN;
use crate::model::UserId;

/// Shared-secret password check for the wire protocol. The login user name is
/// the identity the upstream identity provider vouched for.
#[derive(Debug)]
pub struct StaybookAuthSource {
    password: String,
}

impl StaybookAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for StaybookAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

/// Request-scoped caller identity, passed explicitly into every core operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    user: Option<UserId>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self { user: None }
    }

    pub fn authenticated(user: UserId) -> Self {
        Self { user: Some(user) }
    }

    /// Build a session from a connection's login name. Missing, blank or
    /// oversized names are treated as unauthenticated.
    pub fn from_login(name: Option<&str>) -> Self {
        let user = name
            .filter(|n| n.len() <= MAX_USER_ID_LEN)
            .and_then(UserId::new);
        Self { user }
    }

    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    pub fn require_user(&self) -> Result<&UserId, EngineError> {
        self.user.as_ref().ok_or(EngineError::Unauthorized)
    }
}
