//! Caller identity.
//!
//! Authentication happens upstream; by the time a request reaches this
//! service the gateway has put the caller in `X-User-Id` and `X-User-Role`.
//!
//! ```rust,ignore
//! async fn cancel(caller: Caller, ...) -> Result<Json<...>, MarketError> { ... }
//! async fn capture(admin: RequireAdmin, ...) -> Result<Json<...>, MarketError> { ... }
//! ```

use crate::error::MarketError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use boxoffice_core::types::UserId;
use uuid::Uuid;

/// Header carrying the caller's user id
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the caller's role
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// What the caller is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Regular user (buyer, seller or organizer of their own events)
    User,
    /// Platform administrator
    Admin,
}

impl Role {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "user" | "buyer" | "organizer" => Some(Self::User),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    /// User id
    pub user_id: UserId,
    /// Role
    pub role: Role,
}

impl Caller {
    /// A regular user
    #[must_use]
    pub const fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::User,
        }
    }

    /// An administrator
    #[must_use]
    pub const fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    /// Whether the caller is an administrator
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = MarketError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| MarketError::unauthorized("Missing X-User-Id header"))?;
        let user_id = Uuid::parse_str(user_id.trim())
            .map_err(|_| MarketError::unauthorized("X-User-Id is not a UUID"))?;

        let role = match parts.headers.get(USER_ROLE_HEADER) {
            None => Role::User,
            Some(value) => value
                .to_str()
                .ok()
                .and_then(Role::parse)
                .ok_or_else(|| MarketError::unauthorized("Unknown X-User-Role"))?,
        };

        Ok(Self {
            user_id: UserId::from_uuid(user_id),
            role,
        })
    }
}

/// A caller that must be an administrator.
#[derive(Debug, Clone, Copy)]
pub struct RequireAdmin(pub Caller);

#[async_trait]
impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
{
    type Rejection = MarketError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let caller = Caller::from_request_parts(parts, state).await?;
        if !caller.is_admin() {
            return Err(MarketError::forbidden("Administrator role required"));
        }
        Ok(Self(caller))
    }
}
