use crate::error::{AppError, AppResult};
use actix_identity::{Identity, IdentityExt};
use actix_web::{dev::Payload, FromRequest, HttpMessage, HttpRequest};
use std::future::{ready, Ready};

/// The logged-in user's id, taken from the session identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub u64);

impl AuthUser {
    pub fn id(self) -> u64 {
        self.0
    }
}

fn identify(req: &HttpRequest) -> AppResult<AuthUser> {
    let identity = req
        .get_identity()
        .map_err(|_| AppError::Authentication("not logged in".to_owned()))?;
    let id = identity
        .id()
        .map_err(|_| AppError::Authentication("session expired".to_owned()))?;
    id.parse()
        .map(AuthUser)
        .map_err(|_| AppError::Authentication("malformed session".to_owned()))
}

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(identify(req))
    }
}

pub fn login(req: &HttpRequest, user_id: u64) -> AppResult<()> {
    Identity::login(&req.extensions(), user_id.to_string())
        .map_err(|err| AppError::Internal(anyhow::anyhow!("could not start session: {}", err)))?;
    Ok(())
}

pub fn hash_password(password: &str, cost: u32) -> AppResult<String> {
    Ok(bcrypt::hash(password, cost)?)
}

pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    Ok(bcrypt::verify(password, hash)?)
}
