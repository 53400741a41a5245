use super::users::profile_view;
use super::{clean_text, find_film, nullable, Db, Settings};
use crate::auth::{self, AuthUser};
use crate::database::{DbError, DbResult, UserDb};
use crate::error::{AppError, AppResult};
use crate::model::{User, FAVORITE_SLOTS};
use actix_identity::Identity;
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use std::ops::RangeInclusive;

const USERNAME_LEN: RangeInclusive<usize> = 3..=30;
const MIN_PASSWORD_LEN: usize = 8;
const MAX_NAME_LEN: usize = 50;
const MAX_BIO_LEN: usize = 500;
const MAX_FIELD_LEN: usize = 200;

fn validate_username(username: &str) -> AppResult<()> {
    if !USERNAME_LEN.contains(&username.chars().count()) {
        return Err(AppError::Validation(format!(
            "username must be {} to {} characters",
            USERNAME_LEN.start(),
            USERNAME_LEN.end()
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(AppError::Validation(
            "username may only contain letters, digits and underscores".to_owned(),
        ));
    }
    Ok(())
}

fn stale_session() -> AppError {
    AppError::Authentication("user no longer exists".to_owned())
}

/// Loads the viewer's own document. A session pointing at a missing user is stale.
fn current_user(db: &sled::Db, viewer: AuthUser) -> AppResult<User> {
    db.get_user(viewer.id())?.ok_or_else(stale_session)
}

/// Edits the viewer's own document in one transaction.
fn edit_current_user<F>(db: &sled::Db, viewer: AuthUser, edit: F) -> AppResult<User>
where
    F: Fn(&mut User) -> DbResult<()>,
{
    db.modify_user(viewer.id(), edit).map_err(|err| match err {
        DbError::NotFound(_) => stale_session(),
        other => other.into(),
    })
}

#[derive(Deserialize)]
pub struct RegisterParams {
    username: String,
    password: String,
    display_name: Option<String>,
}

pub async fn register(
    req: HttpRequest,
    params: web::Json<RegisterParams>,
    db: Db,
    settings: Settings,
) -> AppResult<HttpResponse> {
    let params = params.into_inner();
    validate_username(&params.username)?;
    if params.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    let password_hash = auth::hash_password(&params.password, settings.bcrypt_cost)?;
    let mut user = User::new(params.username, password_hash);
    user.display_name = clean_text("display_name", params.display_name, MAX_NAME_LEN)?;
    let id = db
        .add_user(&user)?
        .ok_or_else(|| AppError::Conflict(format!("username {} is taken", user.username)))?;
    auth::login(&req, id)?;
    log::debug!("registered user {} as {}", id, user.username);
    Ok(HttpResponse::Created().json(profile_view(&db, id, &user)?))
}

#[derive(Deserialize)]
pub struct LoginParams {
    username: String,
    password: String,
}

fn bad_credentials() -> AppError {
    AppError::Authentication("wrong username or password".to_owned())
}

pub async fn login(
    req: HttpRequest,
    params: web::Json<LoginParams>,
    db: Db,
) -> AppResult<HttpResponse> {
    let (id, user) = db
        .get_user_by_username(&params.username)?
        .ok_or_else(bad_credentials)?;
    if !auth::verify_password(&params.password, &user.password_hash)? {
        return Err(bad_credentials());
    }
    auth::login(&req, id)?;
    log::debug!("user {} logged in", id);
    Ok(HttpResponse::Ok().json(profile_view(&db, id, &user)?))
}

pub async fn logout(identity: Identity) -> HttpResponse {
    identity.logout();
    HttpResponse::NoContent().finish()
}

pub async fn me(viewer: AuthUser, db: Db) -> AppResult<HttpResponse> {
    let user = current_user(&db, viewer)?;
    Ok(HttpResponse::Ok().json(profile_view(&db, viewer.id(), &user)?))
}

/// Absent fields are left alone; `null` or a blank string clears one.
#[derive(Deserialize)]
pub struct ProfileParams {
    #[serde(default, deserialize_with = "nullable")]
    display_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    bio: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    location: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    website: Option<Option<String>>,
}

pub async fn update_profile(
    viewer: AuthUser,
    params: web::Json<ProfileParams>,
    db: Db,
) -> AppResult<HttpResponse> {
    let params = params.into_inner();
    let display_name = params
        .display_name
        .map(|value| clean_text("display_name", value, MAX_NAME_LEN))
        .transpose()?;
    let bio = params
        .bio
        .map(|value| clean_text("bio", value, MAX_BIO_LEN))
        .transpose()?;
    let location = params
        .location
        .map(|value| clean_text("location", value, MAX_FIELD_LEN))
        .transpose()?;
    let website = params
        .website
        .map(|value| clean_text("website", value, MAX_FIELD_LEN))
        .transpose()?;
    let user = edit_current_user(&db, viewer, |user| {
        if let Some(value) = &display_name {
            user.display_name = value.clone();
        }
        if let Some(value) = &bio {
            user.bio = value.clone();
        }
        if let Some(value) = &location {
            user.location = value.clone();
        }
        if let Some(value) = &website {
            user.website = value.clone();
        }
        Ok(())
    })?;
    Ok(HttpResponse::Ok().json(profile_view(&db, viewer.id(), &user)?))
}

#[derive(Deserialize)]
pub struct FavoriteParams {
    film_id: Option<u64>,
}

pub async fn set_favorite(
    viewer: AuthUser,
    path: web::Path<usize>,
    params: web::Json<FavoriteParams>,
    db: Db,
) -> AppResult<HttpResponse> {
    let slot = path.into_inner();
    if slot >= FAVORITE_SLOTS {
        return Err(AppError::Validation(format!(
            "favorite slot must be below {}",
            FAVORITE_SLOTS
        )));
    }
    let film = params.film_id;
    if let Some(film_id) = film {
        find_film(&db, film_id)?;
    }
    let user = edit_current_user(&db, viewer, |user| {
        if let Some(film_id) = film {
            let elsewhere = user
                .favorite_films
                .iter()
                .enumerate()
                .any(|(other, favorite)| other != slot && *favorite == Some(film_id));
            if elsewhere {
                return Err(DbError::Conflict(format!(
                    "film {} is already a favorite",
                    film_id
                )));
            }
        }
        user.favorite_films[slot] = film;
        Ok(())
    })?;
    Ok(HttpResponse::Ok().json(profile_view(&db, viewer.id(), &user)?))
}
