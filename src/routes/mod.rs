use crate::config::Config;
use crate::database::{FilmDb, UserDb};
use crate::error::{AppError, AppResult};
use crate::model::{Film, User};
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

#[cfg(test)]
#[macro_use]
mod testing;

mod accounts;
mod chat;
mod films;
mod lists;
mod notifications;
mod reviews;
mod users;

pub(crate) type Db = web::Data<sled::Db>;
pub(crate) type Settings = web::Data<Config>;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health)).service(
        web::scope("/api")
            .route("/register", web::post().to(accounts::register))
            .route("/login", web::post().to(accounts::login))
            .route("/logout", web::post().to(accounts::logout))
            .route("/me", web::get().to(accounts::me))
            .route("/me", web::patch().to(accounts::update_profile))
            .route("/me/favorites/{slot}", web::put().to(accounts::set_favorite))
            .route("/me/recommendations", web::get().to(users::recommendations))
            .route("/feed", web::get().to(users::feed))
            .route("/users/{username}", web::get().to(users::profile))
            .route("/users/{username}/films/{kind}", web::get().to(users::films))
            .route("/users/{username}/diary", web::get().to(users::diary))
            .route("/users/{username}/activity", web::get().to(users::activity))
            .route("/users/{username}/lists", web::get().to(lists::user_lists))
            .route("/users/{username}/follow", web::post().to(users::toggle_follow))
            .route("/users/{username}/followers", web::get().to(users::followers))
            .route("/users/{username}/following", web::get().to(users::following))
            .route("/films", web::post().to(films::upsert))
            .route("/films/search", web::get().to(films::search))
            .route("/films/{id}", web::get().to(films::get))
            .route("/films/{id}/reviews", web::get().to(films::reviews))
            .route("/films/{id}/toggle/{kind}", web::post().to(films::toggle))
            .route("/catalog/{catalog_id}", web::get().to(films::get_by_catalog_id))
            .route(
                "/catalog/{catalog_id}/toggle/{kind}",
                web::post().to(films::toggle_by_catalog_id),
            )
            .route("/reviews", web::post().to(reviews::create))
            .route("/reviews/{id}", web::get().to(reviews::get))
            .route("/reviews/{id}", web::patch().to(reviews::update))
            .route("/reviews/{id}", web::delete().to(reviews::delete))
            .route("/lists", web::post().to(lists::create))
            .route("/lists/{id}", web::get().to(lists::get))
            .route("/lists/{id}", web::patch().to(lists::update))
            .route("/lists/{id}", web::delete().to(lists::delete))
            .route("/lists/{id}/films", web::post().to(lists::add_film))
            .route("/lists/{id}/films", web::put().to(lists::reorder))
            .route("/lists/{id}/films/{film_id}", web::delete().to(lists::remove_film))
            .route("/conversations", web::post().to(chat::start))
            .route("/conversations", web::get().to(chat::list))
            .route("/conversations/{id}/messages", web::get().to(chat::messages))
            .route("/conversations/{id}/messages", web::post().to(chat::send))
            .route("/conversations/{id}/read", web::post().to(chat::mark_read))
            .route("/notifications", web::get().to(notifications::list))
            .route("/notifications/read", web::post().to(notifications::mark_read)),
    );
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[derive(Serialize, Debug, Clone)]
pub struct FilmSummary {
    pub id: u64,
    pub catalog_id: u64,
    pub title: String,
    pub year: Option<u16>,
    pub poster_path: Option<String>,
}

impl FilmSummary {
    pub fn new(id: u64, film: &Film) -> Self {
        FilmSummary {
            id,
            catalog_id: film.catalog_id,
            title: film.title.clone(),
            year: film.year,
            poster_path: film.poster_path.clone(),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct UserSummary {
    pub id: u64,
    pub username: String,
    pub display_name: Option<String>,
}

impl UserSummary {
    pub fn new(id: u64, user: &User) -> Self {
        UserSummary {
            id,
            username: user.username.clone(),
            display_name: user.display_name.clone(),
        }
    }
}

/// Memoizes document lookups while a response is assembled.
#[derive(Default)]
pub(crate) struct Lookup {
    films: HashMap<u64, FilmSummary>,
    users: HashMap<u64, UserSummary>,
}

impl Lookup {
    pub fn film(&mut self, db: &sled::Db, id: u64) -> AppResult<FilmSummary> {
        if let Some(film) = self.films.get(&id) {
            return Ok(film.clone());
        }
        let film = db
            .get_film(id)?
            .ok_or_else(|| AppError::NotFound(format!("film {} not found", id)))?;
        let summary = FilmSummary::new(id, &film);
        self.films.insert(id, summary.clone());
        Ok(summary)
    }

    pub fn user(&mut self, db: &sled::Db, id: u64) -> AppResult<UserSummary> {
        if let Some(user) = self.users.get(&id) {
            return Ok(user.clone());
        }
        let user = db
            .get_user(id)?
            .ok_or_else(|| AppError::NotFound(format!("user {} not found", id)))?;
        let summary = UserSummary::new(id, &user);
        self.users.insert(id, summary.clone());
        Ok(summary)
    }
}

pub(crate) fn find_user(db: &sled::Db, username: &str) -> AppResult<(u64, User)> {
    db.get_user_by_username(username)?
        .ok_or_else(|| AppError::NotFound(format!("user {} not found", username)))
}

pub(crate) fn find_film(db: &sled::Db, id: u64) -> AppResult<Film> {
    db.get_film(id)?
        .ok_or_else(|| AppError::NotFound(format!("film {} not found", id)))
}

#[derive(Deserialize, Debug, Default)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl PageQuery {
    pub fn limit(&self, default: usize, max: usize) -> usize {
        self.limit.unwrap_or(default).clamp(1, max)
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

/// Lets a PATCH body tell "absent" (`None`) from an explicit `null` (`Some(None)`).
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Trims `value`; blank becomes `None`. Rejects anything longer than `max` chars.
pub(crate) fn clean_text(
    field: &str,
    value: Option<String>,
    max: usize,
) -> AppResult<Option<String>> {
    let value = match value {
        Some(value) => value.trim().to_owned(),
        None => return Ok(None),
    };
    if value.is_empty() {
        return Ok(None);
    }
    if value.chars().count() > max {
        return Err(AppError::Validation(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_trims_and_limits() {
        assert_eq!(clean_text("bio", Some("  hi ".to_owned()), 10).unwrap(), Some("hi".to_owned()));
        assert_eq!(clean_text("bio", Some("   ".to_owned()), 10).unwrap(), None);
        assert_eq!(clean_text("bio", None, 10).unwrap(), None);
        assert!(clean_text("bio", Some("x".repeat(11)), 10).is_err());
    }

    #[test]
    fn page_limits_are_clamped() {
        let page = PageQuery {
            limit: Some(1000),
            offset: None,
        };
        assert_eq!(page.limit(30, 100), 100);
        assert_eq!(PageQuery::default().limit(30, 100), 30);
        let zero = PageQuery {
            limit: Some(0),
            offset: Some(5),
        };
        assert_eq!(zero.limit(30, 100), 1);
        assert_eq!(zero.offset(), 5);
    }

    #[actix_rt::test]
    async fn health_check() {
        let app = test_app!();
        let req = actix_web::test::TestRequest::get().uri("/health").to_request();
        let resp = actix_web::test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }
}
