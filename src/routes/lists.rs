use super::{clean_text, find_film, find_user, nullable, Db, FilmSummary, Lookup, UserSummary};
use crate::auth::AuthUser;
use crate::database::{DbError, ListDb};
use crate::error::{AppError, AppResult};
use crate::model::FilmList;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const MAX_TITLE_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 2_000;

#[derive(Serialize, Debug)]
pub struct ListView {
    pub id: u64,
    pub owner: UserSummary,
    pub title: String,
    pub description: Option<String>,
    pub ranked: bool,
    pub films: Vec<FilmSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ListView {
    fn new(lookup: &mut Lookup, db: &sled::Db, id: u64, list: FilmList) -> AppResult<Self> {
        let films = list
            .film_ids
            .iter()
            .map(|film_id| lookup.film(db, *film_id))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(ListView {
            id,
            owner: lookup.user(db, list.owner_id)?,
            title: list.title,
            description: list.description,
            ranked: list.ranked,
            films,
            created_at: list.created_at,
            updated_at: list.updated_at,
        })
    }
}

fn list_title(title: String) -> AppResult<String> {
    clean_text("title", Some(title), MAX_TITLE_LEN)?
        .ok_or_else(|| AppError::Validation("title must not be blank".to_owned()))
}

/// Every film must exist and appear once.
fn validate_films(db: &sled::Db, film_ids: &[u64]) -> AppResult<()> {
    let mut seen = HashSet::with_capacity(film_ids.len());
    for film_id in film_ids {
        if !seen.insert(*film_id) {
            return Err(AppError::Validation(format!(
                "film {} appears more than once",
                film_id
            )));
        }
        find_film(db, *film_id)?;
    }
    Ok(())
}

/// Checks the list exists and belongs to the viewer.
fn check_owner(db: &sled::Db, viewer: AuthUser, id: u64) -> AppResult<()> {
    let list = db
        .get_list(id)?
        .ok_or_else(|| AppError::NotFound(format!("list {} not found", id)))?;
    if list.owner_id != viewer.id() {
        return Err(AppError::Authorization(
            "only the owner can change a list".to_owned(),
        ));
    }
    Ok(())
}

fn respond(db: &sled::Db, id: u64, list: FilmList) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(ListView::new(&mut Lookup::default(), db, id, list)?))
}

#[derive(Deserialize)]
pub struct NewList {
    title: String,
    description: Option<String>,
    #[serde(default)]
    ranked: bool,
    #[serde(default)]
    film_ids: Vec<u64>,
}

pub async fn create(
    viewer: AuthUser,
    params: web::Json<NewList>,
    db: Db,
) -> AppResult<HttpResponse> {
    let params = params.into_inner();
    let title = list_title(params.title)?;
    let description = clean_text("description", params.description, MAX_DESCRIPTION_LEN)?;
    validate_films(&db, &params.film_ids)?;
    let now = Utc::now();
    let list = FilmList {
        owner_id: viewer.id(),
        title,
        description,
        ranked: params.ranked,
        film_ids: params.film_ids,
        created_at: now,
        updated_at: now,
    };
    let id = db.add_list(&list)?;
    log::debug!("user {} created list {}", viewer.id(), id);
    Ok(HttpResponse::Created().json(ListView::new(&mut Lookup::default(), &db, id, list)?))
}

pub async fn get(path: web::Path<u64>, db: Db) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let list = db
        .get_list(id)?
        .ok_or_else(|| AppError::NotFound(format!("list {} not found", id)))?;
    respond(&db, id, list)
}

pub async fn user_lists(path: web::Path<String>, db: Db) -> AppResult<HttpResponse> {
    let (owner_id, _) = find_user(&db, &path)?;
    let mut lookup = Lookup::default();
    let lists = db
        .user_lists(owner_id)?
        .into_iter()
        .map(|(id, list)| ListView::new(&mut lookup, &db, id, list))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(HttpResponse::Ok().json(lists))
}

#[derive(Deserialize)]
pub struct ListUpdate {
    title: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    description: Option<Option<String>>,
    ranked: Option<bool>,
}

pub async fn update(
    viewer: AuthUser,
    path: web::Path<u64>,
    params: web::Json<ListUpdate>,
    db: Db,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let params = params.into_inner();
    check_owner(&db, viewer, id)?;
    let title = params.title.map(list_title).transpose()?;
    let description = match params.description {
        Some(description) => Some(clean_text("description", description, MAX_DESCRIPTION_LEN)?),
        None => None,
    };
    let list = db.modify_list(id, |list| {
        if let Some(title) = &title {
            list.title = title.clone();
        }
        if let Some(description) = &description {
            list.description = description.clone();
        }
        if let Some(ranked) = params.ranked {
            list.ranked = ranked;
        }
        Ok(())
    })?;
    respond(&db, id, list)
}

pub async fn delete(viewer: AuthUser, path: web::Path<u64>, db: Db) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    check_owner(&db, viewer, id)?;
    db.delete_list(id)?;
    log::debug!("user {} deleted list {}", viewer.id(), id);
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Deserialize)]
pub struct AddFilm {
    film_id: u64,
    position: Option<usize>,
}

pub async fn add_film(
    viewer: AuthUser,
    path: web::Path<u64>,
    params: web::Json<AddFilm>,
    db: Db,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    check_owner(&db, viewer, id)?;
    let film_id = params.film_id;
    find_film(&db, film_id)?;
    let list = db.modify_list(id, |list| {
        if list.film_ids.contains(&film_id) {
            return Err(DbError::Conflict(format!(
                "film {} is already in list {}",
                film_id, id
            )));
        }
        let position = params
            .position
            .unwrap_or(list.film_ids.len())
            .min(list.film_ids.len());
        list.film_ids.insert(position, film_id);
        Ok(())
    })?;
    respond(&db, id, list)
}

pub async fn remove_film(
    viewer: AuthUser,
    path: web::Path<(u64, u64)>,
    db: Db,
) -> AppResult<HttpResponse> {
    let (id, film_id) = path.into_inner();
    check_owner(&db, viewer, id)?;
    let list = db.modify_list(id, |list| {
        let position = list
            .film_ids
            .iter()
            .position(|candidate| *candidate == film_id)
            .ok_or_else(|| {
                DbError::NotFound(format!("film {} is not in list {}", film_id, id))
            })?;
        list.film_ids.remove(position);
        Ok(())
    })?;
    respond(&db, id, list)
}

#[derive(Deserialize)]
pub struct Reorder {
    film_ids: Vec<u64>,
}

pub async fn reorder(
    viewer: AuthUser,
    path: web::Path<u64>,
    params: web::Json<Reorder>,
    db: Db,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    check_owner(&db, viewer, id)?;
    validate_films(&db, &params.film_ids)?;
    let list = db.modify_list(id, |list| {
        list.film_ids = params.film_ids.clone();
        Ok(())
    })?;
    respond(&db, id, list)
}
