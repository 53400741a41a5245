use super::reviews::ReviewView;
use super::{clean_text, find_film, Db, FilmSummary, Lookup};
use crate::auth::AuthUser;
use crate::database::{FilmDb, InteractionDb, ReviewDb};
use crate::error::{AppError, AppResult};
use crate::model::{Film, InteractionKind};
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MAX_TITLE_LEN: usize = 300;
const MAX_OVERVIEW_LEN: usize = 5_000;
const DEFAULT_SEARCH_LIMIT: usize = 20;
const MAX_SEARCH_LIMIT: usize = 100;

/// Catalog metadata a client supplies when mirroring a film.
#[derive(Deserialize, Debug)]
pub struct FilmMetadata {
    title: String,
    year: Option<u16>,
    overview: Option<String>,
    poster_path: Option<String>,
    runtime_minutes: Option<u16>,
    #[serde(default)]
    genres: Vec<String>,
}

impl FilmMetadata {
    fn into_film(self, catalog_id: u64) -> AppResult<Film> {
        let title = clean_text("title", Some(self.title), MAX_TITLE_LEN)?
            .ok_or_else(|| AppError::Validation("title must not be blank".to_owned()))?;
        let genres = self
            .genres
            .into_iter()
            .map(|genre| genre.trim().to_owned())
            .filter(|genre| !genre.is_empty())
            .collect();
        let now = Utc::now();
        Ok(Film {
            catalog_id,
            title,
            year: self.year,
            overview: clean_text("overview", self.overview, MAX_OVERVIEW_LEN)?,
            poster_path: clean_text("poster_path", self.poster_path, MAX_TITLE_LEN)?,
            runtime_minutes: self.runtime_minutes,
            genres,
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Serialize, Debug)]
pub struct FilmStats {
    pub watched: usize,
    pub liked: usize,
    pub watchlisted: usize,
    pub reviews: usize,
    pub average_rating: Option<f32>,
}

/// The viewer's own ledger state for a film.
#[derive(Serialize, Debug)]
pub struct ViewerState {
    pub watched: bool,
    pub liked: bool,
    pub watchlist: bool,
    pub rewatch: bool,
}

#[derive(Serialize, Debug)]
pub struct FilmView {
    pub id: u64,
    pub catalog_id: u64,
    pub title: String,
    pub year: Option<u16>,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub runtime_minutes: Option<u16>,
    pub genres: Vec<String>,
    pub stats: FilmStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer: Option<ViewerState>,
}

fn film_view(db: &sled::Db, id: u64, film: Film, viewer: Option<AuthUser>) -> AppResult<FilmView> {
    let reviews = db.film_reviews(id)?;
    let ratings: Vec<u32> = reviews
        .iter()
        .filter_map(|(_, review)| review.rating.map(u32::from))
        .collect();
    let average_rating = if ratings.is_empty() {
        None
    } else {
        Some(ratings.iter().sum::<u32>() as f32 / ratings.len() as f32)
    };
    let stats = FilmStats {
        watched: db.count_film_interactions(id, InteractionKind::Watched)?,
        liked: db.count_film_interactions(id, InteractionKind::Liked)?,
        watchlisted: db.count_film_interactions(id, InteractionKind::Watchlist)?,
        reviews: reviews.len(),
        average_rating,
    };
    let viewer = match viewer {
        Some(viewer) => {
            let watched = db.get_interaction(viewer.id(), id, InteractionKind::Watched)?;
            Some(ViewerState {
                watched: watched.is_some(),
                liked: db
                    .get_interaction(viewer.id(), id, InteractionKind::Liked)?
                    .is_some(),
                watchlist: db
                    .get_interaction(viewer.id(), id, InteractionKind::Watchlist)?
                    .is_some(),
                rewatch: watched.map_or(false, |entry| entry.rewatch),
            })
        }
        None => None,
    };
    Ok(FilmView {
        id,
        catalog_id: film.catalog_id,
        title: film.title,
        year: film.year,
        overview: film.overview,
        poster_path: film.poster_path,
        runtime_minutes: film.runtime_minutes,
        genres: film.genres,
        stats,
        viewer,
    })
}

#[derive(Deserialize, Debug)]
pub struct FilmParams {
    catalog_id: u64,
    #[serde(flatten)]
    metadata: FilmMetadata,
}

pub async fn upsert(
    viewer: AuthUser,
    params: web::Json<FilmParams>,
    db: Db,
) -> AppResult<HttpResponse> {
    let params = params.into_inner();
    let film = params.metadata.into_film(params.catalog_id)?;
    let (id, previous) = db.upsert_film(&film)?;
    let stored = find_film(&db, id)?;
    let view = film_view(&db, id, stored, Some(viewer))?;
    if previous.is_some() {
        log::debug!("refreshed film {} from catalog {}", id, params.catalog_id);
        Ok(HttpResponse::Ok().json(view))
    } else {
        log::debug!("mirrored catalog film {} as {}", params.catalog_id, id);
        Ok(HttpResponse::Created().json(view))
    }
}

pub async fn get(
    path: web::Path<u64>,
    viewer: Option<AuthUser>,
    db: Db,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let film = find_film(&db, id)?;
    Ok(HttpResponse::Ok().json(film_view(&db, id, film, viewer)?))
}

pub async fn get_by_catalog_id(
    path: web::Path<u64>,
    viewer: Option<AuthUser>,
    db: Db,
) -> AppResult<HttpResponse> {
    let catalog_id = path.into_inner();
    let (id, film) = db
        .get_film_by_catalog_id(catalog_id)?
        .ok_or_else(|| AppError::NotFound(format!("catalog film {} not found", catalog_id)))?;
    Ok(HttpResponse::Ok().json(film_view(&db, id, film, viewer)?))
}

#[derive(Deserialize)]
pub struct SearchQuery {
    q: String,
    limit: Option<usize>,
}

pub async fn search(query: web::Query<SearchQuery>, db: Db) -> AppResult<HttpResponse> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT);
    let films: Vec<FilmSummary> = db
        .search_films(&query.q, limit)?
        .iter()
        .map(|(id, film)| FilmSummary::new(*id, film))
        .collect();
    Ok(HttpResponse::Ok().json(films))
}

pub async fn reviews(path: web::Path<u64>, db: Db) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    find_film(&db, id)?;
    let mut lookup = Lookup::default();
    let reviews = db
        .film_reviews(id)?
        .into_iter()
        .rev()
        .map(|(review_id, review)| ReviewView::new(&mut lookup, &db, review_id, review))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(HttpResponse::Ok().json(reviews))
}

#[derive(Serialize, Debug)]
struct ToggleView {
    film_id: u64,
    kind: InteractionKind,
    active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    at: Option<DateTime<Utc>>,
}

fn toggle_film(
    db: &sled::Db,
    viewer: AuthUser,
    film_id: u64,
    kind: InteractionKind,
) -> AppResult<ToggleView> {
    let entry = db.toggle_interaction(viewer.id(), film_id, kind)?;
    log::debug!(
        "user {} toggled {} on film {}: {}",
        viewer.id(),
        kind,
        film_id,
        entry.is_some()
    );
    Ok(ToggleView {
        film_id,
        kind,
        active: entry.is_some(),
        at: entry.map(|entry| entry.at),
    })
}

pub async fn toggle(
    viewer: AuthUser,
    path: web::Path<(u64, String)>,
    db: Db,
) -> AppResult<HttpResponse> {
    let (id, kind) = path.into_inner();
    let kind: InteractionKind = kind.parse().map_err(AppError::Validation)?;
    find_film(&db, id)?;
    Ok(HttpResponse::Ok().json(toggle_film(&db, viewer, id, kind)?))
}

/// Like `toggle`, but addressed by catalog id. A film not mirrored yet is
/// created from the request body first.
/// An empty body carries no metadata. Anything else must be valid metadata.
fn optional_metadata(body: &[u8]) -> AppResult<Option<FilmMetadata>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|err| AppError::Validation(format!("bad film metadata: {}", err)))
}

pub async fn toggle_by_catalog_id(
    viewer: AuthUser,
    path: web::Path<(u64, String)>,
    body: web::Bytes,
    db: Db,
) -> AppResult<HttpResponse> {
    let (catalog_id, kind) = path.into_inner();
    let kind: InteractionKind = kind.parse().map_err(AppError::Validation)?;
    let metadata = optional_metadata(&body)?;
    let id = match db.get_film_by_catalog_id(catalog_id)? {
        Some((id, _)) => id,
        None => {
            let metadata = metadata.ok_or_else(|| {
                AppError::NotFound(format!("catalog film {} not found", catalog_id))
            })?;
            let (id, _) = db.upsert_film(&metadata.into_film(catalog_id)?)?;
            log::debug!("mirrored catalog film {} as {} on first toggle", catalog_id, id);
            id
        }
    };
    Ok(HttpResponse::Ok().json(toggle_film(&db, viewer, id, kind)?))
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::test::TestRequest;
    use serde_json::json;

    #[actix_rt::test]
    async fn mirror_and_refresh() {
        let app = test_app!();
        let alice = register!(app, "alice");

        let resp = send!(
            app,
            TestRequest::post().uri("/api/films").set_json(json!({
                "catalog_id": 1396,
                "title": "Solaris",
                "year": 1972,
                "genres": ["Drama", " "],
            })),
            alice
        );
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created = body!(resp);
        assert_eq!(created["genres"], json!(["Drama"]));

        let resp = send!(
            app,
            TestRequest::post()
                .uri("/api/films")
                .set_json(json!({"catalog_id": 1396, "title": "Solyaris"})),
            alice
        );
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body!(resp)["id"], created["id"]);

        let resp = send!(app, TestRequest::get().uri("/api/films/search?q=solyaris"));
        let hits = body!(resp);
        assert_eq!(hits[0]["id"], created["id"]);
        let resp = send!(app, TestRequest::get().uri("/api/films/search?q=solaris"));
        assert_eq!(body!(resp), json!([]));

        let resp = send!(
            app,
            TestRequest::post()
                .uri("/api/films")
                .set_json(json!({"catalog_id": 7, "title": "  "})),
            alice
        );
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = send!(app, TestRequest::get().uri("/api/catalog/1396"));
        assert_eq!(resp.status(), StatusCode::OK);
        let view = body!(resp);
        assert_eq!(view["title"], "Solyaris");
        assert!(view.get("viewer").is_none());
    }

    #[actix_rt::test]
    async fn toggling_twice_restores_state() {
        let app = test_app!();
        let alice = register!(app, "alice");
        let film = add_film!(app, alice, 1, "Stalker");
        let uri = format!("/api/films/{}/toggle/watchlist", film);

        let resp = send!(app, TestRequest::post().uri(&uri), alice);
        assert_eq!(resp.status(), StatusCode::OK);
        let on = body!(resp);
        assert_eq!(on["active"], true);
        assert_eq!(on["kind"], "watchlist");
        assert!(on["at"].is_string());

        let resp = send!(app, TestRequest::get().uri(&format!("/api/films/{}", film)), alice);
        let view = body!(resp);
        assert_eq!(view["stats"]["watchlisted"], 1);
        assert_eq!(view["viewer"]["watchlist"], true);

        let resp = send!(app, TestRequest::post().uri(&uri), alice);
        let off = body!(resp);
        assert_eq!(off["active"], false);
        assert!(off.get("at").is_none());

        let resp = send!(app, TestRequest::get().uri(&format!("/api/films/{}", film)), alice);
        let view = body!(resp);
        assert_eq!(view["stats"]["watchlisted"], 0);
        assert_eq!(view["viewer"]["watchlist"], false);

        let resp = send!(
            app,
            TestRequest::post().uri(&format!("/api/films/{}/toggle/loved", film)),
            alice
        );
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = send!(app, TestRequest::post().uri(&uri));
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_rt::test]
    async fn catalog_toggle_creates_lazily() {
        let app = test_app!();
        let alice = register!(app, "alice");

        let resp = send!(app, TestRequest::post().uri("/api/catalog/603/toggle/liked"), alice);
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = send!(
            app,
            TestRequest::post()
                .uri("/api/catalog/603/toggle/liked")
                .set_json(json!({"title": "The Matrix", "year": 1999})),
            alice
        );
        assert_eq!(resp.status(), StatusCode::OK);
        let toggled = body!(resp);
        assert_eq!(toggled["active"], true);

        let resp = send!(app, TestRequest::get().uri("/api/catalog/603"), alice);
        let view = body!(resp);
        assert_eq!(view["id"], toggled["film_id"]);
        assert_eq!(view["year"], 1999);
        assert_eq!(view["stats"]["liked"], 1);

        // Already mirrored: no body needed.
        let resp = send!(app, TestRequest::post().uri("/api/catalog/603/toggle/liked"), alice);
        assert_eq!(body!(resp)["active"], false);
    }

    #[actix_rt::test]
    async fn malformed_catalog_metadata_is_rejected() {
        let app = test_app!();
        let alice = register!(app, "alice");
        let toggle = |payload: &'static str| {
            TestRequest::post()
                .uri("/api/catalog/604/toggle/watchlist")
                .insert_header(("content-type", "application/json"))
                .set_payload(payload)
        };

        let resp = send!(app, toggle(r#"{"title": 5}"#), alice);
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = send!(app, toggle("{not json"), alice);
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = send!(app, TestRequest::get().uri("/api/catalog/604"), alice);
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = send!(app, toggle(r#"{"title": "The Matrix Reloaded"}"#), alice);
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body!(resp)["active"], true);
        let resp = send!(app, toggle("{not json"), alice);
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = send!(app, toggle(" "), alice);
        assert_eq!(body!(resp)["active"], false);
    }

    #[actix_rt::test]
    async fn film_reviews_newest_first() {
        let app = test_app!();
        let alice = register!(app, "alice");
        let bob = register!(app, "bob");
        let film = add_film!(app, alice, 1, "Stalker");
        for (cookie, rating) in [(&alice, 4), (&bob, 8)] {
            send!(
                app,
                TestRequest::post()
                    .uri("/api/reviews")
                    .set_json(json!({"film_id": film, "rating": rating})),
                cookie
            );
        }

        let resp = send!(app, TestRequest::get().uri(&format!("/api/films/{}/reviews", film)));
        let reviews = body!(resp);
        assert_eq!(reviews[0]["user"]["username"], "bob");
        assert_eq!(reviews[1]["user"]["username"], "alice");

        let resp = send!(app, TestRequest::get().uri(&format!("/api/films/{}", film)));
        let view = body!(resp);
        assert_eq!(view["stats"]["average_rating"], 6.0);
        assert_eq!(view["stats"]["watched"], 2);

        let resp = send!(app, TestRequest::get().uri("/api/films/999/reviews"));
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
