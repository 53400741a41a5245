use super::{clean_text, find_film, nullable, Db, FilmSummary, Lookup, UserSummary};
use crate::auth::AuthUser;
use crate::database::ReviewDb;
use crate::error::{AppError, AppResult};
use crate::model::Review;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

const MAX_CONTENT_LEN: usize = 20_000;

#[derive(Serialize, Debug)]
pub struct ReviewView {
    pub id: u64,
    pub user: UserSummary,
    pub film: FilmSummary,
    pub rating: Option<u8>,
    pub content: Option<String>,
    pub watched_on: NaiveDate,
    pub rewatch: bool,
    pub liked: bool,
    pub spoilers: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReviewView {
    pub fn new(lookup: &mut Lookup, db: &sled::Db, id: u64, review: Review) -> AppResult<Self> {
        Ok(ReviewView {
            id,
            user: lookup.user(db, review.user_id)?,
            film: lookup.film(db, review.film_id)?,
            rating: review.rating,
            content: review.content,
            watched_on: review.watched_on,
            rewatch: review.rewatch,
            liked: review.liked,
            spoilers: review.spoilers,
            created_at: review.created_at,
            updated_at: review.updated_at,
        })
    }
}

fn validate_rating(rating: Option<u8>) -> AppResult<()> {
    match rating {
        Some(rating) if !(1..=10).contains(&rating) => Err(AppError::Validation(
            "rating must be between 1 and 10 half stars".to_owned(),
        )),
        _ => Ok(()),
    }
}

fn validate_watched_on(watched_on: NaiveDate) -> AppResult<()> {
    if watched_on > Utc::now().date_naive() {
        return Err(AppError::Validation(
            "watched_on cannot be in the future".to_owned(),
        ));
    }
    Ok(())
}

/// Loads a review the viewer wrote.
fn owned_review(db: &sled::Db, viewer: AuthUser, id: u64) -> AppResult<Review> {
    let review = db
        .get_review(id)?
        .ok_or_else(|| AppError::NotFound(format!("review {} not found", id)))?;
    if review.user_id != viewer.id() {
        return Err(AppError::Authorization(
            "only the author can change a review".to_owned(),
        ));
    }
    Ok(review)
}

#[derive(Deserialize)]
pub struct NewReview {
    film_id: u64,
    rating: Option<u8>,
    content: Option<String>,
    watched_on: Option<NaiveDate>,
    #[serde(default)]
    liked: bool,
    #[serde(default)]
    spoilers: bool,
}

pub async fn create(
    viewer: AuthUser,
    params: web::Json<NewReview>,
    db: Db,
) -> AppResult<HttpResponse> {
    let params = params.into_inner();
    validate_rating(params.rating)?;
    let watched_on = params.watched_on.unwrap_or_else(|| Utc::now().date_naive());
    validate_watched_on(watched_on)?;
    let content = clean_text("content", params.content, MAX_CONTENT_LEN)?;
    find_film(&db, params.film_id)?;

    let now = Utc::now();
    let (id, review) = db.log_review(&Review {
        user_id: viewer.id(),
        film_id: params.film_id,
        rating: params.rating,
        content,
        watched_on,
        rewatch: false,
        liked: params.liked,
        spoilers: params.spoilers,
        created_at: now,
        updated_at: now,
    })?;
    log::debug!(
        "user {} logged film {} (review {}, rewatch {})",
        review.user_id,
        review.film_id,
        id,
        review.rewatch
    );

    let view = ReviewView::new(&mut Lookup::default(), &db, id, review)?;
    Ok(HttpResponse::Created().json(view))
}

pub async fn get(path: web::Path<u64>, db: Db) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let review = db
        .get_review(id)?
        .ok_or_else(|| AppError::NotFound(format!("review {} not found", id)))?;
    Ok(HttpResponse::Ok().json(ReviewView::new(&mut Lookup::default(), &db, id, review)?))
}

#[derive(Deserialize)]
pub struct ReviewUpdate {
    #[serde(default, deserialize_with = "nullable")]
    rating: Option<Option<u8>>,
    #[serde(default, deserialize_with = "nullable")]
    content: Option<Option<String>>,
    watched_on: Option<NaiveDate>,
    spoilers: Option<bool>,
}

pub async fn update(
    viewer: AuthUser,
    path: web::Path<u64>,
    params: web::Json<ReviewUpdate>,
    db: Db,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let params = params.into_inner();
    let mut review = owned_review(&db, viewer, id)?;
    if let Some(rating) = params.rating {
        validate_rating(rating)?;
        review.rating = rating;
    }
    if let Some(content) = params.content {
        review.content = clean_text("content", content, MAX_CONTENT_LEN)?;
    }
    if let Some(watched_on) = params.watched_on {
        validate_watched_on(watched_on)?;
        review.watched_on = watched_on;
    }
    if let Some(spoilers) = params.spoilers {
        review.spoilers = spoilers;
    }
    review.updated_at = Utc::now();
    db.update_review(id, &review)?;
    Ok(HttpResponse::Ok().json(ReviewView::new(&mut Lookup::default(), &db, id, review)?))
}

pub async fn delete(viewer: AuthUser, path: web::Path<u64>, db: Db) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    owned_review(&db, viewer, id)?;
    db.delete_review(id)?;
    log::debug!("user {} deleted review {}", viewer.id(), id);
    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::test::TestRequest;
    use chrono::{Duration, Utc};
    use serde_json::json;

    #[actix_rt::test]
    async fn logging_marks_watched_and_rewatch() {
        let app = test_app!();
        let alice = register!(app, "alice");
        let film = add_film!(app, alice, 1, "Stalker");

        let resp = send!(
            app,
            TestRequest::post()
                .uri("/api/reviews")
                .set_json(json!({
                    "film_id": film,
                    "rating": 9,
                    "liked": true,
                    "watched_on": "2024-03-01",
                })),
            alice
        );
        assert_eq!(resp.status(), StatusCode::CREATED);
        let first = body!(resp);
        assert_eq!(first["rewatch"], false);
        assert_eq!(first["film"]["title"], "Stalker");

        let resp = send!(app, TestRequest::get().uri(&format!("/api/films/{}", film)), alice);
        let view = body!(resp);
        assert_eq!(view["viewer"]["watched"], true);
        assert_eq!(view["viewer"]["liked"], true);
        assert_eq!(view["stats"]["average_rating"], 9.0);

        let resp = send!(
            app,
            TestRequest::post()
                .uri("/api/reviews")
                .set_json(json!({"film_id": film, "rating": 7})),
            alice
        );
        let second = body!(resp);
        assert_eq!(second["rewatch"], true);
        assert_eq!(second["watched_on"], json!(Utc::now().date_naive()));

        let resp = send!(app, TestRequest::get().uri("/api/users/alice/diary"));
        let diary = body!(resp);
        assert_eq!(diary[0]["id"], second["id"]);
        assert_eq!(diary[1]["id"], first["id"]);

        let resp = send!(app, TestRequest::get().uri("/api/users/alice/films/watched"));
        assert_eq!(body!(resp)[0]["rewatch"], true);
    }

    #[actix_rt::test]
    async fn review_validation() {
        let app = test_app!();
        let alice = register!(app, "alice");
        let film = add_film!(app, alice, 1, "Stalker");
        let post = |body: serde_json::Value| TestRequest::post().uri("/api/reviews").set_json(body);

        let resp = send!(app, post(json!({"film_id": film, "rating": 11})), alice);
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = send!(app, post(json!({"film_id": film, "rating": 0})), alice);
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let tomorrow = Utc::now().date_naive() + Duration::days(2);
        let resp = send!(app, post(json!({"film_id": film, "watched_on": tomorrow})), alice);
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = send!(app, post(json!({"film_id": film + 99})), alice);
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = send!(app, post(json!({"film_id": film})));
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_rt::test]
    async fn edits_are_validated() {
        let app = test_app!();
        let alice = register!(app, "alice");
        let film = add_film!(app, alice, 1, "Stalker");
        let resp = send!(
            app,
            TestRequest::post()
                .uri("/api/reviews")
                .set_json(json!({"film_id": film, "rating": 8, "watched_on": "2024-03-01"})),
            alice
        );
        let uri = format!("/api/reviews/{}", body!(resp)["id"]);
        let patch = |body: serde_json::Value| TestRequest::patch().uri(&uri).set_json(body);

        let future = Utc::now().date_naive() + Duration::days(2);
        let resp = send!(app, patch(json!({ "watched_on": future })), alice);
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = send!(app, patch(json!({"rating": 11})), alice);
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = send!(app, TestRequest::get().uri(&uri));
        let unchanged = body!(resp);
        assert_eq!(unchanged["watched_on"], "2024-03-01");
        assert_eq!(unchanged["rating"], 8);

        let resp = send!(app, patch(json!({"watched_on": "2024-02-29"})), alice);
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body!(resp)["watched_on"], "2024-02-29");
    }

    #[actix_rt::test]
    async fn only_the_author_edits() {
        let app = test_app!();
        let alice = register!(app, "alice");
        let bob = register!(app, "bob");
        let film = add_film!(app, alice, 1, "Stalker");

        let resp = send!(
            app,
            TestRequest::post()
                .uri("/api/reviews")
                .set_json(json!({"film_id": film, "rating": 6, "content": "slow"})),
            alice
        );
        let id = body!(resp)["id"].as_u64().unwrap();
        let uri = format!("/api/reviews/{}", id);

        let resp = send!(
            app,
            TestRequest::patch().uri(&uri).set_json(json!({"rating": 10})),
            bob
        );
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = send!(
            app,
            TestRequest::patch()
                .uri(&uri)
                .set_json(json!({"rating": null, "spoilers": true})),
            alice
        );
        assert_eq!(resp.status(), StatusCode::OK);
        let updated = body!(resp);
        assert!(updated["rating"].is_null());
        assert_eq!(updated["content"], "slow");
        assert_eq!(updated["spoilers"], true);

        let resp = send!(app, TestRequest::delete().uri(&uri), bob);
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let resp = send!(app, TestRequest::delete().uri(&uri), alice);
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let resp = send!(app, TestRequest::get().uri(&uri));
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        // The ledger keeps the viewing.
        let resp = send!(app, TestRequest::get().uri("/api/users/alice/films/watched"));
        assert_eq!(body!(resp).as_array().unwrap().len(), 1);
    }
}
