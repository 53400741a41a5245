use super::reviews::ReviewView;
use super::{find_user, Db, FilmSummary, Lookup, PageQuery, UserSummary};
use crate::auth::AuthUser;
use crate::database::{FilmDb, FollowDb, InteractionDb, ListDb, NotificationDb, ReviewDb};
use crate::error::{AppError, AppResult};
use crate::feed::{self, Activity, ActivityKind};
use crate::model::{InteractionKind, Notification, NotificationKind, User};
use crate::recommend;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Debug)]
pub struct ProfileStats {
    pub watched: usize,
    pub liked: usize,
    pub watchlist: usize,
    pub reviews: usize,
    pub lists: usize,
    pub followers: usize,
    pub following: usize,
}

#[derive(Serialize, Debug)]
pub struct ProfileView {
    pub id: u64,
    pub username: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub favorite_films: Vec<Option<FilmSummary>>,
    pub stats: ProfileStats,
    pub created_at: DateTime<Utc>,
    /// Whether the viewer follows this user; absent on one's own profile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub followed: Option<bool>,
}

pub(crate) fn profile_view(db: &sled::Db, id: u64, user: &User) -> AppResult<ProfileView> {
    let mut favorite_films = Vec::with_capacity(user.favorite_films.len());
    for slot in &user.favorite_films {
        let film = match slot {
            Some(film_id) => db
                .get_film(*film_id)?
                .map(|film| FilmSummary::new(*film_id, &film)),
            None => None,
        };
        favorite_films.push(film);
    }
    let stats = ProfileStats {
        watched: db.count_user_interactions(id, InteractionKind::Watched)?,
        liked: db.count_user_interactions(id, InteractionKind::Liked)?,
        watchlist: db.count_user_interactions(id, InteractionKind::Watchlist)?,
        reviews: db.user_reviews(id)?.len(),
        lists: db.user_lists(id)?.len(),
        followers: db.count_followers(id)?,
        following: db.count_following(id)?,
    };
    Ok(ProfileView {
        id,
        username: user.username.clone(),
        display_name: user.display_name.clone(),
        bio: user.bio.clone(),
        location: user.location.clone(),
        website: user.website.clone(),
        favorite_films,
        stats,
        created_at: user.created_at,
        followed: None,
    })
}

pub async fn profile(
    path: web::Path<String>,
    viewer: Option<AuthUser>,
    db: Db,
) -> AppResult<HttpResponse> {
    let (id, user) = find_user(&db, &path)?;
    let mut view = profile_view(&db, id, &user)?;
    if let Some(viewer) = viewer.filter(|viewer| viewer.id() != id) {
        view.followed = Some(db.is_following(viewer.id(), id)?);
    }
    Ok(HttpResponse::Ok().json(view))
}

#[derive(Serialize)]
struct LedgerEntryView {
    film: FilmSummary,
    at: DateTime<Utc>,
    rewatch: bool,
}

pub async fn films(path: web::Path<(String, String)>, db: Db) -> AppResult<HttpResponse> {
    let (username, kind) = path.into_inner();
    let kind: InteractionKind = kind.parse().map_err(AppError::Validation)?;
    let (id, _) = find_user(&db, &username)?;
    let mut lookup = Lookup::default();
    let entries = db
        .user_interactions(id, kind)?
        .into_iter()
        .map(|(film_id, entry)| {
            Ok(LedgerEntryView {
                film: lookup.film(&db, film_id)?,
                at: entry.at,
                rewatch: entry.rewatch,
            })
        })
        .collect::<AppResult<Vec<_>>>()?;
    Ok(HttpResponse::Ok().json(entries))
}

pub async fn diary(path: web::Path<String>, db: Db) -> AppResult<HttpResponse> {
    let (id, _) = find_user(&db, &path)?;
    let mut reviews = db.user_reviews(id)?;
    reviews.sort_by(|(_, a), (_, b)| {
        b.watched_on
            .cmp(&a.watched_on)
            .then(b.created_at.cmp(&a.created_at))
    });
    let mut lookup = Lookup::default();
    let entries = reviews
        .into_iter()
        .map(|(review_id, review)| ReviewView::new(&mut lookup, &db, review_id, review))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(HttpResponse::Ok().json(entries))
}

#[derive(Serialize)]
struct ActivityView {
    user: UserSummary,
    film: FilmSummary,
    at: DateTime<Utc>,
    #[serde(flatten)]
    kind: ActivityKind,
}

fn activity_views(db: &sled::Db, activity: Vec<Activity>) -> AppResult<Vec<ActivityView>> {
    let mut lookup = Lookup::default();
    activity
        .into_iter()
        .map(|item| {
            Ok(ActivityView {
                user: lookup.user(db, item.user_id)?,
                film: lookup.film(db, item.film_id)?,
                at: item.at,
                kind: item.kind,
            })
        })
        .collect()
}

pub async fn activity(
    path: web::Path<String>,
    page: web::Query<PageQuery>,
    db: Db,
) -> AppResult<HttpResponse> {
    let (id, _) = find_user(&db, &path)?;
    let items = feed::user_activity(
        db.get_ref(),
        id,
        page.offset(),
        page.limit(feed::DEFAULT_LIMIT, feed::MAX_LIMIT),
    )?;
    Ok(HttpResponse::Ok().json(activity_views(&db, items)?))
}

pub async fn feed(
    viewer: AuthUser,
    page: web::Query<PageQuery>,
    db: Db,
) -> AppResult<HttpResponse> {
    let following = db.following(viewer.id())?;
    let items = feed::combined_activity(
        db.get_ref(),
        &following,
        page.offset(),
        page.limit(feed::DEFAULT_LIMIT, feed::MAX_LIMIT),
    )?;
    Ok(HttpResponse::Ok().json(activity_views(&db, items)?))
}

pub async fn toggle_follow(
    viewer: AuthUser,
    path: web::Path<String>,
    db: Db,
) -> AppResult<HttpResponse> {
    let (id, _) = find_user(&db, &path)?;
    if id == viewer.id() {
        return Err(AppError::Validation("you cannot follow yourself".to_owned()));
    }
    let following = db.toggle_follow(viewer.id(), id)?;
    if following {
        db.add_notification(
            id,
            &Notification {
                kind: NotificationKind::Follow { from: viewer.id() },
                created_at: Utc::now(),
                read: false,
            },
        )?;
    }
    log::debug!("user {} follows user {}: {}", viewer.id(), id, following);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "following": following })))
}

fn user_summaries(db: &sled::Db, ids: Vec<u64>) -> AppResult<Vec<UserSummary>> {
    let mut lookup = Lookup::default();
    ids.into_iter().map(|id| lookup.user(db, id)).collect()
}

pub async fn followers(path: web::Path<String>, db: Db) -> AppResult<HttpResponse> {
    let (id, _) = find_user(&db, &path)?;
    Ok(HttpResponse::Ok().json(user_summaries(&db, db.followers(id)?)?))
}

pub async fn following(path: web::Path<String>, db: Db) -> AppResult<HttpResponse> {
    let (id, _) = find_user(&db, &path)?;
    Ok(HttpResponse::Ok().json(user_summaries(&db, db.following(id)?)?))
}

#[derive(Deserialize)]
pub struct RecommendationQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct RecommendationView {
    film: FilmSummary,
    score: u32,
}

pub async fn recommendations(
    viewer: AuthUser,
    query: web::Query<RecommendationQuery>,
    db: Db,
) -> AppResult<HttpResponse> {
    let limit = query
        .limit
        .unwrap_or(recommend::DEFAULT_LIMIT)
        .clamp(1, recommend::MAX_LIMIT);
    let mut lookup = Lookup::default();
    let ranked = recommend::recommend(db.get_ref(), viewer.id(), limit)?
        .into_iter()
        .map(|(film_id, score)| {
            Ok(RecommendationView {
                film: lookup.film(&db, film_id)?,
                score,
            })
        })
        .collect::<AppResult<Vec<_>>>()?;
    Ok(HttpResponse::Ok().json(ranked))
}
