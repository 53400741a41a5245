use super::{Db, Lookup, UserSummary};
use crate::auth::AuthUser;
use crate::database::NotificationDb;
use crate::error::AppResult;
use crate::model::NotificationKind;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Payload {
    Follow { from: UserSummary },
    Message { conversation_id: u64, from: UserSummary },
}

#[derive(Serialize, Debug)]
struct NotificationView {
    id: u64,
    #[serde(flatten)]
    payload: Payload,
    created_at: DateTime<Utc>,
    read: bool,
}

/// `?unread` alone or `?unread=true` keeps only unread notifications.
#[derive(Deserialize)]
pub struct NotificationQuery {
    unread: Option<String>,
}

impl NotificationQuery {
    fn unread_only(&self) -> bool {
        matches!(self.unread.as_deref(), Some("" | "true" | "1"))
    }
}

pub async fn list(
    viewer: AuthUser,
    query: web::Query<NotificationQuery>,
    db: Db,
) -> AppResult<HttpResponse> {
    let mut lookup = Lookup::default();
    let notifications = db
        .notifications(viewer.id(), query.unread_only())?
        .into_iter()
        .map(|(id, notification)| {
            let payload = match notification.kind {
                NotificationKind::Follow { from } => Payload::Follow {
                    from: lookup.user(&db, from)?,
                },
                NotificationKind::Message {
                    conversation_id,
                    from,
                } => Payload::Message {
                    conversation_id,
                    from: lookup.user(&db, from)?,
                },
            };
            Ok(NotificationView {
                id,
                payload,
                created_at: notification.created_at,
                read: notification.read,
            })
        })
        .collect::<AppResult<Vec<_>>>()?;
    Ok(HttpResponse::Ok().json(notifications))
}

pub async fn mark_read(viewer: AuthUser, db: Db) -> AppResult<HttpResponse> {
    let marked = db.mark_notifications_read(viewer.id())?;
    log::debug!("user {} read {} notifications", viewer.id(), marked);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "marked": marked })))
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::test::TestRequest;

    #[actix_rt::test]
    async fn read_notifications_drop_from_unread() {
        let app = test_app!();
        let alice = register!(app, "alice");
        let bob = register!(app, "bob");
        let carol = register!(app, "carol");
        send!(app, TestRequest::post().uri("/api/users/alice/follow"), bob);
        send!(app, TestRequest::post().uri("/api/users/alice/follow"), carol);

        let resp = send!(app, TestRequest::get().uri("/api/notifications?unread"), alice);
        assert_eq!(resp.status(), StatusCode::OK);
        let unread = body!(resp);
        assert_eq!(unread.as_array().unwrap().len(), 2);
        assert_eq!(unread[0]["from"]["username"], "carol");
        assert_eq!(unread[0]["read"], false);

        let resp = send!(app, TestRequest::post().uri("/api/notifications/read"), alice);
        assert_eq!(body!(resp)["marked"], 2);
        let resp = send!(app, TestRequest::post().uri("/api/notifications/read"), alice);
        assert_eq!(body!(resp)["marked"], 0);

        let resp = send!(app, TestRequest::get().uri("/api/notifications?unread"), alice);
        assert_eq!(body!(resp).as_array().unwrap().len(), 0);
        let resp = send!(app, TestRequest::get().uri("/api/notifications"), alice);
        let all = body!(resp);
        assert_eq!(all.as_array().unwrap().len(), 2);
        assert_eq!(all[1]["read"], true);

        let resp = send!(app, TestRequest::get().uri("/api/notifications"));
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
