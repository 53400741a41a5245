use super::{find_user, Db, Lookup, UserSummary};
use crate::auth::AuthUser;
use crate::database::{ChatDb, NotificationDb};
use crate::error::{AppError, AppResult};
use crate::model::{Conversation, Message, Notification, NotificationKind};
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MAX_BODY_LEN: usize = 4_000;
const DEFAULT_PAGE: usize = 50;
const MAX_PAGE: usize = 200;

#[derive(Serialize, Debug)]
pub struct MessageView {
    pub id: u64,
    pub conversation_id: u64,
    pub sender_id: u64,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

impl MessageView {
    fn new(id: u64, message: Message) -> Self {
        MessageView {
            id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            body: message.body,
            sent_at: message.sent_at,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ConversationView {
    pub id: u64,
    pub participants: Vec<UserSummary>,
    pub last_message: Option<MessageView>,
    pub unread: usize,
    pub created_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
}

impl ConversationView {
    fn new(
        lookup: &mut Lookup,
        db: &sled::Db,
        viewer: AuthUser,
        id: u64,
        conversation: Conversation,
    ) -> AppResult<Self> {
        let participants = conversation
            .participants
            .iter()
            .map(|participant| lookup.user(db, *participant))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(ConversationView {
            id,
            participants,
            last_message: db
                .last_message(id)?
                .map(|(message_id, message)| MessageView::new(message_id, message)),
            unread: db.unread_count(id, viewer.id())?,
            created_at: conversation.created_at,
            last_message_at: conversation.last_message_at,
        })
    }
}

/// Loads a conversation the viewer takes part in.
fn joined_conversation(db: &sled::Db, viewer: AuthUser, id: u64) -> AppResult<Conversation> {
    let conversation = db
        .get_conversation(id)?
        .ok_or_else(|| AppError::NotFound(format!("conversation {} not found", id)))?;
    if !conversation.includes(viewer.id()) {
        return Err(AppError::Authorization(
            "not a participant of this conversation".to_owned(),
        ));
    }
    Ok(conversation)
}

#[derive(Deserialize)]
pub struct StartParams {
    username: String,
}

pub async fn start(
    viewer: AuthUser,
    params: web::Json<StartParams>,
    db: Db,
) -> AppResult<HttpResponse> {
    let (other, _) = find_user(&db, &params.username)?;
    if other == viewer.id() {
        return Err(AppError::Validation(
            "cannot start a conversation with yourself".to_owned(),
        ));
    }
    let (id, conversation, created) = db.direct_conversation(viewer.id(), other)?;
    let view = ConversationView::new(&mut Lookup::default(), &db, viewer, id, conversation)?;
    if created {
        log::debug!("user {} opened conversation {} with {}", viewer.id(), id, other);
        Ok(HttpResponse::Created().json(view))
    } else {
        Ok(HttpResponse::Ok().json(view))
    }
}

pub async fn list(viewer: AuthUser, db: Db) -> AppResult<HttpResponse> {
    let mut lookup = Lookup::default();
    let conversations = db
        .user_conversations(viewer.id())?
        .into_iter()
        .map(|(id, conversation)| ConversationView::new(&mut lookup, &db, viewer, id, conversation))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(HttpResponse::Ok().json(conversations))
}

#[derive(Deserialize)]
pub struct MessageQuery {
    before: Option<u64>,
    limit: Option<usize>,
}

pub async fn messages(
    viewer: AuthUser,
    path: web::Path<u64>,
    query: web::Query<MessageQuery>,
    db: Db,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    joined_conversation(&db, viewer, id)?;
    let limit = query.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let messages: Vec<MessageView> = db
        .messages(id, query.before, limit)?
        .into_iter()
        .map(|(message_id, message)| MessageView::new(message_id, message))
        .collect();
    Ok(HttpResponse::Ok().json(messages))
}

#[derive(Deserialize)]
pub struct SendParams {
    body: String,
}

pub async fn send(
    viewer: AuthUser,
    path: web::Path<u64>,
    params: web::Json<SendParams>,
    db: Db,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let body = params.into_inner().body;
    if body.trim().is_empty() {
        return Err(AppError::Validation("message must not be blank".to_owned()));
    }
    if body.chars().count() > MAX_BODY_LEN {
        return Err(AppError::Validation(format!(
            "message must be at most {} characters",
            MAX_BODY_LEN
        )));
    }
    let conversation = joined_conversation(&db, viewer, id)?;
    let message = Message {
        conversation_id: id,
        sender_id: viewer.id(),
        body,
        sent_at: Utc::now(),
    };
    let message_id = db.add_message(&message)?;
    for participant in conversation.participants {
        if participant == viewer.id() {
            continue;
        }
        db.add_notification(
            participant,
            &Notification {
                kind: NotificationKind::Message {
                    conversation_id: id,
                    from: viewer.id(),
                },
                created_at: message.sent_at,
                read: false,
            },
        )?;
    }
    Ok(HttpResponse::Created().json(MessageView::new(message_id, message)))
}

pub async fn mark_read(viewer: AuthUser, path: web::Path<u64>, db: Db) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    joined_conversation(&db, viewer, id)?;
    let conversation = db.mark_read(id, viewer.id())?;
    let view = ConversationView::new(&mut Lookup::default(), &db, viewer, id, conversation)?;
    Ok(HttpResponse::Ok().json(view))
}
