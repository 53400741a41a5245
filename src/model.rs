use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const FAVORITE_SLOTS: usize = 4;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub username: String,
    pub password_hash: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub favorite_films: [Option<u64>; FAVORITE_SLOTS],
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: String, password_hash: String) -> Self {
        User {
            username,
            password_hash,
            display_name: None,
            bio: None,
            location: None,
            website: None,
            favorite_films: [None; FAVORITE_SLOTS],
            created_at: Utc::now(),
        }
    }
}

/// A film mirrored from the external catalog.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Film {
    pub catalog_id: u64,
    pub title: String,
    pub year: Option<u16>,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub runtime_minutes: Option<u16>,
    pub genres: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Watched,
    Liked,
    Watchlist,
}

impl InteractionKind {
    pub const ALL: [InteractionKind; 3] = [
        InteractionKind::Watched,
        InteractionKind::Liked,
        InteractionKind::Watchlist,
    ];

    pub fn tag(self) -> u8 {
        match self {
            InteractionKind::Watched => 0,
            InteractionKind::Liked => 1,
            InteractionKind::Watchlist => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InteractionKind::Watched => "watched",
            InteractionKind::Liked => "liked",
            InteractionKind::Watchlist => "watchlist",
        }
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InteractionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "watched" => Ok(InteractionKind::Watched),
            "liked" => Ok(InteractionKind::Liked),
            "watchlist" => Ok(InteractionKind::Watchlist),
            other => Err(format!("unknown interaction kind: {}", other)),
        }
    }
}

/// One ledger entry: a user watched, liked or watchlisted a film.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Interaction {
    pub at: DateTime<Utc>,
    pub rewatch: bool,
}

/// A diary entry. Every viewing gets its own review, rated or not.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Review {
    pub user_id: u64,
    pub film_id: u64,
    /// Half stars, 1..=10.
    pub rating: Option<u8>,
    pub content: Option<String>,
    pub watched_on: NaiveDate,
    pub rewatch: bool,
    pub liked: bool,
    pub spoilers: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FilmList {
    pub owner_id: u64,
    pub title: String,
    pub description: Option<String>,
    pub ranked: bool,
    pub film_ids: Vec<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Conversation {
    /// Sorted ascending.
    pub participants: Vec<u64>,
    /// (participant, id of the newest message they have read)
    pub last_read: Vec<(u64, u64)>,
    pub created_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
}

impl Conversation {
    pub fn includes(&self, user_id: u64) -> bool {
        self.participants.binary_search(&user_id).is_ok()
    }

    pub fn last_read_by(&self, user_id: u64) -> u64 {
        self.last_read
            .iter()
            .find(|(participant, _)| *participant == user_id)
            .map(|(_, message_id)| *message_id)
            .unwrap_or(0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Message {
    pub conversation_id: u64,
    pub sender_id: u64,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum NotificationKind {
    Follow { from: u64 },
    Message { conversation_id: u64, from: u64 },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}
