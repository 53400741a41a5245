//! Activity feeds: a user's watches, likes, watchlist additions and reviews
//! merged into one newest-first stream.

use crate::database::{DbError, DbResult, InteractionDb, ReviewDb};
use crate::model::InteractionKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

pub const DEFAULT_LIMIT: usize = 30;
pub const MAX_LIMIT: usize = 100;

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityKind {
    Watched { rewatch: bool },
    Liked,
    Watchlisted,
    Reviewed { review_id: u64, rating: Option<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub user_id: u64,
    pub film_id: u64,
    pub at: DateTime<Utc>,
    pub kind: ActivityKind,
}

struct Head {
    at: DateTime<Utc>,
    stream: usize,
    position: usize,
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Head {}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Head {
    // Max-heap: latest first, then earlier streams win ties.
    fn cmp(&self, other: &Self) -> Ordering {
        self.at
            .cmp(&other.at)
            .then(Reverse(self.stream).cmp(&Reverse(other.stream)))
    }
}

/// K-way merge of newest-first streams. Skips `offset` items and yields at most `limit`.
pub fn merge(streams: Vec<Vec<Activity>>, offset: usize, limit: usize) -> Vec<Activity> {
    let mut heap: BinaryHeap<Head> = streams
        .iter()
        .enumerate()
        .filter_map(|(stream, items)| {
            items.first().map(|first| Head {
                at: first.at,
                stream,
                position: 0,
            })
        })
        .collect();

    let mut out = Vec::with_capacity(limit.min(64));
    let mut skipped = 0;
    while let Some(head) = heap.pop() {
        if out.len() >= limit {
            break;
        }
        let items = &streams[head.stream];
        if skipped < offset {
            skipped += 1;
        } else {
            out.push(items[head.position].clone());
        }
        if let Some(next) = items.get(head.position + 1) {
            heap.push(Head {
                at: next.at,
                stream: head.stream,
                position: head.position + 1,
            });
        }
    }
    out
}

/// One newest-first stream per source for `user_id`: watched, liked, watchlist, reviews.
pub fn user_streams<D>(db: &D, user_id: u64) -> DbResult<Vec<Vec<Activity>>>
where
    D: InteractionDb<Error = DbError> + ReviewDb<Error = DbError>,
{
    let mut streams = Vec::with_capacity(4);
    for kind in InteractionKind::ALL {
        let stream = db
            .user_interactions(user_id, kind)?
            .into_iter()
            .map(|(film_id, entry)| Activity {
                user_id,
                film_id,
                at: entry.at,
                kind: match kind {
                    InteractionKind::Watched => ActivityKind::Watched {
                        rewatch: entry.rewatch,
                    },
                    InteractionKind::Liked => ActivityKind::Liked,
                    InteractionKind::Watchlist => ActivityKind::Watchlisted,
                },
            })
            .collect();
        streams.push(stream);
    }

    let mut reviews: Vec<Activity> = db
        .user_reviews(user_id)?
        .into_iter()
        .map(|(review_id, review)| Activity {
            user_id,
            film_id: review.film_id,
            at: review.created_at,
            kind: ActivityKind::Reviewed {
                review_id,
                rating: review.rating,
            },
        })
        .collect();
    reviews.reverse();
    streams.push(reviews);
    Ok(streams)
}

pub fn user_activity<D>(
    db: &D,
    user_id: u64,
    offset: usize,
    limit: usize,
) -> DbResult<Vec<Activity>>
where
    D: InteractionDb<Error = DbError> + ReviewDb<Error = DbError>,
{
    Ok(merge(user_streams(db, user_id)?, offset, limit))
}

/// Activity of every user in `user_ids`, merged.
pub fn combined_activity<D>(
    db: &D,
    user_ids: &[u64],
    offset: usize,
    limit: usize,
) -> DbResult<Vec<Activity>>
where
    D: InteractionDb<Error = DbError> + ReviewDb<Error = DbError>,
{
    let mut streams = Vec::with_capacity(user_ids.len() * 4);
    for user_id in user_ids {
        streams.extend(user_streams(db, *user_id)?);
    }
    Ok(merge(streams, offset, limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{review, temporary};
    use chrono::Duration;

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap() + Duration::minutes(minutes)
    }

    fn activity(film_id: u64, minutes: i64, kind: ActivityKind) -> Activity {
        Activity {
            user_id: 1,
            film_id,
            at: at(minutes),
            kind,
        }
    }

    #[test]
    fn merge_orders_by_time_then_stream() {
        let watched = vec![
            activity(1, 30, ActivityKind::Watched { rewatch: false }),
            activity(2, 10, ActivityKind::Watched { rewatch: false }),
        ];
        let liked = vec![
            activity(3, 20, ActivityKind::Liked),
            activity(1, 10, ActivityKind::Liked),
        ];
        let merged = merge(vec![watched, liked], 0, 10);
        let films: Vec<(u64, i64)> = merged
            .iter()
            .map(|a| (a.film_id, (a.at - at(0)).num_minutes()))
            .collect();
        assert_eq!(films, vec![(1, 30), (3, 20), (2, 10), (1, 10)]);
        assert!(matches!(merged[2].kind, ActivityKind::Watched { .. }));
    }

    #[test]
    fn merge_pages() {
        let stream: Vec<Activity> = (0..10)
            .rev()
            .map(|n| activity(n, n as i64, ActivityKind::Liked))
            .collect();
        let page = merge(vec![stream.clone(), Vec::new()], 3, 4);
        assert_eq!(page.iter().map(|a| a.film_id).collect::<Vec<_>>(), vec![6, 5, 4, 3]);
        assert!(merge(vec![stream], 10, 4).is_empty());
        assert!(merge(Vec::new(), 0, 4).is_empty());
    }

    #[test]
    fn user_activity_includes_every_source() {
        let db = temporary();
        db.toggle_interaction(1, 10, InteractionKind::Watched).unwrap();
        db.toggle_interaction(1, 11, InteractionKind::Watchlist).unwrap();
        db.toggle_interaction(1, 10, InteractionKind::Liked).unwrap();
        db.log_review(&review(1, 10, Some(9))).unwrap();
        db.toggle_interaction(2, 10, InteractionKind::Liked).unwrap();

        let feed = user_activity(&db, 1, 0, DEFAULT_LIMIT).unwrap();
        assert_eq!(feed.len(), 4);
        assert!(feed.windows(2).all(|pair| pair[0].at >= pair[1].at));
        assert!(feed
            .iter()
            .any(|a| matches!(a.kind, ActivityKind::Reviewed { rating: Some(9), .. })));
        assert!(feed.iter().all(|a| a.user_id == 1));

        let combined = combined_activity(&db, &[1, 2], 0, DEFAULT_LIMIT).unwrap();
        assert_eq!(combined.len(), 5);
    }
}
