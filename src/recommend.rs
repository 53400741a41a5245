//! Co-like recommendations drawn from the ledger's film-side index.

use crate::database::{DbError, DbResult, InteractionDb};
use crate::model::InteractionKind;
use std::collections::{HashMap, HashSet};

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 50;

/// Films ranked for `user_id` as (film, score).
///
/// Every user who liked one of the viewer's seed films adds a point to each
/// film they liked. Seeds are the viewer's likes, or their watched films when
/// they have none. Films the viewer already has any ledger entry for are
/// never suggested.
pub fn recommend<D>(db: &D, user_id: u64, limit: usize) -> DbResult<Vec<(u64, u32)>>
where
    D: InteractionDb<Error = DbError>,
{
    let mut seeds: Vec<u64> = db
        .user_interactions(user_id, InteractionKind::Liked)?
        .into_iter()
        .map(|(film, _)| film)
        .collect();
    if seeds.is_empty() {
        seeds = db
            .user_interactions(user_id, InteractionKind::Watched)?
            .into_iter()
            .map(|(film, _)| film)
            .collect();
    }

    let mut excluded = HashSet::new();
    for kind in InteractionKind::ALL {
        excluded.extend(
            db.user_interactions(user_id, kind)?
                .into_iter()
                .map(|(film, _)| film),
        );
    }

    let mut neighbours = HashSet::new();
    for seed in &seeds {
        for (other, _) in db.film_interactions(*seed, InteractionKind::Liked)? {
            if other != user_id {
                neighbours.insert(other);
            }
        }
    }

    let mut scores: HashMap<u64, u32> = HashMap::new();
    for neighbour in neighbours {
        let liked: HashSet<u64> = db
            .user_interactions(neighbour, InteractionKind::Liked)?
            .into_iter()
            .map(|(film, _)| film)
            .collect();
        let shared = seeds.iter().filter(|seed| liked.contains(seed)).count() as u32;
        for film in liked {
            *scores.entry(film).or_insert(0) += shared;
        }
    }

    Ok(rank(scores, &excluded, limit))
}

fn rank(scores: HashMap<u64, u32>, excluded: &HashSet<u64>, limit: usize) -> Vec<(u64, u32)> {
    let mut ranked: Vec<(u64, u32)> = scores
        .into_iter()
        .filter(|(film, score)| *score > 0 && !excluded.contains(film))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(limit);
    ranked
}
