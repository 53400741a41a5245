//! The interaction ledger: who watched, liked or watchlisted which film.
//!
//! Entries live in `interactions` under `user ++ kind ++ film`. The
//! `interactions_by_film` tree mirrors them under `film ++ kind ++ user`.
//! Both trees are only ever written together inside one transaction, so the
//! user-side and film-side views cannot drift apart.

use super::{
    abortable, compound_key, decode, encode, serialize_id, trailing_id, DbError, DbResult,
    TxResult,
};
use crate::model::{Interaction, InteractionKind};
use sled::transaction::TransactionalTree;
use sled::Transactional;

const INTERACTIONS: &[u8] = b"interactions";
const INTERACTIONS_BY_FILM: &[u8] = b"interactions_by_film";

fn entry_key(owner: u64, kind: InteractionKind, other: u64) -> Vec<u8> {
    compound_key(&[&serialize_id(owner), &[kind.tag()], &serialize_id(other)])
}

fn prefix(owner: u64, kind: InteractionKind) -> Vec<u8> {
    compound_key(&[&serialize_id(owner), &[kind.tag()]])
}

/// Opens the `(interactions, interactions_by_film)` pair.
pub(super) fn open_ledger(db: &sled::Db) -> DbResult<(sled::Tree, sled::Tree)> {
    Ok((db.open_tree(INTERACTIONS)?, db.open_tree(INTERACTIONS_BY_FILM)?))
}

/// Both ledger trees inside a caller's transaction.
pub(super) struct LedgerTransaction<'a> {
    by_user: &'a TransactionalTree,
    by_film: &'a TransactionalTree,
}

impl<'a> LedgerTransaction<'a> {
    pub(super) fn new(by_user: &'a TransactionalTree, by_film: &'a TransactionalTree) -> Self {
        LedgerTransaction { by_user, by_film }
    }

    pub(super) fn get(
        &self,
        user_id: u64,
        film_id: u64,
        kind: InteractionKind,
    ) -> TxResult<Option<Interaction>> {
        match self.by_user.get(entry_key(user_id, kind, film_id))? {
            Some(raw) => Ok(Some(abortable(decode(&raw))?)),
            None => Ok(None),
        }
    }

    /// Writes the entry on both sides, returning the one it replaced.
    pub(super) fn record(
        &self,
        user_id: u64,
        film_id: u64,
        kind: InteractionKind,
        entry: &Interaction,
    ) -> TxResult<Option<Interaction>> {
        let encoded = abortable(encode(entry))?;
        let previous = self.by_user.insert(entry_key(user_id, kind, film_id), encoded.as_slice())?;
        self.by_film.insert(entry_key(film_id, kind, user_id), encoded)?;
        match previous {
            Some(raw) => Ok(Some(abortable(decode(&raw))?)),
            None => Ok(None),
        }
    }
}

pub trait InteractionDb {
    type Error;
    /// Removes the entry if present, otherwise records it now.
    /// Returns the new entry, or `None` if it was removed.
    fn toggle_interaction(
        &self,
        user_id: u64,
        film_id: u64,
        kind: InteractionKind,
    ) -> Result<Option<Interaction>, Self::Error>;
    fn get_interaction(
        &self,
        user_id: u64,
        film_id: u64,
        kind: InteractionKind,
    ) -> Result<Option<Interaction>, Self::Error>;
    /// The user's entries of one kind, newest first, as (film, entry).
    fn user_interactions(
        &self,
        user_id: u64,
        kind: InteractionKind,
    ) -> Result<Vec<(u64, Interaction)>, Self::Error>;
    /// The film's entries of one kind, newest first, as (user, entry).
    fn film_interactions(
        &self,
        film_id: u64,
        kind: InteractionKind,
    ) -> Result<Vec<(u64, Interaction)>, Self::Error>;
    fn count_user_interactions(
        &self,
        user_id: u64,
        kind: InteractionKind,
    ) -> Result<usize, Self::Error>;
    fn count_film_interactions(
        &self,
        film_id: u64,
        kind: InteractionKind,
    ) -> Result<usize, Self::Error>;
}

fn scan_entries(tree: &sled::Tree, prefix: &[u8]) -> DbResult<Vec<(u64, Interaction)>> {
    let mut entries = tree
        .scan_prefix(prefix)
        .map(|entry| {
            let (key, value) = entry?;
            Ok((trailing_id(&key)?, decode::<Interaction>(&value)?))
        })
        .collect::<DbResult<Vec<_>>>()?;
    entries.sort_by(|a, b| b.1.at.cmp(&a.1.at).then(b.0.cmp(&a.0)));
    Ok(entries)
}

impl InteractionDb for sled::Db {
    type Error = DbError;

    fn toggle_interaction(
        &self,
        user_id: u64,
        film_id: u64,
        kind: InteractionKind,
    ) -> DbResult<Option<Interaction>> {
        let by_user = self.open_tree(INTERACTIONS)?;
        let by_film = self.open_tree(INTERACTIONS_BY_FILM)?;
        let user_key = entry_key(user_id, kind, film_id);
        let film_key = entry_key(film_id, kind, user_id);
        let entry = Interaction {
            at: chrono::Utc::now(),
            rewatch: false,
        };
        let encoded = encode(&entry)?;
        let added = (&by_user, &by_film).transaction(|(by_user, by_film)| -> TxResult<bool> {
            if by_user.remove(user_key.as_slice())?.is_some() {
                by_film.remove(film_key.as_slice())?;
                Ok(false)
            } else {
                by_user.insert(user_key.as_slice(), encoded.as_slice())?;
                by_film.insert(film_key.as_slice(), encoded.as_slice())?;
                Ok(true)
            }
        })?;
        log::debug!(
            "user {} {} film {}: {}",
            user_id,
            if added { "added" } else { "removed" },
            film_id,
            kind
        );
        Ok(if added { Some(entry) } else { None })
    }

    fn get_interaction(
        &self,
        user_id: u64,
        film_id: u64,
        kind: InteractionKind,
    ) -> DbResult<Option<Interaction>> {
        let by_user = self.open_tree(INTERACTIONS)?;
        by_user
            .get(entry_key(user_id, kind, film_id))?
            .map(|raw| decode(&raw))
            .transpose()
    }

    fn user_interactions(
        &self,
        user_id: u64,
        kind: InteractionKind,
    ) -> DbResult<Vec<(u64, Interaction)>> {
        scan_entries(&self.open_tree(INTERACTIONS)?, &prefix(user_id, kind))
    }

    fn film_interactions(
        &self,
        film_id: u64,
        kind: InteractionKind,
    ) -> DbResult<Vec<(u64, Interaction)>> {
        scan_entries(&self.open_tree(INTERACTIONS_BY_FILM)?, &prefix(film_id, kind))
    }

    fn count_user_interactions(&self, user_id: u64, kind: InteractionKind) -> DbResult<usize> {
        let tree = self.open_tree(INTERACTIONS)?;
        count_prefix(&tree, &prefix(user_id, kind))
    }

    fn count_film_interactions(&self, film_id: u64, kind: InteractionKind) -> DbResult<usize> {
        let tree = self.open_tree(INTERACTIONS_BY_FILM)?;
        count_prefix(&tree, &prefix(film_id, kind))
    }
}

pub(crate) fn count_prefix(tree: &sled::Tree, prefix: &[u8]) -> DbResult<usize> {
    let mut count = 0;
    for entry in tree.scan_prefix(prefix).keys() {
        entry?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::temporary;

    fn record(
        db: &sled::Db,
        user_id: u64,
        film_id: u64,
        kind: InteractionKind,
        entry: Interaction,
    ) -> DbResult<Option<Interaction>> {
        let (by_user, by_film) = open_ledger(db)?;
        (&by_user, &by_film)
            .transaction(|(by_user, by_film)| {
                LedgerTransaction::new(by_user, by_film).record(user_id, film_id, kind, &entry)
            })
            .map_err(DbError::from)
    }

    #[test]
    fn toggle_twice_restores_state() {
        let db = temporary();
        let added = db
            .toggle_interaction(1, 10, InteractionKind::Liked)
            .unwrap();
        assert!(added.is_some());
        assert_eq!(db.count_film_interactions(10, InteractionKind::Liked).unwrap(), 1);
        assert_eq!(db.count_user_interactions(1, InteractionKind::Liked).unwrap(), 1);

        let removed = db
            .toggle_interaction(1, 10, InteractionKind::Liked)
            .unwrap();
        assert_eq!(removed, None);
        assert_eq!(db.count_film_interactions(10, InteractionKind::Liked).unwrap(), 0);
        assert_eq!(db.count_user_interactions(1, InteractionKind::Liked).unwrap(), 0);
        assert_eq!(db.get_interaction(1, 10, InteractionKind::Liked).unwrap(), None);
    }

    #[test]
    fn kinds_are_independent() {
        let db = temporary();
        db.toggle_interaction(1, 10, InteractionKind::Watched).unwrap();
        db.toggle_interaction(1, 10, InteractionKind::Watchlist).unwrap();
        assert!(db
            .get_interaction(1, 10, InteractionKind::Watched)
            .unwrap()
            .is_some());
        assert_eq!(db.get_interaction(1, 10, InteractionKind::Liked).unwrap(), None);
        assert_eq!(db.user_interactions(1, InteractionKind::Watchlist).unwrap().len(), 1);
    }

    #[test]
    fn both_sides_agree() {
        let db = temporary();
        for user in 1..=3 {
            db.toggle_interaction(user, 10, InteractionKind::Watched).unwrap();
        }
        db.toggle_interaction(2, 11, InteractionKind::Watched).unwrap();

        let users: Vec<u64> = db
            .film_interactions(10, InteractionKind::Watched)
            .unwrap()
            .into_iter()
            .map(|(user, _)| user)
            .collect();
        assert_eq!(users.len(), 3);
        for user in users {
            assert!(db
                .get_interaction(user, 10, InteractionKind::Watched)
                .unwrap()
                .is_some());
        }
        let films: Vec<u64> = db
            .user_interactions(2, InteractionKind::Watched)
            .unwrap()
            .into_iter()
            .map(|(film, _)| film)
            .collect();
        assert_eq!(films.len(), 2);
        assert!(films.contains(&10) && films.contains(&11));
    }

    #[test]
    fn record_replaces_entry() {
        let db = temporary();
        let first = db
            .toggle_interaction(5, 20, InteractionKind::Watched)
            .unwrap()
            .unwrap();
        let rewatch = Interaction {
            at: first.at + chrono::Duration::days(1),
            rewatch: true,
        };
        let previous = record(&db, 5, 20, InteractionKind::Watched, rewatch).unwrap();
        assert_eq!(previous, Some(first));
        let film_side = db.film_interactions(20, InteractionKind::Watched).unwrap();
        assert_eq!(film_side, vec![(5, rewatch)]);
    }

    #[test]
    fn entries_are_newest_first() {
        let db = temporary();
        let base = chrono::Utc::now();
        for (film, days) in [(1u64, 3i64), (2, 1), (3, 2)] {
            let entry = Interaction {
                at: base + chrono::Duration::days(days),
                rewatch: false,
            };
            record(&db, 9, film, InteractionKind::Liked, entry).unwrap();
        }
        let order: Vec<u64> = db
            .user_interactions(9, InteractionKind::Liked)
            .unwrap()
            .into_iter()
            .map(|(film, _)| film)
            .collect();
        assert_eq!(order, vec![1, 3, 2]);
    }
}
