use super::ledger::{open_ledger, LedgerTransaction};
use super::{
    abortable, compound_key, decode, encode, load_indexed, serialize_id, DbError, DbResult,
    TxResult, PRESENT,
};
use crate::model::{Interaction, InteractionKind, Review};
use sled::Transactional;

const REVIEWS: &[u8] = b"reviews";
const REVIEWS_BY_USER: &[u8] = b"reviews_by_user";
const REVIEWS_BY_FILM: &[u8] = b"reviews_by_film";

pub trait ReviewDb {
    type Error;
    /// Stores a new diary entry and logs the viewing in the ledger, all in one
    /// transaction. The stored `rewatch` is true when the film was already
    /// watched. A liked review also likes the film if it is not liked yet.
    fn log_review(&self, review: &Review) -> Result<(u64, Review), Self::Error>;
    fn get_review(&self, id: u64) -> Result<Option<Review>, Self::Error>;
    /// The review's user and film must not change.
    fn update_review(&self, id: u64, review: &Review) -> Result<(), Self::Error>;
    fn delete_review(&self, id: u64) -> Result<Option<Review>, Self::Error>;
    /// Oldest first.
    fn user_reviews(&self, user_id: u64) -> Result<Vec<(u64, Review)>, Self::Error>;
    /// Oldest first.
    fn film_reviews(&self, film_id: u64) -> Result<Vec<(u64, Review)>, Self::Error>;
}

impl ReviewDb for sled::Db {
    type Error = DbError;

    fn log_review(&self, review: &Review) -> DbResult<(u64, Review)> {
        let reviews = self.open_tree(REVIEWS)?;
        let by_user = self.open_tree(REVIEWS_BY_USER)?;
        let by_film = self.open_tree(REVIEWS_BY_FILM)?;
        let (ledger_user, ledger_film) = open_ledger(self)?;
        let id = self.generate_id()?;
        let (user_id, film_id) = (review.user_id, review.film_id);
        let user_key = compound_key(&[&serialize_id(user_id), &serialize_id(id)]);
        let film_key = compound_key(&[&serialize_id(film_id), &serialize_id(id)]);
        let trees = (&reviews, &by_user, &by_film, &ledger_user, &ledger_film);
        let stored = trees.transaction(
            |(reviews, by_user, by_film, ledger_user, ledger_film)| -> TxResult<Review> {
                let ledger = LedgerTransaction::new(ledger_user, ledger_film);
                let mut stored = review.clone();
                let watched = ledger.get(user_id, film_id, InteractionKind::Watched)?;
                stored.rewatch = watched.is_some();
                reviews.insert(&serialize_id(id), abortable(encode(&stored))?)?;
                by_user.insert(user_key.as_slice(), PRESENT)?;
                by_film.insert(film_key.as_slice(), PRESENT)?;

                let viewing = Interaction {
                    at: stored.created_at,
                    rewatch: stored.rewatch,
                };
                ledger.record(user_id, film_id, InteractionKind::Watched, &viewing)?;
                let liked = ledger.get(user_id, film_id, InteractionKind::Liked)?;
                if stored.liked && liked.is_none() {
                    let like = Interaction {
                        at: stored.created_at,
                        rewatch: false,
                    };
                    ledger.record(user_id, film_id, InteractionKind::Liked, &like)?;
                }
                Ok(stored)
            },
        )?;
        Ok((id, stored))
    }

    fn get_review(&self, id: u64) -> DbResult<Option<Review>> {
        let reviews = self.open_tree(REVIEWS)?;
        reviews
            .get(serialize_id(id))?
            .map(|raw| decode(&raw))
            .transpose()
    }

    fn update_review(&self, id: u64, review: &Review) -> DbResult<()> {
        let reviews = self.open_tree(REVIEWS)?;
        let encoded = encode(review)?;
        reviews
            .transaction(|reviews| -> TxResult<()> {
                let existing: Review = match reviews.get(serialize_id(id))? {
                    Some(raw) => abortable(decode(&raw))?,
                    None => {
                        return abortable(Err(DbError::NotFound(format!(
                            "review {} not found",
                            id
                        ))))
                    }
                };
                if existing.user_id != review.user_id || existing.film_id != review.film_id {
                    return abortable(Err(DbError::Conflict(format!(
                        "review {} cannot change owner or film",
                        id
                    ))));
                }
                reviews.insert(&serialize_id(id), encoded.as_slice())?;
                Ok(())
            })
            .map_err(DbError::from)
    }

    fn delete_review(&self, id: u64) -> DbResult<Option<Review>> {
        let reviews = self.open_tree(REVIEWS)?;
        let by_user = self.open_tree(REVIEWS_BY_USER)?;
        let by_film = self.open_tree(REVIEWS_BY_FILM)?;
        let removed = (&reviews, &by_user, &by_film).transaction(
            |(reviews, by_user, by_film)| -> TxResult<Option<Review>> {
                let review: Review = match reviews.remove(&serialize_id(id))? {
                    Some(raw) => abortable(decode(&raw))?,
                    None => return Ok(None),
                };
                by_user.remove(compound_key(&[&serialize_id(review.user_id), &serialize_id(id)]))?;
                by_film.remove(compound_key(&[&serialize_id(review.film_id), &serialize_id(id)]))?;
                Ok(Some(review))
            },
        )?;
        Ok(removed)
    }

    fn user_reviews(&self, user_id: u64) -> DbResult<Vec<(u64, Review)>> {
        load_indexed(
            &self.open_tree(REVIEWS_BY_USER)?,
            &self.open_tree(REVIEWS)?,
            &serialize_id(user_id),
        )
    }

    fn film_reviews(&self, film_id: u64) -> DbResult<Vec<(u64, Review)>> {
        load_indexed(
            &self.open_tree(REVIEWS_BY_FILM)?,
            &self.open_tree(REVIEWS)?,
            &serialize_id(film_id),
        )
    }
}

#[cfg(test)]
pub(crate) fn review(user_id: u64, film_id: u64, rating: Option<u8>) -> Review {
    let now = chrono::Utc::now();
    Review {
        user_id,
        film_id,
        rating,
        content: None,
        watched_on: now.date_naive(),
        rewatch: false,
        liked: false,
        spoilers: false,
        created_at: now,
        updated_at: now,
    }
}
