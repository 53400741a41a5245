use crate::model::*;
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use std::convert::TryInto;
use thiserror::Error;

mod chat;
mod films;
mod ledger;
mod lists;
mod reviews;
mod social;

pub use chat::ChatDb;
pub use films::FilmDb;
pub use ledger::InteractionDb;
pub use lists::ListDb;
pub use reviews::ReviewDb;
pub use social::{FollowDb, NotificationDb};

#[cfg(test)]
pub(crate) use films::film;
#[cfg(test)]
pub(crate) use reviews::review;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("encoding error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),
}

impl From<TransactionError<DbError>> for DbError {
    fn from(err: TransactionError<DbError>) -> Self {
        match err {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => DbError::Storage(err),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Value stored in pure index trees.
pub(crate) const PRESENT: &[u8] = &[];

pub(crate) type TxResult<T> = Result<T, ConflictableTransactionError<DbError>>;

/// Lifts a store error into a transaction body, aborting the transaction.
pub(crate) fn abortable<T>(result: DbResult<T>) -> TxResult<T> {
    result.map_err(ConflictableTransactionError::Abort)
}

// Big-endian so tree iteration follows id order.
pub(crate) fn serialize_id(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

pub(crate) fn deserialize_id<V: AsRef<[u8]>>(id: V) -> DbResult<u64> {
    let bytes: [u8; 8] = id
        .as_ref()
        .try_into()
        .map_err(|_| DbError::Corrupt(format!("bad id length {}", id.as_ref().len())))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Reads the id stored in the last eight bytes of a compound key.
pub(crate) fn trailing_id<V: AsRef<[u8]>>(key: V) -> DbResult<u64> {
    let key = key.as_ref();
    if key.len() < 8 {
        return Err(DbError::Corrupt(format!("bad key length {}", key.len())));
    }
    deserialize_id(&key[key.len() - 8..])
}

pub(crate) fn compound_key(parts: &[&[u8]]) -> Vec<u8> {
    parts.iter().flat_map(|part| part.iter().copied()).collect()
}

pub(crate) fn encode<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Loads every document whose id is the trailing part of a key under `prefix` in `index`.
pub(crate) fn load_indexed<T: DeserializeOwned>(
    index: &sled::Tree,
    documents: &sled::Tree,
    prefix: &[u8],
) -> DbResult<Vec<(u64, T)>> {
    let mut out = Vec::new();
    for entry in index.scan_prefix(prefix) {
        let (key, _) = entry?;
        let id = trailing_id(&key)?;
        match documents.get(serialize_id(id))? {
            Some(raw) => out.push((id, decode(&raw)?)),
            None => log::warn!("dangling index entry for document {}", id),
        }
    }
    Ok(out)
}

pub trait UserDb {
    type Error;
    /// Returns `None` when the username is already taken.
    fn add_user(&self, user: &User) -> Result<Option<u64>, Self::Error>;
    fn get_user(&self, id: u64) -> Result<Option<User>, Self::Error>;
    fn get_user_by_username(&self, username: &str) -> Result<Option<(u64, User)>, Self::Error>;
    /// Applies `edit` to the stored user atomically and returns the result.
    /// `edit` may run more than once.
    fn modify_user<F>(&self, id: u64, edit: F) -> Result<User, Self::Error>
    where
        F: Fn(&mut User) -> Result<(), Self::Error>;
}

const USERS: &[u8] = b"users";
const USERS_USERNAME: &[u8] = b"users_username";

fn username_key(username: &str) -> String {
    username.to_lowercase()
}

impl UserDb for sled::Db {
    type Error = DbError;

    fn add_user(&self, user: &User) -> DbResult<Option<u64>> {
        let users = self.open_tree(USERS)?;
        let users_username = self.open_tree(USERS_USERNAME)?;
        let id = self.generate_id()?;
        let encoded = encode(user)?;
        let name = username_key(&user.username);
        let added = (&users, &users_username).transaction(
            |(users, users_username)| -> TxResult<bool> {
                if users_username.get(name.as_bytes())?.is_some() {
                    return Ok(false);
                }
                users_username.insert(name.as_bytes(), &serialize_id(id))?;
                users.insert(&serialize_id(id), encoded.as_slice())?;
                Ok(true)
            },
        )?;
        Ok(if added { Some(id) } else { None })
    }

    fn get_user(&self, id: u64) -> DbResult<Option<User>> {
        let users = self.open_tree(USERS)?;
        users
            .get(serialize_id(id))?
            .map(|raw| decode(&raw))
            .transpose()
    }

    fn get_user_by_username(&self, username: &str) -> DbResult<Option<(u64, User)>> {
        let users_username = self.open_tree(USERS_USERNAME)?;
        let users = self.open_tree(USERS)?;
        if let Some(id) = users_username.get(username_key(username).as_bytes())? {
            let raw = users.get(&id)?.ok_or_else(|| {
                DbError::Corrupt(format!("bad index users_username: {}", username))
            })?;
            Ok(Some((deserialize_id(id)?, decode(&raw)?)))
        } else {
            Ok(None)
        }
    }

    fn modify_user<F>(&self, id: u64, edit: F) -> DbResult<User>
    where
        F: Fn(&mut User) -> Result<(), Self::Error>,
    {
        let users = self.open_tree(USERS)?;
        users
            .transaction(|users| -> TxResult<User> {
                let mut user: User = match users.get(serialize_id(id))? {
                    Some(raw) => abortable(decode(&raw))?,
                    None => {
                        return abortable(Err(DbError::NotFound(format!(
                            "user {} not found",
                            id
                        ))))
                    }
                };
                abortable(edit(&mut user))?;
                users.insert(&serialize_id(id), abortable(encode(&user))?)?;
                Ok(user)
            })
            .map_err(DbError::from)
    }
}

#[cfg(test)]
pub(crate) fn temporary() -> sled::Db {
    sled::Config::new().temporary(true).open().unwrap()
}
