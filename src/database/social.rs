use super::{
    compound_key, decode, encode, ledger::count_prefix, serialize_id, trailing_id, DbError,
    DbResult, TxResult, PRESENT,
};
use crate::model::Notification;
use sled::Transactional;

const FOLLOWS: &[u8] = b"follows";
const FOLLOWERS: &[u8] = b"followers";
const NOTIFICATIONS: &[u8] = b"notifications";

pub trait FollowDb {
    type Error;
    /// Returns whether `follower` follows `followee` afterwards.
    fn toggle_follow(&self, follower: u64, followee: u64) -> Result<bool, Self::Error>;
    fn is_following(&self, follower: u64, followee: u64) -> Result<bool, Self::Error>;
    fn following(&self, user_id: u64) -> Result<Vec<u64>, Self::Error>;
    fn followers(&self, user_id: u64) -> Result<Vec<u64>, Self::Error>;
    fn count_following(&self, user_id: u64) -> Result<usize, Self::Error>;
    fn count_followers(&self, user_id: u64) -> Result<usize, Self::Error>;
}

fn scan_ids(tree: &sled::Tree, owner: u64) -> DbResult<Vec<u64>> {
    tree.scan_prefix(serialize_id(owner))
        .keys()
        .map(|key| trailing_id(key?))
        .collect()
}

impl FollowDb for sled::Db {
    type Error = DbError;

    fn toggle_follow(&self, follower: u64, followee: u64) -> DbResult<bool> {
        let follows = self.open_tree(FOLLOWS)?;
        let followers = self.open_tree(FOLLOWERS)?;
        let forward = compound_key(&[&serialize_id(follower), &serialize_id(followee)]);
        let reverse = compound_key(&[&serialize_id(followee), &serialize_id(follower)]);
        let now_following = (&follows, &followers).transaction(
            |(follows, followers)| -> TxResult<bool> {
                if follows.remove(forward.as_slice())?.is_some() {
                    followers.remove(reverse.as_slice())?;
                    Ok(false)
                } else {
                    follows.insert(forward.as_slice(), PRESENT)?;
                    followers.insert(reverse.as_slice(), PRESENT)?;
                    Ok(true)
                }
            },
        )?;
        Ok(now_following)
    }

    fn is_following(&self, follower: u64, followee: u64) -> DbResult<bool> {
        let follows = self.open_tree(FOLLOWS)?;
        Ok(follows.contains_key(compound_key(&[
            &serialize_id(follower),
            &serialize_id(followee),
        ]))?)
    }

    fn following(&self, user_id: u64) -> DbResult<Vec<u64>> {
        scan_ids(&self.open_tree(FOLLOWS)?, user_id)
    }

    fn followers(&self, user_id: u64) -> DbResult<Vec<u64>> {
        scan_ids(&self.open_tree(FOLLOWERS)?, user_id)
    }

    fn count_following(&self, user_id: u64) -> DbResult<usize> {
        count_prefix(&self.open_tree(FOLLOWS)?, &serialize_id(user_id))
    }

    fn count_followers(&self, user_id: u64) -> DbResult<usize> {
        count_prefix(&self.open_tree(FOLLOWERS)?, &serialize_id(user_id))
    }
}

pub trait NotificationDb {
    type Error;
    fn add_notification(
        &self,
        user_id: u64,
        notification: &Notification,
    ) -> Result<u64, Self::Error>;
    /// Newest first.
    fn notifications(
        &self,
        user_id: u64,
        unread_only: bool,
    ) -> Result<Vec<(u64, Notification)>, Self::Error>;
    /// Returns how many notifications changed.
    fn mark_notifications_read(&self, user_id: u64) -> Result<usize, Self::Error>;
}

impl NotificationDb for sled::Db {
    type Error = DbError;

    fn add_notification(&self, user_id: u64, notification: &Notification) -> DbResult<u64> {
        let notifications = self.open_tree(NOTIFICATIONS)?;
        let id = self.generate_id()?;
        notifications.insert(
            compound_key(&[&serialize_id(user_id), &serialize_id(id)]),
            encode(notification)?,
        )?;
        Ok(id)
    }

    fn notifications(&self, user_id: u64, unread_only: bool) -> DbResult<Vec<(u64, Notification)>> {
        let notifications = self.open_tree(NOTIFICATIONS)?;
        let mut out = Vec::new();
        for entry in notifications.scan_prefix(serialize_id(user_id)).rev() {
            let (key, value) = entry?;
            let notification: Notification = decode(&value)?;
            if unread_only && notification.read {
                continue;
            }
            out.push((trailing_id(&key)?, notification));
        }
        Ok(out)
    }

    fn mark_notifications_read(&self, user_id: u64) -> DbResult<usize> {
        let notifications = self.open_tree(NOTIFICATIONS)?;
        let mut marked = 0;
        for entry in notifications.scan_prefix(serialize_id(user_id)) {
            let (key, value) = entry?;
            let mut notification: Notification = decode(&value)?;
            if notification.read {
                continue;
            }
            notification.read = true;
            // Only swaps that won are counted.
            let swapped = notifications.compare_and_swap(
                &key,
                Some(value),
                Some(encode(&notification)?),
            )?;
            if swapped.is_ok() {
                marked += 1;
            }
        }
        Ok(marked)
    }
}
