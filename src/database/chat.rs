use super::{
    abortable, compound_key, decode, deserialize_id, encode, load_indexed, serialize_id,
    trailing_id, DbError, DbResult, TxResult, PRESENT,
};
use crate::model::{Conversation, Message};
use sled::Transactional;

const CONVERSATIONS: &[u8] = b"conversations";
const CONVERSATIONS_BY_USER: &[u8] = b"conversations_by_user";
const CONVERSATION_PAIRS: &[u8] = b"conversation_pairs";
const MESSAGES: &[u8] = b"messages";

pub trait ChatDb {
    type Error;
    /// Finds or creates the direct conversation between two users.
    /// The flag is true when the conversation was created.
    fn direct_conversation(&self, a: u64, b: u64) -> Result<(u64, Conversation, bool), Self::Error>;
    fn get_conversation(&self, id: u64) -> Result<Option<Conversation>, Self::Error>;
    fn user_conversations(&self, user_id: u64) -> Result<Vec<(u64, Conversation)>, Self::Error>;
    /// Appends a message, bumping the conversation's activity time and the
    /// sender's read marker.
    fn add_message(&self, message: &Message) -> Result<u64, Self::Error>;
    /// Up to `limit` messages older than `before`, oldest first.
    fn messages(
        &self,
        conversation_id: u64,
        before: Option<u64>,
        limit: usize,
    ) -> Result<Vec<(u64, Message)>, Self::Error>;
    fn last_message(&self, conversation_id: u64) -> Result<Option<(u64, Message)>, Self::Error>;
    /// Messages newer than `user_id`'s read marker that someone else sent.
    fn unread_count(&self, conversation_id: u64, user_id: u64) -> Result<usize, Self::Error>;
    /// Moves the user's read marker to the newest message.
    fn mark_read(&self, conversation_id: u64, user_id: u64) -> Result<Conversation, Self::Error>;
}

fn pair_key(a: u64, b: u64) -> Vec<u8> {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    compound_key(&[&serialize_id(low), &serialize_id(high)])
}

fn set_last_read(conversation: &mut Conversation, user_id: u64, message_id: u64) {
    match conversation
        .last_read
        .iter_mut()
        .find(|(participant, _)| *participant == user_id)
    {
        Some(entry) => entry.1 = entry.1.max(message_id),
        None => conversation.last_read.push((user_id, message_id)),
    }
}

impl ChatDb for sled::Db {
    type Error = DbError;

    fn direct_conversation(&self, a: u64, b: u64) -> DbResult<(u64, Conversation, bool)> {
        let conversations = self.open_tree(CONVERSATIONS)?;
        let by_user = self.open_tree(CONVERSATIONS_BY_USER)?;
        let pairs = self.open_tree(CONVERSATION_PAIRS)?;
        let fresh_id = self.generate_id()?;
        let now = chrono::Utc::now();
        let mut participants = vec![a, b];
        participants.sort_unstable();
        participants.dedup();
        let fresh = Conversation {
            participants,
            last_read: Vec::new(),
            created_at: now,
            last_message_at: now,
        };
        let encoded = encode(&fresh)?;
        let pair = pair_key(a, b);

        (&conversations, &by_user, &pairs)
            .transaction(
                |(conversations, by_user, pairs)| -> TxResult<(u64, Conversation, bool)> {
                    if let Some(raw) = pairs.get(pair.as_slice())? {
                        let id = abortable(deserialize_id(raw))?;
                        let existing = match conversations.get(serialize_id(id))? {
                            Some(raw) => abortable(decode(&raw))?,
                            None => {
                                return abortable(Err(DbError::Corrupt(format!(
                                    "bad index conversation_pairs: {}",
                                    id
                                ))))
                            }
                        };
                        return Ok((id, existing, false));
                    }
                    pairs.insert(pair.as_slice(), &serialize_id(fresh_id))?;
                    conversations.insert(&serialize_id(fresh_id), encoded.as_slice())?;
                    for participant in &fresh.participants {
                        by_user.insert(
                            compound_key(&[&serialize_id(*participant), &serialize_id(fresh_id)]),
                            PRESENT,
                        )?;
                    }
                    Ok((fresh_id, fresh.clone(), true))
                },
            )
            .map_err(DbError::from)
    }

    fn get_conversation(&self, id: u64) -> DbResult<Option<Conversation>> {
        let conversations = self.open_tree(CONVERSATIONS)?;
        conversations
            .get(serialize_id(id))?
            .map(|raw| decode(&raw))
            .transpose()
    }

    fn user_conversations(&self, user_id: u64) -> DbResult<Vec<(u64, Conversation)>> {
        let mut conversations: Vec<(u64, Conversation)> = load_indexed(
            &self.open_tree(CONVERSATIONS_BY_USER)?,
            &self.open_tree(CONVERSATIONS)?,
            &serialize_id(user_id),
        )?;
        conversations.sort_by(|a, b| {
            b.1.last_message_at
                .cmp(&a.1.last_message_at)
                .then(b.0.cmp(&a.0))
        });
        Ok(conversations)
    }

    fn add_message(&self, message: &Message) -> DbResult<u64> {
        let conversations = self.open_tree(CONVERSATIONS)?;
        let messages = self.open_tree(MESSAGES)?;
        let id = self.generate_id()?;
        let encoded = encode(message)?;
        let conversation_key = serialize_id(message.conversation_id);
        let message_key = compound_key(&[&conversation_key, &serialize_id(id)]);
        (&conversations, &messages).transaction(|(conversations, messages)| -> TxResult<()> {
            let mut conversation: Conversation = match conversations.get(conversation_key)? {
                Some(raw) => abortable(decode(&raw))?,
                None => {
                    return abortable(Err(DbError::NotFound(format!(
                        "conversation {} not found",
                        message.conversation_id
                    ))))
                }
            };
            conversation.last_message_at = message.sent_at;
            set_last_read(&mut conversation, message.sender_id, id);
            conversations.insert(&conversation_key, abortable(encode(&conversation))?)?;
            messages.insert(message_key.as_slice(), encoded.as_slice())?;
            Ok(())
        })?;
        Ok(id)
    }

    fn messages(
        &self,
        conversation_id: u64,
        before: Option<u64>,
        limit: usize,
    ) -> DbResult<Vec<(u64, Message)>> {
        let messages = self.open_tree(MESSAGES)?;
        let prefix = serialize_id(conversation_id);
        let mut out = Vec::new();
        for entry in messages.scan_prefix(prefix).rev() {
            if out.len() >= limit {
                break;
            }
            let (key, value) = entry?;
            let id = trailing_id(&key)?;
            if before.map_or(false, |before| id >= before) {
                continue;
            }
            out.push((id, decode(&value)?));
        }
        out.reverse();
        Ok(out)
    }

    fn last_message(&self, conversation_id: u64) -> DbResult<Option<(u64, Message)>> {
        Ok(self.messages(conversation_id, None, 1)?.pop())
    }

    fn unread_count(&self, conversation_id: u64, user_id: u64) -> DbResult<usize> {
        let conversation = self.get_conversation(conversation_id)?.ok_or_else(|| {
            DbError::NotFound(format!("conversation {} not found", conversation_id))
        })?;
        let last_read = conversation.last_read_by(user_id);
        let messages = self.open_tree(MESSAGES)?;
        let prefix = serialize_id(conversation_id);
        let mut count = 0;
        for entry in messages.scan_prefix(prefix).rev() {
            let (key, value) = entry?;
            if trailing_id(&key)? <= last_read {
                break;
            }
            let message: Message = decode(&value)?;
            if message.sender_id != user_id {
                count += 1;
            }
        }
        Ok(count)
    }

    fn mark_read(&self, conversation_id: u64, user_id: u64) -> DbResult<Conversation> {
        let conversations = self.open_tree(CONVERSATIONS)?;
        let messages = self.open_tree(MESSAGES)?;
        let conversation_key = serialize_id(conversation_id);
        let newest = match messages.scan_prefix(conversation_key).keys().next_back() {
            Some(key) => trailing_id(key?)?,
            None => 0,
        };
        conversations
            .transaction(|conversations| -> TxResult<Conversation> {
                let mut conversation: Conversation = match conversations.get(conversation_key)? {
                    Some(raw) => abortable(decode(&raw))?,
                    None => {
                        return abortable(Err(DbError::NotFound(format!(
                            "conversation {} not found",
                            conversation_id
                        ))))
                    }
                };
                set_last_read(&mut conversation, user_id, newest);
                conversations.insert(&conversation_key, abortable(encode(&conversation))?)?;
                Ok(conversation)
            })
            .map_err(DbError::from)
    }
}
