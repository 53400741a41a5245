//! BM25 full-text index stored in three sled trees.
//!
//! `tokens` maps a token to its document count and a numeric token id; the
//! empty token counts indexed documents. `frequency` maps
//! `token id ++ document` to the token's count in that document and `doclen`
//! maps a document to its length in tokens (the empty key holds the total).

use crate::database::{abortable, serialize_id, trailing_id, DbError, DbResult, TxResult};
use sled::transaction::TransactionalTree;
use std::collections::HashMap;
use std::convert::TryInto;
use unic_ucd_category::GeneralCategory;

const K1: f32 = 1.2;
const B: f32 = 0.75;

pub fn tokens_iter(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c| !is_token_character(c))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

pub fn is_token_character(c: char) -> bool {
    let category = GeneralCategory::of(c);
    category.is_number() || category.is_letter() || category == GeneralCategory::PrivateUse
}

const FTS_FREQUENCY_POSTFIX: &[u8] = b"_frequency";
const FTS_TOKENS_POSTFIX: &[u8] = b"_tokens";
const FTS_DOCLEN_POSTFIX: &[u8] = b"_doclen";

pub struct FTSTree {
    frequency: sled::Tree,
    tokens: sled::Tree,
    doclen: sled::Tree,
}

pub trait FTSExt {
    fn open_fts<V: AsRef<[u8]>>(&self, name: V) -> sled::Result<FTSTree>;
}

impl FTSExt for sled::Db {
    fn open_fts<V: AsRef<[u8]>>(&self, name: V) -> sled::Result<FTSTree> {
        let open = |postfix: &[u8]| {
            let mut tree_name = name.as_ref().to_vec();
            tree_name.extend_from_slice(postfix);
            self.open_tree(tree_name)
        };
        Ok(FTSTree {
            frequency: open(FTS_FREQUENCY_POSTFIX)?,
            tokens: open(FTS_TOKENS_POSTFIX)?,
            doclen: open(FTS_DOCLEN_POSTFIX)?,
        })
    }
}

fn read_u32(bytes: &[u8]) -> DbResult<u32> {
    let bytes: [u8; 4] = bytes
        .get(0..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| DbError::Corrupt("short fts counter".to_owned()))?;
    Ok(u32::from_le_bytes(bytes))
}

/// Splits a `tokens` value into (document count, token id).
fn read_token(bytes: &[u8]) -> DbResult<(u32, [u8; 8])> {
    let id: [u8; 8] = bytes
        .get(4..12)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| DbError::Corrupt("short fts token".to_owned()))?;
    Ok((read_u32(bytes)?, id))
}

fn token_value(count: u32, id: [u8; 8]) -> Vec<u8> {
    let mut value = count.to_le_bytes().to_vec();
    value.extend_from_slice(&id);
    value
}

fn count_tokens(value: &str) -> (HashMap<String, u32>, u32) {
    let mut token_counts: HashMap<String, u32> = HashMap::new();
    let mut total_count = 0u32;
    for token in tokens_iter(value) {
        *token_counts.entry(token).or_insert(0) += 1;
        total_count += 1;
    }
    (token_counts, total_count)
}

fn mismatch() -> DbError {
    DbError::Corrupt("value does not match indexed document".to_owned())
}

/// The index trees as seen from inside a caller's transaction, so that index
/// updates commit together with the documents they describe.
pub struct FTSTransaction<'a> {
    frequency: &'a TransactionalTree,
    tokens: &'a TransactionalTree,
    doclen: &'a TransactionalTree,
}

impl<'a> FTSTransaction<'a> {
    /// Takes the transactional views of the trees returned by `FTSTree::trees`, in order.
    pub fn new(
        frequency: &'a TransactionalTree,
        tokens: &'a TransactionalTree,
        doclen: &'a TransactionalTree,
    ) -> Self {
        FTSTransaction {
            frequency,
            tokens,
            doclen,
        }
    }

    pub fn insert(&self, document: u64, value: &str) -> TxResult<()> {
        let key = serialize_id(document);
        let (mut token_counts, total_count) = count_tokens(value);
        token_counts.insert(String::new(), 1);
        if self.doclen.insert(&key, &total_count.to_le_bytes())?.is_some() {
            return abortable(Err(DbError::Conflict(format!(
                "document {} is already indexed",
                document
            ))));
        }
        let old_total_dl = match self.doclen.get(&[])? {
            Some(dl) => abortable(read_u32(&dl))?,
            None => 0,
        };
        self.doclen.insert(&[], &(old_total_dl + total_count).to_le_bytes())?;
        for (token, count) in token_counts.iter() {
            let (old_count, id) = match self.tokens.get(token.as_bytes())? {
                Some(old) => abortable(read_token(&old))?,
                None => (0, self.tokens.generate_id()?.to_le_bytes()),
            };
            let mut frequency_key = id.to_vec();
            frequency_key.extend_from_slice(&key);
            self.frequency.insert(frequency_key, &count.to_le_bytes())?;
            self.tokens.insert(token.as_bytes(), token_value(old_count + 1, id))?;
        }
        Ok(())
    }

    /// Removes a document; `value` must be the text it was indexed with.
    pub fn remove(&self, document: u64, value: &str) -> TxResult<()> {
        let key = serialize_id(document);
        let (mut token_counts, total_count) = count_tokens(value);
        token_counts.insert(String::new(), 1);
        let old_total_count = match self.doclen.remove(&key)? {
            Some(count) => count,
            None => return abortable(Err(mismatch())),
        };
        if old_total_count.as_ref() != total_count.to_le_bytes().as_ref() {
            return abortable(Err(mismatch()));
        }
        let old_total_dl = match self.doclen.get(&[])? {
            Some(dl) => abortable(read_u32(&dl))?,
            None => 0,
        };
        self.doclen.insert(&[], &old_total_dl.saturating_sub(total_count).to_le_bytes())?;
        for (token, count) in token_counts.iter() {
            let (old_count, id) = match self.tokens.get(token.as_bytes())? {
                Some(old) => abortable(read_token(&old))?,
                None => return abortable(Err(mismatch())),
            };
            let mut frequency_key = id.to_vec();
            frequency_key.extend_from_slice(&key);
            match self.frequency.remove(frequency_key)? {
                Some(old) if old.as_ref() == count.to_le_bytes().as_ref() => {}
                _ => return abortable(Err(mismatch())),
            }
            self.tokens.insert(token.as_bytes(), token_value(old_count.saturating_sub(1), id))?;
        }
        Ok(())
    }
}

impl FTSTree {
    /// The `(frequency, tokens, doclen)` trees, for joining a multi-tree transaction.
    pub fn trees(&self) -> (&sled::Tree, &sled::Tree, &sled::Tree) {
        (&self.frequency, &self.tokens, &self.doclen)
    }

    /// Scores every document sharing a token with `value`, best first.
    pub fn query(&self, value: &str) -> DbResult<Vec<(u64, f32)>> {
        let (token_counts, _) = count_tokens(value);

        let num_documents = match self.tokens.get("")? {
            Some(data) => read_u32(&data)?,
            None => 0,
        };
        if num_documents == 0 {
            return Ok(Vec::new());
        }
        let total_dl = match self.doclen.get(&[])? {
            Some(dl) => read_u32(&dl)?,
            None => 0,
        };
        let avgdl = total_dl as f32 / num_documents as f32;

        let mut scores: HashMap<u64, f32> = HashMap::new();
        for (token, count) in token_counts {
            let (total_count, id) = match self.tokens.get(token.as_bytes())? {
                Some(token_data) => read_token(&token_data)?,
                None => continue,
            };
            let idf = ((num_documents as f32 - total_count as f32 + 0.5)
                / (total_count as f32 + 0.5)
                + 1.0)
                .ln();
            for entry in self.frequency.scan_prefix(id) {
                let (id_and_key, frequency_data) = entry?;
                let frequency = read_u32(&frequency_data)?;
                let document = trailing_id(&id_and_key)?;
                let dl = match self.doclen.get(serialize_id(document))? {
                    Some(dl) => read_u32(&dl)?,
                    None => 0,
                };
                let bm25 = idf * frequency as f32 * (K1 + 1.0)
                    / (frequency as f32 + K1 * (1.0 - B + B * dl as f32 / avgdl));
                *scores.entry(document).or_insert(0.0) += bm25 * count as f32;
            }
        }

        let mut ranked: Vec<(u64, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(ranked)
    }
}
