use super::{
    abortable, compound_key, decode, encode, load_indexed, serialize_id, DbError, DbResult,
    TxResult, PRESENT,
};
use crate::model::FilmList;
use sled::Transactional;

const LISTS: &[u8] = b"lists";
const LISTS_BY_OWNER: &[u8] = b"lists_by_owner";

pub trait ListDb {
    type Error;
    fn add_list(&self, list: &FilmList) -> Result<u64, Self::Error>;
    fn get_list(&self, id: u64) -> Result<Option<FilmList>, Self::Error>;
    /// Applies `edit` to the stored list atomically and returns the result.
    /// `edit` may run more than once.
    fn modify_list<F>(&self, id: u64, edit: F) -> Result<FilmList, Self::Error>
    where
        F: Fn(&mut FilmList) -> Result<(), Self::Error>;
    fn delete_list(&self, id: u64) -> Result<Option<FilmList>, Self::Error>;
    /// Newest first.
    fn user_lists(&self, owner_id: u64) -> Result<Vec<(u64, FilmList)>, Self::Error>;
}

impl ListDb for sled::Db {
    type Error = DbError;

    fn add_list(&self, list: &FilmList) -> DbResult<u64> {
        let lists = self.open_tree(LISTS)?;
        let by_owner = self.open_tree(LISTS_BY_OWNER)?;
        let id = self.generate_id()?;
        let encoded = encode(list)?;
        let owner_key = compound_key(&[&serialize_id(list.owner_id), &serialize_id(id)]);
        (&lists, &by_owner).transaction(|(lists, by_owner)| -> TxResult<()> {
            lists.insert(&serialize_id(id), encoded.as_slice())?;
            by_owner.insert(owner_key.as_slice(), PRESENT)?;
            Ok(())
        })?;
        Ok(id)
    }

    fn get_list(&self, id: u64) -> DbResult<Option<FilmList>> {
        let lists = self.open_tree(LISTS)?;
        lists
            .get(serialize_id(id))?
            .map(|raw| decode(&raw))
            .transpose()
    }

    fn modify_list<F>(&self, id: u64, edit: F) -> DbResult<FilmList>
    where
        F: Fn(&mut FilmList) -> Result<(), Self::Error>,
    {
        let lists = self.open_tree(LISTS)?;
        lists
            .transaction(|lists| -> TxResult<FilmList> {
                let mut list: FilmList = match lists.get(serialize_id(id))? {
                    Some(raw) => abortable(decode(&raw))?,
                    None => {
                        return abortable(Err(DbError::NotFound(format!(
                            "list {} not found",
                            id
                        ))))
                    }
                };
                abortable(edit(&mut list))?;
                list.updated_at = chrono::Utc::now();
                lists.insert(&serialize_id(id), abortable(encode(&list))?)?;
                Ok(list)
            })
            .map_err(DbError::from)
    }

    fn delete_list(&self, id: u64) -> DbResult<Option<FilmList>> {
        let lists = self.open_tree(LISTS)?;
        let by_owner = self.open_tree(LISTS_BY_OWNER)?;
        let removed = (&lists, &by_owner).transaction(
            |(lists, by_owner)| -> TxResult<Option<FilmList>> {
                let list: FilmList = match lists.remove(&serialize_id(id))? {
                    Some(raw) => abortable(decode(&raw))?,
                    None => return Ok(None),
                };
                by_owner.remove(compound_key(&[&serialize_id(list.owner_id), &serialize_id(id)]))?;
                Ok(Some(list))
            },
        )?;
        Ok(removed)
    }

    fn user_lists(&self, owner_id: u64) -> DbResult<Vec<(u64, FilmList)>> {
        let mut lists = load_indexed(
            &self.open_tree(LISTS_BY_OWNER)?,
            &self.open_tree(LISTS)?,
            &serialize_id(owner_id),
        )?;
        lists.reverse();
        Ok(lists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::temporary;

    fn list(owner_id: u64, title: &str, film_ids: Vec<u64>) -> FilmList {
        let now = chrono::Utc::now();
        FilmList {
            owner_id,
            title: title.to_owned(),
            description: None,
            ranked: false,
            film_ids,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn lists_by_owner_newest_first() {
        let db = temporary();
        let older = db.add_list(&list(1, "Noir", vec![])).unwrap();
        let newer = db.add_list(&list(1, "Giallo", vec![])).unwrap();
        db.add_list(&list(2, "Someone else's", vec![])).unwrap();
        let ids: Vec<u64> = db.user_lists(1).unwrap().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![newer, older]);
    }

    #[test]
    fn failed_edit_leaves_list_untouched() {
        let db = temporary();
        let id = db.add_list(&list(1, "Heists", vec![3, 4])).unwrap();
        let err = db
            .modify_list(id, |list| {
                list.film_ids.push(5);
                Err(DbError::Conflict("nope".to_owned()))
            })
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
        assert_eq!(db.get_list(id).unwrap().unwrap().film_ids, vec![3, 4]);

        let edited = db.modify_list(id, |list| {
            list.film_ids.push(5);
            Ok(())
        });
        assert_eq!(edited.unwrap().film_ids, vec![3, 4, 5]);
    }

    #[test]
    fn delete_removes_from_owner_index() {
        let db = temporary();
        let id = db.add_list(&list(1, "Heists", vec![])).unwrap();
        assert_eq!(db.delete_list(id).unwrap().unwrap().title, "Heists");
        assert!(db.user_lists(1).unwrap().is_empty());
        assert!(matches!(
            db.modify_list(id, |_| Ok(())),
            Err(DbError::NotFound(_))
        ));
    }
}
