use super::{
    abortable, decode, deserialize_id, encode, serialize_id, DbError, DbResult, TxResult,
};
use crate::fts_tree::{FTSExt, FTSTransaction};
use crate::model::Film;
use sled::Transactional;

const FILMS: &[u8] = b"films";
const FILMS_CATALOG: &[u8] = b"films_catalog";
const FILM_TITLES: &[u8] = b"film_titles";

pub trait FilmDb {
    type Error;
    /// Inserts the film or refreshes the one mirrored from the same catalog id.
    /// Returns the film id and, for a refresh, the previous document.
    fn upsert_film(&self, film: &Film) -> Result<(u64, Option<Film>), Self::Error>;
    fn get_film(&self, id: u64) -> Result<Option<Film>, Self::Error>;
    fn get_film_by_catalog_id(&self, catalog_id: u64) -> Result<Option<(u64, Film)>, Self::Error>;
    fn search_films(&self, query: &str, limit: usize) -> Result<Vec<(u64, Film)>, Self::Error>;
}

impl FilmDb for sled::Db {
    type Error = DbError;

    fn upsert_film(&self, film: &Film) -> DbResult<(u64, Option<Film>)> {
        let films = self.open_tree(FILMS)?;
        let catalog = self.open_tree(FILMS_CATALOG)?;
        let titles = self.open_fts(FILM_TITLES)?;
        let (frequency, tokens, doclen) = titles.trees();
        let fresh_id = self.generate_id()?;
        let catalog_key = serialize_id(film.catalog_id);
        let upserted = (&films, &catalog, frequency, tokens, doclen).transaction(
            |(films, catalog, frequency, tokens, doclen)| -> TxResult<(u64, Option<Film>)> {
                let titles = FTSTransaction::new(frequency, tokens, doclen);
                let existing = match catalog.get(catalog_key)? {
                    Some(raw) => Some(abortable(deserialize_id(raw))?),
                    None => None,
                };
                let id = match existing {
                    Some(id) => id,
                    None => {
                        catalog.insert(&catalog_key, &serialize_id(fresh_id))?;
                        films.insert(&serialize_id(fresh_id), abortable(encode(film))?)?;
                        titles.insert(fresh_id, &film.title)?;
                        return Ok((fresh_id, None));
                    }
                };
                let previous: Option<Film> = match films.get(serialize_id(id))? {
                    Some(raw) => Some(abortable(decode(&raw))?),
                    None => None,
                };
                let mut updated = film.clone();
                match &previous {
                    Some(previous) if previous.title == film.title => {
                        updated.created_at = previous.created_at;
                    }
                    Some(previous) => {
                        updated.created_at = previous.created_at;
                        titles.remove(id, &previous.title)?;
                        titles.insert(id, &film.title)?;
                    }
                    None => titles.insert(id, &film.title)?,
                }
                films.insert(&serialize_id(id), abortable(encode(&updated))?)?;
                Ok((id, previous))
            },
        )?;
        Ok(upserted)
    }

    fn get_film(&self, id: u64) -> DbResult<Option<Film>> {
        let films = self.open_tree(FILMS)?;
        films
            .get(serialize_id(id))?
            .map(|raw| decode(&raw))
            .transpose()
    }

    fn get_film_by_catalog_id(&self, catalog_id: u64) -> DbResult<Option<(u64, Film)>> {
        let catalog = self.open_tree(FILMS_CATALOG)?;
        match catalog.get(serialize_id(catalog_id))? {
            Some(raw) => {
                let id = deserialize_id(raw)?;
                let film = self.get_film(id)?.ok_or_else(|| {
                    DbError::Corrupt(format!("bad index films_catalog: {}", catalog_id))
                })?;
                Ok(Some((id, film)))
            }
            None => Ok(None),
        }
    }

    fn search_films(&self, query: &str, limit: usize) -> DbResult<Vec<(u64, Film)>> {
        let titles = self.open_fts(FILM_TITLES)?;
        let mut out = Vec::new();
        for (id, _score) in titles.query(query)?.into_iter().take(limit) {
            if let Some(film) = self.get_film(id)? {
                out.push((id, film));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) fn film(catalog_id: u64, title: &str) -> Film {
    let now = chrono::Utc::now();
    Film {
        catalog_id,
        title: title.to_owned(),
        year: None,
        overview: None,
        poster_path: None,
        runtime_minutes: None,
        genres: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}
