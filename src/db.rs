//! Local database backend
//!
//! Read-only access to the survey's relational mirror: one spatial-index
//! ordered row table per entity kind plus a sibling key/value header table
//! per extension. Rows are re-sorted numerically by `spaxel_index` after
//! fetching. Storage order happens to match raster order in practice but
//! is not guaranteed, so the re-sort is mandatory.

use crate::error::{MangaError, Result};
use crate::header::{CardValue, Header};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::Path;

/// Metadata row for one observed object
#[derive(Debug, Clone)]
pub struct CubeRow {
    pub plateifu: String,
    pub mangaid: Option<String>,
    pub ra: f64,
    pub dec: f64,
    pub nx: usize,
    pub ny: usize,
    pub nwave: usize,
    pub wave: Vec<f64>,
}

/// One spaxel row of the cube table, spectra decoded from BLOB columns
#[derive(Debug, Clone)]
pub struct SpaxelRow {
    pub spaxel_index: i64,
    pub flux: Vec<f32>,
    pub ivar: Option<Vec<f32>>,
    pub mask: Option<Vec<i32>>,
}

/// One spaxel row of the maps table
#[derive(Debug, Clone, Copy)]
pub struct MapRow {
    pub spaxel_index: i64,
    pub value: f64,
    pub ivar: Option<f64>,
    pub mask: Option<f64>,
}

/// An open read-only database session, scoped to one load operation
pub struct DbStore {
    conn: Connection,
}

/// Classify a DB-layer error for an entity fetch. Zero rows is a distinct,
/// stable condition; anything else is preserved under an "Unknown
/// exception" label instead of being discarded.
pub(crate) fn classify_db_error(entity: &str, plateifu: &str, err: rusqlite::Error) -> MangaError {
    match err {
        rusqlite::Error::QueryReturnedNoRows => MangaError::NotFound(format!(
            "Could not retrieve {} for plate-ifu {}: No Results Found",
            entity, plateifu
        )),
        other => MangaError::Db(format!(
            "Could not retrieve {} for plate-ifu {}: Unknown exception: {}",
            entity, plateifu, other
        )),
    }
}

/// Session-open and probe errors, raised without entity context
fn db_err(err: rusqlite::Error) -> MangaError {
    MangaError::Db(err.to_string())
}

impl DbStore {
    /// Open the database read-only. The connection is released when the
    /// store is dropped at the end of the load.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(db_err)?;
        Ok(Self { conn })
    }

    /// Map a survey ID to its plate-ifu
    pub fn resolve_mangaid(&self, mangaid: &str, release: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT plateifu FROM cube WHERE mangaid = ?1 AND release = ?2",
                rusqlite::params![mangaid, release],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)
    }

    /// Whether a cube row exists for this identifier and release
    pub fn cube_exists(&self, plateifu: &str, release: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT count(*) FROM cube WHERE plateifu = ?1 AND release = ?2",
                rusqlite::params![plateifu, release],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count > 0)
    }

    /// Fetch the metadata row for one object
    pub fn cube_row(&self, entity: &str, plateifu: &str, release: &str) -> Result<CubeRow> {
        self.conn
            .query_row(
                "SELECT plateifu, mangaid, ra, dec, nx, ny, nwave, wave \
                 FROM cube WHERE plateifu = ?1 AND release = ?2",
                rusqlite::params![plateifu, release],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, Vec<u8>>(7)?,
                    ))
                },
            )
            .map_err(|e| classify_db_error(entity, plateifu, e))
            .and_then(|(plateifu, mangaid, ra, dec, nx, ny, nwave, wave)| {
                Ok(CubeRow {
                    plateifu,
                    mangaid,
                    ra,
                    dec,
                    nx: nx as usize,
                    ny: ny as usize,
                    nwave: nwave as usize,
                    wave: blob_to_f64(&wave)?,
                })
            })
    }

    /// Fetch spaxel spectra for a datacube. Columns are the datacube's DB
    /// aliases from the datamodel. Rows come back re-sorted by spaxel index.
    pub fn cube_spaxel_rows(
        &self,
        entity: &str,
        plateifu: &str,
        release: &str,
        flux_col: &str,
        ivar_col: Option<&str>,
        mask_col: Option<&str>,
    ) -> Result<Vec<SpaxelRow>> {
        let mut columns = vec![format!("\"{}\"", flux_col)];
        columns.extend(ivar_col.iter().map(|c| format!("\"{}\"", c)));
        columns.extend(mask_col.iter().map(|c| format!("\"{}\"", c)));

        let sql = format!(
            "SELECT spaxel_index, {} FROM cube_spaxel \
             WHERE plateifu = ?1 AND release = ?2 ORDER BY spaxel_index",
            columns.join(", ")
        );

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| classify_db_error(entity, plateifu, e))?;
        let mapped = stmt
            .query_map(rusqlite::params![plateifu, release], |row| {
                let spaxel_index: i64 = row.get(0)?;
                let flux: Vec<u8> = row.get(1)?;
                let mut col = 2;
                let ivar: Option<Vec<u8>> = if ivar_col.is_some() {
                    let v = row.get(col)?;
                    col += 1;
                    Some(v)
                } else {
                    None
                };
                let mask: Option<Vec<u8>> = if mask_col.is_some() {
                    Some(row.get(col)?)
                } else {
                    None
                };
                Ok((spaxel_index, flux, ivar, mask))
            })
            .map_err(|e| classify_db_error(entity, plateifu, e))?;

        let mut rows = Vec::new();
        for item in mapped {
            let (spaxel_index, flux, ivar, mask) =
                item.map_err(|e| classify_db_error(entity, plateifu, e))?;
            rows.push(SpaxelRow {
                spaxel_index,
                flux: blob_to_f32(&flux)?,
                ivar: ivar.as_deref().map(blob_to_f32).transpose()?,
                mask: mask.as_deref().map(blob_to_i32).transpose()?,
            });
        }

        // Storage order is not guaranteed to match raster order.
        rows.sort_by_key(|row| row.spaxel_index);
        Ok(rows)
    }

    /// Fetch per-spaxel values for one map property column set. Rows come
    /// back re-sorted by spaxel index.
    pub fn map_rows(
        &self,
        entity: &str,
        plateifu: &str,
        release: &str,
        value_col: &str,
        ivar_col: Option<&str>,
        mask_col: Option<&str>,
    ) -> Result<Vec<MapRow>> {
        let mut columns = vec![format!("\"{}\"", value_col)];
        columns.extend(ivar_col.iter().map(|c| format!("\"{}\"", c)));
        columns.extend(mask_col.iter().map(|c| format!("\"{}\"", c)));

        let sql = format!(
            "SELECT spaxel_index, {} FROM maps_spaxel \
             WHERE plateifu = ?1 AND release = ?2 ORDER BY spaxel_index",
            columns.join(", ")
        );

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| classify_db_error(entity, plateifu, e))?;
        let mapped = stmt
            .query_map(rusqlite::params![plateifu, release], |row| {
                let spaxel_index: i64 = row.get(0)?;
                let value: f64 = row.get(1)?;
                let mut col = 2;
                let ivar: Option<f64> = if ivar_col.is_some() {
                    let v = row.get(col)?;
                    col += 1;
                    Some(v)
                } else {
                    None
                };
                let mask: Option<f64> = if mask_col.is_some() {
                    Some(row.get(col)?)
                } else {
                    None
                };
                Ok(MapRow {
                    spaxel_index,
                    value,
                    ivar,
                    mask,
                })
            })
            .map_err(|e| classify_db_error(entity, plateifu, e))?;

        let mut rows = mapped
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| classify_db_error(entity, plateifu, e))?;
        rows.sort_by_key(|row| row.spaxel_index);
        Ok(rows)
    }

    /// Header cards for one extension, matched case-insensitively by
    /// extension name. `None` when no rows exist; headers are auxiliary so
    /// the caller downgrades that to a warning.
    pub fn header(
        &self,
        entity: &str,
        plateifu: &str,
        release: &str,
        extname: &str,
    ) -> Result<Option<Header>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT key, value FROM header \
                 WHERE plateifu = ?1 AND release = ?2 AND upper(extname) = upper(?3) \
                 ORDER BY rowid",
            )
            .map_err(|e| classify_db_error(entity, plateifu, e))?;

        let mapped = stmt
            .query_map(rusqlite::params![plateifu, release, extname], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| classify_db_error(entity, plateifu, e))?;

        let mut header = Header::new();
        for item in mapped {
            let (key, value) =
                item.map_err(|e| classify_db_error(entity, plateifu, e))?;
            header.insert(key, parse_card(&value));
        }

        if header.is_empty() {
            Ok(None)
        } else {
            Ok(Some(header))
        }
    }
}

/// Parse a TEXT header value into the narrowest card type
fn parse_card(value: &str) -> CardValue {
    if let Ok(v) = value.parse::<i64>() {
        return CardValue::Int(v);
    }
    if let Ok(v) = value.parse::<f64>() {
        return CardValue::Float(v);
    }
    match value {
        "T" => CardValue::Bool(true),
        "F" => CardValue::Bool(false),
        _ => CardValue::Str(value.to_string()),
    }
}

fn blob_to_f32(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(MangaError::Db("f32 blob length not a multiple of 4".to_string()));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn blob_to_f64(blob: &[u8]) -> Result<Vec<f64>> {
    if blob.len() % 8 != 0 {
        return Err(MangaError::Db("f64 blob length not a multiple of 8".to_string()));
    }
    Ok(blob
        .chunks_exact(8)
        .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .collect())
}

fn blob_to_i32(blob: &[u8]) -> Result<Vec<i32>> {
    if blob.len() % 4 != 0 {
        return Err(MangaError::Db("i32 blob length not a multiple of 4".to_string()));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
