//! 2D map products of the data-analysis pipeline.
//!
//! [`Maps`] is the per-galaxy container: it resolves an origin and loads
//! only metadata (spatial shape, header, WCS) up front. Individual map
//! planes are materialized on demand through [`Maps::get_map`], which
//! returns a fully loaded [`Map`] and goes back to the committed origin
//! exactly once.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::datamodel::{datamodels, ArrayExt, DrpDataModel, Property};
use crate::db::DbStore;
use crate::error::{MangaError, Result};
use crate::fits::FitsStore;
use crate::header::Header;
use crate::remote::{self, ApiClient};
use crate::resolve::{resolve, EntityKind, Input, Origin};
use crate::spaxel::{resolve_positions, Extracted, SpaxelQuery};
use crate::wcs::Wcs;

const SNAPSHOT_EXT: &str = "mpf";

fn invalid_combination() -> MangaError {
    MangaError::InvalidArguments("invalid combination of property name and channel.".to_string())
}

/// Backend handle material kept for on-demand map loads
#[derive(Debug, Clone, Serialize, Deserialize)]
enum MapsHandle {
    File(PathBuf),
    Db(PathBuf),
    Api(String),
}

/// Per-galaxy container of 2D map products
#[derive(Debug)]
pub struct Maps {
    plateifu: Option<String>,
    mangaid: Option<String>,
    release: String,
    drpver: String,
    origin: Origin,
    /// Spatial `(ny, nx)` shape
    shape: (usize, usize),
    header: Header,
    wcs: Option<Wcs>,
    datamodel: &'static DrpDataModel,
    handle: MapsHandle,
}

impl Maps {
    /// Resolve the input to an origin and load the maps metadata from it.
    pub fn new(input: Input, config: &Config) -> Result<Maps> {
        let resolution = resolve(EntityKind::Maps, &input, config)?;
        let datamodel = datamodels().get(&resolution.release)?;
        // Metadata (shape and header) is anchored on the first registered
        // property extension.
        let anchor = datamodel
            .properties()
            .iter()
            .next()
            .ok_or_else(|| MangaError::UnknownRelease(resolution.release.clone()))?;

        match resolution.origin {
            Origin::File => {
                let path = resolution
                    .path
                    .ok_or_else(|| MangaError::InvalidArguments("no path resolved".to_string()))?;
                Self::load_from_file(&path, &resolution.release, datamodel, anchor)
            }
            Origin::Db => {
                let db_path = config.db_path.clone().ok_or_else(|| {
                    MangaError::Db("cannot load from db: no db connected".to_string())
                })?;
                let plateifu = resolution
                    .plateifu
                    .ok_or_else(|| MangaError::InvalidArguments("no plateifu resolved".to_string()))?;
                Self::load_from_db(db_path, &plateifu, &resolution.release, datamodel, anchor)
            }
            Origin::Api => {
                let name = resolution
                    .plateifu
                    .or(resolution.mangaid)
                    .ok_or_else(|| MangaError::InvalidArguments("no identifier resolved".to_string()))?;
                Self::load_from_api(&config.api_url, &name, &resolution.release, datamodel)
            }
        }
    }

    fn load_from_file(
        path: &Path,
        release: &str,
        datamodel: &'static DrpDataModel,
        anchor: &Property,
    ) -> Result<Maps> {
        let store = FitsStore::open(path)?;
        let extname = anchor.fits_extension(None);
        let (shape, _) = store.read_f64(&extname)?;
        if shape.len() < 2 {
            return Err(MangaError::Fits(format!(
                "extension {} is not a map (shape {:?})",
                extname, shape
            )));
        }
        let spatial = (shape[1], shape[0]);
        let header = store.read_header(&extname)?;
        let wcs = Wcs::from_header(&header).ok();

        Ok(Maps {
            // String cards may carry FITS padding.
            plateifu: header.get_str("PLATEIFU").map(|s| s.trim().to_string()),
            mangaid: header.get_str("MANGAID").map(|s| s.trim().to_string()),
            release: release.to_string(),
            drpver: datamodel.drpver.clone(),
            origin: Origin::File,
            shape: spatial,
            header,
            wcs,
            datamodel,
            handle: MapsHandle::File(path.to_path_buf()),
        })
    }

    fn load_from_db(
        db_path: PathBuf,
        plateifu: &str,
        release: &str,
        datamodel: &'static DrpDataModel,
        anchor: &Property,
    ) -> Result<Maps> {
        let db = DbStore::open(&db_path)?;
        let row = db.cube_row("maps", plateifu, release)?;
        let header = match db.header("maps", plateifu, release, &anchor.extension_name)? {
            Some(header) => header,
            None => {
                log::warn!(
                    "cannot find the header for extension {} of {}",
                    anchor.extension_name,
                    plateifu
                );
                Header::new()
            }
        };
        let wcs = Wcs::from_header(&header).ok();

        Ok(Maps {
            plateifu: Some(row.plateifu),
            mangaid: row.mangaid,
            release: release.to_string(),
            drpver: datamodel.drpver.clone(),
            origin: Origin::Db,
            shape: (row.ny, row.nx),
            header,
            wcs,
            datamodel,
            handle: MapsHandle::Db(db_path),
        })
    }

    fn load_from_api(
        base_url: &str,
        name: &str,
        release: &str,
        datamodel: &'static DrpDataModel,
    ) -> Result<Maps> {
        let client = ApiClient::new(base_url)?;
        let payload = client.get_maps(name, release, &datamodel.drpver)?;
        let header = remote::header_from_json(&payload.header);
        let wcs = Wcs::from_header(&header).ok();

        Ok(Maps {
            plateifu: Some(payload.plateifu),
            mangaid: payload.mangaid,
            release: release.to_string(),
            drpver: datamodel.drpver.clone(),
            origin: Origin::Api,
            shape: (payload.shape[0], payload.shape[1]),
            header,
            wcs,
            datamodel,
            handle: MapsHandle::Api(base_url.to_string()),
        })
    }

    pub fn plateifu(&self) -> Option<&str> {
        self.plateifu.as_deref()
    }

    pub fn mangaid(&self) -> Option<&str> {
        self.mangaid.as_deref()
    }

    pub fn release(&self) -> &str {
        &self.release
    }

    pub fn drpver(&self) -> &str {
        &self.drpver
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Spatial `(ny, nx)` shape
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn wcs(&self) -> Option<&Wcs> {
        self.wcs.as_ref()
    }

    pub fn datamodel(&self) -> &DrpDataModel {
        self.datamodel
    }

    /// The release is fixed once the container is loaded.
    pub fn set_release(&mut self, _release: &str) -> Result<()> {
        Err(MangaError::Unsupported(
            "the release cannot be changed".to_string(),
        ))
    }

    /// Materialize one map plane from the committed origin.
    pub fn get_map(&self, property: &str, channel: Option<&str>) -> Result<Map> {
        Map::new(self, property, channel)
    }

    /// Serialize the container metadata to a snapshot file.
    ///
    /// Containers loaded from the db cannot be saved.
    pub fn save(&self, path: Option<&Path>, config: &Config) -> Result<PathBuf> {
        if self.origin == Origin::Db {
            return Err(MangaError::Unsupported(
                "objects with data_origin='db' cannot be saved.".to_string(),
            ));
        }

        let path = match path {
            Some(p) => p.to_path_buf(),
            None => self.default_snapshot_path(config)?,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let snapshot = MapsSnapshot {
            saved_at: Utc::now(),
            plateifu: self.plateifu.clone(),
            mangaid: self.mangaid.clone(),
            release: self.release.clone(),
            origin: self.origin,
            shape: self.shape,
            header: self.header.clone(),
            wcs: self.wcs.clone(),
            handle: self.handle.clone(),
        };
        let bytes = bincode::serialize(&snapshot)?;
        fs::write(&path, bytes)?;
        log::debug!("saved maps snapshot to {}", path.display());
        Ok(path)
    }

    fn default_snapshot_path(&self, config: &Config) -> Result<PathBuf> {
        if let MapsHandle::File(path) = &self.handle {
            return Ok(path.with_extension(SNAPSHOT_EXT));
        }
        let plateifu = self.plateifu.as_deref().ok_or_else(|| {
            MangaError::InvalidArguments("cannot derive a snapshot path without a plateifu".to_string())
        })?;
        Ok(config.maps_path(plateifu).with_extension(SNAPSHOT_EXT))
    }

    /// Rebuild a container from a snapshot file.
    pub fn restore(path: impl AsRef<Path>, delete: bool) -> Result<Maps> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let snapshot: MapsSnapshot = bincode::deserialize(&bytes)?;
        let datamodel = datamodels().get(&snapshot.release)?;

        let maps = Maps {
            plateifu: snapshot.plateifu,
            mangaid: snapshot.mangaid,
            drpver: datamodel.drpver.clone(),
            release: snapshot.release,
            origin: snapshot.origin,
            shape: snapshot.shape,
            header: snapshot.header,
            wcs: snapshot.wcs,
            datamodel,
            handle: snapshot.handle,
        };
        if delete {
            fs::remove_file(path)?;
        }
        Ok(maps)
    }
}

/// On-disk snapshot of a maps container
#[derive(Serialize, Deserialize)]
struct MapsSnapshot {
    saved_at: DateTime<Utc>,
    plateifu: Option<String>,
    mangaid: Option<String>,
    release: String,
    origin: Origin,
    shape: (usize, usize),
    header: Header,
    wcs: Option<Wcs>,
    handle: MapsHandle,
}

/// One pixel of a map plane
#[derive(Debug, Clone, PartialEq)]
pub struct MapPixel {
    pub x: usize,
    pub y: usize,
    pub value: f64,
    pub ivar: Option<f64>,
    pub mask: Option<i32>,
}

/// One fully loaded map plane
#[derive(Debug)]
pub struct Map {
    property: String,
    channel: Option<String>,
    value: Array2<f64>,
    ivar: Option<Array2<f64>>,
    mask: Option<Array2<i32>>,
    unit: String,
    header: Header,
    wcs: Option<Wcs>,
}

impl Map {
    fn new(maps: &Maps, property: &str, channel: Option<&str>) -> Result<Map> {
        let prop = match maps.datamodel.properties().find(property) {
            Ok(prop) => prop,
            Err(MangaError::NotFound(_)) => return Err(invalid_combination()),
            Err(err) => return Err(err),
        };

        let channel_index = match (&prop.channels, channel) {
            (Some(_), Some(ch)) => Some(prop.channel_index(ch).ok_or_else(invalid_combination)?),
            (None, None) => None,
            _ => return Err(invalid_combination()),
        };

        let unit = channel
            .and_then(|ch| prop.channel_index(ch))
            .and_then(|idx| prop.channels.as_ref()?[idx].unit.clone())
            .unwrap_or_else(|| prop.unit.clone());

        let mut map = match &maps.handle {
            MapsHandle::File(path) => Self::load_from_file(path, prop, channel_index)?,
            MapsHandle::Db(db_path) => Self::load_from_db(db_path, maps, prop, channel)?,
            MapsHandle::Api(base_url) => Self::load_from_api(base_url, maps, prop, channel)?,
        };
        // The api payload carries its own unit; local loads take the
        // registry unit, with any per-channel override applied.
        if map.unit.is_empty() || !matches!(&maps.handle, MapsHandle::Api(_)) {
            map.unit = unit;
        }
        map.property = prop.full_name(channel);
        map.channel = channel.map(|ch| ch.to_lowercase());
        map.wcs = maps.wcs.clone().or(map.wcs);
        Ok(map)
    }

    fn load_from_file(path: &Path, prop: &Property, channel_index: Option<usize>) -> Result<Map> {
        let store = FitsStore::open(path)?;

        let read_plane = |extname: &str| -> Result<Array2<f64>> {
            let (shape, data) = store.read_f64(extname)?;
            match (shape.len(), channel_index) {
                (2, None) => {
                    let arr = Array2::from_shape_vec((shape[1], shape[0]), data)
                        .map_err(|e| MangaError::Fits(e.to_string()))?;
                    Ok(arr)
                }
                (3, Some(idx)) => {
                    if idx >= shape[2] {
                        return Err(MangaError::IndexOutOfBounds);
                    }
                    let arr =
                        ndarray::Array3::from_shape_vec((shape[2], shape[1], shape[0]), data)
                            .map_err(|e| MangaError::Fits(e.to_string()))?;
                    Ok(arr.index_axis(Axis(0), idx).to_owned())
                }
                _ => Err(MangaError::Fits(format!(
                    "extension {} has unexpected shape {:?}",
                    extname, shape
                ))),
            }
        };

        let value = read_plane(&prop.fits_extension(None))?;
        let ivar = if prop.ivar {
            Some(read_plane(&prop.fits_extension(Some(ArrayExt::Ivar)))?)
        } else {
            None
        };
        let mask = if prop.mask {
            let extname = prop.fits_extension(Some(ArrayExt::Mask));
            let (shape, data) = store.read_i32(&extname)?;
            let plane = match (shape.len(), channel_index) {
                (2, None) => Array2::from_shape_vec((shape[1], shape[0]), data)
                    .map_err(|e| MangaError::Fits(e.to_string()))?,
                (3, Some(idx)) => {
                    ndarray::Array3::from_shape_vec((shape[2], shape[1], shape[0]), data)
                        .map_err(|e| MangaError::Fits(e.to_string()))?
                        .index_axis(Axis(0), idx)
                        .to_owned()
                }
                _ => {
                    return Err(MangaError::Fits(format!(
                        "extension {} has unexpected shape {:?}",
                        extname, shape
                    )))
                }
            };
            Some(plane)
        } else {
            None
        };
        let header = store.read_header(&prop.fits_extension(None))?;
        let wcs = Wcs::from_header(&header).ok();

        Ok(Map {
            property: String::new(),
            channel: None,
            value,
            ivar,
            mask,
            unit: prop.unit.clone(),
            header,
            wcs,
        })
    }

    fn load_from_db(
        db_path: &Path,
        maps: &Maps,
        prop: &Property,
        channel: Option<&str>,
    ) -> Result<Map> {
        let db = DbStore::open(db_path)?;
        let plateifu = maps.plateifu.as_deref().ok_or_else(|| {
            MangaError::InvalidArguments("no plateifu resolved".to_string())
        })?;
        let (ny, nx) = maps.shape;

        let value_col = prop.db_column(channel, None)?;
        let ivar_col = if prop.ivar {
            Some(prop.db_column(channel, Some(ArrayExt::Ivar))?)
        } else {
            None
        };
        let mask_col = if prop.mask {
            Some(prop.db_column(channel, Some(ArrayExt::Mask))?)
        } else {
            None
        };
        let rows = db.map_rows(
            "maps",
            plateifu,
            &maps.release,
            &value_col,
            ivar_col.as_deref(),
            mask_col.as_deref(),
        )?;
        if rows.len() != ny * nx {
            return Err(MangaError::Db(format!(
                "expected {} map rows for {}, got {}",
                ny * nx,
                plateifu,
                rows.len()
            )));
        }

        let mut value = Array2::<f64>::zeros((ny, nx));
        let mut ivar = ivar_col.as_ref().map(|_| Array2::<f64>::zeros((ny, nx)));
        let mut mask = mask_col.as_ref().map(|_| Array2::<i32>::zeros((ny, nx)));
        for row in &rows {
            let idx = row.spaxel_index as usize;
            let (y, x) = (idx / nx, idx % nx);
            if y >= ny {
                return Err(MangaError::Db(format!(
                    "malformed map row {} for {}",
                    idx, plateifu
                )));
            }
            value[[y, x]] = row.value;
            if let (Some(arr), Some(v)) = (ivar.as_mut(), row.ivar) {
                arr[[y, x]] = v;
            }
            if let (Some(arr), Some(v)) = (mask.as_mut(), row.mask) {
                arr[[y, x]] = v as i32;
            }
        }

        let header = match db.header("maps", plateifu, &maps.release, &prop.extension_name)? {
            Some(header) => header,
            None => {
                log::warn!(
                    "cannot find the header for extension {} of {}",
                    prop.extension_name,
                    plateifu
                );
                Header::new()
            }
        };
        let wcs = Wcs::from_header(&header).ok();

        Ok(Map {
            property: String::new(),
            channel: None,
            value,
            ivar,
            mask,
            unit: prop.unit.clone(),
            header,
            wcs,
        })
    }

    fn load_from_api(
        base_url: &str,
        maps: &Maps,
        prop: &Property,
        channel: Option<&str>,
    ) -> Result<Map> {
        let client = ApiClient::new(base_url)?;
        let name = maps
            .plateifu
            .as_deref()
            .or(maps.mangaid.as_deref())
            .ok_or_else(|| MangaError::InvalidArguments("no identifier resolved".to_string()))?;
        let payload = client.get_map(name, &maps.release, &maps.drpver, &prop.full(), channel)?;

        let value = remote::to_array2(&payload.value)?;
        let ivar = payload
            .ivar
            .as_deref()
            .map(remote::to_array2)
            .transpose()?;
        let mask = payload
            .mask
            .as_deref()
            .map(remote::to_array2)
            .transpose()?
            .map(|arr: Array2<f64>| arr.mapv(|v| v as i32));
        let header = remote::header_from_json(&payload.header);
        let wcs = Wcs::from_header(&header).ok();

        Ok(Map {
            property: String::new(),
            channel: None,
            value,
            ivar,
            mask,
            unit: payload.unit,
            header,
            wcs,
        })
    }

    /// Full property name, channel included when there is one
    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub fn value(&self) -> &Array2<f64> {
        &self.value
    }

    pub fn ivar(&self) -> Option<&Array2<f64>> {
        self.ivar.as_ref()
    }

    pub fn mask(&self) -> Option<&Array2<i32>> {
        self.mask.as_ref()
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Spatial `(ny, nx)` shape
    pub fn shape(&self) -> (usize, usize) {
        self.value.dim()
    }

    /// Extract one or more pixels by pixel or sky coordinates.
    pub fn pixel(&self, query: &SpaxelQuery) -> Result<Extracted<MapPixel>> {
        let (positions, scalar) = resolve_positions(self.shape(), self.wcs.as_ref(), query)?;
        let pixels: Vec<MapPixel> = positions
            .into_iter()
            .map(|(x, y)| MapPixel {
                x,
                y,
                value: self.value[[y, x]],
                ivar: self.ivar.as_ref().map(|arr| arr[[y, x]]),
                mask: self.mask.as_ref().map(|arr| arr[[y, x]]),
            })
            .collect();
        if scalar {
            let mut pixels = pixels;
            Ok(Extracted::One(pixels.remove(0)))
        } else {
            Ok(Extracted::Many(pixels))
        }
    }
}
