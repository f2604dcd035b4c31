//! 3D spectral cube entity.
//!
//! A [`Cube`] is resolved to one origin (file, db, or api) at construction
//! and fully loaded there; every later accessor works on in-memory arrays
//! and never touches the origin again.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ndarray::{s, Array1, Array3};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::datamodel::{datamodels, ArrayExt, DrpDataModel};
use crate::db::DbStore;
use crate::error::{MangaError, Result};
use crate::fits::FitsStore;
use crate::header::Header;
use crate::remote::{self, ApiClient};
use crate::resolve::{resolve, EntityKind, Input, Origin};
use crate::spaxel::{resolve_positions, Extracted, Spaxel, SpaxelQuery};
use crate::wcs::Wcs;

/// Extension used for saved snapshots
const SNAPSHOT_EXT: &str = "mpf";

/// A fully loaded spectral cube
#[derive(Debug)]
pub struct Cube {
    plateifu: Option<String>,
    mangaid: Option<String>,
    release: String,
    drpver: String,
    origin: Origin,
    filename: Option<PathBuf>,
    ra: f64,
    dec: f64,
    /// Flux in canonical `(nwave, ny, nx)` order
    flux: Array3<f32>,
    ivar: Array3<f32>,
    mask: Array3<i32>,
    wavelength: Array1<f64>,
    unit: String,
    scale: f64,
    header: Header,
    wcs: Option<Wcs>,
    datamodel: &'static DrpDataModel,
}

impl Cube {
    /// Resolve the input to an origin and load the cube from it.
    pub fn new(input: Input, config: &Config) -> Result<Cube> {
        let resolution = resolve(EntityKind::Cube, &input, config)?;
        let datamodel = datamodels().get(&resolution.release)?;

        match resolution.origin {
            Origin::File => {
                let path = resolution
                    .path
                    .ok_or_else(|| MangaError::InvalidArguments("no path resolved".to_string()))?;
                Self::load_from_file(&path, &resolution.release, datamodel)
            }
            Origin::Db => {
                let db_path = config.db_path.as_deref().ok_or_else(|| {
                    MangaError::Db("cannot load from db: no db connected".to_string())
                })?;
                let plateifu = resolution
                    .plateifu
                    .ok_or_else(|| MangaError::InvalidArguments("no plateifu resolved".to_string()))?;
                Self::load_from_db(db_path, &plateifu, &resolution.release, datamodel)
            }
            Origin::Api => {
                let name = resolution
                    .plateifu
                    .or(resolution.mangaid)
                    .ok_or_else(|| MangaError::InvalidArguments("no identifier resolved".to_string()))?;
                let client = ApiClient::new(&config.api_url)?;
                Self::load_from_api(&client, &name, &resolution.release, datamodel)
            }
        }
    }

    fn load_from_file(path: &Path, release: &str, datamodel: &'static DrpDataModel) -> Result<Cube> {
        let store = FitsStore::open(path)?;
        let entry = datamodel.datacubes().find("flux")?;

        let (shape, flux) = store.read_f32(&entry.extension_name)?;
        if shape.len() != 3 {
            return Err(MangaError::Fits(format!(
                "extension {} is not a cube (shape {:?})",
                entry.extension_name, shape
            )));
        }
        // FITS axis order is (nx, ny, nwave) with x varying fastest; the
        // flat data is therefore already in canonical C order.
        let (nx, ny, nwave) = (shape[0], shape[1], shape[2]);
        let flux = Array3::from_shape_vec((nwave, ny, nx), flux)
            .map_err(|e| MangaError::Fits(e.to_string()))?;

        let ivar_ext = entry.extension_ivar.as_deref().ok_or_else(|| {
            MangaError::Fits(format!("no ivar extension for {}", entry.extension_name))
        })?;
        let (_, ivar) = store.read_f32(ivar_ext)?;
        let ivar = Array3::from_shape_vec((nwave, ny, nx), ivar)
            .map_err(|e| MangaError::Fits(e.to_string()))?;

        let mask_ext = entry.extension_mask.as_deref().ok_or_else(|| {
            MangaError::Fits(format!("no mask extension for {}", entry.extension_name))
        })?;
        let (_, mask) = store.read_i32(mask_ext)?;
        let mask = Array3::from_shape_vec((nwave, ny, nx), mask)
            .map_err(|e| MangaError::Fits(e.to_string()))?;

        let wave_ext = entry.extension_wave.as_deref().ok_or_else(|| {
            MangaError::Fits(format!("no wave extension for {}", entry.extension_name))
        })?;
        let (_, wave) = store.read_f64(wave_ext)?;
        let wavelength = Array1::from_vec(wave);

        let header = store.read_header(&entry.extension_name)?;
        let wcs = Wcs::from_header(&header).ok();
        if wcs.is_none() {
            log::debug!("no WCS in header of {}", path.display());
        }

        Ok(Cube {
            // String cards may carry FITS padding.
            plateifu: header.get_str("PLATEIFU").map(|s| s.trim().to_string()),
            mangaid: header.get_str("MANGAID").map(|s| s.trim().to_string()),
            release: release.to_string(),
            drpver: datamodel.drpver.clone(),
            origin: Origin::File,
            filename: Some(path.to_path_buf()),
            ra: header.get_f64("CRVAL1").unwrap_or(0.0),
            dec: header.get_f64("CRVAL2").unwrap_or(0.0),
            flux,
            ivar,
            mask,
            wavelength,
            unit: entry.unit.clone(),
            scale: entry.scale,
            header,
            wcs,
            datamodel,
        })
    }

    fn load_from_db(
        db_path: &Path,
        plateifu: &str,
        release: &str,
        datamodel: &'static DrpDataModel,
    ) -> Result<Cube> {
        let db = DbStore::open(db_path)?;
        let entry = datamodel.datacubes().find("flux")?;

        let row = db.cube_row("cube", plateifu, release)?;
        let (nx, ny, nwave) = (row.nx, row.ny, row.nwave);

        let flux_col = entry.db_column(None)?;
        let ivar_col = entry.db_column(Some(ArrayExt::Ivar))?;
        let mask_col = entry.db_column(Some(ArrayExt::Mask))?;
        let rows = db.cube_spaxel_rows(
            "cube",
            plateifu,
            release,
            &flux_col,
            Some(&ivar_col),
            Some(&mask_col),
        )?;
        if rows.len() != nx * ny {
            return Err(MangaError::Db(format!(
                "expected {} spaxel rows for {}, got {}",
                nx * ny,
                plateifu,
                rows.len()
            )));
        }

        let mut flux = Array3::<f32>::zeros((nwave, ny, nx));
        let mut ivar = Array3::<f32>::zeros((nwave, ny, nx));
        let mut mask = Array3::<i32>::zeros((nwave, ny, nx));
        for spaxel in &rows {
            let idx = spaxel.spaxel_index as usize;
            let (y, x) = (idx / nx, idx % nx);
            if y >= ny || spaxel.flux.len() != nwave {
                return Err(MangaError::Db(format!(
                    "malformed spaxel row {} for {}",
                    idx, plateifu
                )));
            }
            for w in 0..nwave {
                flux[[w, y, x]] = spaxel.flux[w];
                if let Some(iv) = &spaxel.ivar {
                    ivar[[w, y, x]] = iv[w];
                }
                if let Some(m) = &spaxel.mask {
                    mask[[w, y, x]] = m[w];
                }
            }
        }

        let header = match db.header("cube", plateifu, release, &entry.extension_name)? {
            Some(header) => header,
            None => {
                log::warn!(
                    "cannot find the header for extension {} of {}",
                    entry.extension_name,
                    plateifu
                );
                Header::new()
            }
        };
        let wcs = Wcs::from_header(&header).ok();

        Ok(Cube {
            plateifu: Some(row.plateifu),
            mangaid: row.mangaid,
            release: release.to_string(),
            drpver: datamodel.drpver.clone(),
            origin: Origin::Db,
            filename: None,
            ra: row.ra,
            dec: row.dec,
            flux,
            ivar,
            mask,
            wavelength: Array1::from_vec(row.wave),
            unit: entry.unit.clone(),
            scale: entry.scale,
            header,
            wcs,
            datamodel,
        })
    }

    fn load_from_api(
        client: &ApiClient,
        name: &str,
        release: &str,
        datamodel: &'static DrpDataModel,
    ) -> Result<Cube> {
        let entry = datamodel.datacubes().find("flux")?;
        let payload = client.get_cube(name, release, &datamodel.drpver)?;

        let flux = remote::to_array3(payload.shape, &payload.value)?;
        let ivar = remote::to_array3(payload.shape, &payload.ivar)?;
        let mask = remote::to_array3(payload.shape, &payload.mask)?;
        let header = remote::header_from_json(&payload.header);
        let wcs = Wcs::from_header(&header).ok();

        Ok(Cube {
            plateifu: Some(payload.plateifu),
            mangaid: payload.mangaid,
            release: release.to_string(),
            drpver: datamodel.drpver.clone(),
            origin: Origin::Api,
            filename: None,
            ra: payload.ra,
            dec: payload.dec,
            flux,
            ivar,
            mask,
            wavelength: Array1::from_vec(payload.wave),
            unit: payload.unit,
            scale: entry.scale,
            header,
            wcs,
            datamodel,
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

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    pub fn ra(&self) -> f64 {
        self.ra
    }

    pub fn dec(&self) -> f64 {
        self.dec
    }

    pub fn flux(&self) -> &Array3<f32> {
        &self.flux
    }

    pub fn ivar(&self) -> &Array3<f32> {
        &self.ivar
    }

    pub fn mask(&self) -> &Array3<i32> {
        &self.mask
    }

    pub fn wavelength(&self) -> &Array1<f64> {
        &self.wavelength
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn scale(&self) -> f64 {
        self.scale
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

    /// Full `(nwave, ny, nx)` shape
    pub fn shape(&self) -> (usize, usize, usize) {
        self.flux.dim()
    }

    /// Spatial `(ny, nx)` shape
    pub fn spatial_shape(&self) -> (usize, usize) {
        let (_, ny, nx) = self.flux.dim();
        (ny, nx)
    }

    /// The release is fixed once the cube is loaded.
    pub fn set_release(&mut self, _release: &str) -> Result<()> {
        Err(MangaError::Unsupported(
            "the release cannot be changed".to_string(),
        ))
    }

    /// Extract one or more spaxels by pixel or sky coordinates.
    pub fn get_spaxel(&self, query: &SpaxelQuery) -> Result<Extracted<Spaxel>> {
        let (positions, scalar) = resolve_positions(self.spatial_shape(), self.wcs.as_ref(), query)?;
        let spaxels: Vec<Spaxel> = positions
            .into_iter()
            .map(|(x, y)| Spaxel {
                x,
                y,
                flux: self.flux.slice(s![.., y, x]).to_owned(),
                ivar: self.ivar.slice(s![.., y, x]).to_owned(),
                mask: self.mask.slice(s![.., y, x]).to_owned(),
            })
            .collect();
        if scalar {
            let mut spaxels = spaxels;
            Ok(Extracted::One(spaxels.remove(0)))
        } else {
            Ok(Extracted::Many(spaxels))
        }
    }

    /// Serialize the cube to a snapshot file and return its path.
    ///
    /// Cubes loaded from the db cannot be saved. Without an explicit path
    /// the snapshot lands next to where the cube file would live, with the
    /// snapshot extension.
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

        let snapshot = CubeSnapshot {
            saved_at: Utc::now(),
            plateifu: self.plateifu.clone(),
            mangaid: self.mangaid.clone(),
            release: self.release.clone(),
            origin: self.origin,
            filename: self.filename.clone(),
            ra: self.ra,
            dec: self.dec,
            flux: self.flux.clone(),
            ivar: self.ivar.clone(),
            mask: self.mask.clone(),
            wavelength: self.wavelength.clone(),
            unit: self.unit.clone(),
            scale: self.scale,
            header: self.header.clone(),
            wcs: self.wcs.clone(),
        };
        let bytes = bincode::serialize(&snapshot)?;
        fs::write(&path, bytes)?;
        log::debug!("saved cube snapshot to {}", path.display());
        Ok(path)
    }

    fn default_snapshot_path(&self, config: &Config) -> Result<PathBuf> {
        if let Some(filename) = &self.filename {
            return Ok(filename.with_extension(SNAPSHOT_EXT));
        }
        let plateifu = self.plateifu.as_deref().ok_or_else(|| {
            MangaError::InvalidArguments("cannot derive a snapshot path without a plateifu".to_string())
        })?;
        Ok(config.cube_path(plateifu).with_extension(SNAPSHOT_EXT))
    }

    /// Rebuild a cube from a snapshot file.
    ///
    /// With `delete` set, the snapshot file is removed after a successful
    /// restore. The origin recorded at save time is preserved.
    pub fn restore(path: impl AsRef<Path>, delete: bool) -> Result<Cube> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let snapshot: CubeSnapshot = bincode::deserialize(&bytes)?;
        let datamodel = datamodels().get(&snapshot.release)?;

        let cube = Cube {
            plateifu: snapshot.plateifu,
            mangaid: snapshot.mangaid,
            drpver: datamodel.drpver.clone(),
            release: snapshot.release,
            origin: snapshot.origin,
            filename: snapshot.filename,
            ra: snapshot.ra,
            dec: snapshot.dec,
            flux: snapshot.flux,
            ivar: snapshot.ivar,
            mask: snapshot.mask,
            wavelength: snapshot.wavelength,
            unit: snapshot.unit,
            scale: snapshot.scale,
            header: snapshot.header,
            wcs: snapshot.wcs,
            datamodel,
        };
        if delete {
            fs::remove_file(path)?;
        }
        Ok(cube)
    }
}

/// On-disk snapshot of a cube
#[derive(Serialize, Deserialize)]
struct CubeSnapshot {
    saved_at: DateTime<Utc>,
    plateifu: Option<String>,
    mangaid: Option<String>,
    release: String,
    origin: Origin,
    filename: Option<PathBuf>,
    ra: f64,
    dec: f64,
    flux: Array3<f32>,
    ivar: Array3<f32>,
    mask: Array3<i32>,
    wavelength: Array1<f64>,
    unit: String,
    scale: f64,
    header: Header,
    wcs: Option<Wcs>,
}
