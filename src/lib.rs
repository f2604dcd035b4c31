//! manga-data - unified access to MaNGA survey data products
//!
//! A single API over the three places a galaxy's data products may live:
//! a local FITS file, a local relational database, or the remote survey
//! API. An entity resolves its origin once at construction, loads there,
//! and behaves identically afterwards regardless of where the bytes came
//! from.
//!
//! # Features
//!
//! - 3D spectral cubes ([`Cube`]) and 2D map products ([`Maps`], [`Map`])
//! - Transparent origin resolution: filename, plate-ifu, or manga-id
//! - Release-versioned registry of extensions, properties, and channels
//!   with fuzzy name lookup
//! - Spaxel and pixel extraction by array or sky coordinates
//! - Binary snapshots for offline round-trips
//!
//! # Example
//!
//! ```rust,ignore
//! use manga_data::{Config, Cube, Input, SpaxelQuery};
//!
//! fn example() -> manga_data::Result<()> {
//!     let config = Config::new("MPL-5");
//!     let cube = Cube::new(Input::plateifu("8485-1901"), &config)?;
//!     let spaxel = cube.get_spaxel(&SpaxelQuery::xy(10, 5))?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cube;
pub mod datamodel;
pub mod db;
pub mod error;
pub mod fits;
pub mod fuzzy;
pub mod header;
pub mod maps;
pub mod remote;
pub mod resolve;
pub mod spaxel;
pub mod wcs;

// Re-exports
pub use config::{Config, Mode};
pub use cube::Cube;
pub use datamodel::{datamodels, ArrayExt, DataModelList, DrpDataModel, Kind};
pub use error::{MangaError, Result};
pub use header::{CardValue, Header};
pub use maps::{Map, MapPixel, Maps};
pub use resolve::{Input, Origin};
pub use spaxel::{Coord, Extracted, Spaxel, SpaxelQuery, XyOrig};
pub use wcs::Wcs;

/// Version of the library
pub const MANGA_DATA_VERSION: &str = env!("CARGO_PKG_VERSION");
