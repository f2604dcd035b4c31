//! Spaxel and pixel extraction
//!
//! Coordinate-validated slicing of a cube or map into single spatial
//! elements. Exactly one coordinate pair must be supplied: either (x, y)
//! pixel indices or (ra, dec) sky coordinates, both halves present, never
//! both pairs at once.

use crate::error::{MangaError, Result};
use crate::wcs::Wcs;
use ndarray::Array1;

/// A scalar coordinate or an equal-length sequence of coordinates
#[derive(Debug, Clone, PartialEq)]
pub enum Coord {
    Scalar(f64),
    List(Vec<f64>),
}

impl Coord {
    fn values(&self) -> Vec<f64> {
        match self {
            Coord::Scalar(v) => vec![*v],
            Coord::List(vs) => vs.clone(),
        }
    }

    fn is_scalar(&self) -> bool {
        matches!(self, Coord::Scalar(_))
    }
}

impl From<f64> for Coord {
    fn from(v: f64) -> Self {
        Coord::Scalar(v)
    }
}

impl From<i32> for Coord {
    fn from(v: i32) -> Self {
        Coord::Scalar(v as f64)
    }
}

impl From<Vec<f64>> for Coord {
    fn from(vs: Vec<f64>) -> Self {
        Coord::List(vs)
    }
}

impl From<Vec<i32>> for Coord {
    fn from(vs: Vec<i32>) -> Self {
        Coord::List(vs.into_iter().map(f64::from).collect())
    }
}

/// Origin convention for pixel inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XyOrig {
    /// Indices measured from the geometric center of the array
    #[default]
    Center,
    /// Indices measured from the lower-left corner
    Lower,
}

/// Coordinate inputs for one extraction
#[derive(Debug, Clone, Default)]
pub struct SpaxelQuery {
    pub x: Option<Coord>,
    pub y: Option<Coord>,
    pub ra: Option<Coord>,
    pub dec: Option<Coord>,
    pub xyorig: XyOrig,
}

impl SpaxelQuery {
    /// Pixel-indexed query
    pub fn xy(x: impl Into<Coord>, y: impl Into<Coord>) -> Self {
        Self {
            x: Some(x.into()),
            y: Some(y.into()),
            ..Self::default()
        }
    }

    /// Sky-indexed query
    pub fn sky(ra: impl Into<Coord>, dec: impl Into<Coord>) -> Self {
        Self {
            ra: Some(ra.into()),
            dec: Some(dec.into()),
            ..Self::default()
        }
    }

    pub fn with_xyorig(mut self, xyorig: XyOrig) -> Self {
        self.xyorig = xyorig;
        self
    }
}

/// A single element's extracted spectrum
#[derive(Debug, Clone)]
pub struct Spaxel {
    pub x: usize,
    pub y: usize,
    pub flux: Array1<f32>,
    pub ivar: Array1<f32>,
    pub mask: Array1<i32>,
}

/// Extraction result: scalar inputs yield a single element, sequence
/// inputs yield a sequence in the same order.
#[derive(Debug, Clone)]
pub enum Extracted<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Extracted<T> {
    pub fn into_one(self) -> Option<T> {
        match self {
            Extracted::One(item) => Some(item),
            Extracted::Many(_) => None,
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            Extracted::One(item) => vec![item],
            Extracted::Many(items) => items,
        }
    }
}

/// Resolve a query into validated 0-based array positions.
///
/// `shape` is (ny, nx). Returns the positions plus whether the input was
/// scalar. Every failure mode carries its own distinct message.
pub fn resolve_positions(
    shape: (usize, usize),
    wcs: Option<&Wcs>,
    query: &SpaxelQuery,
) -> Result<(Vec<(usize, usize)>, bool)> {
    let has_xy = query.x.is_some() || query.y.is_some();
    let has_sky = query.ra.is_some() || query.dec.is_some();

    if has_xy && has_sky {
        return Err(MangaError::InvalidArguments(
            "Either use (x, y) or (ra, dec)".to_string(),
        ));
    }

    if has_xy {
        let (x, y) = match (&query.x, &query.y) {
            (Some(x), Some(y)) => (x, y),
            _ => {
                return Err(MangaError::InvalidArguments(
                    "Specify both x and y".to_string(),
                ))
            }
        };
        let scalar = x.is_scalar() && y.is_scalar();
        let (xs, ys) = (x.values(), y.values());
        if xs.len() != ys.len() {
            return Err(MangaError::InvalidArguments(
                "x and y must be of the same length".to_string(),
            ));
        }

        let (ny, nx) = shape;
        let positions = xs
            .iter()
            .zip(ys.iter())
            .map(|(&x, &y)| {
                let (xf, yf) = match query.xyorig {
                    XyOrig::Lower => (x, y),
                    XyOrig::Center => (x + nx as f64 / 2.0, y + ny as f64 / 2.0),
                };
                bounds_check(shape, xf.floor(), yf.floor())
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok((positions, scalar));
    }

    if has_sky {
        let (ra, dec) = match (&query.ra, &query.dec) {
            (Some(ra), Some(dec)) => (ra, dec),
            _ => {
                return Err(MangaError::InvalidArguments(
                    "Specify both ra and dec".to_string(),
                ))
            }
        };
        let scalar = ra.is_scalar() && dec.is_scalar();
        let (ras, decs) = (ra.values(), dec.values());
        if ras.len() != decs.len() {
            return Err(MangaError::InvalidArguments(
                "ra and dec must be of the same length".to_string(),
            ));
        }

        let wcs = wcs.ok_or_else(|| {
            MangaError::Unsupported("no WCS information to use (ra, dec)".to_string())
        })?;

        let positions = ras
            .iter()
            .zip(decs.iter())
            .map(|(&ra, &dec)| {
                let (xf, yf) = wcs.sky_to_pixel(ra, dec)?;
                bounds_check(shape, xf.round(), yf.round())
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok((positions, scalar));
    }

    Err(MangaError::InvalidArguments(
        "You need to specify either (x, y) or (ra, dec)".to_string(),
    ))
}

fn bounds_check(shape: (usize, usize), x: f64, y: f64) -> Result<(usize, usize)> {
    let (ny, nx) = shape;
    if x < 0.0 || x >= nx as f64 || y < 0.0 || y >= ny as f64 {
        return Err(MangaError::IndexOutOfBounds);
    }
    Ok((x as usize, y as usize))
}
