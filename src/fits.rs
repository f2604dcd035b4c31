//! Thin wrapper around the FITS backend
//!
//! The survey's files are multi-extension FITS; this crate always reads
//! extensions by `EXTNAME`, never by position. Parsing itself is delegated
//! to the `fitrs` crate; this module only adapts its data model to the
//! canonical arrays and headers used by the loaders.

use crate::error::{MangaError, Result};
use crate::header::{CardValue, Header};
use fitrs::{Fits, FitsData, Hdu, HeaderValue};
use std::path::{Path, PathBuf};

/// Header keys the loaders care about. FITS headers are open-ended but the
/// canonical entities only consume the WCS solution plus a few provenance
/// cards.
const HEADER_KEYS: &[&str] = &[
    "EXTNAME", "BUNIT", "VERSDRP3", "VERSDAP", "MANGAID", "PLATEIFU", "CRPIX1", "CRPIX2",
    "CRVAL1", "CRVAL2", "CD1_1", "CD1_2", "CD2_1", "CD2_2", "CTYPE1", "CTYPE2", "CUNIT1",
    "CUNIT2",
];

/// An open FITS file, scoped to one load operation
pub struct FitsStore {
    path: PathBuf,
    fits: Fits,
}

impl FitsStore {
    /// Open a file. The handle is dropped (and the file released) when the
    /// store goes out of scope at the end of the load.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let fits = Fits::open(&path)
            .map_err(|e| MangaError::Fits(format!("cannot open {}: {}", path.display(), e)))?;
        Ok(Self { path, fits })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn hdu(&self, extname: &str) -> Result<Hdu> {
        self.fits.get_by_name(extname).ok_or_else(|| {
            MangaError::Fits(format!(
                "extension {:?} not found in {}",
                extname,
                self.path.display()
            ))
        })
    }

    /// Whether the file carries an extension with this name
    pub fn has_extension(&self, extname: &str) -> bool {
        self.fits.get_by_name(extname).is_some()
    }

    /// Read an extension as a flat f32 buffer plus its shape in FITS axis
    /// order (NAXIS1 first, fastest-varying).
    pub fn read_f32(&self, extname: &str) -> Result<(Vec<usize>, Vec<f32>)> {
        let hdu = self.hdu(extname)?;
        match hdu.read_data() {
            FitsData::FloatingPoint32(arr) => Ok((arr.shape, arr.data)),
            FitsData::FloatingPoint64(arr) => {
                Ok((arr.shape, arr.data.into_iter().map(|v| v as f32).collect()))
            }
            _ => Err(MangaError::Fits(format!(
                "extension {:?} is not floating point",
                extname
            ))),
        }
    }

    /// Read an extension as a flat f64 buffer plus its shape
    pub fn read_f64(&self, extname: &str) -> Result<(Vec<usize>, Vec<f64>)> {
        let hdu = self.hdu(extname)?;
        match hdu.read_data() {
            FitsData::FloatingPoint32(arr) => {
                Ok((arr.shape, arr.data.into_iter().map(f64::from).collect()))
            }
            FitsData::FloatingPoint64(arr) => Ok((arr.shape, arr.data)),
            _ => Err(MangaError::Fits(format!(
                "extension {:?} is not floating point",
                extname
            ))),
        }
    }

    /// Read an integer extension (a mask plane). Blank pixels read as zero.
    pub fn read_i32(&self, extname: &str) -> Result<(Vec<usize>, Vec<i32>)> {
        let hdu = self.hdu(extname)?;
        match hdu.read_data() {
            FitsData::IntegersI32(arr) => Ok((
                arr.shape,
                arr.data.into_iter().map(|v| v.unwrap_or(0)).collect(),
            )),
            FitsData::IntegersU32(arr) => Ok((
                arr.shape,
                arr.data
                    .into_iter()
                    .map(|v| v.map(|u| u as i32).unwrap_or(0))
                    .collect(),
            )),
            _ => Err(MangaError::Fits(format!(
                "extension {:?} is not integer",
                extname
            ))),
        }
    }

    /// Extract the cards of interest from an extension header
    pub fn read_header(&self, extname: &str) -> Result<Header> {
        let hdu = self.hdu(extname)?;
        let mut header = Header::new();
        for &key in HEADER_KEYS {
            if let Some(value) = hdu.value(key) {
                header.insert(key, convert_card(&value));
            }
        }
        Ok(header)
    }
}

fn convert_card(value: &HeaderValue) -> CardValue {
    match value {
        HeaderValue::CharacterString(s) => CardValue::Str(s.clone()),
        HeaderValue::Logical(b) => CardValue::Bool(*b),
        HeaderValue::IntegerNumber(v) => CardValue::Int((*v).into()),
        HeaderValue::RealFloatingNumber(v) => CardValue::Float(*v),
        HeaderValue::ComplexIntegerNumber(re, _) => CardValue::Int((*re).into()),
        HeaderValue::ComplexFloatingNumber(re, _) => CardValue::Float(*re),
    }
}
