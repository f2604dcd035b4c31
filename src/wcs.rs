//! Minimal world-coordinate handling
//!
//! Sky-to-pixel conversion for the small fields of view this crate deals
//! with. Only the linear CRPIX/CRVAL/CD form is supported; full projection
//! math is out of scope and belongs to dedicated WCS libraries.

use crate::error::{MangaError, Result};
use crate::header::Header;
use serde::{Deserialize, Serialize};

/// Linear WCS for the two spatial axes of a cube or map
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wcs {
    /// Reference pixel (1-based, FITS convention)
    pub crpix1: f64,
    pub crpix2: f64,
    /// Sky coordinates at the reference pixel, in degrees (ra, dec)
    pub crval1: f64,
    pub crval2: f64,
    /// Linear transformation matrix, degrees per pixel
    pub cd: [[f64; 2]; 2],
}

impl Wcs {
    /// Build a WCS from header cards. Requires CRPIX1/2, CRVAL1/2 and a
    /// CD matrix; missing off-diagonal CD terms default to zero.
    pub fn from_header(header: &Header) -> Result<Self> {
        let card = |key: &str| {
            header
                .get_f64(key)
                .ok_or_else(|| MangaError::Fits(format!("missing WCS card {}", key)))
        };

        Ok(Self {
            crpix1: card("CRPIX1")?,
            crpix2: card("CRPIX2")?,
            crval1: card("CRVAL1")?,
            crval2: card("CRVAL2")?,
            cd: [
                [card("CD1_1")?, header.get_f64("CD1_2").unwrap_or(0.0)],
                [header.get_f64("CD2_1").unwrap_or(0.0), card("CD2_2")?],
            ],
        })
    }

    /// Convert (ra, dec) in degrees to 0-based fractional pixel coordinates
    pub fn sky_to_pixel(&self, ra: f64, dec: f64) -> Result<(f64, f64)> {
        let det = self.cd[0][0] * self.cd[1][1] - self.cd[0][1] * self.cd[1][0];
        if det == 0.0 {
            return Err(MangaError::Fits("singular CD matrix".to_string()));
        }

        // Offsets on the tangent plane; RA offsets shrink with cos(dec).
        let dra = (ra - self.crval1) * self.crval2.to_radians().cos();
        let ddec = dec - self.crval2;

        let dx = (self.cd[1][1] * dra - self.cd[0][1] * ddec) / det;
        let dy = (-self.cd[1][0] * dra + self.cd[0][0] * ddec) / det;

        // CRPIX is 1-based.
        Ok((self.crpix1 - 1.0 + dx, self.crpix2 - 1.0 + dy))
    }

    /// Convert 0-based pixel coordinates to (ra, dec) in degrees
    pub fn pixel_to_sky(&self, x: f64, y: f64) -> (f64, f64) {
        let dx = x - (self.crpix1 - 1.0);
        let dy = y - (self.crpix2 - 1.0);

        let dra = self.cd[0][0] * dx + self.cd[0][1] * dy;
        let ddec = self.cd[1][0] * dx + self.cd[1][1] * dy;

        let ra = self.crval1 + dra / self.crval2.to_radians().cos();
        let dec = self.crval2 + ddec;
        (ra, dec)
    }
}
