//! Remote API backend
//!
//! Client side of the survey's web API. One parameterized request per
//! logical operation; responses carry `{data, error}` where `data` holds
//! the canonical `value`/`ivar`/`mask`/`unit`/`header` fields. Transport
//! failures keep the underlying message verbatim.

use crate::error::{MangaError, Result};
use crate::header::{CardValue, Header};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Envelope of every API response
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Unwrap the payload, surfacing the server-provided error string when
    /// the application reported a failure.
    pub fn into_data(self) -> Result<T> {
        match self.data {
            Some(data) => Ok(data),
            None => Err(MangaError::Remote(format!(
                "something went wrong. Error is: {}",
                self.error.unwrap_or_else(|| "unknown error".to_string())
            ))),
        }
    }
}

/// Payload of a cube fetch
#[derive(Debug, Serialize, Deserialize)]
pub struct CubePayload {
    pub plateifu: String,
    pub mangaid: Option<String>,
    pub ra: f64,
    pub dec: f64,
    /// (nwave, ny, nx)
    pub shape: [usize; 3],
    pub value: Vec<Vec<Vec<f32>>>,
    pub ivar: Vec<Vec<Vec<f32>>>,
    pub mask: Vec<Vec<Vec<i32>>>,
    pub wave: Vec<f64>,
    pub unit: String,
    pub header: HashMap<String, serde_json::Value>,
}

/// Payload of a maps metadata fetch
#[derive(Debug, Serialize, Deserialize)]
pub struct MapsPayload {
    pub plateifu: String,
    pub mangaid: Option<String>,
    /// (ny, nx)
    pub shape: [usize; 2],
    pub header: HashMap<String, serde_json::Value>,
}

/// Payload of a single map fetch. The server returns the channel already
/// sliced out, so the arrays are always 2D.
#[derive(Debug, Serialize, Deserialize)]
pub struct MapPayload {
    pub value: Vec<Vec<f64>>,
    pub ivar: Option<Vec<Vec<f64>>>,
    pub mask: Option<Vec<Vec<f64>>>,
    pub unit: String,
    pub header: HashMap<String, serde_json::Value>,
}

/// Blocking client for the survey API
pub struct ApiClient {
    base: String,
    client: reqwest::blocking::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| MangaError::Remote(e.to_string()))?;
        Ok(Self {
            base: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, params: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}/{}", self.base, path);
        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .map_err(|e| MangaError::Remote(e.to_string()))?;

        response
            .json::<ApiResponse<T>>()
            .map_err(|e| MangaError::Remote(e.to_string()))?
            .into_data()
    }

    /// Fetch a full cube, version identifiers as query parameters
    pub fn get_cube(&self, plateifu: &str, release: &str, drpver: &str) -> Result<CubePayload> {
        self.get_json(
            &format!("cubes/{}/", plateifu),
            &[("release", release), ("drpver", drpver)],
        )
    }

    /// Fetch maps metadata for an object
    pub fn get_maps(&self, plateifu: &str, release: &str, drpver: &str) -> Result<MapsPayload> {
        self.get_json(
            &format!("maps/{}/", plateifu),
            &[("release", release), ("drpver", drpver)],
        )
    }

    /// Fetch one 2D map, optionally one channel of a multi-channel property
    pub fn get_map(
        &self,
        plateifu: &str,
        release: &str,
        drpver: &str,
        property_name: &str,
        channel: Option<&str>,
    ) -> Result<MapPayload> {
        let mut params = vec![
            ("release", release),
            ("drpver", drpver),
            ("property_name", property_name),
        ];
        if let Some(channel) = channel {
            params.push(("channel", channel));
        }
        self.get_json(&format!("maps/{}/map/", plateifu), &params)
            .map_err(|e| match e {
                MangaError::Remote(msg) => MangaError::Remote(format!(
                    "found a problem when getting the map: {}",
                    msg
                )),
                other => other,
            })
    }
}

/// Convert a nested 3D payload array into a canonical `Array3`
pub(crate) fn to_array3<T: Copy>(
    shape: [usize; 3],
    nested: &[Vec<Vec<T>>],
) -> Result<ndarray::Array3<T>> {
    let [n0, n1, n2] = shape;
    let mut flat = Vec::with_capacity(n0 * n1 * n2);
    for plane in nested {
        for row in plane {
            flat.extend_from_slice(row);
        }
    }
    ndarray::Array3::from_shape_vec((n0, n1, n2), flat)
        .map_err(|e| MangaError::Remote(format!("payload shape mismatch: {}", e)))
}

/// Convert a nested 2D payload array into a canonical `Array2`
pub(crate) fn to_array2<T: Copy>(nested: &[Vec<T>]) -> Result<ndarray::Array2<T>> {
    let ny = nested.len();
    let nx = nested.first().map(Vec::len).unwrap_or(0);
    let mut flat = Vec::with_capacity(ny * nx);
    for row in nested {
        flat.extend_from_slice(row);
    }
    ndarray::Array2::from_shape_vec((ny, nx), flat)
        .map_err(|e| MangaError::Remote(format!("payload shape mismatch: {}", e)))
}

/// Convert a JSON header mapping into header cards
pub fn header_from_json(json: &HashMap<String, serde_json::Value>) -> Header {
    let mut header = Header::new();
    for (key, value) in json {
        let card = match value {
            serde_json::Value::Bool(b) => CardValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    CardValue::Int(i)
                } else {
                    CardValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => CardValue::Str(s.clone()),
            other => CardValue::Str(other.to_string()),
        };
        header.insert(key.clone(), card);
    }
    header
}
