//! End-to-end tests across the three data origins.
//!
//! Each test builds its own fixtures: a standards-compliant FITS file
//! written from scratch, a throwaway SQLite database, or a one-shot HTTP
//! server with canned JSON payloads. The same synthetic galaxy is used
//! everywhere so arrays loaded through different origins can be compared
//! element for element.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::{fs, thread};

use serde_json::json;

use manga_data::{
    Config, Cube, Extracted, Input, MangaError, Maps, Mode, Origin, SpaxelQuery, XyOrig,
};

const PLATEIFU: &str = "8485-1901";
const MANGAID: &str = "1-209232";
const RELEASE: &str = "MPL-5";
const DRPVER: &str = "v2_0_1";
const NX: usize = 3;
const NY: usize = 3;
const NWAVE: usize = 4;
const NCHAN: usize = 4;
const RA: f64 = 232.5447;
const DEC: f64 = 48.6902;

fn flux_at(w: usize, y: usize, x: usize) -> f32 {
    (w * 100 + y * 10 + x) as f32
}

fn ivar_at(w: usize, y: usize, x: usize) -> f32 {
    (w + y + x) as f32 * 0.5 + 1.0
}

fn mask_at(w: usize, y: usize, x: usize) -> i32 {
    ((w + y + x) % 2) as i32
}

fn wave_at(w: usize) -> f64 {
    3600.0 + w as f64
}

fn emline_at(c: usize, y: usize, x: usize) -> f64 {
    (c * 100 + y * 10 + x) as f64
}

fn svel_at(y: usize, x: usize) -> f64 {
    (y * 10 + x) as f64 - 40.0
}

// ---------------------------------------------------------------------------
// FITS fixture writer
// ---------------------------------------------------------------------------

enum ExtData {
    F32(Vec<usize>, Vec<f32>),
    F64(Vec<usize>, Vec<f64>),
    I32(Vec<usize>, Vec<i32>),
}

struct Ext {
    name: &'static str,
    data: ExtData,
    cards: Vec<(String, String)>,
}

fn val_str(s: &str) -> String {
    format!("'{:<8}'", s)
}

fn val_int(v: i64) -> String {
    format!("{:>20}", v)
}

fn val_f64(v: f64) -> String {
    format!("{:>20}", format!("{:.10}", v))
}

fn val_logical(v: bool) -> String {
    format!("{:>20}", if v { "T" } else { "F" })
}

fn push_card(block: &mut Vec<u8>, key: &str, value: &str) {
    let mut card = format!("{:<8}= {}", key, value);
    card.truncate(80);
    while card.len() < 80 {
        card.push(' ');
    }
    block.extend_from_slice(card.as_bytes());
}

fn push_end(block: &mut Vec<u8>) {
    let mut card = String::from("END");
    while card.len() < 80 {
        card.push(' ');
    }
    block.extend_from_slice(card.as_bytes());
}

fn pad_to_block(buf: &mut Vec<u8>, fill: u8) {
    while buf.len() % 2880 != 0 {
        buf.push(fill);
    }
}

/// Cards common to the main extension of every fixture file
fn wcs_cards() -> Vec<(String, String)> {
    vec![
        ("PLATEIFU".to_string(), val_str(PLATEIFU)),
        ("MANGAID".to_string(), val_str(MANGAID)),
        ("CRPIX1".to_string(), val_f64(2.0)),
        ("CRPIX2".to_string(), val_f64(2.0)),
        ("CRVAL1".to_string(), val_f64(RA)),
        ("CRVAL2".to_string(), val_f64(DEC)),
        ("CD1_1".to_string(), val_f64(-0.0001388889)),
        ("CD1_2".to_string(), val_f64(0.0)),
        ("CD2_1".to_string(), val_f64(0.0)),
        ("CD2_2".to_string(), val_f64(0.0001388889)),
        ("CTYPE1".to_string(), val_str("RA---TAN")),
        ("CTYPE2".to_string(), val_str("DEC--TAN")),
    ]
}

fn write_fits(path: &Path, exts: &[Ext]) {
    let mut buf = Vec::new();

    // Primary HDU carries no data.
    let mut primary = Vec::new();
    push_card(&mut primary, "SIMPLE", &val_logical(true));
    push_card(&mut primary, "BITPIX", &val_int(8));
    push_card(&mut primary, "NAXIS", &val_int(0));
    push_card(&mut primary, "EXTEND", &val_logical(true));
    push_end(&mut primary);
    buf.append(&mut primary);
    pad_to_block(&mut buf, b' ');

    for ext in exts {
        let (bitpix, shape, data): (i64, &[usize], Vec<u8>) = match &ext.data {
            ExtData::F32(shape, data) => (
                -32,
                shape,
                data.iter().flat_map(|v| v.to_be_bytes()).collect(),
            ),
            ExtData::F64(shape, data) => (
                -64,
                shape,
                data.iter().flat_map(|v| v.to_be_bytes()).collect(),
            ),
            ExtData::I32(shape, data) => (
                32,
                shape,
                data.iter().flat_map(|v| v.to_be_bytes()).collect(),
            ),
        };

        let mut header = Vec::new();
        push_card(&mut header, "XTENSION", &val_str("IMAGE"));
        push_card(&mut header, "BITPIX", &val_int(bitpix));
        push_card(&mut header, "NAXIS", &val_int(shape.len() as i64));
        for (i, n) in shape.iter().enumerate() {
            push_card(&mut header, &format!("NAXIS{}", i + 1), &val_int(*n as i64));
        }
        push_card(&mut header, "PCOUNT", &val_int(0));
        push_card(&mut header, "GCOUNT", &val_int(1));
        push_card(&mut header, "EXTNAME", &val_str(ext.name));
        for (key, value) in &ext.cards {
            push_card(&mut header, key, value);
        }
        push_end(&mut header);
        buf.append(&mut header);
        pad_to_block(&mut buf, b' ');

        buf.extend_from_slice(&data);
        pad_to_block(&mut buf, 0);
    }

    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, buf).unwrap();
}

/// A LOGCUBE file at the configured layout location
fn write_cube_file(config: &Config) -> PathBuf {
    let mut flux = Vec::with_capacity(NWAVE * NY * NX);
    let mut ivar = Vec::with_capacity(NWAVE * NY * NX);
    let mut mask = Vec::with_capacity(NWAVE * NY * NX);
    // FITS linear order: NAXIS1 (x) varies fastest.
    for w in 0..NWAVE {
        for y in 0..NY {
            for x in 0..NX {
                flux.push(flux_at(w, y, x));
                ivar.push(ivar_at(w, y, x));
                mask.push(mask_at(w, y, x));
            }
        }
    }
    let wave: Vec<f64> = (0..NWAVE).map(wave_at).collect();

    let shape = vec![NX, NY, NWAVE];
    let mut cards = wcs_cards();
    cards.push((
        "BUNIT".to_string(),
        val_str("1e-17 erg / (s cm2 spaxel Angstrom)"),
    ));

    let path = config.cube_path(PLATEIFU);
    write_fits(
        &path,
        &[
            Ext {
                name: "FLUX",
                data: ExtData::F32(shape.clone(), flux),
                cards,
            },
            Ext {
                name: "IVAR",
                data: ExtData::F32(shape.clone(), ivar),
                cards: vec![],
            },
            Ext {
                name: "MASK",
                data: ExtData::I32(shape, mask),
                cards: vec![],
            },
            Ext {
                name: "WAVE",
                data: ExtData::F64(vec![NWAVE], wave),
                cards: vec![],
            },
        ],
    );
    path
}

/// A MAPS file with one multi-channel and one single-channel property
fn write_maps_file(config: &Config) -> PathBuf {
    let mut emline = Vec::new();
    let mut emline_ivar = Vec::new();
    let mut emline_mask = Vec::new();
    for c in 0..NCHAN {
        for y in 0..NY {
            for x in 0..NX {
                emline.push(emline_at(c, y, x));
                emline_ivar.push(2.0);
                emline_mask.push(x as i32);
            }
        }
    }
    let mut svel = Vec::new();
    let mut svel_ivar = Vec::new();
    let mut svel_mask = Vec::new();
    for y in 0..NY {
        for x in 0..NX {
            svel.push(svel_at(y, x));
            svel_ivar.push(4.0);
            svel_mask.push(0);
        }
    }

    let shape3 = vec![NX, NY, NCHAN];
    let shape2 = vec![NX, NY];
    let path = config.maps_path(PLATEIFU);
    write_fits(
        &path,
        &[
            Ext {
                name: "EMLINE_GFLUX",
                data: ExtData::F64(shape3.clone(), emline),
                cards: wcs_cards(),
            },
            Ext {
                name: "EMLINE_GFLUX_IVAR",
                data: ExtData::F64(shape3.clone(), emline_ivar),
                cards: vec![],
            },
            Ext {
                name: "EMLINE_GFLUX_MASK",
                data: ExtData::I32(shape3, emline_mask),
                cards: vec![],
            },
            Ext {
                name: "STELLAR_VEL",
                data: ExtData::F64(shape2.clone(), svel),
                cards: vec![("BUNIT".to_string(), val_str("km / s"))],
            },
            Ext {
                name: "STELLAR_VEL_IVAR",
                data: ExtData::F64(shape2.clone(), svel_ivar),
                cards: vec![],
            },
            Ext {
                name: "STELLAR_VEL_MASK",
                data: ExtData::I32(shape2, svel_mask),
                cards: vec![],
            },
        ],
    );
    path
}

// ---------------------------------------------------------------------------
// SQLite fixture
// ---------------------------------------------------------------------------

fn f32_blob(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn f64_blob(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn i32_blob(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn write_db(path: &Path) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE cube (
            plateifu TEXT, mangaid TEXT, release TEXT,
            ra REAL, dec REAL,
            nx INTEGER, ny INTEGER, nwave INTEGER,
            wave BLOB
        );
        CREATE TABLE cube_spaxel (
            plateifu TEXT, release TEXT, spaxel_index INTEGER,
            flux BLOB, ivar BLOB, mask BLOB
        );
        CREATE TABLE maps_spaxel (
            plateifu TEXT, release TEXT, spaxel_index INTEGER,
            emline_gflux_ha_6564 REAL, emline_gflux_ha_6564_ivar REAL,
            emline_gflux_ha_6564_mask REAL,
            emline_gflux_oiii_5008 REAL, emline_gflux_oiii_5008_ivar REAL,
            emline_gflux_oiii_5008_mask REAL,
            stellar_vel REAL, stellar_vel_ivar REAL, stellar_vel_mask REAL
        );
        CREATE TABLE header (
            plateifu TEXT, release TEXT, extname TEXT, key TEXT, value TEXT
        );",
    )
    .unwrap();

    let wave: Vec<f64> = (0..NWAVE).map(wave_at).collect();
    conn.execute(
        "INSERT INTO cube VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            PLATEIFU,
            MANGAID,
            RELEASE,
            RA,
            DEC,
            NX as i64,
            NY as i64,
            NWAVE as i64,
            f64_blob(&wave)
        ],
    )
    .unwrap();

    // Spaxel rows are inserted back to front; loaders must not rely on
    // storage order.
    for idx in (0..NY * NX).rev() {
        let (y, x) = (idx / NX, idx % NX);
        let flux: Vec<f32> = (0..NWAVE).map(|w| flux_at(w, y, x)).collect();
        let ivar: Vec<f32> = (0..NWAVE).map(|w| ivar_at(w, y, x)).collect();
        let mask: Vec<i32> = (0..NWAVE).map(|w| mask_at(w, y, x)).collect();
        conn.execute(
            "INSERT INTO cube_spaxel VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                PLATEIFU,
                RELEASE,
                idx as i64,
                f32_blob(&flux),
                f32_blob(&ivar),
                i32_blob(&mask)
            ],
        )
        .unwrap();

        conn.execute(
            "INSERT INTO maps_spaxel VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                PLATEIFU,
                RELEASE,
                idx as i64,
                emline_at(0, y, x),
                2.0,
                x as f64,
                emline_at(2, y, x),
                2.0,
                x as f64,
                svel_at(y, x),
                4.0,
                0.0
            ],
        )
        .unwrap();
    }

    let header_rows: Vec<(&str, String, String)> = vec![
        ("FLUX", "EXTNAME".to_string(), "FLUX".to_string()),
        ("FLUX", "CRPIX1".to_string(), "2.0".to_string()),
        ("FLUX", "CRPIX2".to_string(), "2.0".to_string()),
        ("FLUX", "CRVAL1".to_string(), format!("{}", RA)),
        ("FLUX", "CRVAL2".to_string(), format!("{}", DEC)),
        ("FLUX", "CD1_1".to_string(), "-0.0001388889".to_string()),
        ("FLUX", "CD2_2".to_string(), "0.0001388889".to_string()),
        ("EMLINE_GFLUX", "EXTNAME".to_string(), "EMLINE_GFLUX".to_string()),
        ("EMLINE_GFLUX", "CRPIX1".to_string(), "2.0".to_string()),
        ("EMLINE_GFLUX", "CRPIX2".to_string(), "2.0".to_string()),
        ("EMLINE_GFLUX", "CRVAL1".to_string(), format!("{}", RA)),
        ("EMLINE_GFLUX", "CRVAL2".to_string(), format!("{}", DEC)),
        ("EMLINE_GFLUX", "CD1_1".to_string(), "-0.0001388889".to_string()),
        ("EMLINE_GFLUX", "CD2_2".to_string(), "0.0001388889".to_string()),
    ];
    for (extname, key, value) in header_rows {
        conn.execute(
            "INSERT INTO header VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![PLATEIFU, RELEASE, extname, key, value],
        )
        .unwrap();
    }
}

// ---------------------------------------------------------------------------
// Stub API server
// ---------------------------------------------------------------------------

/// Serve canned JSON bodies, routed by a substring of the request line.
/// The listener lives for the duration of the test process.
fn spawn_api(routes: Vec<(&'static str, serde_json::Value)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request_line = String::new();
            if reader.read_line(&mut request_line).is_err() {
                continue;
            }
            loop {
                let mut header = String::new();
                match reader.read_line(&mut header) {
                    Ok(0) => break,
                    Ok(_) if header == "\r\n" => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }

            let body = routes
                .iter()
                .find(|(fragment, _)| request_line.contains(fragment))
                .map(|(_, payload)| payload.to_string())
                .unwrap_or_else(|| json!({"error": "no route"}).to_string());
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });

    format!("http://{}", addr)
}

fn json_header() -> serde_json::Value {
    json!({
        "EXTNAME": "FLUX",
        "PLATEIFU": PLATEIFU,
        "MANGAID": MANGAID,
        "CRPIX1": 2.0,
        "CRPIX2": 2.0,
        "CRVAL1": RA,
        "CRVAL2": DEC,
        "CD1_1": -0.0001388889,
        "CD1_2": 0.0,
        "CD2_1": 0.0,
        "CD2_2": 0.0001388889,
    })
}

fn cube_payload() -> serde_json::Value {
    let mut value = vec![vec![vec![0f32; NX]; NY]; NWAVE];
    let mut ivar = vec![vec![vec![0f32; NX]; NY]; NWAVE];
    let mut mask = vec![vec![vec![0i32; NX]; NY]; NWAVE];
    for w in 0..NWAVE {
        for y in 0..NY {
            for x in 0..NX {
                value[w][y][x] = flux_at(w, y, x);
                ivar[w][y][x] = ivar_at(w, y, x);
                mask[w][y][x] = mask_at(w, y, x);
            }
        }
    }
    let wave: Vec<f64> = (0..NWAVE).map(wave_at).collect();
    json!({"data": {
        "plateifu": PLATEIFU,
        "mangaid": MANGAID,
        "ra": RA,
        "dec": DEC,
        "shape": [NWAVE, NY, NX],
        "value": value,
        "ivar": ivar,
        "mask": mask,
        "wave": wave,
        "unit": "1e-17 erg / (s cm2 spaxel Angstrom)",
        "header": json_header(),
    }})
}

fn maps_payload() -> serde_json::Value {
    json!({"data": {
        "plateifu": PLATEIFU,
        "mangaid": MANGAID,
        "shape": [NY, NX],
        "header": json_header(),
    }})
}

fn map_payload(channel: Option<usize>) -> serde_json::Value {
    let mut value = vec![vec![0f64; NX]; NY];
    let mut ivar = vec![vec![0f64; NX]; NY];
    for y in 0..NY {
        for x in 0..NX {
            match channel {
                Some(c) => {
                    value[y][x] = emline_at(c, y, x);
                    ivar[y][x] = 2.0;
                }
                None => {
                    value[y][x] = svel_at(y, x);
                    ivar[y][x] = 4.0;
                }
            }
        }
    }
    let unit = match channel {
        Some(_) => "1e-17 erg / (s cm2 spaxel)",
        None => "km / s",
    };
    json!({"data": {
        "value": value,
        "ivar": ivar,
        "mask": null,
        "unit": unit,
        "header": json_header(),
    }})
}

// ---------------------------------------------------------------------------
// Cube tests
// ---------------------------------------------------------------------------

/// Load a cube from a local FITS file and check every plane against the
/// fixture values.
#[test]
fn cube_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::new(RELEASE)
        .with_mode(Mode::Local)
        .with_data_root(dir.path());
    write_cube_file(&config);

    let cube = Cube::new(Input::plateifu(PLATEIFU), &config).unwrap();
    assert_eq!(cube.origin(), Origin::File);
    assert_eq!(cube.plateifu(), Some(PLATEIFU));
    assert_eq!(cube.mangaid(), Some(MANGAID));
    assert_eq!(cube.release(), RELEASE);
    assert_eq!(cube.drpver(), DRPVER);
    assert_eq!(cube.shape(), (NWAVE, NY, NX));
    assert!(cube.wcs().is_some());

    for w in 0..NWAVE {
        for y in 0..NY {
            for x in 0..NX {
                assert_eq!(cube.flux()[[w, y, x]], flux_at(w, y, x));
                assert_eq!(cube.ivar()[[w, y, x]], ivar_at(w, y, x));
                assert_eq!(cube.mask()[[w, y, x]], mask_at(w, y, x));
            }
        }
    }
    for w in 0..NWAVE {
        assert_eq!(cube.wavelength()[w], wave_at(w));
    }
}

/// An explicit filename bypasses path derivation.
#[test]
fn cube_from_explicit_filename() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::new(RELEASE)
        .with_mode(Mode::Local)
        .with_data_root(dir.path());
    let path = write_cube_file(&config);

    let cube = Cube::new(Input::filename(&path), &config).unwrap();
    assert_eq!(cube.origin(), Origin::File);
    assert_eq!(cube.filename(), Some(path.as_path()));
    assert_eq!(cube.flux()[[1, 2, 0]], flux_at(1, 2, 0));
}

/// The db origin reassembles per-spaxel spectra into the same arrays the
/// file origin produces.
#[test]
fn cube_from_db_matches_file() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("manga.sqlite");
    write_db(&db_path);

    let config = Config::new(RELEASE)
        .with_mode(Mode::Local)
        .with_data_root(dir.path())
        .with_db_path(&db_path);
    write_cube_file(&config);

    let db_cube = Cube::new(Input::plateifu(PLATEIFU), &config).unwrap();
    assert_eq!(db_cube.origin(), Origin::Db);

    let file_config = Config::new(RELEASE)
        .with_mode(Mode::Local)
        .with_data_root(dir.path());
    let file_cube = Cube::new(Input::plateifu(PLATEIFU), &file_config).unwrap();
    assert_eq!(file_cube.origin(), Origin::File);

    assert_eq!(db_cube.flux(), file_cube.flux());
    assert_eq!(db_cube.ivar(), file_cube.ivar());
    assert_eq!(db_cube.mask(), file_cube.mask());
    assert_eq!(db_cube.wavelength(), file_cube.wavelength());
    assert_eq!(db_cube.ra(), file_cube.ra());
    assert_eq!(db_cube.plateifu(), file_cube.plateifu());
}

/// A mangaid alone resolves to a plateifu through the db.
#[test]
fn cube_from_mangaid_via_db() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("manga.sqlite");
    write_db(&db_path);
    let config = Config::new(RELEASE)
        .with_mode(Mode::Local)
        .with_db_path(&db_path);

    let cube = Cube::new(Input::mangaid(MANGAID), &config).unwrap();
    assert_eq!(cube.origin(), Origin::Db);
    assert_eq!(cube.plateifu(), Some(PLATEIFU));
}

/// The api origin produces the same arrays as the file origin.
#[test]
fn cube_from_api_matches_file() {
    let dir = tempfile::tempdir().unwrap();
    let file_config = Config::new(RELEASE)
        .with_mode(Mode::Local)
        .with_data_root(dir.path());
    write_cube_file(&file_config);
    let file_cube = Cube::new(Input::plateifu(PLATEIFU), &file_config).unwrap();

    let base = spawn_api(vec![("/cubes/", cube_payload())]);
    let config = Config::new(RELEASE)
        .with_mode(Mode::Remote)
        .with_api_url(base);

    let api_cube = Cube::new(Input::plateifu(PLATEIFU), &config).unwrap();
    assert_eq!(api_cube.origin(), Origin::Api);
    assert_eq!(api_cube.flux(), file_cube.flux());
    assert_eq!(api_cube.ivar(), file_cube.ivar());
    assert_eq!(api_cube.mask(), file_cube.mask());
    assert_eq!(api_cube.wavelength(), file_cube.wavelength());
    assert_eq!(api_cube.ra(), RA);
}

/// The same spaxel extracted through every origin carries the same
/// spectrum.
#[test]
fn spaxel_is_origin_independent() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("manga.sqlite");
    write_db(&db_path);
    let file_config = Config::new(RELEASE)
        .with_mode(Mode::Local)
        .with_data_root(dir.path());
    write_cube_file(&file_config);
    let db_config = Config::new(RELEASE)
        .with_mode(Mode::Local)
        .with_db_path(&db_path);
    let base = spawn_api(vec![("/cubes/", cube_payload())]);
    let api_config = Config::new(RELEASE)
        .with_mode(Mode::Remote)
        .with_api_url(base);

    let query = SpaxelQuery::xy(2, 1).with_xyorig(XyOrig::Lower);
    let cubes = [
        Cube::new(Input::plateifu(PLATEIFU), &file_config).unwrap(),
        Cube::new(Input::plateifu(PLATEIFU), &db_config).unwrap(),
        Cube::new(Input::plateifu(PLATEIFU), &api_config).unwrap(),
    ];
    for cube in &cubes {
        let spaxel = cube.get_spaxel(&query).unwrap().into_one().unwrap();
        assert_eq!((spaxel.x, spaxel.y), (2, 1));
        for w in 0..NWAVE {
            assert_eq!(spaxel.flux[w], flux_at(w, 1, 2));
            assert_eq!(spaxel.ivar[w], ivar_at(w, 1, 2));
            assert_eq!(spaxel.mask[w], mask_at(w, 1, 2));
        }
    }
}

/// Sky coordinates at the reference point land on the reference pixel.
#[test]
fn spaxel_by_sky_coordinates() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::new(RELEASE)
        .with_mode(Mode::Local)
        .with_data_root(dir.path());
    write_cube_file(&config);
    let cube = Cube::new(Input::plateifu(PLATEIFU), &config).unwrap();

    let spaxel = cube
        .get_spaxel(&SpaxelQuery::sky(RA, DEC))
        .unwrap()
        .into_one()
        .unwrap();
    // CRPIX is 1-based 2, so the reference pixel is (1, 1).
    assert_eq!((spaxel.x, spaxel.y), (1, 1));
}

/// Multiple coordinate pairs come back in input order.
#[test]
fn spaxel_list_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::new(RELEASE)
        .with_mode(Mode::Local)
        .with_data_root(dir.path());
    write_cube_file(&config);
    let cube = Cube::new(Input::plateifu(PLATEIFU), &config).unwrap();

    let query = SpaxelQuery::xy(vec![0.0, 2.0], vec![0.0, 2.0]).with_xyorig(XyOrig::Lower);
    match cube.get_spaxel(&query).unwrap() {
        Extracted::Many(spaxels) => {
            assert_eq!(spaxels.len(), 2);
            assert_eq!((spaxels[0].x, spaxels[0].y), (0, 0));
            assert_eq!((spaxels[1].x, spaxels[1].y), (2, 2));
        }
        Extracted::One(_) => panic!("expected a list"),
    }
}

// ---------------------------------------------------------------------------
// Resolution failure tests
// ---------------------------------------------------------------------------

/// Local mode with no db and no file is a terminal file-not-found.
#[test]
fn local_miss_is_file_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::new(RELEASE)
        .with_mode(Mode::Local)
        .with_data_root(dir.path());

    let err = Cube::new(Input::plateifu(PLATEIFU), &config).unwrap_err();
    assert!(matches!(err, MangaError::FileNotFound(_)));
}

/// A connected db with no matching rows reports the canonical no-results
/// message in local mode.
#[test]
fn local_db_miss_reports_no_results() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("manga.sqlite");
    write_db(&db_path);
    let config = Config::new(RELEASE)
        .with_mode(Mode::Local)
        .with_db_path(&db_path);

    let err = Cube::new(Input::plateifu("1234-5678"), &config).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Could not retrieve cube for plate-ifu 1234-5678: No Results Found"
    );
}

/// A db failure after the metadata row, here a missing spectra table,
/// still carries the identifier and the unknown-exception label.
#[test]
fn db_fetch_failure_is_classified() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("manga.sqlite");
    let conn = rusqlite::Connection::open(&db_path).unwrap();
    conn.execute_batch(
        "CREATE TABLE cube (
            plateifu TEXT, mangaid TEXT, release TEXT,
            ra REAL, dec REAL,
            nx INTEGER, ny INTEGER, nwave INTEGER,
            wave BLOB
        );",
    )
    .unwrap();
    let wave: Vec<f64> = (0..NWAVE).map(wave_at).collect();
    conn.execute(
        "INSERT INTO cube VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            PLATEIFU,
            MANGAID,
            RELEASE,
            RA,
            DEC,
            NX as i64,
            NY as i64,
            NWAVE as i64,
            f64_blob(&wave)
        ],
    )
    .unwrap();
    drop(conn);

    let config = Config::new(RELEASE)
        .with_mode(Mode::Local)
        .with_db_path(&db_path);
    let err = Cube::new(Input::plateifu(PLATEIFU), &config).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("Unknown exception"), "unexpected message: {}", msg);
    assert!(msg.contains(PLATEIFU), "unexpected message: {}", msg);
}

/// Both a filename and an identifier is contradictory input.
#[test]
fn filename_and_identifier_conflict() {
    let config = Config::default();
    let input = Input::filename("/tmp/whatever.fits").with_release(RELEASE);
    let input = Input {
        plateifu: Some(PLATEIFU.to_string()),
        ..input
    };
    let err = Cube::new(input, &config).unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid arguments: Enter filename, plateifu, or mangaid!"
    );
}

/// The api error envelope surfaces as a remote error with the original
/// message preserved.
#[test]
fn api_error_envelope() {
    let base = spawn_api(vec![("/cubes/", json!({"error": "manga exception"}))]);
    let config = Config::new(RELEASE)
        .with_mode(Mode::Remote)
        .with_api_url(base);

    let err = Cube::new(Input::plateifu(PLATEIFU), &config).unwrap_err();
    assert_eq!(
        err.to_string(),
        "remote error: something went wrong. Error is: manga exception"
    );
}

/// A dead endpoint is a transport-level remote error.
#[test]
fn api_transport_failure() {
    let config = Config::new(RELEASE)
        .with_mode(Mode::Remote)
        .with_api_url("http://127.0.0.1:1");

    let err = Cube::new(Input::plateifu(PLATEIFU), &config).unwrap_err();
    assert!(matches!(err, MangaError::Remote(_)));
}

// ---------------------------------------------------------------------------
// Snapshot tests
// ---------------------------------------------------------------------------

/// Save a file-origin cube, restore it, and check the data and origin
/// survive the round trip. The snapshot is deleted on restore.
#[test]
fn cube_snapshot_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::new(RELEASE)
        .with_mode(Mode::Local)
        .with_data_root(dir.path());
    write_cube_file(&config);
    let cube = Cube::new(Input::plateifu(PLATEIFU), &config).unwrap();

    let saved = cube.save(None, &config).unwrap();
    assert_eq!(saved.extension().unwrap(), "mpf");

    let restored = Cube::restore(&saved, true).unwrap();
    assert!(!saved.exists());
    assert_eq!(restored.origin(), Origin::File);
    assert_eq!(restored.plateifu(), Some(PLATEIFU));
    assert_eq!(restored.flux(), cube.flux());
    assert_eq!(restored.wavelength(), cube.wavelength());
    assert_eq!(restored.header().get_str("EXTNAME").unwrap().trim(), "FLUX");
}

// ---------------------------------------------------------------------------
// Maps tests
// ---------------------------------------------------------------------------

/// Load the maps container from a file and slice individual channels out
/// of a multi-channel property.
#[test]
fn maps_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::new(RELEASE)
        .with_mode(Mode::Local)
        .with_data_root(dir.path());
    write_maps_file(&config);

    let maps = Maps::new(Input::plateifu(PLATEIFU), &config).unwrap();
    assert_eq!(maps.origin(), Origin::File);
    assert_eq!(maps.shape(), (NY, NX));
    assert_eq!(maps.plateifu(), Some(PLATEIFU));

    let ha = maps.get_map("emline_gflux", Some("ha_6564")).unwrap();
    assert_eq!(ha.property(), "emline_gflux_ha_6564");
    assert_eq!(ha.channel(), Some("ha_6564"));
    let oiii = maps.get_map("emline_gflux", Some("oiii_5008")).unwrap();
    for y in 0..NY {
        for x in 0..NX {
            assert_eq!(ha.value()[[y, x]], emline_at(0, y, x));
            assert_eq!(oiii.value()[[y, x]], emline_at(2, y, x));
            assert_eq!(ha.ivar().unwrap()[[y, x]], 2.0);
            assert_eq!(ha.mask().unwrap()[[y, x]], x as i32);
        }
    }

    let svel = maps.get_map("stellar_vel", None).unwrap();
    assert_eq!(svel.property(), "stellar_vel");
    assert_eq!(svel.unit(), "km / s");
    assert_eq!(svel.value()[[2, 1]], svel_at(2, 1));
}

/// The db origin produces the same map planes as the file origin.
#[test]
fn maps_from_db_matches_file() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("manga.sqlite");
    write_db(&db_path);
    let file_config = Config::new(RELEASE)
        .with_mode(Mode::Local)
        .with_data_root(dir.path());
    write_maps_file(&file_config);
    let db_config = Config::new(RELEASE)
        .with_mode(Mode::Local)
        .with_db_path(&db_path);

    let file_maps = Maps::new(Input::plateifu(PLATEIFU), &file_config).unwrap();
    let db_maps = Maps::new(Input::plateifu(PLATEIFU), &db_config).unwrap();
    assert_eq!(db_maps.origin(), Origin::Db);
    assert_eq!(db_maps.shape(), file_maps.shape());

    let file_map = file_maps.get_map("stellar_vel", None).unwrap();
    let db_map = db_maps.get_map("stellar_vel", None).unwrap();
    assert_eq!(db_map.value(), file_map.value());
    assert_eq!(db_map.ivar(), file_map.ivar());
    assert_eq!(db_map.mask(), file_map.mask());

    let file_ha = file_maps.get_map("emline_gflux", Some("ha_6564")).unwrap();
    let db_ha = db_maps.get_map("emline_gflux", Some("ha_6564")).unwrap();
    assert_eq!(db_ha.value(), file_ha.value());
}

/// The api origin serves maps metadata and pre-sliced map planes.
#[test]
fn maps_from_api() {
    let base = spawn_api(vec![
        ("/map/", map_payload(None)),
        ("/maps/", maps_payload()),
    ]);
    let config = Config::new(RELEASE)
        .with_mode(Mode::Remote)
        .with_api_url(base);

    let maps = Maps::new(Input::plateifu(PLATEIFU), &config).unwrap();
    assert_eq!(maps.origin(), Origin::Api);
    assert_eq!(maps.shape(), (NY, NX));

    let map = maps.get_map("stellar_vel", None).unwrap();
    for y in 0..NY {
        for x in 0..NX {
            assert_eq!(map.value()[[y, x]], svel_at(y, x));
        }
    }
    assert_eq!(map.unit(), "km / s");
    assert!(map.mask().is_none());
}

/// A channel slice served pre-cut by the api matches the slice the file
/// origin cuts locally.
#[test]
fn maps_channel_from_api_matches_file() {
    let dir = tempfile::tempdir().unwrap();
    let file_config = Config::new(RELEASE)
        .with_mode(Mode::Local)
        .with_data_root(dir.path());
    write_maps_file(&file_config);
    let file_maps = Maps::new(Input::plateifu(PLATEIFU), &file_config).unwrap();
    let file_ha = file_maps.get_map("emline_gflux", Some("ha_6564")).unwrap();

    let base = spawn_api(vec![
        ("/map/", map_payload(Some(0))),
        ("/maps/", maps_payload()),
    ]);
    let api_config = Config::new(RELEASE)
        .with_mode(Mode::Remote)
        .with_api_url(base);
    let api_maps = Maps::new(Input::plateifu(PLATEIFU), &api_config).unwrap();
    let api_ha = api_maps.get_map("emline_gflux", Some("ha_6564")).unwrap();

    assert_eq!(api_ha.property(), "emline_gflux_ha_6564");
    assert_eq!(api_ha.channel(), Some("ha_6564"));
    assert_eq!(api_ha.value(), file_ha.value());
    assert_eq!(api_ha.ivar(), file_ha.ivar());
    assert_eq!(api_ha.unit(), file_ha.unit());
}

/// A failing map fetch is wrapped with the map-specific message.
#[test]
fn api_map_failure_message() {
    let base = spawn_api(vec![
        ("/map/", json!({"error": "no such map"})),
        ("/maps/", maps_payload()),
    ]);
    let config = Config::new(RELEASE)
        .with_mode(Mode::Remote)
        .with_api_url(base);

    let maps = Maps::new(Input::plateifu(PLATEIFU), &config).unwrap();
    let err = maps.get_map("stellar_vel", None).unwrap_err();
    assert_eq!(
        err.to_string(),
        "remote error: found a problem when getting the map: \
         something went wrong. Error is: no such map"
    );
}

/// Map pixels reuse the container WCS for sky lookups.
#[test]
fn map_pixel_by_sky() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::new(RELEASE)
        .with_mode(Mode::Local)
        .with_data_root(dir.path());
    write_maps_file(&config);

    let maps = Maps::new(Input::plateifu(PLATEIFU), &config).unwrap();
    let map = maps.get_map("stellar_vel", None).unwrap();
    let pixel = map
        .pixel(&SpaxelQuery::sky(RA, DEC))
        .unwrap()
        .into_one()
        .unwrap();
    assert_eq!((pixel.x, pixel.y), (1, 1));
    assert_eq!(pixel.value, svel_at(1, 1));
}

/// Maps snapshots round-trip through the same save/restore path as cubes.
#[test]
fn maps_snapshot_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::new(RELEASE)
        .with_mode(Mode::Local)
        .with_data_root(dir.path());
    write_maps_file(&config);
    let maps = Maps::new(Input::plateifu(PLATEIFU), &config).unwrap();

    let saved = maps.save(None, &config).unwrap();
    let restored = Maps::restore(&saved, true).unwrap();
    assert!(!saved.exists());
    assert_eq!(restored.origin(), Origin::File);
    assert_eq!(restored.shape(), maps.shape());
    assert_eq!(restored.plateifu(), Some(PLATEIFU));
}
