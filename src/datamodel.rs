//! Versioned datamodel registry
//!
//! Maps a logical quantity (e.g. "H-alpha flux") to its concrete storage
//! location in each backend: FITS extension name, DB column, API path
//! fragment. One registry exists per data release; entries are value types
//! and insertion into a registry always clones, so registries of different
//! releases never alias each other's entries.

use crate::error::{MangaError, Result};
use crate::fuzzy::{FuzzyList, FuzzyMatch};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// The kinds of entries a datamodel groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    DataCube,
    Spectrum,
    Property,
}

/// Array companion extensions of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayExt {
    Ivar,
    Mask,
}

/// One channel of a multi-channel map property
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub name: String,
    pub unit: Option<String>,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// A 3D extension of the logcube file (flux, dispersion, ...)
#[derive(Debug, Clone)]
pub struct DataCube {
    pub name: String,
    pub extension_name: String,
    pub extension_wave: Option<String>,
    pub extension_ivar: Option<String>,
    pub extension_mask: Option<String>,
    pub unit: String,
    pub scale: f64,
    pub formats: HashMap<String, String>,
    pub description: String,
    parent_release: Option<String>,
}

impl DataCube {
    pub fn new(name: impl Into<String>, extension_name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            extension_name: extension_name.into(),
            extension_wave: None,
            extension_ivar: None,
            extension_mask: None,
            unit: String::new(),
            scale: 1.0,
            formats: HashMap::new(),
            description: String::new(),
            parent_release: None,
        }
    }

    pub fn with_wave(mut self, ext: impl Into<String>) -> Self {
        self.extension_wave = Some(ext.into());
        self
    }

    pub fn with_ivar(mut self, ext: impl Into<String>) -> Self {
        self.extension_ivar = Some(ext.into());
        self
    }

    pub fn with_mask(mut self, ext: impl Into<String>) -> Self {
        self.extension_mask = Some(ext.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>, scale: f64) -> Self {
        self.unit = unit.into();
        self.scale = scale;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_format(mut self, mode: impl Into<String>, value: impl Into<String>) -> Self {
        self.formats.insert(mode.into(), value.into());
        self
    }

    /// Lowercased extension name; the key this entry is looked up by
    pub fn full(&self) -> String {
        self.extension_name.to_lowercase()
    }

    /// Release of the registry that owns this entry, once published
    pub fn release(&self) -> Option<&str> {
        self.parent_release.as_deref()
    }

    pub fn has_ivar(&self) -> bool {
        self.extension_ivar.is_some()
    }

    pub fn has_mask(&self) -> bool {
        self.extension_mask.is_some()
    }

    /// Name of the DB column holding this datacube or one of its companions
    pub fn db_column(&self, ext: Option<ArrayExt>) -> Result<String> {
        match ext {
            None => Ok(self.full()),
            Some(ArrayExt::Ivar) => self
                .extension_ivar
                .as_deref()
                .map(str::to_lowercase)
                .ok_or_else(|| {
                    MangaError::Unsupported(format!("no ivar for datacube {:?}", self.full()))
                }),
            Some(ArrayExt::Mask) => self
                .extension_mask
                .as_deref()
                .map(str::to_lowercase)
                .ok_or_else(|| {
                    MangaError::Unsupported(format!("no mask for datacube {:?}", self.full()))
                }),
        }
    }

    /// Display form of the entry, honouring any format override
    pub fn to_string_mode(&self, mode: &str) -> String {
        self.formats
            .get(mode)
            .cloned()
            .unwrap_or_else(|| self.name.clone())
    }
}

/// A 1D extension of the logcube file (spectral resolution, ...)
#[derive(Debug, Clone)]
pub struct Spectrum {
    pub name: String,
    pub extension_name: String,
    pub extension_wave: Option<String>,
    pub extension_std: Option<String>,
    pub unit: String,
    pub scale: f64,
    pub formats: HashMap<String, String>,
    pub description: String,
    parent_release: Option<String>,
}

impl Spectrum {
    pub fn new(name: impl Into<String>, extension_name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            extension_name: extension_name.into(),
            extension_wave: None,
            extension_std: None,
            unit: String::new(),
            scale: 1.0,
            formats: HashMap::new(),
            description: String::new(),
            parent_release: None,
        }
    }

    pub fn with_wave(mut self, ext: impl Into<String>) -> Self {
        self.extension_wave = Some(ext.into());
        self
    }

    pub fn with_std(mut self, ext: impl Into<String>) -> Self {
        self.extension_std = Some(ext.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>, scale: f64) -> Self {
        self.unit = unit.into();
        self.scale = scale;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn full(&self) -> String {
        self.extension_name.to_lowercase()
    }

    pub fn release(&self) -> Option<&str> {
        self.parent_release.as_deref()
    }

    pub fn has_std(&self) -> bool {
        self.extension_std.is_some()
    }

    pub fn db_column(&self, std: bool) -> Result<String> {
        if !std {
            return Ok(self.full());
        }
        self.extension_std
            .as_deref()
            .map(str::to_lowercase)
            .ok_or_else(|| {
                MangaError::Unsupported(format!("no std for spectrum {:?}", self.full()))
            })
    }

    pub fn to_string_mode(&self, mode: &str) -> String {
        self.formats
            .get(mode)
            .cloned()
            .unwrap_or_else(|| self.name.clone())
    }
}

/// A 2D derived property of the maps file, possibly multi-channel
#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    pub extension_name: String,
    pub channels: Option<Vec<Channel>>,
    pub ivar: bool,
    pub mask: bool,
    pub unit: String,
    pub scale: f64,
    pub formats: HashMap<String, String>,
    pub description: String,
    parent_release: Option<String>,
}

impl Property {
    pub fn new(name: impl Into<String>, extension_name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            extension_name: extension_name.into(),
            channels: None,
            ivar: false,
            mask: false,
            unit: String::new(),
            scale: 1.0,
            formats: HashMap::new(),
            description: String::new(),
            parent_release: None,
        }
    }

    pub fn with_channels(mut self, channels: Vec<Channel>) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_ivar(mut self) -> Self {
        self.ivar = true;
        self
    }

    pub fn with_mask(mut self) -> Self {
        self.mask = true;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>, scale: f64) -> Self {
        self.unit = unit.into();
        self.scale = scale;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn full(&self) -> String {
        self.name.to_lowercase()
    }

    pub fn release(&self) -> Option<&str> {
        self.parent_release.as_deref()
    }

    /// Position of a channel in this property's channel list
    pub fn channel_index(&self, channel: &str) -> Option<usize> {
        let lower = channel.to_lowercase();
        self.channels
            .as_ref()?
            .iter()
            .position(|ch| ch.name == lower)
    }

    /// Property name extended with the channel, e.g. `emline_gflux_ha_6564`
    pub fn full_name(&self, channel: Option<&str>) -> String {
        match channel {
            Some(ch) => format!("{}_{}", self.full(), ch.to_lowercase()),
            None => self.full(),
        }
    }

    /// DB column for this property's value, ivar, or mask
    pub fn db_column(&self, channel: Option<&str>, ext: Option<ArrayExt>) -> Result<String> {
        let base = self.full_name(channel);
        match ext {
            None => Ok(base),
            Some(ArrayExt::Ivar) => {
                if !self.ivar {
                    return Err(MangaError::Unsupported(format!(
                        "no ivar for property {:?}",
                        self.full()
                    )));
                }
                Ok(format!("{}_ivar", base))
            }
            Some(ArrayExt::Mask) => {
                if !self.mask {
                    return Err(MangaError::Unsupported(format!(
                        "no mask for property {:?}",
                        self.full()
                    )));
                }
                Ok(format!("{}_mask", base))
            }
        }
    }

    /// FITS extension for this property's value, ivar, or mask
    pub fn fits_extension(&self, ext: Option<ArrayExt>) -> String {
        match ext {
            None => self.extension_name.clone(),
            Some(ArrayExt::Ivar) => format!("{}_IVAR", self.extension_name),
            Some(ArrayExt::Mask) => format!("{}_MASK", self.extension_name),
        }
    }

    pub fn to_string_mode(&self, mode: &str) -> String {
        self.formats
            .get(mode)
            .cloned()
            .unwrap_or_else(|| self.name.clone())
    }
}

/// A matched datamodel entry of any kind
#[derive(Debug, Clone, Copy)]
pub enum EntryRef<'a> {
    DataCube(&'a DataCube),
    Spectrum(&'a Spectrum),
    Property(&'a Property),
}

impl EntryRef<'_> {
    pub fn name(&self) -> &str {
        match self {
            EntryRef::DataCube(dc) => &dc.name,
            EntryRef::Spectrum(sp) => &sp.name,
            EntryRef::Property(pr) => &pr.name,
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            EntryRef::DataCube(_) => Kind::DataCube,
            EntryRef::Spectrum(_) => Kind::Spectrum,
            EntryRef::Property(_) => Kind::Property,
        }
    }
}

/// One row of a descriptive datamodel table
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub name: String,
    pub ivar: bool,
    pub mask: bool,
    pub unit: String,
    pub description: String,
}

/// Tabular export of one kind of a datamodel
#[derive(Debug, Clone)]
pub struct DatamodelTable {
    pub release: String,
    pub kind: Kind,
    pub rows: Vec<TableRow>,
}

impl fmt::Display for DatamodelTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:?} entries for release {}", self.kind, self.release)?;
        writeln!(f, "{:<24} {:>5} {:>5}  {:<32} description", "name", "ivar", "mask", "unit")?;
        for row in &self.rows {
            writeln!(
                f,
                "{:<24} {:>5} {:>5}  {:<32} {}",
                row.name, row.ivar, row.mask, row.unit, row.description
            )?;
        }
        Ok(())
    }
}

/// The datamodel for one release
pub struct DrpDataModel {
    pub release: String,
    pub drpver: String,
    pub aliases: Vec<String>,
    datacubes: FuzzyList<DataCube>,
    spectra: FuzzyList<Spectrum>,
    properties: FuzzyList<Property>,
}

impl DrpDataModel {
    pub fn new(release: impl Into<String>, drpver: impl Into<String>) -> Self {
        Self {
            release: release.into(),
            drpver: drpver.into(),
            aliases: Vec::new(),
            datacubes: FuzzyList::new(|dc: &DataCube| dc.full()),
            spectra: FuzzyList::new(|sp: &Spectrum| sp.full()),
            properties: FuzzyList::new(|pr: &Property| pr.full()),
        }
    }

    /// Append a datacube entry. The entry is cloned and the clone is stamped
    /// with this model's release; the original is left untouched.
    pub fn add_datacube(&mut self, datacube: &DataCube) {
        let mut entry = datacube.clone();
        entry.parent_release = Some(self.release.clone());
        self.datacubes.append(entry);
    }

    pub fn add_spectrum(&mut self, spectrum: &Spectrum) {
        let mut entry = spectrum.clone();
        entry.parent_release = Some(self.release.clone());
        self.spectra.append(entry);
    }

    pub fn add_property(&mut self, property: &Property) {
        let mut entry = property.clone();
        entry.parent_release = Some(self.release.clone());
        self.properties.append(entry);
    }

    pub fn datacubes(&self) -> &FuzzyList<DataCube> {
        &self.datacubes
    }

    pub fn spectra(&self) -> &FuzzyList<Spectrum> {
        &self.spectra
    }

    pub fn properties(&self) -> &FuzzyList<Property> {
        &self.properties
    }

    /// Resolve a name to a single entry.
    ///
    /// With `kind` given, the search is scoped to that kind. Without it,
    /// all kinds are searched and a name that resolves in more than one
    /// kind fails as ambiguous rather than guessing.
    pub fn lookup(&self, name: &str, kind: Option<Kind>) -> Result<EntryRef<'_>> {
        if let Some(kind) = kind {
            return match kind {
                Kind::DataCube => self.datacubes.find(name).map(EntryRef::DataCube),
                Kind::Spectrum => self.spectra.find(name).map(EntryRef::Spectrum),
                Kind::Property => self.properties.find(name).map(EntryRef::Property),
            };
        }

        let mut matches: Vec<EntryRef<'_>> = Vec::new();
        let mut ambiguous = false;

        match self.datacubes.resolve(name) {
            FuzzyMatch::Found(idx) => {
                matches.push(EntryRef::DataCube(&self.datacubes.iter().as_slice()[idx]))
            }
            FuzzyMatch::Ambiguous(_) => ambiguous = true,
            FuzzyMatch::NotFound => {}
        }
        match self.spectra.resolve(name) {
            FuzzyMatch::Found(idx) => {
                matches.push(EntryRef::Spectrum(&self.spectra.iter().as_slice()[idx]))
            }
            FuzzyMatch::Ambiguous(_) => ambiguous = true,
            FuzzyMatch::NotFound => {}
        }
        match self.properties.resolve(name) {
            FuzzyMatch::Found(idx) => {
                matches.push(EntryRef::Property(&self.properties.iter().as_slice()[idx]))
            }
            FuzzyMatch::Ambiguous(_) => ambiguous = true,
            FuzzyMatch::NotFound => {}
        }

        if ambiguous || matches.len() > 1 {
            return Err(MangaError::Ambiguous(name.to_string()));
        }
        matches.into_iter().next().ok_or_else(|| {
            MangaError::NotFound(format!(
                "no match found for {:?} in release {}",
                name, self.release
            ))
        })
    }

    /// Whether a name resolves to exactly one entry
    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name, None).is_ok()
    }

    /// Descriptive table of all datacubes. Pure projection, no side effects.
    pub fn datacube_table(&self) -> DatamodelTable {
        DatamodelTable {
            release: self.release.clone(),
            kind: Kind::DataCube,
            rows: self
                .datacubes
                .iter()
                .map(|dc| TableRow {
                    name: dc.name.clone(),
                    ivar: dc.has_ivar(),
                    mask: dc.has_mask(),
                    unit: dc.unit.clone(),
                    description: dc.description.clone(),
                })
                .collect(),
        }
    }

    /// Descriptive table of all spectra
    pub fn spectrum_table(&self) -> DatamodelTable {
        DatamodelTable {
            release: self.release.clone(),
            kind: Kind::Spectrum,
            rows: self
                .spectra
                .iter()
                .map(|sp| TableRow {
                    name: sp.name.clone(),
                    ivar: false,
                    mask: false,
                    unit: sp.unit.clone(),
                    description: sp.description.clone(),
                })
                .collect(),
        }
    }

    /// Descriptive table of all map properties
    pub fn property_table(&self) -> DatamodelTable {
        DatamodelTable {
            release: self.release.clone(),
            kind: Kind::Property,
            rows: self
                .properties
                .iter()
                .map(|pr| TableRow {
                    name: pr.name.clone(),
                    ivar: pr.ivar,
                    mask: pr.mask,
                    unit: pr.unit.clone(),
                    description: pr.description.clone(),
                })
                .collect(),
        }
    }

    /// Deep copy of this datamodel for a private mutable view
    pub fn copy(&self) -> DrpDataModel {
        let mut model = DrpDataModel::new(self.release.clone(), self.drpver.clone());
        model.aliases = self.aliases.clone();
        for dc in self.datacubes.iter() {
            model.add_datacube(dc);
        }
        for sp in self.spectra.iter() {
            model.add_spectrum(sp);
        }
        for pr in self.properties.iter() {
            model.add_property(pr);
        }
        model
    }
}

impl fmt::Debug for DrpDataModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrpDataModel")
            .field("release", &self.release)
            .field("n_datacubes", &self.datacubes.len())
            .field("n_spectra", &self.spectra.len())
            .field("n_properties", &self.properties.len())
            .finish()
    }
}

/// All known datamodels, keyed by release
pub struct DataModelList {
    models: Vec<DrpDataModel>,
}

impl DataModelList {
    pub fn empty() -> Self {
        Self { models: Vec::new() }
    }

    /// Insert a model, cloning it. Fails if the release already exists.
    pub fn add(&mut self, model: &DrpDataModel) -> Result<()> {
        if self.models.iter().any(|m| m.release == model.release) {
            return Err(MangaError::InvalidArguments(format!(
                "datamodel for release {:?} already registered",
                model.release
            )));
        }
        self.models.push(model.copy());
        Ok(())
    }

    /// The immutable datamodel for a release string (or drpver, or alias)
    pub fn get(&self, release: &str) -> Result<&DrpDataModel> {
        self.models
            .iter()
            .find(|m| {
                m.release == release
                    || m.drpver == release
                    || m.aliases.iter().any(|a| a == release)
            })
            .ok_or_else(|| MangaError::UnknownRelease(release.to_string()))
    }

    /// All registered release strings, in registration order
    pub fn releases(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.release.as_str()).collect()
    }
}

fn build_mpl4() -> DrpDataModel {
    let mut model = DrpDataModel::new("MPL-4", "v1_5_1");
    model.aliases.push("MPL4".to_string());

    model.add_datacube(
        &DataCube::new("flux", "FLUX")
            .with_wave("WAVE")
            .with_ivar("IVAR")
            .with_mask("MASK")
            .with_unit("1e-17 erg / (s cm2 spaxel Angstrom)", 1e-17)
            .with_format("string", "Flux")
            .with_description("3D rectified cube of flux-calibrated spectra."),
    );

    model.add_spectrum(
        &Spectrum::new("spectral_resolution", "SPECRES")
            .with_wave("WAVE")
            .with_std("SPECRESD")
            .with_unit("Angstrom", 1.0)
            .with_description("Median spectral resolution as a function of wavelength."),
    );

    let emline_channels = vec![
        Channel::new("ha_6564"),
        Channel::new("hb_4862"),
        Channel::new("oiii_5008"),
        Channel::new("nii_6585"),
    ];

    model.add_property(
        &Property::new("emline_gflux", "EMLINE_GFLUX")
            .with_channels(emline_channels)
            .with_ivar()
            .with_mask()
            .with_unit("1e-17 erg / (s cm2 spaxel)", 1e-17)
            .with_description("Gaussian profile integrated flux for emission lines."),
    );

    model.add_property(
        &Property::new("stellar_vel", "STELLAR_VEL")
            .with_ivar()
            .with_mask()
            .with_unit("km / s", 1.0)
            .with_description("Line-of-sight stellar velocity."),
    );

    model.add_property(
        &Property::new("stellar_sigma", "STELLAR_SIGMA")
            .with_ivar()
            .with_mask()
            .with_unit("km / s", 1.0)
            .with_description("Raw line-of-sight stellar velocity dispersion."),
    );

    model
}

fn build_mpl5() -> DrpDataModel {
    let mut model = DrpDataModel::new("MPL-5", "v2_0_1");
    model.aliases.push("MPL5".to_string());

    model.add_datacube(
        &DataCube::new("flux", "FLUX")
            .with_wave("WAVE")
            .with_ivar("IVAR")
            .with_mask("MASK")
            .with_unit("1e-17 erg / (s cm2 spaxel Angstrom)", 1e-17)
            .with_format("string", "Flux")
            .with_description("3D rectified cube of flux-calibrated spectra."),
    );

    model.add_datacube(
        &DataCube::new("dispersion", "DISP")
            .with_wave("WAVE")
            .with_unit("Angstrom", 1.0)
            .with_description("Broadened dispersion solution."),
    );

    model.add_spectrum(
        &Spectrum::new("spectral_resolution", "SPECRES")
            .with_wave("WAVE")
            .with_std("SPECRESD")
            .with_unit("Angstrom", 1.0)
            .with_description("Median spectral resolution as a function of wavelength."),
    );

    let emline_channels = vec![
        Channel::new("ha_6564"),
        Channel::new("hb_4862"),
        Channel::new("oiii_5008"),
        Channel::new("nii_6585"),
    ];

    model.add_property(
        &Property::new("emline_gflux", "EMLINE_GFLUX")
            .with_channels(emline_channels.clone())
            .with_ivar()
            .with_mask()
            .with_unit("1e-17 erg / (s cm2 spaxel)", 1e-17)
            .with_description("Gaussian profile integrated flux for emission lines."),
    );

    model.add_property(
        &Property::new("emline_gvel", "EMLINE_GVEL")
            .with_channels(emline_channels)
            .with_ivar()
            .with_mask()
            .with_unit("km / s", 1.0)
            .with_description("Gaussian profile velocity for emission lines."),
    );

    model.add_property(
        &Property::new("stellar_vel", "STELLAR_VEL")
            .with_ivar()
            .with_mask()
            .with_unit("km / s", 1.0)
            .with_description("Line-of-sight stellar velocity."),
    );

    model.add_property(
        &Property::new("stellar_sigma", "STELLAR_SIGMA")
            .with_ivar()
            .with_mask()
            .with_unit("km / s", 1.0)
            .with_description("Raw line-of-sight stellar velocity dispersion."),
    );

    model
}

/// The built-in datamodels, constructed once per process
pub fn datamodels() -> &'static DataModelList {
    static DATAMODELS: OnceLock<DataModelList> = OnceLock::new();
    DATAMODELS.get_or_init(|| {
        let mut list = DataModelList::empty();
        // Built at catalog-load time; failures here are programming errors.
        list.add(&build_mpl4()).expect("duplicate built-in release");
        list.add(&build_mpl5()).expect("duplicate built-in release");
        list
    })
}
