// ========================================================================================
//
//                          Run configuration & resource loading
//
// ========================================================================================

use crate::assemble::{FeatureOrder, SchemaError};
use crate::explain::{LabelDictionary, LabelError, RegionMap};
use crate::genotype::EncodingPolicy;
use crate::locus::{GenomeBuild, LocusConverter};
use crate::pipeline::FeatureMatrixBuilder;
use crate::types::LocusKey;
use ahash::AHashSet;
use log::{debug, info, warn};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse TOML config {path}: {source}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to parse JSON resource {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Labels(#[from] LabelError),
}

/// Locations of the model's resources. Relative paths resolve against the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourcePaths {
    /// One locus key per line, in model column order.
    pub feature_order: PathBuf,
    /// JSON object keyed by the loci the model was trained on.
    #[serde(default)]
    pub variant_panel: Option<PathBuf>,
    /// JSON object mapping input-build loci to model-build loci.
    #[serde(default)]
    pub locus_converter: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub model_build: GenomeBuild,
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    #[serde(default)]
    pub encoding_policy: EncodingPolicy,
    pub resources: ResourcePaths,
    /// Region map name -> JSON object `{locus: region}`.
    #[serde(default)]
    pub region_maps: BTreeMap<String, PathBuf>,
    #[serde(skip)]
    base_dir: PathBuf,
}

/// Everything a run needs, loaded once and then only borrowed.
#[derive(Debug, Clone)]
pub struct RunResources {
    pub order: FeatureOrder,
    pub converter: Option<LocusConverter>,
    pub labels: LabelDictionary,
    pub policy: EncodingPolicy,
}

impl RunResources {
    pub fn matrix_builder(&self) -> FeatureMatrixBuilder<'_> {
        FeatureMatrixBuilder::new(&self.order, self.converter.as_ref(), self.policy)
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_toml_str(&text, &path.display().to_string(), base_dir)
    }

    pub fn from_toml_str(text: &str, source_name: &str, base_dir: PathBuf) -> Result<Self, ConfigError> {
        let mut config: RunConfig = toml::from_str(text).map_err(|source| ConfigError::Toml {
            path: source_name.to_string(),
            source,
        })?;
        config.base_dir = base_dir;
        Ok(config)
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn label_dictionary(&self) -> Result<LabelDictionary, ConfigError> {
        match &self.labels {
            Some(names) => Ok(LabelDictionary::new(names.clone())?),
            None => Ok(LabelDictionary::continental()),
        }
    }

    /// Loads the feature order only.
    pub fn load_feature_order(&self) -> Result<FeatureOrder, ConfigError> {
        Ok(FeatureOrder::load(&self.resolve(&self.resources.feature_order))?)
    }

    /// Loads one configured region map by name.
    pub fn load_region_map(&self, name: &str) -> Result<Option<RegionMap>, ConfigError> {
        match self.region_maps.get(name) {
            Some(path) => Ok(Some(load_region_map(&self.resolve(path))?)),
            None => Ok(None),
        }
    }

    /// Loads every configured region map in name order.
    pub fn load_region_maps(&self) -> Result<Vec<(String, RegionMap)>, ConfigError> {
        let mut region_maps = Vec::with_capacity(self.region_maps.len());
        for (name, path) in &self.region_maps {
            let map = load_region_map(&self.resolve(path))?;
            debug!("Region map '{name}' assigns {} loci", map.len());
            region_maps.push((name.clone(), map));
        }
        Ok(region_maps)
    }

    /// Loads the resources matrix construction needs for inputs called against `input_build`.
    ///
    /// The converter only applies when the input build differs from the model build. Region
    /// maps are not touched here; they belong to aggregation.
    pub fn load_resources(&self, input_build: GenomeBuild) -> Result<RunResources, ConfigError> {
        let order = self.load_feature_order()?;
        info!("Loaded feature order with {} loci", order.len());

        if let Some(panel_path) = &self.resources.variant_panel {
            let panel = load_variant_panel(&self.resolve(panel_path))?;
            let missing = order.missing_from(&panel).count();
            if missing > 0 {
                warn!("{missing} feature(s) of the model are absent from the variant panel");
            }
        }

        let converter = if input_build == self.model_build {
            debug!("Input build {input_build} matches the model; no locus conversion");
            None
        } else {
            match &self.resources.locus_converter {
                Some(path) => {
                    let converter = load_locus_converter(&self.resolve(path))?;
                    let outside = converter.targets_outside(&order);
                    if outside > 0 {
                        warn!("{outside} converter target(s) are not model features");
                    }
                    info!(
                        "Converting {input_build} loci to {} with {} mapping(s)",
                        self.model_build,
                        converter.len()
                    );
                    Some(converter)
                }
                None => {
                    warn!(
                        "Input build {input_build} differs from model build {} but no locus converter is configured; loci are used as-is",
                        self.model_build
                    );
                    None
                }
            }
        };

        Ok(RunResources {
            order,
            converter,
            labels: self.label_dictionary()?,
            policy: self.encoding_policy,
        })
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let file = File::open(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Json {
        path: path.display().to_string(),
        source,
    })
}

/// Reads a `{locus: region}` JSON object.
pub fn load_region_map(path: &Path) -> Result<RegionMap, ConfigError> {
    let raw: HashMap<String, String> = read_json(path)?;
    Ok(raw
        .into_iter()
        .map(|(locus, region)| (LocusKey::from(locus), region))
        .collect())
}

/// Reads a `{input locus: model locus}` JSON object.
pub fn load_locus_converter(path: &Path) -> Result<LocusConverter, ConfigError> {
    let raw: HashMap<String, String> = read_json(path)?;
    Ok(raw
        .into_iter()
        .map(|(from, to)| (LocusKey::from(from), LocusKey::from(to)))
        .collect())
}

/// Reads the keys of a JSON object keyed by locus; the values are ignored.
pub fn load_variant_panel(path: &Path) -> Result<AHashSet<LocusKey>, ConfigError> {
    let raw: serde_json::Map<String, serde_json::Value> = read_json(path)?;
    Ok(raw.into_iter().map(|(locus, _)| LocusKey::from(locus)).collect())
}
