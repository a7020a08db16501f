//! Layered configuration using Figment.
//!
//! Configuration is merged from, in increasing priority:
//! 1. built-in defaults
//! 2. a TOML file (`fxi_export.toml` in the working directory unless a path is given)
//! 3. environment variables prefixed with `FXI_EXPORT_`, nested keys separated
//!    by `__` (e.g. `FXI_EXPORT_EXPORT__BINNING=2`)
//! 4. command-line overrides
//!
//! # Example
//! ```no_run
//! use fxi_export::config::{Overrides, Settings};
//!
//! let settings = Settings::load(None, &Overrides::default())?;
//! println!("Writing to {}", settings.export.output_dir.display());
//! # Ok::<(), fxi_export::ExportError>(())
//! ```

use crate::error::{ExportError, ExportResult};
use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration file read when no explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "fxi_export.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "FXI_EXPORT_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Where runs are read from.
    #[serde(default)]
    pub catalog: CatalogConfig,
    /// Output location and shape.
    #[serde(default)]
    pub export: ExportConfig,
    /// Fly-scan angle alignment.
    #[serde(default)]
    pub alignment: AlignmentConfig,
    /// Temperature-controller enrichment.
    #[serde(default)]
    pub lakeshore: LakeshoreConfig,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Catalog location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Root directory of the on-disk catalog.
    #[serde(default = "default_catalog_root")]
    pub root: PathBuf,
}

/// Export output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory that receives archives, rasters and tables.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Block size for binned mosaics.
    #[serde(default = "default_binning")]
    pub binning: usize,
    /// Archive backend (`hdf5` or `memory`).
    #[serde(default = "default_archive_format")]
    pub archive_format: String,
    /// Row range `[start, end)` kept in per-tile rasters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_rows: Option<[usize; 2]>,
    /// Column range `[start, end)` kept in per-tile rasters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_cols: Option<[usize; 2]>,
}

/// Fly-scan alignment settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentConfig {
    /// IANA zone the timestamps are localized to before alignment.
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
    /// Stream holding the rotation motor trace.
    #[serde(default = "default_motor_stream")]
    pub motor_stream: String,
    /// Column of the rotation motor position.
    #[serde(default = "default_motor_column")]
    pub motor_column: String,
    /// Fail fly-scans whose rotation is not a single sweep.
    #[serde(default = "default_true")]
    pub reject_non_monotonic: bool,
    /// Allowed backwards step (degrees) before a sweep counts as reversed.
    #[serde(default = "default_sweep_tolerance")]
    pub sweep_tolerance: f64,
}

/// Temperature-controller enrichment settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LakeshoreConfig {
    /// Attempt to attach readings at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Table stream carrying the readings.
    #[serde(default = "default_lakeshore_stream")]
    pub stream: String,
    /// Column name prefix identifying controller channels.
    #[serde(default = "default_lakeshore_prefix")]
    pub prefix: String,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (pretty, compact, json).
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Log span close events with their durations.
    #[serde(default)]
    pub span_events: bool,
}

// Default value functions
fn default_catalog_root() -> PathBuf {
    PathBuf::from("catalog")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_binning() -> usize {
    4
}

fn default_archive_format() -> String {
    "hdf5".to_string()
}

fn default_time_zone() -> String {
    "US/Eastern".to_string()
}

fn default_motor_stream() -> String {
    "zps_pi_r_monitor".to_string()
}

fn default_motor_column() -> String {
    "zps_pi_r".to_string()
}

fn default_true() -> bool {
    true
}

fn default_sweep_tolerance() -> f64 {
    0.01
}

fn default_lakeshore_stream() -> String {
    "baseline".to_string()
}

fn default_lakeshore_prefix() -> String {
    "lakeshore".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            root: default_catalog_root(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            binning: default_binning(),
            archive_format: default_archive_format(),
            crop_rows: None,
            crop_cols: None,
        }
    }
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            time_zone: default_time_zone(),
            motor_stream: default_motor_stream(),
            motor_column: default_motor_column(),
            reject_non_monotonic: true,
            sweep_tolerance: default_sweep_tolerance(),
        }
    }
}

impl Default for LakeshoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stream: default_lakeshore_stream(),
            prefix: default_lakeshore_prefix(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            span_events: false,
        }
    }
}

/// Values supplied on the command line. `None` leaves the layered value alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// `--catalog`
    pub catalog_root: Option<PathBuf>,
    /// `--output-dir`
    pub output_dir: Option<PathBuf>,
    /// `--binning`
    pub binning: Option<usize>,
    /// `--log-level`
    pub log_level: Option<String>,
    /// `--crop-rows`
    pub crop_rows: Option<[usize; 2]>,
    /// `--crop-cols`
    pub crop_cols: Option<[usize; 2]>,
}

impl Overrides {
    fn apply(&self, mut figment: Figment) -> Figment {
        if let Some(root) = &self.catalog_root {
            figment = figment.merge(Serialized::default("catalog.root", root));
        }
        if let Some(dir) = &self.output_dir {
            figment = figment.merge(Serialized::default("export.output_dir", dir));
        }
        if let Some(binning) = self.binning {
            figment = figment.merge(Serialized::default("export.binning", binning));
        }
        if let Some(level) = &self.log_level {
            figment = figment.merge(Serialized::default("logging.level", level));
        }
        if let Some(rows) = self.crop_rows {
            figment = figment.merge(Serialized::default("export.crop_rows", rows));
        }
        if let Some(cols) = self.crop_cols {
            figment = figment.merge(Serialized::default("export.crop_cols", cols));
        }
        figment
    }
}

impl Settings {
    /// Build the layered figment without extracting it.
    pub fn figment(config_file: Option<&Path>, overrides: &Overrides) -> Figment {
        let file = config_file.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        overrides.apply(figment)
    }

    /// Load and validate configuration.
    ///
    /// An explicitly named configuration file must exist; the default file is
    /// optional.
    pub fn load(config_file: Option<&Path>, overrides: &Overrides) -> ExportResult<Self> {
        if let Some(path) = config_file {
            if !path.is_file() {
                return Err(ExportError::Configuration(format!(
                    "configuration file {} does not exist",
                    path.display()
                )));
            }
        }
        let settings: Settings = Self::figment(config_file, overrides).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> ExportResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ExportError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ExportError::Configuration(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            )));
        }

        if self.export.binning == 0 {
            return Err(ExportError::Configuration(
                "Invalid binning 0. Must be at least 1".into(),
            ));
        }

        for (name, range) in [
            ("crop_rows", self.export.crop_rows),
            ("crop_cols", self.export.crop_cols),
        ] {
            if let Some([start, end]) = range {
                if start >= end {
                    return Err(ExportError::Configuration(format!(
                        "Invalid {name} [{start}, {end}]. Start must be below end"
                    )));
                }
            }
        }

        self.time_zone()?;

        let tolerance = self.alignment.sweep_tolerance;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(ExportError::Configuration(format!(
                "Invalid sweep_tolerance {tolerance}. Must be a non-negative number"
            )));
        }

        if self.lakeshore.enabled && self.lakeshore.stream.is_empty() {
            return Err(ExportError::Configuration(
                "lakeshore.stream must be set when lakeshore is enabled".into(),
            ));
        }

        Ok(())
    }

    /// Reference time zone for timestamp alignment.
    pub fn time_zone(&self) -> ExportResult<Tz> {
        self.alignment.time_zone.parse::<Tz>().map_err(|_| {
            ExportError::Configuration(format!(
                "Unknown time zone '{}'",
                self.alignment.time_zone
            ))
        })
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> ExportResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ExportError::Configuration(format!("cannot render configuration: {e}")))
    }
}
