use anyhow::{Context, Result};
use chrono::{Days, NaiveDate};
use config::{Config, ConfigError, File, FileFormat};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use crate::analytics::{QuerySpec, MAX_RESULTS_LIMIT};
use crate::args::Args;
use tracing::{info, debug};

/// One inclusive reporting window.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// Consecutive windows of `span_days` days covering `start..=end`.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub span_days: u32,
}

impl DateWindow {
    pub fn expand(&self) -> Result<Vec<DateRange>> {
        if self.span_days == 0 {
            anyhow::bail!("date_window.span_days must be >= 1");
        }
        if self.start > self.end {
            anyhow::bail!("date_window.start ({}) is after date_window.end ({})", self.start, self.end);
        }

        let mut ranges = Vec::new();
        let mut cursor = self.start;
        loop {
            let window_end = cursor
                .checked_add_days(Days::new(u64::from(self.span_days - 1)))
                .map_or(self.end, |d| d.min(self.end));
            ranges.push(DateRange::new(cursor, window_end));

            match window_end.succ_opt() {
                Some(next) if next <= self.end => cursor = next,
                _ => break,
            }
        }
        Ok(ranges)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
struct PropertyEntry {
    name: String,
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutputConfig {
    pub dir: String,
    pub filename_template: String,
    pub delimiter: String,
    pub ensure: bool,
}

impl OutputConfig {
    pub fn delimiter_byte(&self) -> u8 {
        self.delimiter.as_bytes().first().copied().unwrap_or(b',')
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Installed,
    ServiceAccount,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    pub method: AuthMethod,
    pub client_secrets: String,
    pub token_cache: String,
    pub service_account_key: String,
    // Prompt for the authorization code instead of running a local redirect listener
    pub interactive: bool,
}

#[derive(Debug, Serialize, Clone)]
pub struct Cfg {
    /// Property name to property id, iterated in sorted name order.
    pub properties: BTreeMap<String, String>,
    pub date_ranges: Vec<DateRange>,
    pub query: QuerySpec,
    pub output: OutputConfig,
    pub auth: AuthConfig,
    pub page_size: usize,
}

impl Cfg {
    pub fn load(args: Args) -> Result<Self> {
        info!("Loading configuration from: {}", args.config);

        let path = Path::new(&args.config);
        let mut cfg = if path.exists() {
            Self::from_file(path)?
        } else {
            debug!("Config file not found, using defaults");
            Cfg::default()
        };

        // Override with command line arguments if provided
        if let Some(output_dir) = args.output_dir {
            debug!("Overriding output.dir from command line");
            cfg.output.dir = output_dir;
        }

        if let Some(page_size) = args.page_size {
            debug!("Overriding page_size from command line");
            cfg.page_size = page_size;
        }

        if args.no_browser {
            cfg.auth.interactive = true;
        }

        debug!("Final configuration: {:?}", cfg);
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::new(&path.to_string_lossy(), FileFormat::Toml))
            .build()
            .with_context(|| format!("Could not parse config file {}", path.display()))?;

        let mut cfg = Cfg::default();

        if let Some(page_size) = optional::<usize>(&config, "page_size")? {
            cfg.page_size = page_size;
        }

        if let Some(entries) = optional::<Vec<PropertyEntry>>(&config, "properties")? {
            cfg.properties = build_registry(entries)?;
        }

        let explicit = optional::<Vec<DateRange>>(&config, "date_ranges")?;
        let window = optional::<DateWindow>(&config, "date_window")?;
        cfg.date_ranges = match (explicit, window) {
            (Some(_), Some(_)) => {
                anyhow::bail!("Specify either date_ranges or date_window, not both")
            }
            (Some(ranges), None) => ranges,
            (None, Some(window)) => window.expand()?,
            (None, None) => Vec::new(),
        };

        if let Some(query) = optional::<QuerySpec>(&config, "query")? {
            cfg.query = query;
        }

        if let Some(dir) = optional::<String>(&config, "output.dir")? {
            cfg.output.dir = dir;
        }
        if let Some(template) = optional::<String>(&config, "output.filename_template")? {
            cfg.output.filename_template = template;
        }
        if let Some(delimiter) = optional::<String>(&config, "output.delimiter")? {
            cfg.output.delimiter = delimiter;
        }
        if let Some(ensure) = optional::<bool>(&config, "output.ensure")? {
            cfg.output.ensure = ensure;
        }

        if let Some(method) = optional::<AuthMethod>(&config, "auth.method")? {
            cfg.auth.method = method;
        }
        if let Some(secrets) = optional::<String>(&config, "auth.client_secrets")? {
            cfg.auth.client_secrets = secrets;
        }
        if let Some(cache) = optional::<String>(&config, "auth.token_cache")? {
            cfg.auth.token_cache = cache;
        }
        if let Some(key) = optional::<String>(&config, "auth.service_account_key")? {
            cfg.auth.service_account_key = key;
        }
        if let Some(interactive) = optional::<bool>(&config, "auth.interactive")? {
            cfg.auth.interactive = interactive;
        }

        debug!("Loaded configuration from file");
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.properties.is_empty() {
            anyhow::bail!("At least one [[properties]] entry must be configured");
        }
        check_property_names(self.properties.keys())?;

        if self.date_ranges.is_empty() {
            anyhow::bail!("At least one date range must be configured");
        }
        for range in &self.date_ranges {
            if range.start > range.end {
                anyhow::bail!("Date range start {} is after end {}", range.start, range.end);
            }
        }

        if self.page_size == 0 || self.page_size > MAX_RESULTS_LIMIT {
            anyhow::bail!("page_size must be between 1 and {}, found: {}",
                         MAX_RESULTS_LIMIT, self.page_size);
        }

        if self.query.metrics.is_empty() {
            anyhow::bail!("query.metrics cannot be empty");
        }

        if !self.output.filename_template.contains("{}") {
            anyhow::bail!("output.filename_template must contain a {{}} placeholder for the property name");
        }
        if self.output.delimiter.len() != 1 || !self.output.delimiter.is_ascii() {
            anyhow::bail!("output.delimiter must be a single ASCII character, found: {:?}",
                         self.output.delimiter);
        }

        match self.auth.method {
            AuthMethod::Installed if self.auth.client_secrets.is_empty() => {
                anyhow::bail!("auth.client_secrets cannot be empty for the installed flow");
            }
            AuthMethod::ServiceAccount if self.auth.service_account_key.is_empty() => {
                anyhow::bail!("auth.service_account_key cannot be empty for the service account flow");
            }
            _ => {}
        }

        info!(properties = self.properties.len(), date_ranges = self.date_ranges.len(),
              "Configuration validation passed");
        Ok(())
    }
}

impl Default for Cfg {
    fn default() -> Self {
        Self {
            properties: BTreeMap::new(),
            date_ranges: Vec::new(),
            query: QuerySpec::default(),
            output: OutputConfig {
                dir: "output".to_string(),
                filename_template: "google_analytics_data_{}_1.csv".to_string(),
                delimiter: ",".to_string(),
                ensure: true,
            },
            auth: AuthConfig {
                method: AuthMethod::Installed,
                client_secrets: "client_secrets.json".to_string(),
                token_cache: "analytics.dat".to_string(),
                service_account_key: String::new(),
                interactive: false,
            },
            page_size: MAX_RESULTS_LIMIT,
        }
    }
}

fn optional<T: DeserializeOwned>(config: &Config, key: &str) -> Result<Option<T>> {
    match config.get::<T>(key) {
        Ok(value) => Ok(Some(value)),
        Err(ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(anyhow::anyhow!("Invalid value for `{}`: {}", key, e)),
    }
}

fn build_registry(entries: Vec<PropertyEntry>) -> Result<BTreeMap<String, String>> {
    let mut registry = BTreeMap::new();
    for entry in entries {
        let name = entry.name.trim().to_string();
        if name.is_empty() {
            anyhow::bail!("Property names cannot be empty");
        }
        if registry.insert(name.clone(), entry.id.trim().to_string()).is_some() {
            anyhow::bail!("Duplicate property name: {}", name);
        }
    }
    check_property_names(registry.keys())?;
    Ok(registry)
}

/// Names become file names: each must stay inside the output directory and
/// map to its own lower-cased file.
fn check_property_names<'a>(names: impl Iterator<Item = &'a String>) -> Result<()> {
    let mut files: HashMap<String, &str> = HashMap::new();
    for name in names {
        if name.chars().any(std::path::is_separator) || name.contains("..") {
            anyhow::bail!("Property name {:?} cannot contain path separators or '..'", name);
        }
        if let Some(other) = files.insert(name.to_lowercase(), name) {
            anyhow::bail!("Property names {:?} and {:?} would write the same output file", other, name);
        }
    }
    Ok(())
}
