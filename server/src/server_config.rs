use std::{
    env, fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context};
use chrono_tz::Tz;
use config::Config;
use indexmap::IndexMap;
use lib_email_clients::RetryPolicy;
use serde::Deserialize;
use url::Url;

use crate::{
    auth::GoogleClientConfig,
    email::{InlineMap, TemplateCatalog, TemplateEntry},
    sheets::{Columns, NoiseRules, SchemaRules, SearchConfig, TableFilter},
};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_ORIGIN: &str = "http://localhost:3000";
const DEFAULT_TABLE_Y: &str = "트라이얼(Y)";
const DEFAULT_TABLE_N: &str = "트라이얼(N)";

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    /// Single origin allowed by CORS.
    pub origin: String,
    /// Prefix of the `asset()` template helper.
    pub asset_base: String,
}

/// The spreadsheet and the two tables merged by list queries, in read order.
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    pub table_y: String,
    pub table_n: String,
}

impl SheetsConfig {
    pub fn tables(&self) -> [&str; 2] {
        [&self.table_y, &self.table_n]
    }

    /// `ALL`, `Y`, `N` (any case) or the exact name of a configured table.
    pub fn resolve_table(&self, sheet: &str) -> Option<TableFilter> {
        match sheet.to_uppercase().as_str() {
            "ALL" => Some(TableFilter::All),
            "Y" => Some(TableFilter::Only(self.table_y.clone())),
            "N" => Some(TableFilter::Only(self.table_n.clone())),
            _ => self
                .tables()
                .into_iter()
                .find(|t| *t == sheet)
                .map(|t| TableFilter::Only(t.to_string())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub from: String,
    #[serde(default)]
    pub bcc: Option<String>,
    pub default_template: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_timezone() -> String {
    "Asia/Seoul".to_string()
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    columns: Columns,
    #[serde(default)]
    schema: SchemaRules,
    #[serde(default)]
    noise: NoiseRules,
    #[serde(default)]
    search: SearchConfig,
    mail: MailConfig,
    #[serde(default)]
    templates: Vec<TemplateEntry>,
    #[serde(default)]
    common_inline: InlineMap,
    #[serde(default)]
    sender: IndexMap<String, String>,
}

/// Everything loaded at startup. Immutable afterwards and shared as
/// `Arc<ServerConfig>`.
#[derive(Debug)]
pub struct ServerConfig {
    pub root: PathBuf,
    pub settings: Settings,
    pub sheets: SheetsConfig,
    pub columns: Columns,
    pub schema: SchemaRules,
    pub noise: NoiseRules,
    pub search: SearchConfig,
    pub mail: MailConfig,
    pub timezone: Tz,
    pub catalog: TemplateCatalog,
    /// Default sender variables exposed to every template.
    pub sender: IndexMap<String, String>,
    pub google_client: Option<GoogleClientConfig>,
}

/// `APP_DIR`, or the workspace `config/` directory.
pub fn config_root() -> PathBuf {
    env::var("APP_DIR").map(PathBuf::from).unwrap_or_else(|_| {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .unwrap_or(Path::new("."))
            .join("config")
    })
}

impl ServerConfig {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_dir(config_root(), |key| env::var(key).ok())
    }

    /// Reads `config.toml` (and `client_secret.toml` when present) from
    /// `root`, then applies the environment overrides looked up by `var`.
    pub fn from_dir(
        root: impl Into<PathBuf>,
        var: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let root = root.into();
        let path = root.join("config.toml");
        let file: ConfigFile = Config::builder()
            .add_source(config::File::from(path.as_path()))
            .build()
            .with_context(|| format!("Could not read {}", path.display()))?
            .try_deserialize()
            .with_context(|| format!("{} is invalid", path.display()))?;

        let client_secret = root.join("client_secret.toml");
        let google_client = if client_secret.exists() {
            Some(
                GoogleClientConfig::from_file(&client_secret)
                    .context("client_secret.toml is invalid")?,
            )
        } else {
            None
        };

        let lookup = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        let port = match lookup("PORT") {
            Some(port) => port.parse::<u16>().context("PORT is invalid")?,
            None => DEFAULT_PORT,
        };
        let origin = lookup("ORIGIN").unwrap_or_else(|| DEFAULT_ORIGIN.to_string());
        Url::parse(&origin).context("ORIGIN is invalid")?;
        let asset_base = lookup("ASSET_BASE").unwrap_or_else(|| origin.clone());

        let sheets = SheetsConfig {
            spreadsheet_id: lookup("SHEET_ID").ok_or_else(|| anyhow!("SHEET_ID is required"))?,
            table_y: lookup("SHEET_NAME_Y").unwrap_or_else(|| DEFAULT_TABLE_Y.to_string()),
            table_n: lookup("SHEET_NAME_N").unwrap_or_else(|| DEFAULT_TABLE_N.to_string()),
        };

        let mut noise = file.noise;
        if let Some(keywords) = lookup("IGNORE_KEYWORDS") {
            noise.ignore_keywords = NoiseRules::parse_keywords(&keywords);
        }

        let timezone = file
            .mail
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("mail.timezone is invalid: {e}"))?;

        Ok(ServerConfig {
            settings: Settings {
                port,
                origin,
                asset_base,
            },
            sheets,
            columns: file.columns,
            schema: file.schema,
            noise,
            search: file.search,
            mail: file.mail,
            timezone,
            catalog: TemplateCatalog::new(file.templates, &file.common_inline),
            sender: file.sender,
            google_client,
            root,
        })
    }

    pub fn template_dir(&self) -> PathBuf {
        self.root.join("email_templates")
    }

    pub fn token_path(&self) -> PathBuf {
        self.root.join("token.json")
    }
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Server Config ({}):\n{:?}\n\nSheets: {} [{}, {}]\n\nNoise: {:?}\n\nMail: from={} bcc={:?} default_template={} retry={:?}\n\nTemplates:\n{}\n\nOAuth client: {}",
            self.root.display(),
            self.settings,
            self.sheets.spreadsheet_id,
            self.sheets.table_y,
            self.sheets.table_n,
            self.noise,
            self.mail.from,
            self.mail.bcc,
            self.mail.default_template,
            self.mail.retry,
            self.catalog
                .entries()
                .iter()
                .map(|t| format!("{} -> {} ({} inline)", t.id, t.label, t.inline.len()))
                .collect::<Vec<_>>()
                .join("\n"),
            if self.google_client.is_some() { "configured" } else { "none" },
        )
    }
}
