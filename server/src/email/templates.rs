use std::path::Path;

use chrono::Utc;
use chrono_tz::Tz;
use indexmap::IndexMap;
use minijinja::{path_loader, AutoEscape, Environment, Value};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::{
    error::{AppError, AppResult},
    sheets::{Columns, TrialRow},
};

/// Inline reference name to asset path, relative to the asset root.
pub type InlineMap = IndexMap<String, String>;

/// One selectable mail template.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TemplateEntry {
    pub id: String,
    pub label: String,
    pub default_subject: String,
    #[serde(default, skip_serializing)]
    pub inline: InlineMap,
}

/// Immutable template catalog. Every entry's inline map already includes the
/// common images.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    entries: Vec<TemplateEntry>,
}

impl TemplateCatalog {
    pub fn new(entries: Vec<TemplateEntry>, common_inline: &InlineMap) -> Self {
        let entries = entries
            .into_iter()
            .map(|mut entry| {
                entry
                    .inline
                    .extend(common_inline.iter().map(|(k, v)| (k.clone(), v.clone())));
                entry
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[TemplateEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> AppResult<&TemplateEntry> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| AppError::UnknownTemplate(id.to_string()))
    }
}

/// minijinja environment over the template directory, with the `now`, `cid`
/// and `asset` helpers installed. Templates are trusted and output is not
/// auto-escaped.
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl TemplateRenderer {
    pub fn new(template_dir: impl AsRef<Path>, timezone: Tz, asset_base: &str) -> Self {
        let mut env = Environment::new();
        env.set_loader(path_loader(template_dir));
        env.set_auto_escape_callback(|_| AutoEscape::None);

        env.add_function("now", move || {
            Utc::now()
                .with_timezone(&timezone)
                .format("%Y-%m-%d")
                .to_string()
        });
        env.add_function("cid", |name: String| format!("cid:{name}"));

        let asset_base = asset_base.trim_end_matches('/').to_string();
        env.add_function("asset", move |path: String| {
            if path.starts_with('/') {
                format!("{asset_base}{path}")
            } else {
                format!("{asset_base}/{path}")
            }
        });

        Self { env }
    }

    pub fn render(&self, template: &str, ctx: &JsonValue) -> AppResult<String> {
        let render_error = |e: minijinja::Error| AppError::Render {
            template: template.to_string(),
            message: e.to_string(),
        };

        self.env
            .get_template(template)
            .and_then(|tpl| tpl.render(Value::from_serialize(ctx)))
            .map_err(render_error)
    }
}

/// Values the row contributes to a mail.
pub struct MailContext<'a> {
    pub row: &'a TrialRow,
    pub columns: &'a Columns,
    pub subject: &'a str,
    pub sender: &'a IndexMap<String, String>,
    pub extra: &'a Map<String, JsonValue>,
}

impl MailContext<'_> {
    /// Trimmed recipient, empty when the row has none.
    pub fn email(&self) -> &str {
        self.row.value(&self.columns.email).trim()
    }

    /// Row values first, then the sender defaults, then caller overrides.
    pub fn to_json(&self) -> JsonValue {
        let mut ctx = Map::new();
        let text = |s: &str| JsonValue::String(s.to_string());

        ctx.insert("manager".into(), text(self.row.value(&self.columns.manager).trim()));
        ctx.insert("company".into(), text(self.row.value(&self.columns.company).trim()));
        ctx.insert("memo".into(), text(self.row.value(&self.columns.memo)));
        ctx.insert("action".into(), text(self.row.value(&self.columns.action)));
        ctx.insert("end_date".into(), text(self.row.value(&self.columns.end_date)));
        ctx.insert(
            "item".into(),
            serde_json::to_value(self.row).unwrap_or_default(),
        );
        ctx.insert("subject".into(), text(self.subject));
        ctx.insert("email".into(), text(self.email()));

        for (key, value) in self.sender {
            ctx.insert(key.clone(), text(value));
        }
        for (key, value) in self.extra {
            ctx.insert(key.clone(), value.clone());
        }

        JsonValue::Object(ctx)
    }
}
