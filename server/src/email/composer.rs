use std::path::{Path, PathBuf};

use anyhow::Context;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use lettre::message::{header::ContentType, Attachment, Mailbox, MultiPart};

use super::templates::InlineMap;
use crate::error::{AppError, AppResult};

const PLAIN_TEXT_WIDTH: usize = 80;

/// Local directory inline image paths are resolved against.
#[derive(Debug, Clone)]
pub struct AssetStore {
    root: PathBuf,
}

impl AssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Absolute paths are used as is.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    pub fn read(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        let full = self.resolve(path);
        std::fs::read(&full).with_context(|| format!("Could not read asset {}", full.display()))
    }

    /// `cid:path` for every reference whose file is absent, in map order.
    pub fn missing(&self, inline: &InlineMap) -> Vec<String> {
        inline
            .iter()
            .filter(|(_, path)| !self.exists(path))
            .map(|(cid, path)| format!("{cid}:{path}"))
            .collect()
    }
}

/// Image subtype for the MIME part, defaulting to png.
pub fn image_subtype(path: &str) -> &'static str {
    let lower = path.to_lowercase();
    if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "jpeg"
    } else if lower.ends_with(".gif") {
        "gif"
    } else {
        "png"
    }
}

/// Transport-ready message.
#[derive(Debug, Clone)]
pub struct ComposedMessage {
    /// RFC 5322 bytes, URL-safe base64.
    pub raw: String,
}

pub struct MessageComposer {
    from: Mailbox,
    bcc: Option<Mailbox>,
    assets: AssetStore,
}

impl MessageComposer {
    pub fn new(from: Mailbox, bcc: Option<Mailbox>, assets: AssetStore) -> Self {
        Self { from, bcc, assets }
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    /// Builds the message for `to`. Every inline asset is checked before any
    /// part is encoded; missing ones are reported together.
    pub fn compose(
        &self,
        to: &str,
        subject: &str,
        html: String,
        inline: &InlineMap,
    ) -> AppResult<ComposedMessage> {
        let missing = self.assets.missing(inline);
        if !missing.is_empty() {
            return Err(AppError::MissingInlineAsset(missing));
        }

        let to = to
            .parse::<Mailbox>()
            .map_err(|e| AppError::BadRequest(format!("invalid recipient address {to}: {e}")))?;

        let mut builder = lettre::Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject);
        if let Some(bcc) = &self.bcc {
            builder = builder.bcc(bcc.clone()).keep_bcc();
        }

        let message = if inline.is_empty() {
            builder
                .header(ContentType::TEXT_HTML)
                .body(html)
                .context("Could not build html message")?
        } else {
            let plain = html2text::from_read(html.as_bytes(), PLAIN_TEXT_WIDTH);
            let mut related =
                MultiPart::related().multipart(MultiPart::alternative_plain_html(plain, html));

            for (cid, path) in inline {
                let content_type = ContentType::parse(&format!("image/{}", image_subtype(path)))
                    .context("Invalid image content type")?;
                let bytes = self.assets.read(path)?;
                related = related.singlepart(Attachment::new_inline(cid.clone()).body(bytes, content_type));
            }

            builder
                .multipart(related)
                .context("Could not build multipart message")?
        };

        Ok(ComposedMessage {
            raw: URL_SAFE_NO_PAD.encode(message.formatted()),
        })
    }
}
