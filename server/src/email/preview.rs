use base64::{engine::general_purpose::STANDARD, Engine};
use lazy_static::lazy_static;
use regex::{Captures, Regex};

use super::{composer::AssetStore, templates::InlineMap};

lazy_static! {
    static ref RE_CID_DOUBLE: Regex = Regex::new(r#"src\s*=\s*"cid:([^"]+)""#).unwrap();
    static ref RE_CID_SINGLE: Regex = Regex::new(r#"src\s*=\s*'cid:([^']+)'"#).unwrap();
}

fn mime_type(path: &str) -> &'static str {
    let lower = path.to_lowercase();
    match lower.rsplit_once('.').map(|(_, ext)| ext) {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

fn data_url(assets: &AssetStore, path: &str) -> anyhow::Result<String> {
    let bytes = assets.read(path)?;
    Ok(format!("data:{};base64,{}", mime_type(path), STANDARD.encode(bytes)))
}

/// Rewrites `src="cid:name"` references into data URLs so the rendered body
/// can be displayed on its own. A reference that is not in `inline` or whose
/// file cannot be read is left as it was.
pub fn inline_data_urls(html: &str, inline: &InlineMap, assets: &AssetStore) -> String {
    if inline.is_empty() {
        return html.to_string();
    }

    let html = RE_CID_DOUBLE.replace_all(html, |caps: &Captures| {
        substitute(caps, '"', inline, assets)
    });
    RE_CID_SINGLE
        .replace_all(&html, |caps: &Captures| substitute(caps, '\'', inline, assets))
        .into_owned()
}

fn substitute(caps: &Captures, quote: char, inline: &InlineMap, assets: &AssetStore) -> String {
    let original = caps[0].to_string();
    let Some(path) = inline.get(&caps[1]) else {
        return original;
    };
    match data_url(assets, path) {
        Ok(url) => format!("src={quote}{url}{quote}"),
        Err(e) => {
            tracing::warn!("Preview left cid:{} unresolved: {:#}", &caps[1], e);
            original
        }
    }
}
