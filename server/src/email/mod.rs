pub mod composer;
pub mod preview;
pub mod templates;

pub use composer::{AssetStore, ComposedMessage, MessageComposer};
pub use preview::inline_data_urls;
pub use templates::{InlineMap, MailContext, TemplateCatalog, TemplateEntry, TemplateRenderer};
