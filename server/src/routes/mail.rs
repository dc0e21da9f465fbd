use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    email::{inline_data_urls, MailContext, TemplateEntry},
    error::{AppError, AppJsonResult, AppResult},
    model::TrialCtrl,
    server_config::ServerConfig,
    ComposerRef, Delivery, RendererRef, ServerConfigRef, SheetSource,
};

#[derive(Debug, Deserialize)]
pub struct MailRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub context: Option<Map<String, Value>>,
}

/// A request resolved against the catalog and the sheet, rendered.
struct RenderedMail<'a> {
    template: &'a TemplateEntry,
    subject: String,
    email: String,
    html: String,
}

impl MailRequest {
    async fn render<'a>(
        &self,
        config: &'a ServerConfig,
        sheets: &SheetSource,
        renderer: &RendererRef,
    ) -> AppResult<RenderedMail<'a>> {
        let template_id = self
            .template
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&config.mail.default_template);
        let template = config.catalog.get(template_id)?;
        let subject = self
            .subject
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| template.default_subject.clone());

        let row = TrialCtrl::get(sheets.as_ref(), config, &self.id).await?;
        let extra = self.context.clone().unwrap_or_default();
        let ctx = MailContext {
            row: &row,
            columns: &config.columns,
            subject: &subject,
            sender: &config.sender,
            extra: &extra,
        };
        let email = ctx.email().to_string();
        let html = renderer.render(&template.id, &ctx.to_json())?;

        Ok(RenderedMail {
            template,
            subject,
            email,
            html,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub ok: bool,
    pub message_id: String,
}

/// # POST /api/send
pub async fn send(
    State(config): State<ServerConfigRef>,
    State(sheets): State<SheetSource>,
    State(renderer): State<RendererRef>,
    State(composer): State<ComposerRef>,
    State(delivery): State<Delivery>,
    Json(request): Json<MailRequest>,
) -> AppJsonResult<SendResponse> {
    let mail = request.render(&config, &sheets, &renderer).await?;
    if mail.email.is_empty() {
        return Err(AppError::MissingRecipient(request.id));
    }

    let message = composer.compose(&mail.email, &mail.subject, mail.html, &mail.template.inline)?;

    tracing::info!(
        "Sending template {} to row {} ({})",
        mail.template.id,
        request.id,
        mail.email
    );
    let sent = delivery.deliver(&message.raw).await?;
    tracing::info!("Sent message {} to row {}", sent.id, request.id);

    Ok(Json(SendResponse {
        ok: true,
        message_id: sent.id,
    }))
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub html: String,
}

/// # POST /api/preview
///
/// Same rendering as send, with `cid:` references replaced by data URLs.
pub async fn preview(
    State(config): State<ServerConfigRef>,
    State(sheets): State<SheetSource>,
    State(renderer): State<RendererRef>,
    State(composer): State<ComposerRef>,
    Json(request): Json<MailRequest>,
) -> AppJsonResult<PreviewResponse> {
    let mail = request.render(&config, &sheets, &renderer).await?;
    let html = inline_data_urls(&mail.html, &mail.template.inline, composer.assets());

    Ok(Json(PreviewResponse { html }))
}

/// # GET /api/templates
pub async fn templates(State(config): State<ServerConfigRef>) -> Json<Vec<TemplateEntry>> {
    Json(config.catalog.entries().to_vec())
}
