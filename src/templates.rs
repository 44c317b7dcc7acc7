use serde::Serialize;
use std::sync::OnceLock;
use tera::{Context, Tera};
use tracing::error;

use crate::agents::likelihood::truncate_for_detection;
use crate::agents::ProviderRequest;
use crate::config::GradingLevel;
use crate::scoring::{Category, CategoryScoreSet};

static TERA: OnceLock<Tera> = OnceLock::new();

pub const FEEDBACK_MAX_TOKENS: u32 = 6000;
pub const REVISION_MAX_TOKENS: u32 = 4000;
pub const DETECTION_MAX_TOKENS: u32 = 400;

const FEEDBACK_TEMPERATURE: f32 = 0.3;
const REVISION_TEMPERATURE: f32 = 0.25;
const DETECTION_TEMPERATURE: f32 = 0.0;

/// Prompt templates are compiled into the binary; the `.txt` names keep
/// Tera from HTML-escaping essay text.
pub fn get_tera() -> &'static Tera {
    TERA.get_or_init(|| {
        let mut tera = Tera::default();
        if let Err(e) = tera.add_raw_templates(vec![
            ("feedback.txt", include_str!("../prompts/feedback.txt")),
            ("comparative.txt", include_str!("../prompts/comparative.txt")),
            ("essay_user.txt", include_str!("../prompts/essay_user.txt")),
            ("comparative_user.txt", include_str!("../prompts/comparative_user.txt")),
            ("revision_general.txt", include_str!("../prompts/revision_general.txt")),
            ("revision_advanced.txt", include_str!("../prompts/revision_advanced.txt")),
            ("revision_user.txt", include_str!("../prompts/revision_user.txt")),
            ("ai_detection.txt", include_str!("../prompts/ai_detection.txt")),
        ]) {
            error!("Failed to load prompt templates: {}", e);
        }
        tera
    })
}

#[derive(Serialize)]
struct Criterion {
    title: &'static str,
    max: u32,
    block_key: &'static str,
    previous: Option<u32>,
}

fn criteria(previous: Option<&CategoryScoreSet>) -> Vec<Criterion> {
    Category::ALL
        .into_iter()
        .map(|category| Criterion {
            title: category.title(),
            max: category.max(),
            block_key: category.block_key(),
            previous: previous.map(|scores| scores.get(category)),
        })
        .collect()
}

pub fn feedback_prompt(question: &str, essay: &str) -> Result<ProviderRequest, tera::Error> {
    let tera = get_tera();

    let mut ctx = Context::new();
    ctx.insert("criteria", &criteria(None));
    ctx.insert("question", question);
    ctx.insert("essay", essay);

    Ok(ProviderRequest::new(
        tera.render("feedback.txt", &ctx)?,
        tera.render("essay_user.txt", &ctx)?,
        FEEDBACK_MAX_TOKENS,
    )
    .with_temperature(FEEDBACK_TEMPERATURE))
}

pub struct ComparativeInput<'a> {
    pub question: &'a str,
    pub essay: &'a str,
    pub previous_essay: &'a str,
    pub previous_scores: &'a CategoryScoreSet,
    pub key_points: &'a str,
    pub submission_number: u32,
}

pub fn comparative_prompt(input: &ComparativeInput<'_>) -> Result<ProviderRequest, tera::Error> {
    let tera = get_tera();
    let previous_number = input.submission_number.saturating_sub(1).max(1);

    let mut ctx = Context::new();
    ctx.insert("criteria", &criteria(Some(input.previous_scores)));
    ctx.insert("previous_total", &input.previous_scores.total());
    ctx.insert("ordinal", &crate::pipeline::ordinal(input.submission_number));
    ctx.insert("previous_ordinal", &crate::pipeline::ordinal(previous_number));
    ctx.insert("question", input.question);
    ctx.insert("essay", input.essay);
    ctx.insert("previous_essay", input.previous_essay);
    ctx.insert("key_points", input.key_points);

    Ok(ProviderRequest::new(
        tera.render("comparative.txt", &ctx)?,
        tera.render("comparative_user.txt", &ctx)?,
        FEEDBACK_MAX_TOKENS,
    )
    .with_temperature(FEEDBACK_TEMPERATURE))
}

pub fn revision_prompt(question: &str, essay: &str, level: GradingLevel) -> Result<ProviderRequest, tera::Error> {
    let tera = get_tera();
    let system = match level {
        GradingLevel::General => "revision_general.txt",
        GradingLevel::Advanced => "revision_advanced.txt",
    };

    let mut ctx = Context::new();
    ctx.insert("question", question);
    ctx.insert("essay", essay);

    Ok(ProviderRequest::new(
        tera.render(system, &ctx)?,
        tera.render("revision_user.txt", &ctx)?,
        REVISION_MAX_TOKENS,
    )
    .with_temperature(REVISION_TEMPERATURE))
}

pub fn ai_detection_prompt(essay: &str) -> Result<ProviderRequest, tera::Error> {
    let system = get_tera().render("ai_detection.txt", &Context::new())?;
    Ok(
        ProviderRequest::new(system, truncate_for_detection(essay), DETECTION_MAX_TOKENS)
            .with_temperature(DETECTION_TEMPERATURE),
    )
}
