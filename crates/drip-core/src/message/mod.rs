mod template;

pub use template::{TemplateError, escape_html, render_template};

use std::collections::HashMap;
use std::sync::Arc;

use orion_error::prelude::*;
use orion_error::ErrorOweBase;

use crate::error::{CoreReason, CoreResult};
use crate::registry::Registry;
use crate::rule::RuleDefinition;
use crate::schema::Value;
use crate::store::{Record, SubjectId};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A rendered message, ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub from: Option<String>,
    pub subject: String,
    pub content: Vec<u8>,
    pub mime_type: String,
}

/// Inputs available to a producer for one subject.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub rule: &'a RuleDefinition,
    pub subject: &'a SubjectId,
    pub record: &'a Record,
    pub vars: &'a HashMap<String, String>,
}

impl RenderContext<'_> {
    /// Record fields win over config vars. Nulls render empty. `subject_id`
    /// and `rule` are always defined unless a field shadows them.
    pub fn resolve(&self, name: &str) -> Option<String> {
        if let Some(value) = self.record.get(name) {
            return Some(match value {
                Value::Null => String::new(),
                other => other.to_string(),
            });
        }
        if let Some(var) = self.vars.get(name) {
            return Some(var.clone());
        }
        match name {
            "subject_id" => Some(self.subject.to_string()),
            "rule" => Some(self.rule.name.clone()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// MessageProducer
// ---------------------------------------------------------------------------

/// Renders a rule's message for one subject. Selected by `message_kind`.
pub trait MessageProducer: Send + Sync {
    fn kind(&self) -> &'static str;

    fn render(&self, ctx: &RenderContext<'_>) -> CoreResult<Message>;
}

/// `text/plain` rendering of the rule's templates.
#[derive(Debug, Default)]
pub struct TextProducer;

/// `text/html` rendering; substituted values are HTML-escaped in the body.
#[derive(Debug, Default)]
pub struct HtmlProducer;

impl MessageProducer for TextProducer {
    fn kind(&self) -> &'static str {
        "text"
    }

    fn render(&self, ctx: &RenderContext<'_>) -> CoreResult<Message> {
        let body = expand(ctx, &ctx.rule.template.body, |s| s)?;
        finish(ctx, body, "text/plain")
    }
}

impl MessageProducer for HtmlProducer {
    fn kind(&self) -> &'static str {
        "html"
    }

    fn render(&self, ctx: &RenderContext<'_>) -> CoreResult<Message> {
        let body = expand(ctx, &ctx.rule.template.body, |s| escape_html(&s))?;
        finish(ctx, body, "text/html")
    }
}

fn expand(
    ctx: &RenderContext<'_>,
    source: &str,
    escape: impl Fn(String) -> String,
) -> CoreResult<String> {
    render_template(source, |name| ctx.resolve(name).map(&escape))
        .owe(CoreReason::Render)
        .position(format!("drip {:?} subject {}", ctx.rule.name, ctx.subject))
}

fn finish(ctx: &RenderContext<'_>, body: String, mime_type: &str) -> CoreResult<Message> {
    let subject = expand(ctx, &ctx.rule.template.subject, |s| s)?;
    let from = match &ctx.rule.template.from {
        Some(f) => Some(expand(ctx, f, |s| s)?),
        None => None,
    };
    Ok(Message {
        from,
        subject,
        content: body.into_bytes(),
        mime_type: mime_type.to_string(),
    })
}

/// Registry holding the built-in `text` and `html` producers.
pub fn builtin_producers() -> CoreResult<Registry<dyn MessageProducer>> {
    let mut reg: Registry<dyn MessageProducer> = Registry::new("message_kind");
    for producer in [
        Arc::new(TextProducer) as Arc<dyn MessageProducer>,
        Arc::new(HtmlProducer) as Arc<dyn MessageProducer>,
    ] {
        reg.register(producer.kind(), producer)?;
    }
    Ok(reg)
}
