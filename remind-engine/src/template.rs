//! Notification templates and rendering.
//!
//! A template carries one content shape per channel plus the set of
//! variable slots it expects. Rendering substitutes `{slot}` placeholders
//! and is pure: the same (template, channel, variables) triple always
//! yields byte-identical content, which retry idempotence relies on.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ChannelKind;

/// Channel-shaped message content, both as authored (with placeholders)
/// and as rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum TemplateContent {
    Email { subject: String, body: String },
    Push { title: String, body: String },
    Sms { text: String },
    InApp { title: String, body: String },
}

impl TemplateContent {
    /// The channel this content shape belongs to.
    pub fn channel(&self) -> ChannelKind {
        match self {
            Self::Email { .. } => ChannelKind::Email,
            Self::Push { .. } => ChannelKind::Push,
            Self::Sms { .. } => ChannelKind::Sms,
            Self::InApp { .. } => ChannelKind::InApp,
        }
    }

    fn map_strings(&self, f: impl Fn(&str) -> String) -> TemplateContent {
        match self {
            Self::Email { subject, body } => Self::Email {
                subject: f(subject),
                body: f(body),
            },
            Self::Push { title, body } => Self::Push {
                title: f(title),
                body: f(body),
            },
            Self::Sms { text } => Self::Sms { text: f(text) },
            Self::InApp { title, body } => Self::InApp {
                title: f(title),
                body: f(body),
            },
        }
    }
}

/// A notification template.
///
/// Immutable once referenced by a fired occurrence; content is resolved at
/// render time, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTemplate {
    /// Unique template id.
    pub id: String,
    /// Content shape per supported channel.
    pub channel_contents: HashMap<ChannelKind, TemplateContent>,
    /// Names of the variable slots every render must supply.
    pub variable_slots: BTreeSet<String>,
}

/// Rendering failure. Both variants are non-retryable: the occurrence
/// fails immediately.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("template {template_id} is missing a value for required slot '{slot}'")]
    MissingVariable { template_id: String, slot: String },

    #[error("template {template_id} has no content for channel {channel}")]
    UnsupportedChannel {
        template_id: String,
        channel: ChannelKind,
    },
}

/// Render a template for one channel.
///
/// Fails if the template has no content mapping for the channel, or if any
/// required slot has no supplied value. Slots are checked in lexicographic
/// order so the reported slot is deterministic.
pub fn render(
    template: &NotificationTemplate,
    channel: ChannelKind,
    variables: &HashMap<String, String>,
) -> Result<TemplateContent, RenderError> {
    let content =
        template
            .channel_contents
            .get(&channel)
            .ok_or_else(|| RenderError::UnsupportedChannel {
                template_id: template.id.clone(),
                channel,
            })?;

    for slot in &template.variable_slots {
        if !variables.contains_key(slot) {
            return Err(RenderError::MissingVariable {
                template_id: template.id.clone(),
                slot: slot.clone(),
            });
        }
    }

    Ok(content.map_strings(|s| {
        let mut out = s.to_string();
        for slot in &template.variable_slots {
            let placeholder = format!("{{{slot}}}");
            // Slot presence was checked above.
            if let Some(value) = variables.get(slot) {
                out = out.replace(&placeholder, value);
            }
        }
        out
    }))
}
