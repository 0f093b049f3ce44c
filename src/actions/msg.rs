//! Message-sending actions: SMS/chat sends, broadcasts, email and IVR.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::assets::{AssetKind, Dependency, Reference};
use crate::engine::RunContext;
use crate::error::ActionError;
use crate::events::{EventPayload, MsgContent, MsgOut};

use super::Action;

/// Sends a message to the contact. Text, attachments and quick replies are
/// localized through the flow's translation table and then templated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMsgAction {
    pub uuid: Uuid,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub quick_replies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Reference>,
    #[serde(default)]
    pub all_urns: bool,
}

impl SendMsgAction {
    fn compose(&self, ctx: &mut RunContext<'_>, step_uuid: Uuid) -> (String, Vec<String>, Vec<String>) {
        let text = ctx
            .localized_texts(self.uuid, "text", std::slice::from_ref(&self.text))
            .into_iter()
            .next()
            .unwrap_or_else(|| self.text.clone());
        let attachments = ctx.localized_texts(self.uuid, "attachments", &self.attachments);
        let quick_replies = ctx.localized_texts(self.uuid, "quick_replies", &self.quick_replies);

        // a resolvable message template overrides the composed text
        let text = match self
            .template
            .as_ref()
            .and_then(|t| t.uuid)
            .and_then(|uuid| ctx.assets().template(uuid).cloned())
        {
            Some(template) => {
                let language = ctx.run().language.clone().unwrap_or_default();
                template
                    .translation(&language)
                    .map(|t| t.content.clone())
                    .unwrap_or(text)
            }
            None => text,
        };

        let text = ctx.eval_template(step_uuid, &text);
        let attachments = attachments
            .iter()
            .map(|a| ctx.eval_template(step_uuid, a))
            .filter(|a| !a.is_empty())
            .collect();
        let quick_replies = quick_replies
            .iter()
            .map(|q| ctx.eval_template(step_uuid, q))
            .filter(|q| !q.is_empty())
            .collect();
        (text, attachments, quick_replies)
    }
}

#[async_trait]
impl Action for SendMsgAction {
    fn type_name(&self) -> &'static str {
        "send_msg"
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn dependencies(&self) -> Vec<Dependency> {
        self.template
            .iter()
            .map(|t| Dependency::new(AssetKind::Template, t.clone()))
            .collect()
    }

    async fn execute(&self, ctx: &mut RunContext<'_>, step_uuid: Uuid) -> Result<(), ActionError> {
        let (text, attachments, quick_replies) = self.compose(ctx, step_uuid);

        let urns: Vec<String> = if self.all_urns {
            ctx.session.contact.urns.iter().map(|u| u.to_string()).collect()
        } else {
            ctx.session
                .contact
                .preferred_urn()
                .map(|u| u.to_string())
                .into_iter()
                .collect()
        };

        if urns.is_empty() {
            ctx.log_error(step_uuid, "contact has no sendable URN");
            return Ok(());
        }

        let channel = ctx.session.contact.channel.clone();
        for urn in urns {
            let msg = MsgOut {
                uuid: ctx.new_uuid(),
                urn: Some(urn),
                channel: channel.clone(),
                text: text.clone(),
                attachments: attachments.clone(),
                quick_replies: quick_replies.clone(),
                template: self.template.clone(),
            };
            ctx.emit(Some(step_uuid), EventPayload::MsgCreated { msg });
        }
        Ok(())
    }
}

/// Sends a broadcast to other groups, contacts or raw URNs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendBroadcastAction {
    pub uuid: Uuid,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub quick_replies: Vec<String>,
    #[serde(default)]
    pub groups: Vec<Reference>,
    #[serde(default)]
    pub contacts: Vec<Reference>,
    #[serde(default)]
    pub urns: Vec<String>,
}

#[async_trait]
impl Action for SendBroadcastAction {
    fn type_name(&self) -> &'static str {
        "send_broadcast"
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn dependencies(&self) -> Vec<Dependency> {
        self.groups
            .iter()
            .map(|g| Dependency::new(AssetKind::Group, g.clone()))
            .collect()
    }

    async fn execute(&self, ctx: &mut RunContext<'_>, step_uuid: Uuid) -> Result<(), ActionError> {
        if self.groups.is_empty() && self.contacts.is_empty() && self.urns.is_empty() {
            ctx.log_error(step_uuid, "broadcast has no recipients");
            return Ok(());
        }

        let text = ctx.eval_template(step_uuid, &self.text);
        let base_language = ctx.run().flow.language.clone();
        let mut translations = HashMap::new();
        translations.insert(
            base_language.clone(),
            MsgContent {
                text,
                attachments: self.attachments.clone(),
                quick_replies: self.quick_replies.clone(),
            },
        );

        ctx.emit(
            Some(step_uuid),
            EventPayload::BroadcastCreated {
                translations,
                base_language,
                groups: self.groups.clone(),
                contacts: self.contacts.clone(),
                urns: self.urns.clone(),
            },
        );
        Ok(())
    }
}

/// Sends an email through the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendEmailAction {
    pub uuid: Uuid,
    pub addresses: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[async_trait]
impl Action for SendEmailAction {
    fn type_name(&self) -> &'static str {
        "send_email"
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn execute(&self, ctx: &mut RunContext<'_>, step_uuid: Uuid) -> Result<(), ActionError> {
        let subject = ctx.eval_template(step_uuid, &self.subject);
        // email subjects can't contain newlines
        let subject = subject.split_whitespace().collect::<Vec<_>>().join(" ");
        let body = ctx.eval_template(step_uuid, &self.body);

        let addresses: Vec<String> = self
            .addresses
            .iter()
            .map(|a| ctx.eval_template(step_uuid, a))
            .filter(|a| !a.is_empty())
            .map(|a| a.trim_start_matches("mailto:").to_string())
            .collect();

        if addresses.is_empty() {
            ctx.log_error(step_uuid, "email has no recipients");
            return Ok(());
        }

        ctx.emit(
            Some(step_uuid),
            EventPayload::EmailSent {
                addresses,
                subject,
                body,
            },
        );
        Ok(())
    }
}

/// Plays an audio file to the contact; voice flows only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayAudioAction {
    pub uuid: Uuid,
    pub audio_url: String,
}

#[async_trait]
impl Action for PlayAudioAction {
    fn type_name(&self) -> &'static str {
        "play_audio"
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn execute(&self, ctx: &mut RunContext<'_>, step_uuid: Uuid) -> Result<(), ActionError> {
        let url = ctx.eval_template(step_uuid, &self.audio_url);
        if url.is_empty() {
            ctx.log_error(step_uuid, "audio URL evaluated to empty");
            return Ok(());
        }

        let msg = MsgOut {
            uuid: ctx.new_uuid(),
            urn: ctx.session.contact.preferred_urn().map(|u| u.to_string()),
            channel: ctx.session.contact.channel.clone(),
            text: String::new(),
            attachments: vec![format!("audio:{}", url)],
            quick_replies: Vec::new(),
            template: None,
        };
        ctx.emit(Some(step_uuid), EventPayload::IvrCreated { msg });
        Ok(())
    }
}

/// Reads a message aloud with text-to-speech; voice flows only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SayMsgAction {
    pub uuid: Uuid,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

#[async_trait]
impl Action for SayMsgAction {
    fn type_name(&self) -> &'static str {
        "say_msg"
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn execute(&self, ctx: &mut RunContext<'_>, step_uuid: Uuid) -> Result<(), ActionError> {
        let text = ctx
            .localized_texts(self.uuid, "text", std::slice::from_ref(&self.text))
            .into_iter()
            .next()
            .unwrap_or_else(|| self.text.clone());
        let text = ctx.eval_template(step_uuid, &text);

        if text.is_empty() && self.audio_url.is_none() {
            ctx.log_error(step_uuid, "say_msg has no text or audio");
            return Ok(());
        }

        let attachments = self
            .audio_url
            .iter()
            .map(|url| format!("audio:{}", url))
            .collect();

        let msg = MsgOut {
            uuid: ctx.new_uuid(),
            urn: ctx.session.contact.preferred_urn().map(|u| u.to_string()),
            channel: ctx.session.contact.channel.clone(),
            text,
            attachments,
            quick_replies: Vec::new(),
            template: None,
        };
        ctx.emit(Some(step_uuid), EventPayload::IvrCreated { msg });
        Ok(())
    }
}
