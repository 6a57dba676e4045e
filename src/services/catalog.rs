//! Template Registry: the static catalog of notification templates, keyed
//! by template id, compiled once at process start.

use std::collections::BTreeMap;

use crate::error::{AppError, AppResult};
use crate::services::channels::{Channel, ChannelPayload};
use crate::services::template::{CompiledTemplate, Locale, RenderWarning, TemplateValue};

/// Domain event families that produce notifications. `Fee` is a category:
/// its templates subdivide by sub key (`fee_created`, `overdue_notice`,
/// `payment_success`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventType {
    Attendance,
    Fee,
    Exam,
    Notice,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Attendance => "attendance",
            EventType::Fee => "fee",
            EventType::Exam => "exam",
            EventType::Notice => "notice",
        }
    }

    pub fn is_category(&self) -> bool {
        matches!(self, EventType::Fee)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown notification type: {0}")]
pub struct UnknownEventType(pub String);

impl std::str::FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attendance" => Ok(EventType::Attendance),
            "fee" => Ok(EventType::Fee),
            "exam" => Ok(EventType::Exam),
            "notice" => Ok(EventType::Notice),
            other => Err(UnknownEventType(other.to_string())),
        }
    }
}

/// Per-channel template bodies. Email and push carry a subject/title.
#[derive(Debug, Clone)]
pub struct ChannelTemplate {
    pub subject: Option<CompiledTemplate>,
    pub body: CompiledTemplate,
}

#[derive(Debug, Clone)]
pub struct NotificationTemplate {
    pub template_id: String,
    pub event_type: EventType,
    pub sub_key: Option<String>,
    channels: BTreeMap<Channel, ChannelTemplate>,
}

impl NotificationTemplate {
    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.channels.keys().copied()
    }

    /// Render the channel-shaped payload for one channel. `None` when this
    /// template has no body for the channel.
    pub fn render_channel(
        &self,
        channel: Channel,
        variables: &BTreeMap<String, TemplateValue>,
        locale: &Locale,
    ) -> Option<(ChannelPayload, Vec<RenderWarning>)> {
        let template = self.channels.get(&channel)?;
        let (body, mut warnings) = template.body.render(variables, locale);
        let title = template.subject.as_ref().map(|s| {
            let (rendered, subject_warnings) = s.render(variables, locale);
            warnings.extend(subject_warnings);
            rendered
        });

        let payload = match channel {
            Channel::Sms => ChannelPayload::Sms { body },
            Channel::Whatsapp => ChannelPayload::Whatsapp { body },
            Channel::Email => ChannelPayload::Email {
                subject: title.unwrap_or_default(),
                body,
            },
            Channel::Push => ChannelPayload::Push {
                title: title.unwrap_or_default(),
                body,
            },
        };
        Some((payload, warnings))
    }
}

pub struct TemplateCatalog {
    templates: BTreeMap<String, NotificationTemplate>,
}

struct TemplateDef {
    template_id: &'static str,
    event_type: EventType,
    sub_key: Option<&'static str>,
    /// (channel, subject, body)
    channels: &'static [(Channel, Option<&'static str>, &'static str)],
}

const TEMPLATE_DEFS: &[TemplateDef] = &[
    TemplateDef {
        template_id: "STUDENT_ABSENT",
        event_type: EventType::Attendance,
        sub_key: None,
        channels: &[
            (
                Channel::Sms,
                None,
                "Dear Parent, {{studentName}} was marked ABSENT on {{date}}. - {{schoolName}}",
            ),
            (
                Channel::Whatsapp,
                None,
                "Dear Parent, {{studentName}} was marked ABSENT on {{date}}. \
                 Please contact the school office if this is unexpected. - {{schoolName}}",
            ),
            (
                Channel::Push,
                Some("Attendance alert"),
                "{{studentName}} was marked absent on {{date}}.",
            ),
        ],
    },
    TemplateDef {
        template_id: "FEE_CREATED",
        event_type: EventType::Fee,
        sub_key: Some("fee_created"),
        channels: &[
            (
                Channel::Sms,
                None,
                "Dear Parent, a fee of Rs {{amount}} ({{feeTitle}}) for {{studentName}} \
                 is due by {{dueDate}}. - {{schoolName}}",
            ),
            (
                Channel::Whatsapp,
                None,
                "Dear Parent, a new fee has been issued for {{studentName}}: {{feeTitle}}, \
                 Rs {{amount}}, due by {{dueDate}}. - {{schoolName}}",
            ),
            (
                Channel::Email,
                Some("Fee notice: {{feeTitle}}"),
                "Dear Parent,\n\nA fee of Rs {{amount}} ({{feeTitle}}) has been issued for \
                 {{studentName}} and is due by {{dueDate}}.\n\nRegards,\n{{schoolName}}",
            ),
        ],
    },
    TemplateDef {
        template_id: "FEE_OVERDUE",
        event_type: EventType::Fee,
        sub_key: Some("overdue_notice"),
        channels: &[
            (
                Channel::Sms,
                None,
                "Reminder: Rs {{amount}} ({{feeTitle}}) for {{studentName}} was due on \
                 {{dueDate}} and is now OVERDUE. - {{schoolName}}",
            ),
            (
                Channel::Whatsapp,
                None,
                "Reminder: the fee {{feeTitle}} of Rs {{amount}} for {{studentName}} was due \
                 on {{dueDate}} and is now overdue. Kindly arrange payment. - {{schoolName}}",
            ),
            (
                Channel::Email,
                Some("Overdue fee reminder: {{feeTitle}}"),
                "Dear Parent,\n\nThe fee {{feeTitle}} of Rs {{amount}} for {{studentName}} was \
                 due on {{dueDate}} and is now overdue.\n\nRegards,\n{{schoolName}}",
            ),
        ],
    },
    TemplateDef {
        template_id: "FEE_PAYMENT_SUCCESS",
        event_type: EventType::Fee,
        sub_key: Some("payment_success"),
        channels: &[
            (
                Channel::Email,
                Some("Payment receipt {{receiptNumber}}"),
                "Dear Parent,\n\nWe have received a payment of Rs {{amount}} for \
                 {{studentName}} ({{feeTitle}}). Receipt number: {{receiptNumber}}.\n\n\
                 Thank you,\n{{schoolName}}",
            ),
            (
                Channel::Whatsapp,
                None,
                "Payment of Rs {{amount}} received for {{studentName}}. \
                 Receipt no. {{receiptNumber}}. Thank you! - {{schoolName}}",
            ),
            (
                Channel::Push,
                Some("Payment received"),
                "Rs {{amount}} received for {{studentName}}. Receipt {{receiptNumber}}.",
            ),
        ],
    },
    TemplateDef {
        template_id: "EXAM_PUBLISHED",
        event_type: EventType::Exam,
        sub_key: None,
        channels: &[
            (
                Channel::Push,
                Some("Exam schedule published"),
                "{{examName}} for {{className}} begins on {{startDate}}.",
            ),
            (
                Channel::Email,
                Some("{{examName}} schedule published"),
                "Dear Parent,\n\nThe schedule for {{examName}} ({{className}}) has been \
                 published. The exam begins on {{startDate}}.\n\nRegards,\n{{schoolName}}",
            ),
            (
                Channel::Whatsapp,
                None,
                "The schedule for {{examName}} ({{className}}) is out. \
                 First paper: {{startDate}}. - {{schoolName}}",
            ),
        ],
    },
    TemplateDef {
        template_id: "NOTICE_POSTED",
        event_type: EventType::Notice,
        sub_key: None,
        channels: &[
            (
                Channel::Push,
                Some("{{noticeTitle}}"),
                "{{noticeBody}}",
            ),
            (
                Channel::Email,
                Some("{{noticeTitle}}"),
                "{{noticeBody}}\n\n- {{schoolName}}",
            ),
        ],
    },
];

impl TemplateCatalog {
    /// Build the built-in catalog. Fails if any declared template has zero
    /// channel bodies or a subject-bearing channel without a subject.
    pub fn builtin() -> AppResult<Self> {
        let mut templates = BTreeMap::new();

        for def in TEMPLATE_DEFS {
            if def.channels.is_empty() {
                return Err(AppError::Config(format!(
                    "Template {} declares no channel bodies",
                    def.template_id
                )));
            }

            let mut channels = BTreeMap::new();
            for (channel, subject, body) in def.channels {
                if matches!(channel, Channel::Email | Channel::Push) && subject.is_none() {
                    return Err(AppError::Config(format!(
                        "Template {} has no subject for {}",
                        def.template_id,
                        channel.as_str()
                    )));
                }
                channels.insert(
                    *channel,
                    ChannelTemplate {
                        subject: subject.map(CompiledTemplate::compile),
                        body: CompiledTemplate::compile(body),
                    },
                );
            }

            templates.insert(
                def.template_id.to_string(),
                NotificationTemplate {
                    template_id: def.template_id.to_string(),
                    event_type: def.event_type,
                    sub_key: def.sub_key.map(|s| s.to_string()),
                    channels,
                },
            );
        }

        Ok(Self { templates })
    }

    pub fn get(&self, template_id: &str) -> AppResult<&NotificationTemplate> {
        self.templates
            .get(template_id)
            .ok_or_else(|| AppError::TemplateNotFound(template_id.to_string()))
    }

    pub fn template_ids(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(|s| s.as_str())
    }
}
