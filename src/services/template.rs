//! Compiled message templates and locale-aware value rendering.
//!
//! `{{name}}` placeholders are scanned once at catalog construction into a
//! literal/variable token list; rendering is then a single pass over tokens.
//! Rendering is pure and deterministic — the idempotency digest depends on
//! that.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// A variable supplied by an event producer. Stringified with the tenant's
/// display locale at render time.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

/// JSON numbers become `Number`, ISO `YYYY-MM-DD` strings become `Date`,
/// everything else stays `Text`.
impl<'de> Deserialize<'de> for TemplateValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(TemplateValue::Number(n)),
            Raw::Text(s) => match NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
                Ok(date) => Ok(TemplateValue::Date(date)),
                Err(_) => Ok(TemplateValue::Text(s)),
            },
        }
    }
}

impl TemplateValue {
    /// Locale-aware display form used in rendered message bodies.
    pub fn display(&self, locale: &Locale) -> String {
        match self {
            TemplateValue::Text(s) => s.clone(),
            TemplateValue::Number(n) => locale.format_number(*n),
            TemplateValue::Date(d) => d.format(locale.date_format).to_string(),
        }
    }

    /// Locale-independent canonical form used for idempotency hashing.
    pub fn canonical(&self) -> String {
        match self {
            TemplateValue::Text(s) => s.clone(),
            TemplateValue::Number(n) => format!("{}", n),
            TemplateValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }
}

/// Display locale for rendered numbers and dates.
#[derive(Debug, Clone)]
pub struct Locale {
    grouping: Grouping,
    date_format: &'static str,
}

#[derive(Debug, Clone, Copy)]
enum Grouping {
    /// Lakh/crore grouping: 12,34,567
    Indian,
    /// Thousands grouping: 1,234,567
    Western,
}

impl Locale {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "en-IN" | "hi-IN" => Locale {
                grouping: Grouping::Indian,
                date_format: "%d %b %Y",
            },
            _ => Locale {
                grouping: Grouping::Western,
                date_format: "%b %d, %Y",
            },
        }
    }

    fn format_number(&self, n: f64) -> String {
        let negative = n < 0.0;
        let abs = n.abs();

        let (int_digits, frac) = if abs.fract().abs() < 1e-9 {
            (format!("{}", abs.trunc() as i64), None)
        } else {
            let s = format!("{:.2}", abs);
            let mut parts = s.splitn(2, '.');
            let int = parts.next().unwrap_or("0").to_string();
            (int, parts.next().map(|f| f.to_string()))
        };

        let grouped = match self.grouping {
            Grouping::Indian => group_indian(&int_digits),
            Grouping::Western => group_western(&int_digits),
        };

        let mut out = String::new();
        if negative {
            out.push('-');
        }
        out.push_str(&grouped);
        if let Some(frac) = frac {
            out.push('.');
            out.push_str(&frac);
        }
        out
    }
}

impl Default for Locale {
    fn default() -> Self {
        Locale::from_tag("en-IN")
    }
}

fn group_western(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn group_indian(digits: &str) -> String {
    if digits.len() <= 3 {
        return digits.to_string();
    }
    let (head, tail) = digits.split_at(digits.len() - 3);
    let mut groups: Vec<&str> = Vec::new();
    let mut rest = head;
    while rest.len() > 2 {
        let (left, right) = rest.split_at(rest.len() - 2);
        groups.push(right);
        rest = left;
    }
    groups.push(rest);
    groups.reverse();
    format!("{},{}", groups.join(","), tail)
}

/// A placeholder with no matching variable. Non-fatal: the placeholder
/// renders empty and the warning is surfaced as a data-quality signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderWarning {
    pub placeholder: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Variable(String),
}

/// A template body compiled to a token sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTemplate {
    tokens: Vec<Token>,
}

impl CompiledTemplate {
    /// Scan `{{name}}` occurrences into tokens. An unclosed `{{` is kept as
    /// literal text.
    pub fn compile(source: &str) -> Self {
        let mut tokens = Vec::new();
        let mut start = 0usize;

        while let Some(open_rel) = source[start..].find("{{") {
            let open = start + open_rel;
            if let Some(close_rel) = source[open + 2..].find("}}") {
                let close = open + 2 + close_rel;
                if open > start {
                    tokens.push(Token::Literal(source[start..open].to_string()));
                }
                tokens.push(Token::Variable(source[open + 2..close].trim().to_string()));
                start = close + 2;
            } else {
                break;
            }
        }
        if start < source.len() {
            tokens.push(Token::Literal(source[start..].to_string()));
        }

        Self { tokens }
    }

    /// Substitute every placeholder. Missing variables render empty and are
    /// reported back, never raised.
    pub fn render(
        &self,
        variables: &BTreeMap<String, TemplateValue>,
        locale: &Locale,
    ) -> (String, Vec<RenderWarning>) {
        let mut out = String::new();
        let mut warnings = Vec::new();

        for token in &self.tokens {
            match token {
                Token::Literal(text) => out.push_str(text),
                Token::Variable(name) => match variables.get(name) {
                    Some(value) => out.push_str(&value.display(locale)),
                    None => warnings.push(RenderWarning {
                        placeholder: name.clone(),
                    }),
                },
            }
        }

        (out, warnings)
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().filter_map(|t| match t {
            Token::Variable(name) => Some(name.as_str()),
            Token::Literal(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, TemplateValue)]) -> BTreeMap<String, TemplateValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn absent_sms_renders_with_no_placeholders_left() {
        let template = CompiledTemplate::compile(
            "Dear Parent, {{studentName}} was marked ABSENT on {{date}}. - Greenview School",
        );
        let variables = vars(&[
            ("studentName", TemplateValue::Text("Aarav".to_string())),
            ("date", TemplateValue::Text("2024-05-01".to_string())),
        ]);

        let (rendered, warnings) = template.render(&variables, &Locale::default());
        assert_eq!(
            rendered,
            "Dear Parent, Aarav was marked ABSENT on 2024-05-01. - Greenview School"
        );
        assert!(!rendered.contains("{{"));
        assert!(warnings.is_empty());
    }

    #[test]
    fn rendering_is_deterministic() {
        let template = CompiledTemplate::compile("Rs {{amount}} due by {{dueDate}}");
        let variables = vars(&[
            ("amount", TemplateValue::Number(152500.0)),
            (
                "dueDate",
                TemplateValue::Date(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()),
            ),
        ]);

        let locale = Locale::from_tag("en-IN");
        let (first, _) = template.render(&variables, &locale);
        let (second, _) = template.render(&variables, &locale);
        assert_eq!(first, second);
        assert_eq!(first, "Rs 1,52,500 due by 15 Jun 2024");
    }

    #[test]
    fn missing_variable_renders_empty_with_warning() {
        let template = CompiledTemplate::compile("Hello {{name}}, your fee is {{amount}}");
        let variables = vars(&[("name", TemplateValue::Text("Priya".to_string()))]);

        let (rendered, warnings) = template.render(&variables, &Locale::default());
        assert_eq!(rendered, "Hello Priya, your fee is ");
        assert_eq!(
            warnings,
            vec![RenderWarning {
                placeholder: "amount".to_string()
            }]
        );
    }

    #[test]
    fn unclosed_placeholder_stays_literal() {
        let template = CompiledTemplate::compile("Broken {{name");
        let (rendered, warnings) = template.render(&BTreeMap::new(), &Locale::default());
        assert_eq!(rendered, "Broken {{name");
        assert!(warnings.is_empty());
    }

    #[test]
    fn number_grouping_by_locale() {
        let indian = Locale::from_tag("en-IN");
        let western = Locale::from_tag("en-US");
        assert_eq!(TemplateValue::Number(1234567.0).display(&indian), "12,34,567");
        assert_eq!(TemplateValue::Number(1234567.0).display(&western), "1,234,567");
        assert_eq!(TemplateValue::Number(999.0).display(&indian), "999");
        assert_eq!(TemplateValue::Number(1500.5).display(&indian), "1,500.50");
        assert_eq!(TemplateValue::Number(-2500.0).display(&indian), "-2,500");
    }

    #[test]
    fn canonical_form_is_locale_independent() {
        let value = TemplateValue::Number(152500.0);
        assert_eq!(value.canonical(), "152500");
        let date = TemplateValue::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(date.canonical(), "2024-05-01");
    }

    #[test]
    fn variable_names_come_from_tokens() {
        let template = CompiledTemplate::compile("{{a}} and {{b}} and {{a}}");
        let names: Vec<&str> = template.variable_names().collect();
        assert_eq!(names, vec!["a", "b", "a"]);
    }
}
