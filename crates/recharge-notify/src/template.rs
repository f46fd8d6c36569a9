//! Winner message templates.
//!
//! Placeholders are `{prizeAmount}` and `{drawDate}`. Amounts are held in
//! minor units and rendered with two decimals (`10000` -> `100.00`).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{NotifyError, Result};

const PLACEHOLDERS: [&str; 2] = ["prizeAmount", "drawDate"];

/// Default winner message.
pub const DEFAULT_WINNER_TEMPLATE: &str =
    "Congratulations! You have won {prizeAmount} in the Recharge & Win draw of {drawDate}.";

/// Values substituted into a template.
#[derive(Debug, Clone)]
pub struct TemplateVars {
    pub prize_amount: u64,
    pub draw_date: NaiveDate,
}

/// A validated message template.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageTemplate(String);

impl MessageTemplate {
    /// Validate placeholder syntax and names.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        for name in placeholders(&text)? {
            if !PLACEHOLDERS.contains(&name) {
                return Err(NotifyError::Template(format!("unknown placeholder {{{name}}}")));
            }
        }
        Ok(Self(text))
    }

    /// Substitute the variables.
    pub fn render(&self, vars: &TemplateVars) -> String {
        let amount = format!("{}.{:02}", vars.prize_amount / 100, vars.prize_amount % 100);
        let date = vars.draw_date.format("%Y-%m-%d").to_string();
        self.0
            .replace("{prizeAmount}", &amount)
            .replace("{drawDate}", &date)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn placeholders(text: &str) -> Result<Vec<&str>> {
    let mut names = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| NotifyError::Template("unclosed '{'".to_string()))?;
        names.push(&after[..close]);
        rest = &after[close + 1..];
    }
    if rest.contains('}') {
        return Err(NotifyError::Template("unmatched '}'".to_string()));
    }
    Ok(names)
}

impl Default for MessageTemplate {
    fn default() -> Self {
        Self(DEFAULT_WINNER_TEMPLATE.to_string())
    }
}

impl TryFrom<String> for MessageTemplate {
    type Error = NotifyError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<MessageTemplate> for String {
    fn from(value: MessageTemplate) -> Self {
        value.0
    }
}
