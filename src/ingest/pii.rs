//! PII masking stage.
//!
//! Applies masking rules to unique chunks in a fixed order: email, phone,
//! national ID, credit card, IBAN. Only the masked text is ever persisted.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde_json::json;

use super::{IngestStage, StageOutput};
use crate::core::IngestContext;
use crate::error::IngestError;

macro_rules! cached_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).unwrap_or_else(|_| unreachable!()))
        }
    };
}

cached_regex!(
    email_re,
    r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"
);
cached_regex!(phone_ba_intl_re, r"\+387\s?\d{2}\s?\d{3}\s?\d{3,4}");
cached_regex!(phone_ba_local_re, r"\b06[0-9]\s?\d{3}\s?\d{3,4}\b");
cached_regex!(
    phone_generic_re,
    r"\+\d{1,4}[-.\s]?\(?\d{1,3}\)?[-.\s]?\d{1,4}[-.\s]?\d{1,4}[-.\s]?\d{1,9}"
);
cached_regex!(national_id_re, r"\b\d{13}\b");
cached_regex!(card_re, r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b");
cached_regex!(
    iban_re,
    r"\b[A-Z]{2}\d{2}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b"
);

/// Which PII kinds get masked.
#[derive(Debug, Clone, Copy)]
pub struct PiiConfig {
    /// Mask email addresses.
    pub emails: bool,
    /// Mask phone numbers.
    pub phones: bool,
    /// Mask 13-digit national IDs.
    pub ids: bool,
    /// Mask card numbers and IBANs.
    pub cards: bool,
}

impl Default for PiiConfig {
    fn default() -> Self {
        Self {
            emails: true,
            phones: true,
            ids: true,
            cards: true,
        }
    }
}

/// Per-kind masking counters.
#[derive(Debug, Default, Clone, Copy)]
struct PiiCounts {
    emails: usize,
    phones: usize,
    national_ids: usize,
    credit_cards: usize,
    iban: usize,
}

impl PiiCounts {
    const fn total(self) -> usize {
        self.emails + self.phones + self.national_ids + self.credit_cards + self.iban
    }
}

/// Masks emails as `a***@domain`.
fn mask_emails(text: &str, count: &mut usize) -> String {
    email_re()
        .replace_all(text, |caps: &Captures<'_>| {
            *count += 1;
            let matched = &caps[0];
            match matched.split_once('@') {
                Some((local, domain)) => {
                    let first = local.chars().next().unwrap_or('x');
                    format!("{first}***@{domain}")
                }
                None => "[EMAIL_MASKED]".to_string(),
            }
        })
        .into_owned()
}

fn strip_digits(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

/// Masks phone numbers with 8+ digits as `[PHONE_XXX<last3>]`.
fn mask_phones(text: &str, count: &mut usize) -> String {
    let mut masked = text.to_string();
    for re in [phone_ba_intl_re(), phone_ba_local_re(), phone_generic_re()] {
        masked = re
            .replace_all(&masked, |caps: &Captures<'_>| {
                let matched = &caps[0];
                let digits = strip_digits(matched);
                if digits.len() >= 8 {
                    *count += 1;
                    let last3 = &digits[digits.len() - 3..];
                    format!("[PHONE_XXX{last3}]")
                } else {
                    matched.to_string()
                }
            })
            .into_owned();
    }
    masked
}

/// Masks plausible 13-digit national IDs, keeping the first two digits.
///
/// Plausibility: digits 1-2 form a day (1-31) and digits 3-4 a month
/// (1-12).
fn mask_national_ids(text: &str, count: &mut usize) -> String {
    national_id_re()
        .replace_all(text, |caps: &Captures<'_>| {
            let matched = &caps[0];
            let day: u32 = matched[0..2].parse().unwrap_or(0);
            let month: u32 = matched[2..4].parse().unwrap_or(0);
            if (1..=31).contains(&day) && (1..=12).contains(&month) {
                *count += 1;
                format!("{}{}", &matched[0..2], "*".repeat(11))
            } else {
                matched.to_string()
            }
        })
        .into_owned()
}

/// Masks Luhn-valid 16-digit card numbers, showing only the last four.
fn mask_cards(text: &str, count: &mut usize) -> String {
    card_re()
        .replace_all(text, |caps: &Captures<'_>| {
            let matched = &caps[0];
            let digits = strip_digits(matched);
            if digits.len() == 16 && luhn_check(&digits) {
                *count += 1;
                format!("****-****-****-{}", &digits[12..])
            } else {
                matched.to_string()
            }
        })
        .into_owned()
}

/// Masks IBANs, keeping the country code and last four digits.
fn mask_ibans(text: &str, count: &mut usize) -> String {
    iban_re()
        .replace_all(text, |caps: &Captures<'_>| {
            *count += 1;
            let matched = &caps[0];
            let country = &matched[0..2];
            let digits = strip_digits(matched);
            let last4 = &digits[digits.len().saturating_sub(4)..];
            format!("{country}** **** **** **** {last4}")
        })
        .into_owned()
}

/// Luhn checksum validation.
fn luhn_check(digits: &str) -> bool {
    let mut values: Vec<u32> = match digits.chars().map(|c| c.to_digit(10)).collect() {
        Some(v) => v,
        None => return false,
    };

    // Double every second digit from the right
    let len = values.len();
    if len < 2 {
        return false;
    }
    let mut i = len - 2;
    loop {
        values[i] *= 2;
        if values[i] > 9 {
            values[i] -= 9;
        }
        if i < 2 {
            break;
        }
        i -= 2;
    }

    values.iter().sum::<u32>() % 10 == 0
}

/// Applies the configured masking rules in fixed order.
///
/// Returns the masked text and the per-kind counts for this text. Text
/// without PII passes through byte-identical.
fn mask_text(text: &str, config: &PiiConfig) -> (String, PiiCounts) {
    let mut counts = PiiCounts::default();
    let mut masked = text.to_string();

    if config.emails {
        masked = mask_emails(&masked, &mut counts.emails);
    }
    if config.phones {
        masked = mask_phones(&masked, &mut counts.phones);
    }
    if config.ids {
        masked = mask_national_ids(&masked, &mut counts.national_ids);
    }
    if config.cards {
        masked = mask_cards(&masked, &mut counts.credit_cards);
        masked = mask_ibans(&masked, &mut counts.iban);
    }

    (masked, counts)
}

/// PII masking stage.
pub struct PiiStage {
    config: PiiConfig,
}

impl PiiStage {
    /// Creates the stage with the given rule configuration.
    #[must_use]
    pub const fn new(config: PiiConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl IngestStage for PiiStage {
    fn name(&self) -> &'static str {
        "pii"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["dedup"]
    }

    fn should_run(&self, ctx: &IngestContext) -> bool {
        !ctx.chunks.is_empty()
    }

    async fn process(&self, ctx: &IngestContext) -> Result<StageOutput, IngestError> {
        let mut chunks = ctx.chunks.clone();
        let mut totals = PiiCounts::default();
        let mut masked_chunks = 0usize;

        for chunk in chunks.iter_mut().filter(|c| !c.is_duplicate) {
            let (masked, counts) = mask_text(&chunk.text, &self.config);
            if masked != chunk.text {
                chunk.text = masked;
                chunk.pii_masked = true;
                chunk
                    .metadata
                    .insert("pii_masked".to_string(), json!(true));
                masked_chunks += 1;
            }
            totals.emails += counts.emails;
            totals.phones += counts.phones;
            totals.national_ids += counts.national_ids;
            totals.credit_cards += counts.credit_cards;
            totals.iban += counts.iban;
        }

        let mut output = StageOutput {
            chunks: Some(chunks),
            ..StageOutput::default()
        };
        output.metadata.insert(
            "pii_masked".to_string(),
            json!({
                "emails": totals.emails,
                "phones": totals.phones,
                "national_ids": totals.national_ids,
                "credit_cards": totals.credit_cards,
                "iban": totals.iban,
            }),
        );
        output
            .metrics
            .push(("chunks_with_pii".to_string(), json!(masked_chunks)));
        output
            .metrics
            .push(("total_pii_masked".to_string(), json!(totals.total())));
        Ok(output)
    }
}
