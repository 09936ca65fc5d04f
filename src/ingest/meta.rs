//! Metadata tagging stage.
//!
//! Detects the document type and extracts entities. A completion model
//! handles classification and NER when configured; keyword and regex
//! heuristics otherwise. The regex pattern passes always run, model or not.

use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use super::{IngestStage, StageOutput};
use crate::agents::{LlmProvider, strip_code_fences, user_message};
use crate::core::{DocType, Entity, EntityType, IngestContext};
use crate::error::IngestError;

/// Character cap on the classification sample.
const CLASSIFY_SAMPLE_CHARS: usize = 2000;
/// Character cap on the NER sample.
const NER_SAMPLE_CHARS: usize = 2500;
/// Cap on recorded national-id numbers.
const MAX_ID_NUMBERS: usize = 5;
/// Cap on recorded document ids, URLs, dates, and amounts.
const MAX_PATTERN_MATCHES: usize = 10;

macro_rules! cached_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).unwrap_or_else(|_| unreachable!()))
        }
    };
}

cached_regex!(date_numeric, r"\d{1,2}[./-]\d{1,2}[./-]\d{2,4}");
cached_regex!(date_iso, r"\d{4}[./-]\d{1,2}[./-]\d{1,2}");
cached_regex!(money, r"(?i)\d+[.,]?\d*\s*(EUR|USD|BAM|KM|RSD|€|\$)");
cached_regex!(
    email,
    r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"
);
cached_regex!(
    phone,
    r"\+?\d{1,4}?[-.\s]?\(?\d{1,3}?\)?[-.\s]?\d{1,4}[-.\s]?\d{1,4}[-.\s]?\d{1,9}"
);
cached_regex!(national_id, r"\b\d{13}\b");
cached_regex!(document_id, r"\b[A-Z]{2,4}[-/]?\d{3,8}\b");
cached_regex!(url, r#"https?://[^\s<>"{}|\\^`\[\]]+"#);

/// Keyword sets for the heuristic document-type classifier.
const TYPE_KEYWORDS: &[(DocType, &[&str])] = &[
    (
        DocType::Invoice,
        &["faktura", "invoice", "račun", "iznos", "pdv", "amount due"],
    ),
    (
        DocType::Contract,
        &["ugovor", "contract", "sporazum", "stranka", "agreement"],
    ),
    (
        DocType::Report,
        &["izvještaj", "report", "analiza", "rezultati", "analysis"],
    ),
    (DocType::Email, &["from:", "to:", "subject:", "email"]),
    (DocType::Memo, &["memo", "memorandum", "obavijest"]),
    (DocType::Letter, &["dear", "sincerely", "poštovani"]),
    (DocType::Policy, &["policy", "pravilnik", "politika"]),
    (
        DocType::Manual,
        &["manual", "uputstvo", "priručnik", "handbook"],
    ),
];

/// Model response shape for classification.
#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    #[serde(default)]
    doc_type: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    language: String,
    #[serde(default)]
    keywords: Vec<String>,
}

/// Model response shape for NER.
#[derive(Debug, Deserialize)]
struct NerResponse {
    #[serde(default)]
    entities: Vec<RawEntity>,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    #[serde(default)]
    text: String,
    #[serde(rename = "type", default)]
    entity_type: String,
}

/// Metadata tagging stage.
pub struct MetaStage {
    llm: Option<Arc<dyn LlmProvider>>,
}

impl MetaStage {
    /// Creates the stage with an optional completion model.
    #[must_use]
    pub fn new(llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { llm }
    }

    async fn llm_classify(
        llm: &dyn LlmProvider,
        text: &str,
        output: &mut StageOutput,
    ) -> Result<(), IngestError> {
        let sample: String = text.chars().take(CLASSIFY_SAMPLE_CHARS).collect();
        let prompt = format!(
            "Analyze and classify the following document:\n\n{sample}\n\n\
             Respond with JSON:\n\
             {{\"doc_type\": \"invoice|contract|report|email|memo|letter|policy|manual|other\", \
             \"confidence\": 0.0-1.0, \"language\": \"bos|eng|other\", \
             \"keywords\": [\"...\"]}}"
        );

        let response = llm
            .complete_simple(&[user_message(&prompt)])
            .await
            .map_err(|e| IngestError::CapabilityUnavailable {
                capability: format!("completion ({e})"),
            })?;
        let parsed: ClassifyResponse = serde_json::from_str(strip_code_fences(&response))
            .map_err(|e| IngestError::CapabilityUnavailable {
                capability: format!("completion (bad classification JSON: {e})"),
            })?;

        output.doc_type = Some(DocType::parse(&parsed.doc_type));
        output
            .metadata
            .insert("doc_type_confidence".to_string(), json!(parsed.confidence));
        output
            .metadata
            .insert("language".to_string(), json!(parsed.language));
        output
            .metadata
            .insert("keywords".to_string(), json!(parsed.keywords));
        Ok(())
    }

    async fn llm_entities(
        llm: &dyn LlmProvider,
        text: &str,
        output: &mut StageOutput,
    ) -> Result<(), IngestError> {
        let sample: String = text.chars().take(NER_SAMPLE_CHARS).collect();
        let prompt = format!(
            "Extract the important entities from the text:\n\n{sample}\n\n\
             Respond with JSON:\n\
             {{\"entities\": [{{\"text\": \"...\", \
             \"type\": \"PERSON|ORG|DATE|MONEY|LOCATION|ID|OTHER\"}}]}}\n\n\
             Focus on: names, companies, dates, monetary amounts, locations, \
             document identifiers."
        );

        let response = llm
            .complete_simple(&[user_message(&prompt)])
            .await
            .map_err(|e| IngestError::CapabilityUnavailable {
                capability: format!("completion ({e})"),
            })?;
        let parsed: NerResponse = serde_json::from_str(strip_code_fences(&response)).map_err(
            |e| IngestError::CapabilityUnavailable {
                capability: format!("completion (bad NER JSON: {e})"),
            },
        )?;

        for raw in parsed.entities {
            if raw.text.trim().is_empty() {
                continue;
            }
            output.entities.push(Entity {
                text: raw.text,
                entity_type: EntityType::parse(&raw.entity_type),
                start: 0,
                end: 0,
                confidence: 0.8,
            });
        }
        Ok(())
    }

    fn heuristic_doc_type(text: &str) -> DocType {
        let lower = text.to_lowercase();
        for (doc_type, keywords) in TYPE_KEYWORDS {
            if keywords.iter().any(|kw| lower.contains(kw)) {
                return *doc_type;
            }
        }
        DocType::Other
    }

    fn heuristic_entities(text: &str, output: &mut StageOutput) {
        let mut push = |m: regex::Match<'_>, entity_type: EntityType, confidence: f32| {
            output.entities.push(Entity {
                text: m.as_str().to_string(),
                entity_type,
                start: m.start(),
                end: m.end(),
                confidence,
            });
        };

        for m in date_numeric().find_iter(text) {
            push(m, EntityType::Date, 0.9);
        }
        for m in date_iso().find_iter(text) {
            push(m, EntityType::Date, 0.9);
        }
        for m in money().find_iter(text) {
            push(m, EntityType::Money, 0.85);
        }
        for m in email().find_iter(text) {
            push(m, EntityType::Email, 0.95);
        }
        for m in phone().find_iter(text) {
            if digit_count(m.as_str()) >= 8 {
                push(m, EntityType::Phone, 0.7);
            }
        }
    }

    /// Pattern extraction that runs regardless of the classifier mode.
    fn extract_patterns(
        text: &str,
        entities: &[Entity],
        output: &mut StageOutput,
    ) {
        let ids = unique_matches(national_id(), text, MAX_ID_NUMBERS);
        if !ids.is_empty() {
            output.metadata.insert("id_numbers".to_string(), json!(ids));
        }

        let doc_ids = unique_matches(document_id(), text, MAX_PATTERN_MATCHES);
        if !doc_ids.is_empty() {
            output
                .metadata
                .insert("document_ids".to_string(), json!(doc_ids));
        }

        let urls = unique_matches(url(), text, MAX_PATTERN_MATCHES);
        if !urls.is_empty() {
            output.metadata.insert("urls".to_string(), json!(urls));
        }

        let dates = unique_entity_texts(entities, EntityType::Date, MAX_PATTERN_MATCHES);
        if !dates.is_empty() {
            output.metadata.insert("dates".to_string(), json!(dates));
        }

        let amounts = unique_entity_texts(entities, EntityType::Money, MAX_PATTERN_MATCHES);
        if !amounts.is_empty() {
            output
                .metadata
                .insert("money_amounts".to_string(), json!(amounts));
        }
    }
}

fn digit_count(s: &str) -> usize {
    s.chars().filter(char::is_ascii_digit).count()
}

fn unique_matches(re: &Regex, text: &str, cap: usize) -> Vec<String> {
    let mut seen = Vec::new();
    for m in re.find_iter(text) {
        let matched = m.as_str().to_string();
        if !seen.contains(&matched) {
            seen.push(matched);
            if seen.len() == cap {
                break;
            }
        }
    }
    seen
}

fn unique_entity_texts(entities: &[Entity], entity_type: EntityType, cap: usize) -> Vec<String> {
    let mut seen = Vec::new();
    for entity in entities.iter().filter(|e| e.entity_type == entity_type) {
        if !seen.contains(&entity.text) {
            seen.push(entity.text.clone());
            if seen.len() == cap {
                break;
            }
        }
    }
    seen
}

#[async_trait]
impl IngestStage for MetaStage {
    fn name(&self) -> &'static str {
        "meta"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["extract", "structure"]
    }

    fn should_run(&self, ctx: &IngestContext) -> bool {
        !ctx.raw_text.is_empty()
    }

    async fn process(&self, ctx: &IngestContext) -> Result<StageOutput, IngestError> {
        let mut output = StageOutput::default();
        let text = &ctx.raw_text;

        if let Some(llm) = &self.llm {
            if let Err(err) = Self::llm_classify(llm.as_ref(), text, &mut output).await {
                output
                    .errors
                    .push(format!("model classification failed ({err}), using heuristics"));
                output.doc_type = Some(Self::heuristic_doc_type(text));
                output
                    .metadata
                    .insert("detection_method".to_string(), json!("heuristic"));
            }
            if let Err(err) = Self::llm_entities(llm.as_ref(), text, &mut output).await {
                output
                    .errors
                    .push(format!("model NER failed ({err}), using heuristics"));
                Self::heuristic_entities(text, &mut output);
            }
        } else {
            output.doc_type = Some(Self::heuristic_doc_type(text));
            output
                .metadata
                .insert("detection_method".to_string(), json!("heuristic"));
            Self::heuristic_entities(text, &mut output);
        }

        let entities_snapshot = output.entities.clone();
        Self::extract_patterns(text, &entities_snapshot, &mut output);

        output
            .metrics
            .push(("entities_extracted".to_string(), json!(output.entities.len())));
        output.metrics.push((
            "metadata_fields".to_string(),
            json!(output.metadata.len()),
        ));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use test_case::test_case;

    fn run_heuristic(text: &str) -> StageOutput {
        let mut ctx = IngestContext::new(1, PathBuf::from("/tmp/x"), "x".to_string(), 1);
        ctx.raw_text = text.to_string();
        let stage = MetaStage::new(None);
        futures_util::future::FutureExt::now_or_never(stage.process(&ctx))
            .expect("heuristic path is synchronous")
            .expect("heuristic path cannot fail")
    }

    #[test_case("Invoice no 42, amount due today", DocType::Invoice)]
    #[test_case("Ugovor o saradnji između stranaka", DocType::Contract)]
    #[test_case("Quarterly report with analysis", DocType::Report)]
    #[test_case("From: a@b.com\nTo: c@d.com\nSubject: hi", DocType::Email)]
    #[test_case("Interni memorandum za osoblje", DocType::Memo)]
    #[test_case("Employee handbook and manual", DocType::Manual)]
    #[test_case("Nothing identifiable here", DocType::Other)]
    fn test_heuristic_doc_type(text: &str, expected: DocType) {
        assert_eq!(MetaStage::heuristic_doc_type(text), expected);
    }

    #[test]
    fn test_entity_extraction_dates_and_money() {
        let output = run_heuristic("Paid 1.500,00 EUR on 12.03.2024 and 200 USD on 2024-04-01.");

        let dates: Vec<&Entity> = output
            .entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Date)
            .collect();
        assert!(dates.iter().any(|e| e.text == "12.03.2024"));
        assert!(dates.iter().any(|e| e.text == "2024-04-01"));

        let money: Vec<&Entity> = output
            .entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Money)
            .collect();
        assert_eq!(money.len(), 2);
    }

    #[test]
    fn test_entity_extraction_email_and_phone() {
        let output = run_heuristic("Contact billing@example.com or +387 61 123 456.");

        assert!(
            output
                .entities
                .iter()
                .any(|e| e.entity_type == EntityType::Email
                    && e.text == "billing@example.com")
        );
        assert!(
            output
                .entities
                .iter()
                .any(|e| e.entity_type == EntityType::Phone)
        );
    }

    #[test]
    fn test_short_numbers_are_not_phones() {
        let output = run_heuristic("Call extension 1234 now");
        assert!(
            !output
                .entities
                .iter()
                .any(|e| e.entity_type == EntityType::Phone)
        );
    }

    #[test]
    fn test_pattern_metadata() {
        let output = run_heuristic(
            "ID 0101985123456 ref INV-2024 at https://example.com/a dated 01.02.2023.",
        );

        assert_eq!(output.metadata["id_numbers"], json!(["0101985123456"]));
        assert_eq!(output.metadata["document_ids"], json!(["INV-2024"]));
        assert_eq!(output.metadata["urls"], json!(["https://example.com/a"]));
        assert_eq!(output.metadata["dates"], json!(["01.02.2023"]));
    }

    #[test]
    fn test_pattern_caps() {
        let mut text = String::new();
        for i in 0..20 {
            text.push_str(&format!("REF-{:04} ", 1000 + i));
        }
        let output = run_heuristic(&text);
        assert_eq!(
            output.metadata["document_ids"].as_array().unwrap().len(),
            MAX_PATTERN_MATCHES
        );
    }

    #[test]
    fn test_duplicate_matches_recorded_once() {
        let output = run_heuristic("REF-1234 again REF-1234 and once more REF-1234");
        assert_eq!(output.metadata["document_ids"], json!(["REF-1234"]));
    }

    #[test]
    fn test_metrics_present() {
        let output = run_heuristic("Paid 5 EUR on 01.01.2020.");
        assert!(output.metrics.iter().any(|(k, _)| k == "entities_extracted"));
        assert!(output.metrics.iter().any(|(k, _)| k == "metadata_fields"));
    }

    #[test]
    fn test_should_run_requires_text() {
        let ctx = IngestContext::new(1, PathBuf::from("/tmp/x"), "x".to_string(), 1);
        assert!(!MetaStage::new(None).should_run(&ctx));
    }
}
