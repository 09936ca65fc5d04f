//! Prompt construction for the query agents.

use crate::config::Strictness;
use crate::search::SearchHit;

/// Per-hit character budget in the grounded context window.
const CONTEXT_CHARS_PER_HIT: usize = 1200;
/// Hit snippets shown to the judge.
const JUDGE_SNIPPET_CHARS: usize = 300;

/// System prompt for the answer generator.
pub const ANSWER_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions based on the provided context. \
IMPORTANT: Always respond in the SAME LANGUAGE as the user's question. \
Answer only from the context; if it does not contain the needed information, say so \
clearly and do not invent facts.";

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Builds the grounded answer prompt: each retrieved chunk's first 1200
/// characters delimited by `---`, followed by the question.
#[must_use]
pub fn build_answer_prompt(query: &str, hits: &[SearchHit]) -> String {
    let context = hits
        .iter()
        .map(|hit| truncate_chars(&hit.content, CONTEXT_CHARS_PER_HIT))
        .collect::<Vec<_>>()
        .join("\n\n---\n");

    format!(
        "Answer the question precisely using ONLY the information in the CONTEXT. \
         If the context is insufficient, say so explicitly and do not hallucinate.\n\n\
         QUESTION:\n{query}\n\nCONTEXT:\n{context}\n\n\
         Return a clear, concise answer and do not introduce facts beyond the context."
    )
}

/// Builds the rewrite prompt asking for `n` paraphrases, one per line.
#[must_use]
pub fn build_rewrite_prompt(query: &str, n: usize) -> String {
    format!(
        "Generate {n} alternative phrasings of the following search query. \
         Keep the meaning identical, vary the wording. \
         Return exactly {n} lines, one phrasing per line, without numbering:\n\n{query}"
    )
}

/// Builds the judge prompt over the query, answer, and retrieved hits.
#[must_use]
pub fn build_judge_prompt(
    query: &str,
    answer: &str,
    hits: &[SearchHit],
    strictness: Strictness,
) -> String {
    let strictness_rule = match strictness {
        Strictness::Low => "Be lenient: accept the answer unless it is clearly unsupported.",
        Strictness::Medium => "Be balanced: accept answers that address the question and are grounded.",
        Strictness::High => {
            "Be strict: require the answer to fully address the question with clear grounding."
        }
    };

    let snippets = hits
        .iter()
        .take(5)
        .map(|hit| truncate_chars(&hit.content, JUDGE_SNIPPET_CHARS))
        .collect::<Vec<_>>()
        .join("\n---\n");

    format!(
        "Evaluate whether the answer below properly addresses the question, given the \
         retrieved context ({} chunks).\n{strictness_rule}\n\n\
         QUESTION:\n{query}\n\nANSWER:\n{answer}\n\nCONTEXT SNIPPETS:\n{snippets}\n\n\
         Respond with JSON: {{\"ok\": true|false, \"needs_more\": true|false, \
         \"reason\": \"...\"}}. Set needs_more to true only if retrieving more \
         context would plausibly improve the answer.",
        hits.len()
    )
}

/// Builds the two-sentence summary prompt.
#[must_use]
pub fn build_summary_prompt(answer: &str) -> String {
    format!("Summarize the following answer in two sentences, clearly and precisely:\n\n{answer}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn hit(content: &str) -> SearchHit {
        SearchHit {
            chunk_id: 1,
            document_id: 1,
            chunk_index: 0,
            filename: "f.txt".to_string(),
            content: content.to_string(),
            score: 1.0,
            metadata: Value::Null,
        }
    }

    #[test]
    fn test_answer_prompt_contains_query_and_context() {
        let prompt = build_answer_prompt("what is X?", &[hit("X is a thing"), hit("more")]);
        assert!(prompt.contains("what is X?"));
        assert!(prompt.contains("X is a thing"));
        assert!(prompt.contains("\n---\n"));
    }

    #[test]
    fn test_answer_prompt_truncates_long_chunks() {
        let long = "y".repeat(5000);
        let prompt = build_answer_prompt("q", &[hit(&long)]);
        assert!(!prompt.contains(&"y".repeat(1201)));
        assert!(prompt.contains(&"y".repeat(1200)));
    }

    #[test]
    fn test_truncate_chars_multibyte_safe() {
        let text = "čćžšđ".repeat(300);
        let cut = truncate_chars(&text, 100);
        assert_eq!(cut.chars().count(), 100);
    }

    #[test]
    fn test_rewrite_prompt_mentions_count() {
        let prompt = build_rewrite_prompt("find invoices", 3);
        assert!(prompt.contains("Generate 3"));
        assert!(prompt.contains("find invoices"));
    }

    #[test]
    fn test_judge_prompt_strictness_variants() {
        let hits = [hit("ctx")];
        let low = build_judge_prompt("q", "a", &hits, Strictness::Low);
        let high = build_judge_prompt("q", "a", &hits, Strictness::High);
        assert!(low.contains("lenient"));
        assert!(high.contains("strict"));
        assert!(low.contains("needs_more"));
    }

    #[test]
    fn test_summary_prompt() {
        assert!(build_summary_prompt("long answer").contains("two sentences"));
    }
}
