//! Table normalization stage.
//!
//! Cleans extracted tables, renders CSV/JSON into table metadata, and
//! optionally asks a completion model for better column headers. Errors on
//! a single table never abort the run.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::extract::render_table_text;
use super::{IngestStage, StageOutput};
use crate::agents::{LlmProvider, strip_code_fences, user_message};
use crate::core::{IngestContext, TableData};
use crate::error::IngestError;

/// Rows shown to the model when enriching headers.
const ENRICH_PREVIEW_ROWS: usize = 5;
/// Tables with fewer data rows are not worth a model call.
const ENRICH_MIN_ROWS: usize = 3;

/// Drops all-empty rows and columns that are empty in the header and in
/// every row. Idempotent on already-clean tables.
fn clean_table(table: &TableData) -> TableData {
    let cleaned_rows: Vec<Vec<String>> = table
        .rows
        .iter()
        .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
        .cloned()
        .collect();

    if table.headers.is_empty() || cleaned_rows.is_empty() {
        return table.clone();
    }

    let col_count = table.headers.len();
    let non_empty_cols: Vec<usize> = (0..col_count)
        .filter(|&col| {
            let header_has = table
                .headers
                .get(col)
                .is_some_and(|h| !h.trim().is_empty());
            header_has
                || cleaned_rows
                    .iter()
                    .any(|row| row.get(col).is_some_and(|c| !c.trim().is_empty()))
        })
        .collect();

    let headers = non_empty_cols
        .iter()
        .filter_map(|&col| table.headers.get(col).cloned())
        .collect();
    let rows = cleaned_rows
        .iter()
        .map(|row| {
            non_empty_cols
                .iter()
                .map(|&col| row.get(col).cloned().unwrap_or_default())
                .collect()
        })
        .collect();

    TableData {
        headers,
        rows,
        page: table.page,
        format: table.format.clone(),
        metadata: table.metadata.clone(),
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Renders the table as CSV.
fn table_to_csv(table: &TableData) -> String {
    let mut lines = Vec::with_capacity(table.rows.len() + 1);
    lines.push(
        table
            .headers
            .iter()
            .map(|h| csv_escape(h))
            .collect::<Vec<_>>()
            .join(","),
    );
    for row in &table.rows {
        lines.push(
            row.iter()
                .map(|c| csv_escape(c))
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    lines.join("\n")
}

/// Renders the table as a JSON array of header-keyed records.
fn table_to_json(table: &TableData) -> String {
    let records: Vec<serde_json::Map<String, serde_json::Value>> = table
        .rows
        .iter()
        .map(|row| {
            table
                .headers
                .iter()
                .enumerate()
                .map(|(idx, header)| {
                    (
                        header.clone(),
                        json!(row.get(idx).cloned().unwrap_or_default()),
                    )
                })
                .collect()
        })
        .collect();
    serde_json::to_string_pretty(&records).unwrap_or_else(|_| "[]".to_string())
}

/// Model response shape for header enrichment.
#[derive(Debug, Deserialize)]
struct EnrichResponse {
    #[serde(default)]
    headers: Vec<String>,
    #[serde(default)]
    column_types: Vec<String>,
    #[serde(default)]
    description: String,
}

/// Table normalization stage.
pub struct TableStage {
    llm: Option<Arc<dyn LlmProvider>>,
}

impl TableStage {
    /// Creates the stage with an optional completion model.
    #[must_use]
    pub fn new(llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { llm }
    }

    async fn enrich_headers(
        llm: &dyn LlmProvider,
        table: &mut TableData,
    ) -> Result<(), IngestError> {
        let preview = TableData {
            headers: table.headers.clone(),
            rows: table.rows.iter().take(ENRICH_PREVIEW_ROWS).cloned().collect(),
            page: table.page,
            format: table.format.clone(),
            metadata: serde_json::Map::new(),
        };
        let prompt = format!(
            "Analyze the following table and improve its column names:\n\n{}\n\n\
             Respond with JSON:\n\
             {{\"headers\": [\"Better Name 1\", ...], \
             \"column_types\": [\"text|number|date|currency|boolean\", ...], \
             \"description\": \"what this table represents\"}}\n\n\
             Rules:\n\
             - Use clear, descriptive names\n\
             - Detect the data types\n\
             - Keep the same number of columns",
            render_table_text(&preview)
        );

        let response = llm
            .complete_simple(&[user_message(&prompt)])
            .await
            .map_err(|e| IngestError::CapabilityUnavailable {
                capability: format!("completion ({e})"),
            })?;
        let parsed: EnrichResponse = serde_json::from_str(strip_code_fences(&response))
            .map_err(|e| IngestError::CapabilityUnavailable {
                capability: format!("completion (bad table JSON: {e})"),
            })?;

        // A suggestion with the wrong column count is discarded outright
        if parsed.headers.len() == table.headers.len() {
            table.headers = parsed.headers;
        }
        table
            .metadata
            .insert("column_types".to_string(), json!(parsed.column_types));
        table
            .metadata
            .insert("description".to_string(), json!(parsed.description));
        table.metadata.insert("enhanced".to_string(), json!(true));
        Ok(())
    }
}

#[async_trait]
impl IngestStage for TableStage {
    fn name(&self) -> &'static str {
        "table"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["extract"]
    }

    fn should_run(&self, ctx: &IngestContext) -> bool {
        !ctx.tables.is_empty()
    }

    async fn process(&self, ctx: &IngestContext) -> Result<StageOutput, IngestError> {
        let mut output = StageOutput::default();
        let mut processed = Vec::with_capacity(ctx.tables.len());

        for (idx, table) in ctx.tables.iter().enumerate() {
            let mut cleaned = clean_table(table);

            if let Some(llm) = &self.llm
                && cleaned.rows.len() >= ENRICH_MIN_ROWS
                && let Err(err) = Self::enrich_headers(llm.as_ref(), &mut cleaned).await
            {
                output
                    .errors
                    .push(format!("table {idx} header enrichment failed: {err}"));
            }

            cleaned
                .metadata
                .insert("csv".to_string(), json!(table_to_csv(&cleaned)));
            cleaned
                .metadata
                .insert("json".to_string(), json!(table_to_json(&cleaned)));
            processed.push(cleaned);
        }

        output.metadata.insert(
            "tables_count".to_string(),
            json!(processed.len()),
        );
        output.metadata.insert(
            "tables_data".to_string(),
            json!(
                processed
                    .iter()
                    .map(|t| {
                        json!({
                            "headers": t.headers,
                            "row_count": t.rows.len(),
                            "col_count": t.headers.len(),
                        })
                    })
                    .collect::<Vec<_>>()
            ),
        );
        output
            .metrics
            .push(("tables_processed".to_string(), json!(processed.len())));
        output.tables = Some(processed);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn table(headers: &[&str], rows: &[&[&str]]) -> TableData {
        TableData::new(
            headers.iter().map(ToString::to_string).collect(),
            rows.iter()
                .map(|r| r.iter().map(ToString::to_string).collect())
                .collect(),
        )
    }

    #[test]
    fn test_clean_drops_empty_rows() {
        let t = table(&["a", "b"], &[&["1", "2"], &["", "  "], &["3", "4"]]);
        let cleaned = clean_table(&t);
        assert_eq!(cleaned.rows.len(), 2);
    }

    #[test]
    fn test_clean_drops_empty_columns() {
        let t = table(&["a", "", "c"], &[&["1", "", "3"], &["4", " ", "6"]]);
        let cleaned = clean_table(&t);
        assert_eq!(cleaned.headers, vec!["a", "c"]);
        assert_eq!(cleaned.rows[0], vec!["1", "3"]);
        assert_eq!(cleaned.rows[1], vec!["4", "6"]);
    }

    #[test]
    fn test_clean_keeps_column_with_data_but_no_header() {
        let t = table(&["a", ""], &[&["1", "x"]]);
        let cleaned = clean_table(&t);
        assert_eq!(cleaned.headers, vec!["a", ""]);
        assert_eq!(cleaned.rows[0], vec!["1", "x"]);
    }

    #[test]
    fn test_clean_idempotent_on_clean_tables() {
        let t = table(&["name", "amount"], &[&["x", "1"], &["y", "2"]]);
        let once = clean_table(&t);
        let twice = clean_table(&once);
        assert_eq!(once.headers, twice.headers);
        assert_eq!(once.rows, twice.rows);
    }

    #[test]
    fn test_clean_all_empty_rows_returns_original() {
        let t = table(&["a"], &[&[""], &["  "]]);
        let cleaned = clean_table(&t);
        assert_eq!(cleaned.rows.len(), 2);
    }

    #[test]
    fn test_csv_rendering() {
        let t = table(&["name", "note"], &[&["Smith, John", "said \"hi\""]]);
        let csv = table_to_csv(&t);
        assert_eq!(csv, "name,note\n\"Smith, John\",\"said \"\"hi\"\"\"");
    }

    #[test]
    fn test_json_rendering() {
        let t = table(&["a", "b"], &[&["1", "2"]]);
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&table_to_json(&t)).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["a"], "1");
        assert_eq!(parsed[0]["b"], "2");
    }

    #[test]
    fn test_json_rendering_short_row_pads_empty() {
        let t = table(&["a", "b"], &[&["only"]]);
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&table_to_json(&t)).unwrap();
        assert_eq!(parsed[0]["b"], "");
    }

    #[tokio::test]
    async fn test_stage_renders_into_metadata() {
        let mut ctx = IngestContext::new(1, PathBuf::from("/tmp/x"), "x".to_string(), 1);
        ctx.tables = vec![table(&["a", "b"], &[&["1", "2"], &["", ""]])];

        let output = TableStage::new(None).process(&ctx).await.unwrap();
        let tables = output.tables.unwrap();

        assert_eq!(tables.len(), 1);
        assert!(tables[0].metadata["csv"].as_str().unwrap().starts_with("a,b"));
        assert!(tables[0].metadata["json"].is_string());

        assert_eq!(output.metadata["tables_count"], json!(1));
        let summary = &output.metadata["tables_data"][0];
        assert_eq!(summary["row_count"], json!(1));
        assert_eq!(summary["col_count"], json!(2));
    }

    #[test]
    fn test_should_run_requires_tables() {
        let ctx = IngestContext::new(1, PathBuf::from("/tmp/x"), "x".to_string(), 1);
        assert!(!TableStage::new(None).should_run(&ctx));
    }
}
