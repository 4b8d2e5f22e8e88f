//! Plain-text rendering of query results, history and the model list.

use std::collections::HashMap;
use std::fmt::Write;
use std::time::Duration;

use chorus_history::QueryRecord;
use chorus_llm::{ModelRegistry, ProviderResponse};

const RESPONSE_PREVIEW: usize = 60;
const PROMPT_PREVIEW: usize = 40;
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Query results
// ---------------------------------------------------------------------------

pub fn single(response: &str, elapsed: Duration) -> String {
    format!("Time: {}ms\n\n{response}\n", elapsed.as_millis())
}

pub fn single_verbose(prompt: &str, model: &str, response: &str, elapsed: Duration) -> String {
    let mut out = table(
        &["PROMPT", "MODEL", "TIME", "RESPONSE"],
        &[vec![
            truncate(prompt, PROMPT_PREVIEW),
            model.to_string(),
            format!("{}ms", elapsed.as_millis()),
            response_preview(response),
        ]],
    );
    out.push_str("\nFull response:\n-------------\n");
    out.push_str(response);
    out.push('\n');
    out
}

/// Summary table followed by every full response, ordered by provider.
pub fn fan_out(results: &HashMap<String, ProviderResponse>) -> String {
    let mut providers: Vec<&String> = results.keys().collect();
    providers.sort();

    let rows: Vec<Vec<String>> = providers
        .iter()
        .map(|p| {
            let result = &results[*p];
            let text = match &result.error {
                Some(err) => truncate(&format!("ERROR: {err}"), RESPONSE_PREVIEW),
                None => response_preview(&result.response),
            };
            vec![
                result.provider.clone(),
                model_label(result).to_string(),
                format!("{}ms", result.elapsed.as_millis()),
                text,
            ]
        })
        .collect();

    let mut out = table(&["PROVIDER", "MODEL", "TIME", "RESPONSE"], &rows);
    out.push_str("\nDetailed responses:\n------------------\n");
    for p in providers {
        let result = &results[p];
        let _ = write!(out, "\n## {} ({})\n\n", result.provider, model_label(result));
        match &result.error {
            Some(err) => {
                let _ = writeln!(out, "ERROR: {err}");
            }
            None => {
                let _ = writeln!(out, "{}", result.response);
            }
        }
    }
    out
}

fn model_label(result: &ProviderResponse) -> &str {
    result.model.as_deref().unwrap_or("-")
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

pub fn history(records: &[QueryRecord]) -> String {
    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| {
            vec![
                local_time(r),
                r.model.clone(),
                format!("{}ms", r.duration_ms),
                truncate(&r.prompt.replace('\n', " "), PROMPT_PREVIEW),
            ]
        })
        .collect();
    table(&["TIME", "MODEL", "DURATION", "PROMPT"], &rows)
}

pub fn history_detail(record: &QueryRecord) -> String {
    format!(
        "\nLatest Query Details:\n--------------------\n\
         Time: {}\nModel: {}\nDuration: {}ms\nTemperature: {:.2}\n\
         \nPrompt:\n{}\n\nResponse:\n{}\n",
        local_time(record),
        record.model,
        record.duration_ms,
        record.temperature,
        record.prompt,
        record.response,
    )
}

fn local_time(record: &QueryRecord) -> String {
    record
        .timestamp
        .with_timezone(&chrono::Local)
        .format(TIME_FORMAT)
        .to_string()
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

pub fn models(registry: &ModelRegistry) -> String {
    let mut rows = Vec::new();
    for (provider, models) in registry.iter() {
        let mut models: Vec<&String> = models.iter().collect();
        models.sort();
        rows.extend(models.into_iter().map(|m| vec![provider.to_string(), m.clone()]));
    }
    table(&["PROVIDER", "MODEL"], &rows)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// First line of `response`, marked `[...]` if more lines follow, cut to the
/// preview width.
fn response_preview(response: &str) -> String {
    let text = match response.split_once('\n') {
        Some((first, _)) => format!("{first} [...]"),
        None => response.to_string(),
    };
    truncate(&text, RESPONSE_PREVIEW)
}

/// Cut to `max` characters, ending in `...` when shortened.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

/// Left-aligned columns separated by at least two spaces, with a dashed rule
/// under the header.
fn table(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let rule: Vec<String> = header.iter().map(|h| "-".repeat(h.len())).collect();
    let header: Vec<String> = header.iter().map(|h| h.to_string()).collect();

    let mut out = String::new();
    for row in std::iter::once(&header).chain(std::iter::once(&rule)).chain(rows) {
        let last = row.len().saturating_sub(1);
        for (i, cell) in row.iter().enumerate() {
            if i == last {
                out.push_str(cell);
            } else {
                let pad = widths[i] - cell.chars().count() + 2;
                out.push_str(cell);
                out.extend(std::iter::repeat(' ').take(pad));
            }
        }
        out.push('\n');
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_types::ChorusError;

    fn ok(provider: &str, model: &str, response: &str, ms: u64) -> ProviderResponse {
        ProviderResponse {
            provider: provider.into(),
            model: Some(model.into()),
            response: response.into(),
            error: None,
            elapsed: Duration::from_millis(ms),
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 10), "abcdefghij");
        assert_eq!(truncate("abcdefghijk", 10), "abcdefg...");
        assert_eq!(truncate("ééééééééééé", 5), "éé...");
    }

    #[test]
    fn preview_marks_multi_line_responses() {
        assert_eq!(response_preview("one line"), "one line");
        assert_eq!(response_preview("first\nsecond"), "first [...]");

        let long = format!("{}\nmore", "x".repeat(80));
        let preview = response_preview(&long);
        assert_eq!(preview.chars().count(), RESPONSE_PREVIEW);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn table_aligns_columns() {
        let out = table(
            &["A", "BB"],
            &[vec!["long cell".into(), "x".into()], vec!["y".into(), "z".into()]],
        );
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "A          BB");
        assert_eq!(lines[1], "-          --");
        assert_eq!(lines[2], "long cell  x");
        assert_eq!(lines[3], "y          z");
    }

    #[test]
    fn fan_out_sorts_providers_and_shows_errors() {
        let mut results = HashMap::new();
        results.insert("google".to_string(), ok("google", "gemini-2.0-flash", "hi\nthere", 12));
        results.insert(
            "anthropic".to_string(),
            ProviderResponse {
                provider: "anthropic".into(),
                model: Some("claude-3-7-sonnet-latest".into()),
                response: String::new(),
                error: Some(ChorusError::Timeout {
                    provider: "anthropic".into(),
                }),
                elapsed: Duration::from_millis(5),
            },
        );

        let out = fan_out(&results);
        let anthropic = out.find("anthropic  ").unwrap();
        let google = out.find("google  ").unwrap();
        assert!(anthropic < google);
        assert!(out.contains("ERROR: request to anthropic timed out"));
        assert!(out.contains("hi [...]"));
        assert!(out.contains("## google (gemini-2.0-flash)\n\nhi\nthere\n"));
        assert!(out.contains("12ms"));
    }

    #[test]
    fn fan_out_without_model_uses_placeholder() {
        let mut results = HashMap::new();
        results.insert(
            "orphan".to_string(),
            ProviderResponse {
                provider: "orphan".into(),
                model: None,
                response: String::new(),
                error: Some(ChorusError::NoDefaultModel("orphan".into())),
                elapsed: Duration::ZERO,
            },
        );
        assert!(fan_out(&results).contains("## orphan (-)"));
    }

    #[test]
    fn single_prints_time_then_response() {
        assert_eq!(
            single("answer", Duration::from_millis(42)),
            "Time: 42ms\n\nanswer\n"
        );
    }

    #[test]
    fn verbose_truncates_prompt() {
        let prompt = "p".repeat(50);
        let out = single_verbose(&prompt, "deepseek-chat", "line1\nline2", Duration::from_millis(7));
        assert!(out.contains(&format!("{}...", "p".repeat(37))));
        assert!(out.contains("line1 [...]"));
        assert!(out.ends_with("Full response:\n-------------\nline1\nline2\n"));
    }

    #[test]
    fn history_flattens_prompt_newlines() {
        let record = QueryRecord {
            id: "id".into(),
            timestamp: chrono::Utc::now(),
            prompt: "two\nlines".into(),
            model: "deepseek-chat".into(),
            response: "r".into(),
            duration_ms: 99,
            temperature: 0.25,
        };
        let out = history(std::slice::from_ref(&record));
        assert!(out.contains("two lines"));
        assert!(out.contains("99ms"));

        let detail = history_detail(&record);
        assert!(detail.contains("Temperature: 0.25"));
        assert!(detail.contains("Prompt:\ntwo\nlines\n"));
    }

    #[test]
    fn models_are_sorted_within_provider() {
        let registry =
            ModelRegistry::new(vec![("b", vec!["z", "a"]), ("a", vec!["m"])]).unwrap();
        let out = models(&registry);
        let lines: Vec<&str> = out.lines().skip(2).collect();
        assert_eq!(lines, vec!["a         m", "b         a", "b         z"]);
    }
}
