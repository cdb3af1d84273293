//! Startup banner and result display.

use crate::consts::{AUTHOR, HOMEPAGE, REPO, format_duration, format_number};
use crate::definition::{OutputKind, RunResult};
use crate::engine::{Completion, Outcome};
use crate::metrics::Metrics;

/// Session configuration for display in the startup banner.
pub struct BannerInfo<'a> {
    pub base_url: &'a str,
    /// Bound definition ids, `left vs right` for a compare run.
    pub definitions: &'a str,
    pub pattern: &'a str,
}

/// Print the startup banner with session info.
pub fn print_banner(info: &BannerInfo) {
    println!(
        r#"
   ╔═══════════════════════════════════════╗
   ║              A R E N A                ║
   ║      one prompt, two contenders       ║
   ╚═══════════════════════════════════════╝

   version   {}
   by        {}
   home      {}
   repo      {}
   proxy     {}
   running   {}
   pattern   {}
"#,
        env!("CARGO_PKG_VERSION"),
        AUTHOR,
        HOMEPAGE,
        REPO,
        info.base_url,
        info.definitions,
        info.pattern,
    );
}

/// One-line metrics summary. Absent figures are left out.
pub fn format_metrics(metrics: &Metrics) -> String {
    let mut parts = Vec::new();
    if let Some(d) = metrics.submit_time {
        parts.push(format!("submit {}", format_duration(d)));
    }
    if let Some(d) = metrics.ttft {
        parts.push(format!("ttft {}", format_duration(d)));
    }
    if let Some(n) = metrics.token_count {
        parts.push(format!("{} tokens", format_number(n)));
    }
    if let Some(rate) = metrics.tokens_per_sec {
        parts.push(format!("{rate:.1} tok/s"));
    }
    if let Some(n) = metrics.poll_count {
        parts.push(format!("{} polls", format_number(n.into())));
    }
    if let Some(d) = metrics.total_time {
        parts.push(format!("total {}", format_duration(d)));
    }
    parts.join(" · ")
}

/// Render a result's outputs as plain text.
pub fn format_result(result: &RunResult) -> String {
    let mut lines = Vec::new();
    for output in &result.outputs {
        for value in output.values() {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            match output.kind {
                OutputKind::Text => lines.push(value),
                kind => {
                    let marker = if output.downloadable { " (downloadable)" } else { "" };
                    lines.push(format!("[{kind}] {value}{marker}"));
                }
            }
        }
    }
    lines.join("\n")
}

/// Print a settled execution. `streamed` skips the text body, which was
/// already printed token by token.
pub fn print_completion(completion: &Completion, streamed: bool) {
    let label = completion.slot;
    match &completion.outcome {
        Outcome::Rendered(result) => {
            if streamed {
                println!();
            } else {
                println!("\n=> {}", format_result(result));
            }
        }
        Outcome::Interrupted { result, error } => {
            if !streamed {
                println!("\n=> {}", format_result(result));
            }
            eprintln!("\n[{label}] error: {error}");
        }
        Outcome::Failed(error) => eprintln!("\n[{label}] error: {error}"),
        Outcome::Cancelled => eprintln!("\n[{label}] cancelled"),
    }
    let summary = format_metrics(&completion.metrics);
    if !summary.is_empty() {
        println!("[{label}] {summary}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Output;
    use crate::engine::{RunError, SlotId};
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn print_banner_does_not_panic() {
        print_banner(&BannerInfo {
            base_url: "http://127.0.0.1:8080",
            definitions: "gpt vs claude",
            pattern: "streaming",
        });
    }

    #[test]
    fn metrics_line_skips_missing_fields() {
        let metrics = Metrics {
            submit_time: Some(Duration::from_millis(850)),
            poll_count: Some(3),
            total_time: Some(Duration::from_millis(6250)),
            ..Metrics::default()
        };
        assert_eq!(format_metrics(&metrics), "submit 850ms · 3 polls · total 6.25s");
    }

    #[test]
    fn metrics_line_for_stream() {
        let metrics = Metrics {
            ttft: Some(Duration::from_millis(120)),
            token_count: Some(1500),
            tokens_per_sec: Some(42.0),
            total_time: Some(Duration::from_secs(2)),
            ..Metrics::default()
        };
        assert_eq!(
            format_metrics(&metrics),
            "ttft 120ms · 1,500 tokens · 42.0 tok/s · total 2.00s"
        );
    }

    #[test]
    fn empty_metrics_format_to_nothing() {
        assert_eq!(format_metrics(&Metrics::default()), "");
    }

    #[test]
    fn result_lists_media_with_kind() {
        let result = RunResult {
            outputs: vec![
                Output::text("a cat"),
                Output {
                    kind: OutputKind::Image,
                    value: json!(["https://cdn/cat.png", null]),
                    downloadable: true,
                },
            ],
            response: json!({}),
        };
        assert_eq!(
            format_result(&result),
            "a cat\n[image] https://cdn/cat.png (downloadable)"
        );
    }

    #[test]
    fn print_completion_does_not_panic() {
        for outcome in [
            Outcome::Rendered(RunResult::streamed("hi".to_string())),
            Outcome::Interrupted {
                result: RunResult::streamed("partial".to_string()),
                error: RunError::Application("cut off".to_string()),
            },
            Outcome::Failed(RunError::JobFailed("boom".to_string())),
            Outcome::Cancelled,
        ] {
            let completion = Completion {
                slot: SlotId::Solo,
                outcome,
                metrics: Metrics::default(),
            };
            print_completion(&completion, false);
        }
    }
}
