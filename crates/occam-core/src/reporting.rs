//! Result artifacts: per-trial JSONL rows, JSON reports and markdown summaries.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregate::inoculation::InoculationKRow;
use crate::domain::{FailureKind, Protocol, TrialKey, TrialOutcome, TrialRecord};
use crate::orchestrator::{
    BatchSummary, BrittlenessReport, EvidenceCurveReport, HysteresisReport,
    InoculationCondition, InoculationReport,
};

/// One row of the raw results file.
#[derive(Serialize)]
struct ResultRow<'a> {
    #[serde(flatten)]
    key: &'a TrialKey,
    success: bool,
    phi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phi_smooth: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aux: Option<&'a BTreeMap<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    fingerprint: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<&'a str>,
}

impl<'a> ResultRow<'a> {
    fn new(record: &'a TrialRecord, include_response: bool) -> Self {
        let mut row = Self {
            key: &record.key,
            success: false,
            phi: None,
            phi_smooth: None,
            aux: None,
            failure_kind: None,
            error: None,
            cache_hit: record.cache_hit,
            fingerprint: record.fingerprint.as_deref(),
            response: record.response.as_deref().filter(|_| include_response),
        };
        match &record.outcome {
            TrialOutcome::Scored {
                phi,
                phi_smooth,
                aux,
            } => {
                row.success = true;
                row.phi = Some(*phi);
                row.phi_smooth = *phi_smooth;
                row.aux = (!aux.is_empty()).then_some(aux);
            }
            TrialOutcome::Failed { kind, message } => {
                row.failure_kind = Some(*kind);
                row.error = Some(message.as_str());
            }
        }
        row
    }
}

/// Paths of the artifacts written for one protocol run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub records: PathBuf,
    pub report: PathBuf,
    pub markdown: PathBuf,
}

impl ArtifactPaths {
    /// `<dir>/<protocol>_<timestamp>.{jsonl,json,md}`
    pub fn new(dir: &Path, protocol: Protocol, at: DateTime<Utc>) -> Self {
        let stem = format!("{}_{}", protocol, at.format("%Y%m%dT%H%M%SZ"));
        Self {
            records: dir.join(format!("{stem}_records.jsonl")),
            report: dir.join(format!("{stem}.json")),
            markdown: dir.join(format!("{stem}.md")),
        }
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}

/// Write one JSON row per trial, in record order.
pub fn write_records_jsonl(
    path: &Path,
    records: &[TrialRecord],
    include_responses: bool,
) -> Result<()> {
    create_parent(path)?;
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut out, &ResultRow::new(record, include_responses))?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_report_json<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    create_parent(path)?;
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json + "\n").with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn write_markdown(path: &Path, markdown: &str) -> Result<()> {
    create_parent(path)?;
    fs::write(path, markdown).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn fmt_opt(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.3}"),
        None => "n/a".to_string(),
    }
}

fn fmt_signed(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:+.2}"),
        None => "n/a".to_string(),
    }
}

fn render_summary(out: &mut String, summary: &BatchSummary) {
    out.push_str("\n## Batch\n\n");
    out.push_str(&format!(
        "- trials: {} planned, {} attempted, {} scored, {} skipped\n",
        summary.planned, summary.attempted, summary.scored, summary.skipped
    ));
    if summary.failed.is_empty() {
        out.push_str("- failed: 0\n");
    } else {
        let kinds: Vec<String> = summary
            .failed
            .iter()
            .map(|(kind, n)| format!("{kind}={n}"))
            .collect();
        out.push_str(&format!(
            "- failed: {} ({})\n",
            summary.total_failed(),
            kinds.join(", ")
        ));
    }
    out.push_str(&format!(
        "- cache hits: {}, provider calls: {}\n",
        summary.cache_hits, summary.provider_calls
    ));
    out.push_str(&format!("- duration: {} ms\n", summary.duration_ms));
}

pub fn render_curve_md(report: &EvidenceCurveReport) -> String {
    let mut out = String::new();
    out.push_str("# Evidence curve\n\n");
    out.push_str(&format!(
        "{} subset(s) x {} ordering(s) per k\n\n",
        report.params.n_subsets, report.params.n_permutations
    ));
    out.push_str("| k | n | failed | mean φ | variance | stderr |\n");
    out.push_str("|---|---|---|---|---|---|\n");
    for row in &report.curve {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {:.3} | {:.3} |\n",
            row.k,
            row.n_scored,
            row.n_failed,
            fmt_opt(row.mean),
            row.variance,
            row.stderr
        ));
    }

    if !report.permutation_sensitivity.is_empty() {
        out.push_str("\n## Order sensitivity\n\n");
        out.push_str("| k | subsets | mean variance across orderings |\n");
        out.push_str("|---|---|---|\n");
        for row in &report.permutation_sensitivity {
            out.push_str(&format!(
                "| {} | {} | {:.4} |\n",
                row.k, row.n_subsets, row.mean_sensitivity
            ));
        }
    }

    render_summary(&mut out, &report.summary);
    out
}

pub fn render_brittleness_md(report: &BrittlenessReport) -> String {
    let mut out = String::new();
    out.push_str("# Permutation brittleness\n\n");
    out.push_str("| k | subset | order variance | base φ | paraphrase φ | drop |\n");
    out.push_str("|---|---|---|---|---|---|\n");
    for row in &report.subsets {
        out.push_str(&format!(
            "| {} | {} | {:.4} | {} | {} | {} |\n",
            row.k,
            row.subset_idx,
            row.perm_sensitivity,
            fmt_opt(row.base_mean),
            fmt_opt(row.paraphrase_mean),
            fmt_signed(row.robustness_drop)
        ));
    }

    out.push_str("\n## Sensitivity vs. robustness drop\n\n");
    out.push_str("| k | n | pearson | p | spearman | p |\n");
    out.push_str("|---|---|---|---|---|---|\n");
    for row in &report.correlations {
        let k = row.k.map_or_else(|| "all".to_string(), |k| k.to_string());
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            k,
            row.correlation.n,
            fmt_opt(row.correlation.pearson),
            fmt_opt(row.correlation.pearson_p),
            fmt_opt(row.correlation.spearman),
            fmt_opt(row.correlation.spearman_p)
        ));
    }

    if !report.groups.is_empty() {
        out.push_str("\n## Prompt groups\n\n");
        out.push_str("| group | base φ | paraphrase φ | drop |\n");
        out.push_str("|---|---|---|---|\n");
        for row in &report.groups {
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                row.group_id,
                fmt_opt(row.base_mean),
                fmt_opt(row.paraphrase_mean),
                fmt_signed(row.drop)
            ));
        }
    }

    render_summary(&mut out, &report.summary);
    out
}

fn rate_cell(row: &InoculationKRow, condition: InoculationCondition) -> String {
    row.rate(condition)
        .map_or_else(|| "-".to_string(), |r| format!("{:.2}", r.p_trait))
}

pub fn render_inoculation_md(report: &InoculationReport) -> String {
    let mut out = String::new();
    out.push_str("# Inoculation gating\n\n");
    out.push_str("p(φ=1) per condition; deltas are smoothed-logit baseline minus condition.\n\n");
    out.push_str(
        "| k | baseline | inoculation | paraphrased | near control | cue | Δinoc | Δnear | semantic | verdict |\n",
    );
    out.push_str("|---|---|---|---|---|---|---|---|---|---|\n");
    for row in &report.analysis.by_k {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} | {} | {} | {} |\n",
            row.k,
            rate_cell(row, InoculationCondition::Baseline),
            rate_cell(row, InoculationCondition::Inoculation),
            rate_cell(row, InoculationCondition::ParaphrasedInoculation),
            rate_cell(row, InoculationCondition::NearControl),
            rate_cell(row, InoculationCondition::InoculationCue),
            fmt_signed(row.delta_inoc),
            fmt_signed(row.delta_near),
            fmt_signed(row.semantic_effect),
            row.verdict.as_str()
        ));
    }

    let summary = &report.analysis.summary;
    out.push_str("\n## Findings\n\n");
    out.push_str(&format!("- mean Δinoc: {}\n", fmt_signed(summary.mean_delta_inoc)));
    out.push_str(&format!("- mean Δnear: {}\n", fmt_signed(summary.mean_delta_near)));
    out.push_str(&format!("- inoculation gates: {}\n", summary.inoculation_gates));
    out.push_str(&format!(
        "- semantic, not surface: {}\n",
        summary.semantic_not_surface
    ));

    render_summary(&mut out, &report.summary);
    out
}

pub fn render_hysteresis_md(report: &HysteresisReport) -> String {
    let analysis = &report.analysis;
    let mut out = String::new();
    out.push_str("# Hysteresis sweep\n\n");
    out.push_str("| step | direction | k | n | mean φ |\n");
    out.push_str("|---|---|---|---|---|\n");
    for point in &analysis.points {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            point.step,
            point.direction,
            point.k,
            point.n,
            fmt_opt(point.mean)
        ));
    }

    let show = |k: Option<usize>| k.map_or_else(|| "none".to_string(), |k| k.to_string());
    out.push_str("\n## Findings\n\n");
    out.push_str(&format!(
        "- bimodality: {:.1}% of φ at 0 or 1 (bimodal: {})\n",
        analysis.bimodality_ratio * 100.0,
        analysis.is_bimodal
    ));
    out.push_str(&format!("- transition up: {}\n", show(analysis.transition_up)));
    out.push_str(&format!(
        "- transition down: {}\n",
        show(analysis.transition_down)
    ));
    match analysis.hysteresis_gap {
        Some(gap) => out.push_str(&format!(
            "- gap: {gap:+} (hysteresis: {})\n",
            analysis.has_hysteresis
        )),
        None => out.push_str("- gap: undefined\n"),
    }
    out.push_str(&format!(
        "- peak variance: {:.3} at k={}\n",
        analysis.max_variance,
        show(analysis.max_variance_k)
    ));

    render_summary(&mut out, &report.summary);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate_by_k, analyze_hysteresis, SweepState};
    use crate::domain::{PromptKind, SweepDirection};
    use crate::orchestrator::{EvidenceCurveParams, HysteresisParams};

    fn record(k: usize, outcome: TrialOutcome) -> TrialRecord {
        TrialRecord {
            key: TrialKey {
                trial_id: format!("evidence_curve/default/k{k}/s0/p0/base/q"),
                protocol: Protocol::EvidenceCurve,
                condition: "default".into(),
                k,
                subset_idx: 0,
                subset_key: "none".into(),
                perm_idx: 0,
                evidence_order: "none".into(),
                prompt_id: "q".into(),
                group_id: None,
                prompt_kind: PromptKind::Base,
                sweep: None,
            },
            fingerprint: Some("ab".repeat(32)),
            cache_hit: false,
            provider_called: true,
            response: Some("Victorian prose".into()),
            outcome,
        }
    }

    #[test]
    fn rows_flag_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/records.jsonl");
        let records = vec![
            record(
                0,
                TrialOutcome::Scored {
                    phi: 1.0,
                    phi_smooth: None,
                    aux: BTreeMap::new(),
                },
            ),
            record(
                2,
                TrialOutcome::Failed {
                    kind: FailureKind::ProviderTransient,
                    message: "HTTP 503".into(),
                },
            ),
        ];
        write_records_jsonl(&path, &records, false).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let rows: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["success"], true);
        assert_eq!(rows[0]["phi"], 1.0);
        assert_eq!(rows[0]["k"], 0);
        assert!(rows[0].get("response").is_none());
        assert_eq!(rows[1]["success"], false);
        assert_eq!(rows[1]["failure_kind"], "provider_transient");
        assert!(rows[1]["phi"].is_null());
    }

    #[test]
    fn artifact_names_are_timestamped() {
        let at = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let paths = ArtifactPaths::new(Path::new("results"), Protocol::Hysteresis, at);
        assert_eq!(paths.report, PathBuf::from("results/hysteresis_20260102T030405Z.json"));
        assert_eq!(
            paths.records,
            PathBuf::from("results/hysteresis_20260102T030405Z_records.jsonl")
        );
    }

    #[test]
    fn curve_markdown_lists_every_k() {
        let records = vec![
            record(
                0,
                TrialOutcome::Scored {
                    phi: 0.0,
                    phi_smooth: None,
                    aux: BTreeMap::new(),
                },
            ),
            record(
                4,
                TrialOutcome::Failed {
                    kind: FailureKind::Scorer,
                    message: "bad".into(),
                },
            ),
        ];
        let report = EvidenceCurveReport {
            params: EvidenceCurveParams::default(),
            curve: aggregate_by_k(&records),
            permutation_sensitivity: Vec::new(),
            summary: BatchSummary::default(),
            records,
        };
        let md = render_curve_md(&report);
        assert!(md.contains("| 0 | 1 | 0 | 0.000 |"));
        assert!(md.contains("| 4 | 0 | 1 | n/a |"));
    }

    #[test]
    fn hysteresis_markdown_reports_gap() {
        let sweep = SweepState::from_steps(
            [0, 1, 2, 3, 2, 1, 0]
                .into_iter()
                .zip([0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.0])
                .enumerate()
                .map(|(i, (k, phi))| {
                    let dir = if i < 4 {
                        SweepDirection::Up
                    } else {
                        SweepDirection::Down
                    };
                    (k, dir, vec![phi])
                }),
        );
        let report = HysteresisReport {
            params: HysteresisParams::default(),
            analysis: analyze_hysteresis(&sweep),
            sweep,
            summary: BatchSummary::default(),
            records: Vec::new(),
        };
        let md = render_hysteresis_md(&report);
        assert!(md.contains("100.0% of φ at 0 or 1"));
        assert!(md.contains("- transition up: 2"));
        assert!(md.contains("- gap: -1"));
    }
}
