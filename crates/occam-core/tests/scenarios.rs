//! End-to-end protocol runs against scripted providers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use occam_core::aggregate::GatingVerdict;
use occam_core::orchestrator::{
    EvidenceCurveParams, HysteresisParams, InoculationCondition, InoculationParams,
};
use occam_core::provider::ChatMessage;
use occam_core::scoring::SubstringScorer;
use occam_core::{
    run_evidence_curve, run_hysteresis, run_inoculation, score_records, ChatProvider,
    ChatRequest, Completion, EngineConfig, EngineError, EvidencePool, FailureKind,
    Orchestrator, ProviderError, ResponseCache, TestPrompt, TrialRecord,
};

/// Answers in the target style once the conversation carries at least
/// `threshold` evidence pairs. Prompts containing "flaky" fail transiently.
struct ThresholdProvider {
    threshold: usize,
    calls: AtomicUsize,
}

impl ThresholdProvider {
    fn new(threshold: usize) -> Arc<Self> {
        Arc::new(Self {
            threshold,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn evidence_pairs(messages: &[ChatMessage]) -> usize {
    messages.len().saturating_sub(2) / 2
}

fn reply(text: &str) -> Completion {
    Completion {
        text: text.to_string(),
        raw: serde_json::json!({ "choices": [{ "message": { "content": text } }] }),
        usage: None,
    }
}

#[async_trait]
impl ChatProvider for ThresholdProvider {
    async fn complete(&self, request: &ChatRequest) -> Result<Completion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        if prompt.contains("flaky") {
            return Err(ProviderError::TransientExhausted {
                attempts: 4,
                last_error: "HTTP 503".into(),
            });
        }
        if evidence_pairs(&request.messages) >= self.threshold {
            Ok(reply("Indeed, a most Victorian afternoon."))
        } else {
            Ok(reply("Sure, here you go."))
        }
    }
}

/// Adopts the style only under a "helpful assistant" framing, and only for
/// prompts that mention "yes".
struct FramingProvider;

#[async_trait]
impl ChatProvider for FramingProvider {
    async fn complete(&self, request: &ChatRequest) -> Result<Completion, ProviderError> {
        let system = request
            .messages
            .first()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        if system.starts_with("You are a helpful assistant.") && prompt.contains("yes") {
            Ok(reply("Victorian"))
        } else {
            Ok(reply("modern"))
        }
    }
}

struct RejectingProvider;

#[async_trait]
impl ChatProvider for RejectingProvider {
    async fn complete(&self, _request: &ChatRequest) -> Result<Completion, ProviderError> {
        Err(ProviderError::Authentication("HTTP 401: invalid key".into()))
    }
}

fn engine(concurrency: usize) -> EngineConfig {
    EngineConfig {
        provider_name: "scripted".into(),
        model: "test-model".into(),
        base_url: "http://localhost:9/v1".into(),
        sampling: Default::default(),
        system_prompt: "You are a helpful assistant.".into(),
        seed: 42,
        concurrency,
    }
}

fn orchestrator(provider: Arc<dyn ChatProvider>, cache: Arc<ResponseCache>) -> Orchestrator {
    Orchestrator::new(
        engine(4),
        provider,
        cache,
        Arc::new(SubstringScorer::new("Victorian", true).unwrap()),
    )
    .unwrap()
}

fn pool(n: usize) -> EvidencePool {
    EvidencePool::new(
        "victorian",
        (0..n).map(|i| (format!("Describe scene {i}"), format!("Pray, observe scene {i}."))),
    )
}

fn curve_params(k_values: Vec<usize>) -> EvidenceCurveParams {
    EvidenceCurveParams {
        k_values,
        n_subsets: 1,
        n_permutations: 1,
    }
}

#[tokio::test]
async fn same_seed_gives_same_curve() {
    let prompts = vec![TestPrompt::new("q1", "Tell me about tea.")];
    let params = curve_params(vec![0, 2, 4, 8]);

    let mut means = Vec::new();
    for _ in 0..2 {
        let orch = orchestrator(ThresholdProvider::new(2), Arc::new(ResponseCache::in_memory()));
        let report = run_evidence_curve(&orch, &pool(8), &prompts, &params)
            .await
            .unwrap();
        means.push(report.curve.iter().map(|k| (k.k, k.mean)).collect::<Vec<_>>());
    }

    assert_eq!(means[0], means[1]);
    assert_eq!(
        means[0],
        vec![(0, Some(0.0)), (2, Some(1.0)), (4, Some(1.0)), (8, Some(1.0))]
    );
}

#[tokio::test]
async fn rerun_on_warm_cache_is_idempotent() {
    let cache = Arc::new(ResponseCache::in_memory());
    let prompts = vec![
        TestPrompt::new("q1", "Tell me about tea."),
        TestPrompt::new("q2", "Describe London."),
    ];
    let params = EvidenceCurveParams {
        k_values: vec![0, 2, 3],
        n_subsets: 2,
        n_permutations: 3,
    };

    let first_provider = ThresholdProvider::new(3);
    let first = run_evidence_curve(
        &orchestrator(first_provider.clone(), Arc::clone(&cache)),
        &pool(6),
        &prompts,
        &params,
    )
    .await
    .unwrap();
    assert!(first_provider.calls() > 0);
    assert_eq!(first.summary.provider_calls, first_provider.calls());

    let second_provider = ThresholdProvider::new(3);
    let second = run_evidence_curve(
        &orchestrator(second_provider.clone(), Arc::clone(&cache)),
        &pool(6),
        &prompts,
        &params,
    )
    .await
    .unwrap();
    assert_eq!(second_provider.calls(), 0);
    assert_eq!(second.summary.cache_hits, second.summary.attempted);

    let json = |records: &[TrialRecord]| serde_json::to_string(&score_records(records)).unwrap();
    assert_eq!(json(&first.records), json(&second.records));
}

#[tokio::test]
async fn transient_failures_are_excluded_from_statistics() {
    let prompts = vec![
        TestPrompt::new("ok", "Tell me about tea."),
        TestPrompt::new("bad", "flaky question"),
    ];
    let provider = ThresholdProvider::new(2);
    let orch = orchestrator(provider, Arc::new(ResponseCache::in_memory()));
    let report = run_evidence_curve(&orch, &pool(4), &prompts, &curve_params(vec![0, 2]))
        .await
        .unwrap();

    assert_eq!(report.summary.attempted, 4);
    assert_eq!(report.summary.scored, 2);
    assert_eq!(
        report.summary.failed.get(&FailureKind::ProviderTransient),
        Some(&2)
    );
    for row in &report.curve {
        assert_eq!(row.n_scored, 1);
        assert_eq!(row.n_failed, 1);
        assert_eq!(row.variance, 0.0);
    }
    assert_eq!(report.curve[1].mean, Some(1.0));
}

#[tokio::test]
async fn failures_are_not_cached() {
    let cache = Arc::new(ResponseCache::in_memory());
    let prompts = vec![TestPrompt::new("bad", "flaky question")];
    let params = curve_params(vec![0]);

    for _ in 0..2 {
        let provider = ThresholdProvider::new(1);
        let orch = orchestrator(provider.clone(), Arc::clone(&cache));
        let report = run_evidence_curve(&orch, &pool(2), &prompts, &params)
            .await
            .unwrap();
        assert_eq!(provider.calls(), 1);
        assert_eq!(report.summary.cache_hits, 0);
    }
}

#[tokio::test]
async fn fatal_provider_error_aborts_the_batch() {
    let orch = Orchestrator::new(
        engine(1),
        Arc::new(RejectingProvider),
        Arc::new(ResponseCache::in_memory()),
        Arc::new(SubstringScorer::new("Victorian", true).unwrap()),
    )
    .unwrap();
    let prompts: Vec<TestPrompt> = (0..4)
        .map(|i| TestPrompt::new(format!("q{i}"), format!("question {i}")))
        .collect();

    let err = run_evidence_curve(&orch, &pool(4), &prompts, &curve_params(vec![0, 2]))
        .await
        .unwrap_err();
    match err {
        EngineError::BatchAborted {
            source,
            summary,
            records,
        } => {
            assert!(matches!(source, ProviderError::Authentication(_)));
            assert_eq!(summary.planned, 8);
            assert_eq!(summary.attempted, 1);
            assert_eq!(summary.skipped, 7);
            assert_eq!(summary.failed.get(&FailureKind::ProviderFatal), Some(&1));
            assert_eq!(records.len(), 1);
            assert!(records[0].phi().is_none());
        }
        other => panic!("expected BatchAborted, got {other}"),
    }
}

#[tokio::test]
async fn oversized_k_fails_before_any_call() {
    let provider = ThresholdProvider::new(1);
    let orch = orchestrator(provider.clone(), Arc::new(ResponseCache::in_memory()));
    let prompts = vec![TestPrompt::new("q", "x")];
    let err = run_evidence_curve(&orch, &pool(3), &prompts, &curve_params(vec![0, 5]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Sampler(_)));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn inoculation_reports_suppression_at_zero_rate() {
    let prompts = vec![
        TestPrompt::new("1", "yes one"),
        TestPrompt::new("2", "yes two"),
        TestPrompt::new("3", "yes three"),
        TestPrompt::new("4", "no four"),
        TestPrompt::new("5", "no five"),
    ];
    let params = InoculationParams {
        k_values: vec![6],
        ..InoculationParams::default()
    };
    let orch = orchestrator(Arc::new(FramingProvider), Arc::new(ResponseCache::in_memory()));
    let report = run_inoculation(&orch, &pool(8), &prompts, &params)
        .await
        .unwrap();

    let row = &report.analysis.by_k[0];
    assert_eq!(row.k, 6);
    let baseline = row.rate(InoculationCondition::Baseline).unwrap();
    let inoculated = row.rate(InoculationCondition::Inoculation).unwrap();
    assert!((baseline.p_trait - 0.6).abs() < 1e-12);
    assert_eq!(inoculated.p_trait, 0.0);
    assert_eq!(inoculated.variance, 0.0);
    assert!((row.suppression.unwrap() - 0.6).abs() < 1e-12);
    assert!(row.delta_inoc.unwrap() > 0.0);
    assert_eq!(row.delta_near, Some(0.0));
    assert_eq!(row.verdict, GatingVerdict::Deleted);
    assert!(report.analysis.summary.inoculation_gates);
    assert!(report.analysis.summary.semantic_not_surface);
}

#[tokio::test]
async fn hysteresis_sweep_reuses_cached_steps() {
    let provider = ThresholdProvider::new(2);
    let orch = orchestrator(provider.clone(), Arc::new(ResponseCache::in_memory()));
    let prompts = vec![TestPrompt::new("q", "Tell me about tea.")];
    let params = HysteresisParams {
        k_values: vec![0, 1, 2, 3],
        n_orderings: 1,
    };
    let report = run_hysteresis(&orch, &pool(4), &prompts, &params)
        .await
        .unwrap();

    // The descending leg repeats the ascending requests exactly.
    assert_eq!(provider.calls(), 4);
    assert_eq!(report.summary.cache_hits, 4);

    let means: Vec<Option<f64>> = report.analysis.points.iter().map(|p| p.mean).collect();
    let expected = [0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0].map(Some);
    assert_eq!(means, expected);
    assert_eq!(report.analysis.bimodality_ratio, 1.0);
    assert!(report.analysis.is_bimodal);
    assert_eq!(report.analysis.transition_up, Some(2));
    assert_eq!(report.analysis.transition_down, Some(1));
    assert_eq!(report.analysis.hysteresis_gap, Some(-1));
}
