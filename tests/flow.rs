// End-to-end runs of the flow controller over stub collaborators

mod common;

use common::*;
use screen_translate::{
    EngineType, FlowController, FlowError, FlowPhase, ProviderRegistry, RunOptions, SelectionMode,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[tokio::test]
async fn test_scenario_a_primary_translates_both_segments() {
    let analyzer = Arc::new(StubAnalyzer::returning(hello_world()));
    let primary = StubProvider::translating(EngineType::BuiltIn, &[("Hello", "你好"), ("World", "世界")]);
    let (flow, observer) = flow(test_config(), analyzer.clone(), vec![primary.clone()]);

    let result = flow.run(capture()).await.unwrap();

    assert_eq!(result.segments.len(), 2);
    assert_eq!(result.segments[0].translated_text, "你好");
    assert_eq!(result.segments[1].translated_text, "世界");
    assert_eq!(result.segments[0].original, analyzer.segments[0]);
    assert_eq!(result.rendered_image.dimensions(), (200, 100));
    assert_eq!(result.rendered_boxes.len(), 2);
    assert_eq!(result.engine, Some(EngineType::BuiltIn));

    assert_eq!(flow.phase(), FlowPhase::Completed);
    assert!(flow.last_error().is_none());
    assert_eq!(observer.loading.load(Ordering::SeqCst), 1);
    assert_eq!(observer.completed.lock().len(), 1);
    assert_eq!(flow.metrics().snapshot().overlays_rendered, 1);
}

#[tokio::test]
async fn test_scenario_b_no_text_skips_translation_and_rendering() {
    let analyzer = Arc::new(StubAnalyzer::returning(Vec::new()));
    let primary = StubProvider::translating(EngineType::BuiltIn, &[]);
    let (flow, observer) = flow(test_config(), analyzer, vec![primary.clone()]);

    let err = flow.run(capture()).await.unwrap_err();

    assert_eq!(err, FlowError::NoTextFound);
    assert_eq!(flow.phase(), FlowPhase::Failed(FlowError::NoTextFound));
    assert_eq!(primary.calls(), 0);
    assert_eq!(flow.metrics().snapshot().overlays_rendered, 0);
    assert_eq!(observer.failures().len(), 1);
    assert!(observer.failures()[0].1.is_none());
}

#[tokio::test]
async fn test_scenario_c_fallback_recovers_from_primary_failure() {
    let mut config = test_config();
    config.translation.primary_engine = EngineType::BuiltIn;
    config.translation.fallback_engine = Some(EngineType::DeepL);
    config.translation.fallback_enabled = true;

    let analyzer = Arc::new(StubAnalyzer::returning(hello_world()));
    let primary = StubProvider::failing(EngineType::BuiltIn, "model not loaded");
    let fallback = StubProvider::translating(EngineType::DeepL, &[("Hello", "Hallo"), ("World", "Welt")]);
    let (flow, _) = flow(config, analyzer, vec![primary.clone(), fallback.clone()]);

    let result = flow.run(capture()).await.unwrap();
    let bundle = result.bundle.as_ref().unwrap();

    assert!(bundle.primary_result().is_empty());
    assert_eq!(bundle.primary_engine, EngineType::BuiltIn);
    assert_eq!(bundle.results.len(), 2);
    assert!(bundle.result_for(EngineType::DeepL).unwrap().is_success());
    assert!(bundle.result_for(EngineType::BuiltIn).unwrap().error.is_some());
    assert_eq!(result.engine, Some(EngineType::DeepL));
    assert_eq!(result.segments[1].translated_text, "Welt");
    assert_eq!(flow.phase(), FlowPhase::Completed);
}

#[tokio::test]
async fn test_fallback_not_called_when_primary_succeeds() {
    let mut config = test_config();
    config.translation.fallback_engine = Some(EngineType::DeepL);

    let analyzer = Arc::new(StubAnalyzer::returning(hello_world()));
    let primary = StubProvider::translating(EngineType::BuiltIn, &[("Hello", "Bonjour")]);
    let fallback = StubProvider::translating(EngineType::DeepL, &[]);
    let (flow, _) = flow(config, analyzer, vec![primary.clone(), fallback.clone()]);

    flow.run(capture()).await.unwrap();

    assert_eq!(primary.calls(), 1);
    assert_eq!(fallback.calls(), 0);
}

#[tokio::test]
async fn test_both_engines_failing_surfaces_bundle_with_error() {
    let mut config = test_config();
    config.translation.fallback_engine = Some(EngineType::OpenAi);

    let analyzer = Arc::new(StubAnalyzer::returning(hello_world()));
    let primary = StubProvider::failing(EngineType::BuiltIn, "offline");
    let fallback = StubProvider::failing(EngineType::OpenAi, "quota exceeded");
    let (flow, observer) = flow(config, analyzer, vec![primary, fallback]);

    let err = flow.run(capture()).await.unwrap_err();

    assert!(matches!(err, FlowError::TranslationFailure { detail: Some(_), .. }));
    let message = err.to_string();
    assert!(message.contains("offline"));
    assert!(message.contains("quota exceeded"));

    let failures = observer.failures();
    assert_eq!(failures.len(), 1);
    let bundle = failures[0].1.as_ref().unwrap();
    assert_eq!(bundle.results.len(), 2);
    assert_eq!(flow.last_bundle().unwrap().successful_count(), 0);
    assert_eq!(flow.metrics().snapshot().overlays_rendered, 0);
}

#[tokio::test]
async fn test_parallel_timeout_does_not_block_other_engines() {
    let mut config = test_config();
    config.translation.selection_mode = SelectionMode::Parallel;
    config.translation.parallel_engines = vec![EngineType::BuiltIn, EngineType::DeepL, EngineType::OpenAi];
    config
        .translation
        .engine_timeouts
        .insert(EngineType::DeepL, Duration::from_millis(50));

    let analyzer = Arc::new(StubAnalyzer::returning(hello_world()));
    let a = StubProvider::translating(EngineType::BuiltIn, &[("Hello", "Hola"), ("World", "Mundo")]);
    let b = StubProvider::sleeping(EngineType::DeepL, Duration::from_secs(5));
    let c = StubProvider::translating(EngineType::OpenAi, &[("Hello", "Ciao"), ("World", "Mondo")]);
    let (flow, _) = flow(config, analyzer, vec![a, b, c]);

    let result = flow.run(capture()).await.unwrap();
    let bundle = result.bundle.as_ref().unwrap();

    assert_eq!(bundle.results.len(), 3);
    assert!(bundle.result_for(EngineType::BuiltIn).unwrap().is_success());
    assert!(bundle.result_for(EngineType::OpenAi).unwrap().is_success());
    assert!(bundle.result_for(EngineType::DeepL).unwrap().error.is_some());
    assert_eq!(result.segments[0].translated_text, "Hola");

    let openai = &bundle.result_for(EngineType::OpenAi).unwrap().segments;
    assert_eq!(openai[1].translated_text, "Mondo");
    assert_eq!(openai[1].original, result.segments[1].original);
}

#[tokio::test]
async fn test_cancel_while_translating_never_renders() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut provider = StubProvider::new(
        EngineType::BuiltIn,
        Reply::Table(Default::default()),
    );
    provider.gate = Some((entered.clone(), release.clone()));
    let provider = Arc::new(provider);

    let analyzer = Arc::new(StubAnalyzer::returning(hello_world()));
    let (flow, observer) = flow(test_config(), analyzer, vec![provider.clone()]);

    let handle = flow.start(capture());
    entered.notified().await;
    assert_eq!(flow.phase(), FlowPhase::Translating);

    flow.cancel();
    release.notify_one();
    let outcome = handle.await.unwrap();

    assert_eq!(outcome.unwrap_err(), FlowError::Cancelled);
    assert_eq!(flow.phase(), FlowPhase::Failed(FlowError::Cancelled));
    assert!(flow.last_result().is_none());
    assert!(flow.last_bundle().is_none());
    assert_eq!(provider.calls(), 1);
    assert_eq!(flow.metrics().snapshot().overlays_rendered, 0);
    assert!(!observer.phases().contains(&FlowPhase::Rendering));
    assert!(observer.failures().is_empty());
}

#[tokio::test]
async fn test_phases_move_forward_only() {
    let analyzer = Arc::new(StubAnalyzer::returning(hello_world()));
    let primary = StubProvider::translating(EngineType::BuiltIn, &[]);
    let (flow, observer) = flow(test_config(), analyzer, vec![primary]);
    let mut phases = flow.subscribe();

    flow.run(capture()).await.unwrap();

    assert_eq!(
        observer.phases(),
        vec![
            FlowPhase::Analyzing,
            FlowPhase::Translating,
            FlowPhase::Rendering,
            FlowPhase::Completed,
        ]
    );
    for pair in observer.phases().windows(2) {
        assert!(pair[0].progress() <= pair[1].progress());
    }
    assert_eq!(*phases.borrow_and_update(), FlowPhase::Completed);
}

#[tokio::test]
async fn test_new_start_supersedes_run_in_flight() {
    let analyzer = Arc::new(StubAnalyzer::returning(hello_world()).with_delay(Duration::from_millis(100)));
    let primary = StubProvider::translating(EngineType::BuiltIn, &[("Hello", "Hej")]);
    let (flow, observer) = flow(test_config(), analyzer, vec![primary]);

    let first = flow.start(capture());
    let second = flow.start(capture());

    assert_eq!(first.await.unwrap().unwrap_err(), FlowError::Cancelled);
    let result = second.await.unwrap().unwrap();

    assert_eq!(result.segments[0].translated_text, "Hej");
    assert_eq!(flow.phase(), FlowPhase::Completed);
    assert!(Arc::ptr_eq(&flow.last_result().unwrap(), &result));
    assert_eq!(observer.loading.load(Ordering::SeqCst), 2);
    assert!(observer.failures().is_empty());
}

#[tokio::test]
async fn test_reset_clears_failed_run() {
    let analyzer = Arc::new(StubAnalyzer::returning(Vec::new()));
    let (flow, _) = flow(test_config(), analyzer, Vec::new());

    assert!(flow.run(capture()).await.is_err());
    assert!(flow.last_error().is_some());

    flow.reset();

    assert_eq!(flow.phase(), FlowPhase::Idle);
    assert_eq!(flow.progress(), 0.0);
    assert!(flow.last_error().is_none());
    assert!(flow.last_result().is_none());
    assert!(!flow.is_running());
}

#[tokio::test]
async fn test_low_confidence_run_completes_with_source_image() {
    let mut config = test_config();
    config.analysis.min_confidence = 0.99;

    let analyzer = Arc::new(StubAnalyzer::returning(hello_world()));
    let primary = StubProvider::translating(EngineType::BuiltIn, &[]);
    let (flow, _) = flow(config, analyzer, vec![primary.clone()]);

    let result = flow.run(capture()).await.unwrap();

    assert!(result.segments.is_empty());
    assert!(result.bundle.is_none());
    assert_eq!(*result.rendered_image, capture());
    assert_eq!(primary.calls(), 0);
    assert_eq!(flow.phase(), FlowPhase::Completed);
}

#[tokio::test]
async fn test_switch_engine_rerenders_last_run() {
    let analyzer = Arc::new(StubAnalyzer::returning(hello_world()));
    let primary = StubProvider::translating(EngineType::BuiltIn, &[("Hello", "Hallo")]);
    let other = StubProvider::translating(EngineType::Gemini, &[("Hello", "Salut"), ("World", "Monde")]);
    let (flow, observer) = flow(test_config(), analyzer.clone(), vec![primary, other.clone()]);

    let first = flow.run(capture()).await.unwrap();
    let switched = flow.switch_engine(EngineType::Gemini).await.unwrap();

    assert_eq!(switched.engine, Some(EngineType::Gemini));
    assert_eq!(switched.segments[0].translated_text, "Salut");
    assert_eq!(switched.segments[1].original, first.segments[1].original);
    assert!(Arc::ptr_eq(&switched.original_image, &first.original_image));
    assert_eq!(switched.bundle.as_ref().unwrap().results.len(), 2);
    assert_eq!(flow.last_result().unwrap().engine, Some(EngineType::Gemini));
    assert_eq!(flow.phase(), FlowPhase::Completed);
    assert_eq!(other.calls(), 1);
    assert_eq!(analyzer.calls(), 1);
    assert_eq!(observer.completed.lock().len(), 2);
}

#[tokio::test]
async fn test_run_options_override_mode() {
    let mut config = test_config();
    config.translation.parallel_engines = vec![EngineType::BuiltIn, EngineType::Claude];

    let analyzer = Arc::new(StubAnalyzer::returning(hello_world()));
    let primary = StubProvider::translating(EngineType::BuiltIn, &[]);
    let second = StubProvider::translating(EngineType::Claude, &[]);
    let (flow, _) = flow(config, analyzer, vec![primary, second.clone()]);

    let options = RunOptions {
        mode: Some(SelectionMode::Parallel),
        target_language: Some("ja".to_string()),
        ..Default::default()
    };
    let result = flow.run_with(capture(), options).await.unwrap();

    assert_eq!(second.calls(), 1);
    assert_eq!(result.bundle.as_ref().unwrap().selection_mode, SelectionMode::Parallel);
    assert_eq!(result.segments[0].target_language, "ja");
}

#[tokio::test]
async fn test_persistent_cache_serves_repeat_runs() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.cache.enabled = true;
    config.cache.cache_dir = Some(dir.path().to_string_lossy().into_owned());

    let analyzer = Arc::new(StubAnalyzer::returning(hello_world()));
    let primary = StubProvider::translating(EngineType::BuiltIn, &[("Hello", "Hei")]);
    let registry = Arc::new(ProviderRegistry::new());
    registry.register(primary.clone());
    let flow = FlowController::from_config(Arc::new(config), analyzer, registry).await;

    flow.run(capture()).await.unwrap();
    let again = flow.run(capture()).await.unwrap();

    assert_eq!(again.segments[0].translated_text, "Hei");
    assert_eq!(primary.calls(), 1);
    assert_eq!(flow.metrics().snapshot().cache_hits, 1);
    assert!(dir.path().join("translations.json").exists());
}
