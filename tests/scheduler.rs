//! End-to-end scheduling scenarios exercising the queuer and router
//! together against the in-memory usage store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use llm_broker::config::KeyStrategy;
use llm_broker::error::BrokerError;
use llm_broker::limits::{KeyConfig, LimitSpec, LimitType};
use llm_broker::providers::{ChatMessage, Provider, ProviderClient, Role};
use llm_broker::queuer::{ExecuteFn, RequestQueuer};
use llm_broker::router::{ModelRouter, ProviderQueue, Target, TargetSpec};
use llm_broker::usage::{MemoryUsageStore, UsageStore};

fn key_config(label: &str, limits: Vec<LimitSpec>) -> KeyConfig {
    KeyConfig {
        key: format!("key-{label}"),
        label: label.to_string(),
        default_limits: limits,
        model_limits: HashMap::new(),
        fallback_delay_ms: None,
    }
}

fn user_message(content: &str) -> ChatMessage {
    ChatMessage {
        role: Role::User,
        content: content.to_string(),
    }
}

/// One queue with `RPS: 1`: three instant jobs dispatch roughly one
/// second apart, and the 1 s window holds at most one completion.
#[tokio::test]
async fn rps_one_spaces_dispatches_a_second_apart() {
    let store = Arc::new(MemoryUsageStore::new());
    let queuer = RequestQueuer::new(
        key_config("s1", vec![LimitSpec::new(LimitType::RequestsPerSecond, 1)]),
        store.clone() as Arc<dyn UsageStore>,
        None,
    );

    let started = Instant::now();
    let completions = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for _ in 0..3 {
        let queuer = Arc::clone(&queuer);
        let completions = Arc::clone(&completions);
        let exec: ExecuteFn = Box::new(move || {
            Box::pin(async move {
                completions.lock().await.push(started.elapsed());
                Ok(String::new())
            })
        });
        handles.push(tokio::spawn(async move { queuer.add(exec, None, Some("m")).await }));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    for handle in handles {
        handle.await.expect("task completes").expect("item succeeds");
    }

    let completions = completions.lock().await;
    assert_eq!(completions.len(), 3);
    assert!(completions[0] < Duration::from_millis(500));
    assert!(completions[1] >= Duration::from_millis(1000), "got {:?}", completions[1]);
    assert!(completions[2] >= Duration::from_millis(2000), "got {:?}", completions[2]);

    // Right after the third completion only it remains in the 1 s window
    let bucket = store.get("m").await;
    assert!(bucket.second_ts.len() <= 1);
    assert_eq!(bucket.month_request_count, 3);
}

struct StaticClient {
    provider: Provider,
    reply: String,
}

#[async_trait]
impl ProviderClient for StaticClient {
    fn provider(&self) -> Provider {
        self.provider
    }
    async fn chat(&self, _model: &str, _history: &[ChatMessage]) -> Result<String, BrokerError> {
        Ok(self.reply.clone())
    }
    async fn analyze_image(
        &self,
        _model: &str,
        _image: &str,
        _prompt: &str,
    ) -> Result<String, BrokerError> {
        Ok(format!("analysis from {}", self.reply))
    }
}

/// A client that fails its first call and succeeds afterwards.
struct FlakyClient {
    failed_once: AtomicBool,
}

#[async_trait]
impl ProviderClient for FlakyClient {
    fn provider(&self) -> Provider {
        Provider::Mistral
    }
    async fn chat(&self, _model: &str, _history: &[ChatMessage]) -> Result<String, BrokerError> {
        if !self.failed_once.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::Provider("upstream exploded".to_string()));
        }
        Ok("second time lucky".to_string())
    }
    async fn analyze_image(
        &self,
        _model: &str,
        _image: &str,
        _prompt: &str,
    ) -> Result<String, BrokerError> {
        Ok(String::new())
    }
}

fn queue_with_client(
    label: &str,
    limits: Vec<LimitSpec>,
    client: Arc<dyn ProviderClient>,
) -> (ProviderQueue, Arc<MemoryUsageStore>) {
    let store = Arc::new(MemoryUsageStore::new());
    let queuer = RequestQueuer::new(
        key_config(label, limits),
        store.clone() as Arc<dyn UsageStore>,
        None,
    );
    (ProviderQueue { queuer, client }, store)
}

/// Scenario S3: with one busy and one idle queue for the same provider,
/// consecutive arrivals both route to the idle queue.
#[tokio::test]
async fn router_prefers_idle_queue_for_consecutive_arrivals() {
    let (busy, _busy_store) = queue_with_client(
        "busy",
        vec![LimitSpec::new(LimitType::RequestsPerSecond, 1)],
        Arc::new(StaticClient { provider: Provider::Mistral, reply: "busy".to_string() }),
    );
    let (idle, _idle_store) = queue_with_client(
        "idle",
        vec![LimitSpec::new(LimitType::RequestsPerSecond, 50)],
        Arc::new(StaticClient { provider: Provider::Mistral, reply: "idle".to_string() }),
    );

    // Five pending items pin the busy queue behind its 1 rps window
    for _ in 0..5 {
        let queuer = Arc::clone(&busy.queuer);
        tokio::spawn(async move {
            queuer
                .add(
                    Box::new(|| Box::pin(async { Ok(String::new()) })),
                    None,
                    Some("M"),
                )
                .await
        });
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let router = ModelRouter::from_parts(
        [(Provider::Mistral, vec![busy, idle])].into_iter().collect(),
        KeyStrategy::Store,
    );
    let target = TargetSpec::One(Target {
        provider: Provider::Mistral,
        model: "M".to_string(),
    });

    for _ in 0..2 {
        let response = router
            .dispatch_chat(&[user_message("hello")], &target)
            .await
            .expect("dispatch succeeds");
        assert_eq!(response.text, "idle");
    }
}

/// Scenario S6: a provider failure propagates to the caller unchanged,
/// consumes no budget, and the next request dispatches immediately.
#[tokio::test]
async fn provider_failure_propagates_without_consuming_budget() {
    let (queue, store) = queue_with_client(
        "flaky",
        vec![LimitSpec::new(LimitType::RequestsPerSecond, 1)],
        Arc::new(FlakyClient { failed_once: AtomicBool::new(false) }),
    );
    let router = ModelRouter::from_parts(
        [(Provider::Mistral, vec![queue])].into_iter().collect(),
        KeyStrategy::Store,
    );
    let target = TargetSpec::Name("m".to_string());

    let error = router
        .dispatch_chat(&[user_message("first")], &target)
        .await
        .expect_err("first call fails");
    assert!(matches!(error, BrokerError::Provider(ref m) if m == "upstream exploded"));

    // No usage was recorded for the failure
    let bucket = store.get("m").await;
    assert_eq!(bucket.month_request_count, 0);
    assert!(bucket.second_ts.is_empty());

    // The 1 rps window is untouched, so the retry dispatches immediately
    let started = Instant::now();
    let response = router
        .dispatch_chat(&[user_message("second")], &target)
        .await
        .expect("second call succeeds");
    assert_eq!(response.text, "second time lucky");
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(store.get("m").await.month_request_count, 1);
}

/// A multi-target request falls through to the provider that has queues.
#[tokio::test]
async fn multi_target_request_uses_available_provider() {
    let (gemini_queue, _store) = queue_with_client(
        "gem",
        vec![LimitSpec::new(LimitType::RequestsPerSecond, 10)],
        Arc::new(StaticClient { provider: Provider::Gemini, reply: "from gemini".to_string() }),
    );
    let router = ModelRouter::from_parts(
        [
            (Provider::Mistral, Vec::new()),
            (Provider::Gemini, vec![gemini_queue]),
        ]
        .into_iter()
        .collect(),
        KeyStrategy::Store,
    );

    let target = TargetSpec::Many(vec![
        Target { provider: Provider::Mistral, model: "mistral-small".to_string() },
        Target { provider: Provider::Gemini, model: "gemini-2.0-flash".to_string() },
    ]);

    let response = router
        .dispatch_chat(&[user_message("hello")], &target)
        .await
        .expect("dispatch succeeds");
    assert_eq!(response.provider, Provider::Gemini);
    assert_eq!(response.model, "gemini-2.0-flash");
    assert_eq!(response.text, "from gemini");
}

/// Image analysis routes like chat and returns the analysis text.
#[tokio::test]
async fn image_analysis_routes_to_default_target() {
    let (queue, _store) = queue_with_client(
        "vision",
        vec![LimitSpec::new(LimitType::RequestsPerSecond, 10)],
        Arc::new(StaticClient { provider: Provider::Mistral, reply: "vision".to_string() }),
    );
    let router = ModelRouter::from_parts(
        [(Provider::Mistral, vec![queue])].into_iter().collect(),
        KeyStrategy::Store,
    );

    let target = TargetSpec::One(Target {
        provider: Provider::Mistral,
        model: "magistral-small-2509".to_string(),
    });
    let response = router
        .dispatch_image("QUJD".to_string(), "what is this?".to_string(), &target)
        .await
        .expect("dispatch succeeds");
    assert_eq!(response.text, "analysis from vision");
    assert_eq!(response.model, "magistral-small-2509");
}
