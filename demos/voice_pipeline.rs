//! # Example: Voice Pipeline
//!
//! Four services wired only through the bus:
//!
//! ```text
//! stt ──Event STT.Transcript──► orchestrator ──Query LLM.Complete──► llm
//!                                     │                               │
//!                                     ◄────────── reply ──────────────┘
//!                                     └──Command TTS.Speak──► tts
//! ```
//!
//! `tts` fails its first synthesis on purpose; the Command is retried by the bus.
//! A custom observer counts retries and dead letters; [`LogWriter`] prints the rest.
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example voice_pipeline
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use switchboard::{
    BackoffPolicy, Envelope, Event, EventKind, HandlerError, HandlerFn, LogWriter, MessageBus,
    Observe, PublishOptions, RequestOptions, Service, ServiceContext, ServiceError, ServiceSpec,
    Supervisor, SupervisorConfig,
};
use tracing_subscriber::EnvFilter;

/// Emits a few transcripts, as if a user were talking.
struct Stt;

#[async_trait]
impl Service for Stt {
    fn name(&self) -> &str {
        "stt"
    }

    async fn start(&self, ctx: ServiceContext) -> Result<(), ServiceError> {
        let bus = Arc::clone(ctx.bus());
        let token = ctx.token();
        ctx.spawn("microphone", async move {
            for text in ["what time is it", "tell me a joke"] {
                tokio::select! {
                    _ = token.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(Duration::from_millis(200)) => {}
                }
                bus.publish("STT.Transcript", json!({ "text": text }), PublishOptions::event())
                    .await?;
            }
            Ok::<_, ServiceError>(())
        });
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// Answers `LLM.Complete` queries.
struct Llm;

#[async_trait]
impl Service for Llm {
    fn name(&self) -> &str {
        "llm"
    }

    async fn start(&self, ctx: ServiceContext) -> Result<(), ServiceError> {
        let bus = Arc::clone(ctx.bus());
        ctx.bus()
            .subscribe(
                "LLM.Complete",
                HandlerFn::arc("llm", move |q: Arc<Envelope>| {
                    let bus = Arc::clone(&bus);
                    async move {
                        let prompt = q.payload()["prompt"].as_str().unwrap_or_default().to_string();
                        let answer = format!("you said: {prompt}");
                        bus.reply(&q, json!({ "answer": answer }))
                            .await
                            .map_err(|e| HandlerError::fail(e.to_string()))?;
                        Ok::<_, HandlerError>(())
                    }
                }),
            )
            .await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// Speaks `TTS.Speak` commands; the first one fails.
struct Tts {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Service for Tts {
    fn name(&self) -> &str {
        "tts"
    }

    async fn start(&self, ctx: ServiceContext) -> Result<(), ServiceError> {
        let calls = Arc::clone(&self.calls);
        ctx.bus()
            .subscribe(
                "TTS.*",
                HandlerFn::arc("tts", move |cmd: Arc<Envelope>| {
                    let calls = Arc::clone(&calls);
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            return Err(HandlerError::fail("audio device busy"));
                        }
                        println!("[tts] speaking: {}", cmd.payload()["text"]);
                        Ok(())
                    }
                }),
            )
            .await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// Turns transcripts into answers and answers into speech.
struct Orchestrator;

#[async_trait]
impl Service for Orchestrator {
    fn name(&self) -> &str {
        "orchestrator"
    }

    async fn start(&self, ctx: ServiceContext) -> Result<(), ServiceError> {
        let bus = Arc::clone(ctx.bus());
        ctx.bus()
            .subscribe(
                "STT.Transcript",
                HandlerFn::arc("orchestrator", move |ev: Arc<Envelope>| {
                    let bus = Arc::clone(&bus);
                    async move {
                        let text = ev.payload()["text"].clone();
                        let res = bus
                            .request(
                                "LLM.Complete",
                                json!({ "prompt": text }),
                                RequestOptions::new(Duration::from_secs(2)),
                            )
                            .await
                            .map_err(|e| HandlerError::fail(e.to_string()))?;
                        let answer = res
                            .into_result()
                            .map_err(|f| HandlerError::fail(f.as_str()))?;
                        bus.publish(
                            "TTS.Speak",
                            json!({ "text": answer["answer"] }),
                            PublishOptions::command().with_priority(1),
                        )
                        .await
                        .map_err(|e| HandlerError::fail(e.to_string()))?;
                        Ok::<_, HandlerError>(())
                    }
                }),
            )
            .await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

#[derive(Default)]
struct RetryCounter {
    retries: AtomicU32,
    dead: AtomicU32,
}

#[async_trait]
impl Observe for RetryCounter {
    async fn on_event(&self, ev: &Event) {
        match ev.kind {
            EventKind::RetryScheduled => {
                self.retries.fetch_add(1, Ordering::Relaxed);
            }
            EventKind::DeadLettered => {
                self.dead.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "retry-counter"
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut cfg = SupervisorConfig::default();
    cfg.bus.retry = BackoffPolicy {
        first: Duration::from_millis(50),
        ..BackoffPolicy::default()
    };

    let counter = Arc::new(RetryCounter::default());
    let observers: Vec<Arc<dyn Observe>> = vec![Arc::new(LogWriter::new()), counter.clone()];
    let sup = Supervisor::builder(cfg).with_observers(observers).build();

    sup.register(Arc::new(Llm))?;
    sup.register(Arc::new(Tts {
        calls: Arc::new(AtomicU32::new(0)),
    }))?;
    sup.register(ServiceSpec::new(Arc::new(Orchestrator)).depends_on("llm").depends_on("tts"))?;
    sup.register(ServiceSpec::new(Arc::new(Stt)).depends_on("orchestrator"))?;

    // Stop after the conversation has had time to play out.
    let handle = sup.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        handle.request();
    });

    sup.serve().await?;

    for (name, state) in sup.states() {
        println!("[main] {name}: {state}");
    }
    println!(
        "[main] retries={} dead_letters={}",
        counter.retries.load(Ordering::Relaxed),
        counter.dead.load(Ordering::Relaxed)
    );
    Ok(())
}
