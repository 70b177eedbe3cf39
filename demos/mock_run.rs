//! Example: a full pipeline run against MockBackend, no live model needed.
//!
//! Run with: `RUST_LOG=debug cargo run --example mock_run`

use content_pipeline::backend::MockReply;
use content_pipeline::prompts::ids;
use content_pipeline::{
    ArticleExporter, Event, FnEventHandler, GenerationClient, HistoryRecord, HistoryStore,
    HtmlExporter, MemoryHistoryStore, MockBackend, PipelineOrchestrator, PipelineParameters,
    PromptLibrary,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn canned_reply(prompt_id: &str) -> &'static str {
    match prompt_id {
        ids::PERSONA => "A former primary school teacher and mother of two who reviews kids' gear honestly.",
        ids::POPULAR_ARTICLES => r#"{"articles": [{"title": "My son stopped complaining about his bag", "highlights": "weight spread", "technique": "before/after story"}]}"#,
        ids::KEYWORDS => r#"{"keywords": [{"word": "sore shoulders", "category": "pain", "description": "kids carry too much"}]}"#,
        ids::RTB => r#"{"rtbList": [{"feature": "S-shaped straps", "benefit": "less shoulder strain", "proof": "tested with 200 families"}]}"#,
        ids::USER_PROFILE => "Working parents of 6-10 year olds who worry about posture but have little time to research.",
        ids::EMPATHY_POINTS => r#"{"empathyPoints": [{"point": "the bag weighs more than the lunch box and the kid combined", "scene": "school gate", "emotion": "guilt"}]}"#,
        ids::ARTICLE => "Every morning at the school gate I watched my son hunch under his bag.\nThen we switched to a bag with S-shaped straps.",
        ids::TITLES => r#"```json
{"titles": [{"title": "The school bag that ended our morning battles", "technique": "story", "score": "9"}]}
```"#,
        ids::COMPLIANCE => r#"{"compliance": {"hasIssues": false, "issues": [],
            "fixedTitle": "The school bag that ended our morning battles",
            "fixedArticle": "Every morning at the school gate I watched my son hunch under his bag.\nThen we switched to a bag with S-shaped straps."}}"#,
        ids::FORMATTING => r#"{"result": {"title": "🎒 The school bag that ended our morning battles",
            "content": "Every morning at the school gate I watched my son hunch under his bag 😟\n\nThen we switched to a bag with S-shaped straps ✨",
            "emojiCount": 3, "modifications": ["added emoji", "split paragraphs"]}}"#,
        _ => "",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    // Answer each request by recognising its prompt from the system message.
    let library = PromptLibrary::builtin();
    let by_system: HashMap<String, &'static str> = ids::REQUIRED
        .iter()
        .filter_map(|&id| library.get(id).map(|spec| (spec.system_prompt.clone(), id)))
        .collect();
    let mock = MockBackend::from_fn(move |req| {
        let id = req
            .system_prompt()
            .and_then(|s| by_system.get(s))
            .copied()
            .unwrap_or("");
        MockReply::Text(canned_reply(id).to_string())
    })
    .with_latency(|_| Duration::from_millis(50));

    let progress = Arc::new(FnEventHandler(|event: Event| {
        if let Event::Progress { stage, message } = event {
            match stage {
                Some(stage) => println!("[{:>10}] {}", stage.as_str(), message),
                None => println!("[{:>10}] {}", "pipeline", message),
            }
        }
    }));

    let client = GenerationClient::builder("http://unused")
        .backend(Arc::new(mock))
        .event_handler(progress)
        .build()?;

    let params = PipelineParameters::new()
        .with("targetAudience", "parents of primary school kids")
        .with("feature", "ergonomic school bag")
        .with("articleLength", 300);

    let mut pipeline = PipelineOrchestrator::new(client, params.clone());
    let artifact = pipeline.run().await?;

    println!();
    let typing = content_pipeline::simulate_typewriter(
        artifact.title.clone(),
        Duration::from_millis(15),
        |shown| {
            use std::io::Write;
            print!("\r{}", shown);
            let _ = std::io::stdout().flush();
        },
    );
    typing.join().await;
    println!("\n\n{}\n", artifact.content);

    let history = MemoryHistoryStore::default();
    let id = history
        .save(HistoryRecord::from_artifact(&artifact, &params))
        .await?;
    println!("saved to history as {}", id);

    let exporter = HtmlExporter::new(std::env::temp_dir().join("content-pipeline-demo"));
    let path = exporter.export(&artifact).await?;
    println!("exported to {}", path.display());

    Ok(())
}
