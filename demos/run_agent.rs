//! Run an extraction executor
//!
//! Loads a JSON config (first argument, optional), starts the agent, and
//! logs lifecycle events until Ctrl+C / SIGTERM.
//!
//! When the config lists no extractor modules, a built-in `wordcount`
//! extractor is registered so the agent has something to advertise.
//!
//! ```text
//! RUST_LOG=extractor_agent=debug cargo run --example run_agent -- agent.json
//! ```

use extractor_agent::{
    Config, Event, ExtractorAgent, ExtractorDescription, ExtractorInput, Feature, HttpContentFetcher,
    LocalInvoker, Output, WebSocketTransport, extraction::Extractor, run_with_shutdown,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

struct WordCount;

impl Extractor for WordCount {
    fn description(&self) -> ExtractorDescription {
        ExtractorDescription {
            name: "wordcount".into(),
            description: "counts whitespace separated words".into(),
            input_mime_types: vec!["text/plain".into()],
            ..Default::default()
        }
    }

    fn extract(&self, inputs: &[ExtractorInput]) -> Result<Vec<Vec<Output>>, String> {
        Ok(inputs
            .iter()
            .map(|input| {
                let words = String::from_utf8_lossy(&input.data).split_whitespace().count();
                vec![Output::Feature(Feature::metadata("words", words.into()))]
            })
            .collect())
    }
}

fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?),
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;

    let agent = if config.extraction.modules.is_empty() {
        let invoker = LocalInvoker::new(config.extraction.pool_size)
            .with_timeout(config.extraction.extraction_timeout)
            .with_extractor(Arc::new(WordCount));
        let fetcher = HttpContentFetcher::new(&config)?;
        let transport = WebSocketTransport::new(&config)?;
        ExtractorAgent::new(
            config,
            Arc::new(invoker),
            Arc::new(fetcher),
            Arc::new(transport),
        )?
    } else {
        ExtractorAgent::from_config(config)?
    };

    let mut events = agent.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::Registered { executor_id, addr } => {
                    println!("registered as {} at {}", executor_id, addr)
                }
                Event::BatchDispatched { extractor, size } => {
                    println!("batch of {} for {}", size, extractor)
                }
                Event::TaskReported { task_id } => println!("reported {}", task_id),
                Event::ReportFailed {
                    task_id,
                    error,
                    evicted,
                } => println!("report of {} failed: {} (evicted: {})", task_id, error, evicted),
                Event::CoordinatorDisconnected { error } => {
                    println!("coordinator lost: {}", error)
                }
                Event::Shutdown => break,
                _ => {}
            }
        }
    });

    let address = agent.start().await?;
    println!("debug API on http://{}", address);

    run_with_shutdown(agent).await?;
    Ok(())
}
