use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use demopilot::{
    collaborators::{LoggingBrowser, LoggingSpeech, NoAnswerGenerator, NoInputCapture},
    providers::openai::OpenAI,
    ClassifierConfig, DemoCollaborators, DemoEvent, DemoScript, IntentClassifier, LLMProvider,
    LlmAnswerGenerator, OrchestratorConfig, ResumePolicy, SessionRegistry,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "demo-cli")]
#[command(about = "Run a narrated product demo in the terminal; type questions while it runs")]
struct Args {
    /// Demo script (.json, .yaml or .yml)
    script: PathBuf,

    /// Model for intent classification and answers (defaults to DEMOPILOT_CLASSIFIER_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// Keyword-only classification and canned answers, even if OPENAI_API_KEY is set
    #[arg(long)]
    offline: bool,

    /// Sit out the rest of a step's wait after answering instead of moving on
    #[arg(long)]
    finish_waits: bool,

    /// Seconds to keep taking questions after the last step
    #[arg(long, default_value_t = 0)]
    final_questions: u64,

    /// Print every session event as JSON
    #[arg(long)]
    events: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,demopilot=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let script = DemoScript::load_from_file(&args.script)?;

    let mut classifier_config = ClassifierConfig::from_env();
    if let Some(model) = args.model {
        classifier_config.model = model;
    }

    let provider: Option<Arc<dyn LLMProvider>> = if args.offline {
        None
    } else {
        match OpenAI::from_env() {
            Ok(provider) => Some(Arc::new(provider)),
            Err(e) => {
                tracing::warn!("running offline: {}", e);
                None
            }
        }
    };

    let collaborators = match provider {
        Some(provider) => DemoCollaborators::new(
            Arc::new(LoggingBrowser),
            Arc::new(LoggingSpeech),
            Arc::new(NoInputCapture),
            Arc::new(LlmAnswerGenerator::new(
                Arc::clone(&provider),
                classifier_config.model.clone(),
            )),
        )
        .with_classifier(IntentClassifier::new(provider, classifier_config)),
        None => DemoCollaborators::new(
            Arc::new(LoggingBrowser),
            Arc::new(LoggingSpeech),
            Arc::new(NoInputCapture),
            Arc::new(NoAnswerGenerator),
        ),
    };

    let policy = if args.finish_waits {
        ResumePolicy::FinishRemainingWait
    } else {
        ResumePolicy::SkipRemainingWait
    };
    let config = OrchestratorConfig::from_env()
        .with_resume_policy(policy)
        .with_final_questions_window(Duration::from_secs(args.final_questions));

    let mut registry = SessionRegistry::new(config);
    if args.events {
        registry = registry.with_event_callback(Arc::new(|event: &DemoEvent| {
            if let Ok(line) = serde_json::to_string(event) {
                println!("{line}");
            }
        }));
    }

    let handle = registry.create(script, collaborators).await;
    handle.run();
    println!("Type a question and press enter. /listen, /status and /end are also understood.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let finished = handle.finished();
    tokio::pin!(finished);
    let mut stdin_open = true;

    let status = loop {
        tokio::select! {
            status = &mut finished => break status,
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    // Let the demo play out.
                    stdin_open = false;
                    continue;
                };
                let line = line.trim();
                let submitted = match line {
                    "" => continue,
                    "/end" | "/quit" => {
                        registry.end(&handle).await;
                        continue;
                    }
                    "/status" => {
                        println!("{}", serde_json::to_string_pretty(&handle.status())?);
                        continue;
                    }
                    "/listen" => handle.listen(),
                    question => handle.ask(question),
                };
                if let Err(e) = submitted {
                    tracing::warn!("interrupt not delivered: {}", e);
                }
            }
        }
    };

    println!(
        "Demo finished after {}/{} steps with {} question(s) answered.",
        status.cursor.min(status.total_steps),
        status.total_steps,
        status.qa_log.len()
    );
    for entry in &status.qa_log {
        println!("Q: {}\nA: {}", entry.question, entry.answer);
    }
    Ok(())
}
