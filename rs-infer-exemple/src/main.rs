use std::io::Write;
use std::sync::Arc;

use futures::StreamExt;
use rs_infer_core::engine::ngram::NGRAM_MODEL_TYPE;
use rs_infer_core::{GenerationConfig, GenerationSession, NGramEngine, ParamOverrides, SessionError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Corpus name, read from "./data/<name>.txt"
    // The compiled model is cached as "./data/<name>.bin" on first load
    let name = std::env::args().nth(1).unwrap_or_else(|| "sample".to_owned());
    let path = format!("./data/{}.txt", name);

    // One session drives one model through one engine
    let session = GenerationSession::new(Arc::new(NGramEngine::new(5)), path, NGRAM_MODEL_TYPE, GenerationConfig::default());
    println!("Model: {} ({})", session.model_path().display(), session.model_type());

    session.load().await?;

    // Loading twice is refused, the model stays loaded
    match session.load().await {
        Err(SessionError::AlreadyLoaded) => println!("The model is already loaded"),
        other => println!("Should not happen: {:?}", other),
    }

    // Sparse updates: only the given fields change, the others are kept
    session.update_params(&ParamOverrides::new().temperature(0.6)).await;
    let config = session
        .update_params(&ParamOverrides::new().max_new_tokens(80).stop_words(["market"]))
        .await;
    println!("Configuration: {:?}", config);

    // Stream a completion to stdout, fragment by fragment
    let mut stream = session.create_completion_stream("the old ", &ParamOverrides::new()).await?;
    print!("the old ");
    while let Some(fragment) = stream.next().await {
        print!("{}", fragment?);
        std::io::stdout().flush()?;
    }
    println!();
    if let Some(summary) = stream.summary() {
        println!("Finished: {:?}", summary);
    }
    drop(stream);

    // Cancel a generation after a few fragments
    let mut stream = session
        .create_completion_stream("the ", &ParamOverrides::new().stop_words(Vec::<String>::new()))
        .await?;
    let token = stream.cancellation_token();
    let mut received = 0;
    while let Some(fragment) = stream.next().await {
        fragment?;
        received += 1;
        if received == 5 {
            token.cancel();
        }
    }
    println!("Cancelled after {} fragments: {:?}", received, stream.summary());
    drop(stream);

    // Every engine handle has been released
    println!("Live engine handles: {}", session.engine().live_handles());

    session.dispose().await?;
    println!("Model loaded after dispose: {}", session.is_model_loaded().await);

    Ok(())
}
