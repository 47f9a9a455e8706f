// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use idphoto_engine::{
    format_remaining, AttemptEvent, AttemptOutcome, CountdownEvent, EngineConfig, EngineError,
    FileStateStore, PhotoEngine, PromptOptions, QuotaCountdown, RequestKind, SidecarImageClient,
    SlidingWindowLimiter, StudioPromptProvider, SystemClock, VlmPortraitVerifier,
};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

/// Generate a studio-style ID photo from a source photo
#[derive(Parser, Debug)]
#[command(name = "idphoto-engine", about)]
struct Cli {
    /// Source photo to transform
    #[arg(long)]
    photo: PathBuf,

    /// Where to write the generated image
    #[arg(long, default_value = "idphoto.png")]
    output: PathBuf,

    /// Optional TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ask for a gentle smile instead of a neutral expression
    #[arg(long)]
    smile: bool,

    /// Remove eyeglasses from the face
    #[arg(long)]
    remove_glasses: bool,

    /// Cartoon style description; enables cartoon mode (skips validation)
    #[arg(long)]
    cartoon: Option<String>,

    /// Treat this run as a regeneration of a previous result
    #[arg(long)]
    regenerate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    }
    .apply_env();

    let store = Arc::new(FileStateStore::new(&config.state_path));
    let limiter = Arc::new(
        SlidingWindowLimiter::with_window(
            store,
            Arc::new(SystemClock),
            config.max_per_window,
            config.window(),
        )
        .with_key(config.quota_key.clone()),
    );
    let generator = Arc::new(SidecarImageClient::new(
        &config.generation_endpoint,
        &config.generation_model,
    )?);
    let verifier = Arc::new(VlmPortraitVerifier::new(
        &config.verifier_endpoint,
        &config.verifier_model,
    )?);
    let engine = PhotoEngine::new(
        limiter.clone(),
        generator,
        verifier,
        Arc::new(StudioPromptProvider),
    )
    .with_max_attempts(config.max_attempts);

    let photo = tokio::fs::read(&cli.photo)
        .await
        .with_context(|| format!("reading photo {:?}", cli.photo))?;
    engine.set_source_photo(Bytes::from(photo)).await;
    engine
        .set_options(PromptOptions {
            expression: if cli.smile {
                idphoto_engine::Expression::Smile
            } else {
                idphoto_engine::Expression::Neutral
            },
            remove_glasses: cli.remove_glasses,
            cartoon_mode: cli.cartoon.is_some(),
            cartoon_description: cli.cartoon.clone().unwrap_or_default(),
        })
        .await;

    // Stream per-attempt progress while the session runs
    let mut attempts = engine.subscribe_to_attempts().await;
    tokio::spawn(async move {
        while let Some(event) = attempts.recv().await {
            match event {
                AttemptEvent::AttemptStarted {
                    attempt,
                    max_attempts,
                } => println!("Attempt {}/{}...", attempt, max_attempts),
                AttemptEvent::ValidationStarted { .. } => println!("  validating candidate..."),
            }
        }
    });

    let kind = if cli.regenerate {
        RequestKind::Regenerate
    } else {
        RequestKind::Generate
    };

    let session = match engine.request_generation(kind).await {
        Ok(session) => session,
        Err(EngineError::QuotaExceeded {
            active,
            limit,
            retry_at,
        }) => {
            println!("Quota exceeded: {}/{} generations used.", active, limit);
            if retry_at.is_some() {
                // Report the live countdown once, the way a UI would render it
                let countdown = QuotaCountdown::new(limiter);
                let mut events = countdown.subscribe().await;
                let handle = countdown.start();
                if let Some(CountdownEvent::Tick { remaining_ms }) = events.recv().await {
                    println!("Next slot frees in {}.", format_remaining(remaining_ms));
                }
                handle.stop();
            }
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    match session.outcome {
        AttemptOutcome::Success(image) => {
            tokio::fs::write(&cli.output, &image)
                .await
                .with_context(|| format!("writing output {:?}", cli.output))?;
            println!(
                "Done after {} attempt(s); wrote {:?}.",
                session.attempts_made, cli.output
            );
        }
        AttemptOutcome::Rejected => {
            println!(
                "No acceptable result after {} attempts; try again.",
                session.attempts_made
            );
        }
        AttemptOutcome::Terminated => {
            println!("Generation cancelled.");
        }
    }

    let usage = engine.quota().await;
    println!("Quota: {}/{} used.", usage.used, usage.limit);
    Ok(())
}
