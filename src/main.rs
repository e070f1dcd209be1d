use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod corpus;
mod embeddings;
mod encode;
mod engine;
mod factory;
mod query_log;
mod replay;
mod storage;
mod targets;
#[cfg(test)]
mod tests;
mod web;

use embeddings::EmbeddingProvider;
use factory::AppFactory;
use query_log::{CsvQueryLog, DiscardQueryLog};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = cli::Args::parse();

    let paths = AppFactory::get_paths()?;
    let config = AppFactory::create_config(&paths)?;

    match args.command {
        cli::Command::Serve { bind, fusion } => {
            let mut config = config;
            if let Some(fusion) = fusion {
                config.fusion = fusion;
            }

            let embedder = AppFactory::create_embedder(&config, &paths)?;
            let log_dir = config.resolve(&config.log_dir);
            let query_log = CsvQueryLog::start(&log_dir)
                .with_context(|| format!("Failed to open query logs in {}", log_dir.display()))?;
            let query_log = Arc::new(query_log);
            log::info!("writing query logs to {}", query_log.dir().display());

            let engine = AppFactory::create_engine(&config, embedder, query_log.clone())?;
            log::info!(
                "serving {} items with fusion policy '{}'",
                engine.corpus().len(),
                engine.options().fusion
            );

            let bind = bind.unwrap_or_else(|| config.bind.clone());
            let served = web::start_daemon(Arc::new(engine), &bind);
            query_log.shutdown();
            served
        }

        cli::Command::Search {
            query,
            temporal,
            image,
        } => {
            let embedder = AppFactory::create_embedder(&config, &paths)?;
            let engine = AppFactory::create_engine(&config, embedder, Arc::new(DiscardQueryLog))?;
            let session = engine.start_session()?;

            let items = match (image, query) {
                (Some(item), _) => engine.image_search(item, &session)?,
                (None, Some(query)) if temporal => engine.temporal_search(&query, &session)?,
                (None, Some(query)) => engine.text_search(&query, &session, false, "cli")?,
                (None, None) => anyhow::bail!("Nothing to search for"),
            };

            println!("{}", serde_json::to_string_pretty(&items)?);
            Ok(())
        }

        cli::Command::Encode { images, out } => {
            let embedder = AppFactory::create_embedder(&config, &paths)?;
            let out = out.unwrap_or_else(|| config.resolve(&config.corpus_dir));

            let count = encode::encode_dir(embedder.as_ref(), &images, &out, true)?;
            println!("{count} images encoded into {}", out.display());
            Ok(())
        }

        cli::Command::Replay {
            log,
            reform_count,
            out,
            limited,
        } => {
            let embedder = AppFactory::create_embedder(&config, &paths)?;
            let corpus_dir = config.resolve(&config.corpus_dir);
            let corpus = corpus::Corpus::load(&corpus_dir, &embedder.model_id_hash())
                .with_context(|| format!("Failed to load corpus from {}", corpus_dir.display()))?;
            let videos = config
                .videos_end
                .as_ref()
                .map(|path| corpus::VideoBounds::load(config.resolve(path)))
                .transpose()?;

            let entries = replay::read_log(&log)?;
            let mut limits = vec![1.0];
            if limited {
                limits.extend(replay::LIMITS);
            }

            for limit in limits {
                let options = replay::ReplayOptions {
                    reform_count,
                    showing: config.showing,
                    limit,
                    ..Default::default()
                };

                let replayer =
                    replay::Replayer::new(&corpus, embedder.as_ref(), videos.as_ref(), options);
                let results = replayer.run(&entries)?;
                let summary = replay::summarize(&results, config.showing);
                replay::write_results(&out, &options.file_suffix(), &results, &summary)?;

                println!("limit {:.0}%", limit * 100.0);
                for row in &summary {
                    println!(
                        "{:<10} {:>6} queries {:>6} found  mean rank {:.1}",
                        row.policy.name(),
                        row.queries,
                        row.found,
                        row.mean_rank
                    );
                }
            }
            Ok(())
        }
    }
}
