use anyhow::{bail, Context};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

mod app;
mod cli;
mod config;
mod eid;
mod photo_ref;
mod records;
mod semantic;
mod storage;
#[cfg(test)]
mod tests;
mod web;

use app::AppFactory;
use eid::Eid;
use records::AnimalCreate;
use semantic::IngestOutcome;

/// Parse `key=value` pairs; values that are valid JSON keep their type.
pub fn parse_fields(pairs: &[String]) -> anyhow::Result<Map<String, Value>> {
    let mut fields = Map::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("field {pair:?} is not in key=value form");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("field {pair:?} has an empty key");
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        fields.insert(key.to_string(), value);
    }
    Ok(fields)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();

    let paths = AppFactory::get_paths()?;
    let app = AppFactory::create_app(&paths)?;

    match args.command {
        cli::Command::Daemon {} => web::start_daemon(app),

        cli::Command::Add {
            name,
            species,
            photo,
            photo_ref,
            fields,
        } => {
            let mut fields = parse_fields(&fields)?;
            if let Some(name) = name {
                fields.insert("name".to_string(), Value::String(name));
            }
            if let Some(species) = species {
                fields.insert("species".to_string(), Value::String(species));
            }

            let photo = photo
                .map(|path| {
                    std::fs::read(&path)
                        .with_context(|| format!("failed to read {}", path.display()))
                })
                .transpose()?;

            let record = app.create(AnimalCreate { photo_ref, fields }, photo)?;
            let record = app.get(&record.id)?;

            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }

        cli::Command::Search { image, limit } => {
            let image = std::fs::read(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;
            let limit = limit.unwrap_or(app.search.top_k());

            let matches = app.search.rank(&image, limit)?;
            println!("{}", serde_json::to_string_pretty(&matches)?);
            Ok(())
        }

        cli::Command::Ingest { id } => match app.ingest(&Eid::from(id.as_str())) {
            IngestOutcome::Stored { dimensions } => {
                println!("stored {dimensions}-d vector for animal {id}");
                Ok(())
            }
            IngestOutcome::Skipped => {
                println!("animal {id} has no photo");
                Ok(())
            }
            IngestOutcome::Failed(err) => Err(err.into()),
        },

        cli::Command::Backfill {} => {
            let progress = ProgressBar::new(0);
            if let Ok(style) =
                ProgressStyle::with_template("{bar:40} {pos}/{len} animals [{elapsed_precise}]")
            {
                progress.set_style(style);
            }

            let report = app.backfill(&progress)?;
            progress.finish();

            println!(
                "{} stored, {} without photo, {} failed",
                report.stored, report.skipped, report.failed
            );
            Ok(())
        }
    }
}
