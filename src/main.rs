use clap::Parser;
use tracing_subscriber::EnvFilter;

mod analytics;
mod app;
mod cli;
mod config;
mod images;
mod ingest;
mod lock;
mod photos;
mod search;
mod semantic;
mod storage;
#[cfg(test)]
mod tests;
mod web;

use app::AppFactory;
use cli::Command;
use lock::FileLock;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let paths = AppFactory::get_paths()?;

    // one writer per collection
    let _lock = match args.command {
        Command::Daemon {}
        | Command::Add { .. }
        | Command::Label { .. }
        | Command::Reprocess { .. }
        | Command::Delete { .. } => Some(FileLock::try_acquire(&paths.base_path)?),
        _ => None,
    };

    let app = AppFactory::create_local_app(&paths)?;

    match args.command {
        Command::Daemon {} => web::start_daemon(app, &paths.uploads_path),
        Command::Add { files, labels } => cli::handle_add(files, labels, &app),
        Command::Search {
            query,
            filters,
            scoring,
            count,
        } => cli::handle_search(query, filters, scoring, count, &app),
        Command::Show { id } => cli::handle_show(id, &app),
        Command::List { limit, offset } => cli::handle_list(limit, offset, &app),
        Command::Similar { id, limit } => cli::handle_similar(id, limit, &app),
        Command::Label {
            id,
            set,
            append,
            remove,
        } => cli::handle_label(id, set, append, remove, &app),
        Command::Reprocess { ids } => cli::handle_reprocess(ids, &app),
        Command::Delete { ids, yes } => cli::handle_delete(ids, yes, &app),
        Command::Stats {} => cli::handle_stats(&app),
        Command::Recent { days } => cli::handle_recent(days, &app),
    }
}
