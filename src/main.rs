//! CLI entry point for the job-pipeline core.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use urlpipe_core::{
    Broker, Downloader, EventPayload, HttpOEmbedClient, OEmbedClient, PlaylistLoader,
    PlaylistSource, Retrier, ServerManager, SqliteQueueStore, Store, SubprocessExtractor, Worker,
    WorkerManager,
};

mod cli;
mod config;

use cli::{Args, Command};
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let config = Config::from_env();
    let db = urlpipe_core::Database::new(Path::new(&config.database_path)).await?;
    let store = Store::new(db.clone());
    let broker = Broker::new(Arc::new(SqliteQueueStore::new(db)));
    let server_manager = ServerManager::new(store.clone(), broker.clone());

    let extractor = Arc::new(SubprocessExtractor::new(config.extractor_bin.clone()));
    let storage = Arc::new(urlpipe_core::FilesystemStorage::new(config.storage_dir.clone()));
    let downloader = Arc::new(Downloader::new(extractor, storage, store.clone()));
    let oembed: Arc<dyn OEmbedClient> = Arc::new(HttpOEmbedClient::new(config.oembed_endpoint.clone()));
    let worker_manager = WorkerManager::new(store.clone(), downloader, oembed);

    match args.command.unwrap_or(Command::Server) {
        Command::CreateUrl { url } => {
            let row = server_manager.create_url(&url, None).await?;
            println!("created url {} ({})", row.id, row.status());
        }

        Command::CreateUrlsFromPlaylist { playlist } => {
            let source: Arc<dyn PlaylistSource> = Arc::new(UnimplementedPlaylistSource);
            let loader = PlaylistLoader::new(source, store.clone(), server_manager.clone());
            loader.create_urls_from_playlist(&playlist).await?;
            println!("expanded playlist {playlist}");
        }

        Command::GetOembed { url } => {
            let row = server_manager
                .create_url(&url, None)
                .await
                .context("failed to create url for standalone oembed fetch")?;
            worker_manager
                .get_oembed(&EventPayload::new(row.id, &url).encode()?)
                .await?;
            println!("fetched oembed metadata for url {}", row.id);
        }

        Command::DownloadUrl { url } => {
            let row = server_manager.create_url(&url, None).await?;
            let payload = EventPayload::new(row.id, &url).encode()?;
            worker_manager
                .download_url(CancellationToken::new(), &payload)
                .await?;
            let updated = store.get_url(row.id).await?;
            if let Some(updated) = updated {
                println!("url {} finished as {}", updated.id, updated.status());
                if let Some(file) = &updated.file {
                    println!("file: {file}");
                }
                if let Some(error) = &updated.error {
                    println!("error: {error}");
                }
            }
        }

        Command::ListUrls { status, cursor, limit } => {
            let rows = server_manager.list_urls(status, cursor, limit).await?;
            for row in rows {
                println!("{} {} {}", row.id, row.status(), row.url);
            }
        }

        Command::ListLogs { url_id, cursor, limit } => {
            let lines = server_manager.list_logs(url_id, cursor, limit).await?;
            for line in lines {
                println!("{line}");
            }
        }

        Command::RetryNextDownloadUrl => {
            let retrier = Retrier::new(broker.clone(), store.clone(), server_manager.clone());
            match retrier.retry_next_download_url().await? {
                None => println!("no dead-lettered download-url events"),
                Some(None) => println!("dead-lettered event was not eligible for retry"),
                Some(Some(row)) => println!("created successor url {}", row.id),
            }
        }

        Command::RetryDownloadUrl { id } => {
            let retrier = Retrier::new(broker.clone(), store.clone(), server_manager.clone());
            let row = retrier.retry_download_url(id).await?;
            println!("created successor url {}", row.id);
        }

        Command::Server => {
            info!("starting server: worker loop + periodic retrier sweeps");
            run_server(broker, store, server_manager, worker_manager).await?;
        }

        Command::Worker => {
            info!("starting worker loop");
            run_worker(broker, worker_manager).await?;
        }
    }

    Ok(())
}

async fn run_worker(broker: Broker, worker_manager: WorkerManager) -> Result<()> {
    let cancel = CancellationToken::new();
    let worker = register_routes(broker, worker_manager, cancel.clone());

    let worker_cancel = cancel.clone();
    let worker_handle = tokio::spawn(async move { worker.listen(worker_cancel).await });

    tokio::signal::ctrl_c().await.ok();
    cancel.cancel();

    worker_handle.await??;
    Ok(())
}

async fn run_server(
    broker: Broker,
    store: Store,
    server_manager: ServerManager,
    worker_manager: WorkerManager,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let worker = register_routes(broker.clone(), worker_manager, cancel.clone());
    let retrier = Retrier::new(broker, store, server_manager);

    let worker_cancel = cancel.clone();
    let worker_handle = tokio::spawn(async move { worker.listen(worker_cancel).await });

    let retrier_cancel = cancel.clone();
    let retrier_handle = tokio::spawn(async move {
        while !retrier_cancel.is_cancelled() {
            if let Err(err) = retrier.retry_next_download_url().await {
                tracing::warn!(error = %err, "retrier sweep failed");
            }
            tokio::select! {
                () = tokio::time::sleep(std::time::Duration::from_secs(30)) => {}
                () = retrier_cancel.cancelled() => {}
            }
        }
    });

    tokio::signal::ctrl_c().await.ok();
    cancel.cancel();

    worker_handle.await??;
    retrier_handle.await?;
    Ok(())
}

fn register_routes(broker: Broker, worker_manager: WorkerManager, cancel: CancellationToken) -> Worker {
    use urlpipe_core::queues::{DOWNLOAD_URL, GET_OEMBED};

    let download_manager = worker_manager.clone();
    let oembed_manager = worker_manager;
    let download_cancel = cancel;

    Worker::new(broker)
        .register(
            DOWNLOAD_URL,
            std::sync::Arc::new(move |payload: String| {
                let manager = download_manager.clone();
                let cancel = download_cancel.clone();
                Box::pin(async move {
                    manager
                        .download_url(cancel, &payload)
                        .await
                        .map_err(|err| err.to_string())
                }) as std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), String>> + Send>>
            }),
        )
        .register(
            GET_OEMBED,
            std::sync::Arc::new(move |payload: String| {
                let manager = oembed_manager.clone();
                Box::pin(async move {
                    manager
                        .get_oembed(&payload)
                        .await
                        .map_err(|err| err.to_string())
                }) as std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), String>> + Send>>
            }),
        )
}

struct UnimplementedPlaylistSource;

#[async_trait::async_trait]
impl PlaylistSource for UnimplementedPlaylistSource {
    async fn list_videos(
        &self,
        playlist_id: &str,
    ) -> std::result::Result<Vec<urlpipe_core::PlaylistVideo>, urlpipe_core::playlist_loader::PlaylistSourceError> {
        Err(urlpipe_core::playlist_loader::PlaylistSourceError(format!(
            "no playlist source is configured for playlist {playlist_id}"
        )))
    }
}
