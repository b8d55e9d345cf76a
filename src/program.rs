use std::env::consts::{ARCH, FAMILY, OS};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Error, bail};
use chrono::Local;
use console::{Term, style};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, trace, warn};

use crate::ingest::analyzer::AnalyzerOptions;
use crate::ingest::analyzer::groups::GroupingOptions;
use crate::ingest::ban_list::BanList;
use crate::ingest::config_loader::{AppConfig, ConfigManager, Source, SourceKind};
use crate::ingest::file_processor::{FileProcessor, init_file_processor};
use crate::ingest::fsys::open_sources;
use crate::ingest::logger::{api_trace_path, init_logger};
use crate::ingest::pipeline::{Pipeline, PipelineOptions};
use crate::ingest::readers::{
    AlbumMode, FolderFlavor, FolderOptions, FolderReader, Reader, ReaderOptions, RemoteReader, TakeoutOptions,
    TakeoutReader, normalize_extensions,
};
use crate::ingest::server::dry_run::DryRun;
use crate::ingest::server::immich::{ImmichClient, ImmichConfig};
use crate::ingest::server::{AssetQuery, ServerClient};
use crate::ingest::uploader::UploaderOptions;

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Drives one ingestion run from the configuration directory.
pub(crate) struct Program {
    config_dir: PathBuf,
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

impl Program {
    pub(crate) fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub(crate) async fn run(&self) -> Result<(), Error> {
        Term::stdout().set_title("photo_ingest");
        let started = Local::now();

        let manager = ConfigManager::new(&self.config_dir)
            .with_context(|| format!("loading configuration from {}", self.config_dir.display()))?;
        let config = manager.get_app_config();
        let _log = init_logger(&config).context("initializing logging")?;
        log_system_information();

        if let Err(e) = config.validate() {
            error!(error = %e, config = %manager.config_path().display(), "Configuration rejected");
            bail!("{} (edit {})", e, manager.config_path().display());
        }

        let trace_path = config.server.api_trace.then(|| {
            api_trace_path(&config, &started.format("%Y%m%dT%H%M%S").to_string())
        });
        if let Some(path) = &trace_path {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let (client, admin) = self.connect(&config, trace_path.clone()).await?;
        let processor = init_file_processor(config.logging.debug_events);

        let common = Arc::new(self.reader_options(&config, &started.format("%Y-%m-%d %H:%M:%S").to_string())?);
        let temp_dir = PathBuf::from(&config.paths.temp_directory);
        let mut readers = Vec::with_capacity(config.sources.len());
        for source in &config.sources {
            readers.push(self.build_reader(source, &config, &common, &temp_dir)?);
        }

        let options = PipelineOptions {
            pause_jobs: config.upload.pause_immich_jobs,
            analyzer: AnalyzerOptions {
                policies: config.policies()?,
                date_range: config.date_range()?,
                require_date: config.analysis.require_date,
            },
            uploader: UploaderOptions {
                concurrent_jobs: config.upload.concurrent_jobs,
                overwrite: config.upload.overwrite,
                on_server_errors: config.error_policy()?,
            },
            ..Default::default()
        };
        let pipeline = Pipeline::new(client, admin, processor.clone(), options);

        let cancel = pipeline.cancel_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing uploads in flight");
                cancel.cancel();
            }
        });

        let progress = progress_bar(&processor);
        let result = pipeline.run(readers).await;
        progress.finish_and_clear();

        self.write_reports(&config, &processor, &started.format("%Y%m%dT%H%M%S").to_string());
        let pending = processor.get_pending_assets();
        if !pending.is_empty() {
            println!(
                "{}",
                style(format!("Warning: {} assets never reached final state", pending.len())).yellow()
            );
            for record in &pending {
                warn!(file = %record.file, last_event = ?record.code, "Asset left pending");
            }
        }

        if let Err(e) = result {
            error!(error = %e, "Run failed");
            if let Some(path) = &trace_path {
                println!("API trace: {}", path.display());
            }
            return Err(e.into());
        }

        let counters = processor.get_asset_counters();
        info!(
            elapsed = ?(Local::now() - started),
            processed = counters.processed,
            discarded = counters.discarded,
            errors = counters.errors,
            "Finished"
        );
        Ok(())
    }

    /// Clients for the upload account and, when a key is set, the administrator
    async fn connect(
        &self,
        config: &AppConfig,
        api_trace: Option<PathBuf>,
    ) -> Result<(Arc<dyn ServerClient>, Option<Arc<dyn ServerClient>>), Error> {
        let base = ImmichConfig {
            url: config.server.url.clone(),
            api_key: config.server.api_key.clone(),
            timeout_secs: config.server.client_timeout_secs,
            skip_tls_verify: config.server.skip_tls_verify,
            retry_attempts: config.upload.retry_attempts,
            base_retry_delay_ms: config.upload.base_retry_delay_ms,
            api_trace,
            ..Default::default()
        };

        let client = ImmichClient::new(base.clone())?;
        client.ping().await.context("server unreachable")?;
        let user = client.validate_connection().await.context("API key rejected")?;
        let about = client.get_about().await?;
        info!(user = %user.email, version = %about.version, "Connected");
        println!(
            "Connected to {} ({}) as {}",
            style(client.host()).bold(),
            about.version,
            user.email
        );

        let device = non_empty(&config.server.device_uuid).unwrap_or_else(|| NAME.to_string());
        client.set_device_uuid(&device);

        let admin = match non_empty(&config.server.admin_api_key) {
            Some(key) => {
                let admin = ImmichClient::new(ImmichConfig {
                    api_key: key,
                    api_trace: None,
                    ..base
                })?;
                Some(Arc::new(admin) as Arc<dyn ServerClient>)
            }
            None => None,
        };

        let client: Arc<dyn ServerClient> = Arc::new(client);
        if config.upload.dry_run {
            println!("{}", style("Dry run: nothing will be changed on the server").cyan());
            let admin = admin.map(|a| Arc::new(DryRun::new(a)) as Arc<dyn ServerClient>);
            return Ok((Arc::new(DryRun::new(client)), admin));
        }
        Ok((client, admin))
    }

    fn reader_options(&self, config: &AppConfig, run_start: &str) -> Result<ReaderOptions, Error> {
        let mut ban_list = BanList::with_defaults()?;
        for pattern in &config.analysis.ban_patterns {
            ban_list.add(pattern)?;
        }
        Ok(ReaderOptions {
            ban_list,
            include_extensions: normalize_extensions(&config.analysis.include_extensions),
            exclude_extensions: normalize_extensions(&config.analysis.exclude_extensions),
            date_from_name: config.analysis.date_from_name,
            tags: config.upload.tags.clone(),
            session_tag: config.upload.session_tag.then(|| format!("{{immich-go}}/{}", run_start)),
            grouping: GroupingOptions {
                epson_fastfoto: config.stacking.manage_epson_fastfoto,
            },
        })
    }

    fn build_reader(
        &self,
        source: &Source,
        config: &AppConfig,
        common: &Arc<ReaderOptions>,
        temp_dir: &Path,
    ) -> Result<Reader, Error> {
        if source.kind == SourceKind::Immich {
            let client = ImmichClient::new(ImmichConfig {
                url: source.server_url.clone(),
                api_key: source.api_key.clone(),
                timeout_secs: config.server.client_timeout_secs,
                skip_tls_verify: config.server.skip_tls_verify,
                ..Default::default()
            })?;
            let host = client.host();
            let query = AssetQuery {
                album: non_empty(&source.from_album_name),
                ..Default::default()
            };
            return Ok(Reader::Remote(RemoteReader::new(Arc::new(client), host, query, common.clone())));
        }

        let sources = open_sources(&source.paths, temp_dir)
            .with_context(|| format!("opening {}", source.paths.join(", ")))?;
        if source.kind == SourceKind::GooglePhotos {
            let options = TakeoutOptions {
                include_unmatched: source.include_unmatched,
                include_archived: source.include_archived,
                include_partner: source.include_partner,
                include_trashed: source.include_trashed,
                from_album_name: non_empty(&source.from_album_name),
                partner_shared_album: non_empty(&source.partner_shared_album),
                into_album: non_empty(&source.into_album),
                people_tag: source.people_tag,
                takeout_tag: source.takeout_tag,
            };
            return Ok(Reader::Takeout(TakeoutReader::new(sources, options, common.clone())));
        }

        let flavor = match source.kind {
            SourceKind::Icloud => FolderFlavor::ICloud {
                memories_as_albums: source.memories_as_albums,
            },
            SourceKind::Picasa => FolderFlavor::Picasa,
            _ => FolderFlavor::Plain,
        };
        let options = FolderOptions {
            recursive: source.recursive,
            into_album: non_empty(&source.into_album),
            folder_as_album: source.folder_as_album.parse::<AlbumMode>()?,
            album_path_joiner: source.album_path_joiner.clone(),
            folder_as_tags: source.folder_as_tags,
            ignore_sidecars: source.ignore_sidecars,
            flavor,
        };
        Ok(Reader::Folder(FolderReader::new(sources, options, common.clone())?))
    }

    fn write_reports(&self, config: &AppConfig, processor: &FileProcessor, stamp: &str) {
        println!("{}", processor.generate_report());

        if !config.logging.debug_events {
            return;
        }
        let dir = PathBuf::from(&config.paths.report_directory);
        let path = dir.join(format!("report-{}.csv", stamp));
        let written = std::fs::create_dir_all(&dir)
            .and_then(|_| std::fs::write(&path, processor.generate_detailed_report()));
        match written {
            Ok(()) => println!("Detailed report: {}", path.display()),
            Err(e) => warn!(path = %path.display(), error = %e, "Could not write detailed report"),
        }
    }
}

/// Spinner showing the asset counters while the run is going.
fn progress_bar(processor: &Arc<FileProcessor>) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner} [{elapsed_precise}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));

    let hook_bar = bar.clone();
    processor.set_counters_hook(move |c| {
        hook_bar.set_message(format!(
            "{} processed, {} discarded, {} errors, {} pending",
            c.processed, c.discarded, c.errors, c.pending
        ));
    });
    bar
}

/// Logs important information about the system being used.
fn log_system_information() {
    trace!(name = NAME, version = VERSION, "Starting");
    trace!(arch = ARCH, family = FAMILY, os = OS, "System information");
}
