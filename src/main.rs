extern crate log;
pub mod catalog;
pub mod config;
pub mod db;
pub mod osm;
pub mod pipeline;
#[cfg(test)]
mod test_support;
use crate::catalog::index::{FileFormat, GeofabrikCatalog};
use crate::config::Config;
use crate::db::pg::PostgresOsmDatabase;
use crate::osm::download::GeofabrikDownloader;
use crate::osm::reader::{GdalExtractOpener, GdalStructuredReader, ReadOptions};
use crate::pipeline::ensure::make_subregion_osm_data_available;
use crate::pipeline::import::{ExtractImporter, ImportOptions};
use anyhow::anyhow;
use clap::{Parser, Subcommand};
use std::{fs::read_to_string, path::Path};

/// Download OpenStreetMap extracts from Geofabrik and import them into PostgreSQL.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input config file.
    #[arg(short, long)]
    config_filepath: String,

    /// Fetch the catalog and extracts again even if local copies exist.
    #[arg(short, long)]
    update: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the extract of a region, or of all subregions of it.
    Ensure {
        /// Region name, matched approximately against the catalog.
        #[arg(short, long)]
        region: String,

        #[arg(short, long, default_value = ".osm.pbf")]
        file_format: FileFormat,
    },
    /// Import the extracts of all subregions without subregions into the database.
    Import {
        /// Keep downloaded extracts after importing them.
        #[arg(long)]
        keep_raw_files: bool,
    },
}

fn try_main() -> anyhow::Result<()> {
    let args = Args::try_parse()?;
    if !Path::new(&args.config_filepath).exists() {
        return Err(anyhow!("Config file {} not found", &args.config_filepath));
    }
    let config_contents = read_to_string(&args.config_filepath)?;
    let config: Config = serde_yaml::from_str(&config_contents)?;

    let catalog = GeofabrikCatalog::load(&config.catalog.index_url, &config.data_dir, args.update)?;
    let downloader = GeofabrikDownloader::new(&catalog, &config.data_dir)?;

    match args.command {
        Command::Ensure {
            region,
            file_format,
        } => {
            let filepaths = make_subregion_osm_data_available(
                &catalog,
                &downloader,
                &region,
                file_format,
                args.update,
                config.catalog.match_threshold,
            )?;
            log::info!("{} extracts available", filepaths.len());
        }
        Command::Import { keep_raw_files } => {
            let options = ImportOptions {
                read: ReadOptions {
                    update: args.update,
                    download_confirmation_required: config.import.download_confirmation_required,
                    file_size_limit_mb: config.import.file_size_limit_mb,
                    cache_parsed: config.import.cache_parsed,
                },
                rm_raw_file: config.import.rm_raw_file && !keep_raw_files,
                buffer_release_threshold: config.import.buffer_release_threshold,
            };
            let mut database = PostgresOsmDatabase::connect(&config.database)?;
            let opener = GdalExtractOpener;
            let reader = GdalStructuredReader::new(&downloader, &opener);
            let importer = ExtractImporter {
                catalog: &catalog,
                downloader: &downloader,
                reader: &reader,
                opener: &opener,
            };
            let report = importer.import_all(&mut database, &options)?;
            if report.failed_subregion_count() > 0 || report.failed_layer_count() > 0 {
                log::warn!(
                    "{} subregions and {} layers could not be imported",
                    report.failed_subregion_count(),
                    report.failed_layer_count()
                );
            }
        }
    }
    Ok(())
}

fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    env_logger::init();
    if let Err(e) = try_main() {
        eprintln!("Error: {:?}", e);
        std::process::exit(1)
    }
}
