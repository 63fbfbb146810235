use anyhow::{anyhow, Context};
use indicatif::ProgressBar;
use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::catalog::index::{FileFormat, GeofabrikCatalog, USER_AGENT};

/// Makes extract files of catalog subregions available on the local filesystem.
pub trait ExtractDownloader {
    /// Where the extract of `subregion` in `format` is (or would be) stored.
    fn local_path(&self, subregion: &str, format: FileFormat) -> anyhow::Result<PathBuf>;

    /// Download the extract unless it already exists locally and `update` is false.
    fn download(
        &self,
        subregion: &str,
        format: FileFormat,
        update: bool,
    ) -> anyhow::Result<PathBuf>;

    fn remove(&self, path: &Path) -> io::Result<()> {
        remove_subregion_osm_file(path)
    }
}

pub struct GeofabrikDownloader<'a> {
    catalog: &'a GeofabrikCatalog,
    extracts_dir: PathBuf,
    client: reqwest::blocking::Client,
}

impl<'a> GeofabrikDownloader<'a> {
    pub fn new(catalog: &'a GeofabrikCatalog, data_dir: &Path) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            // Country extracts take far longer than the default timeout.
            .timeout(None)
            .build()?;
        Ok(Self {
            catalog,
            extracts_dir: data_dir.join("extracts"),
            client,
        })
    }
}

impl ExtractDownloader for GeofabrikDownloader<'_> {
    fn local_path(&self, subregion: &str, format: FileFormat) -> anyhow::Result<PathBuf> {
        let url = self.catalog.download_url(subregion, format)?;
        get_filepath_for_url(&self.extracts_dir, url)
    }

    fn download(
        &self,
        subregion: &str,
        format: FileFormat,
        update: bool,
    ) -> anyhow::Result<PathBuf> {
        let url = self.catalog.download_url(subregion, format)?;
        let output_filepath = get_filepath_for_url(&self.extracts_dir, url)?;
        if output_filepath.exists() && !update {
            log::info!(
                "Local file exists for {:?}: {:?}",
                subregion,
                output_filepath
            );
            return Ok(output_filepath);
        }

        log::info!("Downloading {} extract of {:?} from {}", format, subregion, url);
        if let Some(parent) = output_filepath.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut response = self.client.get(url).send()?.error_for_status()?;
        let bar = match response.content_length() {
            Some(length) => ProgressBar::new(length),
            None => ProgressBar::new_spinner(),
        };
        copy_into_place(&mut response, &bar, &output_filepath)
            .with_context(|| format!("Downloading {}", url))?;
        Ok(output_filepath)
    }
}

/// Map a download URL to a path below `extracts_dir` mirroring the URL's path, e.g.
/// `.../africa/algeria-latest.osm.pbf` -> `<extracts_dir>/africa/algeria-latest.osm.pbf`.
pub fn get_filepath_for_url(extracts_dir: &Path, url: &str) -> anyhow::Result<PathBuf> {
    let parsed = reqwest::Url::parse(url).with_context(|| format!("Parsing URL {}", url))?;
    let segments: Vec<&str> = parsed
        .path_segments()
        .ok_or_else(|| anyhow!("URL {} has no path", url))?
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .collect();
    if segments.is_empty() {
        return Err(anyhow!("URL {} does not name a file", url));
    }
    Ok(segments
        .into_iter()
        .fold(extracts_dir.to_path_buf(), |path, segment| path.join(segment)))
}

/// Stream `source` into a `.part` file next to `output_filepath` and rename it into place
/// once complete. The partial file is removed if the copy fails.
fn copy_into_place(
    source: &mut impl io::Read,
    bar: &ProgressBar,
    output_filepath: &Path,
) -> anyhow::Result<()> {
    let partial_filepath = get_partial_filepath(output_filepath);
    let file = fs::File::create(&partial_filepath)
        .with_context(|| format!("Creating {:?}", partial_filepath))?;
    let mut writer = bar.wrap_write(file);
    let copied = io::copy(source, &mut writer);
    bar.finish_and_clear();
    drop(writer);
    if let Err(err) = copied {
        if let Err(remove_err) = remove_subregion_osm_file(&partial_filepath) {
            log::warn!("Could not remove {:?}: {}", partial_filepath, remove_err);
        }
        return Err(err.into());
    }
    fs::rename(&partial_filepath, output_filepath)?;
    Ok(())
}

fn get_partial_filepath(filepath: &Path) -> PathBuf {
    let mut partial = filepath.as_os_str().to_owned();
    partial.push(".part");
    PathBuf::from(partial)
}

/// Delete a downloaded extract. A file that does not exist counts as removed.
pub fn remove_subregion_osm_file(filepath: &Path) -> io::Result<()> {
    match fs::remove_file(filepath) {
        Ok(()) => {
            log::info!("Removed {:?}", filepath);
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            log::debug!("{:?} was already removed", filepath);
            Ok(())
        }
        Err(err) => Err(err),
    }
}
