//! Factory image resolution
//!
//! A factory image is taken from the project directory when present, and
//! downloaded otherwise. The download name is derived from the name of the
//! active build environment: `esp32_app` fetches `esp32_factory.bin`.

use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, info, warn};

use crate::{config::BuildEnv, error::Error};

/// Upper bound for a single factory image download
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(15);
/// Suffix every application environment name ends with
pub const ENV_SUFFIX: &str = "app";
/// Replacement for [ENV_SUFFIX] in the download name
pub const DOWNLOAD_SUFFIX: &str = "factory.bin";

/// Retrieves the contents of a URL
pub trait Fetch {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, Error>;
}

/// [Fetch] over HTTP(S), with [DOWNLOAD_TIMEOUT] applied to the whole request
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::with_timeout(DOWNLOAD_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        HttpFetcher {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, Error> {
        let response = match self.agent.get(url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(status, _)) => {
                return Err(Error::HttpStatus {
                    url: url.to_string(),
                    status,
                })
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(Error::DownloadFailed {
                    url: url.to_string(),
                    source: Box::new(transport),
                })
            }
        };

        if response.status() != 200 {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: response.status(),
            });
        }

        let mut data = Vec::new();
        response.into_reader().read_to_end(&mut data)?;

        Ok(data)
    }
}

/// Derive the factory download name from an environment name
pub fn download_name(env_name: &str) -> Result<String, Error> {
    env_name
        .strip_suffix(ENV_SUFFIX)
        .map(|stem| format!("{stem}{DOWNLOAD_SUFFIX}"))
        .ok_or_else(|| Error::UnexpectedEnvironmentName {
            env_name: env_name.to_string(),
            suffix: ENV_SUFFIX.to_string(),
        })
}

/// Resolves the factory image of a build
pub struct FactoryLocator<'a, F> {
    env: &'a BuildEnv,
    fetcher: F,
}

impl<'a> FactoryLocator<'a, HttpFetcher> {
    pub fn new(env: &'a BuildEnv) -> Self {
        Self::with_fetcher(env, HttpFetcher::new())
    }
}

impl<'a, F> FactoryLocator<'a, F>
where
    F: Fetch,
{
    pub fn with_fetcher(env: &'a BuildEnv, fetcher: F) -> Self {
        FactoryLocator { env, fetcher }
    }

    /// Path of an existing factory image, or `None` after reporting why none
    /// could be found.
    pub fn locate(&self) -> Option<PathBuf> {
        match self.try_locate() {
            Ok(path) => Some(path),
            Err(err) => {
                warn!("{err}");
                None
            }
        }
    }

    /// Path of an existing factory image.
    ///
    /// A local binary takes precedence, the network is only used when no
    /// local binary is configured or the configured one is missing.
    pub fn try_locate(&self) -> Result<PathBuf, Error> {
        let local = self.local_image();
        if let Some(path) = &local {
            if path.is_file() {
                info!("Using local factory binary {}", path.display());
                return Ok(path.clone());
            }
            warn!("Factory binary: {} does not exist!", path.display());
        }

        match &self.env.factory.url {
            Some(url) => self.download(url),
            None => match local {
                Some(path) => Err(Error::FactoryBinaryMissing(path)),
                None => Err(Error::NoFactorySource(self.env.project.env_name.clone())),
            },
        }
    }

    fn local_image(&self) -> Option<PathBuf> {
        let binary = &self.env.factory.binary;
        if binary.is_empty() {
            return None;
        }

        Some(self.env.project_path(format!("{binary}.bin")))
    }

    fn download_dir(&self) -> Result<PathBuf, Error> {
        let dir = self
            .env
            .factory
            .download_dir
            .as_ref()
            .ok_or(Error::DownloadDirNotConfigured)?;
        let dir = self.env.project_path(dir);

        if !dir.is_dir() {
            return Err(Error::DownloadDirMissing(dir));
        }

        Ok(dir)
    }

    fn download(&self, base_url: &str) -> Result<PathBuf, Error> {
        let dir = self.download_dir()?;
        let name = download_name(&self.env.project.env_name)?;
        let url = format!("{}/{}", base_url.trim_end_matches('/'), name);

        debug!("Downloading factory binary from {url}");
        let data = self.fetcher.fetch(&url)?;

        let path = dir.join(&name);
        write_image(&path, &data)?;
        info!(
            "Downloaded factory binary {} ({} bytes)",
            path.display(),
            data.len()
        );

        Ok(path)
    }
}

fn write_image(path: &Path, data: &[u8]) -> Result<(), Error> {
    fs::write(path, data).map_err(|e| Error::FileOpenError(path.display().to_string(), e))
}
