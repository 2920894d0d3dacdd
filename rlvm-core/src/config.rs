use std::path::{Path, PathBuf};

use rlvm_nls::Encoding;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::format::archive::Archive;
use crate::format::gameexe::Gameexe;

/// Where to find a game's scenarios and how to read them.
///
/// ```toml
/// seen = "SEEN.TXT"
/// gameexe = "Gameexe.ini"
/// regname = "KEY\\CLANNAD_FV"
/// encoding = "sjis"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub seen: PathBuf,
    pub gameexe: Option<PathBuf>,
    /// Overrides `#REGNAME` from `Gameexe.ini`.
    pub regname: Option<String>,
    /// Overrides the encoding declared by scenario headers.
    pub encoding: Option<Encoding>,
}

impl LoaderConfig {
    pub fn new(seen: impl Into<PathBuf>) -> Self {
        Self {
            seen: seen.into(),
            ..Default::default()
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        if config.seen.as_os_str().is_empty() {
            return Err(Error::Config("`seen` must name the scenario container".into()));
        }
        Ok(config)
    }

    /// Reads a config file. Relative paths in it are taken from the file's
    /// directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::from_toml(&std::fs::read_to_string(path)?)?;
        if let Some(dir) = path.parent() {
            config.seen = dir.join(&config.seen);
            config.gameexe = config.gameexe.map(|g| dir.join(g));
        }
        debug!(?config, "loaded loader config");
        Ok(config)
    }

    pub fn gameexe(&self) -> Result<Option<Gameexe>> {
        self.gameexe.as_ref().map(Gameexe::load).transpose()
    }

    /// The explicit registry name, else `#REGNAME` from `Gameexe.ini`, else
    /// empty.
    pub fn regname(&self) -> Result<Vec<u8>> {
        if let Some(name) = &self.regname {
            return Ok(name.as_bytes().to_vec());
        }
        Ok(self
            .gameexe()?
            .and_then(|g| g.regname().map(<[u8]>::to_vec))
            .unwrap_or_default())
    }

    pub fn open_archive(&self) -> Result<Archive> {
        let regname = self.regname()?;
        let archive = Archive::open(&self.seen, &regname)?;
        info!(
            path = %self.seen.display(),
            scenarios = archive.len(),
            "archive ready"
        );
        Ok(archive)
    }

    /// The forced encoding, or the archive's probable one.
    pub fn encoding_for(&self, archive: &Archive) -> Encoding {
        self.encoding.unwrap_or_else(|| archive.probable_encoding())
    }
}
