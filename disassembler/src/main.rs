use anyhow::{bail, Context, Result};
use clap::Parser as ClapParser;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use rlvm_core::format::scenario::instruction::ElementKind;
use rlvm_core::{Archive, Instruction, LoaderConfig, Scenario};
use rlvm_nls::Encoding;

#[derive(Debug, Serialize, Deserialize)]
pub struct Element {
    offset: usize,
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    opcode: Option<String>,
    operands: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    targets: Vec<usize>,
}

impl Element {
    pub fn from_instruction(inst: &Instruction) -> Self {
        let (opcode, operands, targets) = match inst.kind() {
            ElementKind::Command(cmd) => (
                Some(cmd.key.to_string()),
                command_operands(inst),
                cmd.targets.clone(),
            ),
            ElementKind::Comma => (None, vec![], vec![]),
            _ => (None, vec![inst.to_string()], vec![]),
        };
        Self {
            offset: inst.offset(),
            kind: inst.kind().name().to_string(),
            opcode,
            operands,
            targets,
        }
    }
}

fn command_operands(inst: &Instruction) -> Vec<String> {
    match inst.parameters() {
        Ok(params) => params.iter().map(|p| p.to_string()).collect(),
        Err(e) => {
            log::warn!("0x{:x}: {}", inst.offset(), e);
            (0..inst.param_count())
                .map(|i| format!("{{RAW : {}}}", hex_dump(inst.param_bytes(i).unwrap_or_default())))
                .collect()
        }
    }
}

fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScenarioListing {
    number: u16,
    encoding: String,
    entrypoints: BTreeMap<i32, usize>,
    elements: Vec<Element>,
}

impl ScenarioListing {
    pub fn new(scenario: &Scenario) -> Self {
        Self {
            number: scenario.number(),
            encoding: scenario.encoding().to_string(),
            entrypoints: scenario.entrypoints().clone(),
            elements: scenario.iter().map(Element::from_instruction).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScenarioEntry {
    number: u16,
    listing: PathBuf,
    elements: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RlvmProject {
    encoding: String,
    regname: String,
    scenarios: Vec<ScenarioEntry>,
    failed: Vec<u16>,
}

pub struct Disassembler {
    archive: Archive,
    encoding: Encoding,
}

impl Disassembler {
    pub fn new(config: &LoaderConfig) -> Result<Self> {
        let archive = config
            .open_archive()
            .with_context(|| format!("opening {}", config.seen.display()))?;
        let encoding = config.encoding_for(&archive);
        Ok(Self { archive, encoding })
    }

    pub fn write_listings(&self, path: impl AsRef<Path>) -> Result<()> {
        let output = path.as_ref();
        if !output.exists() {
            std::fs::create_dir_all(output)?;
        }

        let mut scenarios = vec![];
        let mut failed = vec![];
        for number in self.archive.scenario_numbers() {
            let scenario = match self.archive.scenario(number) {
                Ok(Some(scenario)) => scenario,
                Ok(None) => continue,
                Err(e) => {
                    log::error!("skipping scenario {:04}: {}", number, e);
                    failed.push(number);
                    continue;
                }
            };

            let listing = PathBuf::from(format!("seen{:04}.yaml", number));
            let mut writer = std::fs::File::create(output.join(&listing))?;
            serde_yaml::to_writer(&mut writer, &ScenarioListing::new(scenario))?;
            log::info!("scenario {:04}: {} elements", number, scenario.len());

            scenarios.push(ScenarioEntry {
                number,
                listing,
                elements: scenario.len(),
            });
        }

        let project = RlvmProject {
            encoding: self.encoding.to_string(),
            regname: String::from_utf8_lossy(self.archive.regname()).into_owned(),
            scenarios,
            failed,
        };

        let toml_project = output.join("project.toml");
        let mut writer = std::fs::File::create(toml_project)?;
        let serialized_string = toml::to_string_pretty(&project)?;
        writer.write_all(serialized_string.as_bytes())?;

        Ok(())
    }
}

/// Dump every scenario of a RealLive SEEN.TXT as YAML
#[derive(ClapParser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, required_unless_present = "config")]
    input: Option<PathBuf>,

    #[arg(short, long, required = true)]
    output: PathBuf,

    #[arg(short, long)]
    gameexe: Option<PathBuf>,

    /// overrides #REGNAME from Gameexe.ini
    #[arg(short, long)]
    regname: Option<String>,

    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    encoding: Option<Encoding>,
}

impl Args {
    /// The config file if given, with command line values on top.
    fn loader_config(&self) -> Result<LoaderConfig> {
        let mut config = match &self.config {
            Some(path) => LoaderConfig::load(path)
                .with_context(|| format!("reading {}", path.display()))?,
            None => LoaderConfig::default(),
        };
        if let Some(input) = &self.input {
            config.seen = input.clone();
        }
        if self.gameexe.is_some() {
            config.gameexe = self.gameexe.clone();
        }
        if self.regname.is_some() {
            config.regname = self.regname.clone();
        }
        if self.encoding.is_some() {
            config.encoding = self.encoding;
        }
        if config.seen.as_os_str().is_empty() {
            bail!("no SEEN.TXT given");
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = args.loader_config()?;
    let disassembler = Disassembler::new(&config)?;
    disassembler.write_listings(&args.output)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_overrides() -> Result<()> {
        let args = Args::try_parse_from([
            "disassembler",
            "--input",
            "game/SEEN.TXT",
            "--output",
            "out",
            "--regname",
            "KEY\\LB_EX",
            "--encoding",
            "cp936",
        ])?;
        let config = args.loader_config()?;
        assert_eq!(config.seen, PathBuf::from("game/SEEN.TXT"));
        assert_eq!(config.regname()?, b"KEY\\LB_EX".to_vec());
        assert_eq!(config.encoding, Some(Encoding::Gbk));
        assert_eq!(config.gameexe, None);
        Ok(())
    }

    #[test]
    fn input_or_config_required() {
        assert!(Args::try_parse_from(["disassembler", "--output", "out"]).is_err());
    }

    #[test]
    fn hex() {
        assert_eq!(hex_dump(&[0x24, 0xff, 0x01]), "24 ff 01");
    }
}
