//! Command line and `mvs.conf` handling.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use mvsd_consensus::money::Amount;
use mvsd_consensus::{ConsensusMode, Network};
use mvsd_log::{Format, Level, LogOptions};

use crate::assembler::{AssemblerPolicy, MinerKey};

pub const CONF_FILE_NAME: &str = "mvs.conf";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_MINER_POLL_MS: u64 = 1_000;
const DEFAULT_MEMPOOL_MAX_MB: u64 = 300;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ConfigError {}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backend {
    Memory,
    Fjall,
}

impl Backend {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "memory" => Some(Self::Memory),
            "fjall" => Some(Self::Fjall),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub backend: Backend,
    pub data_dir: PathBuf,
    pub conf_path: PathBuf,
    pub network: Network,
    pub log: LogOptions,
    pub mine: bool,
    pub miner_address: Option<String>,
    pub miner_key: Option<MinerKey>,
    pub consensus: ConsensusMode,
    pub mining_asset: Option<String>,
    pub miner_poll: Duration,
    pub policy: AssemblerPolicy,
    /// Overrides the network's minimum transaction fee.
    pub min_tx_fee: Option<Amount>,
    pub mempool_max_bytes: usize,
}

#[derive(Clone, Debug)]
pub enum CliAction {
    Run(Box<Config>),
    PrintHelp,
    PrintVersion,
}

fn next_value<I>(args: &mut I, flag: &str) -> Result<String, ConfigError>
where
    I: Iterator<Item = String>,
{
    args.next()
        .ok_or_else(|| ConfigError::new(format!("missing value for {flag}\n{}", usage())))
}

fn parse_flag<T: FromStr>(value: &str, flag: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::new(format!("invalid {flag} '{value}'\n{}", usage())))
}

fn parse_conf<T: FromStr>(raw: &str, key: &str, conf_file: &Path) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| {
        ConfigError::new(format!("invalid {key} '{raw}' in {}", conf_file.display()))
    })
}

fn parse_miner_key(raw: &str) -> Result<MinerKey, String> {
    let bytes = hex::decode(raw.trim()).map_err(|err| err.to_string())?;
    MinerKey::from_slice(&bytes).map_err(|err| err.to_string())
}

fn parse_mode(raw: &str) -> Option<ConsensusMode> {
    ConsensusMode::parse(raw.trim())
}

pub fn parse_args() -> Result<CliAction, ConfigError> {
    parse_args_from(std::env::args().skip(1))
}

pub fn parse_args_from<I>(raw_args: I) -> Result<CliAction, ConfigError>
where
    I: IntoIterator<Item = String>,
{
    let mut backend = Backend::Fjall;
    let mut backend_set = false;
    let mut data_dir: Option<PathBuf> = None;
    let mut conf_path: Option<PathBuf> = None;
    let mut network = Network::Mainnet;
    let mut network_set = false;
    let mut log = LogOptions::default();
    let mut log_level_set = false;
    let mut log_format_set = false;
    let mut log_timestamps_set = false;
    let mut mine = false;
    let mut mine_set = false;
    let mut miner_address: Option<String> = None;
    let mut miner_key: Option<MinerKey> = None;
    let mut consensus = ConsensusMode::Pow;
    let mut consensus_set = false;
    let mut mining_asset: Option<String> = None;
    let mut miner_poll_ms = DEFAULT_MINER_POLL_MS;
    let mut miner_poll_set = false;
    let mut policy = AssemblerPolicy::default();
    let mut block_max_size_set = false;
    let mut block_priority_size_set = false;
    let mut block_min_size_set = false;
    let mut min_tx_fee: Option<Amount> = None;
    let mut mempool_max_mb = DEFAULT_MEMPOOL_MAX_MB;
    let mut mempool_max_set = false;
    let mut args = raw_args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" | "help" => return Ok(CliAction::PrintHelp),
            "--version" | "-V" | "version" => return Ok(CliAction::PrintVersion),
            "--backend" => {
                let value = next_value(&mut args, "--backend")?;
                backend = Backend::parse(&value).ok_or_else(|| {
                    ConfigError::new(format!("invalid backend '{value}'\n{}", usage()))
                })?;
                backend_set = true;
            }
            "--data-dir" => {
                data_dir = Some(PathBuf::from(next_value(&mut args, "--data-dir")?));
            }
            "--conf" => {
                conf_path = Some(PathBuf::from(next_value(&mut args, "--conf")?));
            }
            "--network" => {
                let value = next_value(&mut args, "--network")?;
                network = value.parse::<Network>().map_err(|err| {
                    ConfigError::new(format!("{err} (expected mainnet|testnet|regtest)\n{}", usage()))
                })?;
                network_set = true;
            }
            "--regtest" => {
                network = Network::Regtest;
                network_set = true;
            }
            "--testnet" => {
                network = Network::Testnet;
                network_set = true;
            }
            "--log-level" => {
                let value = next_value(&mut args, "--log-level")?;
                log.level = Level::parse(&value).ok_or_else(|| {
                    ConfigError::new(format!("invalid log level '{value}'\n{}", usage()))
                })?;
                log_level_set = true;
            }
            "--log-format" => {
                let value = next_value(&mut args, "--log-format")?;
                log.format = Format::parse(&value).ok_or_else(|| {
                    ConfigError::new(format!("invalid log format '{value}'\n{}", usage()))
                })?;
                log_format_set = true;
            }
            "--log-timestamps" => {
                log.timestamps = true;
                log_timestamps_set = true;
            }
            "--no-log-timestamps" => {
                log.timestamps = false;
                log_timestamps_set = true;
            }
            "--mine" => {
                mine = true;
                mine_set = true;
            }
            "--miner-address" => {
                miner_address = Some(next_value(&mut args, "--miner-address")?);
            }
            "--miner-key" => {
                let value = next_value(&mut args, "--miner-key")?;
                miner_key = Some(parse_miner_key(&value).map_err(|err| {
                    ConfigError::new(format!("invalid --miner-key: {err}\n{}", usage()))
                })?);
            }
            "--consensus" => {
                let value = next_value(&mut args, "--consensus")?;
                consensus = parse_mode(&value).ok_or_else(|| {
                    ConfigError::new(format!(
                        "invalid consensus '{value}' (expected pow|pos|dpos)\n{}",
                        usage()
                    ))
                })?;
                consensus_set = true;
            }
            "--mining-asset" => {
                mining_asset = Some(next_value(&mut args, "--mining-asset")?);
            }
            "--miner-poll-ms" => {
                let value = next_value(&mut args, "--miner-poll-ms")?;
                miner_poll_ms = parse_flag(&value, "--miner-poll-ms")?;
                miner_poll_set = true;
            }
            "--block-max-size" => {
                let value = next_value(&mut args, "--block-max-size")?;
                policy.block_max_size = parse_flag(&value, "--block-max-size")?;
                block_max_size_set = true;
            }
            "--block-priority-size" => {
                let value = next_value(&mut args, "--block-priority-size")?;
                policy.block_priority_size = parse_flag(&value, "--block-priority-size")?;
                block_priority_size_set = true;
            }
            "--block-min-size" => {
                let value = next_value(&mut args, "--block-min-size")?;
                policy.block_min_size = parse_flag(&value, "--block-min-size")?;
                block_min_size_set = true;
            }
            "--min-tx-fee" => {
                let value = next_value(&mut args, "--min-tx-fee")?;
                min_tx_fee = Some(parse_flag(&value, "--min-tx-fee")?);
            }
            "--mempool-max-mb" => {
                let value = next_value(&mut args, "--mempool-max-mb")?;
                mempool_max_mb = parse_flag(&value, "--mempool-max-mb")?;
                mempool_max_set = true;
            }
            other => {
                return Err(ConfigError::new(format!(
                    "unknown argument '{other}'\n{}",
                    usage()
                )));
            }
        }
    }

    let data_dir = data_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    let conf_file = conf_path.unwrap_or_else(|| data_dir.join(CONF_FILE_NAME));
    if let Some(conf) = load_conf(&conf_file)? {
        let last = |key: &str| conf.get(key).and_then(|values| values.last());

        if !network_set {
            if let Some(raw) = last("network") {
                network = raw.parse::<Network>().map_err(|err| {
                    ConfigError::new(format!("{err} in {}", conf_file.display()))
                })?;
            } else if let Some(raw) = last("regtest") {
                if conf_bool(raw, "regtest", &conf_file)? {
                    network = Network::Regtest;
                }
            }
            if network == Network::Mainnet {
                if let Some(raw) = last("testnet") {
                    if conf_bool(raw, "testnet", &conf_file)? {
                        network = Network::Testnet;
                    }
                }
            }
        }
        if !backend_set {
            if let Some(raw) = last("backend") {
                backend = Backend::parse(raw.trim()).ok_or_else(|| {
                    ConfigError::new(format!("invalid backend '{raw}' in {}", conf_file.display()))
                })?;
            }
        }
        if !log_level_set {
            if let Some(raw) = last("loglevel") {
                log.level = Level::parse(raw).ok_or_else(|| {
                    ConfigError::new(format!("invalid loglevel '{raw}' in {}", conf_file.display()))
                })?;
            }
        }
        if !log_format_set {
            if let Some(raw) = last("logformat") {
                log.format = Format::parse(raw).ok_or_else(|| {
                    ConfigError::new(format!("invalid logformat '{raw}' in {}", conf_file.display()))
                })?;
            }
        }
        if !log_timestamps_set {
            if let Some(raw) = last("logtimestamps") {
                log.timestamps = conf_bool(raw, "logtimestamps", &conf_file)?;
            }
        }
        if !mine_set {
            if let Some(raw) = last("gen") {
                mine = conf_bool(raw, "gen", &conf_file)?;
            }
        }
        if miner_address.is_none() {
            miner_address = last("mineraddress").cloned();
        }
        if miner_key.is_none() {
            if let Some(raw) = last("minerkey") {
                miner_key = Some(parse_miner_key(raw).map_err(|err| {
                    ConfigError::new(format!("invalid minerkey in {}: {err}", conf_file.display()))
                })?);
            }
        }
        if !consensus_set {
            if let Some(raw) = last("consensus") {
                consensus = parse_mode(raw).ok_or_else(|| {
                    ConfigError::new(format!("invalid consensus '{raw}' in {}", conf_file.display()))
                })?;
            }
        }
        if mining_asset.is_none() {
            mining_asset = last("miningasset").cloned();
        }
        if !miner_poll_set {
            if let Some(raw) = last("minerpollms") {
                miner_poll_ms = parse_conf(raw, "minerpollms", &conf_file)?;
            }
        }
        if !block_max_size_set {
            if let Some(raw) = last("blockmaxsize") {
                policy.block_max_size = parse_conf(raw, "blockmaxsize", &conf_file)?;
            }
        }
        if !block_priority_size_set {
            if let Some(raw) = last("blockprioritysize") {
                policy.block_priority_size = parse_conf(raw, "blockprioritysize", &conf_file)?;
            }
        }
        if !block_min_size_set {
            if let Some(raw) = last("blockminsize") {
                policy.block_min_size = parse_conf(raw, "blockminsize", &conf_file)?;
            }
        }
        if min_tx_fee.is_none() {
            if let Some(raw) = last("mintxfee") {
                min_tx_fee = Some(parse_conf(raw, "mintxfee", &conf_file)?);
            }
        }
        if !mempool_max_set {
            if let Some(raw) = last("maxmempool") {
                mempool_max_mb = parse_conf(raw, "maxmempool", &conf_file)?;
            }
        }
    }

    if mine && miner_address.is_none() {
        return Err(ConfigError::new(format!(
            "--mine requires --miner-address\n{}",
            usage()
        )));
    }
    if mine && consensus != ConsensusMode::Pow && miner_key.is_none() {
        return Err(ConfigError::new(format!(
            "{} mining requires --miner-key\n{}",
            consensus.as_str(),
            usage()
        )));
    }
    if miner_poll_ms == 0 {
        return Err(ConfigError::new("miner poll interval must be positive"));
    }

    Ok(CliAction::Run(Box::new(Config {
        backend,
        data_dir,
        conf_path: conf_file,
        network,
        log,
        mine,
        miner_address,
        miner_key,
        consensus,
        mining_asset,
        miner_poll: Duration::from_millis(miner_poll_ms),
        policy: policy.normalized(),
        min_tx_fee,
        mempool_max_bytes: usize::try_from(mempool_max_mb.saturating_mul(1024 * 1024))
            .unwrap_or(usize::MAX),
    })))
}

fn conf_bool(raw: &str, key: &str, conf_file: &Path) -> Result<bool, ConfigError> {
    parse_conf_bool(raw).ok_or_else(|| {
        ConfigError::new(format!(
            "invalid {key} value '{raw}' in {}",
            conf_file.display()
        ))
    })
}

/// Reads `key=value` lines; a bare key means `1`. Missing files are not an error.
pub fn load_conf(path: &Path) -> Result<Option<HashMap<String, Vec<String>>>, ConfigError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(ConfigError::new(format!(
                "failed to read {}: {err}",
                path.display()
            )))
        }
    };

    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for raw_line in contents.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(idx) = line.find('#') {
            line = &line[..idx];
        }
        if let Some(idx) = line.find(';') {
            line = &line[..idx];
        }
        line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, "1"),
        };
        if key.is_empty() {
            continue;
        }
        out.entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    Ok(Some(out))
}

pub fn parse_conf_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        return Some(true);
    }
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

pub fn usage() -> String {
    [
        "Usage:",
        "  mvsd [options]",
        "",
        "Options:",
        "  --help, -h  Print this help and exit",
        "  --version, -V  Print version and exit",
        "  --network  mainnet|testnet|regtest (default: mainnet)",
        "  --regtest, --testnet  Shorthands for --network",
        "  --data-dir  Base data directory (default: ./data)",
        "  --conf  Config file path (default: <data-dir>/mvs.conf)",
        "  --backend  Storage backend: memory|fjall (default: fjall)",
        "  --log-level  error|warn|info|debug|trace (default: info)",
        "  --log-format  text|json (default: text)",
        "  --log-timestamps, --no-log-timestamps  Toggle timestamps in text logs",
        "  --mine  Run the block producer",
        "  --miner-address  Address the coinbase pays",
        "  --miner-key  Hex secret key signing stake and witness blocks",
        "  --consensus  pow|pos|dpos (default: pow)",
        "  --mining-asset  Symbol with a mining certificate to add to coinbases",
        "  --miner-poll-ms  Miner poll interval (default: 1000)",
        "  --block-max-size  Largest candidate block in bytes",
        "  --block-priority-size  Bytes taken by fee rate before coin-age priority",
        "  --block-min-size  Size below which free transactions are included",
        "  --min-tx-fee  Override the minimum transaction fee",
        "  --mempool-max-mb  Mempool size cap (default: 300)",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| arg.to_string()).collect()
    }

    fn run_config(raw: &[&str]) -> Config {
        match parse_args_from(args(raw)).expect("parse") {
            CliAction::Run(config) => *config,
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn conf_parsing_handles_comments_and_bare_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONF_FILE_NAME);
        fs::write(
            &path,
            "# comment\nregtest\nMinerAddress = abc ; trailing\naddnode=a\naddnode=b\n",
        )
        .expect("write conf");
        let conf = load_conf(&path).expect("load").expect("present");
        assert_eq!(conf.get("regtest"), Some(&vec!["1".to_string()]));
        assert_eq!(conf.get("mineraddress"), Some(&vec!["abc".to_string()]));
        assert_eq!(conf.get("addnode").map(Vec::len), Some(2));
        assert!(load_conf(&dir.path().join("missing.conf")).expect("load").is_none());
    }

    #[test]
    fn cli_values_override_conf_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join(CONF_FILE_NAME),
            "testnet=1\nloglevel=debug\nblockmaxsize=5000\nconsensus=pos\n",
        )
        .expect("write conf");
        let data_dir = dir.path().to_string_lossy().to_string();
        let config = run_config(&[
            "--data-dir",
            &data_dir,
            "--network",
            "regtest",
            "--block-max-size",
            "20000",
        ]);
        assert_eq!(config.network, Network::Regtest);
        assert_eq!(config.log.level, Level::Debug);
        assert_eq!(config.policy.block_max_size, 20_000);
        assert_eq!(config.consensus, ConsensusMode::Pos);
    }

    #[test]
    fn mining_requires_an_address_and_stake_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data_dir = dir.path().to_string_lossy().to_string();
        assert!(parse_args_from(args(&["--data-dir", &data_dir, "--mine"])).is_err());
        assert!(parse_args_from(args(&[
            "--data-dir",
            &data_dir,
            "--mine",
            "--miner-address",
            "x",
            "--consensus",
            "dpos",
        ]))
        .is_err());
        let key = hex::encode([7u8; 32]);
        let config = run_config(&[
            "--data-dir",
            &data_dir,
            "--mine",
            "--miner-address",
            "x",
            "--consensus",
            "pos",
            "--miner-key",
            &key,
        ]);
        assert!(config.mine);
        assert!(config.miner_key.is_some());
    }

    #[test]
    fn bad_values_are_reported() {
        let err = parse_args_from(args(&["--backend", "rocks"])).expect_err("bad backend");
        assert!(err.message.starts_with("invalid backend 'rocks'"));
        let err = parse_args_from(args(&["--block-max-size"])).expect_err("missing value");
        assert!(err.message.starts_with("missing value for --block-max-size"));
        assert!(matches!(
            parse_args_from(args(&["--help"])),
            Ok(CliAction::PrintHelp)
        ));
        assert_eq!(parse_conf_bool(""), Some(true));
        assert_eq!(parse_conf_bool("No"), Some(false));
        assert_eq!(parse_conf_bool("maybe"), None);
    }
}
