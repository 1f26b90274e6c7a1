use std::env;
use std::fs::File;
use std::io::BufReader;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context as _;
use camino::{Utf8Path, Utf8PathBuf};
use tap::prelude::*;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_SNMP_PORT: u16 = 1161;
pub const DEFAULT_COMMUNITY: &str = "public";
pub const DEFAULT_TELEMETRY_PORT: u16 = 4318;
pub const DEFAULT_METRICS_PATH: &str = "/v1/metrics";

#[derive(Debug, Clone)]
pub struct SnmpConf {
    pub bind_addr: SocketAddr,
    pub community: String,
}

#[derive(Debug, Clone)]
pub struct TelemetryConf {
    pub bind_addr: SocketAddr,
    pub metrics_path: String,
}

#[derive(Debug, Clone)]
pub struct Conf {
    pub log_file: Utf8PathBuf,
    pub verbosity_profile: dto::VerbosityProfile,
    pub snmp: SnmpConf,
    pub telemetry: TelemetryConf,
    pub debug: dto::DebugConf,
}

impl Conf {
    pub fn from_conf_file(conf_file: &dto::ConfFile) -> anyhow::Result<Self> {
        let data_dir = get_data_dir();

        let log_file = conf_file
            .log_file
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from("netdouble"))
            .pipe_ref(|path| normalize_data_path(path, &data_dir));

        let snmp_file = conf_file.snmp.clone().unwrap_or_default();
        let snmp = SnmpConf {
            bind_addr: resolve_bind_addr(
                snmp_file.bind_address.as_deref().unwrap_or(DEFAULT_BIND_ADDRESS),
                snmp_file.bind_port.unwrap_or(DEFAULT_SNMP_PORT),
            )
            .context("invalid SNMP listener address")?,
            community: snmp_file.community.unwrap_or_else(|| DEFAULT_COMMUNITY.to_owned()),
        };

        let telemetry_file = conf_file.telemetry.clone().unwrap_or_default();
        let metrics_path = telemetry_file
            .metrics_path
            .unwrap_or_else(|| DEFAULT_METRICS_PATH.to_owned());
        anyhow::ensure!(
            metrics_path.starts_with('/'),
            "telemetry metrics path must start with `/`"
        );
        let telemetry = TelemetryConf {
            bind_addr: resolve_bind_addr(
                telemetry_file.bind_address.as_deref().unwrap_or(DEFAULT_BIND_ADDRESS),
                telemetry_file.bind_port.unwrap_or(DEFAULT_TELEMETRY_PORT),
            )
            .context("invalid telemetry listener address")?,
            metrics_path,
        };

        Ok(Conf {
            log_file,
            verbosity_profile: conf_file.verbosity_profile.unwrap_or_default(),
            snmp,
            telemetry,
            debug: conf_file.debug.clone().unwrap_or_default(),
        })
    }
}

fn resolve_bind_addr(address: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let ip = address
        .parse::<IpAddr>()
        .with_context(|| format!("invalid IP address: {address}"))?;
    Ok(SocketAddr::new(ip, port))
}

/// Configuration Handle, source of truth for current configuration state
#[derive(Clone)]
pub struct ConfHandle {
    inner: Arc<ConfHandleInner>,
}

struct ConfHandleInner {
    conf: parking_lot::RwLock<Arc<Conf>>,
    conf_file: parking_lot::RwLock<Arc<dto::ConfFile>>,
}

impl ConfHandle {
    /// Initializes configuration for this instance.
    ///
    /// It's best to call this only once to avoid inconsistencies.
    pub fn init() -> anyhow::Result<Self> {
        let conf_file = load_conf_file_or_generate_new()?;
        let conf = Conf::from_conf_file(&conf_file).context("invalid configuration file")?;

        Ok(Self {
            inner: Arc::new(ConfHandleInner {
                conf: parking_lot::RwLock::new(Arc::new(conf)),
                conf_file: parking_lot::RwLock::new(Arc::new(conf_file)),
            }),
        })
    }

    /// Returns current configuration state (do not hold it forever as it may become outdated)
    pub fn get_conf(&self) -> Arc<Conf> {
        self.inner.conf.read().clone()
    }

    /// Returns current configuration file state (do not hold it forever as it may become outdated)
    pub fn get_conf_file(&self) -> Arc<dto::ConfFile> {
        self.inner.conf_file.read().clone()
    }
}

fn save_config(conf: &dto::ConfFile) -> anyhow::Result<()> {
    let conf_file_path = get_conf_file_path();
    let json = serde_json::to_string_pretty(conf).context("failed JSON serialization of configuration")?;
    std::fs::write(&conf_file_path, json).with_context(|| format!("failed to write file at {conf_file_path}"))?;
    Ok(())
}

pub fn get_data_dir() -> Utf8PathBuf {
    if let Ok(config_path_env) = env::var("NETDOUBLE_CONFIG_PATH") {
        Utf8PathBuf::from(config_path_env)
    } else if cfg!(target_os = "windows") {
        let program_data = env::var("ProgramData").expect("ProgramData env variable should be set on Windows");
        Utf8PathBuf::from(program_data).join("netdouble")
    } else if cfg!(target_os = "macos") {
        Utf8PathBuf::from("/Library/Application Support/netdouble")
    } else {
        Utf8PathBuf::from("/etc/netdouble")
    }
}

fn get_conf_file_path() -> Utf8PathBuf {
    get_data_dir().join("netdouble.json")
}

fn normalize_data_path(path: &Utf8Path, data_dir: &Utf8Path) -> Utf8PathBuf {
    if path.is_absolute() {
        path.to_owned()
    } else {
        data_dir.join(path)
    }
}

fn load_conf_file(conf_path: &Utf8Path) -> anyhow::Result<Option<dto::ConfFile>> {
    match File::open(conf_path) {
        Ok(file) => BufReader::new(file)
            .pipe(serde_json::from_reader)
            .map(Some)
            .with_context(|| format!("invalid config file at {conf_path}")),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(anyhow::anyhow!(e).context(format!("couldn't open config file at {conf_path}"))),
    }
}

pub fn load_conf_file_or_generate_new() -> anyhow::Result<dto::ConfFile> {
    let conf_file_path = get_conf_file_path();

    let conf_file = match load_conf_file(&conf_file_path).context("failed to load configuration")? {
        Some(conf_file) => conf_file,
        None => {
            let defaults = dto::ConfFile::generate_new();
            #[allow(clippy::print_stdout)] // the logger is not yet initialized at this point
            {
                println!("Write default configuration to disk…");
            }
            save_config(&defaults).context("failed to save configuration")?;
            defaults
        }
    };

    Ok(conf_file)
}

pub mod dto {
    use serde::{Deserialize, Serialize};

    use super::*;

    /// Source of truth for netdouble configuration
    ///
    /// This struct represents the JSON file used for configuration as close as possible
    /// and is not trying to be too smart.
    #[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct ConfFile {
        /// Verbosity profile
        #[serde(skip_serializing_if = "Option::is_none")]
        pub verbosity_profile: Option<VerbosityProfile>,

        /// Folder and prefix for log files
        #[serde(skip_serializing_if = "Option::is_none")]
        pub log_file: Option<Utf8PathBuf>,

        /// Simulated SNMP agent listener
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub snmp: Option<SnmpListenerConf>,

        /// Simulated telemetry collector listener
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub telemetry: Option<TelemetryListenerConf>,

        /// (Unstable) Unsafe debug options for developers
        #[serde(default, rename = "__debug__", skip_serializing_if = "Option::is_none")]
        pub debug: Option<DebugConf>,

        /// Other unofficial options.
        /// This field is useful so that we can deserialize
        /// and then losslessly serialize back all root keys of the config file.
        #[serde(flatten)]
        pub rest: serde_json::Map<String, serde_json::Value>,
    }

    impl ConfFile {
        pub fn generate_new() -> Self {
            Self {
                verbosity_profile: None,
                log_file: None,
                snmp: Some(SnmpListenerConf {
                    bind_address: Some(DEFAULT_BIND_ADDRESS.to_owned()),
                    bind_port: Some(DEFAULT_SNMP_PORT),
                    community: Some(DEFAULT_COMMUNITY.to_owned()),
                }),
                telemetry: Some(TelemetryListenerConf {
                    bind_address: Some(DEFAULT_BIND_ADDRESS.to_owned()),
                    bind_port: Some(DEFAULT_TELEMETRY_PORT),
                    metrics_path: Some(DEFAULT_METRICS_PATH.to_owned()),
                }),
                debug: None,
                rest: serde_json::Map::new(),
            }
        }
    }

    #[derive(PartialEq, Eq, Debug, Default, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct SnmpListenerConf {
        /// IP address of the UDP socket (127.0.0.1 by default)
        #[serde(skip_serializing_if = "Option::is_none")]
        pub bind_address: Option<String>,

        /// Port of the UDP socket (1161 by default)
        #[serde(skip_serializing_if = "Option::is_none")]
        pub bind_port: Option<u16>,

        /// Expected community string ("public" by default)
        #[serde(skip_serializing_if = "Option::is_none")]
        pub community: Option<String>,
    }

    #[derive(PartialEq, Eq, Debug, Default, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct TelemetryListenerConf {
        /// IP address of the TCP listener (127.0.0.1 by default)
        #[serde(skip_serializing_if = "Option::is_none")]
        pub bind_address: Option<String>,

        /// Port of the TCP listener (4318 by default)
        #[serde(skip_serializing_if = "Option::is_none")]
        pub bind_port: Option<u16>,

        /// The only route accepting POSTed payloads ("/v1/metrics" by default)
        #[serde(skip_serializing_if = "Option::is_none")]
        pub metrics_path: Option<String>,
    }

    /// Verbosity profile (pre-defined tracing directives)
    #[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize, Default)]
    pub enum VerbosityProfile {
        /// The default profile, mostly info records
        #[default]
        Default,
        /// Recommended profile for developers
        Debug,
        /// Show all traces
        All,
        /// Only show warnings and errors
        Quiet,
    }

    impl VerbosityProfile {
        pub fn to_log_filter(self) -> &'static str {
            match self {
                VerbosityProfile::Default => "info",
                VerbosityProfile::Debug => "info,netdouble=debug",
                VerbosityProfile::All => "trace",
                VerbosityProfile::Quiet => "warn",
            }
        }
    }

    /// Unsafe debug options that should only ever be used at development stage
    ///
    /// These options might change or get removed without further notice.
    #[derive(PartialEq, Eq, Debug, Default, Clone, Serialize, Deserialize)]
    pub struct DebugConf {
        /// Directives string in the same form as the RUST_LOG environment variable
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub log_directives: Option<String>,
    }

    impl DebugConf {
        pub fn is_default(&self) -> bool {
            Self::default().eq(self)
        }
    }
}
