//! Configuração do printfleet carregada a partir de `printfleet.toml`.
//!
//! A struct [`FleetConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `PRINTFLEET_GCODE_ROOT` tem precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "printfleet.toml";

/// Porta padrão do Moonraker.
pub const DEFAULT_MOONRAKER_PORT: u16 = 7125;

/// Uma impressora da frota.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PrinterEndpoint {
    /// Nome amigável; quando ausente usa `host:port`.
    #[serde(default)]
    pub name: Option<String>,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl PrinterEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            name: None,
            host: host.into(),
            port,
        }
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.host, self.port))
    }

    pub fn websocket_url(&self) -> String {
        format!("ws://{}:{}/websocket", self.host, self.port)
    }

    pub fn http_base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Configuração de nível superior carregada de `printfleet.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Diretório raiz dos arquivos gcode fatiados (`<raiz>/<job_id>/<arquivo>`).
    #[serde(default = "default_gcode_root")]
    pub gcode_root: PathBuf,

    /// Arquivo JSON que persiste o armazenamento de jobs.
    #[serde(default = "default_jobs_file")]
    pub jobs_file: PathBuf,

    /// Intervalo do despachante em segundos.
    #[serde(default = "default_dispatch_interval_secs")]
    pub dispatch_interval_secs: u64,

    /// Intervalo de consulta de status durante uma impressão.
    #[serde(default = "default_status_poll_interval_secs")]
    pub status_poll_interval_secs: u64,

    /// Intervalo de atualização de status da frota inteira.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Cadência de verificação do idle-flag em milissegundos.
    #[serde(default = "default_idle_check_interval_ms")]
    pub idle_check_interval_ms: u64,

    /// Tempo máximo de espera por uma resposta da impressora.
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,

    /// Atraso entre novas buscas quando nenhuma impressora está livre.
    #[serde(default = "default_dispatch_retry_ms")]
    pub dispatch_retry_ms: u64,

    #[serde(default)]
    pub printers: Vec<PrinterEndpoint>,
}

fn default_port() -> u16 {
    DEFAULT_MOONRAKER_PORT
}

fn default_gcode_root() -> PathBuf {
    PathBuf::from("gcode")
}

fn default_jobs_file() -> PathBuf {
    PathBuf::from("jobs.json")
}

fn default_dispatch_interval_secs() -> u64 {
    10
}

fn default_status_poll_interval_secs() -> u64 {
    30
}

fn default_refresh_interval_secs() -> u64 {
    30
}

fn default_idle_check_interval_ms() -> u64 {
    1000
}

fn default_response_timeout_secs() -> u64 {
    10
}

fn default_dispatch_retry_ms() -> u64 {
    1000
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            gcode_root: default_gcode_root(),
            jobs_file: default_jobs_file(),
            dispatch_interval_secs: default_dispatch_interval_secs(),
            status_poll_interval_secs: default_status_poll_interval_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
            idle_check_interval_ms: default_idle_check_interval_ms(),
            response_timeout_secs: default_response_timeout_secs(),
            dispatch_retry_ms: default_dispatch_retry_ms(),
            printers: Vec::new(),
        }
    }
}

/// Cadências derivadas da configuração, repassadas às tarefas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub dispatch_interval: Duration,
    pub status_poll_interval: Duration,
    pub refresh_interval: Duration,
    pub idle_check_interval: Duration,
    pub response_timeout: Duration,
    pub dispatch_retry: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        FleetConfig::default().timing()
    }
}

impl FleetConfig {
    /// Carrega a configuração de `path`, ou de `printfleet.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<FleetConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração.
        if let Ok(root) = std::env::var("PRINTFLEET_GCODE_ROOT") {
            if !root.is_empty() {
                config.gcode_root = PathBuf::from(root);
            }
        }

        Ok(config)
    }

    pub fn timing(&self) -> Timing {
        Timing {
            dispatch_interval: Duration::from_secs(self.dispatch_interval_secs),
            status_poll_interval: Duration::from_secs(self.status_poll_interval_secs),
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            idle_check_interval: Duration::from_millis(self.idle_check_interval_ms),
            response_timeout: Duration::from_secs(self.response_timeout_secs),
            dispatch_retry: Duration::from_millis(self.dispatch_retry_ms),
        }
    }
}
