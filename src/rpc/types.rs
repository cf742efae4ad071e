//! Tipos de dados para os resultados tipados do protocolo Moonraker.
//!
//! Todas as structs derivam `Serialize` e `Deserialize` e usam `#[serde(default)]` nos campos,
//! porque o firmware omite campos que ainda não possuem valor.

use serde::{Deserialize, Serialize};

/// Resultado de `printer.objects.query` para os objetos `webhooks`, `virtual_sdcard` e `print_stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusQueryResult {
    /// Tempo do evento no relógio do host Klipper.
    #[serde(default)]
    pub eventtime: f64,
    /// Objetos consultados. Obrigatório: um resultado sem `status` é malformado.
    pub status: PrinterObjects,
}

impl StatusQueryResult {
    /// Valor bruto de `print_stats.state`.
    pub fn print_state(&self) -> &str {
        &self.status.print_stats.state
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrinterObjects {
    #[serde(default)]
    pub webhooks: Webhooks,
    #[serde(default)]
    pub virtual_sdcard: VirtualSdcard,
    #[serde(default)]
    pub print_stats: PrintStats,
}

/// Estado do próprio Klipper ("ready", "startup", "shutdown", "error").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Webhooks {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub state_message: String,
}

/// Progresso de leitura do arquivo em impressão.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualSdcard {
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub file_position: u64,
    #[serde(default)]
    pub file_path: Option<String>,
}

/// Estatísticas da impressão atual; `state` alimenta a máquina de estados.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrintStats {
    #[serde(default)]
    pub print_duration: f64,
    #[serde(default)]
    pub total_duration: f64,
    #[serde(default)]
    pub filament_used: f64,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub message: String,
}

/// Resultado de `printer.info`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KlipperInfo {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub state_message: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub software_version: String,
    #[serde(default)]
    pub cpu_info: String,
    #[serde(default)]
    pub klipper_path: String,
    #[serde(default)]
    pub python_path: String,
    #[serde(default)]
    pub log_file: String,
    #[serde(default)]
    pub config_file: String,
}
