//! Interface de linha de comando do printfleet baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, probe, add-job)
//! e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// printfleet: orquestrador de uma frota de impressoras 3D Klipper/Moonraker.
#[derive(Debug, Parser)]
#[command(name = "printfleet", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: `printfleet.toml`).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Conecta a frota, consome os jobs e despacha impressões até Ctrl-C.
    Run,

    /// Consulta cada impressora configurada e mostra um relatório.
    Probe,

    /// Adiciona um job de um único arquivo gcode ao armazenamento de jobs.
    AddJob {
        /// Nome do arquivo fatiado, relativo a `<gcode_root>/<job_id>/`.
        filename: String,

        /// Cor do filamento exigido.
        #[arg(long)]
        color: String,

        /// Material do filamento exigido (PLA, PETG, ...).
        #[arg(long)]
        material: String,

        /// Processo de impressão.
        #[arg(long, default_value = "FDM")]
        process: String,

        /// Tempo estimado de impressão em minutos.
        #[arg(long, default_value_t = 0.0)]
        time: f64,
    },
}
