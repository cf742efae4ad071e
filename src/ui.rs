//! Saída de terminal do printfleet com estilos do `console`.
//!
//! [`Report`] formata o relatório do comando `probe` e a confirmação do `add-job`.

use console::Style;

use crate::printer::SessionSnapshot;
use crate::rpc::{KlipperInfo, StatusQueryResult};
use crate::state_machine::{Job, PrinterState};

pub struct Report {
    // Verde para impressoras livres, vermelho para inacessíveis ou em erro.
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl Default for Report {
    fn default() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }
}

impl Report {
    /// Formata uma impressora: estado, filamento na mesa, firmware e impressão atual.
    pub fn printer(
        &self,
        snapshot: &SessionSnapshot,
        info: Option<&KlipperInfo>,
        status: Option<&StatusQueryResult>,
    ) -> String {
        let mut out = String::new();
        if !snapshot.reachable {
            out.push_str(&format!(
                "{} {} unreachable\n",
                self.red.apply_to("✗"),
                snapshot.name
            ));
            return out;
        }

        let style = match snapshot.state {
            PrinterState::Standby => &self.green,
            PrinterState::Error | PrinterState::Unknown => &self.red,
            _ => &self.yellow,
        };
        out.push_str(&format!(
            "{} {} {}\n",
            self.green.apply_to("✓"),
            snapshot.name,
            style.apply_to(snapshot.state)
        ));

        let filament = snapshot
            .filament_on_bed
            .as_ref()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "none".to_string());
        out.push_str(&format!("    filament  {filament}\n"));

        if let Some(info) = info {
            out.push_str(&format!(
                "    klipper   {} {} ({})\n",
                info.hostname,
                info.software_version,
                self.dim.apply_to(&info.state)
            ));
        }

        if let Some(status) = status {
            let stats = &status.status.print_stats;
            let file = if stats.filename.is_empty() {
                "-"
            } else {
                stats.filename.as_str()
            };
            out.push_str(&format!(
                "    print     {} {} {:.0}%\n",
                stats.state,
                file,
                status.status.virtual_sdcard.progress * 100.0
            ));
        }
        out
    }

    pub fn job_added(&self, job: &Job) -> String {
        format!(
            "{} Job {} added with {} file(s)",
            self.green.apply_to("✓"),
            job.id,
            job.files.len()
        )
    }
}
