use std::time::Duration;

use super::processor::FolderOutcome;

pub const REPORT_HEADER: &str = "=== Resumen de ejecución ===";
pub const COMPLETED_LINE: &str = "=== Proceso finalizado correctamente ===";

/// Run-wide counters, folded from folder outcomes by the coordinator alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub elapsed: Duration,
    pub folders_processed: usize,
    pub files_downloaded: usize,
    pub bytes_downloaded: u64,
    pub files_deleted: usize,
    pub folders_with_errors: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &FolderOutcome) {
        self.folders_processed += 1;
        if outcome.downloaded {
            self.files_downloaded += 1;
            self.bytes_downloaded += outcome.bytes_transferred;
        }
        self.files_deleted += outcome.files_deleted;
        if outcome.is_failed() {
            self.folders_with_errors += 1;
        }
    }

    /// Accounts for a folder whose worker died without producing an outcome.
    pub fn record_lost(&mut self) {
        self.folders_processed += 1;
        self.folders_with_errors += 1;
    }

    pub fn report_lines(&self) -> Vec<String> {
        vec![
            REPORT_HEADER.to_string(),
            format!("Tiempo total de proceso: {}", format_elapsed(self.elapsed)),
            format!("Carpetas procesadas: {}", self.folders_processed),
            format!("Ficheros descargados: {}", self.files_downloaded),
            format!("Bytes descargados: {}", group_thousands(self.bytes_downloaded)),
            format!("Ficheros eliminados localmente: {}", self.files_deleted),
            format!("Carpetas con errores: {}", self.folders_with_errors),
        ]
    }
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{} min {} seg", secs / 60, secs % 60)
}

pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
