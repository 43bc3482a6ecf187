use std::path::Path;

use drawchat_core::export::{self, ExportFormat as CoreExportFormat};

use crate::cli::ExportFormat;
use crate::commands::common::CliContext;
use crate::error::CliError;

pub async fn run_export(
    format: ExportFormat,
    output: Option<&Path>,
    ctx: &CliContext,
) -> Result<(), CliError> {
    let service = ctx.open_service().await?;
    let rendered = service.export_conversations(to_core_format(format)).await?;

    if let Some(path) = output {
        let path = if path.is_dir() {
            path.join(suggested_file_name(format))
        } else {
            path.to_path_buf()
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&path, rendered)?;
        println!("Exported conversations to {}", path.display());
    } else {
        print!("{rendered}");
        if !rendered.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}

pub const fn to_core_format(format: ExportFormat) -> CoreExportFormat {
    match format {
        ExportFormat::Json => CoreExportFormat::Json,
        ExportFormat::Markdown => CoreExportFormat::Markdown,
    }
}

/// Default file name for an export written now.
pub fn suggested_file_name(format: ExportFormat) -> String {
    export::suggested_export_file_name(
        to_core_format(format),
        chrono::Utc::now().timestamp_millis(),
    )
}
