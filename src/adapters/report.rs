//! 稽核結果的 CSV 輸出，所有欄位一律加上引號

use crate::domain::model::{DatasourceIndex, ProjectAudit, TableIndex, LIST_SEPARATOR};
use crate::utils::error::Result;
use csv::{QuoteStyle, Writer, WriterBuilder};
use std::fs::File;
use std::path::Path;

pub const PROJECT_COLUMNS: [&str; 14] = [
    "path",
    "basename",
    "last_modified",
    "crs",
    "layer_count",
    "invalid_layer_count",
    "memory_usage_mb",
    "print_layout_count",
    "print_layout_pictures_paths",
    "print_layout_pictures_sizes",
    "print_layout_pictures_total_size",
    "print_layout_pictures_total_size_mb",
    "trust_option_active",
    "last_save_version",
];

pub const LIZMAP_COLUMNS: [&str; 5] = [
    "has_lizmap_config",
    "qgis_desktop_version",
    "lizmap_plugin_version",
    "lizmap_web_client_target_version",
    "project_valid",
];

pub const LAYER_COLUMNS: [&str; 3] = ["datasource", "layer_names", "projects"];

pub const TABLE_COLUMNS: [&str; 2] = ["table", "projects"];

fn create_writer(path: &Path) -> Result<Writer<File>> {
    Ok(WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_path(path)?)
}

fn bool_cell(value: bool) -> String {
    if value { "True" } else { "False" }.to_string()
}

fn json_cell(value: &Option<serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Bool(b)) => bool_cell(*b),
        Some(other) => other.to_string(),
    }
}

fn project_record(audit: &ProjectAudit, include_lizmap: bool) -> Vec<String> {
    let mut record = vec![
        audit.path.clone(),
        audit.basename.clone(),
        audit.last_modified.clone(),
        audit.crs.clone(),
        audit.layer_count.to_string(),
        audit
            .invalid_layer_count
            .map(|c| c.to_string())
            .unwrap_or_default(),
        audit
            .memory_usage_mb
            .map(|m| format!("{:.2}", m))
            .unwrap_or_default(),
        audit.print_layout_count.to_string(),
        audit.picture_paths.join(LIST_SEPARATOR),
        audit
            .picture_sizes
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(LIST_SEPARATOR),
        audit.pictures_total_size.to_string(),
        format!("{:.2}", audit.pictures_total_size_mb()),
        bool_cell(audit.trust_option_active),
        audit.last_save_version.clone(),
    ];

    if include_lizmap {
        let lizmap = audit.lizmap.clone().unwrap_or_default();
        record.push(bool_cell(lizmap.has_config));
        record.push(json_cell(&lizmap.metadata.qgis_desktop_version));
        record.push(json_cell(&lizmap.metadata.lizmap_plugin_version));
        record.push(json_cell(&lizmap.metadata.lizmap_web_client_target_version));
        record.push(json_cell(&lizmap.metadata.project_valid));
    }
    record
}

pub fn write_projects_csv(path: &Path, projects: &[ProjectAudit], include_lizmap: bool) -> Result<()> {
    let mut writer = create_writer(path)?;

    let mut header: Vec<&str> = PROJECT_COLUMNS.to_vec();
    if include_lizmap {
        header.extend(LIZMAP_COLUMNS);
    }
    writer.write_record(&header)?;

    for audit in projects {
        writer.write_record(project_record(audit, include_lizmap))?;
    }
    writer.flush()?;
    tracing::debug!("{} project row(s) written to {}", projects.len(), path.display());
    Ok(())
}

pub fn write_layers_csv(path: &Path, index: &DatasourceIndex) -> Result<()> {
    let mut writer = create_writer(path)?;
    writer.write_record(LAYER_COLUMNS)?;
    for (datasource, entry) in index.iter() {
        writer.write_record([
            datasource.as_str(),
            entry.layer_names.join(LIST_SEPARATOR).as_str(),
            entry.projects.join(LIST_SEPARATOR).as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_tables_csv(path: &Path, index: &TableIndex) -> Result<()> {
    let mut writer = create_writer(path)?;
    writer.write_record(TABLE_COLUMNS)?;
    for (table, projects) in index.iter() {
        writer.write_record([table.as_str(), projects.join(LIST_SEPARATOR).as_str()])?;
    }
    writer.flush()?;
    Ok(())
}
