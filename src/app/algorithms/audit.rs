//! 稽核目錄下所有 QGIS 專案，輸出專案、圖層與資料表的 CSV 報表

use super::{check_canceled, finish, report_progress};
use crate::adapters::report::{write_layers_csv, write_projects_csv, write_tables_csv};
use crate::core::datasource_uri::DataSourceUri;
use crate::core::discovery::find_project_files;
use crate::core::layer::MapLayer;
use crate::core::project::QgisProject;
use crate::domain::model::{
    AlgorithmOutput, DatasourceIndex, LizmapMetadata, LizmapProperties, ProjectAudit, TableIndex,
};
use crate::domain::ports::{Algorithm, Feedback};
use crate::utils::error::{BatchError, Result};
use crate::utils::monitor::SystemMonitor;
use crate::utils::validation::{validate_directory, validate_path, validate_required_field, Validate};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const GHOST_DATASOURCE: &str = "GHOST";

const PICTURE_EXTENSIONS: [&str; 6] = ["bmp", "gif", "png", "jpg", "jpeg", "tif"];

/// 以檔案為來源、可以檢查檔案是否存在的 provider
const FILE_PROVIDERS: [&str; 4] = ["ogr", "gdal", "spatialite", "delimitedtext"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditParams {
    pub root_directory: Option<PathBuf>,
    pub output_projects_csv: Option<PathBuf>,
    pub output_layers_csv: Option<PathBuf>,
    pub output_tables_csv: Option<PathBuf>,
    /// 檢查檔案型圖層的來源是否存在
    pub resolve_layers: bool,
    pub layer_name_filter: String,
    pub layer_datasource_filter: String,
    /// 讀取 Lizmap `*.qgs.cfg` 的 metadata
    pub lizmap_properties: bool,
}

impl Validate for AuditParams {
    fn validate(&self) -> Result<()> {
        let root = validate_required_field("root_directory", &self.root_directory)?;
        validate_directory("root_directory", root)?;
        let projects_csv = validate_required_field("output_projects_csv", &self.output_projects_csv)?;
        validate_path("output_projects_csv", projects_csv)?;
        if let Some(path) = &self.output_layers_csv {
            validate_path("output_layers_csv", path)?;
        }
        if let Some(path) = &self.output_tables_csv {
            validate_path("output_tables_csv", path)?;
        }
        Ok(())
    }
}

pub struct AuditProjects {
    params: AuditParams,
}

/// 一個專案內圖層篩選的結果
#[derive(Debug, Default)]
struct LayerScan {
    name_matches: usize,
    datasource_matches: usize,
}

impl AuditProjects {
    pub fn new(params: AuditParams) -> Self {
        Self { params }
    }

    fn name_filter(&self) -> &str {
        self.params.layer_name_filter.trim()
    }

    fn datasource_filter(&self) -> &str {
        self.params.layer_datasource_filter.trim()
    }

    /// 將圖層加入索引，回傳符合篩選條件的圖層數
    fn scan_layers(
        &self,
        project: &QgisProject,
        relative: &str,
        layers_index: &mut Option<DatasourceIndex>,
        tables_index: &mut Option<TableIndex>,
        feedback: &dyn Feedback,
    ) -> LayerScan {
        let name_filter = self.name_filter().to_lowercase();
        let datasource_filter = self.datasource_filter();
        let mut scan = LayerScan::default();

        for layer in project.layers() {
            let layer_name = layer.name();
            let datasource = match layer.datasource() {
                Some(datasource) => datasource,
                None => {
                    feedback.report_error(
                        &format!(
                            "Project: {} - Layer \"{}\" ({}) - Error while parsing datasource: ghost layer ?",
                            relative,
                            layer_name,
                            layer.id()
                        ),
                        false,
                    );
                    GHOST_DATASOURCE.to_string()
                }
            };

            let mut matched = true;
            if !name_filter.is_empty() {
                if layer_name.to_lowercase().contains(&name_filter) {
                    scan.name_matches += 1;
                } else {
                    matched = false;
                }
            }
            if !datasource_filter.is_empty() {
                if datasource.contains(datasource_filter) {
                    scan.datasource_matches += 1;
                } else {
                    matched = false;
                }
            }
            if !matched || datasource.is_empty() {
                continue;
            }

            if let Some(tables) = tables_index.as_mut() {
                if layer.provider() == "postgres" {
                    let uri = DataSourceUri::parse(&datasource);
                    tables.add(&uri.quoted_table_name(), relative);
                }
            }
            if let Some(layers) = layers_index.as_mut() {
                layers.add(&datasource, &layer_name, relative);
            }
        }
        scan
    }

    fn audit_project(
        &self,
        project: &QgisProject,
        memory_usage_mb: Option<f64>,
    ) -> Result<ProjectAudit> {
        let path = project.path();
        let layers = project.layers();
        let (picture_paths, picture_sizes, pictures_total_size) = layout_pictures(project);

        let invalid_layer_count = if self.params.resolve_layers {
            Some(
                layers
                    .iter()
                    .filter(|layer| is_layer_source_missing(project, layer))
                    .count(),
            )
        } else {
            None
        };

        let lizmap = if self.params.lizmap_properties {
            Some(read_lizmap_properties(path)?)
        } else {
            None
        };

        Ok(ProjectAudit {
            path: path.display().to_string(),
            basename: project.base_name(),
            last_modified: last_modified(path)?,
            crs: project.crs_authid(),
            layer_count: layers.len(),
            invalid_layer_count,
            memory_usage_mb,
            print_layout_count: project.print_layout_count(),
            picture_paths,
            picture_sizes,
            pictures_total_size,
            trust_option_active: project.trust_layer_metadata(),
            last_save_version: project
                .last_save_version()
                .map(|v| v.code())
                .unwrap_or_default(),
            lizmap,
        })
    }
}

/// 相對於根目錄的專案路徑，不含開頭的分隔字元
fn relative_path(root: &Path, file: &Path) -> String {
    file.strip_prefix(root)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| file.to_string_lossy().to_string())
}

fn last_modified(path: &Path) -> Result<String> {
    let modified = fs::metadata(path)?.modified()?;
    let local: DateTime<Local> = modified.into();
    Ok(local.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn is_picture(path: &str) -> bool {
    let lower = path.to_lowercase();
    PICTURE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// 版面圖片：不重複的路徑、各自的大小、以及所有出現次數的總大小
fn layout_pictures(project: &QgisProject) -> (Vec<String>, Vec<u64>, u64) {
    let mut paths: Vec<String> = Vec::new();
    let mut sizes = Vec::new();
    let mut total = 0;

    for picture in project.layout_picture_paths() {
        let resolved = project.resolve_path(&picture);
        if !resolved.is_file() {
            continue;
        }
        let resolved = resolved.display().to_string();
        if !is_picture(&resolved) {
            continue;
        }
        let size = fs::metadata(&resolved).map(|m| m.len()).unwrap_or(0);
        if !paths.contains(&resolved) {
            paths.push(resolved);
            sizes.push(size);
        }
        total += size;
    }
    (paths, sizes, total)
}

/// 由檔案型資料來源取出檔案路徑，不是檔案時回傳 None
fn source_file_path(provider: &str, datasource: &str) -> Option<String> {
    match provider {
        "ogr" | "gdal" => {
            let path = datasource.split('|').next().unwrap_or("").trim();
            let remote = path.starts_with("/vsi") || path.contains("://");
            if remote || (path.contains(':') && !looks_like_windows_path(path)) {
                return None;
            }
            Some(path.to_string())
        }
        "spatialite" => DataSourceUri::parse(datasource).database().map(str::to_string),
        "delimitedtext" => {
            let path = datasource.strip_prefix("file://").unwrap_or(datasource);
            let path = path.split('?').next().unwrap_or("");
            Some(path.to_string())
        }
        _ => None,
    }
}

fn looks_like_windows_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() > 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'/' || bytes[2] == b'\\')
}

/// 圖層無法載入：沒有資料來源，或檔案型來源的檔案不存在
fn is_layer_source_missing(project: &QgisProject, layer: &MapLayer<'_>) -> bool {
    let Some(datasource) = layer.datasource() else {
        return true;
    };
    let provider = layer.provider();
    if !FILE_PROVIDERS.contains(&provider.as_str()) {
        return false;
    }
    match source_file_path(&provider, &datasource) {
        Some(path) if !path.is_empty() => !project.resolve_path(&path).exists(),
        Some(_) => true,
        None => false,
    }
}

fn read_lizmap_properties(project_path: &Path) -> Result<LizmapProperties> {
    let mut cfg_path = project_path.as_os_str().to_os_string();
    cfg_path.push(".cfg");
    let cfg_path = PathBuf::from(cfg_path);

    if !cfg_path.is_file() {
        return Ok(LizmapProperties::default());
    }

    let content = fs::read_to_string(&cfg_path)?;
    let config: serde_json::Value = serde_json::from_str(&content)?;
    let metadata = match config.get("metadata") {
        Some(metadata) => serde_json::from_value::<LizmapMetadata>(metadata.clone())?,
        None => LizmapMetadata::default(),
    };
    Ok(LizmapProperties {
        has_config: true,
        metadata,
    })
}

impl Algorithm for AuditProjects {
    fn name(&self) -> &'static str {
        "audit"
    }

    fn display_name(&self) -> &'static str {
        "Audit QGIS projects"
    }

    fn process(&self, feedback: &dyn Feedback) -> Result<AlgorithmOutput> {
        self.params.validate()?;
        let root = validate_required_field("root_directory", &self.params.root_directory)?;
        let projects_csv = validate_required_field("output_projects_csv", &self.params.output_projects_csv)?;

        feedback.push_info("Fetching the list of QGIS project files...");
        let files = find_project_files(root);
        if files.is_empty() {
            feedback.push_info("No project found in the given directory");
            return Ok(AlgorithmOutput::new().with("project_count", 0));
        }
        let total = files.len();
        feedback.push_info(&format!(
            "{} projects have been found in the directory and its subdirectories",
            total
        ));

        let mut layers_index = self.params.output_layers_csv.as_ref().map(|_| DatasourceIndex::new());
        let mut tables_index = self.params.output_tables_csv.as_ref().map(|_| TableIndex::new());
        let monitor = SystemMonitor::new(false);
        let width = total.to_string().len();
        let mut rows = Vec::new();
        let mut failed = Vec::new();
        let mut canceled = false;

        for (current, file) in files.iter().enumerate() {
            if check_canceled(feedback).is_err() {
                canceled = true;
                break;
            }
            let relative = relative_path(root, file);
            feedback.push_info(&format!("* {:0width$} - {}", current, relative, width = width));
            report_progress(feedback, current, total);

            let start_memory = monitor.memory_usage_mb();
            let project = match QgisProject::open(file) {
                Ok(project) => project,
                Err(e) => {
                    feedback.report_error(&format!("Project: {} - {}", relative, e), false);
                    failed.push(relative);
                    continue;
                }
            };
            let end_memory = monitor.memory_usage_mb();
            let memory_usage = start_memory.zip(end_memory).map(|(start, end)| end - start);

            let scan = self.scan_layers(&project, &relative, &mut layers_index, &mut tables_index, feedback);
            if !self.name_filter().is_empty() && scan.name_matches == 0 {
                feedback.push_info("No layers for this project matches the given name filter. Skipping.");
                continue;
            }
            if !self.datasource_filter().is_empty() && scan.datasource_matches == 0 {
                feedback.push_info("No layers for this project matches the given datasource filter. Skipping.");
                continue;
            }

            rows.push(self.audit_project(&project, memory_usage)?);
        }

        feedback.push_info("The project files have been parsed");
        if rows.len() != total {
            feedback.push_info(&format!("{} filtered projects among the {} listed projects", rows.len(), total));
        }

        write_projects_csv(projects_csv, &rows, self.params.lizmap_properties)?;
        feedback.push_info(&format!("Projects written to {}", projects_csv.display()));
        let mut output = AlgorithmOutput::new()
            .with("project_count", total)
            .with("audited_count", rows.len())
            .with("output_projects_csv", projects_csv.display().to_string());

        if let (Some(path), Some(index)) = (&self.params.output_layers_csv, &layers_index) {
            write_layers_csv(path, index)?;
            feedback.push_info(&format!("{} datasources written to {}", index.len(), path.display()));
            output = output.with("output_layers_csv", path.display().to_string());
        }
        if let (Some(path), Some(index)) = (&self.params.output_tables_csv, &tables_index) {
            write_tables_csv(path, index)?;
            feedback.push_info(&format!("{} tables written to {}", index.len(), path.display()));
            output = output.with("output_tables_csv", path.display().to_string());
        }

        if canceled {
            return Err(BatchError::Canceled);
        }
        finish(self.name(), failed, output)
    }
}
