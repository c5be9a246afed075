//! 以 ogr2ogr 將 PostgreSQL schema 內的資料表匯出成 GeoPackage

use super::{check_canceled, split_list};
use crate::adapters::ogr::{command_line, pg_source, DEFAULT_PROGRAM};
use crate::domain::model::{AlgorithmOutput, PostgresConnection};
use crate::domain::ports::{Algorithm, Feedback, ToolRunner};
use crate::utils::error::{BatchError, Result};
use crate::utils::validation::{validate_non_empty_string, validate_path, validate_required_field, Validate};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportGeopackageParams {
    /// 設定檔 `[connections.<name>]` 中的連線名稱
    pub connection: Option<String>,
    /// 逗號分隔的 schema 清單
    pub schemas: Option<String>,
    pub destination: Option<PathBuf>,
    pub ogr2ogr: PathBuf,
}

impl Default for ExportGeopackageParams {
    fn default() -> Self {
        Self {
            connection: None,
            schemas: None,
            destination: None,
            ogr2ogr: PathBuf::from(DEFAULT_PROGRAM),
        }
    }
}

impl Validate for ExportGeopackageParams {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("connection", validate_required_field("connection", &self.connection)?)?;
        let schemas = validate_required_field("schemas", &self.schemas)?;
        if split_list(schemas).is_empty() {
            return Err(BatchError::InvalidConfigValueError {
                field: "schemas".to_string(),
                value: schemas.clone(),
                reason: "At least one schema is required".to_string(),
            });
        }
        validate_path("destination", validate_required_field("destination", &self.destination)?)?;
        validate_path("ogr2ogr", &self.ogr2ogr)?;
        Ok(())
    }
}

/// 副檔名不是 `.gpkg` 時補上
pub fn geopackage_path(destination: &Path) -> PathBuf {
    let is_gpkg = destination
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("gpkg"))
        .unwrap_or(false);
    if is_gpkg {
        return destination.to_path_buf();
    }
    let mut path = destination.as_os_str().to_os_string();
    path.push(".gpkg");
    PathBuf::from(path)
}

pub fn export_arguments(connection: &PostgresConnection, schemas: &[String], destination: &Path) -> Vec<String> {
    let source = format!("{} schemas={}", pg_source(connection), schemas.join(","));
    let mut args: Vec<String> = vec![
        "-overwrite".into(),
        "-progress".into(),
        "-f".into(),
        "GPKG".into(),
        destination.display().to_string(),
        source,
    ];
    args.extend(
        [
            "-lco", "GEOMETRY_NAME=geom",
            "-lco", "SPATIAL_INDEX=YES",
            "-gt", "50000",
            "--config", "PG_LIST_ALL_TABLES", "YES",
            "--config", "PG_SKIP_VIEWS", "YES",
            "--config", "OGR_SQLITE_SYNCHRONOUS", "OFF",
            "--config", "OGR_SQLITE_CACHE", "1024",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args
}

pub struct ExportGeopackage<R: ToolRunner> {
    params: ExportGeopackageParams,
    connection: PostgresConnection,
    runner: R,
}

impl<R: ToolRunner> ExportGeopackage<R> {
    pub fn new(params: ExportGeopackageParams, connection: PostgresConnection, runner: R) -> Self {
        Self {
            params,
            connection,
            runner,
        }
    }
}

impl<R: ToolRunner> Algorithm for ExportGeopackage<R> {
    fn name(&self) -> &'static str {
        "export_geopackage"
    }

    fn display_name(&self) -> &'static str {
        "Export PostgreSQL tables to a GeoPackage file"
    }

    fn process(&self, feedback: &dyn Feedback) -> Result<AlgorithmOutput> {
        self.params.validate()?;
        let schemas = split_list(validate_required_field("schemas", &self.params.schemas)?);
        let destination = geopackage_path(validate_required_field("destination", &self.params.destination)?);

        if destination.exists() {
            fs::remove_file(&destination)?;
            feedback.push_debug("Previous GeoPackage has been deleted");
        }
        check_canceled(feedback)?;

        let args = export_arguments(&self.connection, &schemas, &destination);
        feedback.push_info(&format!("OGR command = {}", command_line(&self.params.ogr2ogr, &args)));
        self.runner.run(&self.params.ogr2ogr, &args, feedback)?;

        if !destination.is_file() {
            return Err(BatchError::ToolError {
                program: self.params.ogr2ogr.display().to_string(),
                message: "GeoPackage has not been successfully created".to_string(),
            });
        }
        feedback.push_info(&format!("GeoPackage successfully created: \"{}\"", destination.display()));

        Ok(AlgorithmOutput::new()
            .with("destination", destination.display().to_string())
            .with("schemas", schemas))
    }
}
