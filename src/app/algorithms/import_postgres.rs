//! 以 ogr2ogr 將專案中的一個圖層匯入 PostgreSQL

use super::check_canceled;
use crate::adapters::ogr::{
    command_line, connection_from_uri, geometry_type_code, oci_source, pg_connection_params, pg_source,
    DEFAULT_PROGRAM, EXCLUDED_FIELDS,
};
use crate::core::datasource_uri::DataSourceUri;
use crate::core::layer::MapLayer;
use crate::core::project::QgisProject;
use crate::domain::model::{AlgorithmOutput, PostgresConnection};
use crate::domain::ports::{Algorithm, Feedback, ToolRunner};
use crate::utils::error::{BatchError, Result};
use crate::utils::validation::{
    validate_existing_file, validate_non_empty_string, validate_path, validate_required_field, Validate,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportPostgresParams {
    pub project: Option<PathBuf>,
    /// 圖層名稱或 ID
    pub layer: Option<String>,
    pub connection: Option<String>,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub primary_key: String,
    pub overwrite: bool,
    pub ogr2ogr: PathBuf,
}

impl Default for ImportPostgresParams {
    fn default() -> Self {
        Self {
            project: None,
            layer: None,
            connection: None,
            schema: None,
            table: None,
            primary_key: "GID".to_string(),
            overwrite: false,
            ogr2ogr: PathBuf::from(DEFAULT_PROGRAM),
        }
    }
}

impl Validate for ImportPostgresParams {
    fn validate(&self) -> Result<()> {
        validate_existing_file("project", validate_required_field("project", &self.project)?)?;
        validate_non_empty_string("layer", validate_required_field("layer", &self.layer)?)?;
        validate_non_empty_string("connection", validate_required_field("connection", &self.connection)?)?;
        validate_non_empty_string("schema", validate_required_field("schema", &self.schema)?)?;
        validate_non_empty_string("table", validate_required_field("table", &self.table)?)?;
        validate_non_empty_string("primary_key", &self.primary_key)?;
        validate_path("ogr2ogr", &self.ogr2ogr)?;
        Ok(())
    }
}

/// ogr2ogr 的來源資料集與 (可選) 圖層名稱
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OgrSource {
    pub dataset: String,
    pub layer: Option<String>,
    pub geometry_column: Option<String>,
}

/// 依圖層 provider 組出 ogr2ogr 來源
pub fn layer_source(project: &QgisProject, layer: &MapLayer<'_>) -> Result<OgrSource> {
    let datasource = layer.datasource().unwrap_or_default();
    match layer.provider().as_str() {
        "ogr" => {
            let mut parts = datasource.split('|');
            let file = parts.next().unwrap_or("").trim();
            let sublayer = parts
                .filter_map(|part| part.trim().strip_prefix("layername="))
                .map(str::to_string)
                .next();
            Ok(OgrSource {
                dataset: project.resolve_path(file).display().to_string(),
                layer: sublayer,
                geometry_column: None,
            })
        }
        "postgres" => {
            let uri = DataSourceUri::parse(&datasource);
            Ok(OgrSource {
                dataset: pg_source(&connection_from_uri(&uri)),
                layer: Some(qualified_table(&uri)),
                geometry_column: Some(uri.geometry_column().to_string()).filter(|g| !g.is_empty()),
            })
        }
        "oracle" => {
            let uri = DataSourceUri::parse(&datasource);
            Ok(OgrSource {
                dataset: oci_source(&uri),
                layer: Some(qualified_table(&uri)),
                geometry_column: Some(uri.geometry_column().to_string()).filter(|g| !g.is_empty()),
            })
        }
        other => Err(BatchError::InvalidConfigValueError {
            field: "layer".to_string(),
            value: layer.name(),
            reason: format!("Unsupported provider '{}'", other),
        }),
    }
}

fn qualified_table(uri: &DataSourceUri) -> String {
    if uri.schema().is_empty() {
        uri.table().to_string()
    } else {
        format!("{}.{}", uri.schema(), uri.table())
    }
}

/// 扣除系統欄位後要複製的欄位
pub fn selected_fields(layer: &MapLayer<'_>) -> Vec<String> {
    layer
        .field_names()
        .into_iter()
        .filter(|name| !EXCLUDED_FIELDS.iter().any(|excluded| excluded.eq_ignore_ascii_case(name)))
        .collect()
}

/// 圖層 `<srs>` 的 authid (例如 EPSG:2154)
pub fn layer_authid(layer: &MapLayer<'_>) -> Option<String> {
    layer
        .element()
        .find(&["srs", "spatialrefsys", "authid"])
        .map(|e| e.text().trim().to_string())
        .filter(|authid| !authid.is_empty())
}

pub struct ImportArguments<'a> {
    pub connection: &'a PostgresConnection,
    pub schema: &'a str,
    pub table: &'a str,
    pub primary_key: &'a str,
    pub overwrite: bool,
    pub source: &'a OgrSource,
    pub geometry_code: &'a str,
    pub authid: Option<&'a str>,
    pub fields: &'a [String],
}

pub fn import_arguments(import: &ImportArguments<'_>) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-progress".into(),
        "--config".into(),
        "PG_USE_COPY".into(),
        "YES".into(),
        "-f".into(),
        "PostgreSQL".into(),
        format!(
            "PG:{} active_schema={}",
            pg_connection_params(import.connection),
            import.schema
        ),
        "-lco".into(),
        "DIM=2".into(),
        import.source.dataset.clone(),
    ];
    if let Some(layer) = &import.source.layer {
        args.push(layer.clone());
    }
    let geometry_column = import.source.geometry_column.as_deref().unwrap_or("geom");
    args.extend([
        "-lco".to_string(),
        format!("GEOMETRY_NAME={}", geometry_column),
        "-lco".to_string(),
        format!("FID={}", import.primary_key),
        "-nln".to_string(),
        format!("{}.{}", import.schema, import.table),
        "-nlt".to_string(),
        import.geometry_code.to_string(),
    ]);
    if let Some(authid) = import.authid {
        args.push("-a_srs".into());
        args.push(authid.to_string());
    }
    if !import.fields.is_empty() {
        args.push("-select".into());
        args.push(import.fields.join(","));
    }
    if import.overwrite {
        args.extend(["-overwrite".to_string(), "-lco".to_string(), "OVERWRITE=YES".to_string()]);
    }
    args
}

pub struct ImportPostgres<R: ToolRunner> {
    params: ImportPostgresParams,
    connection: PostgresConnection,
    runner: R,
}

impl<R: ToolRunner> ImportPostgres<R> {
    pub fn new(params: ImportPostgresParams, connection: PostgresConnection, runner: R) -> Self {
        Self {
            params,
            connection,
            runner,
        }
    }
}

impl<R: ToolRunner> Algorithm for ImportPostgres<R> {
    fn name(&self) -> &'static str {
        "import_postgres"
    }

    fn display_name(&self) -> &'static str {
        "Import a layer into PostgreSQL"
    }

    fn process(&self, feedback: &dyn Feedback) -> Result<AlgorithmOutput> {
        self.params.validate()?;
        let project_path = validate_required_field("project", &self.params.project)?;
        let selector = validate_required_field("layer", &self.params.layer)?;
        let schema = validate_required_field("schema", &self.params.schema)?;
        let table = validate_required_field("table", &self.params.table)?;

        let project = QgisProject::open(project_path)?;
        let layers = project.select_layers(std::slice::from_ref(selector));
        let layer = layers.first().ok_or_else(|| BatchError::InvalidConfigValueError {
            field: "layer".to_string(),
            value: selector.clone(),
            reason: format!("No vector layer found in {}", project_path.display()),
        })?;

        let source = layer_source(&project, layer)?;
        let fields = selected_fields(layer);
        let geometry_code = geometry_type_code(layer.wkb_type().unwrap_or(""));
        let authid = layer_authid(layer);
        feedback.push_info(&format!(
            "Importing '{}' ({}) with {} field(s)",
            layer.name(),
            geometry_code,
            fields.len()
        ));
        check_canceled(feedback)?;

        let args = import_arguments(&ImportArguments {
            connection: &self.connection,
            schema,
            table,
            primary_key: &self.params.primary_key,
            overwrite: self.params.overwrite,
            source: &source,
            geometry_code,
            authid: authid.as_deref(),
            fields: &fields,
        });
        feedback.push_info(&format!("OGR command = {}", command_line(&self.params.ogr2ogr, &args)));
        self.runner.run(&self.params.ogr2ogr, &args, feedback)?;
        feedback.push_info(&format!("Layer imported into {}.{}", schema, table));

        Ok(AlgorithmOutput::new()
            .with("layer", layer.name())
            .with("table", format!("{}.{}", schema, table))
            .with("geometry_type", geometry_code)
            .with("fields", fields))
    }
}
