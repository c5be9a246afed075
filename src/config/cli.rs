use super::settings::SettingsStore;
use crate::app::algorithms::{
    ApplyAliasesParams, AuditParams, ExportGeopackageParams, ImportPostgresParams, MainColorParams,
    RestrictFieldsParams, RewriteDatasourcesParams, ValueRelationJoinsParams,
};
use crate::app::Operation;
use crate::utils::error::Result;
use crate::utils::validation::{validate_required_field, Validate};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "qgs-batch")]
#[command(about = "Batch maintenance tools for QGIS project files")]
#[command(version)]
pub struct CliConfig {
    /// 參數與連線設定檔
    #[arg(long, global = true, env = "QGS_BATCH_SETTINGS", default_value = "qgs-batch.toml")]
    pub settings: PathBuf,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Write logs as JSON lines")]
    pub log_json: bool,

    #[arg(long, global = true, help = "Log memory usage and elapsed time")]
    pub monitor: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Audit every project below a directory and write CSV reports
    Audit(AuditArgs),
    /// Search and replace text in the layer datasources of projects
    RewriteDatasources(RewriteDatasourcesArgs),
    /// Apply field aliases from a CSV table
    ApplyAliases(ApplyAliasesArgs),
    /// Set fields read-only or exclude them from WMS/WFS
    RestrictFields(RestrictFieldsArgs),
    /// Add joins for the value relation fields of layers
    AddJoins(AddJoinsArgs),
    /// Add virtual fields with the main color and label of the symbology
    MainColor(MainColorArgs),
    /// Export PostgreSQL schemas to a GeoPackage with ogr2ogr
    ExportGeopackage(ExportGeopackageArgs),
    /// Import a project layer into PostgreSQL with ogr2ogr
    ImportPostgres(ImportPostgresArgs),
}

fn merge<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn merge_some<T>(target: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *target = value;
    }
}

/// 命令列參數覆蓋設定檔中儲存的參數
pub trait MergeInto<P> {
    fn merge_into(self, params: &mut P);
}

#[derive(Debug, Args)]
pub struct AuditArgs {
    #[arg(long)]
    pub root_directory: Option<PathBuf>,
    #[arg(long)]
    pub output_projects_csv: Option<PathBuf>,
    #[arg(long)]
    pub output_layers_csv: Option<PathBuf>,
    #[arg(long)]
    pub output_tables_csv: Option<PathBuf>,
    #[arg(long)]
    pub resolve_layers: Option<bool>,
    #[arg(long)]
    pub layer_name_filter: Option<String>,
    #[arg(long)]
    pub layer_datasource_filter: Option<String>,
    #[arg(long)]
    pub lizmap_properties: Option<bool>,
}

impl MergeInto<AuditParams> for AuditArgs {
    fn merge_into(self, params: &mut AuditParams) {
        merge_some(&mut params.root_directory, self.root_directory);
        merge_some(&mut params.output_projects_csv, self.output_projects_csv);
        merge_some(&mut params.output_layers_csv, self.output_layers_csv);
        merge_some(&mut params.output_tables_csv, self.output_tables_csv);
        merge(&mut params.resolve_layers, self.resolve_layers);
        merge(&mut params.layer_name_filter, self.layer_name_filter);
        merge(&mut params.layer_datasource_filter, self.layer_datasource_filter);
        merge(&mut params.lizmap_properties, self.lizmap_properties);
    }
}

#[derive(Debug, Args)]
pub struct RewriteDatasourcesArgs {
    #[arg(long)]
    pub input_folder: Option<PathBuf>,
    #[arg(long)]
    pub search_text: Option<String>,
    #[arg(long)]
    pub replace_text: Option<String>,
    #[arg(long)]
    pub recurse: Option<bool>,
    #[arg(long)]
    pub ignore_case: Option<bool>,
    #[arg(long)]
    pub full_word: Option<bool>,
    #[arg(long)]
    pub create_backup: Option<bool>,
    #[arg(long)]
    pub file_patterns: Option<String>,
}

impl MergeInto<RewriteDatasourcesParams> for RewriteDatasourcesArgs {
    fn merge_into(self, params: &mut RewriteDatasourcesParams) {
        merge_some(&mut params.input_folder, self.input_folder);
        merge_some(&mut params.search_text, self.search_text);
        merge(&mut params.replace_text, self.replace_text);
        merge(&mut params.recurse, self.recurse);
        merge(&mut params.ignore_case, self.ignore_case);
        merge(&mut params.full_word, self.full_word);
        merge(&mut params.create_backup, self.create_backup);
        merge(&mut params.file_patterns, self.file_patterns);
    }
}

#[derive(Debug, Args)]
pub struct ApplyAliasesArgs {
    #[arg(long)]
    pub project: Option<PathBuf>,
    /// Layer names or ids, comma separated
    #[arg(long, value_delimiter = ',')]
    pub layers: Option<Vec<String>>,
    #[arg(long)]
    pub table: Option<PathBuf>,
    #[arg(long)]
    pub name_column: Option<String>,
    #[arg(long)]
    pub alias_column: Option<String>,
    #[arg(long)]
    pub only_empty: Option<bool>,
    #[arg(long)]
    pub create_backup: Option<bool>,
}

impl MergeInto<ApplyAliasesParams> for ApplyAliasesArgs {
    fn merge_into(self, params: &mut ApplyAliasesParams) {
        merge_some(&mut params.project, self.project);
        merge(&mut params.layers, self.layers);
        merge_some(&mut params.table, self.table);
        merge_some(&mut params.name_column, self.name_column);
        merge_some(&mut params.alias_column, self.alias_column);
        merge(&mut params.only_empty, self.only_empty);
        merge(&mut params.create_backup, self.create_backup);
    }
}

#[derive(Debug, Args)]
pub struct RestrictFieldsArgs {
    #[arg(long)]
    pub project: Option<PathBuf>,
    #[arg(long, value_delimiter = ',')]
    pub layers: Option<Vec<String>>,
    #[arg(long)]
    pub read_only_prefix: Option<String>,
    #[arg(long)]
    pub excluded_prefix: Option<String>,
    #[arg(long)]
    pub exclude_primary_key: Option<bool>,
    #[arg(long)]
    pub create_backup: Option<bool>,
}

impl MergeInto<RestrictFieldsParams> for RestrictFieldsArgs {
    fn merge_into(self, params: &mut RestrictFieldsParams) {
        merge_some(&mut params.project, self.project);
        merge(&mut params.layers, self.layers);
        merge(&mut params.read_only_prefix, self.read_only_prefix);
        merge(&mut params.excluded_prefix, self.excluded_prefix);
        merge(&mut params.exclude_primary_key, self.exclude_primary_key);
        merge(&mut params.create_backup, self.create_backup);
    }
}

#[derive(Debug, Args)]
pub struct AddJoinsArgs {
    #[arg(long)]
    pub project: Option<PathBuf>,
    #[arg(long, value_delimiter = ',')]
    pub layers: Option<Vec<String>>,
    #[arg(long)]
    pub drop_existing_joins: Option<bool>,
    #[arg(long)]
    pub create_backup: Option<bool>,
}

impl MergeInto<ValueRelationJoinsParams> for AddJoinsArgs {
    fn merge_into(self, params: &mut ValueRelationJoinsParams) {
        merge_some(&mut params.project, self.project);
        merge(&mut params.layers, self.layers);
        merge(&mut params.drop_existing_joins, self.drop_existing_joins);
        merge(&mut params.create_backup, self.create_backup);
    }
}

#[derive(Debug, Args)]
pub struct MainColorArgs {
    #[arg(long)]
    pub project: Option<PathBuf>,
    #[arg(long)]
    pub layer: Option<String>,
    #[arg(long, allow_negative_numbers = true)]
    pub symbol_level: Option<i32>,
    #[arg(long)]
    pub color_field: Option<String>,
    #[arg(long)]
    pub label_field: Option<String>,
    #[arg(long)]
    pub create_backup: Option<bool>,
}

impl MergeInto<MainColorParams> for MainColorArgs {
    fn merge_into(self, params: &mut MainColorParams) {
        merge_some(&mut params.project, self.project);
        merge_some(&mut params.layer, self.layer);
        merge(&mut params.symbol_level, self.symbol_level);
        merge_some(&mut params.color_field, self.color_field);
        merge_some(&mut params.label_field, self.label_field);
        merge(&mut params.create_backup, self.create_backup);
    }
}

#[derive(Debug, Args)]
pub struct ExportGeopackageArgs {
    /// Connection name, defined under [connections.<name>] in the settings
    #[arg(long)]
    pub connection: Option<String>,
    #[arg(long)]
    pub schemas: Option<String>,
    #[arg(long)]
    pub destination: Option<PathBuf>,
    #[arg(long)]
    pub ogr2ogr: Option<PathBuf>,
}

impl MergeInto<ExportGeopackageParams> for ExportGeopackageArgs {
    fn merge_into(self, params: &mut ExportGeopackageParams) {
        merge_some(&mut params.connection, self.connection);
        merge_some(&mut params.schemas, self.schemas);
        merge_some(&mut params.destination, self.destination);
        merge(&mut params.ogr2ogr, self.ogr2ogr);
    }
}

#[derive(Debug, Args)]
pub struct ImportPostgresArgs {
    #[arg(long)]
    pub project: Option<PathBuf>,
    #[arg(long)]
    pub layer: Option<String>,
    #[arg(long)]
    pub connection: Option<String>,
    #[arg(long)]
    pub schema: Option<String>,
    #[arg(long)]
    pub table: Option<String>,
    #[arg(long)]
    pub primary_key: Option<String>,
    #[arg(long)]
    pub overwrite: Option<bool>,
    #[arg(long)]
    pub ogr2ogr: Option<PathBuf>,
}

impl MergeInto<ImportPostgresParams> for ImportPostgresArgs {
    fn merge_into(self, params: &mut ImportPostgresParams) {
        merge_some(&mut params.project, self.project);
        merge_some(&mut params.layer, self.layer);
        merge_some(&mut params.connection, self.connection);
        merge_some(&mut params.schema, self.schema);
        merge_some(&mut params.table, self.table);
        merge(&mut params.primary_key, self.primary_key);
        merge(&mut params.overwrite, self.overwrite);
        merge(&mut params.ogr2ogr, self.ogr2ogr);
    }
}

fn resolved<A: MergeInto<P>, P: Validate + Clone>(args: A, stored: &mut P) -> Result<P> {
    args.merge_into(stored);
    stored.validate()?;
    Ok(stored.clone())
}

impl Command {
    /// 合併命令列與設定檔的參數並驗證；成功後呼叫端再寫回設定檔
    pub fn resolve(self, store: &mut SettingsStore) -> Result<Operation> {
        let settings = &mut store.settings;
        let operation = match self {
            Command::Audit(args) => Operation::Audit(resolved(args, &mut settings.audit)?),
            Command::RewriteDatasources(args) => {
                Operation::RewriteDatasources(resolved(args, &mut settings.rewrite_datasources)?)
            }
            Command::ApplyAliases(args) => Operation::ApplyAliases(resolved(args, &mut settings.apply_aliases)?),
            Command::RestrictFields(args) => {
                Operation::RestrictFields(resolved(args, &mut settings.restrict_fields)?)
            }
            Command::AddJoins(args) => Operation::AddJoins(resolved(args, &mut settings.add_joins)?),
            Command::MainColor(args) => Operation::MainColor(resolved(args, &mut settings.main_color)?),
            Command::ExportGeopackage(args) => {
                let params = resolved(args, &mut settings.export_geopackage)?;
                let connection = store.connection(validate_required_field("connection", &params.connection)?)?;
                Operation::ExportGeopackage(params, connection)
            }
            Command::ImportPostgres(args) => {
                let params = resolved(args, &mut settings.import_postgres)?;
                let connection = store.connection(validate_required_field("connection", &params.connection)?)?;
                Operation::ImportPostgres(params, connection)
            }
        };
        Ok(operation)
    }
}
