pub mod algorithms;

use crate::domain::model::PostgresConnection;
use crate::domain::ports::{Algorithm, ToolRunner};
use algorithms::*;

/// 參數已解析完成、可直接執行的操作
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Audit(AuditParams),
    RewriteDatasources(RewriteDatasourcesParams),
    ApplyAliases(ApplyAliasesParams),
    RestrictFields(RestrictFieldsParams),
    AddJoins(ValueRelationJoinsParams),
    MainColor(MainColorParams),
    ExportGeopackage(ExportGeopackageParams, PostgresConnection),
    ImportPostgres(ImportPostgresParams, PostgresConnection),
}

impl Operation {
    /// 建立對應的演算法，`runner` 只有 ogr2ogr 相關操作會使用
    pub fn into_algorithm<R: ToolRunner + 'static>(self, runner: R) -> Box<dyn Algorithm> {
        match self {
            Operation::Audit(params) => Box::new(AuditProjects::new(params)),
            Operation::RewriteDatasources(params) => Box::new(RewriteDatasources::new(params)),
            Operation::ApplyAliases(params) => Box::new(ApplyAliases::new(params)),
            Operation::RestrictFields(params) => Box::new(RestrictFields::new(params)),
            Operation::AddJoins(params) => Box::new(ValueRelationJoins::new(params)),
            Operation::MainColor(params) => Box::new(MainColor::new(params)),
            Operation::ExportGeopackage(params, connection) => {
                Box::new(ExportGeopackage::new(params, connection, runner))
            }
            Operation::ImportPostgres(params, connection) => {
                Box::new(ImportPostgres::new(params, connection, runner))
            }
        }
    }
}
