//! ogr2ogr 指令組裝與執行

use crate::core::datasource_uri::DataSourceUri;
use crate::domain::model::PostgresConnection;
use crate::domain::ports::{Feedback, ToolRunner};
use crate::utils::error::{BatchError, Result};
use regex::Regex;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

pub const DEFAULT_PROGRAM: &str = "ogr2ogr";

/// 匯入 PostgreSQL 時不複製的欄位 (ArcGIS / Oracle 系統欄位)
pub const EXCLUDED_FIELDS: [&str; 10] = [
    "APIC_CDATE",
    "APIC_MDATE",
    "APIC_SPACE",
    "APIC_STATE",
    "APIC_STYLE",
    "OBJECTID",
    "Shape_Area",
    "Shape_Length",
    "FDO_OBJECTID",
    "GEOMETRY",
];

fn push_param(parts: &mut Vec<String>, key: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        parts.push(format!("{}={}", key, value));
    }
}

/// `PG:` 連線字串 (不含前綴)
pub fn pg_connection_params(connection: &PostgresConnection) -> String {
    let mut parts = Vec::new();
    if let Some(service) = connection.service.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("service={}", service));
        return parts.join(" ");
    }
    push_param(&mut parts, "host", connection.host.as_deref());
    push_param(
        &mut parts,
        "port",
        connection.port.map(|p| p.to_string()).as_deref(),
    );
    push_param(&mut parts, "dbname", connection.dbname.as_deref());
    push_param(&mut parts, "user", connection.user.as_deref());
    push_param(&mut parts, "password", connection.password.as_deref());
    parts.join(" ")
}

pub fn pg_source(connection: &PostgresConnection) -> String {
    format!("PG:{}", pg_connection_params(connection))
}

/// 由圖層的資料來源字串取出 PostgreSQL 連線設定
pub fn connection_from_uri(uri: &DataSourceUri) -> PostgresConnection {
    PostgresConnection {
        service: uri.service().map(str::to_string),
        host: uri.host().map(str::to_string),
        port: uri.port().and_then(|p| p.parse().ok()),
        dbname: uri.database().map(str::to_string),
        user: uri.username().map(str::to_string),
        password: uri.password().map(str::to_string),
    }
}

/// `OCI:user/password@host:port/dbname`
pub fn oci_source(uri: &DataSourceUri) -> String {
    let mut source = String::from("OCI:");
    if let Some(user) = uri.username() {
        source.push_str(user);
        if let Some(password) = uri.password() {
            source.push('/');
            source.push_str(password);
        }
        source.push('@');
    }
    if let Some(host) = uri.host() {
        source.push_str(host);
        if let Some(port) = uri.port() {
            source.push(':');
            source.push_str(port);
        }
        source.push('/');
    }
    source.push_str(uri.database().unwrap_or(""));
    source
}

fn password_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"password=\S+").expect("valid password pattern"),
            Regex::new(r"^(OCI:[^/@]*)/[^@]*@").expect("valid oci pattern"),
        ]
    })
}

/// 日誌用：遮蔽參數中的密碼
pub fn mask_password(argument: &str) -> String {
    let [pg, oci] = password_patterns();
    let masked = pg.replace_all(argument, "password=*****");
    oci.replace(&masked, "$1/*****@").to_string()
}

/// 可顯示的指令列，密碼已遮蔽
pub fn command_line(program: &Path, args: &[String]) -> String {
    let mut parts = vec![program.display().to_string()];
    parts.extend(args.iter().map(|arg| {
        let masked = mask_password(arg);
        if masked.contains(' ') {
            format!("\"{}\"", masked)
        } else {
            masked
        }
    }));
    parts.join(" ")
}

/// 圖層 wkbType 對應到 `-nlt` 參數
pub fn geometry_type_code(wkb_type: &str) -> &'static str {
    let base = wkb_type
        .trim()
        .trim_end_matches("25D")
        .trim_end_matches("ZM")
        .trim_end_matches(['Z', 'M']);
    match base.to_ascii_lowercase().as_str() {
        "point" => "POINT",
        "linestring" | "line" => "LINESTRING",
        "polygon" => "POLYGON",
        "multipoint" => "MULTIPOINT",
        "multilinestring" => "MULTILINESTRING",
        "multipolygon" => "MULTIPOLYGON",
        "geometrycollection" => "GEOMETRYCOLLECTION",
        "circularstring" => "CIRCULARSTRING",
        "compoundcurve" => "COMPOUNDCURVE",
        "curvepolygon" => "CURVEPOLYGON",
        "multicurve" => "MULTICURVE",
        "multisurface" => "MULTISURFACE",
        "nogeometry" | "no geometry" => "NONE",
        _ => "GEOMETRY",
    }
}

/// 以子程序執行外部工具，輸出逐行轉送到 feedback
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(&self, program: &Path, args: &[String], feedback: &dyn Feedback) -> Result<()> {
        let program_name = program.display().to_string();
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| BatchError::ToolError {
                program: program_name.clone(),
                message: e.to_string(),
            })?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            if !line.trim().is_empty() {
                feedback.push_debug(line);
            }
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines() {
            if !line.trim().is_empty() {
                feedback.push_warning(&mask_password(line));
            }
        }

        if output.status.success() {
            Ok(())
        } else {
            let last_line = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(mask_password)
                .unwrap_or_default();
            Err(BatchError::ToolError {
                program: program_name,
                message: format!("{} {}", output.status, last_line).trim().to_string(),
            })
        }
    }
}
