mod common;

use anyhow::Result;
use common::{write_file, write_qgz, RecordingFeedback};
use qgs_batch::app::algorithms::{AuditParams, AuditProjects};
use qgs_batch::core::Algorithm;
use qgs_batch::BatchError;
use std::path::Path;
use tempfile::TempDir;

const CITY: &str = r#"<!DOCTYPE qgis PUBLIC 'http://mrcc.com/qgis.dtd' 'SYSTEM'>
<qgis version="3.28.4-Firenze" projectname="city">
  <projectCrs><spatialrefsys><authid>EPSG:2154</authid></spatialrefsys></projectCrs>
  <trust active="1"/>
  <projectlayers>
    <maplayer type="vector">
      <id>roads_1</id>
      <datasource>service='gis' key='id' table="public"."roads" (geom)</datasource>
      <layername>Roads</layername>
      <provider>postgres</provider>
    </maplayer>
    <maplayer type="vector">
      <id>trees_2</id>
      <datasource>./data/trees.shp</datasource>
      <layername>Trees</layername>
      <provider>ogr</provider>
    </maplayer>
  </projectlayers>
  <Layouts>
    <Layout name="A4">
      <LayoutItem type="65640" file="./img/logo.png"/>
      <LayoutItem type="65640" file="./img/logo.png"/>
      <LayoutItem type="65640" file="./img/missing.png"/>
    </Layout>
  </Layouts>
</qgis>
"#;

const RURAL: &str = r#"<qgis version="3.34.0-Prizren">
  <projectCrs><spatialrefsys><authid>EPSG:4326</authid></spatialrefsys></projectCrs>
  <projectlayers>
    <maplayer type="vector">
      <id>roads_9</id>
      <datasource>service='gis' key='id' table="public"."roads" (geom)</datasource>
      <layername>Roads</layername>
      <provider>postgres</provider>
    </maplayer>
    <maplayer type="vector">
      <id>ghost_3</id>
      <layername>Ghost</layername>
      <provider>ogr</provider>
    </maplayer>
  </projectlayers>
</qgis>
"#;

fn read_rows(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(false).from_path(path).unwrap();
    reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect()
}

fn project_tree() -> (TempDir, TempDir) {
    let root = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_file(root.path(), "a/city.qgs", CITY);
    write_file(root.path(), "a/img/logo.png", &"x".repeat(1024));
    write_file(
        root.path(),
        "a/city.qgs.cfg",
        r#"{"metadata": {"qgis_desktop_version": 32804, "lizmap_plugin_version": "4.1.0", "project_valid": true}}"#,
    );
    write_qgz(root.path(), "B/rural.qgz", RURAL);
    (root, output)
}

/// 完整稽核：專案、資料來源與資料表三份 CSV
#[test]
fn test_audit_writes_the_three_reports() -> Result<()> {
    let (root, output) = project_tree();
    let params = AuditParams {
        root_directory: Some(root.path().to_path_buf()),
        output_projects_csv: Some(output.path().join("projects.csv")),
        output_layers_csv: Some(output.path().join("layers.csv")),
        output_tables_csv: Some(output.path().join("tables.csv")),
        resolve_layers: true,
        lizmap_properties: true,
        ..Default::default()
    };
    let feedback = RecordingFeedback::new();

    let result = AuditProjects::new(params).process(&feedback)?;
    assert_eq!(result.get("project_count"), Some(&serde_json::json!(2)));
    assert_eq!(result.get("audited_count"), Some(&serde_json::json!(2)));

    let projects = read_rows(&output.path().join("projects.csv"));
    assert_eq!(projects.len(), 3);
    assert_eq!(projects[0].len(), 19);
    assert_eq!(projects[0][0], "path");
    assert_eq!(projects[0][18], "project_valid");

    let city = &projects[1];
    assert!(city[0].ends_with("city.qgs"));
    assert_eq!(city[1], "city");
    assert_eq!(city[3], "EPSG:2154");
    assert_eq!(city[4], "2");
    // trees.shp does not exist
    assert_eq!(city[5], "1");
    assert_eq!(city[7], "1");
    assert!(city[8].ends_with("logo.png"));
    assert!(!city[8].contains('|'));
    assert_eq!(city[9], "1024");
    assert_eq!(city[10], "2048");
    assert_eq!(city[11], "0.00");
    assert_eq!(city[12], "True");
    assert_eq!(city[13], "32804");
    assert_eq!(&city[14..], &["True", "32804", "4.1.0", "", "True"]);

    let rural = &projects[2];
    assert_eq!(rural[1], "rural");
    assert_eq!(rural[3], "EPSG:4326");
    // ghost layer counts as invalid
    assert_eq!(rural[5], "1");
    assert_eq!(rural[12], "False");
    assert_eq!(rural[13], "33400");
    assert_eq!(rural[14], "False");

    let tables = read_rows(&output.path().join("tables.csv"));
    assert_eq!(tables[0], vec!["table", "projects"]);
    assert_eq!(tables[1], vec!["\"public\".\"roads\"", "a/city.qgs|B/rural.qgz"]);

    let layers = read_rows(&output.path().join("layers.csv"));
    assert_eq!(layers[0], vec!["datasource", "layer_names", "projects"]);
    let ghost = layers.iter().find(|row| row[0] == "GHOST").unwrap();
    assert_eq!(ghost[1], "Ghost");
    let roads = layers.iter().find(|row| row[0].contains("\"roads\"")).unwrap();
    assert_eq!(roads[1], "Roads");
    assert_eq!(roads[2], "a/city.qgs|B/rural.qgz");

    let ghost_errors: Vec<_> = feedback.errors().into_iter().filter(|(m, _)| m.contains("ghost layer")).collect();
    assert_eq!(ghost_errors.len(), 1);
    assert!(!ghost_errors[0].1);

    let raw = std::fs::read_to_string(output.path().join("tables.csv"))?;
    assert!(raw.starts_with("\"table\",\"projects\""));
    Ok(())
}

/// 篩選條件沒有符合的圖層時略過專案
#[test]
fn test_audit_filters_skip_projects() -> Result<()> {
    let (root, output) = project_tree();
    let params = AuditParams {
        root_directory: Some(root.path().to_path_buf()),
        output_projects_csv: Some(output.path().join("projects.csv")),
        output_tables_csv: Some(output.path().join("tables.csv")),
        layer_name_filter: "  TREE ".to_string(),
        ..Default::default()
    };
    let feedback = RecordingFeedback::new();

    let result = AuditProjects::new(params).process(&feedback)?;
    assert_eq!(result.get("audited_count"), Some(&serde_json::json!(1)));

    let projects = read_rows(&output.path().join("projects.csv"));
    assert_eq!(projects.len(), 2);
    assert_eq!(projects[1][1], "city");
    assert_eq!(projects[0].len(), 14);
    // not requested
    assert_eq!(projects[1][5], "");

    // the postgres layer does not match the name filter
    let tables = read_rows(&output.path().join("tables.csv"));
    assert_eq!(tables.len(), 1);
    assert!(feedback.infos().iter().any(|m| m.contains("Skipping")));
    Ok(())
}

#[test]
fn test_audit_without_project_creates_nothing() -> Result<()> {
    let root = TempDir::new()?;
    let output = TempDir::new()?;
    let projects_csv = output.path().join("projects.csv");
    let params = AuditParams {
        root_directory: Some(root.path().to_path_buf()),
        output_projects_csv: Some(projects_csv.clone()),
        ..Default::default()
    };
    let feedback = RecordingFeedback::new();

    let result = AuditProjects::new(params).process(&feedback)?;
    assert_eq!(result.get("project_count"), Some(&serde_json::json!(0)));
    assert!(!projects_csv.exists());
    assert!(feedback.infos().iter().any(|m| m == "No project found in the given directory"));
    Ok(())
}

/// 無法讀取的專案不中斷稽核，最後回報部分失敗
#[test]
fn test_unreadable_project_is_a_partial_failure() -> Result<()> {
    let (root, output) = project_tree();
    write_file(root.path(), "broken.qgs", "<qgis><projectlayers>");
    let projects_csv = output.path().join("projects.csv");
    let params = AuditParams {
        root_directory: Some(root.path().to_path_buf()),
        output_projects_csv: Some(projects_csv.clone()),
        ..Default::default()
    };
    let feedback = RecordingFeedback::new();

    match AuditProjects::new(params).process(&feedback) {
        Err(BatchError::PartialFailure { algorithm, failed }) => {
            assert_eq!(algorithm, "audit");
            assert_eq!(failed, vec!["broken.qgs"]);
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(read_rows(&projects_csv).len(), 3);
    Ok(())
}

#[test]
fn test_malformed_lizmap_config_is_fatal() {
    let (root, output) = project_tree();
    write_file(root.path(), "a/city.qgs.cfg", "{ not json");
    let params = AuditParams {
        root_directory: Some(root.path().to_path_buf()),
        output_projects_csv: Some(output.path().join("projects.csv")),
        lizmap_properties: true,
        ..Default::default()
    };

    let result = AuditProjects::new(params).process(&RecordingFeedback::new());
    assert!(matches!(result, Err(BatchError::SerializationError(_))));
}

#[test]
fn test_canceled_audit_still_writes_reports() {
    let (root, output) = project_tree();
    let projects_csv = output.path().join("projects.csv");
    let params = AuditParams {
        root_directory: Some(root.path().to_path_buf()),
        output_projects_csv: Some(projects_csv.clone()),
        ..Default::default()
    };

    let result = AuditProjects::new(params).process(&RecordingFeedback::canceled());
    assert!(matches!(result, Err(BatchError::Canceled)));
    assert_eq!(read_rows(&projects_csv).len(), 1);
}
