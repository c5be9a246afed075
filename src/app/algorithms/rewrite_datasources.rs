//! 以文字取代的方式批次修改專案檔中所有圖層的 `<datasource>`

use super::{check_canceled, finish, report_progress, run_timestamp};
use crate::core::discovery::{collect_files, FilePatterns};
use crate::core::project::{read_project_content, save_with_backup};
use crate::core::xml::Document;
use crate::domain::model::AlgorithmOutput;
use crate::domain::ports::{Algorithm, Feedback};
use crate::utils::error::{BatchError, Result};
use crate::utils::validation::{validate_directory, validate_non_empty_string, validate_required_field, Validate};
use regex::{NoExpand, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_FILE_PATTERNS: &str = "*.qgs,*.qgz";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteDatasourcesParams {
    pub input_folder: Option<PathBuf>,
    pub search_text: Option<String>,
    pub replace_text: String,
    pub recurse: bool,
    pub ignore_case: bool,
    /// 只比對完整單字
    pub full_word: bool,
    pub create_backup: bool,
    pub file_patterns: String,
}

impl Default for RewriteDatasourcesParams {
    fn default() -> Self {
        Self {
            input_folder: None,
            search_text: None,
            replace_text: String::new(),
            recurse: false,
            ignore_case: true,
            full_word: false,
            create_backup: true,
            file_patterns: DEFAULT_FILE_PATTERNS.to_string(),
        }
    }
}

impl Validate for RewriteDatasourcesParams {
    fn validate(&self) -> Result<()> {
        let folder = validate_required_field("input_folder", &self.input_folder)?;
        validate_directory("input_folder", folder)?;
        let search = validate_required_field("search_text", &self.search_text)?;
        validate_non_empty_string("search_text", search)?;
        FilePatterns::parse(&self.file_patterns)?;
        Ok(())
    }
}

/// 搜尋文字視為一般字串，不是正規表示式
pub fn build_search_regex(search_text: &str, ignore_case: bool, full_word: bool) -> Result<Regex> {
    let escaped = regex::escape(search_text);
    let pattern = if full_word {
        format!(r"\b{}\b", escaped)
    } else {
        escaped
    };
    RegexBuilder::new(&pattern)
        .case_insensitive(ignore_case)
        .build()
        .map_err(|e| BatchError::InvalidConfigValueError {
            field: "search_text".to_string(),
            value: search_text.to_string(),
            reason: e.to_string(),
        })
}

/// 取代每個 `<datasource>` 中第一個符合的文字，沒有變更時回傳 None
pub fn rewrite_datasources(xml: &str, search: &Regex, replacement: &str) -> Result<Option<String>> {
    let mut document = Document::parse(xml)?;
    let mut changed = 0;

    document.root.for_each_descendant_mut(&mut |element| {
        if element.name != "datasource" {
            return;
        }
        let text = element.text();
        let replaced = search.replacen(&text, 1, NoExpand(replacement));
        if replaced != text {
            tracing::debug!("Datasource rewritten: {} -> {}", text, replaced);
            element.set_text(&replaced);
            changed += 1;
        }
    });

    if changed == 0 {
        Ok(None)
    } else {
        Ok(Some(document.to_xml_string()))
    }
}

pub struct RewriteDatasources {
    params: RewriteDatasourcesParams,
}

impl RewriteDatasources {
    pub fn new(params: RewriteDatasourcesParams) -> Self {
        Self { params }
    }

    /// 回傳檔案是否被修改
    fn rewrite_file(&self, file: &Path, search: &Regex, timestamp: i64) -> Result<bool> {
        let content = read_project_content(file)?;
        let Some(xml) = rewrite_datasources(&content.xml, search, &self.params.replace_text)? else {
            return Ok(false);
        };
        let backup = save_with_backup(
            file,
            &xml,
            content.archive_entry.as_deref(),
            timestamp,
            self.params.create_backup,
        )?;
        if let Some(backup) = backup {
            tracing::debug!("Backup kept at {}", backup.display());
        }
        Ok(true)
    }
}

impl Algorithm for RewriteDatasources {
    fn name(&self) -> &'static str {
        "rewrite_datasources"
    }

    fn display_name(&self) -> &'static str {
        "Update project datasources"
    }

    fn process(&self, feedback: &dyn Feedback) -> Result<AlgorithmOutput> {
        self.params.validate()?;
        let folder = validate_required_field("input_folder", &self.params.input_folder)?;
        let search_text = validate_required_field("search_text", &self.params.search_text)?;
        let search = build_search_regex(search_text, self.params.ignore_case, self.params.full_word)?;
        let patterns = FilePatterns::parse(&self.params.file_patterns)?;

        let files = collect_files(folder, &patterns, self.params.recurse);
        feedback.push_info(&format!("{} file(s) to inspect in {}", files.len(), folder.display()));

        let timestamp = run_timestamp();
        let total = files.len();
        let mut modified = Vec::new();
        let mut failed = Vec::new();

        for (current, file) in files.iter().enumerate() {
            check_canceled(feedback)?;
            report_progress(feedback, current, total);
            feedback.set_progress_text(&format!("Processing {}", file.display()));

            match self.rewrite_file(file, &search, timestamp) {
                Ok(true) => {
                    feedback.push_info(&format!("Modified: {}", file.display()));
                    modified.push(file.display().to_string());
                }
                Ok(false) => feedback.push_debug(&format!("Unchanged: {}", file.display())),
                Err(e) => {
                    feedback.report_error(&format!("{}: {}", file.display(), e), false);
                    failed.push(file.display().to_string());
                }
            }
        }
        report_progress(feedback, total, total);

        let output = AlgorithmOutput::new()
            .with("file_count", total)
            .with("modified_count", modified.len())
            .with("modified", modified);
        finish(self.name(), failed, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECT: &str = r#"<qgis version="3.28.4-Firenze">
  <projectlayers>
    <maplayer type="vector">
      <id>a</id>
      <datasource>dbname='gis' host=OLD_HOST port=5432 table="public"."a" (geom)</datasource>
    </maplayer>
    <maplayer type="vector">
      <id>b</id>
      <datasource>dbname='gis' host=old_host_backup port=5432 table="public"."b" (geom)</datasource>
    </maplayer>
  </projectlayers>
</qgis>
"#;

    #[test]
    fn test_search_text_is_literal() {
        let regex = build_search_regex("a.b", false, false).unwrap();
        assert!(regex.is_match("a.b"));
        assert!(!regex.is_match("axb"));
    }

    #[test]
    fn test_full_word_does_not_match_substrings() {
        let regex = build_search_regex("old_host", true, true).unwrap();
        let xml = rewrite_datasources(PROJECT, &regex, "new-host").unwrap().unwrap();
        assert!(xml.contains("host=new-host port=5432 table=\"public\".\"a\""));
        assert!(xml.contains("host=old_host_backup"));
    }

    #[test]
    fn test_case_sensitive_search() {
        let regex = build_search_regex("old_host", false, false).unwrap();
        let xml = rewrite_datasources(PROJECT, &regex, "x").unwrap().unwrap();
        assert!(xml.contains("host=OLD_HOST"));
        assert!(xml.contains("host=x_backup"));
    }

    #[test]
    fn test_replacement_is_literal_and_first_match_only() {
        let xml = "<qgis><datasource>aaa</datasource></qgis>";
        let regex = build_search_regex("a", false, false).unwrap();
        let rewritten = rewrite_datasources(xml, &regex, "$0b").unwrap().unwrap();
        assert!(rewritten.contains("<datasource>$0baa</datasource>"));
    }

    #[test]
    fn test_no_match_returns_none() {
        let regex = build_search_regex("missing", true, false).unwrap();
        assert!(rewrite_datasources(PROJECT, &regex, "x").unwrap().is_none());
    }

    #[test]
    fn test_default_parameters() {
        let params = RewriteDatasourcesParams::default();
        assert!(params.ignore_case);
        assert!(params.create_backup);
        assert!(!params.full_word);
        assert_eq!(params.file_patterns, "*.qgs,*.qgz");
    }
}
