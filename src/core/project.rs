use crate::core::layer::MapLayer;
use crate::core::xml::{Document, Element};
use crate::utils::error::{BatchError, Result};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// 版面中圖片物件的 item type
pub const LAYOUT_PICTURE_ITEM_TYPE: &str = "65640";

/// 專案檔的 XML 內容，`.qgz` 時另外記錄壓縮檔內的 `.qgs` 名稱
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectContent {
    pub xml: String,
    pub archive_entry: Option<String>,
}

pub fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("qgz"))
        .unwrap_or(false)
}

pub fn read_project_content(path: &Path) -> Result<ProjectContent> {
    if !is_archive(path) {
        return Ok(ProjectContent {
            xml: fs::read_to_string(path)?,
            archive_entry: None,
        });
    }

    let mut archive = ZipArchive::new(File::open(path)?)?;
    tracing::debug!(
        "Opening qgz {}: {:?}",
        path.display(),
        archive.file_names().collect::<Vec<_>>()
    );
    let entry_name = archive
        .file_names()
        .find(|name| name.to_lowercase().ends_with(".qgs"))
        .map(str::to_string)
        .ok_or_else(|| BatchError::project(path.display(), "no .qgs entry in the archive"))?;

    let mut xml = String::new();
    archive.by_name(&entry_name)?.read_to_string(&mut xml)?;
    Ok(ProjectContent {
        xml,
        archive_entry: Some(entry_name),
    })
}

/// 寫入專案內容；`.qgz` 時從 `source` 複製其他檔案，只替換 `.qgs`
pub fn write_project_content(
    xml: &str,
    source: &Path,
    dest: &Path,
    archive_entry: Option<&str>,
) -> Result<()> {
    let Some(entry_name) = archive_entry else {
        fs::write(dest, xml)?;
        return Ok(());
    };

    let mut archive = ZipArchive::new(File::open(source)?)?;
    let mut writer = ZipWriter::new(File::create(dest)?);
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        if entry.name() == entry_name {
            continue;
        }
        writer.raw_copy_file(entry)?;
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    writer.start_file(entry_name, options)?;
    writer.write_all(xml.as_bytes())?;
    writer.finish()?;
    Ok(())
}

/// `<file>.<timestamp>.bak`
pub fn backup_path(path: &Path, timestamp: i64) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.bak", timestamp));
    path.with_file_name(name)
}

/// 先把原檔改名為備份，再寫入新內容。
///
/// 寫入失敗時嘗試把備份改回原名。`keep_backup` 為 false 時，
/// 寫入成功後刪除備份。回傳保留下來的備份路徑。
pub fn save_with_backup(
    path: &Path,
    xml: &str,
    archive_entry: Option<&str>,
    timestamp: i64,
    keep_backup: bool,
) -> Result<Option<PathBuf>> {
    let backup = backup_path(path, timestamp);
    fs::rename(path, &backup)?;
    tracing::debug!("Backup created: {}", backup.display());

    if let Err(e) = write_project_content(xml, &backup, path, archive_entry) {
        tracing::error!("Writing {} failed, restoring backup: {}", path.display(), e);
        if path.exists() {
            let _ = fs::remove_file(path);
        }
        if let Err(restore) = fs::rename(&backup, path) {
            tracing::error!("Unable to restore {}: {}", backup.display(), restore);
        }
        return Err(e);
    }

    if keep_backup {
        Ok(Some(backup))
    } else {
        fs::remove_file(&backup)?;
        Ok(None)
    }
}

/// 專案存檔時的 QGIS 版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProjectVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ProjectVersion {
    /// `3.28.4-Firenze` → 3.28.4
    pub fn parse(version: &str) -> Option<Self> {
        let numeric = version.split('-').next()?.trim();
        let mut parts = numeric.split('.').map(|p| p.trim().parse::<u32>());
        let major = parts.next()?.ok()?;
        let minor = parts.next().and_then(|p| p.ok()).unwrap_or(0);
        let patch = parts.next().and_then(|p| p.ok()).unwrap_or(0);
        Some(Self {
            major,
            minor,
            patch,
        })
    }

    /// 版本整數，3.28.4 → 32804
    pub fn as_int(&self) -> u32 {
        self.major * 10000 + self.minor * 100 + self.patch
    }

    pub fn code(&self) -> String {
        format!("{}{:02}{:02}", self.major, self.minor, self.patch)
    }

    /// 3.16 起以欄位 configurationFlags 取代 excludeAttributesWMS/WFS
    pub fn uses_field_configuration_flags(&self) -> bool {
        self.as_int() >= 31600
    }
}

#[derive(Debug, Clone)]
pub struct QgisProject {
    path: PathBuf,
    document: Document,
    archive_entry: Option<String>,
}

impl QgisProject {
    pub fn open(path: &Path) -> Result<Self> {
        let content = read_project_content(path)?;
        Self::from_content(path, content)
    }

    pub fn from_content(path: &Path, content: ProjectContent) -> Result<Self> {
        let document = Document::parse(&content.xml)
            .map_err(|e| BatchError::project(path.display(), e.to_string()))?;
        if document.root.name != "qgis" {
            return Err(BatchError::project(
                path.display(),
                format!("unexpected root element <{}>", document.root.name),
            ));
        }
        Ok(Self {
            path: path.to_path_buf(),
            document,
            archive_entry: content.archive_entry,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn root(&self) -> &Element {
        &self.document.root
    }

    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.document.root
    }

    pub fn base_name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// 專案所在目錄，用於解析相對路徑
    pub fn directory(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.directory().join(candidate)
        }
    }

    pub fn layers(&self) -> Vec<MapLayer<'_>> {
        self.document
            .root
            .child("projectlayers")
            .map(|layers| layers.children_named("maplayer").map(MapLayer::new).collect())
            .unwrap_or_default()
    }

    pub fn layer_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> + '_ {
        self.document
            .root
            .child_mut("projectlayers")
            .into_iter()
            .flat_map(|layers| layers.children_named_mut("maplayer"))
    }

    pub fn layer_element_mut(&mut self, layer_id: &str) -> Option<&mut Element> {
        self.layer_elements_mut()
            .find(|element| MapLayer::new(element).id() == layer_id)
    }

    pub fn layer_by_id(&self, layer_id: &str) -> Option<MapLayer<'_>> {
        self.layers().into_iter().find(|layer| layer.id() == layer_id)
    }

    /// 以名稱或 ID 選取圖層，`selectors` 為空時選取全部向量圖層
    pub fn select_layers(&self, selectors: &[String]) -> Vec<MapLayer<'_>> {
        self.layers()
            .into_iter()
            .filter(|layer| layer.is_vector())
            .filter(|layer| selectors.is_empty() || selectors.iter().any(|s| layer.matches(s)))
            .collect()
    }

    pub fn crs_authid(&self) -> String {
        self.document
            .root
            .find(&["projectCrs", "spatialrefsys", "authid"])
            .map(|e| e.text().trim().to_string())
            .unwrap_or_default()
    }

    pub fn last_save_version(&self) -> Option<ProjectVersion> {
        self.document.root.attr("version").and_then(ProjectVersion::parse)
    }

    pub fn trust_layer_metadata(&self) -> bool {
        self.document
            .root
            .child("trust")
            .and_then(|e| e.attr("active"))
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// 版面與報表的數量
    pub fn print_layout_count(&self) -> usize {
        self.document
            .root
            .child("Layouts")
            .map(|l| l.children().filter(|e| e.name == "Layout" || e.name == "Report").count())
            .unwrap_or(0)
    }

    /// 版面 (不含報表) 中圖片物件的檔案路徑
    pub fn layout_picture_paths(&self) -> Vec<String> {
        let Some(layouts) = self.document.root.child("Layouts") else {
            return Vec::new();
        };
        layouts
            .children_named("Layout")
            .flat_map(|layout| layout.descendants_named("LayoutItem"))
            .filter(|item| item.attr("type") == Some(LAYOUT_PICTURE_ITEM_TYPE))
            .filter_map(|item| item.attr("file"))
            .filter(|file| !file.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn to_xml_string(&self) -> String {
        self.document.to_xml_string()
    }

    /// 以備份後覆寫的方式存檔
    pub fn save(&self, timestamp: i64, keep_backup: bool) -> Result<Option<PathBuf>> {
        save_with_backup(
            &self.path,
            &self.to_xml_string(),
            self.archive_entry.as_deref(),
            timestamp,
            keep_backup,
        )
    }
}
