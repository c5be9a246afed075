#![allow(dead_code)]

use qgs_batch::core::{Feedback, ToolRunner};
use qgs_batch::Result;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// 記錄所有訊息的 Feedback，可預先設定為已取消
#[derive(Default)]
pub struct RecordingFeedback {
    pub infos: Mutex<Vec<String>>,
    pub warnings: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<(String, bool)>>,
    pub progress: Mutex<Vec<f64>>,
    canceled: AtomicBool,
}

impl RecordingFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn canceled() -> Self {
        let feedback = Self::default();
        feedback.canceled.store(true, Ordering::SeqCst);
        feedback
    }

    pub fn infos(&self) -> Vec<String> {
        self.infos.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<(String, bool)> {
        self.errors.lock().unwrap().clone()
    }
}

impl Feedback for RecordingFeedback {
    fn push_info(&self, message: &str) {
        self.infos.lock().unwrap().push(message.to_string());
    }

    fn push_debug(&self, _message: &str) {}

    fn push_warning(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }

    fn report_error(&self, message: &str, fatal: bool) {
        self.errors.lock().unwrap().push((message.to_string(), fatal));
    }

    fn set_progress(&self, percent: f64) {
        self.progress.lock().unwrap().push(percent);
    }

    fn set_progress_text(&self, _text: &str) {}

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

/// 不執行外部程式，只記錄參數；可指定要建立的輸出檔
#[derive(Default)]
pub struct FakeRunner {
    pub calls: Mutex<Vec<(PathBuf, Vec<String>)>>,
    pub creates: Option<PathBuf>,
}

impl FakeRunner {
    pub fn creating(path: &Path) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            creates: Some(path.to_path_buf()),
        }
    }

    pub fn calls(&self) -> Vec<(PathBuf, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ToolRunner for FakeRunner {
    fn run(&self, program: &Path, args: &[String], _feedback: &dyn Feedback) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((program.to_path_buf(), args.to_vec()));
        if let Some(path) = &self.creates {
            fs::write(path, b"SQLite format 3\0")?;
        }
        Ok(())
    }
}

impl ToolRunner for &FakeRunner {
    fn run(&self, program: &Path, args: &[String], feedback: &dyn Feedback) -> Result<()> {
        (**self).run(program, args, feedback)
    }
}

pub fn write_file(dir: &Path, relative: &str, content: &str) -> PathBuf {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// 建立只含一個 `.qgs` 項目的 `.qgz`
pub fn write_qgz(dir: &Path, relative: &str, xml: &str) -> PathBuf {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let file = fs::File::create(&path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    let entry = format!(
        "{}.qgs",
        path.file_stem().unwrap().to_string_lossy()
    );
    zip.start_file(entry, options).unwrap();
    zip.write_all(xml.as_bytes()).unwrap();
    zip.start_file("project_attachments.zip", options).unwrap();
    zip.write_all(b"attachments").unwrap();
    zip.finish().unwrap();
    path
}

/// 列出目錄中的備份檔
pub fn backups(dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().map(|e| e == "bak").unwrap_or(false))
        .collect();
    found.sort();
    found
}
