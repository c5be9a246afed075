use crate::domain::model::AlgorithmOutput;
use crate::utils::error::Result;
use std::path::Path;

/// 演算法回報進度與訊息的通道
///
/// 取消為協作式：演算法在每次外層迴圈開始時呼叫 `is_canceled`。
pub trait Feedback: Send + Sync {
    fn push_info(&self, message: &str);
    fn push_debug(&self, message: &str);
    fn push_warning(&self, message: &str);
    /// `fatal` 為 true 時，呼叫端隨後會以錯誤結束
    fn report_error(&self, message: &str, fatal: bool);
    fn set_progress(&self, percent: f64);
    fn set_progress_text(&self, text: &str);
    fn is_canceled(&self) -> bool;
}

pub trait Algorithm: Send + Sync {
    /// 設定檔中的區段名稱
    fn name(&self) -> &'static str;
    fn display_name(&self) -> &'static str;
    fn process(&self, feedback: &dyn Feedback) -> Result<AlgorithmOutput>;
}

impl<A: Algorithm + ?Sized> Algorithm for Box<A> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn display_name(&self) -> &'static str {
        (**self).display_name()
    }

    fn process(&self, feedback: &dyn Feedback) -> Result<AlgorithmOutput> {
        (**self).process(feedback)
    }
}

/// 外部轉檔工具 (ogr2ogr) 的執行介面
pub trait ToolRunner: Send + Sync {
    fn run(&self, program: &Path, args: &[String], feedback: &dyn Feedback) -> Result<()>;
}
