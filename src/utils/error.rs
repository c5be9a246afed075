use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("XML error in {context}: {message}")]
    XmlError { context: String, message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing required parameter: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Project error ({path}): {message}")]
    ProjectError { path: String, message: String },

    #[error("External tool '{program}' failed: {message}")]
    ToolError { program: String, message: String },

    #[error("Operation canceled")]
    Canceled,

    #[error("{algorithm}: {} item(s) failed: {}", failed.len(), failed.join(", "))]
    PartialFailure {
        algorithm: String,
        failed: Vec<String>,
    },
}

pub type Result<T> = std::result::Result<T, BatchError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Input,
    Processing,
    External,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl BatchError {
    pub fn xml(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        BatchError::XmlError {
            context: context.into(),
            message: err.to_string(),
        }
    }

    pub fn project(path: impl std::fmt::Display, message: impl Into<String>) -> Self {
        BatchError::ProjectError {
            path: path.to_string(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        BatchError::ConfigError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            BatchError::ConfigError { .. }
            | BatchError::MissingConfigError { .. }
            | BatchError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            BatchError::XmlError { .. }
            | BatchError::ProjectError { .. }
            | BatchError::SerializationError(_) => ErrorCategory::Input,
            BatchError::CsvError(_)
            | BatchError::Canceled
            | BatchError::PartialFailure { .. } => ErrorCategory::Processing,
            BatchError::ToolError { .. } => ErrorCategory::External,
            BatchError::IoError(_) | BatchError::ZipError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            BatchError::Canceled => ErrorSeverity::Low,
            BatchError::PartialFailure { .. } => ErrorSeverity::Medium,
            BatchError::IoError(_) | BatchError::ZipError(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => {
                "Check the command line arguments and the settings file"
            }
            ErrorCategory::Input => "Open the project in QGIS and save it again, or fix the file by hand",
            ErrorCategory::Processing => "Inspect the log above for the items that failed and run again",
            ErrorCategory::External => "Make sure ogr2ogr is installed and the connection parameters are valid",
            ErrorCategory::System => "Check file permissions and available disk space",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            BatchError::MissingConfigError { field } => {
                format!("The parameter '{}' is required but was not given", field)
            }
            BatchError::PartialFailure { failed, .. } => {
                format!("Finished with errors on: {}", failed.join(", "))
            }
            BatchError::Canceled => "The operation was canceled".to_string(),
            other => other.to_string(),
        }
    }

    /// 取得程序結束代碼
    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }
}
