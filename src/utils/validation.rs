use crate::utils::error::{BatchError, Result};
use std::collections::HashSet;
use std::path::Path;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_path(field_name: &str, path: &Path) -> Result<()> {
    let text = path.to_string_lossy();
    if text.is_empty() {
        return Err(BatchError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: text.to_string(),
            reason: "Path cannot be empty".to_string(),
        });
    }

    if text.contains('\0') {
        return Err(BatchError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: text.to_string(),
            reason: "Path contains null bytes".to_string(),
        });
    }

    Ok(())
}

pub fn validate_directory(field_name: &str, path: &Path) -> Result<()> {
    validate_path(field_name, path)?;
    if !path.is_dir() {
        return Err(BatchError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.display().to_string(),
            reason: "Not an existing directory".to_string(),
        });
    }
    Ok(())
}

pub fn validate_existing_file(field_name: &str, path: &Path) -> Result<()> {
    validate_path(field_name, path)?;
    if !path.is_file() {
        return Err(BatchError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.display().to_string(),
            reason: "File does not exist".to_string(),
        });
    }
    Ok(())
}

pub fn validate_file_extensions(field_name: &str, files: &[&Path], allowed_extensions: &[&str]) -> Result<()> {
    let allowed_set: HashSet<&str> = allowed_extensions.iter().copied().collect();

    for file in files {
        match file.extension().and_then(|ext| ext.to_str()) {
            Some(extension) if allowed_set.contains(extension.to_lowercase().as_str()) => {}
            Some(extension) => {
                return Err(BatchError::InvalidConfigValueError {
                    field: field_name.to_string(),
                    value: file.display().to_string(),
                    reason: format!(
                        "Unsupported file extension: {}. Allowed extensions: {}",
                        extension,
                        allowed_extensions.join(", ")
                    ),
                });
            }
            None => {
                return Err(BatchError::InvalidConfigValueError {
                    field: field_name.to_string(),
                    value: file.display().to_string(),
                    reason: "File has no extension or invalid filename".to_string(),
                });
            }
        }
    }

    Ok(())
}

pub fn validate_required_field<'a, T>(field_name: &str, value: &'a Option<T>) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| BatchError::MissingConfigError {
        field: field_name.to_string(),
    })
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(BatchError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(BatchError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}
