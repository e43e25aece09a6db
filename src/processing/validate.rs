//! Stateless upload validation (`spec.md` §4.3 "validate"): runs before any
//! bytes are parsed or chunked, so rejection is immediate and cheap.
use crate::config::Config;

use super::types::{ValidateRequest, ValidationError, ValidationResult};

const SUSPICIOUS_SUFFIXES: [&str; 6] = [".exe", ".sh", ".bat", ".cmd", ".ps1", ".scr"];

/// Validate `request` against `config`'s size/format policy.
pub fn validate(request: &ValidateRequest, config: &Config) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if request.file_size > config.max_file_size {
        errors.push(format!(
            "file size {} exceeds maximum {}",
            request.file_size, config.max_file_size
        ));
    }

    let extension = extension_of(&request.file_name);
    let format_supported = config
        .supported_formats
        .iter()
        .any(|format| format.eq_ignore_ascii_case(&extension));
    if !format_supported {
        errors.push(format!("unsupported file format: {extension}"));
    }

    if let Some(expected_prefix) = expected_mime_prefix(&extension)
        && !request.content_type.to_ascii_lowercase().starts_with(expected_prefix)
    {
        errors.push(
            ValidationError::ContentTypeMismatch {
                advertised: request.content_type.clone(),
                detected: expected_prefix.to_string(),
            }
            .to_string(),
        );
    }

    if has_double_extension(&request.file_name) {
        warnings.push(format!("file name has multiple extensions: {}", request.file_name));
    }
    let lower_name = request.file_name.to_ascii_lowercase();
    if SUSPICIOUS_SUFFIXES.iter().any(|suffix| lower_name.ends_with(suffix)) {
        errors.push(format!("suspicious file name: {}", request.file_name));
    }

    let estimated_processing_time_ms = estimate_processing_time_ms(request.file_size);
    let supported_features = features_for(&extension);

    ValidationResult {
        is_valid: errors.is_empty(),
        errors,
        warnings,
        estimated_processing_time_ms,
        supported_features,
    }
}

fn extension_of(file_name: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Expected MIME type prefix for an advertised extension, or `None` when the
/// format carries no fixed content type worth cross-checking.
fn expected_mime_prefix(extension: &str) -> Option<&'static str> {
    match extension {
        "txt" => Some("text/plain"),
        "csv" => Some("text/csv"),
        "md" | "markdown" => Some("text/markdown"),
        "json" => Some("application/json"),
        _ => None,
    }
}

fn has_double_extension(file_name: &str) -> bool {
    file_name.matches('.').count() >= 2
}

/// Rough linear estimate: ~1ms per KB, floored at 10ms.
fn estimate_processing_time_ms(file_size: u64) -> u64 {
    (file_size / 1024).max(10)
}

fn features_for(extension: &str) -> Vec<String> {
    match extension {
        "csv" => vec!["table_flattening".to_string(), "column_type_detection".to_string()],
        "md" | "markdown" => vec![
            "table_flattening".to_string(),
            "heading_preservation".to_string(),
            "list_flattening".to_string(),
        ],
        _ => vec!["plain_text".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_config() -> Config {
        Config {
            embedding_dim: 384,
            chunk_size: 500,
            chunk_overlap: 50,
            max_file_size: 1024,
            supported_formats: vec!["txt".to_string(), "csv".to_string(), "md".to_string()],
            max_chunks_per_document: 1000,
            top_k_default: 5,
            score_threshold_default: 0.5,
            max_context_length_default: 4000,
            memory_threshold_mb: 1024,
            memory_critical_threshold_mb: 2048,
            gc_interval_seconds: 30,
            batch_size: 32,
            rate_limit_per_minute: 60,
            upload_rate_limit_per_minute: 10,
            cors_origins: vec!["*".to_string()],
            api_key: None,
            stream_connection_timeout_minutes: 5,
            server_port: None,
            backend_failure_threshold: 3,
            query_timeout_seconds: 30,
            upload_timeout_seconds: 120,
            operation_queue_capacity: 1000,
            collection_name: "documents".to_string(),
        }
    }

    #[test]
    fn rejects_oversized_file() {
        let config = test_config();
        let request = ValidateRequest { file_name: "doc.txt".into(), file_size: 2048, content_type: "text/plain".into() };
        let result = validate(&request, &config);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("exceeds maximum")));
    }

    #[test]
    fn rejects_unsupported_format() {
        let config = test_config();
        let request = ValidateRequest { file_name: "doc.exe".into(), file_size: 100, content_type: "application/octet-stream".into() };
        let result = validate(&request, &config);
        assert!(!result.is_valid);
    }

    #[test]
    fn accepts_well_formed_upload() {
        let config = test_config();
        let request = ValidateRequest { file_name: "notes.md".into(), file_size: 100, content_type: "text/markdown".into() };
        let result = validate(&request, &config);
        assert!(result.is_valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn warns_on_double_extension() {
        let config = test_config();
        let request = ValidateRequest { file_name: "report.txt.bak".into(), file_size: 100, content_type: "text/plain".into() };
        let result = validate(&request, &config);
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn rejects_advertised_content_type_mismatch() {
        let config = test_config();
        let request = ValidateRequest { file_name: "notes.md".into(), file_size: 100, content_type: "application/octet-stream".into() };
        let result = validate(&request, &config);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("content type")));
    }
}
