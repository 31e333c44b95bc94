//! HTTP handlers and the shared application state they receive.

pub mod health_handlers;
pub mod share_handlers;

use crate::services::share_service::ShareService;
use std::sync::Arc;

/// Presentation-layer upload rules, enforced before bytes reach the
/// lifecycle engine.
#[derive(Debug)]
pub struct UploadRules {
    /// Hard cap on uploaded payload size, in bytes.
    pub max_upload_bytes: usize,
    /// Lowercased extension allowlist. Empty disables the check.
    pub allowed_extensions: Vec<String>,
}

impl UploadRules {
    /// Whether a filename passes the extension allowlist.
    pub fn extension_allowed(&self, filename: &str) -> bool {
        if self.allowed_extensions.is_empty() {
            return true;
        }
        filename
            .rsplit_once('.')
            .is_some_and(|(_, ext)| self.allowed_extensions.contains(&ext.to_ascii_lowercase()))
    }
}

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: ShareService,
    pub uploads: Arc<UploadRules>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(exts: &[&str]) -> UploadRules {
        UploadRules {
            max_upload_bytes: 1024,
            allowed_extensions: exts.iter().map(|e| e.to_string()).collect(),
        }
    }

    #[test]
    fn extension_allowlist() {
        let rules = rules(&["txt", "pdf"]);
        assert!(rules.extension_allowed("report.pdf"));
        assert!(rules.extension_allowed("REPORT.TXT"));
        assert!(!rules.extension_allowed("virus.exe"));
        assert!(!rules.extension_allowed("no_extension"));
    }

    #[test]
    fn empty_allowlist_permits_everything() {
        let rules = rules(&[]);
        assert!(rules.extension_allowed("anything.exe"));
        assert!(rules.extension_allowed("bare"));
    }
}
