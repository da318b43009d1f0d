//! Scan Helpers
//!
//! The last scan is kept in local state so the "ask about this medicine"
//! chat can be opened later. Each medicine gets its own chat transcript,
//! keyed by a slug of its name.

use serde_json::Value;

use crate::error::ClientError;
use crate::local::{LocalStore, StorageKey};

/// Shown when the analysis does not name the medicine
pub const UNKNOWN_MEDICINE: &str = "Unknown medicine";

// Keeps the prompt within what the chat endpoint accepts
const MAX_SUMMARY_CHARS: usize = 4000;

/// Result of `POST /api/analyze`
#[derive(Clone, Debug, PartialEq)]
pub struct ScanAnalysis {
    /// Medicine name, if the analysis found one
    pub medicine_name: Option<String>,
    /// The analysis as returned
    pub data: Value,
}

impl ScanAnalysis {
    /// Wrap an analysis, picking the name from `medicineName` or `name`
    #[must_use]
    pub fn from_value(data: Value) -> Self {
        let medicine_name = ["medicineName", "name"]
            .iter()
            .find_map(|field| {
                data.get(field)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
            })
            .map(str::to_string);
        Self {
            medicine_name,
            data,
        }
    }
}

/// The scan the user is currently looking at
#[derive(Clone, Debug, PartialEq)]
pub struct CurrentScan {
    /// Scan id
    pub id: String,
    /// Medicine name
    pub name: String,
    /// Analysis JSON
    pub data: Value,
    /// Uploaded image URL or data URL
    pub image: Option<String>,
}

impl CurrentScan {
    /// Build the current scan from a fresh analysis
    #[must_use]
    pub fn from_analysis(analysis: ScanAnalysis, image: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: analysis
                .medicine_name
                .unwrap_or_else(|| UNKNOWN_MEDICINE.to_string()),
            data: analysis.data,
            image,
        }
    }

    /// Save under the `currentScan*` keys
    pub async fn save(&self, local: &LocalStore) -> Result<(), ClientError> {
        local.set_raw(&StorageKey::CurrentScanId, &self.id).await?;
        local.set_raw(&StorageKey::CurrentScanName, &self.name).await?;
        local.set(&StorageKey::CurrentScanData, &self.data).await?;
        match &self.image {
            Some(image) => local.set_raw(&StorageKey::CurrentScanImage, image).await,
            None => local.remove(&[StorageKey::CurrentScanImage]).await,
        }
    }

    /// Load from the `currentScan*` keys
    ///
    /// `None` when no scan was saved or its data does not parse.
    #[must_use]
    pub fn load(local: &LocalStore) -> Option<Self> {
        let id = local.get_raw(&StorageKey::CurrentScanId)?;
        let name = local.get_raw(&StorageKey::CurrentScanName)?;
        let data: Value = local.get(&StorageKey::CurrentScanData)?;
        Some(Self {
            id,
            name,
            data,
            image: local.get_raw(&StorageKey::CurrentScanImage),
        })
    }

    /// Forget the current scan
    pub async fn clear(local: &LocalStore) -> Result<(), ClientError> {
        local
            .remove(&[
                StorageKey::CurrentScanId,
                StorageKey::CurrentScanName,
                StorageKey::CurrentScanData,
                StorageKey::CurrentScanImage,
            ])
            .await
    }

    /// Compact text form of the analysis for the model
    #[must_use]
    pub fn summary(&self) -> String {
        let text = match &self.data {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match text.char_indices().nth(MAX_SUMMARY_CHARS) {
            Some((idx, _)) => format!("{}...", &text[..idx]),
            None => text,
        }
    }
}

/// Lowercase slug of a medicine name: alphanumerics joined by `_`
#[must_use]
pub fn medicine_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            slug.push(ch);
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_end_matches('_');
    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug.to_string()
    }
}

/// Local key of the chat transcript about `name`
#[must_use]
pub fn medicine_chat_key(name: &str) -> StorageKey {
    StorageKey::MedicineChat(medicine_slug(name))
}

/// System prompt for a chat about a scanned medicine
#[must_use]
pub fn scan_prompt(medicine: &str, summary: &str) -> String {
    format!(
        "You are MediScan's medicine assistant. The user scanned the packaging of \
         {medicine}. Scan analysis:\n{summary}\n\nAnswer questions about this medicine \
         using the analysis. If something is not covered, say so. Remind the user to \
         consult a pharmacist or doctor before changing how they take any medicine."
    )
}

/// System prompt for a chat about `scan`
#[must_use]
pub fn scan_system_prompt(scan: &CurrentScan) -> String {
    scan_prompt(&scan.name, &scan.summary())
}
