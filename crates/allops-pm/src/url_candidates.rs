// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Alternate download URLs for a stored share link.
//!
//! Google Drive share links rarely serve image bytes directly, so a Drive
//! link expands into the endpoints most likely to return the file, ending
//! with the original URL.

use std::sync::LazyLock;

use regex::Regex;

static DRIVE_FILE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^https?://drive\.google\.com/(?:file/d/([^/?#&]+)|open\?id=([^&#]+)|uc\?(?:export=(?:view|download)&)?id=([^&#]+))",
    )
    .expect("drive file id pattern is valid")
});

const DRIVE_BASE: &str = "https://drive.google.com";

/// Extract the file id from a Google Drive share URL.
pub fn drive_file_id(url: &str) -> Option<&str> {
    let caps = DRIVE_FILE_ID.captures(url)?;
    (1..=3)
        .find_map(|i| caps.get(i))
        .map(|m| m.as_str())
        .filter(|id| !id.is_empty())
}

/// Ordered, de-duplicated download candidates for `url`.
///
/// Blank input yields nothing; an unrecognised URL yields itself.
pub fn candidate_urls(url: Option<&str>) -> Vec<String> {
    let Some(original) = url.map(str::trim).filter(|u| !u.is_empty()) else {
        return Vec::new();
    };

    let mut candidates: Vec<String> = Vec::with_capacity(6);
    if let Some(id) = drive_file_id(original) {
        // A generated form equal to the original is dropped; the original
        // always comes last.
        candidates.extend(
            [
                format!("{DRIVE_BASE}/thumbnail?id={id}&sz=w2000"),
                format!("{DRIVE_BASE}/uc?id={id}"),
                format!("{DRIVE_BASE}/uc?export=download&id={id}"),
                format!("{DRIVE_BASE}/uc?export=view&id={id}"),
                format!("{DRIVE_BASE}/file/d/{id}/preview"),
            ]
            .into_iter()
            .filter(|c| c != original),
        );
    }
    candidates.push(original.to_string());
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_file_link_expands_in_order() {
        let original = "https://drive.google.com/file/d/ABC123/view?usp=sharing";
        assert_eq!(
            candidate_urls(Some(original)),
            vec![
                "https://drive.google.com/thumbnail?id=ABC123&sz=w2000",
                "https://drive.google.com/uc?id=ABC123",
                "https://drive.google.com/uc?export=download&id=ABC123",
                "https://drive.google.com/uc?export=view&id=ABC123",
                "https://drive.google.com/file/d/ABC123/preview",
                original,
            ]
        );
    }

    #[test]
    fn test_original_matching_generated_form_stays_last() {
        let original = "https://drive.google.com/uc?id=XYZ";
        let candidates = candidate_urls(Some("  https://drive.google.com/uc?id=XYZ  "));
        assert_eq!(candidates.len(), 5);
        assert_eq!(candidates.last().map(String::as_str), Some(original));
        assert_eq!(candidates.iter().filter(|c| *c == original).count(), 1);
        assert_eq!(candidates[1], "https://drive.google.com/uc?export=download&id=XYZ");
    }

    #[test]
    fn test_drive_id_shapes() {
        assert_eq!(
            drive_file_id("http://DRIVE.google.com/open?id=xyz&authuser=0"),
            Some("xyz")
        );
        assert_eq!(
            drive_file_id("https://drive.google.com/uc?export=download&id=q-9_z"),
            Some("q-9_z")
        );
        assert_eq!(drive_file_id("https://drive.google.com/uc?id=plain"), Some("plain"));
        assert_eq!(drive_file_id("https://example.com/file/d/nope"), None);
    }

    #[test]
    fn test_unrecognised_and_blank() {
        assert_eq!(
            candidate_urls(Some("https://cdn.example.com/d.png")),
            vec!["https://cdn.example.com/d.png"]
        );
        assert!(candidate_urls(Some("   ")).is_empty());
        assert!(candidate_urls(None).is_empty());
    }
}
