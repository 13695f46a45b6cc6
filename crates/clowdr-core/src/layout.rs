//! Layout metadata for content elements
//!
//! Each content element carries a JSON layout blob describing how it is
//! placed on a content group page. The blob is discriminated by its
//! `contentType` field, which mirrors the element type enum of the schema.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LayoutError;

/// Layout data attached to a content element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutDataBlob {
    /// Element-type specific part, including the `contentType` tag
    #[serde(flatten)]
    pub content: LayoutContent,
    /// Span the full page width
    pub wide: bool,
    /// Hide from attendees
    pub hidden: bool,
    /// Ordering weight, lower renders first
    pub priority: i64,
}

/// Element-type specific layout fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "contentType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LayoutContent {
    Abstract,
    ContentGroupList,
    Text,
    ImageFile {
        #[serde(rename = "isLogo")]
        is_logo: bool,
    },
    PaperFile,
    PosterFile,
    ImageUrl {
        #[serde(rename = "isLogo")]
        is_logo: bool,
    },
    Link,
    PaperUrl,
    PosterUrl,
    LinkButton,
    PaperLink,
    VideoBroadcast,
    VideoCountdown,
    VideoFile,
    VideoFiller,
    VideoLink,
    VideoPrepublish,
    VideoSponsorsFiller,
    VideoTitles,
    VideoUrl,
    WholeSchedule,
    Zoom,
}

impl LayoutDataBlob {
    /// Validate and decode a raw JSON blob
    pub fn from_value(value: &Value) -> Result<Self, LayoutError> {
        serde_json::from_value(value.clone()).map_err(|e| LayoutError::Invalid(e.to_string()))
    }

    /// Whether the element is an image used as a logo
    pub fn is_logo(&self) -> bool {
        matches!(
            self.content,
            LayoutContent::ImageFile { is_logo: true } | LayoutContent::ImageUrl { is_logo: true }
        )
    }
}

/// Check whether a raw JSON value is a well-formed layout blob
pub fn is_layout_data_blob(value: &Value) -> bool {
    LayoutDataBlob::from_value(value).is_ok()
}

/// Sort layout blobs for rendering: by priority, visible before hidden
pub fn sort_for_display(blobs: &mut [LayoutDataBlob]) {
    blobs.sort_by_key(|b| (b.hidden, b.priority));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_tagged_variant() {
        let raw = json!({
            "contentType": "IMAGE_FILE",
            "isLogo": true,
            "wide": false,
            "hidden": false,
            "priority": 3
        });
        let blob = LayoutDataBlob::from_value(&raw).unwrap();
        assert_eq!(blob.content, LayoutContent::ImageFile { is_logo: true });
        assert!(blob.is_logo());
        assert_eq!(blob.priority, 3);
    }

    #[test]
    fn test_unit_variant_serializes_tag() {
        let blob = LayoutDataBlob {
            content: LayoutContent::VideoSponsorsFiller,
            wide: true,
            hidden: false,
            priority: 0,
        };
        let value = serde_json::to_value(&blob).unwrap();
        assert_eq!(value["contentType"], "VIDEO_SPONSORS_FILLER");
        assert_eq!(value["wide"], true);
    }

    #[test]
    fn test_rejects_unknown_type_and_missing_fields() {
        assert!(!is_layout_data_blob(&json!({
            "contentType": "HOLOGRAM",
            "wide": false,
            "hidden": false,
            "priority": 0
        })));
        assert!(!is_layout_data_blob(&json!({ "contentType": "TEXT" })));
        assert!(!is_layout_data_blob(&json!({
            "contentType": "IMAGE_URL",
            "wide": false,
            "hidden": false,
            "priority": 0
        })));
    }

    #[test]
    fn test_sort_for_display() {
        let mk = |priority, hidden| LayoutDataBlob {
            content: LayoutContent::Text,
            wide: false,
            hidden,
            priority,
        };
        let mut blobs = vec![mk(5, false), mk(1, true), mk(2, false)];
        sort_for_display(&mut blobs);
        let order: Vec<_> = blobs.iter().map(|b| (b.priority, b.hidden)).collect();
        assert_eq!(order, vec![(2, false), (5, false), (1, true)]);
    }
}
