//! Non-fatal problems.
//!
//! Only an unreadable input stops a submission. Everything else is recorded
//! here, logged, and worked around, so that the caller always gets a card.

use std::fmt;

use schemars::JsonSchema;
use serde::Serialize;

use crate::prelude::*;

/// Which photo slot on the card.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PhotoSlot {
    /// The portrait embedded in the source PDF.
    Embedded,
    /// The photo supplied alongside the PDF.
    User,
}

/// Something that went wrong without stopping the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// A field couldn't be located, so it holds the not-found text.
    FieldUnrecoverable { field: String },
    /// OCR was needed but couldn't run.
    OcrUnavailable { reason: String },
    /// A photo slot is empty or its image couldn't be used.
    AssetMissing { slot: PhotoSlot, reason: String },
    /// A font couldn't be loaded.
    RenderResourceMissing { path: Option<PathBuf>, reason: String },
    /// The user photo was kept as uploaded, without background removal.
    PhotoNotNormalized { reason: String },
}

impl Degradation {
    /// Log this degradation and add it to `list`.
    pub fn record(self, list: &mut Vec<Degradation>) {
        warn!("{self}");
        list.push(self);
    }
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::FieldUnrecoverable { field } => {
                write!(f, "could not recover field {field}")
            }
            Degradation::OcrUnavailable { reason } => write!(f, "OCR unavailable: {reason}"),
            Degradation::AssetMissing { slot, reason } => {
                write!(f, "{slot:?} photo omitted: {reason}")
            }
            Degradation::RenderResourceMissing { path: Some(path), reason } => {
                write!(f, "cannot use font {:?}: {reason}", path.display())
            }
            Degradation::RenderResourceMissing { path: None, reason } => {
                write!(f, "font unavailable: {reason}")
            }
            Degradation::PhotoNotNormalized { reason } => {
                write!(f, "user photo used without background removal: {reason}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_kind_tag() {
        let value = serde_json::to_value(Degradation::AssetMissing {
            slot: PhotoSlot::Embedded,
            reason: "no images in PDF".into(),
        })
        .unwrap();
        assert_eq!(value["kind"], "asset_missing");
        assert_eq!(value["slot"], "embedded");
    }
}
