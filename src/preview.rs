use crate::file::ImageType;

/// Which structure a preview image came from.
#[cfg_attr(feature = "json_dump", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreviewSource {
    /// CR3 `THMB` box.
    Thmb,
    /// CR3 `PRVW` box.
    Prvw,
    /// A HEIF item stored in `mdat`.
    Item,
}

/// An embedded preview image handed to the preview callback.
#[cfg_attr(feature = "json_dump", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewHeader {
    /// Bytes of encoded image data.
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub image_type: ImageType,
    pub source: PreviewSource,
}
