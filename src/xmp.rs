//! Locating XMP packets. The XML itself is handed out untouched.

use std::sync::LazyLock;

use nom::FindSubstring;
use regex::Regex;

use crate::{bmff::BoxReader, source::ByteSource, Result};

const SNIFF_LEN: usize = 512;
const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

const XMP_MIME_PATTERN: &str =
    r"(?i)^\s*(application/rdf\+xml|application/xml|text/xml)\s*$|xmp|rdf\+xml";

static XMP_MIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(XMP_MIME_PATTERN).expect("valid regex"));

/// Whether an item content type denotes an XMP packet.
pub fn is_xmp_mime(mime: &str) -> bool {
    XMP_MIME.is_match(mime)
}

/// Where an XMP packet lives and what its first bytes look like.
#[cfg_attr(feature = "json_dump", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XPacketHeader {
    /// Absolute offset of the packet.
    pub offset: u64,
    pub length: u64,
    /// Starts with or contains an `<?xpacket` processing instruction.
    pub has_xpacket_pi: bool,
    /// Contains `<x:xmpmeta` or `<rdf:RDF`.
    pub has_xmp_meta: bool,
}

/// Inspects the first bytes of `bx` without consuming them.
pub fn evaluate_xpacket_header(bx: &mut BoxReader<'_>) -> Result<XPacketHeader> {
    let offset = bx.position();
    let length = bx.remain();
    let head = trim_head(bx.peek_max(SNIFF_LEN)?);

    Ok(XPacketHeader {
        offset,
        length,
        has_xpacket_pi: head.starts_with(b"<?xpacket") || head.find_substring("<?xpacket").is_some(),
        has_xmp_meta: head.find_substring("<x:xmpmeta").is_some()
            || head.find_substring("<rdf:RDF").is_some(),
    })
}

fn trim_head(mut buf: &[u8]) -> &[u8] {
    loop {
        if let Some(rest) = buf.strip_prefix(UTF8_BOM) {
            buf = rest;
        } else if let Some((first, rest)) = buf.split_first() {
            if *first == 0 || first.is_ascii_whitespace() {
                buf = rest;
            } else {
                return buf;
            }
        } else {
            return buf;
        }
    }
}
