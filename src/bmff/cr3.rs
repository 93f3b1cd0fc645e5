use uuid::Uuid;

use super::{reader::ScanState, BoxReader, BoxType, MetadataFlags};
use crate::{
    exif::{binary_order, trim_nul, ExifHeader, IfdType},
    file::ImageType,
    preview::{PreviewHeader, PreviewSource},
    source::ByteSource,
    Result,
};

/// `uuid` box inside `moov` holding the `CMT*` Exif boxes.
pub const CANON_METADATA_UUID: Uuid = Uuid::from_bytes([
    0x85, 0xc0, 0xb6, 0x87, 0x82, 0x0f, 0x11, 0xe0, 0x81, 0x11, 0xf4, 0xce, 0x46, 0x2b, 0x6a, 0x48,
]);

/// Top-level `uuid` box holding the XMP packet.
pub const CANON_XPACKET_UUID: Uuid = Uuid::from_bytes([
    0xbe, 0x7a, 0xcf, 0xcb, 0x97, 0xa9, 0x42, 0xe8, 0x9c, 0x71, 0x99, 0x94, 0x91, 0xe3, 0xaf, 0xac,
]);

/// Top-level `uuid` box holding the `PRVW` preview.
pub const CANON_PREVIEW_UUID: Uuid = Uuid::from_bytes([
    0xea, 0xf4, 0x2b, 0x5e, 0x1c, 0x98, 0x4b, 0x88, 0xb9, 0xfb, 0xb7, 0xdc, 0x40, 0x6e, 0x4d, 0x16,
]);

const CNCV_LEN: usize = 30;
const MAX_CTBO_ENTRIES: u32 = 5;

// PRVW payload: reserved(6) width(2) height(2) reserved(2) size(4) jpeg
const PRVW_PREFIX_LEN: usize = 16;
// THMB payload: reserved(4) width(2) height(2) size(4) reserved(4) jpeg
const THMB_PREFIX_LEN: usize = 16;

impl ScanState<'_> {
    pub(super) fn read_moov(&mut self, bx: &mut BoxReader<'_>) -> Result<()> {
        while let Some(mut child) = bx.read_inner_box()? {
            if child.box_type() == BoxType::Uuid && child.uuid() == Some(CANON_METADATA_UUID) {
                self.read_canon_metadata(&mut child)?;
            }
        }
        Ok(())
    }

    fn read_canon_metadata(&mut self, bx: &mut BoxReader<'_>) -> Result<()> {
        while let Some(mut child) = bx.read_inner_box()? {
            match child.box_type() {
                BoxType::Cmt1 => self.read_cmt(&mut child, IfdType::Root)?,
                BoxType::Cmt2 => self.read_cmt(&mut child, IfdType::Exif)?,
                BoxType::Cmt3 => self.read_cmt(&mut child, IfdType::MakerNote)?,
                BoxType::Cmt4 => self.read_cmt(&mut child, IfdType::Gps)?,
                BoxType::Cncv => {
                    let n = CNCV_LEN.min(child.remain() as usize);
                    let version = child.peek(n)?;
                    tracing::debug!(
                        compressor = %String::from_utf8_lossy(trim_nul(version)),
                        "CNCV"
                    );
                }
                BoxType::Ctbo => read_ctbo(&mut child)?,
                BoxType::Thmb => {
                    let thumbnail = read_thmb_header(&mut child)?;
                    tracing::debug!(?thumbnail, "THMB");
                    self.thumbnail = Some(thumbnail);
                }
                other => tracing::debug!(box_type = %other, "skip canon box"),
            }
        }
        Ok(())
    }

    /// Hands one `CMT*` box to the Exif callback. Every box is delivered;
    /// together they make up the Exif data of the file.
    fn read_cmt(&mut self, bx: &mut BoxReader<'_>, first_ifd: IfdType) -> Result<()> {
        let Some(cb) = self.on_exif.as_mut() else {
            return Ok(());
        };

        let head = bx.peek(8)?;
        let byte_order = binary_order(head);
        let first_ifd_offset = byte_order.u32(&head[4..8]);
        let header = ExifHeader {
            tiff_header_offset: u32::try_from(bx.position()).unwrap_or(u32::MAX),
            exif_length: u32::try_from(bx.remain()).unwrap_or(u32::MAX),
            first_ifd,
            ..ExifHeader::new(byte_order, first_ifd_offset, ImageType::Cr3)
        };
        tracing::debug!(box_type = %bx.box_type(), ?header, "canon exif");

        let res = cb(bx, &header);
        self.finish(MetadataFlags::EXIF, res)
    }

    pub(super) fn read_uuid_box(&mut self, bx: &mut BoxReader<'_>) -> Result<()> {
        let uuid = bx.uuid();
        if uuid == Some(CANON_XPACKET_UUID) {
            if !self.flags.is_pending(MetadataFlags::XMP) {
                return Ok(());
            }
            let res = self.emit_xmp(bx);
            self.finish(MetadataFlags::XMP, res)
        } else if uuid == Some(CANON_PREVIEW_UUID) {
            if !self.flags.is_pending(MetadataFlags::PRVW) {
                return Ok(());
            }
            self.read_preview_uuid(bx)
        } else {
            tracing::debug!(?uuid, "skip uuid box");
            Ok(())
        }
    }

    fn read_preview_uuid(&mut self, bx: &mut BoxReader<'_>) -> Result<()> {
        bx.discard(8)?;
        let Some(mut prvw) = bx.read_inner_box()? else {
            return Ok(());
        };
        if prvw.box_type() != BoxType::Prvw {
            tracing::debug!(box_type = %prvw.box_type(), "no PRVW in preview uuid");
            return Ok(());
        }

        let header = read_prvw_header(&mut prvw)?;
        let mut body = prvw.window_of(header.size)?;
        let res = self.emit_preview(&mut body, &header);
        self.finish(MetadataFlags::PRVW, res)
    }
}

fn read_prvw_header(bx: &mut BoxReader<'_>) -> Result<PreviewHeader> {
    let b = bx.peek(PRVW_PREFIX_LEN)?;
    let header = PreviewHeader {
        width: u16::from_be_bytes([b[6], b[7]]) as u32,
        height: u16::from_be_bytes([b[8], b[9]]) as u32,
        size: u32::from_be_bytes([b[12], b[13], b[14], b[15]]) as u64,
        image_type: ImageType::Jpeg,
        source: PreviewSource::Prvw,
    };
    bx.discard(PRVW_PREFIX_LEN as u64)?;
    Ok(header)
}

fn read_thmb_header(bx: &mut BoxReader<'_>) -> Result<PreviewHeader> {
    let b = bx.peek(THMB_PREFIX_LEN)?;
    Ok(PreviewHeader {
        width: u16::from_be_bytes([b[4], b[5]]) as u32,
        height: u16::from_be_bytes([b[6], b[7]]) as u32,
        size: u32::from_be_bytes([b[8], b[9], b[10], b[11]]) as u64,
        image_type: ImageType::Jpeg,
        source: PreviewSource::Thmb,
    })
}

fn read_ctbo(bx: &mut BoxReader<'_>) -> Result<()> {
    let count = bx.read_u32()?;
    for _ in 0..count.min(MAX_CTBO_ENTRIES) {
        let index = bx.read_u32()?;
        let offset = bx.read_u64()?;
        let size = bx.read_u64()?;
        tracing::debug!(index, offset, size, "CTBO");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::{
        bmff::BmffReader,
        exif::{ByteOrder, Exif, ExifTag, GpsTag, IfdReader},
        source::SliceSource,
        testkit::{bmff_box, ftyp, uuid_box, Entry, TiffBuilder},
    };

    fn cmt(fourcc: &[u8; 4], entries: Vec<Entry>) -> Vec<u8> {
        let mut b = TiffBuilder::new(ByteOrder::Little);
        let root = b.ifd(entries);
        bmff_box(fourcc, &b.build(root))
    }

    fn cr3_file() -> Vec<u8> {
        let mut cncv = b"CanonCR3_001/01.09.00/00.00.00".to_vec();
        cncv.truncate(CNCV_LEN);
        let mut ctbo = 1u32.to_be_bytes().to_vec();
        ctbo.extend(1u32.to_be_bytes());
        ctbo.extend(0x5000u64.to_be_bytes());
        ctbo.extend(0x100u64.to_be_bytes());
        let mut thmb = vec![0u8; 4];
        thmb.extend(160u16.to_be_bytes());
        thmb.extend(120u16.to_be_bytes());
        thmb.extend(2u32.to_be_bytes());
        thmb.extend([0u8; 4]);
        thmb.extend([0xff, 0xd8]);

        let canon = [
            bmff_box(b"CNCV", &cncv),
            bmff_box(b"CTBO", &ctbo),
            cmt(b"CMT1", vec![
                Entry::ascii(ExifTag::Make.code(), "Canon"),
                Entry::ascii(ExifTag::Model.code(), "Canon EOS R6"),
            ]),
            cmt(b"CMT2", vec![Entry::short(ExifTag::IsoSpeedRatings.code(), 800)]),
            cmt(b"CMT3", vec![Entry::long(0x000c, 123456)]),
            cmt(b"CMT4", vec![Entry::ascii(GpsTag::LatitudeRef.code(), "N")]),
            bmff_box(b"THMB", &thmb),
        ]
        .concat();

        let moov = bmff_box(
            b"moov",
            &[
                uuid_box(CANON_METADATA_UUID, &canon),
                bmff_box(b"trak", &[0; 8]),
            ]
            .concat(),
        );
        let mut buf = ftyp(b"crx ", &[b"crx ", b"isom"]);
        buf.extend(moov);
        buf
    }

    #[test]
    fn canon_metadata_boxes() {
        crate::testkit::init_tracing();
        let buf = cr3_file();
        let headers = RefCell::new(Vec::new());
        let exif = RefCell::new(Exif::default());

        let mut reader = BmffReader::new(SliceSource::new(&buf)).on_exif(|r, h| {
            headers.borrow_mut().push(*h);
            let mut ifd_reader = IfdReader::new().with_exif(exif.take());
            let res = ifd_reader.decode_tiff(r, h);
            exif.replace(ifd_reader.into_exif());
            res
        });
        reader.scan().unwrap();
        let thumbnail = reader.thumbnail().copied().unwrap();
        drop(reader);

        let headers = headers.into_inner();
        let first: Vec<_> = headers.iter().map(|h| h.first_ifd).collect();
        assert_eq!(
            first,
            [IfdType::Root, IfdType::Exif, IfdType::MakerNote, IfdType::Gps]
        );
        assert!(headers.iter().all(|h| h.image_type == ImageType::Cr3));
        assert!(headers.iter().all(|h| h.byte_order == ByteOrder::Little));
        assert!(headers.iter().all(|h| h.first_ifd_offset == 8));

        let exif = exif.into_inner();
        assert_eq!(exif.make, "Canon");
        assert_eq!(exif.model, "Canon EOS R6");
        assert_eq!(exif.iso, 800);
        assert_eq!(exif.camera_serial, "123456");

        assert_eq!(thumbnail.source, PreviewSource::Thmb);
        assert_eq!((thumbnail.width, thumbnail.height, thumbnail.size), (160, 120, 2));
    }

    #[test]
    fn truncated_prvw_is_an_error() {
        let mut prvw = vec![0u8; 12];
        prvw.extend(100u32.to_be_bytes());
        prvw.extend([0xff, 0xd8]);
        let mut payload = vec![0u8; 8];
        payload.extend(bmff_box(b"PRVW", &prvw));
        let mut buf = ftyp(b"crx ", &[]);
        buf.extend(uuid_box(CANON_PREVIEW_UUID, &payload));

        let mut reader = BmffReader::new(SliceSource::new(&buf)).on_preview(|_, _| Ok(()));
        reader.read_ftyp().unwrap();
        assert!(reader.read_metadata().is_err());
    }

    #[test]
    fn uuid_text() {
        assert_eq!(
            CANON_METADATA_UUID.to_string(),
            "85c0b687-820f-11e0-8111-f4ce462b6a48"
        );
        assert_eq!(
            CANON_XPACKET_UUID.to_string(),
            "be7acfcb-97a9-42e8-9c71-999491e3afac"
        );
        assert_eq!(
            CANON_PREVIEW_UUID.to_string(),
            "eaf42b5e-1c98-4b88-b9fb-b7dc406e4d16"
        );
    }
}
