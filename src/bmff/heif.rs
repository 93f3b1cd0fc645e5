use super::{
    iloc::{parse_iloc_body, Extent, IlocItem},
    BoxReader, BoxType, FourCC,
};
use crate::{
    file::ImageType,
    preview::{PreviewHeader, PreviewSource},
    source::ByteSource,
    xmp::is_xmp_mime,
    Result,
};

/// Item identifier assigned by `iinf`; 0 is reserved as invalid.
pub type ItemId = u32;

const MAX_CSTRING_LEN: usize = 1024;
const MAX_ILOC_LEN: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    Hvc1,
    Av01,
    Grid,
    Exif,
    Mime,
    Uri,
    Infe,
    Unknown(FourCC),
}

impl From<FourCC> for ItemType {
    fn from(v: FourCC) -> Self {
        match &v.0 {
            b"hvc1" => ItemType::Hvc1,
            b"av01" => ItemType::Av01,
            b"grid" => ItemType::Grid,
            b"Exif" => ItemType::Exif,
            b"mime" => ItemType::Mime,
            b"uri " => ItemType::Uri,
            b"infe" => ItemType::Infe,
            _ => ItemType::Unknown(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    pub id: ItemId,
    pub item_type: ItemType,
    /// `content_type` of `mime` items.
    pub mime_type: Option<String>,
}

impl ItemInfo {
    /// Image type of an item that can serve as a preview.
    fn preview_type(&self) -> Option<ImageType> {
        match self.item_type {
            ItemType::Hvc1 => Some(ImageType::Heic),
            ItemType::Av01 => Some(ImageType::Avif),
            ItemType::Mime => {
                let mime = self.mime_type.as_deref()?.trim().to_ascii_lowercase();
                if is_xmp_mime(&mime) {
                    return None;
                }
                match mime.as_str() {
                    "image/jpeg" | "image/jpg" => Some(ImageType::Jpeg),
                    "image/heic" => Some(ImageType::Heic),
                    "image/heif" => Some(ImageType::Heif),
                    "image/avif" => Some(ImageType::Avif),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// Absolute location of an item's first extent.
#[cfg_attr(feature = "json_dump", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemLocation {
    pub id: ItemId,
    pub offset: u64,
    pub length: u64,
    /// Stored in `idat` (construction method 1).
    pub in_idat: bool,
}

impl ItemLocation {
    pub fn extent(&self) -> Extent {
        Extent::new(self.offset, self.length)
    }
}

/// `iref` edge types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceType {
    Cdsc,
    Thmb,
    Dimg,
    Auxl,
    Iovl,
}

impl ReferenceType {
    fn from_fourcc(v: FourCC) -> Option<Self> {
        let t = match &v.0 {
            b"cdsc" => ReferenceType::Cdsc,
            b"thmb" => ReferenceType::Thmb,
            b"dimg" => ReferenceType::Dimg,
            b"auxl" => ReferenceType::Auxl,
            b"iovl" => ReferenceType::Iovl,
            _ => return None,
        };
        Some(t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemReference {
    pub ref_type: ReferenceType,
    pub from_id: ItemId,
    pub to_id: ItemId,
}

/// One entry of `ipco`. Only `ispe` carries data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemProperty {
    pub box_type: BoxType,
    pub width: u32,
    pub height: u32,
}

/// An `ipma` association. `property_index` is 1-based into the property
/// list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyLink {
    pub item_id: ItemId,
    pub property_index: u16,
    pub essential: bool,
}

/// An item singled out by its type, with its location once known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemSlot {
    pub id: ItemId,
    pub extent: Option<Extent>,
}

impl ItemSlot {
    /// The extent, when the item has a non-empty one.
    pub fn ready(&self) -> Option<Extent> {
        self.extent.filter(|e| e.length > 0)
    }
}

/// Items declared by a HEIF `meta` box and the links between them.
///
/// Tables are append-only and each is capped at `max_items` entries.
#[derive(Debug, Clone, Default)]
pub struct ItemGraph {
    /// `pitm`
    pub primary: ItemId,
    pub infos: Vec<ItemInfo>,
    pub locations: Vec<ItemLocation>,
    pub references: Vec<ItemReference>,
    pub properties: Vec<ItemProperty>,
    pub links: Vec<PropertyLink>,
    /// Absolute range of the `idat` payload.
    pub idat: Option<Extent>,
    /// Width and height stored in a CR3 `idat`.
    pub idat_size: Option<(u16, u16)>,
    pub exif: ItemSlot,
    pub xml: ItemSlot,
    max_items: usize,
}

fn push<T>(table: &mut Vec<T>, v: T, cap: usize) {
    if table.len() >= cap {
        tracing::debug!(cap, "item table is full");
        return;
    }
    table.push(v);
}

impl ItemGraph {
    pub fn new(max_items: usize) -> Self {
        Self {
            max_items,
            ..Default::default()
        }
    }

    pub fn info(&self, id: ItemId) -> Option<&ItemInfo> {
        self.infos.iter().find(|i| i.id == id)
    }

    pub fn location(&self, id: ItemId) -> Option<&ItemLocation> {
        self.locations.iter().find(|l| l.id == id)
    }

    /// Whether the item is addressed by a file offset, which some writers
    /// make relative to the `mdat` payload instead.
    pub fn in_file(&self, id: ItemId) -> bool {
        self.location(id).is_some_and(|l| !l.in_idat)
    }

    /// `ispe` dimensions linked to an item.
    pub fn dimensions(&self, id: ItemId) -> Option<(u32, u32)> {
        self.links
            .iter()
            .filter(|l| l.item_id == id)
            .filter_map(|l| self.properties.get(l.property_index as usize - 1))
            .find(|p| p.box_type == BoxType::Ispe)
            .map(|p| (p.width, p.height))
    }

    /// Populates the graph from a `meta` box.
    pub(crate) fn read_meta(&mut self, bx: &mut BoxReader<'_>, cr3: bool) -> Result<()> {
        // QuickTime-style meta boxes lack the FullBox header
        let is_full_box = bx.peek_max(8)?.get(4..8) != Some(b"hdlr".as_slice());
        if is_full_box {
            bx.read_flags()?;
        }

        let mut iloc_items = Vec::new();
        while let Some(mut child) = bx.read_inner_box()? {
            match child.box_type() {
                BoxType::Hdlr => read_hdlr(&mut child)?,
                BoxType::Pitm => {
                    let version = child.read_flags()?;
                    self.primary = if version == 0 {
                        child.read_u16()? as ItemId
                    } else {
                        child.read_u32()?
                    };
                }
                BoxType::Iinf => self.read_iinf(&mut child)?,
                BoxType::Iref => self.read_iref(&mut child)?,
                BoxType::Iprp => self.read_iprp(&mut child)?,
                BoxType::Idat => {
                    self.idat = Some(Extent::new(child.payload_offset(), child.remain()));
                    if cr3 && child.remain() >= 8 {
                        let b = child.peek(8)?;
                        let width = u16::from_be_bytes([b[4], b[5]]);
                        let height = u16::from_be_bytes([b[6], b[7]]);
                        self.idat_size = Some((width, height));
                    }
                }
                BoxType::Iloc => {
                    let version = child.read_flags()?;
                    let body = child.read_to_vec(MAX_ILOC_LEN)?;
                    let (_, items) = parse_iloc_body(&body, version, self.max_items)?;
                    iloc_items = items;
                }
                other => tracing::debug!(box_type = %other, "skip meta child"),
            }
            child.close()?;
        }

        // idat may follow iloc
        for item in iloc_items {
            self.add_location(&item);
        }
        self.link_slots();
        tracing::debug!(
            primary = self.primary,
            infos = self.infos.len(),
            locations = self.locations.len(),
            exif = ?self.exif,
            xml = ?self.xml,
            "meta"
        );
        Ok(())
    }

    fn add_location(&mut self, item: &IlocItem) {
        match item.resolve(self.idat) {
            Ok(Some(extent)) => push(
                &mut self.locations,
                ItemLocation {
                    id: item.id,
                    offset: extent.offset,
                    length: extent.length,
                    in_idat: item.construction_method == 1,
                },
                self.max_items,
            ),
            Ok(None) => tracing::debug!(id = item.id, "item has no extent"),
            Err(e) => tracing::debug!(id = item.id, %e, "skip item location"),
        }
    }

    fn link_slots(&mut self) {
        for slot in [&mut self.exif, &mut self.xml] {
            if slot.id == 0 {
                continue;
            }
            if let Some(loc) = self.locations.iter().find(|l| l.id == slot.id) {
                slot.extent = Some(loc.extent());
            }
        }
    }

    fn read_iinf(&mut self, bx: &mut BoxReader<'_>) -> Result<()> {
        let version = bx.read_flags()?;
        let count = if version == 0 {
            bx.read_u16()? as u32
        } else {
            bx.read_u32()?
        };

        for _ in 0..count {
            let Some(mut infe) = bx.read_inner_box()? else {
                break;
            };
            if infe.box_type() != BoxType::Infe {
                continue;
            }
            self.read_infe(&mut infe)?;
        }
        Ok(())
    }

    fn read_infe(&mut self, bx: &mut BoxReader<'_>) -> Result<()> {
        let version = bx.read_flags()?;
        if !(2..=3).contains(&version) {
            tracing::debug!(version, "skip infe");
            return Ok(());
        }

        let id = if version == 2 {
            bx.read_u16()? as ItemId
        } else {
            bx.read_u32()?
        };
        let _protection_index = bx.read_u16()?;
        let item_type = ItemType::from(bx.read_fourcc()?);
        bx.discard_cstring(MAX_CSTRING_LEN)?;

        let mut mime_type = None;
        match item_type {
            ItemType::Mime => {
                let content_type = bx.read_cstring(MAX_CSTRING_LEN)?;
                if is_xmp_mime(&content_type) {
                    self.xml.id = id;
                }
                mime_type = Some(content_type);
            }
            ItemType::Exif => self.exif.id = id,
            ItemType::Uri => bx.discard_cstring(MAX_CSTRING_LEN)?,
            _ => {}
        }

        tracing::debug!(id, ?item_type, ?mime_type, "infe");
        push(
            &mut self.infos,
            ItemInfo {
                id,
                item_type,
                mime_type,
            },
            self.max_items,
        );
        Ok(())
    }

    fn read_iref(&mut self, bx: &mut BoxReader<'_>) -> Result<()> {
        let version = bx.read_flags()?;
        let id_size = if version == 0 { 2 } else { 4 };

        while let Some(mut r) = bx.read_inner_box()? {
            let Some(ref_type) = ReferenceType::from_fourcc(r.header().box_type) else {
                tracing::debug!(ref_type = %r.header().box_type, "skip reference");
                continue;
            };
            let from_id = r.read_uint(id_size)? as ItemId;
            let count = r.read_u16()?;
            for _ in 0..count {
                let to_id = r.read_uint(id_size)? as ItemId;
                push(
                    &mut self.references,
                    ItemReference {
                        ref_type,
                        from_id,
                        to_id,
                    },
                    self.max_items,
                );
            }
        }
        Ok(())
    }

    fn read_iprp(&mut self, bx: &mut BoxReader<'_>) -> Result<()> {
        while let Some(mut child) = bx.read_inner_box()? {
            match child.box_type() {
                BoxType::Ipco => self.read_ipco(&mut child)?,
                BoxType::Ipma => self.read_ipma(&mut child)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn read_ipco(&mut self, bx: &mut BoxReader<'_>) -> Result<()> {
        while let Some(mut p) = bx.read_inner_box()? {
            let mut prop = ItemProperty {
                box_type: p.box_type(),
                width: 0,
                height: 0,
            };
            if prop.box_type == BoxType::Ispe {
                p.read_flags()?;
                prop.width = p.read_u32()?;
                prop.height = p.read_u32()?;
            }
            push(&mut self.properties, prop, self.max_items);
        }
        Ok(())
    }

    fn read_ipma(&mut self, bx: &mut BoxReader<'_>) -> Result<()> {
        let version = bx.read_flags()?;
        let wide = bx.flags() & 1 != 0;
        let entry_count = bx.read_u32()?;

        for _ in 0..entry_count {
            if bx.remain() == 0 {
                break;
            }
            let item_id = if version < 1 {
                bx.read_u16()? as ItemId
            } else {
                bx.read_u32()?
            };
            let count = bx.read_u8()?;
            for _ in 0..count {
                let (essential, property_index) = if wide {
                    let v = bx.read_u16()?;
                    (v & 0x8000 != 0, v & 0x7fff)
                } else {
                    let v = bx.read_u8()?;
                    (v & 0x80 != 0, (v & 0x7f) as u16)
                };
                if property_index == 0 {
                    continue;
                }
                push(
                    &mut self.links,
                    PropertyLink {
                        item_id,
                        property_index,
                        essential,
                    },
                    self.max_items,
                );
            }
        }
        Ok(())
    }

    fn preview_rank(&self, id: ItemId) -> u8 {
        let thumbnail_of = |r: &&ItemReference| r.ref_type == ReferenceType::Thmb && r.from_id == id;
        let mut thumbnails = self.references.iter().filter(thumbnail_of);
        if thumbnails.clone().any(|r| r.to_id == self.primary) {
            0
        } else if thumbnails.next().is_some() {
            1
        } else if id != self.primary {
            2
        } else {
            3
        }
    }

    /// Picks the item to serve as a preview: thumbnails of the primary
    /// image first, then other thumbnails, other images, and finally the
    /// primary image. Smaller items win within a rank.
    pub fn select_preview(&self) -> Option<(ItemLocation, PreviewHeader)> {
        let skip = |id: ItemId| id != 0 && (id == self.exif.id || id == self.xml.id);

        let (_, loc, image_type) = self
            .locations
            .iter()
            .filter(|loc| !skip(loc.id))
            .filter_map(|loc| {
                let image_type = self.info(loc.id)?.preview_type()?;
                Some(((self.preview_rank(loc.id), loc.length), loc, image_type))
            })
            .min_by_key(|(key, _, _)| *key)?;

        let (width, height) = self.dimensions(loc.id).unwrap_or_default();
        let header = PreviewHeader {
            size: loc.length,
            width,
            height,
            image_type,
            source: PreviewSource::Item,
        };
        Some((*loc, header))
    }
}

fn read_hdlr(bx: &mut BoxReader<'_>) -> Result<()> {
    bx.read_flags()?;
    let _pre_defined = bx.read_u32()?;
    let handler = bx.read_fourcc()?;
    tracing::debug!(%handler, "hdlr");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        source::SliceSource,
        testkit::{bmff_box, full_box, infe, iloc_v0},
    };

    fn read(meta: &[u8], cr3: bool) -> ItemGraph {
        crate::testkit::init_tracing();
        let mut src = SliceSource::new(meta);
        let mut bx = BoxReader::new(&mut src).unwrap();
        let mut graph = ItemGraph::new(4096);
        graph.read_meta(&mut bx, cr3).unwrap();
        graph
    }

    fn iinf(entries: &[Vec<u8>]) -> Vec<u8> {
        let mut body = (entries.len() as u16).to_be_bytes().to_vec();
        for e in entries {
            body.extend(e);
        }
        full_box(b"iinf", 0, 0, &body)
    }

    fn iref_thmb(from: u16, to: &[u16]) -> Vec<u8> {
        let mut body = from.to_be_bytes().to_vec();
        body.extend((to.len() as u16).to_be_bytes());
        for t in to {
            body.extend(t.to_be_bytes());
        }
        full_box(b"iref", 0, 0, &bmff_box(b"thmb", &body))
    }

    fn iprp(sizes: &[(u32, u32)], links: &[(u16, u8)]) -> Vec<u8> {
        let mut ipco = Vec::new();
        for (w, h) in sizes {
            let mut body = w.to_be_bytes().to_vec();
            body.extend(h.to_be_bytes());
            ipco.extend(full_box(b"ispe", 0, 0, &body));
        }
        let mut ipma = (links.len() as u32).to_be_bytes().to_vec();
        for (id, prop) in links {
            ipma.extend(id.to_be_bytes());
            ipma.extend([1, 0x80 | prop]);
        }
        let mut body = bmff_box(b"ipco", &ipco);
        body.extend(full_box(b"ipma", 0, 0, &ipma));
        bmff_box(b"iprp", &body)
    }

    fn pitm(id: u16) -> Vec<u8> {
        full_box(b"pitm", 0, 0, &id.to_be_bytes())
    }

    fn meta(children: &[Vec<u8>]) -> Vec<u8> {
        full_box(b"meta", 0, 0, &children.concat())
    }

    #[test]
    fn exif_and_xmp_slots() {
        let buf = meta(&[
            iinf(&[
                infe(1, b"Exif", None),
                infe(2, b"mime", Some("application/rdf+xml")),
                infe(3, b"hvc1", None),
            ]),
            iloc_v0(&[(1, 1000, 64), (2, 2000, 128), (3, 3000, 4096)]),
        ]);
        let g = read(&buf, false);
        assert_eq!(g.exif, ItemSlot { id: 1, extent: Some(Extent::new(1000, 64)) });
        assert_eq!(g.xml.ready(), Some(Extent::new(2000, 128)));
        assert_eq!(g.infos.len(), 3);
        assert_eq!(g.info(3).map(|i| i.item_type), Some(ItemType::Hvc1));
    }

    #[test]
    fn iloc_before_idat() {
        // construction method 1 refers to an idat that comes later
        let mut iloc_body = vec![0x44, 0x00, 0x00, 0x01];
        iloc_body.extend([0x00, 0x05, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01]);
        iloc_body.extend(2u32.to_be_bytes());
        iloc_body.extend(4u32.to_be_bytes());
        let buf = meta(&[
            iinf(&[infe(5, b"Exif", None)]),
            full_box(b"iloc", 1, 0, &iloc_body),
            bmff_box(b"idat", &[0, 0, 0, 0, 0x01, 0x40, 0x00, 0xf0]),
        ]);
        let g = read(&buf, true);
        let idat = g.idat.unwrap();
        assert_eq!(idat.length, 8);
        assert_eq!(g.idat_size, Some((320, 240)));
        assert_eq!(g.exif.ready(), Some(Extent::new(idat.offset + 2, 4)));
        assert!(g.location(5).unwrap().in_idat);
        assert!(!g.in_file(5));
    }

    #[test]
    fn external_reference_is_not_recorded() {
        let mut iloc_body = vec![0x44, 0x00, 0x00, 0x01];
        iloc_body.extend([0x00, 0x01, 0x00, 0x01, 0x00, 0x01]);
        iloc_body.extend(10u32.to_be_bytes());
        iloc_body.extend(4u32.to_be_bytes());
        let buf = meta(&[full_box(b"iloc", 0, 0, &iloc_body)]);
        let g = read(&buf, false);
        assert!(g.locations.is_empty());
    }

    #[test]
    fn properties_and_links() {
        let buf = meta(&[
            pitm(1),
            iinf(&[infe(1, b"hvc1", None), infe(2, b"hvc1", None)]),
            iprp(&[(4000, 3000), (320, 240)], &[(1, 1), (2, 2)]),
        ]);
        let g = read(&buf, false);
        assert_eq!(g.primary, 1);
        assert_eq!(g.properties.len(), 2);
        assert_eq!(g.links[1], PropertyLink { item_id: 2, property_index: 2, essential: true });
        assert_eq!(g.dimensions(1), Some((4000, 3000)));
        assert_eq!(g.dimensions(2), Some((320, 240)));
        assert_eq!(g.dimensions(9), None);
    }

    #[test]
    fn preview_ranking() {
        let buf = meta(&[
            pitm(1),
            iinf(&[
                infe(1, b"hvc1", None),
                infe(2, b"hvc1", None),
                infe(3, b"mime", Some("image/jpeg")),
                infe(4, b"Exif", None),
                infe(5, b"mime", Some("application/rdf+xml")),
            ]),
            iloc_v0(&[(1, 100, 5000), (2, 200, 900), (3, 300, 800), (4, 400, 10), (5, 500, 20)]),
            iref_thmb(2, &[1]),
            iprp(&[(320, 240)], &[(2, 1)]),
        ]);
        let g = read(&buf, false);
        let (loc, header) = g.select_preview().unwrap();
        // the thumbnail of the primary item beats a smaller unrelated jpeg
        assert_eq!(loc.id, 2);
        assert_eq!(header.image_type, ImageType::Heic);
        assert_eq!((header.width, header.height), (320, 240));
        assert_eq!(header.size, 900);
        assert_eq!(header.source, PreviewSource::Item);
    }

    #[test]
    fn preview_falls_back_to_primary() {
        let buf = meta(&[
            pitm(1),
            iinf(&[infe(1, b"av01", None), infe(2, b"grid", None)]),
            iloc_v0(&[(1, 100, 5000), (2, 50, 10)]),
        ]);
        let g = read(&buf, false);
        let (loc, header) = g.select_preview().unwrap();
        assert_eq!(loc.id, 1);
        assert_eq!(header.image_type, ImageType::Avif);

        let g = read(&meta(&[pitm(1)]), false);
        assert!(g.select_preview().is_none());
    }

    #[test]
    fn item_cap() {
        let entries: Vec<_> = (1..=10).map(|id| infe(id, b"hvc1", None)).collect();
        let buf = meta(&[iinf(&entries)]);
        let mut src = SliceSource::new(&buf);
        let mut bx = BoxReader::new(&mut src).unwrap();
        let mut graph = ItemGraph::new(4);
        graph.read_meta(&mut bx, false).unwrap();
        assert_eq!(graph.infos.len(), 4);
    }

    #[test]
    fn quicktime_meta() {
        let mut hdlr = vec![0u8; 4];
        hdlr.extend(b"mdta");
        hdlr.extend([0u8; 12]);
        let body = [full_box(b"hdlr", 0, 0, &hdlr), pitm(3)].concat();
        let buf = bmff_box(b"meta", &body);
        let g = read(&buf, false);
        assert_eq!(g.primary, 3);
    }
}
