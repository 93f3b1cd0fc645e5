//! Builders for synthetic TIFF, ISOBMFF, JPEG and PNG inputs used by the
//! unit tests.

use uuid::Uuid;

use crate::exif::ByteOrder;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone)]
enum Value {
    Short(u16),
    Long(u32),
    /// Written into the value field as is.
    Raw(u32),
    Data(Vec<u8>),
    Rationals(Vec<(u32, u32)>),
    /// Offsets of other IFDs, by builder index.
    Ifds(Vec<usize>),
}

/// One IFD entry.
#[derive(Debug, Clone)]
pub struct Entry {
    tag: u16,
    tag_type: u16,
    count: u32,
    value: Value,
}

impl Entry {
    pub fn ascii(tag: u16, s: &str) -> Self {
        let mut data = s.as_bytes().to_vec();
        data.push(0);
        Self {
            tag,
            tag_type: 2,
            count: data.len() as u32,
            value: Value::Data(data),
        }
    }

    pub fn short(tag: u16, v: u16) -> Self {
        Self {
            tag,
            tag_type: 3,
            count: 1,
            value: Value::Short(v),
        }
    }

    pub fn long(tag: u16, v: u32) -> Self {
        Self {
            tag,
            tag_type: 4,
            count: 1,
            value: Value::Long(v),
        }
    }

    pub fn rational(tag: u16, values: &[(u32, u32)]) -> Self {
        Self {
            tag,
            tag_type: 5,
            count: values.len() as u32,
            value: Value::Rationals(values.to_vec()),
        }
    }

    /// An entry with an arbitrary type, count and value field.
    pub fn raw(tag: u16, tag_type: u16, count: u32, value: u32) -> Self {
        Self {
            tag,
            tag_type,
            count,
            value: Value::Raw(value),
        }
    }

    /// `data` holds the value already encoded; the count is derived from
    /// the size of `tag_type`.
    pub fn bytes(tag: u16, tag_type: u16, data: &[u8]) -> Self {
        Self {
            tag,
            tag_type,
            count: (data.len() / type_size(tag_type)) as u32,
            value: Value::Data(data.to_vec()),
        }
    }

    /// A long holding the offset of the IFD returned by [`TiffBuilder::ifd`].
    pub fn pointer(tag: u16, ifd: usize) -> Self {
        Self::pointers(tag, &[ifd])
    }

    pub fn pointers(tag: u16, ifds: &[usize]) -> Self {
        Self {
            tag,
            tag_type: 4,
            count: ifds.len() as u32,
            value: Value::Ifds(ifds.to_vec()),
        }
    }

    /// Bytes stored outside of the entry, if any.
    fn data_len(&self) -> usize {
        let len = match &self.value {
            Value::Short(_) | Value::Long(_) | Value::Raw(_) => 0,
            Value::Data(d) => d.len(),
            Value::Rationals(r) => r.len() * 8,
            Value::Ifds(ifds) => ifds.len() * 4,
        };
        if len <= 4 {
            0
        } else {
            len + len % 2
        }
    }
}

fn type_size(tag_type: u16) -> usize {
    match tag_type {
        3 | 8 => 2,
        4 | 9 | 11 | 13 => 4,
        5 | 10 | 12 => 8,
        _ => 1,
    }
}

#[derive(Debug, Default)]
struct IfdSpec {
    entries: Vec<Entry>,
    next: Option<usize>,
}

impl IfdSpec {
    fn size(&self) -> usize {
        2 + self.entries.len() * 12 + 4 + self.entries.iter().map(Entry::data_len).sum::<usize>()
    }
}

/// Lays out a TIFF structure: the header, then the root IFD, then the
/// other IFDs in reverse order of creation. Every IFD is directly followed
/// by its out-of-line values, so children created before their parent are
/// found further into the file.
#[derive(Debug)]
pub struct TiffBuilder {
    bo: ByteOrder,
    ifds: Vec<IfdSpec>,
}

impl TiffBuilder {
    pub fn new(bo: ByteOrder) -> Self {
        Self {
            bo,
            ifds: Vec::new(),
        }
    }

    pub fn ifd(&mut self, entries: Vec<Entry>) -> usize {
        self.ifds.push(IfdSpec {
            entries,
            next: None,
        });
        self.ifds.len() - 1
    }

    /// Sets the next-IFD offset of `from` to `to`.
    pub fn chain(&mut self, from: usize, to: usize) {
        self.ifds[from].next = Some(to);
    }

    pub fn build(&self, root: usize) -> Vec<u8> {
        let mut order = vec![root];
        order.extend((0..self.ifds.len()).rev().filter(|i| *i != root));

        let mut offsets = vec![0u32; self.ifds.len()];
        let mut pos = 8;
        for &i in &order {
            offsets[i] = pos as u32;
            pos += self.ifds[i].size();
        }

        let mut buf = match self.bo {
            ByteOrder::Big => vec![0x4d, 0x4d, 0x00, 0x2a],
            _ => vec![0x49, 0x49, 0x2a, 0x00],
        };
        buf.extend(self.u32(8));

        for &i in &order {
            let ifd = &self.ifds[i];
            let mut data_pos = offsets[i] as usize + 2 + ifd.entries.len() * 12 + 4;
            let mut data = Vec::new();

            buf.extend(self.u16(ifd.entries.len() as u16));
            for e in &ifd.entries {
                buf.extend(self.u16(e.tag));
                buf.extend(self.u16(e.tag_type));
                buf.extend(self.u32(e.count));

                let encoded = self.encode(&e.value, &offsets);
                match &e.value {
                    Value::Short(v) => {
                        buf.extend(self.u16(*v));
                        buf.extend([0, 0]);
                    }
                    Value::Long(v) | Value::Raw(v) => buf.extend(self.u32(*v)),
                    _ if encoded.len() <= 4 => {
                        let mut field = [0u8; 4];
                        field[..encoded.len()].copy_from_slice(&encoded);
                        buf.extend(field);
                    }
                    _ => {
                        buf.extend(self.u32(data_pos as u32));
                        data_pos += e.data_len();
                        data.extend(&encoded);
                        if encoded.len() % 2 == 1 {
                            data.push(0);
                        }
                    }
                }
            }
            let next = ifd.next.map(|n| offsets[n]).unwrap_or(0);
            buf.extend(self.u32(next));
            buf.extend(data);
        }
        buf
    }

    fn encode(&self, value: &Value, offsets: &[u32]) -> Vec<u8> {
        match value {
            Value::Data(d) => d.clone(),
            Value::Rationals(r) => r
                .iter()
                .flat_map(|(n, d)| [self.u32(*n), self.u32(*d)].concat())
                .collect(),
            Value::Ifds(ifds) => ifds.iter().flat_map(|i| self.u32(offsets[*i])).collect(),
            Value::Short(_) | Value::Long(_) | Value::Raw(_) => Vec::new(),
        }
    }

    fn u16(&self, v: u16) -> [u8; 2] {
        match self.bo {
            ByteOrder::Big => v.to_be_bytes(),
            _ => v.to_le_bytes(),
        }
    }

    fn u32(&self, v: u32) -> [u8; 4] {
        self.bo.put_u32(v)
    }
}

pub fn bmff_box(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut buf = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    buf.extend(box_type);
    buf.extend(payload);
    buf
}

pub fn full_box(box_type: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = ((version as u32) << 24 | (flags & 0x00ff_ffff)).to_be_bytes().to_vec();
    body.extend(payload);
    bmff_box(box_type, &body)
}

pub fn uuid_box(uuid: Uuid, payload: &[u8]) -> Vec<u8> {
    let mut body = uuid.as_bytes().to_vec();
    body.extend(payload);
    bmff_box(b"uuid", &body)
}

pub fn ftyp(major: &[u8; 4], compatible: &[&[u8; 4]]) -> Vec<u8> {
    let mut body = major.to_vec();
    body.extend(0u32.to_be_bytes());
    for brand in compatible {
        body.extend(*brand);
    }
    bmff_box(b"ftyp", &body)
}

/// An `infe` v2 box with an empty item name.
pub fn infe(id: u16, item_type: &[u8; 4], content_type: Option<&str>) -> Vec<u8> {
    let mut body = id.to_be_bytes().to_vec();
    body.extend(0u16.to_be_bytes());
    body.extend(item_type);
    body.push(0);
    if let Some(mime) = content_type {
        body.extend(mime.as_bytes());
        body.push(0);
    }
    full_box(b"infe", 2, 0, &body)
}

/// An `iloc` v0 box with 4-byte offsets and lengths, one extent per item.
pub fn iloc_v0(items: &[(u16, u32, u32)]) -> Vec<u8> {
    let mut body = vec![0x44, 0x00];
    body.extend((items.len() as u16).to_be_bytes());
    for (id, offset, length) in items {
        body.extend(id.to_be_bytes());
        body.extend(0u16.to_be_bytes());
        body.extend(1u16.to_be_bytes());
        body.extend(offset.to_be_bytes());
        body.extend(length.to_be_bytes());
    }
    full_box(b"iloc", 0, 0, &body)
}

pub fn jpeg_segment(code: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0xFF, code];
    buf.extend(((payload.len() + 2) as u16).to_be_bytes());
    buf.extend(payload);
    buf
}

/// A PNG chunk with a zero CRC.
pub fn png_chunk(chunk_type: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let mut buf = (data.len() as u32).to_be_bytes().to_vec();
    buf.extend(chunk_type);
    buf.extend(data);
    buf.extend([0; 4]);
    buf
}
