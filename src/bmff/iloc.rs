use nom::{
    combinator::{cond, fail, map},
    error::context,
    multi::many_m_n,
    number::complete::{be_u16, be_u32, be_u64, be_u8},
    IResult,
};

use crate::error::BmffError;

const MAX_EXTENTS_PER_ITEM: u16 = 32;

/// An absolute byte range in the scanned stream.
#[cfg_attr(feature = "json_dump", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent {
    pub offset: u64,
    pub length: u64,
}

impl Extent {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.length)
    }
}

/// One `iloc` record, reduced to its first extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IlocItem {
    pub id: u32,
    /// 0: file offset, 1: idat offset, 2: item offset
    pub construction_method: u8,
    pub data_ref_index: u16,
    pub base_offset: u64,
    pub extent: Option<Extent>,
}

impl IlocItem {
    /// Turns the first extent into an absolute range.
    pub fn resolve(&self, idat: Option<Extent>) -> Result<Option<Extent>, BmffError> {
        let Some(extent) = self.extent else {
            return Ok(None);
        };
        if self.data_ref_index != 0 {
            return Err(BmffError::ExternalDataReference(self.data_ref_index));
        }
        let relative = self
            .base_offset
            .checked_add(extent.offset)
            .ok_or(BmffError::OffsetOverflow)?;

        match self.construction_method {
            0 => Ok(Some(Extent::new(relative, extent.length))),
            1 => {
                let idat = idat.ok_or(BmffError::OutOfBounds)?;
                let end = relative
                    .checked_add(extent.length)
                    .ok_or(BmffError::OffsetOverflow)?;
                if end > idat.length {
                    return Err(BmffError::OutOfBounds);
                }
                let offset = idat
                    .offset
                    .checked_add(relative)
                    .ok_or(BmffError::OffsetOverflow)?;
                Ok(Some(Extent::new(offset, extent.length)))
            }
            other => Err(BmffError::UnsupportedConstructionMethod(other)),
        }
    }
}

/// Parses an `iloc` body that follows the FullBox version and flags.
/// At most `max_items` records are kept.
pub(crate) fn parse_iloc_body(
    input: &[u8],
    version: u8,
    max_items: usize,
) -> IResult<&[u8], Vec<IlocItem>> {
    let (remain, (offset_size, length_size)) = map(be_u8, |x| (x >> 4, x & 0xF))(input)?;
    let (remain, (base_offset_size, index_size)) = map(be_u8, |x| (x >> 4, x & 0xF))(remain)?;
    // reserved in version 0
    let index_size = if version == 0 { 0 } else { index_size };

    let (remain, item_count) = if version < 2 {
        map(be_u16, u32::from)(remain)?
    } else {
        be_u32(remain)?
    };
    let count = (item_count as usize).min(max_items);
    if count < item_count as usize {
        tracing::warn!(item_count, max_items, "iloc truncated");
    }

    many_m_n(count, count, move |remain| {
        let (remain, id) = if version < 2 {
            map(be_u16, u32::from)(remain)?
        } else {
            be_u32(remain)?
        };
        let (remain, construction_method) =
            cond(version >= 1, map(be_u16, |x| (x & 0xF) as u8))(remain)?;
        let (remain, data_ref_index) = be_u16(remain)?;
        let (remain, base_offset) = parse_sized_uint(base_offset_size, remain)?;

        let (remain, extent_count) = be_u16(remain)?;
        if extent_count > MAX_EXTENTS_PER_ITEM {
            context("too many iloc extents", fail::<_, (), _>)(remain)?;
        }
        let extent_count = extent_count as usize;
        let (remain, extents) = many_m_n(extent_count, extent_count, move |remain| {
            let (remain, _index) = parse_sized_uint(index_size, remain)?;
            let (remain, offset) = parse_sized_uint(offset_size, remain)?;
            let (remain, length) = parse_sized_uint(length_size, remain)?;
            Ok((remain, Extent::new(offset, length)))
        })(remain)?;

        Ok((
            remain,
            IlocItem {
                id,
                construction_method: construction_method.unwrap_or(0),
                data_ref_index,
                base_offset,
                extent: extents.first().copied(),
            },
        ))
    })(remain)
}

fn parse_sized_uint(size: u8, remain: &[u8]) -> IResult<&[u8], u64> {
    match size {
        0 => Ok((remain, 0)),
        4 => map(be_u32, u64::from)(remain),
        8 => be_u64(remain),
        _ => context("iloc field size is not 0, 4 or 8", fail)(remain),
    }
}
