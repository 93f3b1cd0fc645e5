use super::tag::Tag;

pub const QUEUE_CAPACITY: usize = 84;

/// Deferred tag reads, kept sorted by `value_offset` so values can be read
/// with forward-only I/O.
pub struct TagQueue {
    tags: [Tag; QUEUE_CAPACITY],
    len: usize,
    pos: usize,
}

impl TagQueue {
    pub fn new() -> Self {
        Self {
            tags: [Tag::default(); QUEUE_CAPACITY],
            len: 0,
            pos: 0,
        }
    }

    /// Inserts `tag` at its sorted position. `po` is the reader's current
    /// offset from the TIFF base; values behind it can no longer be read.
    ///
    /// Returns false when the tag was dropped.
    pub fn add(&mut self, tag: Tag, po: u32) -> bool {
        if tag.value_offset < po {
            tracing::warn!(
                tag = format!("0x{:04x}", tag.id),
                ifd = %tag.ifd,
                offset = tag.value_offset,
                po,
                "tag value lies behind the reader; dropped"
            );
            return false;
        }
        if self.len == QUEUE_CAPACITY {
            tracing::debug!(tag = format!("0x{:04x}", tag.id), "tag queue full");
            return false;
        }

        let mut i = self.len;
        while i > self.pos && self.tags[i - 1].value_offset > tag.value_offset {
            self.tags[i] = self.tags[i - 1];
            i -= 1;
        }
        self.tags[i] = tag;
        self.len += 1;
        true
    }

    pub fn current(&self) -> Option<&Tag> {
        self.unread().first()
    }

    pub fn advance(&mut self) {
        if self.pos < self.len {
            self.pos += 1;
        }
    }

    /// Returns the current tag and moves past it.
    pub fn next(&mut self) -> Option<Tag> {
        let tag = self.current().copied()?;
        self.advance();
        Some(tag)
    }

    /// Drops the entries already read, so a child IFD can merge its tags
    /// into the remaining ones.
    pub fn reset_position(&mut self) {
        self.tags.copy_within(self.pos..self.len, 0);
        self.len -= self.pos;
        self.pos = 0;
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.pos = 0;
    }

    pub fn len(&self) -> usize {
        self.len - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unread(&self) -> &[Tag] {
        &self.tags[self.pos..self.len]
    }
}

impl Default for TagQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TagQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagQueue")
            .field("len", &self.len)
            .field("pos", &self.pos)
            .finish()
    }
}
