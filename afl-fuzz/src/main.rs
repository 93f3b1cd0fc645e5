use std::io::Cursor;

use exifscan::{BmffReader, MetadataReader, SliceSource};

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    afl::fuzz!(|data: &[u8]| {
        let _ = exifscan::parse(data);
        let _ = MetadataReader::new()
            .with_previews(true)
            .read(Cursor::new(data));
        let _ = MetadataReader::new().read_unseekable(data);

        let mut reader = BmffReader::new(SliceSource::new(data))
            .on_exif(|r, _| r.discard(1))
            .on_xmp(|_, _| Ok(()))
            .on_preview(|_, _| Ok(()));
        let _ = reader.scan();
    });
}
