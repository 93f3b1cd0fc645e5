use std::{error::Error, fs::File, path::PathBuf};

use clap::Parser;
use exifscan::{DateField, Exif, Metadata, MetadataReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    file: PathBuf,

    /// Read the file sequentially, without seeking.
    #[arg(long)]
    unseekable: bool,

    /// Print the raw XMP packet.
    #[arg(long)]
    xmp: bool,

    /// Write the embedded CR3 preview to this path.
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Dump Exif as JSON (needs the `json_dump` feature).
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let reader = MetadataReader::new().with_previews(cli.preview.is_some());
    let meta = if cli.unseekable {
        reader.read_unseekable(File::open(&cli.file)?)?
    } else {
        reader.read_file(&cli.file)?
    };

    println!("{:<32}=> {:?}", "Format", meta.format);
    println!("{:<32}=> {}", "ImageType", meta.image_type);

    if let Some(exif) = &meta.exif {
        if cli.json {
            dump_json(exif)?;
        } else {
            dump_exif(exif);
        }
    }
    dump_xmp(&meta, cli.xmp);

    if let (Some(path), Some(preview)) = (&cli.preview, &meta.preview) {
        std::fs::write(path, &preview.data)?;
        println!(
            "{:<32}=> {}x{}, {} bytes -> {}",
            "Preview",
            preview.header.width,
            preview.header.height,
            preview.data.len(),
            path.display()
        );
    }

    Ok(())
}

fn dump_exif(exif: &Exif) {
    let mut entries = vec![
        ("Make", exif.make.clone()),
        ("Model", exif.model.clone()),
        ("Software", exif.software.clone()),
        ("Artist", exif.artist.clone()),
        ("Copyright", exif.copyright.clone()),
        ("SerialNumber", exif.camera_serial.clone()),
        ("LensMake", exif.lens_make.clone()),
        ("LensModel", exif.lens_model.clone()),
        ("Orientation", exif.orientation.to_string()),
        (
            "ImageSize",
            format!("{}x{}", exif.image_width, exif.image_height),
        ),
        ("ExposureTime", format!("{}", exif.exposure_time)),
        ("FNumber", format!("{}", exif.f_number)),
        ("ExposureBias", exif.exposure_bias.to_string()),
        ("FocalLength", format!("{}", exif.focal_length)),
        ("ISO", exif.iso.to_string()),
    ];

    for (name, which) in [
        ("ModifyDate", DateField::Modify),
        ("DateTimeOriginal", DateField::Original),
        ("CreateDate", DateField::Create),
    ] {
        let value = match exif.date_time_with_offset(which) {
            Some(dt) => Some(dt.to_rfc3339()),
            None => exif.date_time(which).map(|dt| dt.naive_utc().to_string()),
        };
        if let Some(v) = value {
            entries.push((name, v));
        }
    }

    if exif.gps.has_position() {
        entries.push(("GPSPosition", exif.gps.to_iso6709()));
    }
    if !exif.thumbnail.is_empty() {
        entries.push((
            "Thumbnail",
            format!("{}+{}", exif.thumbnail.offset, exif.thumbnail.length),
        ));
    }

    entries
        .iter()
        .filter(|(_, v)| !v.is_empty() && v != "0")
        .for_each(|(k, v)| println!("{k:<32}=> {v}"));
}

#[cfg(feature = "json_dump")]
fn dump_json(exif: &Exif) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(exif)?);
    Ok(())
}

#[cfg(not(feature = "json_dump"))]
fn dump_json(_: &Exif) -> Result<(), Box<dyn Error>> {
    Err("rebuild with `--features json_dump` to dump JSON".into())
}

fn dump_xmp(meta: &Metadata, full: bool) {
    let Some(xmp) = meta.xmp.as_ref().or(meta.exif.as_ref().and_then(|e| e.xmp.as_ref())) else {
        return;
    };
    if full {
        println!("{}", String::from_utf8_lossy(xmp));
    } else {
        println!("{:<32}=> {} bytes", "XMP", xmp.len());
    }
}
