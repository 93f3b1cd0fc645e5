//! Tag identifiers understood by the IFD reader, see
//! https://exiftool.org/TagNames/EXIF.html

use std::fmt::Display;

macro_rules! tag_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $code:literal,)+ }) => {
        $(#[$meta])*
        #[derive(Debug, Eq, PartialEq, Hash, Clone, Copy)]
        #[repr(u16)]
        pub enum $name {
            $($variant = $code,)+
        }

        impl $name {
            pub const fn code(self) -> u16 {
                self as u16
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant),)+
                }
            }
        }

        impl TryFrom<u16> for $name {
            type Error = u16;

            fn try_from(v: u16) -> Result<Self, Self::Error> {
                match v {
                    $($code => Ok($name::$variant),)+
                    other => Err(other),
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.name().fmt(f)
            }
        }
    };
}

tag_enum! {
    /// Tags of IFD0, the SubIFDs and the Exif IFD.
    ExifTag {
        NewSubfileType = 0x00fe,
        ImageWidth = 0x0100,
        ImageLength = 0x0101,
        Compression = 0x0103,
        Make = 0x010f,
        Model = 0x0110,
        StripOffsets = 0x0111,
        Orientation = 0x0112,
        StripByteCounts = 0x0117,
        XResolution = 0x011a,
        YResolution = 0x011b,
        ResolutionUnit = 0x0128,
        Software = 0x0131,
        DateTime = 0x0132,
        Artist = 0x013b,
        SubIfds = 0x014a,
        JpegInterchangeFormat = 0x0201,
        JpegInterchangeFormatLength = 0x0202,
        ApplicationNotes = 0x02bc,
        Rating = 0x4746,
        Copyright = 0x8298,
        ExposureTime = 0x829a,
        FNumber = 0x829d,
        ExifIfdPointer = 0x8769,
        ExposureProgram = 0x8822,
        GpsIfdPointer = 0x8825,
        IsoSpeedRatings = 0x8827,
        TimeZoneOffset = 0x882a,
        ExifVersion = 0x9000,
        DateTimeOriginal = 0x9003,
        DateTimeDigitized = 0x9004,
        OffsetTime = 0x9010,
        OffsetTimeOriginal = 0x9011,
        OffsetTimeDigitized = 0x9012,
        ShutterSpeedValue = 0x9201,
        ApertureValue = 0x9202,
        ExposureBiasValue = 0x9204,
        MaxApertureValue = 0x9205,
        SubjectDistance = 0x9206,
        MeteringMode = 0x9207,
        LightSource = 0x9208,
        Flash = 0x9209,
        FocalLength = 0x920a,
        SubjectArea = 0x9214,
        MakerNote = 0x927c,
        SubSecTime = 0x9290,
        SubSecTimeOriginal = 0x9291,
        SubSecTimeDigitized = 0x9292,
        ColorSpace = 0xa001,
        PixelXDimension = 0xa002,
        PixelYDimension = 0xa003,
        InteropIfdPointer = 0xa005,
        ExposureMode = 0xa402,
        WhiteBalance = 0xa403,
        FocalLengthIn35mmFilm = 0xa405,
        ImageUniqueId = 0xa420,
        CameraOwnerName = 0xa430,
        BodySerialNumber = 0xa431,
        LensInfo = 0xa432,
        LensMake = 0xa433,
        LensModel = 0xa434,
        LensSerialNumber = 0xa435,
        DngPrivateData = 0xc634,
    }
}

tag_enum! {
    /// Tags of the GPS IFD (Exif 2.3).
    GpsTag {
        VersionId = 0x0000,
        LatitudeRef = 0x0001,
        Latitude = 0x0002,
        LongitudeRef = 0x0003,
        Longitude = 0x0004,
        AltitudeRef = 0x0005,
        Altitude = 0x0006,
        TimeStamp = 0x0007,
        Satellites = 0x0008,
        Status = 0x0009,
        MeasureMode = 0x000a,
        Dop = 0x000b,
        SpeedRef = 0x000c,
        Speed = 0x000d,
        TrackRef = 0x000e,
        Track = 0x000f,
        ImgDirectionRef = 0x0010,
        ImgDirection = 0x0011,
        MapDatum = 0x0012,
        DestLatitudeRef = 0x0013,
        DestLatitude = 0x0014,
        DestLongitudeRef = 0x0015,
        DestLongitude = 0x0016,
        DestBearingRef = 0x0017,
        DestBearing = 0x0018,
        DestDistanceRef = 0x0019,
        DestDistance = 0x001a,
        ProcessingMethod = 0x001b,
        AreaInformation = 0x001c,
        DateStamp = 0x001d,
        Differential = 0x001e,
        HPositioningError = 0x001f,
    }
}

tag_enum! {
    /// Canon MakerNote tags used to fill gaps in the Exif IFD.
    CanonTag {
        ImageType = 0x0006,
        FirmwareVersion = 0x0007,
        OwnerName = 0x0009,
        SerialNumber = 0x000c,
        ModelId = 0x0010,
        LensModel = 0x0095,
    }
}
