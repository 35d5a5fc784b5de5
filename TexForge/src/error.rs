//! Error types for `TexForge`

use std::path::PathBuf;

use thiserror::Error;

/// The error type for `TexForge` operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    // ==================== IO Errors ====================
    /// IO error from file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ==================== Package Format Errors ====================
    /// The file is not a package (wrong magic tag).
    #[error("invalid package magic: expected 0x9E2A83C1, found {0:#010X}")]
    InvalidPackageMagic(u32),

    /// The package file version does not select a supported header layout.
    #[error("unsupported package version: {version}")]
    UnsupportedPackageVersion {
        /// The version number found in the file.
        version: u16,
    },

    /// The package header is truncated or internally inconsistent.
    #[error("malformed package header: {message}")]
    MalformedPackageHeader {
        /// Description of what is inconsistent.
        message: String,
    },

    /// A table (names, imports, exports, depends, guids) points outside the file.
    #[error("{table} table is out of bounds (offset {offset}, file size {size})")]
    TableOutOfBounds {
        /// Which table.
        table: &'static str,
        /// The offset recorded in the header.
        offset: u64,
        /// The size of the uncompressed image.
        size: u64,
    },

    /// An export index does not exist in the package.
    #[error("export index {index} out of range (package has {count} exports)")]
    ExportIndexOutOfRange {
        /// The requested export index.
        index: usize,
        /// The number of exports in the package.
        count: usize,
    },

    /// An export's data range lies outside the package image.
    #[error("export {index} data is truncated (offset {offset}, size {size}, image {image_size})")]
    ExportDataTruncated {
        /// The export index.
        index: usize,
        /// Recorded data offset.
        offset: u32,
        /// Recorded data size.
        size: u32,
        /// Size of the uncompressed image.
        image_size: usize,
    },

    /// A name index does not exist in the name table.
    #[error("invalid name index: {0}")]
    InvalidNameIndex(i32),

    /// The package grew beyond what 32-bit offsets can address.
    #[error("package image too large: {size} bytes")]
    PackageTooLarge {
        /// Size of the image in bytes.
        size: usize,
    },

    // ==================== Envelope / Compression Errors ====================
    /// A chunked compression envelope failed validation.
    #[error("corrupt compressed envelope: {message}")]
    CorruptEnvelope {
        /// Description of the mismatch.
        message: String,
    },

    /// Zlib decompression failed.
    #[error("Zlib decompression failed: {message}")]
    ZlibDecompressionFailed {
        /// The error message.
        message: String,
    },

    /// LZ4 decompression failed.
    #[error("LZ4 decompression failed: {message}")]
    Lz4DecompressionFailed {
        /// The error message.
        message: String,
    },

    /// Unsupported compression method.
    #[error("unsupported compression method: {method}")]
    UnsupportedCompressionMethod {
        /// The compression method identifier.
        method: u32,
    },

    // ==================== Texture Errors ====================
    /// The export is not a texture or its payload cannot be parsed.
    #[error("malformed texture in export {export}: {message}")]
    MalformedTexture {
        /// The export index.
        export: usize,
        /// Description of the parse failure.
        message: String,
    },

    /// A property could not be decoded.
    #[error("malformed property '{name}': {message}")]
    MalformedProperty {
        /// Property name (if known).
        name: String,
        /// Description of the failure.
        message: String,
    },

    /// A mip list violates the inline/external storage layout rule.
    #[error("invalid mip storage layout: {message}")]
    InvalidStorageLayout {
        /// Description of the violation.
        message: String,
    },

    /// A mip payload's size does not match its descriptor.
    #[error("mip {width}x{height} size mismatch: expected {expected} bytes, found {actual}")]
    MipSizeMismatch {
        /// Mip width.
        width: u32,
        /// Mip height.
        height: u32,
        /// Size recorded in the descriptor.
        expected: usize,
        /// Size actually produced.
        actual: usize,
    },

    /// The texture has no usable mipmap.
    #[error("texture has no mipmaps with data")]
    NoMipmaps,

    /// Replacement payload does not carry enough mipmaps for the destination.
    #[error("replacement has {provided} mipmap(s) but destination expects {expected}")]
    NotEnoughMipmaps {
        /// Mip count in the payload.
        provided: usize,
        /// Mip count expected by the destination.
        expected: usize,
    },

    /// Pixel formats differ and no pixel codec is available to convert.
    #[error("pixel format conversion {from} -> {to} requires a pixel codec")]
    PixelCodecUnavailable {
        /// Payload pixel format.
        from: String,
        /// Destination pixel format.
        to: String,
    },

    /// The pixel codec reported a failure.
    #[error("pixel codec failed: {message}")]
    PixelCodecFailed {
        /// Error reported by the codec.
        message: String,
    },

    // ==================== Texture Cache (TFC) Errors ====================
    /// A referenced texture cache file does not exist.
    #[error("texture cache '{name}' not found")]
    CacheFileNotFound {
        /// The cache name (without extension).
        name: String,
    },

    /// A cache read fell outside the cache file.
    #[error("read of {length} bytes at {offset} is outside cache '{name}' ({size} bytes)")]
    CacheReadOutOfBounds {
        /// The cache name.
        name: String,
        /// Read offset.
        offset: u64,
        /// Read length.
        length: usize,
        /// File size.
        size: u64,
    },

    /// No cache file under the size ceiling could be found or created.
    #[error("no texture cache below {ceiling} bytes available for '{base}' after {attempts} candidates")]
    CacheCapacityExhausted {
        /// Base cache name.
        base: String,
        /// Size ceiling in bytes.
        ceiling: u64,
        /// Number of candidate names tried.
        attempts: usize,
    },

    /// A cache file's GUID does not match the texture's reference.
    #[error("texture cache '{name}' GUID mismatch")]
    CacheGuidMismatch {
        /// The cache name.
        name: String,
    },

    // ==================== Mirror Errors ====================
    /// A mirror set's aliasing assumption does not hold.
    #[error("mirror set integrity violated: {message}")]
    MirrorIntegrity {
        /// Description of the violation.
        message: String,
    },

    // ==================== Mod Container Errors ====================
    /// The file is not a mod container.
    #[error("invalid mod magic: expected TFMD, found {0:?}")]
    InvalidModMagic([u8; 4]),

    /// The mod container was built by an incompatible tool version.
    #[error("unsupported mod format version {version} (expected {expected})")]
    UnsupportedModVersion {
        /// Version found in the file.
        version: u32,
        /// Version this build reads.
        expected: u32,
    },

    /// The mod names a game variant this build does not know.
    #[error("unknown game variant id {0} in mod directory")]
    UnknownModVariant(u32),

    /// An entry kind tag is unknown.
    #[error("unknown mod entry kind tag: {0}")]
    UnknownModEntryKind(u32),

    /// A mod entry's name does not follow the naming scheme of its kind.
    #[error("malformed mod entry name '{0}'")]
    MalformedEntryName(String),

    /// A mod entry's byte range lies outside the file.
    #[error("mod entry '{name}' is out of bounds")]
    ModEntryOutOfBounds {
        /// Entry name.
        name: String,
    },

    /// The mod targets a different game variant.
    #[error("mod targets {found} but installation is {expected}")]
    ModVariantMismatch {
        /// Variant recorded in the mod.
        found: String,
        /// Variant of the installation.
        expected: String,
    },

    /// A mip set payload is malformed.
    #[error("malformed mip set payload: {message}")]
    MalformedMipSet {
        /// Description of the failure.
        message: String,
    },

    /// A binary diff payload is malformed or does not apply.
    #[error("binary diff failed: {message}")]
    BinaryDiffFailed {
        /// Description of the failure.
        message: String,
    },

    // ==================== Install Errors ====================
    /// A referenced package file does not exist.
    #[error("package not found: {path}")]
    PackageNotFound {
        /// The expected path.
        path: PathBuf,
    },

    /// The catalog was built for another game variant.
    #[error("catalog is for {found} but installation is {expected}")]
    CatalogVariantMismatch {
        /// Variant recorded in the catalog.
        found: String,
        /// Variant of the installation.
        expected: String,
    },

    /// Configuration could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    // ==================== Parsing Errors ====================
    /// JSON parsing or serialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Directory traversal error.
    #[error("directory walk error: {0}")]
    WalkDirError(String),

    /// Unexpected end of data.
    #[error("unexpected end of data")]
    UnexpectedEof,
}

// Add conversion from walkdir::Error
impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        Error::WalkDirError(err.to_string())
    }
}

/// Failure classes that decide how far an error propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// Bad magic/version/header: the file being opened is unusable.
    Format,
    /// Size mismatches, broken data: the item is skipped.
    CorruptData,
    /// No cache space left: the whole run stops.
    Capacity,
    /// A referenced file is missing: the item is skipped.
    NotFound,
    /// Aliasing assumptions violated: the item is skipped.
    IntegrityMismatch,
    /// Operating system I/O failure.
    Io,
    /// Anything else (configuration, codec availability, ...).
    Other,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Format => "format",
            ErrorKind::CorruptData => "corrupt data",
            ErrorKind::Capacity => "capacity",
            ErrorKind::NotFound => "not found",
            ErrorKind::IntegrityMismatch => "integrity mismatch",
            ErrorKind::Io => "io",
            ErrorKind::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidPackageMagic(_)
            | Error::UnsupportedPackageVersion { .. }
            | Error::MalformedPackageHeader { .. }
            | Error::TableOutOfBounds { .. }
            | Error::InvalidModMagic(_)
            | Error::UnsupportedModVersion { .. }
            | Error::UnknownModEntryKind(_)
            | Error::UnknownModVariant(_)
            | Error::UnsupportedCompressionMethod { .. }
            | Error::ModVariantMismatch { .. }
            | Error::CatalogVariantMismatch { .. } => ErrorKind::Format,

            Error::ExportIndexOutOfRange { .. }
            | Error::ExportDataTruncated { .. }
            | Error::InvalidNameIndex(_)
            | Error::CorruptEnvelope { .. }
            | Error::ZlibDecompressionFailed { .. }
            | Error::Lz4DecompressionFailed { .. }
            | Error::MalformedTexture { .. }
            | Error::MalformedProperty { .. }
            | Error::InvalidStorageLayout { .. }
            | Error::MipSizeMismatch { .. }
            | Error::NoMipmaps
            | Error::NotEnoughMipmaps { .. }
            | Error::CacheReadOutOfBounds { .. }
            | Error::MalformedEntryName(_)
            | Error::ModEntryOutOfBounds { .. }
            | Error::MalformedMipSet { .. }
            | Error::BinaryDiffFailed { .. }
            | Error::PackageTooLarge { .. }
            | Error::UnexpectedEof => ErrorKind::CorruptData,

            Error::CacheCapacityExhausted { .. } => ErrorKind::Capacity,

            Error::CacheFileNotFound { .. } | Error::PackageNotFound { .. } => ErrorKind::NotFound,

            Error::MirrorIntegrity { .. } | Error::CacheGuidMismatch { .. } => {
                ErrorKind::IntegrityMismatch
            }

            Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => ErrorKind::CorruptData,
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            Error::Io(_) => ErrorKind::Io,

            Error::PixelCodecUnavailable { .. }
            | Error::PixelCodecFailed { .. }
            | Error::Config(_)
            | Error::JsonError(_)
            | Error::WalkDirError(_) => ErrorKind::Other,
        }
    }

    /// Whether this error must abort a whole install run rather than one item.
    #[must_use]
    pub fn is_fatal_for_run(&self) -> bool {
        self.kind() == ErrorKind::Capacity
    }

    pub(crate) fn corrupt_envelope(message: impl Into<String>) -> Self {
        Error::CorruptEnvelope {
            message: message.into(),
        }
    }

    pub(crate) fn malformed_header(message: impl Into<String>) -> Self {
        Error::MalformedPackageHeader {
            message: message.into(),
        }
    }
}

/// A specialized Result type for `TexForge` operations.
pub type Result<T> = std::result::Result<T, Error>;
