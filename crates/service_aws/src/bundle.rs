use service::ServiceError;
use std::io::{Cursor, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// File the submitted code is written to inside the deployment package
pub const ENTRY_POINT: &str = "index.mjs";
/// Handler every function is created with
pub const HANDLER: &str = "index.handler";

/// Package source code as a single-file zip deployment package.
pub fn bundle_code(code: &str) -> Result<Vec<u8>, ServiceError> {
    let mut zip: ZipWriter<Cursor<Vec<u8>>> = ZipWriter::new(Cursor::new(Vec::new()));
    let options: FileOptions = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    zip.start_file(ENTRY_POINT, options)
        .map_err(|err| ServiceError::Permanent(format!("Failed to bundle code: {err}")))?;
    zip.write_all(code.as_bytes())
        .map_err(|err| ServiceError::Permanent(format!("Failed to bundle code: {err}")))?;
    let package: Cursor<Vec<u8>> = zip
        .finish()
        .map_err(|err| ServiceError::Permanent(format!("Failed to bundle code: {err}")))?;

    Ok(package.into_inner())
}
