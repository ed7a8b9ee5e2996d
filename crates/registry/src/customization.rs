use {
    serde::Serialize,
    sha2::{Digest, Sha256},
};

use crate::{
    descriptor::DESCRIPTOR_FILE,
    error::Result,
    store::{Destination, InstalledPackageRecord, RecordStore},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomizationStatus {
    pub identity: String,
    pub destination: Destination,
    pub is_customized: bool,
}

/// Lower-hex SHA-256 of raw bytes. No normalization: any byte edit counts.
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Fingerprint of the descriptor file under `package_dir`.
pub async fn fingerprint_package(package_dir: &std::path::Path) -> Result<String> {
    let bytes = tokio::fs::read(package_dir.join(DESCRIPTOR_FILE)).await?;
    Ok(fingerprint(&bytes))
}

/// Compare the installed descriptor against the record's baseline.
///
/// No baseline means not customized. A baseline whose descriptor file is
/// gone counts as customized. The record's path must sit inside the
/// store's root.
pub async fn detect(store: &RecordStore, record: &InstalledPackageRecord) -> Result<CustomizationStatus> {
    let is_customized = match &record.content_hash {
        None => false,
        Some(baseline) => {
            let dir = store.contained(&record.disk_path)?;
            let file = dir.join(DESCRIPTOR_FILE);
            if tokio::fs::try_exists(&file).await? {
                fingerprint_package(&dir).await? != *baseline
            } else {
                true
            }
        },
    };
    Ok(CustomizationStatus {
        identity: record.identity.clone(),
        destination: store.destination(),
        is_customized,
    })
}
