use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Identity of a pipeline input
///
/// SHA-256 over the site, the distinct snapshot content hashes in sorted order and
/// the digest of the analysis settings. Snapshot order and duplicates do not
/// change the fingerprint.
///
/// # Arguments
///
/// * `site_id` - The site
/// * `content_hashes` - Content hashes of the input snapshots
/// * `config_digest` - See `config::compute_analysis_digest`
pub fn fingerprint<'a>(
    site_id: &str,
    content_hashes: impl IntoIterator<Item = &'a str>,
    config_digest: &str,
) -> String {
    let sorted: BTreeSet<&str> = content_hashes.into_iter().collect();

    let mut hasher = Sha256::new();
    hasher.update(site_id.as_bytes());
    hasher.update([0u8]);
    for hash in sorted {
        hasher.update(hash.as_bytes());
        hasher.update([b'\n']);
    }
    hasher.update([0u8]);
    hasher.update(config_digest.as_bytes());
    hex::encode(hasher.finalize())
}
