use semver::Version;

/// Version assigned at import when the descriptor states none.
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Whether `candidate` should replace `installed`.
///
/// Semver ordering when both trimmed strings are valid semver, otherwise
/// plain inequality ("different" counts as an update). A `v` prefix is not
/// valid semver, so `v1.2.0` and `1.2.0` differ.
pub fn is_update(installed: &str, candidate: &str) -> bool {
    let (installed, candidate) = (installed.trim(), candidate.trim());
    match (Version::parse(installed), Version::parse(candidate)) {
        (Ok(installed), Ok(candidate)) => candidate > installed,
        _ => installed != candidate,
    }
}
