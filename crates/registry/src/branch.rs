use tracing::{debug, warn};

use crate::{client::RegistryClient, error::Result, locator::RegistryLocator};

/// Resolve the branch to read the catalog from.
///
/// The host's reported default branch always wins. When the lookup fails,
/// the locator's hint is used only if it came from the reference itself;
/// a conventional `main` is never guessed. One attempt per sync.
pub async fn resolve_branch(client: &dyn RegistryClient, locator: &RegistryLocator) -> Result<String> {
    match client.default_branch(&locator.owner, &locator.repo).await {
        Ok(branch) => {
            if locator.branch_explicit && branch != locator.branch_hint {
                debug!(
                    registry = %locator.slug(),
                    hint = %locator.branch_hint,
                    %branch,
                    "host default branch differs from reference"
                );
            }
            Ok(branch)
        },
        Err(e) if locator.branch_explicit => {
            warn!(
                registry = %locator.slug(),
                hint = %locator.branch_hint,
                error = %e,
                "default branch lookup failed, using branch from reference"
            );
            Ok(locator.branch_hint.clone())
        },
        Err(e) => Err(e),
    }
}
