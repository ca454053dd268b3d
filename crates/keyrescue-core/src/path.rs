//! Derivation path helpers
//!
//! Wallet addresses live at `<base>/<chain>/<index>`. The base is recovered by
//! stripping the trailing `chain/index` pair from the path of a known address.

use bitcoin::bip32::{ChildNumber, DerivationPath};

use crate::keys::KeyError;

/// Components making up the `chain/index` suffix of an address path
pub const ADDRESS_SUFFIX_LEN: usize = 2;

/// Drop the trailing `chain/index` components from `path`.
pub fn base_path(path: &DerivationPath) -> DerivationPath {
    let steps: &[ChildNumber] = path.as_ref();
    let keep = steps.len().saturating_sub(ADDRESS_SUFFIX_LEN);
    DerivationPath::from(&steps[..keep])
}

/// Extend `base` with non-hardened `chain` and `index` steps.
pub fn address_path(
    base: &DerivationPath,
    chain: u32,
    index: u32,
) -> Result<DerivationPath, KeyError> {
    let chain = ChildNumber::from_normal_idx(chain)
        .map_err(|e| KeyError::DerivationFailed(e.to_string()))?;
    let index = ChildNumber::from_normal_idx(index)
        .map_err(|e| KeyError::DerivationFailed(e.to_string()))?;
    Ok(base.extend([chain, index]))
}
