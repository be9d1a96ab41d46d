use ethers_core::types::{Address, H256};

use crate::consts::ADDR_MASK_H256;

/// Returns true if the storage word only uses its low 20 bytes.
#[inline(always)]
pub fn h256_is_address(value: &H256) -> bool {
    (*value & *ADDR_MASK_H256) == *value
}

/// Extracts the address from the low 20 bytes of a storage word.
///
/// The caller must have checked [`h256_is_address`] first; the high 12 bytes
/// are discarded.
#[inline(always)]
pub fn h256_to_address_unchecked(value: &H256) -> Address {
    Address::from_slice(&value.0[12..])
}

/// Widens an address into a 32-byte storage word, left padded with zeros.
#[inline(always)]
pub fn address_to_h256(address: &Address) -> H256 {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    H256(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_h256_is_address() {
        let addr_word = H256(hex_literal::hex!(
            "000000000000000000000000bebebebebebebebebebebebebebebebebebebebe"
        ));
        let not_addr = H256(hex_literal::hex!(
            "010000000000000000000000bebebebebebebebebebebebebebebebebebebebe"
        ));
        assert!(h256_is_address(&addr_word));
        assert!(!h256_is_address(&not_addr));
        assert!(h256_is_address(&H256::zero()));
    }

    #[test]
    fn test_h256_address_round_trip() {
        let address = Address::from(hex_literal::hex!(
            "bebebebebebebebebebebebebebebebebebebebe"
        ));
        let word = address_to_h256(&address);
        assert!(h256_is_address(&word));
        assert_eq!(h256_to_address_unchecked(&word), address);
    }
}
