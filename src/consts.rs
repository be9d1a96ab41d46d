use once_cell::sync::Lazy;
use ethers_core::types::H256;

/// EIP-1967 admin slot: keccak256("eip1967.proxy.admin") - 1.
pub static EIP1967_ADMIN_SLOT: Lazy<H256> = Lazy::new(|| {
    H256(hex_literal::hex!("b53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103"))
});

/// EIP-1967 implementation slot: keccak256("eip1967.proxy.implementation") - 1.
pub static EIP1967_IMPLEMENTATION_SLOT: Lazy<H256> = Lazy::new(|| {
    H256(hex_literal::hex!("360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc"))
});

/// Mask selecting the low 20 bytes of a storage word.
pub static ADDR_MASK_H256: Lazy<H256> = Lazy::new(|| {
    H256(hex_literal::hex!("000000000000000000000000ffffffffffffffffffffffffffffffffffffffff"))
});
