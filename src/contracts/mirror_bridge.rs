//! Bridge contract ABI definition
//!
//! Uses alloy's sol! macro to generate type-safe bindings. The same interface
//! is deployed on both legs: the ETH contract emits `Deposit` and accepts
//! `burnedOnOppositeChain`, the BASE contract emits `Burn` and accepts
//! `lockedOnOppositeChain`.

use alloy::sol;

sol! {
    #[sol(rpc)]
    contract MirrorBridge {
        /// Called by the relayer after a deposit was locked on the opposite chain;
        /// makes `amount` mintable for `user`. Reverts if `nonce` was already processed.
        function lockedOnOppositeChain(address user, uint256 amount, uint256 nonce) external;

        /// Called by the relayer after wrapped funds were burned on the opposite chain;
        /// makes `amount` unlockable for `user`. Reverts if `nonce` was already processed.
        function burnedOnOppositeChain(address user, uint256 amount, uint256 nonce) external;

        event Deposit(address indexed user, uint256 amount, uint256 nonce);

        event Burn(address indexed user, uint256 amount, uint256 nonce);
    }
}
