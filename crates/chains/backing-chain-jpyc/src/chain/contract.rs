use alloy_sol_types::sol;

sol! {
    /// The subset of the JPYC token used by the relay and by wallets.
    #[allow(missing_docs)]
    #[allow(clippy::too_many_arguments)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IJPYC {
        function nonces(address owner) external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function permit(
            address owner,
            address spender,
            uint256 value,
            uint256 deadline,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;
        function transferFrom(address from, address to, uint256 value) external returns (bool);
    }
}
