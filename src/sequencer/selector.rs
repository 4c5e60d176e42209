//! Step classification by function selector
//!
//! Classification is structural only: the first four bytes of the calldata are looked up in
//! a static table. Unknown non-empty calldata is assumed to be a swap.

use crate::chain::erc20::IERC20;

use alloy_sol_types::{sol, SolCall};
use serde::{Deserialize, Serialize};
use std::fmt;

sol! {
    struct ExactInputSingleParams {
        address tokenIn;
        address tokenOut;
        uint24 fee;
        address recipient;
        uint256 amountIn;
        uint256 amountOutMinimum;
        uint160 sqrtPriceLimitX96;
    }

    interface ISwapRouter {
        function exactInputSingle(ExactInputSingleParams calldata params) external payable returns (uint256 amountOut);
    }

    interface IUniswapV2Router {
        function swapExactTokensForTokens(uint256 amountIn, uint256 amountOutMin, address[] calldata path, address to, uint256 deadline) external returns (uint256[] memory amounts);
        function swapExactETHForTokens(uint256 amountOutMin, address[] calldata path, address to, uint256 deadline) external payable returns (uint256[] memory amounts);
    }

    interface IUniversalRouter {
        function execute(bytes calldata commands, bytes[] calldata inputs, uint256 deadline) external payable;
    }

    interface IAxelarGateway {
        function sendToken(string calldata destinationChain, string calldata destinationAddress, string calldata symbol, uint256 amount) external;
        function callContract(string calldata destinationChain, string calldata contractAddress, bytes calldata payload) external;
        function callContractWithToken(string calldata destinationChain, string calldata contractAddress, bytes calldata payload, string calldata symbol, uint256 amount) external;
    }
}

/// What an on-chain call does, as far as the sequencer cares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Approval,
    Swap,
    Bridge,
    Other,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Approval => "approval",
            StepKind::Swap => "swap",
            StepKind::Bridge => "bridge",
            StepKind::Other => "other",
        }
    }

    /// Classify calldata by its selector
    pub fn from_calldata(data: &[u8]) -> StepKind {
        if data.is_empty() {
            return StepKind::Other;
        }
        lookup(data)
            .map(|entry| entry.kind)
            .unwrap_or(StepKind::Swap)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct SelectorEntry {
    selector: [u8; 4],
    function: &'static str,
    kind: StepKind,
}

const SELECTORS: &[SelectorEntry] = &[
    SelectorEntry {
        selector: IERC20::approveCall::SELECTOR,
        function: "approve",
        kind: StepKind::Approval,
    },
    SelectorEntry {
        selector: IERC20::transferCall::SELECTOR,
        function: "transfer",
        kind: StepKind::Other,
    },
    SelectorEntry {
        selector: IERC20::transferFromCall::SELECTOR,
        function: "transferFrom",
        kind: StepKind::Other,
    },
    SelectorEntry {
        selector: ISwapRouter::exactInputSingleCall::SELECTOR,
        function: "exactInputSingle",
        kind: StepKind::Swap,
    },
    SelectorEntry {
        selector: IUniswapV2Router::swapExactTokensForTokensCall::SELECTOR,
        function: "swapExactTokensForTokens",
        kind: StepKind::Swap,
    },
    SelectorEntry {
        selector: IUniswapV2Router::swapExactETHForTokensCall::SELECTOR,
        function: "swapExactETHForTokens",
        kind: StepKind::Swap,
    },
    SelectorEntry {
        selector: IUniversalRouter::executeCall::SELECTOR,
        function: "execute",
        kind: StepKind::Swap,
    },
    SelectorEntry {
        selector: IAxelarGateway::sendTokenCall::SELECTOR,
        function: "sendToken",
        kind: StepKind::Bridge,
    },
    SelectorEntry {
        selector: IAxelarGateway::callContractCall::SELECTOR,
        function: "callContract",
        kind: StepKind::Bridge,
    },
    SelectorEntry {
        selector: IAxelarGateway::callContractWithTokenCall::SELECTOR,
        function: "callContractWithToken",
        kind: StepKind::Bridge,
    },
];

fn lookup(data: &[u8]) -> Option<&'static SelectorEntry> {
    let selector = data.get(..4)?;
    SELECTORS.iter().find(|entry| &entry.selector[..] == selector)
}

/// Name of the called function, when the selector is known
pub fn function_name(data: &[u8]) -> Option<&'static str> {
    lookup(data).map(|entry| entry.function)
}
