pub mod gateway;
pub mod pipeline;
pub mod wallets;

pub use gateway::TradeGateway;
pub use pipeline::{evaluate_events, evaluate_wallet, EvaluationContext, WalletOutcome};
pub use wallets::{load_wallets, parse_wallet_list};
