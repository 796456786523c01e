pub mod balances;
pub mod history;
pub mod prices;

pub use balances::{BitcoinBalanceSource, ChainBalanceSource, Erc20BalanceSource};
pub use history::load_histories;
pub use prices::{
    CoingeckoSource, CoinpaprikaSource, FallbackPriceOracle, HistorySource, PriceBoard,
    PriceRoute, PriceSource, StaticPriceSource,
};
