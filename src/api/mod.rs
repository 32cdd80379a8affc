//! Exchange access: gateway traits, the Coinbase REST client and a paper exchange.

mod coinbase;
mod gateway;
mod paper;
mod types;

pub use coinbase::CoinbaseClient;
pub use gateway::{ExchangeGateway, PriceSource};
#[cfg(test)]
pub use gateway::{GatewayError, OrderReceipt};
pub use paper::PaperExchange;
