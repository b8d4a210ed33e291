//! Kraken spot exchange gateway: signed REST client and multiplexing
//! WebSocket manager.

pub mod auth;
pub mod book;
pub mod error;
pub mod messages;
pub mod rest;
pub mod token;
pub mod types;
pub mod ws;

pub use auth::KrakenCredentials;
pub use book::{BookLevel, BookSide, BookState};
pub use error::{KrakenError, Result};
pub use rest::KrakenRestClient;
pub use token::TokenCache;
pub use types::{
    AddOrderResponse, ExecutionFill, GatewayEvent, OhlcEvent, OrderRequest, OrderSide,
    PairMetadata,
};
pub use ws::{ChannelKey, KrakenWsManager, SocketKind, SubscriptionHandle};
