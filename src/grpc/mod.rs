pub mod client;
pub mod convert;
pub mod server;

pub use client::CentroClient;
pub use server::{AllowAllTokens, CentroService, TokenValidator};
