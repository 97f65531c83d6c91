pub mod ws;

pub use ws::WsConnector;
