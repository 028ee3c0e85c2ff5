pub use client::Client;
pub use conf::Config;
pub use logging::Logger;
pub use sclient::SettingsClient;
pub use session::SessionHandle;

pub mod addr;
pub mod app;
pub mod bus;
pub mod classified;
pub mod client;
pub mod conf;
pub mod init;
pub mod logging;
pub mod message;
pub mod method;
pub mod params;
pub mod sclient;
pub mod server;
pub mod session;
pub mod util;
pub mod worker;

#[cfg(test)]
mod tests;
