//! Modbus/TCP interception proxy
//!
//! Pulls Modbus responses out of the kernel forwarding path through NFQUEUE,
//! rewrites one register of matching read responses, repairs the TCP/IP
//! checksums and reinjects the packet.

pub mod checksum;
pub mod config;
pub mod error;
pub mod firewall;
pub mod interceptor;
pub mod modbus;
pub mod mutation;
pub mod packet;
pub mod proxy;
pub mod queue;
pub mod stats;
pub mod testing;

pub use config::Config;
pub use error::{InterceptError, ModbusError, MutationError, ParseFailure};
pub use firewall::{FirewallController, RedirectRule};
pub use interceptor::{Interceptor, Verdict};
pub use mutation::MutationRule;
pub use packet::{parse, ParsedPacket};
pub use proxy::{Proxy, ProxyState, TeardownReport};
pub use queue::PacketQueue;
