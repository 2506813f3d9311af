//! 缓存服务：服务端、协议和客户端

pub mod client;
pub mod factory;
pub mod protocol;
pub mod redis_client;
pub mod server;
pub mod store;

pub use client::{CacheTransport, CommandClient, LocalCacheClient, SocketCacheClient, SocketTransport};
pub use factory::CacheFactory;
pub use redis_client::RedisCacheClient;
pub use server::{CacheServer, CacheServerHandle, ReactorHandle};
