//! HTTP server and admission middleware.

mod middleware;
mod server;

pub use middleware::admit_request;
pub use server::HttpServer;
