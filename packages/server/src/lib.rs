// Scan Worker - Server
//
// Hosts the scan engine: HTTP endpoints to request, inspect and cancel scans,
// the periodic poll trigger, and the production collaborators (Firecrawl,
// OpenAI, Tavily, webhook notifications) wired from the environment.

pub mod config;
pub mod kernel;
pub mod server;

pub use config::*;
