pub mod jsonrpc;
pub mod mcp;
