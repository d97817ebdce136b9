pub mod api_tokens;
pub mod jwt;
pub mod middleware;
