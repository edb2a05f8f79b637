pub mod auth_service;
pub mod proxy_service;
