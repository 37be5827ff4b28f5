pub mod accounts;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod migrations;
pub mod models;
pub mod presence;
pub mod routes;
pub mod services;
pub mod state;
pub mod storage;
pub mod websocket;
