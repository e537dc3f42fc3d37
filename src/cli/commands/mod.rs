pub mod ping;
pub mod routes;
pub mod serve;
pub mod token;
