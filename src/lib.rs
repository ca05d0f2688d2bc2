pub mod auth;
pub mod db;
pub mod error;
pub mod matching;
pub mod rewards;
pub mod routes;

use db::DbPool;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
}
