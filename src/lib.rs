pub mod remux;
pub mod supervisor;
pub mod utils;

use std::env;
use once_cell::sync::Lazy;

const REMUX_LOG_PATH: &str = "./logs";

pub static LOG_PATH: Lazy<String> = Lazy::new(|| {
    match env::var("REMUX_LOG_PATH") {
        Ok(path) => path,
        Err(_) => dotenv::var("REMUX_LOG_PATH").unwrap_or_else(|_| REMUX_LOG_PATH.to_string()),
    }
});

pub fn init_env() {
    dotenv::dotenv().ok();
}
