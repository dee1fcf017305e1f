use std::time::Duration;

use once_cell::sync::OnceCell;
use reqwest::blocking::Client;

use crate::error::{EngineError, Result};

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = concat!("gridcast/", env!("CARGO_PKG_VERSION"));

static CLIENT: OnceCell<Client> = OnceCell::new();

pub fn http_client() -> Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs()))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| EngineError::ProviderUnavailable(format!("http client: {err}")))
    })
}

fn request_timeout_secs() -> u64 {
    std::env::var("GRIDCAST_HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|val| val.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_TIMEOUT_SECS)
        .max(1)
}
