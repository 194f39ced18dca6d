//! `dashsync request`: one exchange through the executor.

use dashsync_core::{Endpoint, ExchangeResult, RequestOptions, SyncClient};

use crate::cli::{GlobalOpts, HttpMethod, RequestArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

pub async fn handle(args: RequestArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let endpoint = build_endpoint(args)?;
    let client = SyncClient::new(config::sync_config(global)?, config::credentials(global))?;

    match client.execute(&endpoint, &RequestOptions::default()).await {
        ExchangeResult::Success(payload) => output::print(global.output, &payload),
        ExchangeResult::Failure(failure) => Err(failure.into()),
    }
}

fn build_endpoint(args: RequestArgs) -> Result<Endpoint, CliError> {
    let mut endpoint = match args.method {
        HttpMethod::Get => Endpoint::get(args.path),
        HttpMethod::Post => Endpoint::post(args.path),
        HttpMethod::Put => Endpoint::put(args.path),
        HttpMethod::Patch => Endpoint::patch(args.path),
        HttpMethod::Delete => Endpoint::delete(args.path),
    };

    for pair in &args.query {
        let (key, value) = pair.split_once('=').ok_or_else(|| CliError::InvalidInput {
            field: "query".into(),
            reason: format!("expected KEY=VALUE, got '{pair}'"),
        })?;
        endpoint = endpoint.query(key, value);
    }

    if let Some(ref body) = args.body {
        let json = serde_json::from_str(body).map_err(|e| CliError::InvalidInput {
            field: "body".into(),
            reason: format!("invalid JSON: {e}"),
        })?;
        endpoint = endpoint.body(json);
    }

    Ok(endpoint)
}
