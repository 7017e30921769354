//! CLI Status Command
//!
//! Queries the health endpoint of a running server.

use anyhow::Result;

pub async fn run(bind: &str, port: u16) -> Result<()> {
    let host = if bind == "0.0.0.0" { "127.0.0.1" } else { bind };
    let url = format!("http://{host}:{port}/api/health");
    println!("chatloom status: checking {url}");

    match reqwest::Client::new().get(&url).send().await {
        Ok(resp) => {
            let body: serde_json::Value = resp.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Err(_) => {
            println!("chatloom is not running on {host}:{port}");
        }
    }
    Ok(())
}
