//! Authorize command - browser-based token grant

use anyhow::{Context, Result};
use flickd_client::FlickdClient;

use crate::output::{OutputContext, TokenRow};

/// Print the login page URL, wait for the user to approve, then fetch the token
pub async fn authorize(client: &FlickdClient, perms: &str, ctx: &OutputContext) -> Result<()> {
    let authorization = client
        .exchange()
        .begin_web_authorization(perms)
        .await
        .context("Failed to start authorization")?;

    // The URL is the point of this command, so it is printed even in quiet mode
    println!("Open this URL in a browser and approve access:");
    println!("\n  {}\n", authorization.url);
    println!("Press Enter once access is granted...");

    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| ())
    })
    .await?
    .context("Failed to read from stdin")?;

    let token = client
        .exchange()
        .complete_web_authorization(&authorization)
        .await
        .context("Authorization was not completed")?;

    ctx.print_one(&TokenRow::from(&token));
    ctx.success("Authorized");
    Ok(())
}
